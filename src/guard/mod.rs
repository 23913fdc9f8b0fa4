//! Guard hooks and policy frames.
//!
//! Guards are registered hooks evaluated before, after, or around an
//! operation class (`op:show`, `op:run`, `op:exe`, `op:output`) or a label
//! class (`for secret`). A guard body is a `when`-expression whose result
//! is one of `allow`, `deny(msg)`, or `retry(hint)`; the first non-allow
//! decision at a call site short-circuits, in registration order.
//!
//! Policies are declarative frames on a per-environment cactus stack:
//! capability globs over command lines, label flow rules, auth bindings,
//! and keychain path patterns. Every `run`/`exe`/`show`/`output` consults
//! the stack innermost-first before touching the outside world.

mod engine;
mod hooks;
mod policy;

pub use engine::{
    AuthInjection, collect_auth, enforce_capability, enforce_label_flow, run_guards,
};
pub use hooks::{
    GuardDecision, GuardHook, allow_value, decision_of, deny_value, retry_signal_of, retry_value,
};
pub use policy::{AuthBinding, LabelRule, PatternSet, PolicyFrame, command_capability};
