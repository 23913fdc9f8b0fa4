//! Environments: name resolution, scope lifecycle, and shared plumbing.
//!
//! An [`Environment`] owns its local variables, points at its parent, and
//! shares one [`RuntimeHandles`] value (effect handler, file system,
//! spawner, clock, resolver registry, path context) by reference across the
//! whole tree. Reactive context namespaces (`@ctx`, `@mx`) are not real
//! variables; they are read-only views over the top of a per-environment
//! frame stack whose push/pop is tied to scope lifetime.

mod environment;
mod frames;
mod handles;

pub use environment::{ChildScope, Environment, PushedFrame};
pub use frames::{ContextFrame, GuardCtx, OpDescriptor, PipelineCtx};
pub use handles::{RuntimeHandles, RuntimeHandlesBuilder};
