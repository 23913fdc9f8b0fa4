//! Guard evaluation and policy enforcement at call sites.

use std::sync::Arc;

use tracing::debug;

use super::hooks::{GuardDecision, decision_of};
use super::policy::AuthBinding;
use crate::ast::{GuardPhase, GuardTarget};
use crate::env::{ChildScope, ContextFrame, Environment, GuardCtx, OpDescriptor};
use crate::error::{GuardOutcome, MlldError, Result};
use crate::event_bus::RuntimeEvent;
use crate::value::{SecurityDescriptor, StructuredValue};

/// Evaluate the guards registered for an operation, in registration order.
///
/// The first non-`allow` decision short-circuits. `skip_user_guards`
/// honors `with { guards: false }`, which never skips privileged guards
/// and is ignored entirely when the project config forbids bypass.
///
/// A `retry` decision is only legal inside a pipeline stage context; the
/// caller converts it into a stage retry. Outside a pipeline it surfaces
/// as a fatal error.
pub async fn run_guards(
    env: &Arc<Environment>,
    phase: GuardPhase,
    op: &OpDescriptor,
    input: &StructuredValue,
    skip_user_guards: bool,
) -> Result<GuardDecision> {
    let bypass = skip_user_guards && env.handles().config.security.allow_guard_bypass;

    for hook in env.guards() {
        let phase_matches = hook.phase == phase || hook.phase == GuardPhase::For;
        if !phase_matches || !target_matches(&hook.target, op, input.security()) {
            continue;
        }
        if bypass && !hook.privileged {
            continue;
        }

        let try_key = format!("{}:{}", hook.name, op.name);
        let try_count = env.bump_guard_try(&try_key);
        let reason = env.pipeline_ctx().and_then(|ctx| ctx.hint);

        let guard_env = env.create_child(ChildScope::Guard);
        let _frame = guard_env.push_frame(ContextFrame::Guard(GuardCtx {
            op: op.clone(),
            inputs: input.security().clone(),
            input: input.clone(),
            try_count,
            reason,
        }));

        if env.handles().options.debug {
            let _ = env.handles().emitter.emit(RuntimeEvent::debug(
                format!("debug:guard:{}", hook.name),
                format!("evaluating for {} (try {try_count})", op.op_type),
            ));
        }

        let outcome = crate::eval::evaluate_when(&hook.body, &guard_env).await?;
        match decision_of(&outcome) {
            GuardDecision::Allow => continue,
            GuardDecision::Deny { message } => {
                debug!(guard = %hook.name, op = %op.op_type, "guard denied");
                return Ok(GuardDecision::Deny { message });
            }
            GuardDecision::Retry { hint } => {
                if env.pipeline_ctx().is_none() {
                    return Err(MlldError::GuardDecision {
                        decision: GuardOutcome::Retry,
                        message: format!(
                            "guard @{} requested a retry outside a pipeline stage",
                            hook.name
                        ),
                        retry_from: None,
                    });
                }
                return Ok(GuardDecision::Retry { hint });
            }
        }
    }

    Ok(GuardDecision::Allow)
}

fn target_matches(target: &GuardTarget, op: &OpDescriptor, inputs: &SecurityDescriptor) -> bool {
    match target {
        GuardTarget::Op(class) => class.to_string() == op.op_type,
        GuardTarget::Label(label) => inputs.labels.contains(label),
    }
}

/// Check a capability string against every active policy frame,
/// innermost first.
pub fn enforce_capability(env: &Environment, capability: &str, op: &str) -> Result<()> {
    for frame in env.effective_policies() {
        if let Some(rule) = frame.capability_violation(capability) {
            debug!(policy = %frame.name, rule = %rule, capability, "policy denied capability");
            return Err(MlldError::PolicyDenied {
                rule,
                op: op.to_string(),
            });
        }
    }
    Ok(())
}

/// Check that every label on the inputs may flow into `op_label`
/// (an operation class such as `op:show`).
pub fn enforce_label_flow(
    env: &Environment,
    inputs: &SecurityDescriptor,
    op_label: &str,
) -> Result<()> {
    for frame in env.effective_policies() {
        for label in &inputs.labels {
            if let Some(rule) = frame.label_violation(label, op_label) {
                debug!(policy = %frame.name, rule = %rule, "policy denied label flow");
                return Err(MlldError::PolicyDenied {
                    rule,
                    op: op_label.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A secret resolved through a policy `auth` binding, ready to inject into
/// a command environment.
#[derive(Debug, Clone)]
pub struct AuthInjection {
    pub name: String,
    pub value: String,
    pub security: SecurityDescriptor,
}

/// Resolve the auth bindings of every active policy frame, innermost
/// binding per alias winning.
///
/// Keychain-backed bindings require the `@keychain` danger opt-in and pass
/// the frame's keychain path patterns. Injected values carry the `secret`
/// label so label-flow checks apply to whatever they touch downstream.
pub async fn collect_auth(env: &Arc<Environment>) -> Result<Vec<AuthInjection>> {
    let mut seen: Vec<String> = Vec::new();
    let mut injections = Vec::new();
    let frames = env.effective_policies();
    let danger_keychain = frames.iter().any(|f| f.danger.contains("@keychain"));

    for frame in &frames {
        for (alias, binding) in &frame.auth {
            if seen.contains(alias) {
                continue;
            }
            seen.push(alias.clone());
            let value = resolve_auth_source(env, binding, danger_keychain, &frames).await?;
            injections.push(AuthInjection {
                name: binding.inject_as.clone(),
                value,
                security: SecurityDescriptor::default()
                    .with_label("secret")
                    .with_source(format!("auth:{alias}")),
            });
        }
    }
    Ok(injections)
}

async fn resolve_auth_source(
    env: &Arc<Environment>,
    binding: &AuthBinding,
    danger_keychain: bool,
    frames: &[Arc<super::policy::PolicyFrame>],
) -> Result<String> {
    if let Some(var) = binding.from.strip_prefix("env:") {
        return env
            .handles()
            .captured_env
            .get(var)
            .cloned()
            .ok_or_else(|| MlldError::Config(format!("auth source env:{var} is not set")));
    }
    if let Some(path) = binding.from.strip_prefix("keychain:") {
        if !danger_keychain {
            return Err(MlldError::PolicyDenied {
                rule: "danger:@keychain".to_string(),
                op: "auth".to_string(),
            });
        }
        for frame in frames {
            if let Some(rule) = frame.keychain_violation(path) {
                return Err(MlldError::PolicyDenied {
                    rule,
                    op: "auth".to_string(),
                });
            }
        }
        let (service, account) = path.split_once('/').unwrap_or((path, ""));
        return env
            .handles()
            .keychain
            .get(service, account)
            .await
            .ok_or_else(|| MlldError::Config(format!("keychain entry {path} not found")));
    }
    Err(MlldError::Config(format!(
        "unsupported auth source: {}",
        binding.from
    )))
}
