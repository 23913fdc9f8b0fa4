//! Guard hook records and decision signaling.
//!
//! Guard bodies are ordinary `when`-expressions, so their results travel as
//! `StructuredValue`s. The decision keywords evaluate to tagged sentinel
//! values which [`decision_of`] recognizes on the way out; anything else is
//! treated as `allow` when truthy and `deny` when falsy.

use serde_json::{Value, json};

use crate::ast::{GuardPhase, GuardTarget, SourceLocation, WhenExpression};
use crate::value::StructuredValue;

/// A registered guard.
#[derive(Debug, Clone)]
pub struct GuardHook {
    pub name: String,
    pub phase: GuardPhase,
    pub target: GuardTarget,
    pub body: WhenExpression,
    /// Policy-backed guards survive `with { guards: false }`.
    pub privileged: bool,
    pub location: SourceLocation,
}

/// Outcome of evaluating the guards at one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Deny { message: String },
    Retry { hint: Option<String> },
}

impl GuardDecision {
    /// Convert a non-allow decision into the error the caller propagates.
    ///
    /// Retry errors are consumed by the pipeline driver; everywhere else
    /// they surface as fatal.
    pub fn into_result(self) -> crate::error::Result<()> {
        use crate::error::{GuardOutcome, MlldError};
        match self {
            GuardDecision::Allow => Ok(()),
            GuardDecision::Deny { message } => Err(MlldError::GuardDecision {
                decision: GuardOutcome::Deny,
                message,
                retry_from: None,
            }),
            GuardDecision::Retry { hint } => Err(MlldError::GuardDecision {
                decision: GuardOutcome::Retry,
                message: hint.unwrap_or_default(),
                retry_from: None,
            }),
        }
    }
}

/// Sentinel for the `allow` keyword.
pub fn allow_value() -> StructuredValue {
    StructuredValue::json(json!({"__guard": "allow"}))
}

/// Sentinel for `deny(msg)`.
pub fn deny_value(message: impl Into<String>) -> StructuredValue {
    StructuredValue::json(json!({"__guard": "deny", "message": message.into()}))
}

/// Sentinel for `retry` / `retry "hint"`.
pub fn retry_value(hint: Option<String>) -> StructuredValue {
    StructuredValue::json(json!({
        "__retry": true,
        "hint": hint.map(Value::String).unwrap_or(Value::Null),
    }))
}

/// Recognize a retry sentinel; returns the hint when present.
pub fn retry_signal_of(value: &StructuredValue) -> Option<Option<String>> {
    if value
        .data
        .get("__retry")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let hint = value
            .data
            .get("hint")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(hint)
    } else {
        None
    }
}

/// Interpret a guard body result as a decision.
pub fn decision_of(value: &StructuredValue) -> GuardDecision {
    if let Some(hint) = retry_signal_of(value) {
        return GuardDecision::Retry { hint };
    }
    match value.data.get("__guard").and_then(Value::as_str) {
        Some("allow") => GuardDecision::Allow,
        Some("deny") => GuardDecision::Deny {
            message: value
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("denied by guard")
                .to_string(),
        },
        _ => {
            if value.is_truthy() {
                GuardDecision::Allow
            } else {
                GuardDecision::Deny {
                    message: "guard returned a falsy value".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_sentinels_round_trip() {
        assert_eq!(decision_of(&allow_value()), GuardDecision::Allow);
        assert_eq!(
            decision_of(&deny_value("nope")),
            GuardDecision::Deny {
                message: "nope".into()
            }
        );
        assert_eq!(
            decision_of(&retry_value(Some("revise".into()))),
            GuardDecision::Retry {
                hint: Some("revise".into())
            }
        );
    }

    #[test]
    fn plain_values_fall_back_to_truthiness() {
        assert_eq!(
            decision_of(&StructuredValue::text("ok")),
            GuardDecision::Allow
        );
        assert!(matches!(
            decision_of(&StructuredValue::text("")),
            GuardDecision::Deny { .. }
        ));
    }
}
