//! Policy frames: capabilities, label flows, auth, and keychain rules.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MlldError, Result};

/// Allow/deny glob pattern pair.
///
/// Deny patterns always win; when allow patterns are present they act as a
/// whitelist and anything unmatched is blocked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternSet {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PatternSet {
    /// The deny pattern matching `subject`, if any.
    pub fn denies(&self, subject: &str) -> Option<&str> {
        self.deny
            .iter()
            .find(|p| glob_matches(p, subject))
            .map(String::as_str)
    }

    /// True when an allow whitelist exists and `subject` misses it.
    pub fn misses_allow(&self, subject: &str) -> bool {
        !self.allow.is_empty() && !self.allow.iter().any(|p| glob_matches(p, subject))
    }
}

fn glob_matches(pattern: &str, subject: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(subject))
        .unwrap_or(false)
}

/// Flow rules for one label: which operation classes the labeled value may
/// enter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelRule {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// One auth alias: where the secret comes from and the variable name it is
/// injected as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthBinding {
    /// `keychain:service/account` or `env:VAR`.
    pub from: String,
    /// Environment variable name visible to the command.
    #[serde(rename = "as")]
    pub inject_as: String,
}

/// One frame on the policy stack, produced by `/policy @p = union(config)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyFrame {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub capabilities: PatternSet,
    #[serde(default)]
    pub labels: BTreeMap<String, LabelRule>,
    #[serde(default)]
    pub auth: BTreeMap<String, AuthBinding>,
    #[serde(default)]
    pub keychain: PatternSet,
    /// Capabilities requiring explicit opt-in (e.g. `@keychain`).
    #[serde(default)]
    pub danger: BTreeSet<String>,
}

impl PolicyFrame {
    /// Build a frame from an evaluated policy config object.
    pub fn from_value(name: impl Into<String>, config: &Value) -> Result<Self> {
        let mut frame: PolicyFrame =
            serde_json::from_value(config.clone()).map_err(MlldError::Serde)?;
        frame.name = name.into();
        Ok(frame)
    }

    /// The rule identifier blocking `capability`, if this frame blocks it.
    pub fn capability_violation(&self, capability: &str) -> Option<String> {
        if let Some(pattern) = self.capabilities.denies(capability) {
            return Some(pattern.to_string());
        }
        if self.capabilities.misses_allow(capability) {
            return Some("capabilities.allow".to_string());
        }
        None
    }

    /// The rule identifier blocking a labeled value from flowing into `op`.
    pub fn label_violation(&self, label: &str, op: &str) -> Option<String> {
        let rule = self.labels.get(label)?;
        if let Some(pattern) = rule.deny.iter().find(|p| glob_matches(p, op)) {
            return Some(format!("labels.{label}.deny:{pattern}"));
        }
        if !rule.allow.is_empty() && !rule.allow.iter().any(|p| glob_matches(p, op)) {
            return Some(format!("labels.{label}.allow"));
        }
        None
    }

    /// The rule identifier blocking a `service/account` keychain path.
    pub fn keychain_violation(&self, path: &str) -> Option<String> {
        if let Some(pattern) = self.keychain.denies(path) {
            return Some(format!("keychain.deny:{pattern}"));
        }
        if self.keychain.misses_allow(path) {
            return Some("keychain.allow".to_string());
        }
        None
    }
}

/// Capability string for a shell command line.
///
/// The first two words identify the tool and subcommand: `git push origin`
/// becomes `cmd:git:push`, `ls` becomes `cmd:ls`. Policy globs like
/// `cmd:git:*` match at this granularity.
pub fn command_capability(command_line: &str) -> String {
    let mut words = command_line.split_whitespace();
    match (words.next(), words.next()) {
        (Some(w0), Some(w1)) => format!("cmd:{w0}:{w1}"),
        (Some(w0), None) => format!("cmd:{w0}"),
        _ => "cmd:".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capability_of_a_command_line() {
        assert_eq!(command_capability("git push origin main"), "cmd:git:push");
        assert_eq!(command_capability("ls"), "cmd:ls");
    }

    #[test]
    fn deny_patterns_win() {
        let frame = PolicyFrame::from_value(
            "p",
            &json!({"capabilities": {"deny": ["cmd:git:push"]}}),
        )
        .unwrap();
        assert_eq!(
            frame.capability_violation("cmd:git:push").as_deref(),
            Some("cmd:git:push")
        );
        assert!(frame.capability_violation("cmd:git:status").is_none());
    }

    #[test]
    fn allow_lists_are_whitelists() {
        let frame = PolicyFrame::from_value(
            "p",
            &json!({"capabilities": {"allow": ["cmd:echo*", "cmd:printf*"]}}),
        )
        .unwrap();
        assert!(frame.capability_violation("cmd:echo").is_none());
        assert_eq!(
            frame.capability_violation("cmd:rm:-rf").as_deref(),
            Some("capabilities.allow")
        );
    }

    #[test]
    fn label_flow_rules() {
        let frame = PolicyFrame::from_value(
            "p",
            &json!({"labels": {"secret": {"deny": ["op:show", "op:exfil"]}}}),
        )
        .unwrap();
        assert!(frame.label_violation("secret", "op:show").is_some());
        assert!(frame.label_violation("secret", "op:run").is_none());
        assert!(frame.label_violation("pii", "op:show").is_none());
    }
}
