//! Security descriptors: labels, taint, and provenance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Trust-level tag propagated from inputs to outputs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaintLevel {
    Trusted,
    Untrusted,
    CommandOutput,
    #[serde(rename = "src:mcp")]
    SrcMcp,
    #[serde(rename = "src:net")]
    SrcNet,
    #[serde(rename = "src:fs")]
    SrcFs,
}

impl std::fmt::Display for TaintLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaintLevel::Trusted => "trusted",
            TaintLevel::Untrusted => "untrusted",
            TaintLevel::CommandOutput => "command_output",
            TaintLevel::SrcMcp => "src:mcp",
            TaintLevel::SrcNet => "src:net",
            TaintLevel::SrcFs => "src:fs",
        };
        write!(f, "{name}")
    }
}

/// Labels, taint, and source trail carried by every value.
///
/// The merge law keeps flows monotone: labels and taint union, sources
/// concatenate in order (deduplicated), and the first non-empty policy
/// reference wins.
///
/// # Examples
///
/// ```
/// use mlld::value::{SecurityDescriptor, TaintLevel};
///
/// let a = SecurityDescriptor::default()
///     .with_label("secret")
///     .with_taint(TaintLevel::CommandOutput);
/// let b = SecurityDescriptor::default().with_source("file:config.json");
///
/// let merged = a.merge(&b);
/// assert!(merged.labels.contains("secret"));
/// assert!(merged.taint.contains(&TaintLevel::CommandOutput));
/// assert_eq!(merged.sources, vec!["file:config.json"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub taint: BTreeSet<TaintLevel>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl SecurityDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for values produced inside the interpreter itself.
    pub fn trusted() -> Self {
        Self::default().with_taint(TaintLevel::Trusted)
    }

    /// Descriptor for command output.
    pub fn command_output() -> Self {
        Self::default().with_taint(TaintLevel::CommandOutput)
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    #[must_use]
    pub fn with_taint(mut self, taint: TaintLevel) -> Self {
        self.taint.insert(taint);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Merge two descriptors into a new one.
    #[must_use]
    pub fn merge(&self, other: &SecurityDescriptor) -> SecurityDescriptor {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// In-place variant of [`merge`](Self::merge).
    pub fn merge_from(&mut self, other: &SecurityDescriptor) {
        self.labels.extend(other.labels.iter().cloned());
        self.taint.extend(other.taint.iter().copied());
        for source in &other.sources {
            if !self.sources.contains(source) {
                self.sources.push(source.clone());
            }
        }
        if self.policy.is_none() {
            self.policy = other.policy.clone();
        }
    }

    /// True when the descriptor carries no information at all.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.taint.is_empty()
            && self.sources.is_empty()
            && self.policy.is_none()
    }

    /// True when any taint level other than `trusted` is present.
    pub fn is_tainted(&self) -> bool {
        self.taint.iter().any(|t| *t != TaintLevel::Trusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_labels_and_taint() {
        let a = SecurityDescriptor::default()
            .with_label("secret")
            .with_taint(TaintLevel::Untrusted);
        let b = SecurityDescriptor::default()
            .with_label("pii")
            .with_taint(TaintLevel::SrcNet);

        let merged = a.merge(&b);
        assert_eq!(merged.labels.len(), 2);
        assert!(merged.taint.contains(&TaintLevel::Untrusted));
        assert!(merged.taint.contains(&TaintLevel::SrcNet));
    }

    #[test]
    fn merge_keeps_source_order_and_dedups() {
        let a = SecurityDescriptor::default()
            .with_source("cmd:echo")
            .with_source("file:a.md");
        let b = SecurityDescriptor::default()
            .with_source("file:a.md")
            .with_source("url:https://example.com");

        let merged = a.merge(&b);
        assert_eq!(
            merged.sources,
            vec!["cmd:echo", "file:a.md", "url:https://example.com"]
        );
    }

    #[test]
    fn first_non_empty_policy_wins() {
        let a = SecurityDescriptor::default().with_policy("strict");
        let b = SecurityDescriptor::default().with_policy("relaxed");
        assert_eq!(a.merge(&b).policy.as_deref(), Some("strict"));
        assert_eq!(
            SecurityDescriptor::default().merge(&b).policy.as_deref(),
            Some("relaxed")
        );
    }
}
