use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::SecurityDescriptor;

/// Where an effect's content goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    /// Document only.
    Doc,
    Stdout,
    Stderr,
    /// Document and stdout.
    Both,
    FileWrite,
}

impl std::fmt::Display for EffectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EffectType::Doc => "doc",
            EffectType::Stdout => "stdout",
            EffectType::Stderr => "stderr",
            EffectType::Both => "both",
            EffectType::FileWrite => "file_write",
        };
        write!(f, "{name}")
    }
}

/// One entry in the append-only effect log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub effect_type: EffectType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    /// Capability that produced this effect (e.g. `cmd:git:status`), when
    /// one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default)]
    pub security: SecurityDescriptor,
    /// Target path for `file_write` effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Effect {
    pub fn new(effect_type: EffectType, content: impl Into<String>) -> Self {
        Self {
            effect_type,
            content: content.into(),
            metadata: Value::Null,
            capability: None,
            security: SecurityDescriptor::default(),
            path: None,
        }
    }

    pub fn doc(content: impl Into<String>) -> Self {
        Self::new(EffectType::Doc, content)
    }

    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new(EffectType::Stdout, content)
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new(EffectType::Stderr, content)
    }

    pub fn both(content: impl Into<String>) -> Self {
        Self::new(EffectType::Both, content)
    }

    pub fn file_write(path: impl Into<String>, content: impl Into<String>) -> Self {
        let mut effect = Self::new(EffectType::FileWrite, content);
        effect.path = Some(path.into());
        effect
    }

    #[must_use]
    pub fn with_security(mut self, security: SecurityDescriptor) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Contributes to the rendered document?
    pub fn is_doc(&self) -> bool {
        matches!(self.effect_type, EffectType::Doc | EffectType::Both)
    }

    /// Short single-line preview for event displays.
    pub fn preview(&self) -> String {
        let flat = self.content.replace('\n', "\\n");
        if flat.len() > 80 {
            let mut cut = 80;
            while !flat.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}…", &flat[..cut])
        } else {
            flat
        }
    }
}
