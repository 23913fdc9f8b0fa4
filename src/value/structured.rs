//! `StructuredValue`: the canonical carrier for all evaluated data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::security::SecurityDescriptor;
use crate::ast::FieldAccess;

/// How the value came to exist; selects default rendering behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Json,
    Text,
    CommandOutput,
    LoadedContent,
    Template,
}

/// Loop bookkeeping exposed as `@x.mx.loop` inside iteration bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopInfo {
    /// Zero-based position in the source.
    pub index: usize,
    /// One-based position, for display.
    pub iteration: usize,
    /// Object key when iterating an object.
    pub key: Option<String>,
    pub total: usize,
}

/// The `.mx` metadata namespace attached to loaded content and loop
/// bindings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MxMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirname: Option<String>,
    /// Rough token estimate for budgeting prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_info: Option<LoopInfo>,
}

impl MxMetadata {
    pub fn is_empty(&self) -> bool {
        self.filename.is_none()
            && self.relative.is_none()
            && self.absolute.is_none()
            && self.dirname.is_none()
            && self.tokens.is_none()
            && self.source.is_none()
            && self.loop_info.is_none()
    }

    /// Project the namespace into plain data for `@x.mx.*` field access.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueMetadata {
    #[serde(default)]
    pub security: SecurityDescriptor,
    /// Provenance annotation: file path, URL, or command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub mx: MxMetadata,
}

/// The canonical value carrier.
///
/// `data` is the parsed structured form; `text` is the canonical string
/// rendering. The two stay consistent: constructors derive one from the
/// other, and [`StructuredValue::rewrap`] recomputes both while merging the
/// originating descriptor.
///
/// # Examples
///
/// ```
/// use mlld::value::StructuredValue;
/// use serde_json::json;
///
/// let v = StructuredValue::json(json!({"a": 1}));
/// assert_eq!(v.text, r#"{"a":1}"#);
///
/// let t = StructuredValue::text("hello");
/// assert_eq!(t.data, json!("hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredValue {
    pub data: Value,
    pub text: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub metadata: ValueMetadata,
}

/// Canonical string rendering of parsed data.
///
/// Strings render without quotes, null renders empty, and containers render
/// as compact JSON. This is the display-boundary form.
pub(crate) fn canonical_text(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

impl StructuredValue {
    /// Plain text value; `data` mirrors the text as a JSON string.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            data: Value::String(text.clone()),
            text,
            kind: ValueKind::Text,
            metadata: ValueMetadata::default(),
        }
    }

    /// Structured value; `text` is the canonical rendering of `data`.
    pub fn json(data: Value) -> Self {
        let text = canonical_text(&data);
        Self {
            data,
            text,
            kind: ValueKind::Json,
            metadata: ValueMetadata::default(),
        }
    }

    /// Command output. If the text parses as JSON the parsed tree becomes
    /// `data`; otherwise `data` stays null. Either way the taint gains
    /// `command_output`.
    pub fn command_output(text: impl Into<String>) -> Self {
        let text = text.into();
        let data = serde_json::from_str::<Value>(text.trim()).unwrap_or(Value::Null);
        let mut value = Self {
            data,
            text,
            kind: ValueKind::CommandOutput,
            metadata: ValueMetadata::default(),
        };
        value.metadata.security = SecurityDescriptor::command_output();
        value
    }

    /// Content loaded through an alligator path, with `.mx` metadata.
    pub fn loaded_content(text: impl Into<String>, mx: MxMetadata) -> Self {
        let text = text.into();
        Self {
            data: Value::String(text.clone()),
            text,
            kind: ValueKind::LoadedContent,
            metadata: ValueMetadata {
                mx,
                ..ValueMetadata::default()
            },
        }
    }

    /// Rendered template output.
    pub fn template(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            data: Value::String(text.clone()),
            text,
            kind: ValueKind::Template,
            metadata: ValueMetadata::default(),
        }
    }

    /// The empty value: null data, empty text.
    pub fn empty() -> Self {
        Self::json(Value::Null)
    }

    /// Error-as-data representation stored by `for` bodies that failed.
    pub fn error(message: impl Into<String>) -> Self {
        let mut value = Self::json(serde_json::json!({
            "__error": true,
            "__message": message.into(),
        }));
        value.kind = ValueKind::Json;
        value
    }

    pub fn is_error(&self) -> bool {
        self.data
            .get("__error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Re-wrap fresh data produced by a computation over `self`, merging
    /// this value's security descriptor into the result.
    #[must_use]
    pub fn rewrap(&self, data: Value, kind: ValueKind) -> StructuredValue {
        let mut out = match kind {
            ValueKind::Text | ValueKind::Template | ValueKind::LoadedContent => {
                let mut v = StructuredValue::text(canonical_text(&data));
                v.kind = kind;
                v
            }
            ValueKind::CommandOutput => {
                let mut v = StructuredValue::json(data);
                v.kind = ValueKind::CommandOutput;
                v
            }
            ValueKind::Json => StructuredValue::json(data),
        };
        out.metadata.security = self.metadata.security.clone();
        out
    }

    #[must_use]
    pub fn with_security(mut self, security: SecurityDescriptor) -> Self {
        self.metadata.security = security;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_loop(mut self, info: LoopInfo) -> Self {
        self.metadata.mx.loop_info = Some(info);
        self
    }

    /// Merge another descriptor into this value's security.
    pub fn merge_security(&mut self, other: &SecurityDescriptor) {
        self.metadata.security.merge_from(other);
    }

    pub fn security(&self) -> &SecurityDescriptor {
        &self.metadata.security
    }

    /// Display-boundary unwrap.
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// Truthiness for `when` conditions and comprehension filters: null,
    /// false, 0, `""`, `[]`, and `{}` are falsy.
    pub fn is_truthy(&self) -> bool {
        match &self.data {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Drill into `data` with field/index access, inheriting security.
    ///
    /// Returns `None` when a path segment is absent, which callers surface
    /// as a lookup failure with the full path in the message.
    pub fn project(&self, fields: &[FieldAccess]) -> Option<StructuredValue> {
        if fields.is_empty() {
            return Some(self.clone());
        }
        let mut current = &self.data;
        for field in fields {
            current = match field {
                FieldAccess::Field(name) => current.get(name)?,
                FieldAccess::Index(i) => {
                    let idx = usize::try_from(*i).ok()?;
                    current.get(idx)?
                }
            };
        }
        Some(self.rewrap(current.clone(), ValueKind::Json))
    }

    /// Collected-array constructor for iteration results.
    ///
    /// The array's descriptor is the merge of all element descriptors.
    /// Elements contribute their parsed `data`, falling back to the raw
    /// text for values (like plain command output) that never parsed.
    pub fn array_of(elements: Vec<StructuredValue>) -> StructuredValue {
        let mut security = SecurityDescriptor::default();
        for element in &elements {
            security.merge_from(&element.metadata.security);
        }
        let data = Value::Array(
            elements
                .into_iter()
                .map(|e| {
                    if e.data.is_null() && !e.text.is_empty() {
                        Value::String(e.text)
                    } else {
                        e.data
                    }
                })
                .collect(),
        );
        StructuredValue::json(data).with_security(security)
    }
}

impl std::fmt::Display for StructuredValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_output_auto_parses_json() {
        let v = StructuredValue::command_output("[1,2,3]");
        assert_eq!(v.kind, ValueKind::CommandOutput);
        assert_eq!(v.data, json!([1, 2, 3]));
        assert_eq!(v.text, "[1,2,3]");
    }

    #[test]
    fn command_output_keeps_null_data_for_plain_text() {
        let v = StructuredValue::command_output("hello world");
        assert_eq!(v.data, Value::Null);
        assert_eq!(v.text, "hello world");
    }

    #[test]
    fn rewrap_merges_security() {
        let src = StructuredValue::command_output("[1,2]");
        let out = src.rewrap(json!(3), ValueKind::Json);
        assert!(out.security().taint.contains(&super::super::TaintLevel::CommandOutput));
        assert_eq!(out.text, "3");
    }

    #[test]
    fn projection_inherits_security() {
        let v = StructuredValue::json(json!({"user": {"name": "ada"}}))
            .with_security(SecurityDescriptor::default().with_label("pii"));
        let name = v
            .project(&[
                FieldAccess::Field("user".into()),
                FieldAccess::Field("name".into()),
            ])
            .unwrap();
        assert_eq!(name.text, "ada");
        assert!(name.security().labels.contains("pii"));
    }

    #[test]
    fn truthiness_matches_when_semantics() {
        assert!(!StructuredValue::json(json!(null)).is_truthy());
        assert!(!StructuredValue::json(json!(0)).is_truthy());
        assert!(!StructuredValue::text("").is_truthy());
        assert!(!StructuredValue::json(json!([])).is_truthy());
        assert!(StructuredValue::text("x").is_truthy());
        assert!(StructuredValue::json(json!([0])).is_truthy());
    }
}
