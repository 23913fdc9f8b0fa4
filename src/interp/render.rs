//! Template rendering with `@var` interpolation.

use std::sync::Arc;

use serde_json::Value;

use super::context::{InterpolationContext, escape_for};
use crate::ast::{FieldAccess, TemplateLiteral, TemplateSegment, VariableReference};
use crate::env::Environment;
use crate::error::{MlldError, Result};
use crate::value::{SecurityDescriptor, StructuredValue, ValueKind};

/// Unescape literal-`@` sequences in template text: `@@` renders as `@`.
pub fn interpolate_text(text: &str) -> String {
    text.replace("@@", "@")
}

/// Display form of a value inside a template: containers JSON-stringify
/// their `data`, everything else contributes its canonical text.
pub fn stringify_for_template(value: &StructuredValue) -> String {
    match &value.data {
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(&value.data).unwrap_or_else(|_| value.text.clone())
        }
        _ => value.text.clone(),
    }
}

/// Resolve a variable reference, including field drilling and the `.mx`
/// metadata namespace.
pub fn resolve_reference(
    reference: &VariableReference,
    env: &Arc<Environment>,
) -> Result<StructuredValue> {
    let base = env.lookup(&reference.identifier, None)?;
    project_fields(&base, &reference.fields, &reference.identifier)
}

fn project_fields(
    base: &StructuredValue,
    fields: &[FieldAccess],
    name: &str,
) -> Result<StructuredValue> {
    if fields.is_empty() {
        return Ok(base.clone());
    }

    // `.mx` reads metadata rather than data.
    if matches!(fields.first(), Some(FieldAccess::Field(f)) if f == "mx") {
        let mx = base.rewrap(base.metadata.mx.to_value(), ValueKind::Json);
        return mx.project(&fields[1..]).ok_or_else(|| missing(name, fields));
    }

    base.project(fields).ok_or_else(|| missing(name, fields))
}

fn missing(name: &str, fields: &[FieldAccess]) -> MlldError {
    let mut path = name.to_string();
    for field in fields {
        match field {
            FieldAccess::Field(f) => {
                path.push('.');
                path.push_str(f);
            }
            FieldAccess::Index(i) => {
                path.push_str(&format!(".{i}"));
            }
        }
    }
    MlldError::VariableNotFound {
        name: path,
        location: None,
    }
}

/// Render a template body against an environment.
///
/// The result carries the merge of every interpolated value's security
/// descriptor, so labels and taint survive template composition.
pub fn render_template(
    template: &TemplateLiteral,
    env: &Arc<Environment>,
    context: InterpolationContext,
) -> Result<StructuredValue> {
    let mut out = String::new();
    let mut security = SecurityDescriptor::default();

    for segment in &template.segments {
        match segment {
            TemplateSegment::Text(text) => out.push_str(&interpolate_text(text)),
            TemplateSegment::Interpolation(reference) => {
                let value = resolve_reference(reference, env)?;
                security.merge_from(value.security());
                let rendered = stringify_for_template(&value);
                out.push_str(&escape_for(&rendered, context)?);
            }
        }
    }

    Ok(StructuredValue::template(out).with_security(security))
}
