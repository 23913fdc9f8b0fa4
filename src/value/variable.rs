//! Variables: named bindings in an environment scope.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::structured::StructuredValue;
use crate::ast::{ExeBody, SourceLocation};

/// The directive that created a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    /// `/var` — module-scoped, immutable.
    Var,
    /// `/let` — block-scoped, may shadow.
    Let,
    /// `/exe` — holds a callable.
    Exe,
    /// `/path` — filesystem or URL target.
    Path,
    /// `/import` — re-exported binding from another module.
    Import,
}

/// Visibility class of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Module,
    Block,
    Parameter,
}

/// Callable captured by an `/exe` definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ExeDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: ExeBody,
    pub location: SourceLocation,
}

/// A named binding. The value's security descriptor equals the descriptor
/// of the defining expression merged with any explicit labels applied at
/// the definition site.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: StructuredValue,
    pub source_kind: VariableSource,
    pub scope_kind: ScopeKind,
    /// Present only for `exe` bindings.
    pub exe: Option<Arc<ExeDef>>,
    pub location: Option<SourceLocation>,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        value: StructuredValue,
        source_kind: VariableSource,
        scope_kind: ScopeKind,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            source_kind,
            scope_kind,
            exe: None,
            location: None,
        }
    }

    /// Binding for an `/exe` definition. The stored value is a small
    /// descriptive placeholder; the callable itself lives in `exe`.
    pub fn callable(def: ExeDef, scope_kind: ScopeKind) -> Self {
        let placeholder =
            StructuredValue::text(format!("<exe @{}/{}>", def.name, def.params.len()));
        Self {
            name: def.name.clone(),
            value: placeholder,
            source_kind: VariableSource::Exe,
            scope_kind,
            exe: Some(Arc::new(def)),
            location: None,
        }
    }

    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// True when rebinding this name in the same module scope must fail.
    pub fn rejects_rebind(&self) -> bool {
        matches!(self.source_kind, VariableSource::Var | VariableSource::Exe)
            && self.scope_kind == ScopeKind::Module
    }
}
