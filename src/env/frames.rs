//! Scoped read-only views backing `@ctx` and `@mx`.
//!
//! A frame is pushed when evaluation enters a pipeline stage or a guard
//! body and popped when it leaves; `@ctx.try`, `@ctx.outputs`, `@mx.op`,
//! and friends are field lookups on the nearest frame of the right kind.

use serde_json::{Value, json};

use crate::value::{SecurityDescriptor, StructuredValue};

/// Snapshot visible to a pipeline stage body as `@ctx`.
///
/// All numbers here are projections of the pipeline event log; the driver
/// rebuilds the snapshot before each stage attempt.
#[derive(Debug, Clone)]
pub struct PipelineCtx {
    /// Stage number: the base producer is 0, pipe targets count from 1.
    pub stage: usize,
    /// Number of pipe targets (the base excluded).
    pub total: usize,
    /// 1-indexed attempt count for the current stage.
    pub attempt: u32,
    /// Hint from the retry that restarted the current chain, if any.
    pub hint: Option<String>,
    /// `outputs[0]` is the base input; `1..` are last-success outputs of
    /// previous stages, respecting retry invalidations.
    pub outputs: Vec<Value>,
    /// The value flowing into the current stage.
    pub input: StructuredValue,
}

impl PipelineCtx {
    /// Materialize the namespace for `@ctx.<field>` access.
    pub fn ctx_value(&self) -> Value {
        let previous = if self.stage >= 1 {
            self.outputs.get(self.stage - 1).cloned().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        json!({
            "try": self.attempt,
            "stage": self.stage,
            "hint": self.hint.clone().map(Value::String).unwrap_or(Value::Null),
            "outputs": self.outputs.clone(),
            "previous": previous,
            "total": self.total,
        })
    }
}

/// The `{type, name, labels}` triple describing a guarded operation.
#[derive(Debug, Clone)]
pub struct OpDescriptor {
    pub op_type: String,
    pub name: String,
    pub labels: Vec<String>,
}

impl OpDescriptor {
    pub fn new(op_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            name: name.into(),
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Snapshot visible to a guard body as `@mx` (and `@input`).
#[derive(Debug, Clone)]
pub struct GuardCtx {
    pub op: OpDescriptor,
    /// Merged descriptor of every input to the operation.
    pub inputs: SecurityDescriptor,
    /// Primary input value.
    pub input: StructuredValue,
    /// 1-indexed attempt count for this guard at this call site.
    pub try_count: u32,
    /// Reason attached to the retry that caused the current attempt.
    pub reason: Option<String>,
}

impl GuardCtx {
    /// Materialize the namespace for `@mx.<field>` access.
    pub fn mx_value(&self) -> Value {
        json!({
            "op": {
                "type": self.op.op_type,
                "name": self.op.name,
                "labels": self.op.labels,
            },
            "taint": self.inputs.taint.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "labels": self.inputs.labels.iter().cloned().collect::<Vec<_>>(),
            "sources": self.inputs.sources.clone(),
            "guard": {
                "try": self.try_count,
                "reason": self.reason.clone().map(Value::String).unwrap_or(Value::Null),
            },
        })
    }
}

/// One entry on an environment's context stack.
#[derive(Debug, Clone)]
pub enum ContextFrame {
    Pipeline(PipelineCtx),
    Guard(GuardCtx),
}
