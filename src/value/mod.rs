//! The canonical value model.
//!
//! Every value that crosses a pipeline stage, a `for` body, a `/var`
//! assignment, or a template interpolation travels as a
//! [`StructuredValue`]: parsed `data` plus canonical `text` plus a
//! [`SecurityDescriptor`]. Unwrapping happens only at display boundaries
//! (`text`) or computation boundaries (`data`), and re-wrapping after a
//! computation merges the input descriptor into the output.

mod security;
mod structured;
mod variable;

pub use security::{SecurityDescriptor, TaintLevel};
pub use structured::{LoopInfo, MxMetadata, StructuredValue, ValueKind, ValueMetadata};
pub use variable::{ExeDef, ScopeKind, Variable, VariableSource};
