//! The directive evaluator.
//!
//! `evaluate_document` walks a parsed document in order; each directive
//! dispatches on its kind into a sub-evaluator. Expressions reduce to
//! `StructuredValue`s through `evaluate_expression`, which recurses via
//! boxed futures so pipelines, iterations, and guard bodies can nest
//! freely.

mod directive;
mod expression;
mod iteration;
mod pipeline_exec;

pub use directive::{evaluate_directive, evaluate_document, evaluate_nodes};
pub use expression::{evaluate_expression, evaluate_when, invoke_callable};
pub use iteration::resolve_parallel_options;
