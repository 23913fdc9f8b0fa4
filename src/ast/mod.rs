//! Typed AST consumed by the evaluator.
//!
//! The grammar and node construction live in the parser, which is an
//! external collaborator; this module only models the shapes the evaluator
//! dispatches on. Every node carries a [`SourceLocation`] so diagnostics can
//! point back into the document.

mod expr;
mod location;
mod nodes;

pub use expr::{
    AlligatorPath, BinaryOp, ExecInvocation, Expression, FieldAccess, ForExpression, ForOptions,
    ParallelSpec, PipelineExpression, PipelineStage, StageTarget, TailModifier, TemplateLiteral,
    TemplateSegment, UnaryOp, VariableReference, WhenBranch, WhenCondition, WhenExpression,
    WhenSubtype,
};
pub use location::SourceLocation;
pub use nodes::{
    Directive, DirectiveKind, Document, ExeBody, GuardPhase, GuardTarget, ImportBinding, Node,
    OpClass, OutputTarget, WithOptions,
};
