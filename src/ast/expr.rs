//! Expression forms the evaluator reduces to `StructuredValue`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a variable, with optional field drilling (`@user.name`,
/// `@items.0`).
///
/// The parser applies the trailing-token rule: only bare identifiers count
/// as fields, so `@doc.md` reaches the evaluator as the identifier `doc.md`
/// unless the dot was escaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReference {
    pub identifier: String,
    #[serde(default)]
    pub fields: Vec<FieldAccess>,
}

impl VariableReference {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Vec<FieldAccess>) -> Self {
        self.fields = fields;
        self
    }
}

/// A single step of field access on a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldAccess {
    Field(String),
    Index(i64),
}

/// One segment of a template body: literal text or an `@var` interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateSegment {
    Text(String),
    Interpolation(VariableReference),
}

/// A backtick, `[[...]]`, or `.att` template body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateLiteral {
    pub segments: Vec<TemplateSegment>,
}

impl TemplateLiteral {
    pub fn new(segments: Vec<TemplateSegment>) -> Self {
        Self { segments }
    }

    /// Template consisting of a single literal text segment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            segments: vec![TemplateSegment::Text(content.into())],
        }
    }
}

/// `<path>` load of a file, URL, or glob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlligatorPath {
    pub path: String,
    #[serde(default)]
    pub fields: Vec<FieldAccess>,
}

impl AlligatorPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fields: Vec::new(),
        }
    }
}

/// Trailing modifier on an exec invocation (`| log` duplicates the result to
/// stderr without consuming it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TailModifier {
    Log,
}

/// Call of an `/exe`-defined callable: `@f(a, b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecInvocation {
    pub target: String,
    #[serde(default)]
    pub args: Vec<Expression>,
    #[serde(default)]
    pub tail: Option<TailModifier>,
    #[serde(default)]
    pub options: super::WithOptions,
}

impl ExecInvocation {
    pub fn new(target: impl Into<String>, args: Vec<Expression>) -> Self {
        Self {
            target: target.into(),
            args,
            tail: None,
            options: super::WithOptions::default(),
        }
    }
}

/// Target of one pipeline stage.
///
/// `Json` and `Log` are the built-in transformers; everything else resolves
/// to an exe variable at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageTarget {
    Exe(String),
    Json,
    Log,
}

/// One stage in a pipeline. `batch` marks the `=> | @stage` form where the
/// stage receives the whole upstream array at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub target: StageTarget,
    #[serde(default)]
    pub args: Vec<Expression>,
    #[serde(default)]
    pub batch: bool,
}

impl PipelineStage {
    pub fn exe(name: impl Into<String>) -> Self {
        Self {
            target: StageTarget::Exe(name.into()),
            args: Vec::new(),
            batch: false,
        }
    }
}

/// `base | @s1 | @s2 | ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExpression {
    pub base: Box<Expression>,
    pub stages: Vec<PipelineStage>,
}

/// `when first [...]` / `when all [...]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhenSubtype {
    /// Evaluate branches in order; the first truthy condition wins.
    First,
    /// Evaluate every branch whose condition is truthy; the last result wins.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WhenCondition {
    Expr(Expression),
    /// The `*` fallback arm.
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenBranch {
    pub condition: WhenCondition,
    pub result: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenExpression {
    pub subtype: WhenSubtype,
    pub branches: Vec<WhenBranch>,
}

impl WhenExpression {
    pub fn first(branches: Vec<WhenBranch>) -> Self {
        Self {
            subtype: WhenSubtype::First,
            branches,
        }
    }
}

/// Parallelism clause on a `for`: `parallel(cap, rate)`.
///
/// Both fields accept literals or variable references that resolve to a
/// number (cap) or a duration/milliseconds (rate).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParallelSpec {
    pub cap: Option<Expression>,
    pub rate: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForOptions {
    pub parallel: Option<ParallelSpec>,
}

impl ForOptions {
    pub fn parallel(cap: Option<Expression>, rate: Option<Expression>) -> Self {
        Self {
            parallel: Some(ParallelSpec { cap, rate }),
        }
    }
}

/// Expression form of iteration: `for @x in @src => expr`, optionally with a
/// comprehension filter `when cond`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForExpression {
    pub binding: String,
    pub source: Box<Expression>,
    pub filter: Option<Box<Expression>>,
    pub body: Box<Expression>,
    #[serde(default)]
    pub options: ForOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
}

/// Everything the evaluator can reduce to a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A JSON literal (string, number, bool, null, or pre-parsed data).
    Literal(Value),
    Template(TemplateLiteral),
    VarRef(VariableReference),
    Alligator(AlligatorPath),
    Invoke(ExecInvocation),
    Pipeline(PipelineExpression),
    When(Box<WhenExpression>),
    For(Box<ForExpression>),
    Array(Vec<Expression>),
    Object(Vec<(String, Expression)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    /// Braced command body on `/run`: `/run {echo "test"}`.
    Command(TemplateLiteral),
    /// `retry` / `retry "hint"` inside a when-branch; only meaningful in a
    /// pipeline stage context.
    Retry { hint: Option<Box<Expression>> },
    /// Guard decision keyword `allow`.
    Allow,
    /// Guard decision keyword `deny(msg)`.
    Deny { message: Option<Box<Expression>> },
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn var_ref(name: impl Into<String>) -> Self {
        Expression::VarRef(VariableReference::new(name))
    }

    pub fn var_field(name: impl Into<String>, fields: Vec<FieldAccess>) -> Self {
        Expression::VarRef(VariableReference::new(name).with_fields(fields))
    }

    pub fn invoke(target: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Invoke(ExecInvocation::new(target, args))
    }

    pub fn pipeline(base: Expression, stages: Vec<PipelineStage>) -> Self {
        Expression::Pipeline(PipelineExpression {
            base: Box::new(base),
            stages,
        })
    }

    pub fn eq(lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op: BinaryOp::Eq,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op: BinaryOp::And,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}
