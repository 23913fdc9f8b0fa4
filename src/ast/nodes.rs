//! Document-level nodes and directive payloads.

use serde::{Deserialize, Serialize};

use super::expr::{Expression, ForOptions, TemplateLiteral, WhenExpression};
use super::location::SourceLocation;

/// A parsed source document: Markdown interleaved with directives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub source_path: Option<String>,
}

impl Document {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            source_path: None,
        }
    }

    #[must_use]
    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

/// Top-level node variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Plain Markdown text, passed through to the document verbatim.
    Text {
        content: String,
        #[serde(default)]
        location: SourceLocation,
    },
    /// A fenced code block; never evaluated, emitted as-is.
    CodeFence {
        language: Option<String>,
        content: String,
        #[serde(default)]
        location: SourceLocation,
    },
    /// `>> comment` lines; dropped from output.
    Comment {
        content: String,
        #[serde(default)]
        location: SourceLocation,
    },
    /// YAML frontmatter block; exposed to templates, not emitted.
    Frontmatter {
        content: String,
        #[serde(default)]
        location: SourceLocation,
    },
    Directive(Directive),
}

/// Discriminant used for dispatch, debug events, and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveKind {
    Var,
    Let,
    Exe,
    Path,
    Show,
    Run,
    Output,
    Import,
    Export,
    If,
    When,
    For,
    Guard,
    Policy,
    Loop,
}

impl std::fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DirectiveKind::Var => "var",
            DirectiveKind::Let => "let",
            DirectiveKind::Exe => "exe",
            DirectiveKind::Path => "path",
            DirectiveKind::Show => "show",
            DirectiveKind::Run => "run",
            DirectiveKind::Output => "output",
            DirectiveKind::Import => "import",
            DirectiveKind::Export => "export",
            DirectiveKind::If => "if",
            DirectiveKind::When => "when",
            DirectiveKind::For => "for",
            DirectiveKind::Guard => "guard",
            DirectiveKind::Policy => "policy",
            DirectiveKind::Loop => "loop",
        };
        write!(f, "{name}")
    }
}

/// Execution body of an `/exe` definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExeBody {
    /// `cmd { ... }` — a single shell command with quoted interpolation.
    Cmd(TemplateLiteral),
    /// `sh { ... }` — full shell script, parameters passed positionally.
    Sh(String),
    /// `js { ... }` — JavaScript with parameters bound as locals.
    Js(String),
    /// `node { ... }` — JavaScript in a spawned node process.
    NodeJs(String),
    /// `py { ... }` — Python in a spawned interpreter.
    Py(String),
    /// Template body; renders with parameters in scope.
    Template(TemplateLiteral),
    /// `when` expression body.
    When(WhenExpression),
    /// `foreach` body returning a collection.
    Foreach(super::expr::ForExpression),
    /// `prose { ... }` — LLM call through the configured adapter.
    Prose(TemplateLiteral),
}

/// Operation classes guards and policies can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpClass {
    Show,
    Run,
    Exe,
    Output,
}

impl std::fmt::Display for OpClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpClass::Show => "op:show",
            OpClass::Run => "op:run",
            OpClass::Exe => "op:exe",
            OpClass::Output => "op:output",
        };
        write!(f, "{name}")
    }
}

/// What a guard is attached to: an operation class or a label class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardTarget {
    Op(OpClass),
    Label(String),
}

/// When a guard fires relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardPhase {
    Before,
    After,
    /// `for <label>` guards wrap every operation a labeled value flows into.
    For,
}

/// Destination of an `/output` directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputTarget {
    File(Expression),
    Url(Expression),
    Stdout,
    Stderr,
}

/// `with { ... }` modifiers on an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WithOptions {
    /// Stream stdout chunks as SDK events while the command runs.
    pub stream: bool,
    /// `guards: false` skips user-defined guards (never privileged ones).
    pub skip_guards: bool,
    /// Capture non-zero exits as data instead of failing.
    pub raw_exit: bool,
}

/// One name imported from a module, optionally rebound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBinding {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportBinding {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A directive with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Directive {
    Var {
        name: String,
        labels: Vec<String>,
        expr: Expression,
        location: SourceLocation,
    },
    Let {
        name: String,
        labels: Vec<String>,
        expr: Expression,
        location: SourceLocation,
    },
    Exe {
        name: String,
        params: Vec<String>,
        body: ExeBody,
        location: SourceLocation,
    },
    Path {
        name: String,
        target: Expression,
        location: SourceLocation,
    },
    Show {
        expr: Expression,
        options: WithOptions,
        location: SourceLocation,
    },
    Run {
        expr: Expression,
        options: WithOptions,
        location: SourceLocation,
    },
    Output {
        expr: Expression,
        target: OutputTarget,
        append: bool,
        location: SourceLocation,
    },
    Import {
        names: Vec<ImportBinding>,
        source: String,
        location: SourceLocation,
    },
    Export {
        names: Vec<String>,
        location: SourceLocation,
    },
    If {
        cond: Expression,
        body: Vec<Node>,
        location: SourceLocation,
    },
    When {
        expr: WhenExpression,
        location: SourceLocation,
    },
    For {
        binding: String,
        source: Expression,
        body: Vec<Node>,
        options: ForOptions,
        location: SourceLocation,
    },
    Guard {
        name: String,
        phase: GuardPhase,
        target: GuardTarget,
        body: WhenExpression,
        location: SourceLocation,
    },
    Policy {
        name: String,
        config: Expression,
        location: SourceLocation,
    },
    /// `loop(N, delay) until @cond [body]`.
    Loop {
        iterations: Expression,
        delay: Expression,
        until: Expression,
        body: Vec<Node>,
        location: SourceLocation,
    },
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::Var { .. } => DirectiveKind::Var,
            Directive::Let { .. } => DirectiveKind::Let,
            Directive::Exe { .. } => DirectiveKind::Exe,
            Directive::Path { .. } => DirectiveKind::Path,
            Directive::Show { .. } => DirectiveKind::Show,
            Directive::Run { .. } => DirectiveKind::Run,
            Directive::Output { .. } => DirectiveKind::Output,
            Directive::Import { .. } => DirectiveKind::Import,
            Directive::Export { .. } => DirectiveKind::Export,
            Directive::If { .. } => DirectiveKind::If,
            Directive::When { .. } => DirectiveKind::When,
            Directive::For { .. } => DirectiveKind::For,
            Directive::Guard { .. } => DirectiveKind::Guard,
            Directive::Policy { .. } => DirectiveKind::Policy,
            Directive::Loop { .. } => DirectiveKind::Loop,
        }
    }

    pub fn location(&self) -> &SourceLocation {
        match self {
            Directive::Var { location, .. }
            | Directive::Let { location, .. }
            | Directive::Exe { location, .. }
            | Directive::Path { location, .. }
            | Directive::Show { location, .. }
            | Directive::Run { location, .. }
            | Directive::Output { location, .. }
            | Directive::Import { location, .. }
            | Directive::Export { location, .. }
            | Directive::If { location, .. }
            | Directive::When { location, .. }
            | Directive::For { location, .. }
            | Directive::Guard { location, .. }
            | Directive::Policy { location, .. }
            | Directive::Loop { location, .. } => location,
        }
    }

    /// `/var @name = expr` with no explicit labels.
    pub fn var(name: impl Into<String>, expr: Expression) -> Self {
        Directive::Var {
            name: name.into(),
            labels: Vec::new(),
            expr,
            location: SourceLocation::default(),
        }
    }

    /// `/let @name = expr`.
    pub fn let_(name: impl Into<String>, expr: Expression) -> Self {
        Directive::Let {
            name: name.into(),
            labels: Vec::new(),
            expr,
            location: SourceLocation::default(),
        }
    }

    /// `/exe @name(params) = body`.
    pub fn exe(name: impl Into<String>, params: Vec<&str>, body: ExeBody) -> Self {
        Directive::Exe {
            name: name.into(),
            params: params.into_iter().map(str::to_string).collect(),
            body,
            location: SourceLocation::default(),
        }
    }

    /// `/show expr`.
    pub fn show(expr: Expression) -> Self {
        Directive::Show {
            expr,
            options: WithOptions::default(),
            location: SourceLocation::default(),
        }
    }

    /// `/run expr`.
    pub fn run(expr: Expression) -> Self {
        Directive::Run {
            expr,
            options: WithOptions::default(),
            location: SourceLocation::default(),
        }
    }
}
