//! Engine-wide error types.
//!
//! All fatal evaluation outcomes funnel into [`MlldError`]. Subsystems with
//! richer internal error surfaces (parser, executor, pipeline) define their
//! own types and convert into `MlldError` at the evaluation boundary.
//!
//! Two outcomes are deliberately *not* errors in the usual sense:
//! - guard `retry` decisions are consumed by the pipeline driver and never
//!   escape it; outside a pipeline stage they become
//!   [`MlldError::GuardDecision`] with [`GuardOutcome::Retry`]
//! - errors raised inside a `for` body are captured as data on the result
//!   array and iteration continues

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::SourceLocation;

/// Convenience alias used across the evaluator.
pub type Result<T> = std::result::Result<T, MlldError>;

/// Validation failure codes for filesystem and URL targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathValidationCode {
    Empty,
    NullByte,
    ExpectedFs,
    ExpectedUrl,
    OutsideRoot,
    FileNotFound,
    NotAFile,
    NotADirectory,
}

impl std::fmt::Display for PathValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            PathValidationCode::Empty => "EMPTY",
            PathValidationCode::NullByte => "NULL_BYTE",
            PathValidationCode::ExpectedFs => "EXPECTED_FS",
            PathValidationCode::ExpectedUrl => "EXPECTED_URL",
            PathValidationCode::OutsideRoot => "OUTSIDE_ROOT",
            PathValidationCode::FileNotFound => "FILE_NOT_FOUND",
            PathValidationCode::NotAFile => "NOT_A_FILE",
            PathValidationCode::NotADirectory => "NOT_A_DIRECTORY",
        };
        write!(f, "{code}")
    }
}

/// Decision carried by a [`MlldError::GuardDecision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Deny,
    Retry,
}

impl std::fmt::Display for GuardOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardOutcome::Deny => write!(f, "deny"),
            GuardOutcome::Retry => write!(f, "retry"),
        }
    }
}

/// Fatal evaluation errors.
///
/// Every variant carries enough context for the diagnostics renderer to show
/// a source location, a snippet, and (for shell failures) the stderr tail.
#[derive(Debug, Error, Diagnostic)]
pub enum MlldError {
    /// Surfaced from the parser; always fatal.
    #[error("parse error: {message}")]
    #[diagnostic(code(mlld::parse))]
    Parse {
        message: String,
        location: Option<SourceLocation>,
    },

    /// Name resolution failed in the current scope chain.
    #[error("variable not found: @{name}")]
    #[diagnostic(
        code(mlld::env::variable_not_found),
        help("Check spelling, or that the defining directive runs before this use.")
    )]
    VariableNotFound {
        name: String,
        location: Option<SourceLocation>,
    },

    /// A `/var` binding was re-declared in the same module scope.
    #[error("duplicate variable: @{name} is already defined")]
    #[diagnostic(
        code(mlld::env::duplicate_variable),
        help("`/var` bindings are immutable; use `/let` for block-scoped rebinding.")
    )]
    DuplicateVariable {
        name: String,
        location: Option<SourceLocation>,
    },

    /// Attempt to bind a built-in identifier.
    #[error("reserved name: @{name} is built in and cannot be redefined")]
    #[diagnostic(code(mlld::env::reserved_name))]
    ReservedName {
        name: String,
        location: Option<SourceLocation>,
    },

    /// An operation received a value of the wrong shape.
    #[error("type mismatch: expected {expected}, found {found}")]
    #[diagnostic(code(mlld::eval::type_mismatch))]
    TypeMismatch {
        expected: String,
        found: String,
        location: Option<SourceLocation>,
    },

    /// A filesystem or URL target failed validation.
    #[error("invalid path `{path}`: {code}")]
    #[diagnostic(code(mlld::path::validation))]
    PathValidation { code: PathValidationCode, path: String },

    /// A shell or code body exited non-zero.
    #[error("command failed with exit code {exit}")]
    #[diagnostic(
        code(mlld::exec::failed),
        help("The last 4KiB of stderr are attached to this error.")
    )]
    Execution {
        exit: i32,
        stderr_tail: String,
        command: String,
    },

    /// A policy frame denied the operation before it ran.
    #[error("policy denied {op}: rule `{rule}`")]
    #[diagnostic(code(mlld::policy::denied))]
    PolicyDenied { rule: String, op: String },

    /// A guard hook settled on a non-allow decision.
    #[error("guard {decision}: {message}")]
    #[diagnostic(code(mlld::guard::decision))]
    GuardDecision {
        decision: GuardOutcome,
        message: String,
        retry_from: Option<usize>,
    },

    /// The pipeline driver gave up.
    #[error("pipeline aborted: {reason}")]
    #[diagnostic(code(mlld::pipeline::aborted))]
    PipelineAborted { reason: String },

    /// Module or URL resolution failed.
    #[error("failed to resolve `{reference}`: {message}")]
    #[diagnostic(code(mlld::resolver))]
    Resolver { reference: String, message: String },

    /// Configuration file is missing, unreadable, or malformed.
    #[error("configuration error: {0}")]
    #[diagnostic(code(mlld::config))]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(mlld::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Underlying I/O failure outside the abstracted interfaces.
    #[error(transparent)]
    #[diagnostic(code(mlld::io))]
    Io(#[from] std::io::Error),
}

impl MlldError {
    /// Process exit code for the CLI surface.
    ///
    /// 0 success, 1 runtime error, 2 parse error, 3 policy denial,
    /// 4 guard deny.
    pub fn exit_code(&self) -> i32 {
        match self {
            MlldError::Parse { .. } => 2,
            MlldError::PolicyDenied { .. } => 3,
            MlldError::GuardDecision {
                decision: GuardOutcome::Deny,
                ..
            } => 4,
            _ => 1,
        }
    }

    /// Source location attached to this error, when one is known.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            MlldError::Parse { location, .. }
            | MlldError::VariableNotFound { location, .. }
            | MlldError::DuplicateVariable { location, .. }
            | MlldError::ReservedName { location, .. }
            | MlldError::TypeMismatch { location, .. } => location.as_ref(),
            _ => None,
        }
    }

    /// Truncate captured stderr to the final 4KiB before attaching it.
    pub fn stderr_tail(stderr: &str) -> String {
        const TAIL: usize = 4096;
        if stderr.len() <= TAIL {
            return stderr.to_string();
        }
        let cut = stderr.len() - TAIL;
        // Land on a char boundary so the tail stays valid UTF-8.
        let start = (cut..stderr.len())
            .find(|&i| stderr.is_char_boundary(i))
            .unwrap_or(stderr.len());
        stderr[start..].to_string()
    }
}
