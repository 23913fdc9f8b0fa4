//! Execution of `/exe` bodies and `/run` commands.
//!
//! Body kinds split into process-backed (`cmd`, `sh`, `node`, `py`), pure
//! (`template`, `when`, `foreach`), and adapter-backed (`prose`, plus `js`
//! through the [`CodeEngine`] seam). Process-backed bodies go through the
//! shared [`ProcessSpawner`] with policy capability checks, auth injection,
//! streaming, and the SIGTERM-then-SIGKILL cancellation ladder.
//!
//! [`ProcessSpawner`]: crate::runtime::ProcessSpawner

mod engine;
mod executor;
mod prose;
mod quoting;

pub use engine::{CodeEngine, SpawnedNodeEngine};
pub use executor::{KILL_GRACE_MS, execute_body, run_command_line};
pub use prose::{NullProseAdapter, ProseAdapter};
pub use quoting::{check_command_template, contains_shell_operator, shell_quote_positional};
