//! The in-process JavaScript engine seam.

use std::sync::Arc;

use async_trait::async_trait;

use super::executor::{ScriptTransport, finish_process_body, js_wrapper};
use crate::ast::WithOptions;
use crate::env::Environment;
use crate::error::Result;
use crate::runtime::SpawnRequest;
use crate::value::StructuredValue;

/// Executor for `js { ... }` bodies.
///
/// `js` is specified as an in-process sandbox, distinct from `node` (which
/// always spawns a child). Hosts that embed a JavaScript engine implement
/// this trait and wire it through the runtime handles; the default
/// [`SpawnedNodeEngine`] delegates to a spawned `node` child so `js` bodies
/// keep working without an embedded engine.
#[async_trait]
pub trait CodeEngine: Send + Sync + std::fmt::Debug {
    async fn execute(
        &self,
        env: &Arc<Environment>,
        op_name: &str,
        op_label: &str,
        code: &str,
        param_names: &[String],
        args: &[StructuredValue],
        options: WithOptions,
    ) -> Result<StructuredValue>;
}

/// Default engine: ships the body to a `node` child process with parameters
/// bound as locals, going through the same policy, auth, and capture path
/// as every other process-backed body.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnedNodeEngine;

#[async_trait]
impl CodeEngine for SpawnedNodeEngine {
    async fn execute(
        &self,
        env: &Arc<Environment>,
        op_name: &str,
        op_label: &str,
        code: &str,
        param_names: &[String],
        args: &[StructuredValue],
        options: WithOptions,
    ) -> Result<StructuredValue> {
        let script = js_wrapper(code, param_names, args)?;
        let mut request = SpawnRequest::new("node").with_stdin(script);
        request.cwd = Some(env.base_dir().to_path_buf());
        finish_process_body(
            env,
            request,
            op_name,
            op_label,
            "node",
            args,
            options,
            ScriptTransport::Stdin,
        )
        .await
    }
}
