//! Process-backed and pure body execution.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use uuid::Uuid;

use super::prose::ProseAdapter as _;
use crate::ast::{ExeBody, WithOptions};
use crate::env::Environment;
use crate::error::{MlldError, Result};
use crate::event_bus::RuntimeEvent;
use crate::guard::{collect_auth, command_capability, enforce_capability, enforce_label_flow};
use crate::interp::{InterpolationContext, render_template};
use crate::runtime::{ChildHandle, KillSignal, SpawnRequest};
use crate::value::{SecurityDescriptor, StructuredValue};

/// Milliseconds between SIGTERM and SIGKILL on cancellation.
pub const KILL_GRACE_MS: u64 = 2_000;

/// Conservative bound on argv+environment size before the command falls
/// back to stdin transport. Real ARG_MAX values are larger; staying well
/// under avoids platform variance.
const ARG_BUDGET: usize = 128 * 1024;

struct ProcessOutput {
    stdout: String,
    stderr: String,
    exit: i32,
}

/// Computation-boundary view of an argument for code bodies.
fn datum(value: &StructuredValue) -> Value {
    if value.data.is_null() {
        Value::String(value.text.clone())
    } else {
        value.data.clone()
    }
}

fn merged_security(args: &[StructuredValue]) -> SecurityDescriptor {
    let mut merged = SecurityDescriptor::default();
    for arg in args {
        merged.merge_from(arg.security());
    }
    merged
}

/// Execute one `/exe` body with parameters already bound into `env`.
///
/// `op_label` is the operation class consulted for label flow
/// (`op:run` for `/run`, `op:exe` for invocations).
pub async fn execute_body(
    env: &Arc<Environment>,
    op_name: &str,
    op_label: &str,
    body: &ExeBody,
    param_names: &[String],
    args: &[StructuredValue],
    options: WithOptions,
) -> Result<StructuredValue> {
    match body {
        ExeBody::Cmd(template) => {
            super::quoting::check_command_template(template)?;
            let rendered = render_template(template, env, InterpolationContext::ShellCommand)?;
            let mut value =
                run_command_line(env, &rendered.text, op_name, op_label, options).await?;
            value.merge_security(rendered.security());
            Ok(value)
        }

        ExeBody::Sh(code) => {
            let positional: Vec<String> = args.iter().map(|a| a.text.clone()).collect();
            let mut argv = vec!["-c".to_string(), code.clone(), "sh".to_string()];
            argv.extend(positional.iter().cloned());
            let mut request = SpawnRequest::new("sh").with_args(argv);
            request.cwd = Some(env.base_dir().to_path_buf());
            finish_process_body(
                env,
                request,
                op_name,
                op_label,
                code,
                args,
                options,
                ScriptTransport::ShDashC {
                    script: code.clone(),
                    positional,
                },
            )
            .await
        }

        // `js` is the in-process sandbox seam; the engine wired into the
        // runtime handles decides how the body actually runs.
        ExeBody::Js(code) => {
            let engine = Arc::clone(&env.handles().code_engine);
            engine
                .execute(env, op_name, op_label, code, param_names, args, options)
                .await
        }

        // `node` is always a child process, engine or no engine.
        ExeBody::NodeJs(code) => {
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

        ExeBody::Py(code) => {
            let args_json = serde_json::to_string(&Value::Array(args.iter().map(datum).collect()))?;
            let names_json = serde_json::to_string(param_names)?;
            let script = format!(
                "import json as _json, sys as _sys\n\
                 _args = _json.loads(_sys.argv[1]) if len(_sys.argv) > 1 else []\n\
                 for _name, _value in zip(_json.loads('{names}'), _args):\n\
                 \x20   globals()[_name] = _value\n\
                 {code}\n",
                names = names_json.replace('\\', "\\\\").replace('\'', "\\'"),
                code = code,
            );
            let mut request = SpawnRequest::new("python3")
                .with_args(["-".to_string(), args_json])
                .with_stdin(script);
            request.cwd = Some(env.base_dir().to_path_buf());
            finish_process_body(
                env,
                request,
                op_name,
                op_label,
                "python3",
                args,
                options,
                ScriptTransport::Stdin,
            )
            .await
        }

        ExeBody::Template(template) => {
            let mut value = render_template(template, env, InterpolationContext::Template)?;
            value.merge_security(&merged_security(args));
            Ok(value)
        }

        ExeBody::When(when) => crate::eval::evaluate_when(when, env).await,

        ExeBody::Foreach(for_expr) => {
            let expr = crate::ast::Expression::For(Box::new(for_expr.clone()));
            crate::eval::evaluate_expression(&expr, env).await
        }

        ExeBody::Prose(template) => {
            let prompt = render_template(template, env, InterpolationContext::Template)?;
            let completion = env
                .handles()
                .prose
                .complete(&prompt.text)
                .await
                .map_err(MlldError::Config)?;
            let mut value = StructuredValue::text(completion);
            value.merge_security(prompt.security());
            Ok(value)
        }
    }
}

/// Run a rendered command line through `sh -c`, with capability and label
/// checks, auth injection, streaming, and output capture.
pub async fn run_command_line(
    env: &Arc<Environment>,
    command_line: &str,
    op_name: &str,
    op_label: &str,
    options: WithOptions,
) -> Result<StructuredValue> {
    let mut request =
        SpawnRequest::new("sh").with_args(["-c".to_string(), command_line.to_string()]);
    request.cwd = Some(env.base_dir().to_path_buf());
    finish_process_body(
        env,
        request,
        op_name,
        op_label,
        command_line,
        &[],
        options,
        ScriptTransport::ShDashC {
            script: command_line.to_string(),
            positional: Vec::new(),
        },
    )
    .await
}

/// How a script can travel if argv space runs out.
///
/// The transport decision happens only after the full environment (auth
/// injections plus the startup capture) is merged into the request, so the
/// ARG_MAX budget sees what the shell will actually receive.
pub(crate) enum ScriptTransport {
    /// `sh -c <script> sh <args...>`, demotable to `sh -s <args...>` with
    /// the script on stdin.
    ShDashC {
        script: String,
        positional: Vec<String>,
    },
    /// Already stdin-based; nothing left to move off argv.
    Stdin,
}

/// Serialized size of everything that lands in the exec call: argv plus
/// `KEY=VALUE\0` environment entries.
fn exec_call_size(request: &SpawnRequest) -> usize {
    let argv: usize = request.command.len()
        + request.args.iter().map(|a| a.len() + 1).sum::<usize>();
    let environ: usize = request
        .env
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    argv + environ
}

/// Shared tail of every process-backed body: policy checks, auth, spawn,
/// capture, error mapping, and value construction.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn finish_process_body(
    env: &Arc<Environment>,
    mut request: SpawnRequest,
    op_name: &str,
    op_label: &str,
    capability_source: &str,
    args: &[StructuredValue],
    options: WithOptions,
    transport: ScriptTransport,
) -> Result<StructuredValue> {
    let capability = command_capability(capability_source);
    enforce_capability(env, &capability, op_label)?;

    let mut security = merged_security(args);
    let auth = collect_auth(env).await?;
    for injection in &auth {
        let _ = request
            .env
            .insert(injection.name.clone(), injection.value.clone());
        security.merge_from(&injection.security);
    }
    enforce_label_flow(env, &security, op_label)?;

    // Base environment travels from startup capture, never re-read.
    for (key, value) in &env.handles().captured_env {
        request.env.entry(key.clone()).or_insert_with(|| value.clone());
    }

    // With the environment fully assembled, fall back to stdin transport
    // when argv + environ would not fit the shell's exec budget. The
    // script text moves verbatim; structured data is never re-stringified.
    if exec_call_size(&request) > ARG_BUDGET {
        if let ScriptTransport::ShDashC { script, positional } = transport {
            let mut argv = vec!["-s".to_string()];
            argv.extend(positional);
            request.args = argv;
            request.stdin = Some(script);
        }
    }

    let stream = options.stream && !env.handles().options.no_stream;
    let output = run_process(env, request, &capability, stream).await?;

    if output.exit != 0 && !options.raw_exit {
        return Err(MlldError::Execution {
            exit: output.exit,
            stderr_tail: MlldError::stderr_tail(&output.stderr),
            command: capability_source.to_string(),
        });
    }
    if !output.stderr.is_empty() {
        env.emit_effect(crate::effects::Effect::stderr(output.stderr.clone()));
    }

    let text = output.stdout.trim_end_matches('\n').to_string();
    let mut value = StructuredValue::command_output(text);
    value.merge_security(&security);
    value.metadata.source = Some(format!("cmd:{op_name}"));
    Ok(value)
}

async fn run_process(
    env: &Arc<Environment>,
    request: SpawnRequest,
    capability: &str,
    stream: bool,
) -> Result<ProcessOutput> {
    let handles = env.handles();
    let command_id = Uuid::new_v4().to_string();
    let started = handles.clock.now_millis();
    let _ = handles.emitter.emit(RuntimeEvent::command_start(
        command_id.clone(),
        request.display_line(),
        capability.to_string(),
    ));

    let mut child = handles.spawner.spawn(request).await?;
    let stdout_reader = child.take_stdout();
    let stderr_reader = child.take_stderr();

    let emitter = Arc::clone(&handles.emitter);
    let chunk_command = command_id.clone();
    let drain = async {
        let stdout = drain_reader(stdout_reader, |index, chunk| {
            if stream {
                let _ = emitter.emit(RuntimeEvent::stream_chunk(
                    chunk_command.clone(),
                    chunk.to_string(),
                    index,
                ));
            }
        })
        .await;
        let stderr = drain_reader(stderr_reader, |_, _| {}).await;
        (stdout, stderr)
    };

    let cancel = handles.cancel.clone();
    let (stdout, stderr) = {
        let drain = std::pin::pin!(drain);
        match futures_util::future::select(drain, std::pin::pin!(cancel.cancelled())).await {
            futures_util::future::Either::Left((out, _)) => out,
            futures_util::future::Either::Right((_, drain)) => {
                debug!(command_id, "cancellation requested; terminating child");
                let _ = child.kill(KillSignal::Term);
                handles
                    .clock
                    .sleep(Duration::from_millis(KILL_GRACE_MS))
                    .await;
                let _ = child.kill(KillSignal::Kill);
                drain.await
            }
        }
    };

    let status = wait_child(child.as_mut()).await?;
    let duration = handles.clock.now_millis().saturating_sub(started);
    let _ = handles.emitter.emit(RuntimeEvent::command_complete(
        command_id,
        status.code,
        duration,
    ));

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit: status.code,
    })
}

async fn wait_child(child: &mut dyn ChildHandle) -> Result<crate::runtime::ExitStatus> {
    child.wait().await.map_err(MlldError::Io)
}

/// Read a stream to EOF, invoking `on_chunk` per read with its index.
async fn drain_reader(
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    mut on_chunk: impl FnMut(u64, &str),
) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut bytes = Vec::new();
    let mut buf = [0u8; 8192];
    let mut index = 0u64;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                on_chunk(index, &String::from_utf8_lossy(&buf[..n]));
                index += 1;
                bytes.extend_from_slice(&buf[..n]);
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Wrap a JavaScript body so parameters bind as locals and the return value
/// serializes onto stdout (objects as JSON, scalars via `String`).
pub(crate) fn js_wrapper(
    code: &str,
    param_names: &[String],
    args: &[StructuredValue],
) -> Result<String> {
    let args_json = serde_json::to_string(&Value::Array(args.iter().map(datum).collect()))?;
    let params = param_names.join(", ");
    Ok(format!(
        "const __args = {args_json};\n\
         const __fn = ({params}) => {{\n{code}\n}};\n\
         const __result = __fn(...__args);\n\
         if (__result === undefined || __result === null) {{\n\
         \x20 process.stdout.write('');\n\
         }} else if (typeof __result === 'object') {{\n\
         \x20 process.stdout.write(JSON.stringify(__result));\n\
         }} else {{\n\
         \x20 process.stdout.write(String(__result));\n\
         }}\n"
    ))
}
