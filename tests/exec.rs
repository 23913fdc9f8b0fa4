//! Executor behavior: captures, failures, streaming, and transports.

mod common;

use common::*;
use mlld::ast::{Directive, ExeBody, Expression, Node, TemplateLiteral, WithOptions};
use mlld::error::MlldError;
use mlld::runtime::MockResponse;

#[tokio::test]
async fn cmd_bodies_reject_shell_operators() {
    let world = world();
    let error = world
        .run_err(vec![
            exe_node(
                "bad",
                vec![],
                ExeBody::Cmd(TemplateLiteral::text("cat notes.md | wc -l")),
            ),
            var_node("r", Expression::invoke("bad", vec![])),
        ])
        .await;
    assert!(matches!(error, MlldError::TypeMismatch { .. }));
    assert_eq!(world.spawner.spawn_count(), 0);
}

#[tokio::test]
async fn interpolated_values_are_escaped_in_cmd_bodies() {
    let world = world_with_spawner(|request| {
        // The injected value must arrive escaped, not as live shell syntax.
        let line = request.args.get(1).cloned().unwrap_or_default();
        assert!(line.contains(r#"\$(whoami)"#), "got command line: {line}");
        MockResponse::ok("safe\n")
    });
    let outcome = world
        .run(vec![
            var_node("sneaky", Expression::literal("$(whoami)")),
            exe_node(
                "greet",
                vec![],
                ExeBody::Cmd(template(vec![
                    seg_text("echo \""),
                    seg_var("sneaky"),
                    seg_text("\""),
                ])),
            ),
            var_node("r", Expression::invoke("greet", vec![])),
        ])
        .await;
    drop(outcome);
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn nonzero_exit_surfaces_with_stderr_tail() {
    let world = world_with_spawner(|_| MockResponse::failing(3, "fatal: broken pipe\n"));
    let error = world.run_err(vec![run_command("git fetch")]).await;
    match error {
        MlldError::Execution {
            exit, stderr_tail, ..
        } => {
            assert_eq!(exit, 3);
            assert!(stderr_tail.contains("broken pipe"));
        }
        other => panic!("expected Execution, got {other:?}"),
    }
}

#[tokio::test]
async fn sh_bodies_pass_arguments_positionally() {
    let world = world_with_spawner(|request| {
        assert_eq!(request.command, "sh");
        // sh -c <script> sh <p1> <p2>
        assert_eq!(request.args[0], "-c");
        assert_eq!(request.args[2], "sh");
        assert_eq!(request.args[3], "alpha");
        assert_eq!(request.args[4], "beta");
        MockResponse::ok("ok\n")
    });
    let outcome = world
        .run(vec![
            exe_node("both", vec!["a", "b"], ExeBody::Sh("echo $1 $2".to_string())),
            var_node(
                "r",
                Expression::invoke(
                    "both",
                    vec![Expression::literal("alpha"), Expression::literal("beta")],
                ),
            ),
            show_node(Expression::var_ref("r")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "ok");
}

#[tokio::test]
async fn oversized_commands_fall_back_to_stdin_transport() {
    let world = world_with_spawner(|request| {
        assert!(
            request.stdin.is_some(),
            "a command this large must travel over stdin"
        );
        MockResponse::ok("ok\n")
    });
    let huge = format!("echo {}", "x".repeat(200 * 1024));
    let _ = world.run(vec![run_command(&huge)]).await;
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn oversized_environments_also_force_stdin_transport() {
    // The command line itself is tiny; the captured environment is what
    // blows the exec budget.
    let world = world_with_env(
        |request| {
            assert!(
                request.stdin.is_some(),
                "a large environment must push the script onto stdin"
            );
            assert_eq!(request.args.first().map(String::as_str), Some("-s"));
            MockResponse::ok("ok\n")
        },
        &[("MLLD_HUGE", &"x".repeat(200 * 1024))],
    );
    let _ = world.run(vec![run_command("echo small")]).await;
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn js_bodies_run_through_the_code_engine_seam() {
    use async_trait::async_trait;
    use mlld::env::Environment;
    use mlld::exec::CodeEngine;
    use mlld::value::StructuredValue;
    use std::sync::Arc;

    // An "embedded" engine: evaluates in-process, never spawning.
    #[derive(Debug)]
    struct ShoutEngine;

    #[async_trait]
    impl CodeEngine for ShoutEngine {
        async fn execute(
            &self,
            _env: &Arc<Environment>,
            _op_name: &str,
            _op_label: &str,
            _code: &str,
            _params: &[String],
            args: &[StructuredValue],
            _options: WithOptions,
        ) -> mlld::error::Result<StructuredValue> {
            let input = args.first().map(|a| a.text.clone()).unwrap_or_default();
            Ok(StructuredValue::text(input.to_uppercase()))
        }
    }

    let spawner = Arc::new(mlld::runtime::MockSpawner::with_handler(|_| {
        panic!("js bodies must not spawn when an engine is wired")
    }));
    let handles = mlld::env::RuntimeHandles::builder()
        .with_spawner(Arc::clone(&spawner) as _)
        .with_code_engine(Arc::new(ShoutEngine))
        .with_project_root("/project")
        .with_cwd("/project")
        .with_captured_env(rustc_hash::FxHashMap::default())
        .build();
    handles
        .effects
        .set_stdio(Box::new(std::io::sink()), Box::new(std::io::sink()));
    let interp = mlld::interpreter::Interpreter::with_handles(handles);

    let outcome = interp
        .run(mlld::ast::Document::new(vec![
            exe_node("loud", vec!["s"], ExeBody::Js("return s;".to_string())),
            show_node(Expression::invoke(
                "loud",
                vec![Expression::literal("quiet")],
            )),
        ]))
        .await
        .expect("engine-backed run succeeds");

    assert_eq!(outcome.document.trim_end(), "QUIET");
    assert_eq!(spawner.spawn_count(), 0);
}

#[tokio::test]
async fn node_bodies_always_spawn_a_child() {
    // Even with the default engine in place, `node` bodies are pinned to a
    // child process.
    let world = world_with_spawner(|request| {
        assert_eq!(request.command, "node");
        MockResponse::ok("ran\n")
    });
    let outcome = world
        .run(vec![
            exe_node("child", vec![], ExeBody::NodeJs("return 'ran';".to_string())),
            show_node(Expression::invoke("child", vec![])),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "ran");
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn streaming_emits_chunk_events_and_returns_the_aggregate() {
    let world = world_with_spawner(|_| MockResponse::ok("chunked output\n"));
    let outcome = world
        .run(vec![Node::Directive(Directive::Run {
            expr: Expression::Command(TemplateLiteral::text("generate report")),
            options: WithOptions {
                stream: true,
                ..WithOptions::default()
            },
            location: Default::default(),
        })])
        .await;
    assert_eq!(doc_text(&outcome), "chunked output");

    world.settle().await;
    let events = world.sink.snapshot();
    assert_monotonic(&events);
    let chunks = chunk_contents(&events);
    assert!(!chunks.is_empty(), "expected stream:chunk events");
    assert_eq!(chunks.join(""), "chunked output\n");
}

#[tokio::test]
async fn command_lifecycle_events_bracket_the_spawn() {
    let world = world_with_spawner(|_| MockResponse::ok("hi\n"));
    let _ = world.run(vec![run_command("echo hi")]).await;
    world.settle().await;

    let events = world.sink.snapshot();
    let starts = events_with_label(&events, "command:start");
    let completes = events_with_label(&events, "command:complete");
    assert_eq!(starts.len(), 1);
    assert_eq!(completes.len(), 1);
    assert!(starts[0].seq < completes[0].seq);
}

#[tokio::test]
async fn trailing_log_duplicates_without_consuming() {
    let world = world();
    let outcome = world
        .run(vec![
            exe_node(
                "value",
                vec![],
                ExeBody::Template(template(vec![seg_text("payload")])),
            ),
            show_node(Expression::Invoke(mlld::ast::ExecInvocation {
                target: "value".to_string(),
                args: vec![],
                tail: Some(mlld::ast::TailModifier::Log),
                options: WithOptions::default(),
            })),
        ])
        .await;
    // The document still gets the value...
    assert_eq!(doc_text(&outcome), "payload");
    // ...and stderr got a copy.
    let stderr: Vec<_> = outcome
        .effects
        .iter()
        .filter(|e| e.effect_type == mlld::effects::EffectType::Stderr)
        .collect();
    assert_eq!(stderr.len(), 1);
    assert_eq!(stderr[0].content, "payload\n");
}

#[tokio::test]
async fn command_output_taint_reaches_assigned_variables() {
    let world = world_with_spawner(|_| MockResponse::ok("data\n"));
    let outcome = world
        .run(vec![
            exe_node("fetch", vec![], ExeBody::Cmd(TemplateLiteral::text("cat data.txt"))),
            var_node("r", Expression::invoke("fetch", vec![])),
            show_node(Expression::var_ref("r")),
        ])
        .await;
    let doc_effect = outcome
        .effects
        .iter()
        .find(|e| e.is_doc())
        .expect("show emitted a doc effect");
    assert!(
        doc_effect
            .security
            .taint
            .contains(&mlld::value::TaintLevel::CommandOutput)
    );
}
