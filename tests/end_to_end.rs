//! The canonical end-to-end scenarios, run against fully mocked runtimes.

mod common;

use common::*;
use mlld::ast::{
    Directive, ExeBody, Expression, Node, PipelineStage, StageTarget,
};
use mlld::error::MlldError;
use mlld::runtime::{MockResponse, SpawnRequest};
use serde_json::json;

/// Pull the `__args` array out of a generated node script.
fn js_args(request: &SpawnRequest) -> serde_json::Value {
    let stdin = request.stdin.clone().unwrap_or_default();
    let tail = stdin
        .split("const __args = ")
        .nth(1)
        .expect("script declares __args");
    let json = tail.split(";\n").next().expect("terminated declaration");
    serde_json::from_str(json).expect("parsable __args")
}

#[tokio::test]
async fn variable_and_template() {
    let world = world();
    let outcome = world
        .run(vec![
            var_node("name", Expression::literal("World")),
            var_node(
                "greeting",
                Expression::Template(template(vec![
                    seg_text("Hello, "),
                    seg_var("name"),
                    seg_text("!"),
                ])),
            ),
            show_node(Expression::var_ref("greeting")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "Hello, World!");
}

#[tokio::test]
async fn run_with_echo() {
    let world = world_with_spawner(|request| {
        assert_eq!(request.command, "sh");
        MockResponse::ok("test\n")
    });
    let outcome = world.run(vec![run_command(r#"echo "test""#)]).await;
    assert_eq!(doc_text(&outcome), "test");
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn pipeline_with_retry_hint() {
    let world = world();

    // @src(): first try yields "draft", afterwards renders the hint.
    let src = exe_node(
        "src",
        vec![],
        ExeBody::When(when_first(vec![
            (
                Some(Expression::eq(
                    field_ref("ctx", &["try"]),
                    Expression::literal(1),
                )),
                Expression::literal("draft"),
            ),
            (
                None,
                Expression::Template(template(vec![
                    seg_text("hint:"),
                    seg_field("ctx", &["hint"]),
                ])),
            ),
        ])),
    );

    // @stage(input): rejects the first draft with a hint, then accepts.
    let stage = exe_node(
        "stage",
        vec!["input"],
        ExeBody::When(when_first(vec![
            (
                Some(Expression::and(
                    Expression::eq(field_ref("ctx", &["try"]), Expression::literal(1)),
                    Expression::eq(Expression::var_ref("input"), Expression::literal("draft")),
                )),
                Expression::Retry {
                    hint: Some(Box::new(Expression::literal("revise"))),
                },
            ),
            (
                None,
                Expression::Template(template(vec![seg_text("ok:"), seg_var("input")])),
            ),
        ])),
    );

    let outcome = world
        .run(vec![
            src,
            stage,
            show_node(Expression::pipeline(
                Expression::invoke("src", vec![]),
                vec![PipelineStage::exe("stage")],
            )),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "ok:hint:revise");
}

#[tokio::test]
async fn parallel_for_ordering() {
    let world = world_with_spawner(|request| {
        let args = js_args(request);
        let input = args[0].as_str().expect("string argument");
        MockResponse::ok(input.to_uppercase())
    });

    let outcome = world
        .run(vec![
            var_node("xs", Expression::literal(json!(["a", "b", "c"]))),
            exe_node(
                "upper",
                vec!["s"],
                ExeBody::Js("return s.toUpperCase();".to_string()),
            ),
            var_node(
                "ys",
                Expression::For(Box::new(mlld::ast::ForExpression {
                    binding: "x".to_string(),
                    source: Box::new(Expression::var_ref("xs")),
                    filter: None,
                    body: Box::new(Expression::invoke("upper", vec![Expression::var_ref("x")])),
                    options: mlld::ast::ForOptions::parallel(
                        Some(Expression::literal(3)),
                        None,
                    ),
                })),
            ),
            show_node(Expression::pipeline(
                Expression::var_ref("ys"),
                vec![PipelineStage {
                    target: StageTarget::Json,
                    args: vec![],
                    batch: false,
                }],
            )),
        ])
        .await;
    assert_eq!(doc_text(&outcome), r#"["A","B","C"]"#);
}

#[tokio::test]
async fn policy_denial_blocks_the_spawn() {
    let world = world();
    let error = world
        .run_err(vec![
            var_node(
                "pc",
                Expression::Object(vec![(
                    "capabilities".to_string(),
                    Expression::Object(vec![(
                        "deny".to_string(),
                        Expression::Array(vec![Expression::literal("cmd:git:push")]),
                    )]),
                )]),
            ),
            Node::Directive(Directive::Policy {
                name: "p".to_string(),
                config: Expression::var_ref("pc"),
                location: Default::default(),
            }),
            exe_node(
                "push",
                vec![],
                ExeBody::Cmd(mlld::ast::TemplateLiteral::text("git push origin main")),
            ),
            var_node("r", Expression::invoke("push", vec![])),
        ])
        .await;

    match &error {
        MlldError::PolicyDenied { rule, .. } => assert_eq!(rule, "cmd:git:push"),
        other => panic!("expected PolicyDenied, got {other:?}"),
    }
    assert_eq!(error.exit_code(), 3);
    assert_eq!(world.spawner.spawn_count(), 0, "command must never spawn");
}

#[tokio::test]
async fn auto_parse_between_stages() {
    let world = world_with_spawner(|request| match request.command.as_str() {
        "sh" => MockResponse::ok("[1,2,3]"),
        "node" => {
            // The upstream stage's JSON must arrive parsed, not as a string.
            let args = js_args(request);
            assert_eq!(args, json!([[1, 2, 3]]));
            let sum: i64 = args[0]
                .as_array()
                .expect("parsed array")
                .iter()
                .map(|v| v.as_i64().unwrap_or(0))
                .sum();
            MockResponse::ok(sum.to_string())
        }
        other => panic!("unexpected command {other}"),
    });

    let outcome = world
        .run(vec![
            exe_node("src", vec![], ExeBody::Sh("printf '[1,2,3]'".to_string())),
            exe_node(
                "sum",
                vec!["arr"],
                ExeBody::Js("return arr.reduce((a,b)=>a+b,0);".to_string()),
            ),
            show_node(Expression::pipeline(
                Expression::invoke("src", vec![]),
                vec![PipelineStage::exe("sum")],
            )),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "6");
}
