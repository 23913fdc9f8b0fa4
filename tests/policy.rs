//! Policy stack semantics: capabilities, label flows, and auth bindings.

mod common;

use common::*;
use mlld::ast::{Directive, ExeBody, Expression, Node, TemplateLiteral};
use mlld::error::MlldError;
use mlld::runtime::MockResponse;
use serde_json::json;

fn policy_node(name: &str, config: serde_json::Value) -> Node {
    Node::Directive(Directive::Policy {
        name: name.to_string(),
        config: Expression::literal(config),
        location: Default::default(),
    })
}

fn labeled_var(name: &str, label: &str, value: &str) -> Node {
    Node::Directive(Directive::Var {
        name: name.to_string(),
        labels: vec![label.to_string()],
        expr: Expression::literal(value),
        location: Default::default(),
    })
}

#[tokio::test]
async fn capability_deny_blocks_before_spawn() {
    let world = world();
    let error = world
        .run_err(vec![
            policy_node("p", json!({"capabilities": {"deny": ["cmd:rm:*"]}})),
            run_command("rm -rf /tmp/scratch"),
        ])
        .await;
    match error {
        MlldError::PolicyDenied { rule, .. } => assert_eq!(rule, "cmd:rm:*"),
        other => panic!("expected PolicyDenied, got {other:?}"),
    }
    assert_eq!(world.spawner.spawn_count(), 0);
}

#[tokio::test]
async fn capability_allow_list_is_a_whitelist() {
    let world = world_with_spawner(|_| MockResponse::ok("ok\n"));
    let error = world
        .run_err(vec![
            policy_node("p", json!({"capabilities": {"allow": ["cmd:echo*"]}})),
            run_command("echo hello"),
            run_command("curl http://example.com"),
        ])
        .await;
    assert!(matches!(error, MlldError::PolicyDenied { .. }));
    // Only the whitelisted echo ran.
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn label_flow_deny_blocks_show() {
    let world = world();
    let error = world
        .run_err(vec![
            labeled_var("token", "secret", "hunter2"),
            policy_node("p", json!({"labels": {"secret": {"deny": ["op:show"]}}})),
            show_node(Expression::var_ref("token")),
        ])
        .await;
    match error {
        MlldError::PolicyDenied { rule, op } => {
            assert!(rule.contains("labels.secret.deny"));
            assert_eq!(op, "op:show");
        }
        other => panic!("expected PolicyDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn label_flow_survives_template_composition() {
    let world = world();
    // The secret flows through a template; the label must follow it.
    let error = world
        .run_err(vec![
            labeled_var("token", "secret", "hunter2"),
            policy_node("p", json!({"labels": {"secret": {"deny": ["op:show"]}}})),
            var_node(
                "message",
                Expression::Template(template(vec![
                    seg_text("token is "),
                    seg_var("token"),
                ])),
            ),
            show_node(Expression::var_ref("message")),
        ])
        .await;
    assert!(matches!(error, MlldError::PolicyDenied { .. }));
}

#[tokio::test]
async fn unrelated_labels_are_not_blocked() {
    let world = world();
    let outcome = world
        .run(vec![
            labeled_var("notes", "pii", "call maria"),
            policy_node("p", json!({"labels": {"secret": {"deny": ["op:show"]}}})),
            show_node(Expression::var_ref("notes")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "call maria");
}

#[tokio::test]
async fn auth_bindings_inject_from_captured_env() {
    let world = world_with_env(
        |request| {
            assert_eq!(
                request.env.get("API_KEY").map(String::as_str),
                Some("tok-123"),
                "auth binding must inject the resolved secret"
            );
            MockResponse::ok("done\n")
        },
        &[("UPSTREAM_TOKEN", "tok-123")],
    );

    let outcome = world
        .run(vec![
            policy_node(
                "p",
                json!({"auth": {"api": {"from": "env:UPSTREAM_TOKEN", "as": "API_KEY"}}}),
            ),
            run_command("deploy now"),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "done");
}

#[tokio::test]
async fn keychain_auth_requires_the_danger_opt_in() {
    let world = world();
    let error = world
        .run_err(vec![
            policy_node(
                "p",
                json!({"auth": {"gh": {"from": "keychain:github/token", "as": "GH_TOKEN"}}}),
            ),
            run_command("gh api user"),
        ])
        .await;
    match error {
        MlldError::PolicyDenied { rule, .. } => assert_eq!(rule, "danger:@keychain"),
        other => panic!("expected PolicyDenied, got {other:?}"),
    }
}

#[tokio::test]
async fn inner_policy_frames_stack_on_outer_ones() {
    let world = world_with_spawner(|_| MockResponse::ok("ok\n"));
    let error = world
        .run_err(vec![
            policy_node("outer", json!({"capabilities": {"deny": ["cmd:curl:*"]}})),
            policy_node("inner", json!({"capabilities": {"deny": ["cmd:rm:*"]}})),
            run_command("echo fine"),
            run_command("curl http://example.com"),
        ])
        .await;
    // The outer frame still applies underneath the inner one.
    assert!(matches!(error, MlldError::PolicyDenied { .. }));
    assert_eq!(world.spawner.spawn_count(), 1);
}

#[tokio::test]
async fn exe_cmd_bodies_are_policy_checked() {
    let world = world();
    let error = world
        .run_err(vec![
            policy_node("p", json!({"capabilities": {"deny": ["cmd:git:push"]}})),
            exe_node(
                "push",
                vec![],
                ExeBody::Cmd(TemplateLiteral::text("git push origin main")),
            ),
            var_node("r", Expression::invoke("push", vec![])),
        ])
        .await;
    assert_eq!(error.exit_code(), 3);
    assert_eq!(world.spawner.spawn_count(), 0);
}
