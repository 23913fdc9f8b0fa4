//! Scope and binding semantics at the document level.

mod common;

use common::*;
use mlld::ast::{Directive, Expression, Node};
use mlld::error::MlldError;

#[tokio::test]
async fn duplicate_var_is_an_error() {
    let world = world();
    let error = world
        .run_err(vec![
            var_node("x", Expression::literal(1)),
            var_node("x", Expression::literal(2)),
        ])
        .await;
    assert!(matches!(error, MlldError::DuplicateVariable { .. }));
}

#[tokio::test]
async fn reserved_names_are_rejected_at_bind_time() {
    for name in ["now", "ctx", "mx", "base", "json", "input"] {
        let world = world();
        let error = world
            .run_err(vec![var_node(name, Expression::literal("x"))])
            .await;
        assert!(
            matches!(error, MlldError::ReservedName { .. }),
            "@{name} should be reserved"
        );
    }
}

#[tokio::test]
async fn let_rebinds_inside_a_block() {
    let world = world();
    let outcome = world
        .run(vec![
            Node::Directive(Directive::let_("x", Expression::literal("outer"))),
            Node::Directive(Directive::If {
                cond: Expression::literal(true),
                body: vec![
                    Node::Directive(Directive::let_("x", Expression::literal("inner"))),
                    show_node(Expression::var_ref("x")),
                ],
                location: Default::default(),
            }),
            show_node(Expression::var_ref("x")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "inner\nouter");
}

#[tokio::test]
async fn var_inside_a_conditional_block_is_rejected_in_strict_mode() {
    let world = world();
    let error = world
        .run_err(vec![Node::Directive(Directive::If {
            cond: Expression::literal(true),
            body: vec![var_node("x", Expression::literal(1))],
            location: Default::default(),
        })])
        .await;
    assert!(matches!(error, MlldError::Parse { .. }));
    assert_eq!(error.exit_code(), 2);
}

#[tokio::test]
async fn var_inside_a_conditional_block_hoists_in_loose_mode() {
    let world = build_world(
        mlld::runtime::MockSpawner::with_handler(|_| mlld::runtime::MockResponse::ok("")),
        mlld::config::EngineOptions {
            strict: false,
            ..mlld::config::EngineOptions::default()
        },
        mlld::config::MlldConfig::default(),
    );
    let outcome = world
        .run(vec![
            Node::Directive(Directive::If {
                cond: Expression::literal(true),
                body: vec![var_node("x", Expression::literal("hoisted"))],
                location: Default::default(),
            }),
            show_node(Expression::var_ref("x")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "hoisted");
}

#[tokio::test]
async fn undefined_variables_fail_lookup() {
    let world = world();
    let error = world
        .run_err(vec![show_node(Expression::var_ref("ghost"))])
        .await;
    match error {
        MlldError::VariableNotFound { name, .. } => assert_eq!(name, "ghost"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn field_access_walks_structured_data() {
    let world = world();
    let outcome = world
        .run(vec![
            var_node(
                "user",
                Expression::literal(serde_json::json!({"name": "ada", "roles": ["admin"]})),
            ),
            show_node(field_ref("user", &["name"])),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "ada");
}

#[tokio::test]
async fn at_escaping_renders_a_literal_at() {
    let world = world();
    let outcome = world
        .run(vec![
            var_node(
                "contact",
                Expression::Template(template(vec![seg_text("ops@@example.com")])),
            ),
            show_node(Expression::var_ref("contact")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "ops@example.com");
}

#[tokio::test]
async fn base_resolves_to_the_project_root() {
    let world = world();
    let outcome = world.run(vec![show_node(Expression::var_ref("base"))]).await;
    assert_eq!(doc_text(&outcome), "/project");
}

#[tokio::test]
async fn exports_are_recorded_on_the_module_scope() {
    let world = world();
    let outcome = world
        .run(vec![
            var_node("a", Expression::literal(1)),
            var_node("b", Expression::literal(2)),
            Node::Directive(Directive::Export {
                names: vec!["a".to_string(), "b".to_string()],
                location: Default::default(),
            }),
        ])
        .await;
    assert_eq!(outcome.exports, vec!["a", "b"]);
}
