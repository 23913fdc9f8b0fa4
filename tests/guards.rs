//! Guard hook semantics: ordering, decisions, bypass, and label targets.

mod common;

use common::*;
use mlld::ast::{
    Directive, ExeBody, Expression, GuardPhase, GuardTarget, Node, OpClass, WithOptions,
};
use mlld::config::{MlldConfig, SecurityConfig};
use mlld::error::{GuardOutcome, MlldError};

fn guard_node(
    name: &str,
    phase: GuardPhase,
    target: GuardTarget,
    decision: Expression,
) -> Node {
    Node::Directive(Directive::Guard {
        name: name.to_string(),
        phase,
        target,
        body: when_first(vec![(None, decision)]),
        location: Default::default(),
    })
}

fn conditional_guard(
    name: &str,
    target: GuardTarget,
    cond: Expression,
    decision: Expression,
) -> Node {
    Node::Directive(Directive::Guard {
        name: name.to_string(),
        phase: GuardPhase::Before,
        target,
        body: when_first(vec![(Some(cond), decision), (None, Expression::Allow)]),
        location: Default::default(),
    })
}

#[tokio::test]
async fn allowing_guard_is_transparent() {
    let world = world();
    let outcome = world
        .run(vec![
            guard_node(
                "ok",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Show),
                Expression::Allow,
            ),
            show_node(Expression::literal("visible")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "visible");
}

#[tokio::test]
async fn denying_guard_is_fatal_with_exit_code_4() {
    let world = world();
    let error = world
        .run_err(vec![
            guard_node(
                "wall",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Show),
                Expression::Deny {
                    message: Some(Box::new(Expression::literal("not here"))),
                },
            ),
            show_node(Expression::literal("hidden")),
        ])
        .await;
    match &error {
        MlldError::GuardDecision {
            decision: GuardOutcome::Deny,
            message,
            ..
        } => assert_eq!(message, "not here"),
        other => panic!("expected guard deny, got {other:?}"),
    }
    assert_eq!(error.exit_code(), 4);
}

#[tokio::test]
async fn first_non_allow_decision_wins_in_registration_order() {
    let world = world();
    let error = world
        .run_err(vec![
            guard_node(
                "first",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Show),
                Expression::Deny {
                    message: Some(Box::new(Expression::literal("from first"))),
                },
            ),
            guard_node(
                "second",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Show),
                Expression::Deny {
                    message: Some(Box::new(Expression::literal("from second"))),
                },
            ),
            show_node(Expression::literal("x")),
        ])
        .await;
    match error {
        MlldError::GuardDecision { message, .. } => assert_eq!(message, "from first"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn guards_only_fire_for_their_op_class() {
    let world = world();
    // A guard on op:output must not affect /show.
    let outcome = world
        .run(vec![
            guard_node(
                "outputs_only",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Output),
                Expression::Deny { message: None },
            ),
            show_node(Expression::literal("fine")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "fine");
}

#[tokio::test]
async fn label_targeted_guards_follow_the_value() {
    let world = world();
    let error = world
        .run_err(vec![
            Node::Directive(Directive::Var {
                name: "token".to_string(),
                labels: vec!["secret".to_string()],
                expr: Expression::literal("hunter2"),
                location: Default::default(),
            }),
            guard_node(
                "no_secrets",
                GuardPhase::For,
                GuardTarget::Label("secret".to_string()),
                Expression::Deny {
                    message: Some(Box::new(Expression::literal("secret flow blocked"))),
                },
            ),
            show_node(Expression::var_ref("token")),
        ])
        .await;
    assert!(matches!(
        error,
        MlldError::GuardDecision {
            decision: GuardOutcome::Deny,
            ..
        }
    ));

    // Unlabeled values pass the same guard.
    let world2 = common::world();
    let outcome = world2
        .run(vec![
            guard_node(
                "no_secrets",
                GuardPhase::For,
                GuardTarget::Label("secret".to_string()),
                Expression::Deny { message: None },
            ),
            show_node(Expression::literal("public")),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "public");
}

#[tokio::test]
async fn guard_context_exposes_the_operation() {
    let world = world();
    // Deny only operations whose class is op:show; checked via @mx.op.type.
    let error = world
        .run_err(vec![
            conditional_guard(
                "inspector",
                GuardTarget::Op(OpClass::Show),
                Expression::eq(field_ref("mx", &["op", "type"]), Expression::literal("op:show")),
                Expression::Deny {
                    message: Some(Box::new(Expression::literal("saw op:show"))),
                },
            ),
            show_node(Expression::literal("x")),
        ])
        .await;
    match error {
        MlldError::GuardDecision { message, .. } => assert_eq!(message, "saw op:show"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn bypass_skips_user_guards_when_config_allows() {
    let world = world();
    let outcome = world
        .run(vec![
            guard_node(
                "wall",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Show),
                Expression::Deny { message: None },
            ),
            Node::Directive(Directive::Show {
                expr: Expression::literal("slipped through"),
                options: WithOptions {
                    skip_guards: true,
                    ..WithOptions::default()
                },
                location: Default::default(),
            }),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "slipped through");
}

#[tokio::test]
async fn bypass_is_refused_when_config_forbids_it() {
    let config = MlldConfig {
        security: SecurityConfig {
            allow_guard_bypass: false,
            ..SecurityConfig::default()
        },
        ..MlldConfig::default()
    };
    let world = world_with_config(config);
    let error = world
        .run_err(vec![
            guard_node(
                "wall",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Show),
                Expression::Deny { message: None },
            ),
            Node::Directive(Directive::Show {
                expr: Expression::literal("still blocked"),
                options: WithOptions {
                    skip_guards: true,
                    ..WithOptions::default()
                },
                location: Default::default(),
            }),
        ])
        .await;
    assert!(matches!(error, MlldError::GuardDecision { .. }));
}

#[tokio::test]
async fn retry_outside_a_pipeline_is_fatal() {
    let world = world();
    let error = world
        .run_err(vec![
            guard_node(
                "retrier",
                GuardPhase::Before,
                GuardTarget::Op(OpClass::Exe),
                Expression::Retry { hint: None },
            ),
            exe_node(
                "f",
                vec![],
                ExeBody::Template(template(vec![seg_text("x")])),
            ),
            var_node("r", Expression::invoke("f", vec![])),
        ])
        .await;
    assert!(matches!(
        error,
        MlldError::GuardDecision {
            decision: GuardOutcome::Retry,
            ..
        }
    ));
}

#[tokio::test]
async fn guard_retry_inside_a_pipeline_becomes_a_stage_retry() {
    let world = world();
    // The guard rejects the first generation with a hint; the base's second
    // generation consumes it.
    let outcome = world
        .run(vec![
            exe_node(
                "gen",
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
                            seg_text("final:"),
                            seg_field("ctx", &["hint"]),
                        ])),
                    ),
                ])),
            ),
            exe_node(
                "pass",
                vec!["input"],
                ExeBody::Template(template(vec![seg_var("input")])),
            ),
            conditional_guard(
                "quality",
                GuardTarget::Op(OpClass::Exe),
                Expression::eq(Expression::var_ref("input"), Expression::literal("draft")),
                Expression::Retry {
                    hint: Some(Box::new(Expression::literal("more detail"))),
                },
            ),
            show_node(Expression::pipeline(
                Expression::invoke("gen", vec![]),
                vec![mlld::ast::PipelineStage::exe("pass")],
            )),
        ])
        .await;
    assert_eq!(doc_text(&outcome), "final:more detail");
}
