//! Source-text runs through the line parser, as the CLI drives them.

mod common;

use std::sync::Arc;

use common::*;
use mlld::env::RuntimeHandles;
use mlld::error::MlldError;
use mlld::interpreter::Interpreter;
use mlld::parser::LineParser;
use mlld::runtime::{MockResponse, MockSpawner};

fn source_world<F>(handler: F) -> Interpreter
where
    F: Fn(&mlld::runtime::SpawnRequest) -> MockResponse + Send + Sync + 'static,
{
    let handles = RuntimeHandles::builder()
        .with_parser(Arc::new(LineParser))
        .with_spawner(Arc::new(MockSpawner::with_handler(handler)) as _)
        .with_project_root("/project")
        .with_cwd("/project")
        .with_captured_env(rustc_hash::FxHashMap::default())
        .build();
    handles
        .effects
        .set_stdio(Box::new(std::io::sink()), Box::new(std::io::sink()));
    Interpreter::with_handles(handles)
}

#[tokio::test]
async fn a_source_document_evaluates_end_to_end() {
    let interp = source_world(|_| MockResponse::ok("from the shell\n"));
    let source = "\
# Greeting

/var @name = \"World\"
/var @greeting = `Hello, @name!`
/show @greeting
/run {echo hi}
";
    let outcome = interp.run_source(source).await.expect("source run succeeds");
    assert_eq!(
        outcome.document,
        "# Greeting\n\nHello, World!\nfrom the shell\n"
    );
}

#[tokio::test]
async fn labels_from_source_reach_the_descriptor() {
    let interp = source_world(|_| MockResponse::ok(""));
    let source = "/var secret @token = \"hunter2\"\n/show @token\n";
    let outcome = interp.run_source(source).await.expect("source run succeeds");

    let doc_effect = outcome
        .effects
        .iter()
        .find(|e| e.is_doc())
        .expect("show emitted a doc effect");
    assert!(doc_effect.security.labels.contains("secret"));
}

#[tokio::test]
async fn unsupported_directives_are_parse_errors_with_exit_code_2() {
    let interp = source_world(|_| MockResponse::ok(""));
    let error = interp
        .run_source("/policy @p = union(@pc)\n")
        .await
        .expect_err("unsupported directive fails in strict mode");
    assert!(matches!(error, MlldError::Parse { .. }));
    assert_eq!(error.exit_code(), 2);
}

#[tokio::test]
async fn comments_never_reach_the_document() {
    let interp = source_world(|_| MockResponse::ok(""));
    let outcome = interp
        .run_source(">> internal note\n/show \"visible\"\n")
        .await
        .expect("source run succeeds");
    assert_eq!(doc_text(&outcome), "visible");
}
