//! Shared fixtures: a fully mocked interpreter world plus AST builders.

use std::sync::Arc;

use mlld::ast::{
    Directive, Document, ExeBody, Expression, FieldAccess, Node, TemplateLiteral, TemplateSegment,
    VariableReference, WhenBranch, WhenCondition, WhenExpression,
};
use mlld::config::{EngineOptions, MlldConfig};
use mlld::effects::EffectOptions;
use mlld::env::RuntimeHandles;
use mlld::event_bus::{EventBus, MemorySink};
use mlld::interpreter::{Interpreter, RunOutcome};
use mlld::runtime::{MemoryFileSystem, MockResponse, MockSpawner, SpawnRequest, TestClock};
use rustc_hash::FxHashMap;

/// A mocked interpreter plus handles onto its doubles.
pub struct TestWorld {
    pub interp: Interpreter,
    pub spawner: Arc<MockSpawner>,
    pub fs: Arc<MemoryFileSystem>,
    pub clock: Arc<TestClock>,
    pub sink: MemorySink,
    bus: EventBus,
}

impl TestWorld {
    pub async fn run(&self, nodes: Vec<Node>) -> RunOutcome {
        self.interp
            .run(Document::new(nodes))
            .await
            .expect("document evaluation succeeds")
    }

    pub async fn run_err(&self, nodes: Vec<Node>) -> mlld::error::MlldError {
        self.interp
            .run(Document::new(nodes))
            .await
            .expect_err("document evaluation fails")
    }

    /// Let sink workers drain, then stop them.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.bus.stop_listener().await;
    }
}

/// World whose spawner answers every request through `handler`.
pub fn world_with_spawner<F>(handler: F) -> TestWorld
where
    F: Fn(&SpawnRequest) -> MockResponse + Send + Sync + 'static,
{
    build_world(MockSpawner::with_handler(handler), EngineOptions::default(), MlldConfig::default())
}

/// World with an inert spawner (every command succeeds with empty output).
pub fn world() -> TestWorld {
    world_with_spawner(|_| MockResponse::ok(""))
}

pub fn world_with_config(config: MlldConfig) -> TestWorld {
    build_world(
        MockSpawner::with_handler(|_| MockResponse::ok("")),
        EngineOptions::default(),
        config,
    )
}

/// World with specific `captured_env` entries alongside a spawner handler.
pub fn world_with_env<F>(handler: F, env: &[(&str, &str)]) -> TestWorld
where
    F: Fn(&SpawnRequest) -> MockResponse + Send + Sync + 'static,
{
    let mut world = build_world(
        MockSpawner::with_handler(handler),
        EngineOptions::default(),
        MlldConfig::default(),
    );
    let captured: FxHashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let handles = RuntimeHandles::builder()
        .with_fs(Arc::clone(&world.fs) as _)
        .with_spawner(Arc::clone(&world.spawner) as _)
        .with_clock(Arc::clone(&world.clock) as _)
        .with_project_root("/project")
        .with_cwd("/project")
        .with_captured_env(captured)
        .build();
    handles
        .effects
        .set_stdio(Box::new(std::io::sink()), Box::new(std::io::sink()));
    world.interp = Interpreter::with_handles(handles);
    world
}

pub fn build_world(
    spawner: MockSpawner,
    options: EngineOptions,
    config: MlldConfig,
) -> TestWorld {
    let spawner = Arc::new(spawner);
    let fs = Arc::new(MemoryFileSystem::new());
    let clock = TestClock::new();
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    bus.listen_for_events();

    let handles = RuntimeHandles::builder()
        .with_fs(Arc::clone(&fs) as _)
        .with_spawner(Arc::clone(&spawner) as _)
        .with_clock(Arc::clone(&clock) as _)
        .with_emitter(bus.get_emitter())
        .with_project_root("/project")
        .with_cwd("/project")
        .with_captured_env(FxHashMap::default())
        .with_options(options)
        .with_config(config)
        .with_effect_options(EffectOptions::default())
        .build();
    // Keep live stdio quiet; assertions read the effect log instead.
    handles
        .effects
        .set_stdio(Box::new(std::io::sink()), Box::new(std::io::sink()));

    TestWorld {
        interp: Interpreter::with_handles(handles),
        spawner,
        fs,
        clock,
        sink,
        bus,
    }
}

// ---------------------------------------------------------------------
// AST builders
// ---------------------------------------------------------------------

pub fn seg_text(text: &str) -> TemplateSegment {
    TemplateSegment::Text(text.to_string())
}

pub fn seg_var(name: &str) -> TemplateSegment {
    TemplateSegment::Interpolation(VariableReference::new(name))
}

pub fn seg_field(name: &str, fields: &[&str]) -> TemplateSegment {
    TemplateSegment::Interpolation(
        VariableReference::new(name).with_fields(
            fields
                .iter()
                .map(|f| FieldAccess::Field(f.to_string()))
                .collect(),
        ),
    )
}

pub fn template(segments: Vec<TemplateSegment>) -> TemplateLiteral {
    TemplateLiteral::new(segments)
}

pub fn var_node(name: &str, expr: Expression) -> Node {
    Node::Directive(Directive::var(name, expr))
}

pub fn show_node(expr: Expression) -> Node {
    Node::Directive(Directive::show(expr))
}

pub fn run_node(expr: Expression) -> Node {
    Node::Directive(Directive::run(expr))
}

pub fn exe_node(name: &str, params: Vec<&str>, body: ExeBody) -> Node {
    Node::Directive(Directive::exe(name, params, body))
}

pub fn field_ref(name: &str, fields: &[&str]) -> Expression {
    Expression::var_field(
        name,
        fields
            .iter()
            .map(|f| FieldAccess::Field(f.to_string()))
            .collect(),
    )
}

pub fn when_first(branches: Vec<(Option<Expression>, Expression)>) -> WhenExpression {
    WhenExpression::first(
        branches
            .into_iter()
            .map(|(cond, result)| WhenBranch {
                condition: match cond {
                    Some(expr) => WhenCondition::Expr(expr),
                    None => WhenCondition::Wildcard,
                },
                result,
            })
            .collect(),
    )
}

/// `/run {command}` with a literal command line.
pub fn run_command(command: &str) -> Node {
    run_node(Expression::Command(TemplateLiteral::text(command)))
}
