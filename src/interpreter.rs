//! The top-level run API.
//!
//! An [`Interpreter`] owns the runtime handles and the event bus for one or
//! more runs. Each run evaluates a parsed [`Document`] against a fresh root
//! environment and returns the rendered document plus the effect log.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::Document;
use crate::config::{self, EngineOptions};
use crate::effects::{Effect, EffectOptions};
use crate::env::{Environment, RuntimeHandles, RuntimeHandlesBuilder};
use crate::error::Result;
use crate::event_bus::{EventBus, ExecutionEvent, RuntimeEvent};
use crate::parser::ParseMode;
use crate::runtime::CancelToken;

/// Knobs for constructing an interpreter with default wiring.
#[derive(Debug, Clone, Default)]
pub struct InterpreterOptions {
    pub engine: EngineOptions,
    pub effects: EffectOptions,
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// The rendered document (the fold over `doc`/`both` effects).
    pub document: String,
    /// The full effect log, queryable by SDK hosts.
    pub effects: Vec<Effect>,
    /// Names recorded by `/export` at module scope.
    pub exports: Vec<String>,
    /// The per-run state write log.
    pub state_writes: Vec<(String, Value)>,
}

/// Evaluation engine facade.
///
/// ```no_run
/// use mlld::ast::{Directive, Document, Expression, Node};
/// use mlld::interpreter::{Interpreter, InterpreterOptions};
///
/// # async fn example() -> Result<(), mlld::error::MlldError> {
/// let interp = Interpreter::new(InterpreterOptions::default());
/// let doc = Document::new(vec![Node::Directive(Directive::show(
///     Expression::literal("hi"),
/// ))]);
/// let outcome = interp.run(doc).await?;
/// println!("{}", outcome.document);
/// # Ok(())
/// # }
/// ```
pub struct Interpreter {
    handles: Arc<RuntimeHandles>,
    bus: Option<EventBus>,
}

impl Interpreter {
    /// Interpreter with OS-backed wiring and no event sinks.
    pub fn new(options: InterpreterOptions) -> Self {
        let handles = RuntimeHandles::builder()
            .with_options(options.engine)
            .with_effect_options(options.effects)
            .build();
        Self { handles, bus: None }
    }

    /// Interpreter over pre-built handles; used by tests and embedders that
    /// substitute runtime doubles.
    pub fn with_handles(handles: Arc<RuntimeHandles>) -> Self {
        Self { handles, bus: None }
    }

    /// Interpreter publishing SDK events through `bus`; sink workers start
    /// immediately.
    pub fn with_options_and_bus(
        options: InterpreterOptions,
        bus: EventBus,
        builder: RuntimeHandlesBuilder,
    ) -> Self {
        bus.listen_for_events();
        let handles = builder
            .with_options(options.engine)
            .with_effect_options(options.effects)
            .with_emitter(bus.get_emitter())
            .build();
        Self {
            handles,
            bus: Some(bus),
        }
    }

    /// Discover the project root from `start_dir`, load `mlld-config.json`
    /// and `mlld-lock.json`, and wire OS-backed handles.
    ///
    /// The CLI path wires [`LineParser`](crate::parser::LineParser) so
    /// `run_source` works out of the box on the line-oriented subset;
    /// embedders with a full grammar swap it via
    /// [`RuntimeHandlesBuilder::with_parser`].
    pub async fn bootstrap(start_dir: &Path, options: InterpreterOptions) -> Result<Self> {
        // `.env` values join the captured environment before the MLLD_
        // filter applies.
        let _ = dotenvy::dotenv();
        let captured: rustc_hash::FxHashMap<String, String> = std::env::vars().collect();

        let probe = RuntimeHandles::builder().build();
        let root = config::find_project_root(probe.fs.as_ref(), start_dir).await;
        let loaded_config = config::load_config(probe.fs.as_ref(), &root).await?;
        let lock = config::load_lock(probe.fs.as_ref(), &root).await?;

        let engine = options.engine.with_env_toggles(&captured);
        let handles = RuntimeHandles::builder()
            .with_parser(Arc::new(crate::parser::LineParser))
            .with_project_root(root)
            .with_cwd(start_dir.to_path_buf())
            .with_config(loaded_config)
            .with_lock(lock)
            .with_captured_env(captured)
            .with_options(engine)
            .with_effect_options(options.effects)
            .build();
        Ok(Self { handles, bus: None })
    }

    pub fn handles(&self) -> &Arc<RuntimeHandles> {
        &self.handles
    }

    /// Token that aborts in-flight iterations and commands when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.handles.cancel.clone()
    }

    /// Parse `source` with the wired parser, then run it.
    pub async fn run_source(&self, source: &str) -> Result<RunOutcome> {
        let mode = if self.handles.options.strict {
            ParseMode::Strict
        } else {
            ParseMode::Loose
        };
        let document = self.handles.parser.parse(source, mode)?;
        self.run(document).await
    }

    /// Evaluate a parsed document against a fresh root environment.
    pub async fn run(&self, document: Document) -> Result<RunOutcome> {
        let started = self.handles.clock.now_millis();
        let env = Environment::new_root(Arc::clone(&self.handles));

        let result = crate::eval::evaluate_document(&document, &env).await;

        let effects = self.handles.effects.log_snapshot();
        let duration = self.handles.clock.now_millis().saturating_sub(started);
        let _ = self
            .handles
            .emitter
            .emit(RuntimeEvent::Execution(ExecutionEvent::Complete {
                effects: effects.len(),
                duration_ms: duration,
            }));

        result?;

        Ok(RunOutcome {
            document: self.handles.effects.document(),
            effects,
            exports: env.exports(),
            state_writes: env.state_writes(),
        })
    }

    /// Drain sink workers; call before process exit when a bus is attached.
    pub async fn shutdown(&self) {
        if let Some(bus) = &self.bus {
            bus.stop_listener().await;
        }
    }
}
