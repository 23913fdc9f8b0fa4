//! Shared runtime plumbing for an evaluation tree.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::{EngineOptions, MlldConfig, MlldLock};
use crate::effects::{EffectHandler, EffectOptions};
use crate::event_bus::{EventEmitter, NullEmitter};
use crate::exec::{CodeEngine, NullProseAdapter, ProseAdapter, SpawnedNodeEngine};
use crate::parser::{NullParser, Parser};
use crate::runtime::{
    CancelToken, Clock, FileSystem, InMemoryResolver, KeychainProvider, MemoryKeychain,
    ModuleResolver, OsFileSystem, ProcessSpawner, TokioClock, TokioSpawner,
};

/// Immutable bundle of external interfaces shared by every environment in a
/// run.
///
/// The original service graph had cycles broken by a mediator; here the
/// whole graph collapses into this one value, passed by `Arc` and never
/// mutated after construction. Process-wide facts (working directory,
/// environment variables) are captured once into `cwd`/`captured_env` and
/// never re-read.
#[derive(Debug)]
pub struct RuntimeHandles {
    pub fs: Arc<dyn FileSystem>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub clock: Arc<dyn Clock>,
    pub keychain: Arc<dyn KeychainProvider>,
    pub resolver: Arc<dyn ModuleResolver>,
    pub parser: Arc<dyn Parser>,
    pub prose: Arc<dyn ProseAdapter>,
    /// Executor for `js` bodies; defaults to the spawned-node engine.
    pub code_engine: Arc<dyn CodeEngine>,
    pub effects: Arc<EffectHandler>,
    pub emitter: Arc<dyn EventEmitter>,
    pub project_root: PathBuf,
    pub cwd: PathBuf,
    pub config: MlldConfig,
    pub lock: MlldLock,
    pub options: EngineOptions,
    pub captured_env: FxHashMap<String, String>,
    pub cancel: CancelToken,
}

impl RuntimeHandles {
    pub fn builder() -> RuntimeHandlesBuilder {
        RuntimeHandlesBuilder::default()
    }
}

/// Builder wiring defaults suitable for production; tests swap in doubles.
pub struct RuntimeHandlesBuilder {
    fs: Arc<dyn FileSystem>,
    spawner: Arc<dyn ProcessSpawner>,
    clock: Arc<dyn Clock>,
    keychain: Arc<dyn KeychainProvider>,
    resolver: Arc<dyn ModuleResolver>,
    parser: Arc<dyn Parser>,
    prose: Arc<dyn ProseAdapter>,
    code_engine: Arc<dyn CodeEngine>,
    emitter: Arc<dyn EventEmitter>,
    effect_options: EffectOptions,
    project_root: PathBuf,
    cwd: PathBuf,
    config: MlldConfig,
    lock: MlldLock,
    options: EngineOptions,
    captured_env: FxHashMap<String, String>,
    cancel: CancelToken,
}

impl Default for RuntimeHandlesBuilder {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            fs: Arc::new(OsFileSystem),
            spawner: Arc::new(TokioSpawner),
            clock: Arc::new(TokioClock),
            keychain: Arc::new(MemoryKeychain::new()),
            resolver: Arc::new(InMemoryResolver::new()),
            parser: Arc::new(NullParser),
            prose: Arc::new(NullProseAdapter),
            code_engine: Arc::new(SpawnedNodeEngine),
            emitter: Arc::new(NullEmitter),
            effect_options: EffectOptions::default(),
            project_root: cwd.clone(),
            cwd,
            config: MlldConfig::default(),
            lock: MlldLock::default(),
            options: EngineOptions::default(),
            captured_env: std::env::vars().collect(),
            cancel: CancelToken::new(),
        }
    }
}

impl RuntimeHandlesBuilder {
    #[must_use]
    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_keychain(mut self, keychain: Arc<dyn KeychainProvider>) -> Self {
        self.keychain = keychain;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_prose(mut self, prose: Arc<dyn ProseAdapter>) -> Self {
        self.prose = prose;
        self
    }

    #[must_use]
    pub fn with_code_engine(mut self, engine: Arc<dyn CodeEngine>) -> Self {
        self.code_engine = engine;
        self
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    #[must_use]
    pub fn with_effect_options(mut self, options: EffectOptions) -> Self {
        self.effect_options = options;
        self
    }

    #[must_use]
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: MlldConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: MlldLock) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_captured_env(mut self, env: FxHashMap<String, String>) -> Self {
        self.captured_env = env;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Arc<RuntimeHandles> {
        let effects = Arc::new(EffectHandler::new(
            Arc::clone(&self.emitter),
            self.effect_options,
        ));
        Arc::new(RuntimeHandles {
            fs: self.fs,
            spawner: self.spawner,
            clock: self.clock,
            keychain: self.keychain,
            resolver: self.resolver,
            parser: self.parser,
            prose: self.prose,
            code_engine: self.code_engine,
            effects,
            emitter: self.emitter,
            project_root: self.project_root,
            cwd: self.cwd,
            config: self.config,
            lock: self.lock,
            options: self.options,
            captured_env: self.captured_env,
            cancel: self.cancel,
        })
    }
}
