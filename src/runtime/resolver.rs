use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;

use crate::value::StructuredValue;

/// What a module reference resolves to.
#[derive(Debug, Clone)]
pub enum ResolvedModule {
    /// Source text to be parsed and evaluated in a fresh environment.
    Source(String),
    /// Pre-computed bindings (dynamic modules like `@state`).
    Bindings(FxHashMap<String, StructuredValue>),
}

/// Module and URL resolution for `/import`.
///
/// Network protocols, registries, and lock-file verification live behind
/// this interface; the engine only sees canonical references and results.
#[async_trait]
pub trait ModuleResolver: Send + Sync + std::fmt::Debug {
    /// Normalize a reference (resolve relative paths, aliases, versions).
    fn canonicalize(&self, reference: &str) -> String;

    /// Fetch the module; `Err` carries a resolver-specific message.
    async fn load(&self, reference: &str) -> Result<ResolvedModule, String>;
}

/// Registry-backed resolver for tests and embedders: a map from canonical
/// reference to module.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    modules: ParkingMutex<FxHashMap<String, ResolvedModule>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&self, reference: impl Into<String>, source: impl Into<String>) {
        let _ = self
            .modules
            .lock()
            .insert(reference.into(), ResolvedModule::Source(source.into()));
    }

    pub fn register_bindings(
        &self,
        reference: impl Into<String>,
        bindings: FxHashMap<String, StructuredValue>,
    ) {
        let _ = self
            .modules
            .lock()
            .insert(reference.into(), ResolvedModule::Bindings(bindings));
    }
}

#[async_trait]
impl ModuleResolver for InMemoryResolver {
    fn canonicalize(&self, reference: &str) -> String {
        reference.trim().to_string()
    }

    async fn load(&self, reference: &str) -> Result<ResolvedModule, String> {
        self.modules
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| format!("module not registered: {reference}"))
    }
}
