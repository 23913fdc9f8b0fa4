use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::frames::{ContextFrame, GuardCtx, PipelineCtx};
use super::handles::RuntimeHandles;
use crate::ast::SourceLocation;
use crate::config::importable_env;
use crate::effects::Effect;
use crate::error::{MlldError, PathValidationCode, Result};
use crate::guard::{GuardHook, PolicyFrame};
use crate::value::{ScopeKind, StructuredValue, Variable};

/// Identifiers that cannot be bound by user directives.
///
/// `upper` stays off this list: it is a soft transformer builtin that user
/// definitions shadow. Parameters are exempt from the check entirely so
/// callables can name a parameter `input` and read it as `@input`.
pub const RESERVED_NAMES: &[&str] = &[
    "exists", "debug", "base", "now", "json", "input", "ctx", "mx", "root",
];

/// Why a child scope exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildScope {
    Root,
    Block,
    LoopIteration,
    Import,
    ExecCall,
    PipelineStage,
    Guard,
}

/// Per-run registries shared by every environment in one evaluation tree.
#[derive(Debug, Default)]
struct RunShared {
    guards: ParkingMutex<Vec<Arc<GuardHook>>>,
    state_writes: ParkingMutex<Vec<(String, Value)>>,
    guard_tries: ParkingMutex<FxHashMap<String, u32>>,
}

/// A lexical scope plus the shared plumbing of its run.
///
/// Children see parent bindings by chained lookup and never leak names
/// upward except through `/export`. The handles bundle is shared by
/// reference across the entire tree and never mutated.
pub struct Environment {
    kind: ChildScope,
    vars: ParkingMutex<FxHashMap<String, Variable>>,
    parent: Option<Arc<Environment>>,
    handles: Arc<RuntimeHandles>,
    shared: Arc<RunShared>,
    /// Policy frames pushed in this scope; the effective stack is the
    /// concatenation from innermost scope outward (a cactus stack).
    policy_frames: ParkingMutex<Vec<Arc<PolicyFrame>>>,
    ctx_stack: ParkingMutex<Vec<ContextFrame>>,
    /// Document-content suppression for import evaluation.
    suppress_doc: bool,
    /// Directory the current file's relative paths resolve against.
    base_dir: PathBuf,
    /// Names recorded by `/export` at module scope.
    exports: ParkingMutex<Vec<String>>,
    /// When present, emitted effects collect here instead of reaching the
    /// handler; parallel iterations flush their buffers in source order.
    effect_buffer: Option<Arc<ParkingMutex<Vec<Effect>>>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("kind", &self.kind)
            .field("vars", &self.vars.lock().len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Environment {
    pub fn new_root(handles: Arc<RuntimeHandles>) -> Arc<Self> {
        let base_dir = handles.cwd.clone();
        Arc::new(Self {
            kind: ChildScope::Root,
            vars: ParkingMutex::new(FxHashMap::default()),
            parent: None,
            handles,
            shared: Arc::new(RunShared::default()),
            policy_frames: ParkingMutex::new(Vec::new()),
            ctx_stack: ParkingMutex::new(Vec::new()),
            suppress_doc: false,
            base_dir,
            exports: ParkingMutex::new(Vec::new()),
            effect_buffer: None,
        })
    }

    /// Create a child scope.
    ///
    /// `Import` children start a fresh module scope with document output
    /// suppressed; every other kind chains lookups to the parent.
    pub fn create_child(self: &Arc<Self>, kind: ChildScope) -> Arc<Environment> {
        self.child_with_base_dir(kind, self.base_dir.clone())
    }

    /// Child scope whose relative paths resolve against `dir`; used when
    /// evaluation enters a file with a known location.
    pub fn create_child_in_dir(
        self: &Arc<Self>,
        kind: ChildScope,
        dir: PathBuf,
    ) -> Arc<Environment> {
        self.child_with_base_dir(kind, dir)
    }

    fn child_with_base_dir(
        self: &Arc<Self>,
        kind: ChildScope,
        base_dir: PathBuf,
    ) -> Arc<Environment> {
        Arc::new(self.child_parts(kind, base_dir))
    }

    fn child_parts(self: &Arc<Self>, kind: ChildScope, base_dir: PathBuf) -> Environment {
        let suppress_doc = self.suppress_doc || kind == ChildScope::Import;
        Environment {
            kind,
            vars: ParkingMutex::new(FxHashMap::default()),
            parent: if kind == ChildScope::Import {
                None
            } else {
                Some(Arc::clone(self))
            },
            handles: Arc::clone(&self.handles),
            shared: if kind == ChildScope::Import {
                Arc::new(RunShared::default())
            } else {
                Arc::clone(&self.shared)
            },
            policy_frames: ParkingMutex::new(Vec::new()),
            ctx_stack: ParkingMutex::new(Vec::new()),
            suppress_doc,
            base_dir,
            exports: ParkingMutex::new(Vec::new()),
            effect_buffer: self.effect_buffer.clone(),
        }
    }

    /// Iteration child whose effects collect into `buffer` until the
    /// scheduler flushes them in source order.
    pub fn create_buffered_child(
        self: &Arc<Self>,
        buffer: Arc<ParkingMutex<Vec<Effect>>>,
    ) -> Arc<Environment> {
        let mut child = self.child_parts(ChildScope::LoopIteration, self.base_dir.clone());
        child.effect_buffer = Some(buffer);
        Arc::new(child)
    }

    pub fn kind(&self) -> ChildScope {
        self.kind
    }

    pub fn handles(&self) -> &Arc<RuntimeHandles> {
        &self.handles
    }

    pub fn suppresses_doc(&self) -> bool {
        self.suppress_doc
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    /// Nearest user binding for `name`, walking the scope chain.
    pub fn get(&self, name: &str) -> Option<Variable> {
        if let Some(var) = self.vars.lock().get(name) {
            return Some(var.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Resolve `name` to a value: user bindings first, then the built-in
    /// namespaces (`@now`, `@base`, `@root`, `@input`, `@ctx`, `@mx`,
    /// `@debug`).
    pub fn lookup(&self, name: &str, location: Option<&SourceLocation>) -> Result<StructuredValue> {
        if let Some(var) = self.get(name) {
            return Ok(var.value);
        }
        match name {
            "now" => {
                let millis = self.handles.clock.now_millis();
                let when = chrono::DateTime::from_timestamp_millis(millis as i64)
                    .unwrap_or_else(chrono::Utc::now);
                Ok(StructuredValue::text(when.to_rfc3339()))
            }
            "base" | "root" => Ok(StructuredValue::text(
                self.handles.project_root.display().to_string(),
            )),
            "input" => {
                // Guard bodies see the operation's primary input, pipeline
                // stages their stage input; elsewhere `@input` is the
                // filtered process environment.
                if let Some(guard) = self.guard_ctx() {
                    return Ok(guard.input);
                }
                if let Some(ctx) = self.pipeline_ctx() {
                    return Ok(ctx.input);
                }
                let visible = importable_env(&self.handles.captured_env, &self.handles.lock);
                let map: serde_json::Map<String, Value> = visible
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Ok(StructuredValue::json(Value::Object(map)))
            }
            "ctx" => {
                let ctx = self.pipeline_ctx().ok_or_else(|| MlldError::VariableNotFound {
                    name: "ctx".into(),
                    location: location.cloned(),
                })?;
                Ok(StructuredValue::json(ctx.ctx_value()))
            }
            "mx" => {
                let guard = self.guard_ctx().ok_or_else(|| MlldError::VariableNotFound {
                    name: "mx".into(),
                    location: location.cloned(),
                })?;
                Ok(StructuredValue::json(guard.mx_value()))
            }
            "debug" => {
                let mut names = self.visible_names();
                names.sort();
                Ok(StructuredValue::text(names.join("\n")))
            }
            _ => Err(MlldError::VariableNotFound {
                name: name.to_string(),
                location: location.cloned(),
            }),
        }
    }

    fn visible_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.lock().keys().cloned().collect();
        if let Some(parent) = &self.parent {
            names.extend(parent.visible_names());
        }
        names
    }

    /// Bind a variable, routing by its scope kind.
    ///
    /// Module-scoped bindings land in the nearest module scope and reject
    /// rebinding of `/var` and `/exe` names; `/let` bindings shadow freely
    /// within their block.
    pub fn set(self: &Arc<Self>, variable: Variable) -> Result<()> {
        if variable.scope_kind != ScopeKind::Parameter
            && RESERVED_NAMES.contains(&variable.name.as_str())
        {
            return Err(MlldError::ReservedName {
                name: variable.name,
                location: None,
            });
        }
        match variable.scope_kind {
            ScopeKind::Module => {
                let module = self.module_scope();
                let mut vars = module.vars.lock();
                if let Some(existing) = vars.get(&variable.name) {
                    if existing.rejects_rebind() {
                        return Err(MlldError::DuplicateVariable {
                            name: variable.name,
                            location: None,
                        });
                    }
                }
                let _ = vars.insert(variable.name.clone(), variable);
                Ok(())
            }
            ScopeKind::Block | ScopeKind::Parameter => {
                let _ = self.vars.lock().insert(variable.name.clone(), variable);
                Ok(())
            }
        }
    }

    /// The nearest enclosing module scope (document root or import root).
    pub fn module_scope(self: &Arc<Self>) -> Arc<Environment> {
        let mut current = Arc::clone(self);
        loop {
            if matches!(current.kind, ChildScope::Root | ChildScope::Import) {
                return current;
            }
            match &current.parent {
                Some(parent) => current = Arc::clone(parent),
                None => return current,
            }
        }
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Emit an effect, stamping it with the security context of the current
    /// pipeline stage input when one is active.
    ///
    /// Inside a buffered iteration the effect is parked until the scheduler
    /// flushes the iteration's buffer in source order.
    pub fn emit_effect(&self, mut effect: Effect) {
        if let Some(ctx) = self.pipeline_ctx() {
            effect.security.merge_from(ctx.input.security());
        }
        if let Some(buffer) = &self.effect_buffer {
            buffer.lock().push(effect);
            return;
        }
        self.handles.effects.emit(effect, self.suppress_doc);
    }

    /// Flush a buffer collected by [`create_buffered_child`](Self::create_buffered_child).
    pub fn flush_effects(&self, effects: Vec<Effect>) {
        self.handles.effects.emit_all(effects, self.suppress_doc);
    }

    // ------------------------------------------------------------------
    // Context frames
    // ------------------------------------------------------------------

    /// Push a frame for the duration of the returned guard; the pop runs on
    /// drop, so every exit path restores the stack.
    pub fn push_frame(self: &Arc<Self>, frame: ContextFrame) -> PushedFrame {
        self.ctx_stack.lock().push(frame);
        PushedFrame {
            env: Arc::clone(self),
        }
    }

    pub fn pipeline_ctx(&self) -> Option<PipelineCtx> {
        for frame in self.ctx_stack.lock().iter().rev() {
            if let ContextFrame::Pipeline(ctx) = frame {
                return Some(ctx.clone());
            }
        }
        self.parent.as_ref().and_then(|p| p.pipeline_ctx())
    }

    pub fn guard_ctx(&self) -> Option<GuardCtx> {
        for frame in self.ctx_stack.lock().iter().rev() {
            if let ContextFrame::Guard(ctx) = frame {
                return Some(ctx.clone());
            }
        }
        self.parent.as_ref().and_then(|p| p.guard_ctx())
    }

    // ------------------------------------------------------------------
    // Guards & policies
    // ------------------------------------------------------------------

    pub fn register_guard(&self, hook: GuardHook) {
        self.shared.guards.lock().push(Arc::new(hook));
    }

    /// Registered guards in registration order.
    pub fn guards(&self) -> Vec<Arc<GuardHook>> {
        self.shared.guards.lock().clone()
    }

    pub fn guard_try_count(&self, key: &str) -> u32 {
        *self.shared.guard_tries.lock().get(key).unwrap_or(&0)
    }

    pub fn bump_guard_try(&self, key: &str) -> u32 {
        let mut tries = self.shared.guard_tries.lock();
        let count = tries.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn push_policy(&self, frame: PolicyFrame) {
        self.policy_frames.lock().push(Arc::new(frame));
    }

    /// Active policy frames, innermost first.
    pub fn effective_policies(&self) -> Vec<Arc<PolicyFrame>> {
        let mut frames: Vec<Arc<PolicyFrame>> =
            self.policy_frames.lock().iter().rev().cloned().collect();
        if let Some(parent) = &self.parent {
            frames.extend(parent.effective_policies());
        }
        frames
    }

    // ------------------------------------------------------------------
    // Module bookkeeping
    // ------------------------------------------------------------------

    pub fn record_export(self: &Arc<Self>, names: &[String]) {
        self.module_scope()
            .exports
            .lock()
            .extend(names.iter().cloned());
    }

    pub fn exports(&self) -> Vec<String> {
        self.exports.lock().clone()
    }

    /// Append to the per-run write log used by dynamic modules.
    pub fn record_state_write(&self, key: impl Into<String>, value: Value) {
        self.shared.state_writes.lock().push((key.into(), value));
    }

    pub fn state_writes(&self) -> Vec<(String, Value)> {
        self.shared.state_writes.lock().clone()
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Validate and resolve a filesystem target.
    ///
    /// Relative paths resolve against the current file's directory;
    /// absolute paths must stay inside the project root unless the run
    /// allows absolute targets.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf> {
        if raw.is_empty() {
            return Err(MlldError::PathValidation {
                code: PathValidationCode::Empty,
                path: raw.to_string(),
            });
        }
        if raw.contains('\0') {
            return Err(MlldError::PathValidation {
                code: PathValidationCode::NullByte,
                path: raw.to_string(),
            });
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Err(MlldError::PathValidation {
                code: PathValidationCode::ExpectedFs,
                path: raw.to_string(),
            });
        }

        let candidate = Path::new(raw);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        };

        let normalized = normalize(&resolved);
        if !self.handles.options.allow_absolute
            && !normalized.starts_with(&self.handles.project_root)
        {
            return Err(MlldError::PathValidation {
                code: PathValidationCode::OutsideRoot,
                path: raw.to_string(),
            });
        }
        Ok(normalized)
    }
}

/// Lexical `.`/`..` normalization without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Drop guard returned by [`Environment::push_frame`].
pub struct PushedFrame {
    env: Arc<Environment>,
}

impl Drop for PushedFrame {
    fn drop(&mut self) {
        let _ = self.env.ctx_stack.lock().pop();
    }
}
