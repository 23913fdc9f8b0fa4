use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;

use super::effect::{Effect, EffectType};
use super::renderer::render_document;
use crate::event_bus::{EventEmitter, RuntimeEvent};

/// Rendering knobs for document assembly.
#[derive(Debug, Clone, Copy)]
pub struct EffectOptions {
    /// Collapse runs of three or more newlines down to a single blank line.
    pub normalize_blank_lines: bool,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            normalize_blank_lines: true,
        }
    }
}

/// Owner of the append-only effect log.
///
/// The handler is shared by reference across the whole environment tree.
/// It appends `doc`/`both` effects to the document, routes `stdout`/
/// `stderr` to the runtime's stdio, records every effect for SDK queries,
/// and forwards each one to the event bus emitter.
///
/// Imports set the suppress flag on emission so imported documents
/// contribute bindings without contributing document content.
pub struct EffectHandler {
    log: ParkingMutex<Vec<Effect>>,
    emitter: Arc<dyn EventEmitter>,
    options: EffectOptions,
    stdout: ParkingMutex<Box<dyn Write + Send>>,
    stderr: ParkingMutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for EffectHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandler")
            .field("effects", &self.log.lock().len())
            .field("options", &self.options)
            .finish()
    }
}

impl EffectHandler {
    pub fn new(emitter: Arc<dyn EventEmitter>, options: EffectOptions) -> Self {
        Self {
            log: ParkingMutex::new(Vec::new()),
            emitter,
            options,
            stdout: ParkingMutex::new(Box::new(io::stdout())),
            stderr: ParkingMutex::new(Box::new(io::stderr())),
        }
    }

    /// Replace the stdio writers; used by tests and by the `--stdout` CLI
    /// mode that redirects document output.
    pub fn set_stdio(
        &self,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) {
        *self.stdout.lock() = stdout;
        *self.stderr.lock() = stderr;
    }

    /// Append an effect to the log, route stdio, and publish the SDK event.
    ///
    /// With `suppress_doc` set (import evaluation), `doc` effects are
    /// dropped and `both` effects are demoted to plain `stdout`.
    pub fn emit(&self, effect: Effect, suppress_doc: bool) {
        let effect = match (suppress_doc, effect.effect_type) {
            (true, EffectType::Doc) => return,
            (true, EffectType::Both) => Effect {
                effect_type: EffectType::Stdout,
                ..effect
            },
            _ => effect,
        };

        match effect.effect_type {
            EffectType::Stdout | EffectType::Both => {
                let mut out = self.stdout.lock();
                let _ = out.write_all(effect.content.as_bytes());
                let _ = out.flush();
            }
            EffectType::Stderr => {
                let mut err = self.stderr.lock();
                let _ = err.write_all(effect.content.as_bytes());
                let _ = err.flush();
            }
            EffectType::Doc | EffectType::FileWrite => {}
        }

        if let Err(err) = self.emitter.emit(RuntimeEvent::Effect(effect.clone())) {
            tracing::debug!(error = %err, "effect event not delivered");
        }
        self.log.lock().push(effect);
    }

    /// Append a batch in order; used by parallel iterations flushing their
    /// per-iteration buffers.
    pub fn emit_all(&self, effects: Vec<Effect>, suppress_doc: bool) {
        for effect in effects {
            self.emit(effect, suppress_doc);
        }
    }

    /// Snapshot of the full effect log.
    pub fn log_snapshot(&self) -> Vec<Effect> {
        self.log.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    /// Render the document from the current log.
    pub fn document(&self) -> String {
        render_document(&self.log.lock(), self.options.normalize_blank_lines)
    }
}
