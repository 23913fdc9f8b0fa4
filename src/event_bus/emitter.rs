use std::fmt;
use thiserror::Error;

use super::event::RuntimeEvent;

/// Abstract event emitter handed to evaluators and executors.
///
/// Emission is synchronous and non-blocking; slow consumers lag on their
/// own receivers rather than back-pressuring the evaluator.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: RuntimeEvent) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event hub closed")]
    Closed,
    #[error("event lag exceeded buffer; dropped {0} messages")]
    Lagged(usize),
    #[error("event emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}

/// Emitter that drops every event; used when no SDK consumer is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: RuntimeEvent) -> Result<(), EmitterError> {
        Ok(())
    }
}
