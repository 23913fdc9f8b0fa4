use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::effects::Effect;
use crate::value::SecurityDescriptor;

/// Lifecycle events for a spawned command or code body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum CommandEvent {
    Start {
        command_id: String,
        command: String,
        op: String,
    },
    Complete {
        command_id: String,
        exit: i32,
        duration_ms: u64,
    },
}

/// Streaming output from a command running `with { stream: true }`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum StreamEvent {
    Chunk {
        command_id: String,
        content: String,
        /// Position of this chunk within its command's stream.
        index: u64,
    },
    Progress {
        command_id: String,
        bytes: u64,
    },
}

/// End-of-run summary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ExecutionEvent {
    Complete {
        effects: usize,
        duration_ms: u64,
    },
}

/// Diagnostic events gated behind debug flags (`debug:directive:*`,
/// `debug:guard:*`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DebugEvent {
    pub scope: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Everything the runtime can publish to SDK consumers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum RuntimeEvent {
    Effect(Effect),
    Command(CommandEvent),
    Stream(StreamEvent),
    Execution(ExecutionEvent),
    Debug(DebugEvent),
}

impl RuntimeEvent {
    pub fn debug(scope: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeEvent::Debug(DebugEvent {
            scope: scope.into(),
            message: message.into(),
            metadata: Value::Null,
        })
    }

    pub fn command_start(
        command_id: impl Into<String>,
        command: impl Into<String>,
        op: impl Into<String>,
    ) -> Self {
        RuntimeEvent::Command(CommandEvent::Start {
            command_id: command_id.into(),
            command: command.into(),
            op: op.into(),
        })
    }

    pub fn command_complete(command_id: impl Into<String>, exit: i32, duration_ms: u64) -> Self {
        RuntimeEvent::Command(CommandEvent::Complete {
            command_id: command_id.into(),
            exit,
            duration_ms,
        })
    }

    pub fn stream_chunk(command_id: impl Into<String>, content: impl Into<String>, index: u64) -> Self {
        RuntimeEvent::Stream(StreamEvent::Chunk {
            command_id: command_id.into(),
            content: content.into(),
            index,
        })
    }

    /// Event-type label used in serialized output and sink filters.
    pub fn scope_label(&self) -> &'static str {
        match self {
            RuntimeEvent::Effect(_) => "effect",
            RuntimeEvent::Command(CommandEvent::Start { .. }) => "command:start",
            RuntimeEvent::Command(CommandEvent::Complete { .. }) => "command:complete",
            RuntimeEvent::Stream(StreamEvent::Chunk { .. }) => "stream:chunk",
            RuntimeEvent::Stream(StreamEvent::Progress { .. }) => "stream:progress",
            RuntimeEvent::Execution(_) => "execution:complete",
            RuntimeEvent::Debug(_) => "debug",
        }
    }

    /// Security descriptor attached to the event, where one applies.
    pub fn security(&self) -> Option<&SecurityDescriptor> {
        match self {
            RuntimeEvent::Effect(effect) => Some(&effect.security),
            _ => None,
        }
    }
}

/// A published event plus its hub-assigned ordering metadata.
///
/// `seq` is strictly monotonic per hub; `timestamp` is wall-clock and may
/// repeat under coarse clocks, so ordering consumers should prefer `seq`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: RuntimeEvent,
}

impl EventEnvelope {
    /// Normalized JSON form used by the JSON-lines sink.
    pub fn to_json_value(&self) -> Value {
        json!({
            "seq": self.seq,
            "type": self.payload.scope_label(),
            "timestamp": self.timestamp.to_rfc3339(),
            "payload": serde_json::to_value(&self.payload).unwrap_or(Value::Null),
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            RuntimeEvent::Effect(effect) => {
                write!(f, "[effect:{}] {}", effect.effect_type, effect.preview())
            }
            RuntimeEvent::Command(CommandEvent::Start {
                command_id,
                command,
                ..
            }) => {
                write!(f, "[command:start {command_id}] {command}")
            }
            RuntimeEvent::Command(CommandEvent::Complete {
                command_id, exit, ..
            }) => {
                write!(f, "[command:complete {command_id}] exit={exit}")
            }
            RuntimeEvent::Stream(StreamEvent::Chunk {
                command_id,
                content,
                index,
            }) => {
                write!(f, "[stream:chunk {command_id}#{index}] {content}")
            }
            RuntimeEvent::Stream(StreamEvent::Progress { command_id, bytes }) => {
                write!(f, "[stream:progress {command_id}] {bytes}B")
            }
            RuntimeEvent::Execution(ExecutionEvent::Complete {
                effects,
                duration_ms,
            }) => {
                write!(
                    f,
                    "[execution:complete] effects={effects} duration={duration_ms}ms"
                )
            }
            RuntimeEvent::Debug(debug) => write!(f, "[{}] {}", debug.scope, debug.message),
        }
    }
}
