use flume;
use parking_lot::Mutex as ParkingMutex;
use std::any::type_name;
use std::fs::File;
use std::io::{self, Result as IoResult, Stdout, Write};
use std::path::Path;
use std::sync::Arc;

use super::event::EventEnvelope;

/// Abstraction over an output target that consumes full event envelopes.
pub trait EventSink: Sync + Send {
    /// Handle a structured event. Sink decides how to serialize/format it.
    ///
    /// Implementations are allowed to perform blocking I/O; each sink runs
    /// on its own worker task so the evaluator stays responsive.
    fn handle(&mut self, event: &EventEnvelope) -> IoResult<()>;

    /// A stable, human-friendly identifier for this sink instance.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }
}

/// Stdout sink rendering one line per event.
pub struct StdOutSink {
    handle: Stdout,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
        }
    }
}

impl EventSink for StdOutSink {
    fn handle(&mut self, event: &EventEnvelope) -> IoResult<()> {
        writeln!(self.handle, "{event}")?;
        self.handle.flush()
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<ParkingMutex<Vec<EventEnvelope>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured events. Clones the internal buffer so
    /// callers can inspect state without holding the mutex.
    pub fn snapshot(&self) -> Vec<EventEnvelope> {
        self.entries.lock().clone()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &EventEnvelope) -> IoResult<()> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// JSON Lines (JSONL) sink for machine-readable structured logging.
///
/// Each envelope serializes to one line using the normalized schema:
/// ```json
/// {"seq":3,"type":"stream:chunk","timestamp":"2026-07-12T09:15:00Z","payload":{...}}
/// ```
pub struct JsonLinesSink {
    handle: Box<dyn Write + Send + Sync>,
}

impl JsonLinesSink {
    pub fn new(handle: Box<dyn Write + Send + Sync>) -> Self {
        Self { handle }
    }

    pub fn to_stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write to a file, created or truncated.
    pub fn to_file(path: impl AsRef<Path>) -> IoResult<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl EventSink for JsonLinesSink {
    fn handle(&mut self, event: &EventEnvelope) -> IoResult<()> {
        let json = event
            .to_json_string()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.handle, "{json}")?;
        self.handle.flush()
    }

    fn name(&self) -> String {
        "JsonLinesSink".to_string()
    }
}

/// Channel-based sink for streaming events to async consumers.
///
/// Forwards envelopes to a flume channel, which an SDK host can drain into
/// SSE, WebSocket, or test assertions:
///
/// ```rust,no_run
/// use mlld::event_bus::{ChannelSink, EventBus};
///
/// let (tx, rx) = flume::unbounded();
/// let bus = EventBus::with_sinks(vec![Box::new(ChannelSink::new(tx))]);
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv_async().await {
///         println!("{event}");
///     }
/// });
/// # drop(bus);
/// ```
///
/// If the receiver is dropped, `handle()` returns an error which is logged
/// by the bus but doesn't stop broadcasting to other sinks.
pub struct ChannelSink {
    tx: flume::Sender<EventEnvelope>,
}

impl ChannelSink {
    pub fn new(tx: flume::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &EventEnvelope) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}
