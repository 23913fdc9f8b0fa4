use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::emitter::EventEmitter;
use super::event::EventEnvelope;
use super::hub::{EventHub, EventStream};
use super::sink::{EventSink, StdOutSink};

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

type SharedSink = Arc<ParkingMutex<Box<dyn EventSink>>>;

/// Central broadcasting system for SDK runtime events.
///
/// `EventBus` receives events from the evaluator (effects, command
/// lifecycle, stream chunks, debug traces) and broadcasts them to
/// configured sinks. Each interpreter run owns one bus, so concurrent runs
/// in the same process keep isolated streams.
///
/// ```text
/// Evaluator / Executor
///     │ emitter.emit()
///     ▼
/// EventBus
///     │ broadcast
///     ├─────┬─────┬─────┐
///     ▼     ▼     ▼     ▼
/// StdOut Channel JSONL Custom
///  Sink   Sink   Sink   Sink
/// ```
///
/// Every sink drains its own broadcast receiver on a dedicated worker
/// task; a slow sink lags and drops on its receiver without stalling the
/// others. All workers share one shutdown signal, and stopping the bus
/// lets each worker hand its still-buffered events to its sink first.
pub struct EventBus {
    hub: Arc<EventHub>,
    state: ParkingMutex<BusState>,
}

struct BusState {
    running: bool,
    shutdown: watch::Sender<bool>,
    sinks: Vec<SharedSink>,
    workers: Vec<JoinHandle<()>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity(sinks, DEFAULT_BUFFER_CAPACITY)
    }

    /// A bus with no sinks at all; events are only visible to direct
    /// subscribers.
    pub fn unsinked() -> Self {
        Self::with_capacity(Vec::new(), DEFAULT_BUFFER_CAPACITY)
    }

    pub(crate) fn with_capacity(sinks: Vec<Box<dyn EventSink>>, buffer_capacity: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            hub: EventHub::new(buffer_capacity),
            state: ParkingMutex::new(BusState {
                running: false,
                shutdown,
                sinks: sinks
                    .into_iter()
                    .map(|sink| Arc::new(ParkingMutex::new(sink)))
                    .collect(),
                workers: Vec::new(),
            }),
        }
    }

    /// Register a sink; if workers are already running, the new sink gets
    /// one immediately.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        let sink: SharedSink = Arc::new(ParkingMutex::new(sink));
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.running {
            let worker = spawn_worker(
                Arc::clone(&sink),
                self.hub.subscribe(),
                state.shutdown.subscribe(),
            );
            state.workers.push(worker);
        }
        state.sinks.push(sink);
    }

    pub fn get_emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.hub.emitter())
    }

    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Start one worker task per sink; idempotent.
    pub fn listen_for_events(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.running {
            return;
        }
        state.running = true;
        // A fresh shutdown channel each start lets a stopped bus restart
        // cleanly.
        let (shutdown, _) = watch::channel(false);
        state.shutdown = shutdown;
        let workers: Vec<JoinHandle<()>> = state
            .sinks
            .iter()
            .map(|sink| {
                spawn_worker(
                    Arc::clone(sink),
                    self.hub.subscribe(),
                    state.shutdown.subscribe(),
                )
            })
            .collect();
        state.workers = workers;
    }

    /// Stop sink workers, letting each drain its pending events first.
    pub async fn stop_listener(&self) {
        let workers = {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            let _ = state.shutdown.send(true);
            std::mem::take(&mut state.workers)
        };
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Close the hub so subscribers observe end-of-stream.
    pub fn close_channel(&self) {
        self.hub.close();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let _ = state.shutdown.send(true);
        for worker in state.workers.drain(..) {
            worker.abort();
        }
    }
}

fn spawn_worker(
    sink: SharedSink,
    mut stream: EventStream,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = stream.recv() => match event {
                    Ok(event) => deliver(&sink, &event),
                    Err(RecvError::Closed) => return,
                    Err(RecvError::Lagged(_)) => continue,
                },
            }
        }
        // Shutdown raced against delivery; hand anything still buffered on
        // this receiver to the sink so a stop right after a burst loses
        // nothing.
        while let Ok(event) = stream.try_recv() {
            deliver(&sink, &event);
        }
    })
}

fn deliver(sink: &SharedSink, event: &EventEnvelope) {
    let mut guard = sink.lock();
    if let Err(err) = guard.handle(event) {
        warn!(
            target: "mlld::event_bus",
            sink = %guard.name(),
            error = %err,
            "sink failed to handle event"
        );
    }
}
