//! SDK event stream: fan-out, sinks, and subscriber APIs.
//!
//! The module is organised around a broadcast-based [`EventHub`] and helpers
//! for configuring sinks ([`EventBus`]) and consuming the resulting
//! [`EventStream`]. Every published event is wrapped in an
//! [`EventEnvelope`] carrying a monotonic sequence number and timestamp, so
//! consumers can order `stream:chunk` events even across clock steps.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter, NullEmitter};
pub use event::{
    CommandEvent, DebugEvent, EventEnvelope, ExecutionEvent, RuntimeEvent, StreamEvent,
};
pub use hub::{BlockingEventIter, EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};
