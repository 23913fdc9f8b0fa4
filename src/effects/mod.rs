//! Effects: the engine's only output channel.
//!
//! Evaluation never writes to the document directly; it emits [`Effect`]s
//! into an append-only log owned by the [`EffectHandler`]. The final
//! document is a pure fold over that log, which makes rendering idempotent
//! and lets parallel iterations buffer and replay their effects in source
//! order.

mod effect;
mod handler;
mod renderer;

pub use effect::{Effect, EffectType};
pub use handler::{EffectHandler, EffectOptions};
pub use renderer::render_document;
