//! Sequential and parallel `for` iteration.
//!
//! Both the directive form (`/for @x in @src [body]`) and the expression
//! form (`for @x in @src => expr`) run through the same scheduler: items
//! dispatch in source order (throttled by `rate`), at most `cap` run
//! concurrently, and both the collected results and the emitted effects
//! come back in source order regardless of completion order.

mod scheduler;
mod source;

pub use scheduler::{DEFAULT_PARALLEL_CAP, IterationBody, ParallelOptions, run_iterations};
pub use source::{IterationItem, iteration_items};
