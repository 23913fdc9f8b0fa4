//! The concurrency-aware iteration scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use parking_lot::Mutex as ParkingMutex;
use tracing::debug;

use super::source::IterationItem;
use crate::effects::Effect;
use crate::env::Environment;
use crate::error::{GuardOutcome, MlldError, Result};
use crate::value::StructuredValue;

/// Concurrency cap used by `parallel` without an explicit cap.
///
/// Plain `for` loops default to a cap of 1 (sequential); writing
/// `parallel()` is an explicit request for concurrency, so a bare clause
/// widens the window to 4 rather than staying sequential.
pub const DEFAULT_PARALLEL_CAP: usize = 4;

/// Resolved `parallel(cap?, rate?)` clause.
#[derive(Debug, Clone, Copy)]
pub struct ParallelOptions {
    /// Maximum in-flight iterations; 1 means sequential.
    pub cap: usize,
    /// Minimum interval between consecutive dispatches.
    pub rate: Option<Duration>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self { cap: 1, rate: None }
    }
}

impl ParallelOptions {
    pub fn parallel(cap: Option<usize>, rate: Option<Duration>) -> Self {
        Self {
            cap: cap.unwrap_or(DEFAULT_PARALLEL_CAP).max(1),
            rate,
        }
    }
}

/// The body run once per iteration.
///
/// Returning `Ok(None)` drops the element from the collected results
/// (comprehension filters); errors are captured as data unless fatal.
#[async_trait]
pub trait IterationBody: Send + Sync {
    async fn execute(
        &self,
        index: usize,
        item: &IterationItem,
        env: Arc<Environment>,
    ) -> Result<Option<StructuredValue>>;
}

/// Fatal errors terminate the iterator instead of being captured as data.
fn is_fatal(error: &MlldError) -> bool {
    matches!(
        error,
        MlldError::GuardDecision {
            decision: GuardOutcome::Deny,
            ..
        } | MlldError::PolicyDenied { .. }
            | MlldError::Parse { .. }
    )
}

/// Run every iteration and collect results in source order.
///
/// Dispatch order is source order, throttled by `rate`; at most `cap`
/// iterations are in flight. Each iteration runs in a buffered child
/// environment, and buffers flush in source order as their iteration (and
/// every earlier one) completes, so the document never observes completion
/// order.
pub async fn run_iterations(
    env: &Arc<Environment>,
    items: &[IterationItem],
    options: ParallelOptions,
    body: &dyn IterationBody,
) -> Result<Vec<StructuredValue>> {
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let clock = Arc::clone(&env.handles().clock);
    let cancel = env.handles().cancel.clone();

    let mut pending = FuturesUnordered::new();
    let mut slots: Vec<Option<Option<StructuredValue>>> = (0..total).map(|_| None).collect();
    let mut buffers: Vec<Option<Vec<Effect>>> = (0..total).map(|_| None).collect();
    let mut fatal: Option<MlldError> = None;

    let mut next_dispatch = 0usize;
    let mut next_flush = 0usize;
    let mut last_dispatch_at: Option<u64> = None;

    while next_flush < total {
        // Fill the window. Cancellation stops new dispatches; in-flight
        // iterations run to completion.
        while next_dispatch < total
            && pending.len() < options.cap
            && fatal.is_none()
            && !cancel.is_cancelled()
        {
            if let (Some(rate), Some(last)) = (options.rate, last_dispatch_at) {
                let rate_ms = u64::try_from(rate.as_millis()).unwrap_or(u64::MAX);
                let elapsed = clock.now_millis().saturating_sub(last);
                if elapsed < rate_ms {
                    clock.sleep(Duration::from_millis(rate_ms - elapsed)).await;
                }
            }
            last_dispatch_at = Some(clock.now_millis());

            let index = next_dispatch;
            let item = items[index].clone();
            let buffer = Arc::new(ParkingMutex::new(Vec::new()));
            let iteration_env = env.create_buffered_child(Arc::clone(&buffer));
            pending.push(async move {
                let result = body.execute(index, &item, iteration_env).await;
                let effects = std::mem::take(&mut *buffer.lock());
                (index, result, effects)
            });
            next_dispatch += 1;
        }

        let Some((index, result, effects)) = pending.next().await else {
            break;
        };

        buffers[index] = Some(effects);
        slots[index] = Some(match result {
            Ok(value) => value,
            Err(error) if is_fatal(&error) => {
                debug!(index, error = %error, "iteration failed fatally");
                if fatal.is_none() {
                    fatal = Some(error);
                }
                None
            }
            Err(error) => Some(StructuredValue::error(error.to_string())),
        });

        // Flush every completed prefix iteration in source order.
        while next_flush < total && slots[next_flush].is_some() {
            if let Some(effects) = buffers[next_flush].take() {
                env.flush_effects(effects);
            }
            next_flush += 1;
        }
    }

    if let Some(error) = fatal {
        return Err(error);
    }
    if cancel.is_cancelled() && next_dispatch < total {
        return Err(MlldError::PipelineAborted {
            reason: "iteration cancelled".to_string(),
        });
    }

    Ok(slots.into_iter().flatten().flatten().collect())
}
