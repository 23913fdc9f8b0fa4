//! The pipeline stage driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::events::{MAX_RETRIES, PipelineEvent};
use super::machine::PipelineMachine;
use crate::env::{ChildScope, ContextFrame, Environment, PipelineCtx};
use crate::error::{GuardOutcome, MlldError, Result};
use crate::guard::retry_signal_of;
use crate::value::StructuredValue;

/// Executes one stage of a pipeline.
///
/// Stage 0 is the base producer: it receives an empty input and either
/// evaluates the base expression (re-running it on retries to stage 0) or
/// replays a cached value when the base is not executable.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Number of stages including the base.
    fn total_stages(&self) -> usize;

    async fn execute(
        &self,
        stage: usize,
        input: StructuredValue,
        env: Arc<Environment>,
    ) -> Result<StructuredValue>;
}

/// Drive a pipeline to completion.
///
/// Per stage: emit `STAGE_START`, build the stage context from the event
/// log, execute the body with the context frame pushed, then consume the
/// result. Success advances (or completes; an empty-string output
/// short-circuits the whole pipeline). A retry rewinds the cursor after
/// recording the event, so projections computed afterwards see the
/// invalidation. Errors surface immediately.
pub async fn run_pipeline(
    env: &Arc<Environment>,
    executor: &dyn StageExecutor,
) -> Result<StructuredValue> {
    let total = executor.total_stages();
    let mut machine = PipelineMachine::new(total);
    let mut current: usize = 0;
    let mut current_input = StructuredValue::empty();

    machine.record(PipelineEvent::PipelineStart {
        input: current_input.clone(),
    });

    loop {
        if env.handles().cancel.is_cancelled() {
            let reason = "cancelled".to_string();
            machine.record(PipelineEvent::PipelineAbort {
                reason: reason.clone(),
            });
            return Err(MlldError::PipelineAborted { reason });
        }

        machine.record(PipelineEvent::StageStart {
            stage: current,
            input: current_input.clone(),
        });

        // The base producer is stage 0; pipe targets count from 1, which
        // keeps `@ctx.previous` equal to `@ctx.outputs[stage - 1]`.
        let ctx = PipelineCtx {
            stage: current,
            total: total.saturating_sub(1),
            attempt: machine.attempt(current),
            hint: machine.current_hint(),
            outputs: machine.outputs_for(current),
            input: current_input.clone(),
        };

        let stage_env = env.create_child(ChildScope::PipelineStage);
        let frame = stage_env.push_frame(ContextFrame::Pipeline(ctx));
        let result = executor
            .execute(current, current_input.clone(), Arc::clone(&stage_env))
            .await;
        drop(frame);

        match result {
            Ok(output) => {
                if let Some(hint) = retry_signal_of(&output) {
                    let rewind = consume_retry(&mut machine, current, None, hint, None)?;
                    current = rewind.stage;
                    current_input = rewind.input;
                    continue;
                }

                let mut output = output;
                output.merge_security(current_input.security());
                machine.record(PipelineEvent::StageSuccess {
                    stage: current,
                    output: output.clone(),
                });

                if output.text.is_empty() && current + 1 < total {
                    // Empty output short-circuits the remaining stages.
                    let empty = StructuredValue::text("");
                    machine.record(PipelineEvent::PipelineComplete {
                        output: empty.clone(),
                    });
                    return Ok(empty);
                }
                if current + 1 == total {
                    machine.record(PipelineEvent::PipelineComplete {
                        output: output.clone(),
                    });
                    return Ok(output);
                }
                current += 1;
                current_input = output;
            }
            Err(MlldError::GuardDecision {
                decision: GuardOutcome::Retry,
                message,
                retry_from,
            }) => {
                // A guard retry's message is the hint the regenerating
                // stages read back as `@ctx.hint`.
                let hint = if message.is_empty() { None } else { Some(message) };
                let rewind = consume_retry(&mut machine, current, retry_from, hint, None)?;
                current = rewind.stage;
                current_input = rewind.input;
            }
            Err(error) => {
                machine.record(PipelineEvent::StageFailure {
                    stage: current,
                    error: error.to_string(),
                });
                return Err(error);
            }
        }
    }
}

struct Rewind {
    stage: usize,
    input: StructuredValue,
}

/// Record a retry and compute the rewound cursor.
///
/// `from` defaults to the stage that produced the retrying stage's input,
/// so a bare `retry` regenerates the input; `from = 0` replays the base.
fn consume_retry(
    machine: &mut PipelineMachine,
    stage: usize,
    from: Option<usize>,
    hint: Option<String>,
    reason: Option<String>,
) -> Result<Rewind> {
    if machine.self_retries(stage) >= MAX_RETRIES {
        let reason = format!(
            "stage {} exceeded the retry budget of {MAX_RETRIES}",
            stage + 1
        );
        machine.record(PipelineEvent::PipelineAbort {
            reason: reason.clone(),
        });
        return Err(MlldError::PipelineAborted { reason });
    }

    let from = from.unwrap_or_else(|| stage.saturating_sub(1));
    debug!(stage, from, hint = ?hint, "pipeline stage retry");
    machine.record(PipelineEvent::StageRetry {
        stage,
        from,
        reason,
        hint,
    });

    let input = if from == 0 {
        machine.base_input().unwrap_or_else(StructuredValue::empty)
    } else {
        machine
            .last_valid_success(from - 1)
            .or_else(|| machine.base_input())
            .unwrap_or_else(StructuredValue::empty)
    };

    Ok(Rewind { stage: from, input })
}
