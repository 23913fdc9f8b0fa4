use serde::{Deserialize, Serialize};

use crate::value::StructuredValue;

/// Self-retry budget per stage before the pipeline aborts.
pub const MAX_RETRIES: u32 = 10;

/// The append-only pipeline event log.
///
/// Stage indices are zero-based with stage 0 the base producer; the
/// user-facing `@ctx.stage` is the same number presented 1-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    PipelineStart {
        input: StructuredValue,
    },
    StageStart {
        stage: usize,
        input: StructuredValue,
    },
    StageSuccess {
        stage: usize,
        output: StructuredValue,
    },
    StageRetry {
        /// The stage that requested the retry.
        stage: usize,
        /// The stage execution restarts at; 0 replays the base.
        from: usize,
        reason: Option<String>,
        hint: Option<String>,
    },
    StageFailure {
        stage: usize,
        error: String,
    },
    PipelineComplete {
        output: StructuredValue,
    },
    PipelineAbort {
        reason: String,
    },
}
