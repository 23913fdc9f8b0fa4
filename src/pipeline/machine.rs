//! Projections over the pipeline event log.

use serde_json::Value;

use super::events::PipelineEvent;
use crate::value::StructuredValue;

/// Read-only view computing every derived number from the log.
///
/// Nothing here is cached: retries that rewind past earlier stages
/// invalidate their outputs simply by appearing later in the log, so a
/// projection computed after the rewind cannot observe stale state.
#[derive(Debug, Default)]
pub struct PipelineMachine {
    events: Vec<PipelineEvent>,
    total_stages: usize,
}

impl PipelineMachine {
    pub fn new(total_stages: usize) -> Self {
        Self {
            events: Vec::new(),
            total_stages,
        }
    }

    pub fn record(&mut self, event: PipelineEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn total_stages(&self) -> usize {
        self.total_stages
    }

    /// 1-indexed attempt count for a stage: the number of times it has
    /// started (the current start included).
    pub fn attempt(&self, stage: usize) -> u32 {
        self.events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::StageStart { stage: s, .. } if *s == stage))
            .count() as u32
    }

    /// Number of retries this stage itself has requested.
    pub fn self_retries(&self, stage: usize) -> u32 {
        self.events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::StageRetry { stage: s, .. } if *s == stage))
            .count() as u32
    }

    /// Hint of the retry that opened the current chain, if the chain is
    /// still live. A later retry rewinding to a lower stage truncates any
    /// older chain, which backward scanning handles for free.
    pub fn current_hint(&self) -> Option<String> {
        self.events.iter().rev().find_map(|e| match e {
            PipelineEvent::StageRetry { hint, .. } => Some(hint.clone()),
            _ => None,
        })?
    }

    /// Last success of `stage` that survived every retry affecting it.
    ///
    /// A `StageRetry { from, .. }` with `from <= stage` invalidates earlier
    /// successes of that slot; only a success recorded after the latest
    /// such retry counts.
    pub fn last_valid_success(&self, stage: usize) -> Option<StructuredValue> {
        let invalidation_point = self
            .events
            .iter()
            .rposition(|e| matches!(e, PipelineEvent::StageRetry { from, .. } if *from <= stage));
        let search_from = invalidation_point.map_or(0, |i| i + 1);
        self.events[search_from..].iter().rev().find_map(|e| match e {
            PipelineEvent::StageSuccess { stage: s, output } if *s == stage => {
                Some(output.clone())
            }
            _ => None,
        })
    }

    /// The base input recorded at `PIPELINE_START`.
    pub fn base_input(&self) -> Option<StructuredValue> {
        self.events.iter().find_map(|e| match e {
            PipelineEvent::PipelineStart { input } => Some(input.clone()),
            _ => None,
        })
    }

    /// The `@ctx.outputs` array visible to `stage`: slot 0 is the base
    /// output (or the recorded base input before stage 0 succeeds), slots
    /// `1..stage` are surviving successes of previous stages.
    pub fn outputs_for(&self, stage: usize) -> Vec<Value> {
        let mut outputs = Vec::with_capacity(stage);
        for slot in 0..stage.max(1) {
            if slot >= self.total_stages {
                break;
            }
            let value = self
                .last_valid_success(slot)
                .or_else(|| if slot == 0 { self.base_input() } else { None });
            outputs.push(value.map_or(Value::Null, |v| output_datum(&v)));
        }
        outputs
    }
}

/// Data view of a stage output for `@ctx.outputs`: parsed data when the
/// stage produced any, raw text otherwise.
fn output_datum(value: &StructuredValue) -> Value {
    if value.data.is_null() {
        Value::String(value.text.clone())
    } else {
        value.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(text: &str) -> StructuredValue {
        StructuredValue::text(text)
    }

    #[test]
    fn attempts_count_stage_starts() {
        let mut m = PipelineMachine::new(2);
        m.record(PipelineEvent::StageStart {
            stage: 0,
            input: sv(""),
        });
        m.record(PipelineEvent::StageRetry {
            stage: 1,
            from: 0,
            reason: None,
            hint: None,
        });
        m.record(PipelineEvent::StageStart {
            stage: 0,
            input: sv(""),
        });
        assert_eq!(m.attempt(0), 2);
        assert_eq!(m.attempt(1), 0);
    }

    #[test]
    fn retry_invalidates_covered_slots() {
        let mut m = PipelineMachine::new(3);
        m.record(PipelineEvent::StageSuccess {
            stage: 0,
            output: sv("a"),
        });
        m.record(PipelineEvent::StageSuccess {
            stage: 1,
            output: sv("b"),
        });
        m.record(PipelineEvent::StageRetry {
            stage: 2,
            from: 1,
            reason: None,
            hint: None,
        });

        // Stage 0's success predates the retry but is below `from`.
        assert_eq!(m.last_valid_success(0).unwrap().text, "a");
        // Stage 1's success is invalidated until it succeeds again.
        assert!(m.last_valid_success(1).is_none());

        m.record(PipelineEvent::StageSuccess {
            stage: 1,
            output: sv("b2"),
        });
        assert_eq!(m.last_valid_success(1).unwrap().text, "b2");
    }

    #[test]
    fn hint_comes_from_the_newest_retry() {
        let mut m = PipelineMachine::new(3);
        assert_eq!(m.current_hint(), None);
        m.record(PipelineEvent::StageRetry {
            stage: 2,
            from: 1,
            reason: None,
            hint: Some("h1".into()),
        });
        m.record(PipelineEvent::StageRetry {
            stage: 1,
            from: 0,
            reason: None,
            hint: Some("h0".into()),
        });
        assert_eq!(m.current_hint().as_deref(), Some("h0"));
    }

    #[test]
    fn retry_to_base_resets_downstream_outputs() {
        let mut m = PipelineMachine::new(3);
        m.record(PipelineEvent::PipelineStart { input: sv("base") });
        m.record(PipelineEvent::StageSuccess {
            stage: 0,
            output: sv("s0"),
        });
        m.record(PipelineEvent::StageSuccess {
            stage: 1,
            output: sv("s1"),
        });
        m.record(PipelineEvent::StageRetry {
            stage: 1,
            from: 0,
            reason: None,
            hint: None,
        });

        let outputs = m.outputs_for(2);
        assert_eq!(outputs[0], Value::String("base".into()));
        assert_eq!(outputs[1], Value::Null);
    }
}
