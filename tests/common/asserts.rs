//! Assertion helpers shared across suites.

use mlld::event_bus::{EventEnvelope, RuntimeEvent};

/// The rendered document, with the trailing newline stripped for terse
/// comparisons.
pub fn doc_text(outcome: &mlld::interpreter::RunOutcome) -> String {
    outcome.document.trim_end_matches('\n').to_string()
}

/// Envelopes whose payload matches the given scope label.
pub fn events_with_label<'a>(
    events: &'a [EventEnvelope],
    label: &str,
) -> Vec<&'a EventEnvelope> {
    events
        .iter()
        .filter(|e| e.payload.scope_label() == label)
        .collect()
}

/// Assert sequence numbers strictly increase.
pub fn assert_monotonic(events: &[EventEnvelope]) {
    for pair in events.windows(2) {
        assert!(
            pair[0].seq < pair[1].seq,
            "event seq regressed: {} then {}",
            pair[0].seq,
            pair[1].seq
        );
    }
}

/// Stream chunk payload text, in seq order.
pub fn chunk_contents(events: &[EventEnvelope]) -> Vec<String> {
    let mut chunks: Vec<(&EventEnvelope, String)> = events
        .iter()
        .filter_map(|e| match &e.payload {
            RuntimeEvent::Stream(mlld::event_bus::StreamEvent::Chunk { content, .. }) => {
                Some((e, content.clone()))
            }
            _ => None,
        })
        .collect();
    chunks.sort_by_key(|(e, _)| e.seq);
    chunks.into_iter().map(|(_, c)| c).collect()
}
