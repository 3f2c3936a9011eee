// src/merger.rs

use crate::events::PlayEvent;
use tracing::debug;

/// Sort events by start time. The merger expects chronological input;
/// segmenter and classifier events are produced in near order but not
/// strictly interleaved.
pub fn sort_chronological(events: &mut [PlayEvent]) {
    events.sort_by(|a, b| {
        a.time_seconds
            .partial_cmp(&b.time_seconds)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Coalesce adjacent same-type events separated by less than `gap_seconds`.
///
/// The running event absorbs the next one by extending its end time and
/// keeping the higher confidence; tags are unioned in first-seen order.
/// Boundaries are only ever extended, so the merged list covers at least
/// the time the input covered. Running the merger on its own output is a
/// no-op.
pub fn merge_events(events: Vec<PlayEvent>, gap_seconds: f64) -> Vec<PlayEvent> {
    let mut iter = events.into_iter();
    let mut current = match iter.next() {
        Some(first) => first,
        None => return Vec::new(),
    };

    let mut merged = Vec::new();
    let mut absorbed = 0usize;

    for next in iter {
        let same_type = next.event_type == current.event_type;
        if same_type && next.time_seconds - current.end_time < gap_seconds {
            current.end_time = current.end_time.max(next.end_time);
            current.confidence_score = current.confidence_score.max(next.confidence_score);
            for tag in next.tags {
                if !current.tags.contains(&tag) {
                    current.tags.push(tag);
                }
            }
            absorbed += 1;
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);

    if absorbed > 0 {
        debug!("Merged {} adjacent events", absorbed);
    }
    merged
}
