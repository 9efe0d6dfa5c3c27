use std::collections::{HashMap, HashSet};

use chrono::Duration;
use tracing::debug;

use crate::models::{AudioBaitEvent, TimeRange};
use crate::visits::Visit;

/// Fetch bounds for the audio event query: the hull of all visit spans,
/// padded by the lookback window on both sides.
pub fn search_range(visits: &[Visit], window: Duration) -> Option<TimeRange> {
    let start = visits.iter().map(|v| v.start).min()?;
    let end = visits.iter().map(|v| v.end).max()?;
    Some(TimeRange::new(start - window, end + window))
}

/// Assigns each playback event to the visit(s) it temporally relates to.
///
/// An event belongs to a visit when it falls inside `[start, end]`, or when
/// it is the nearest bait played before the visit started, within the
/// lookback window (a lure often plays just before the animal arrives).
/// Events only ever match visits at their own device. Multiple qualifying
/// events are all retained.
pub fn assign_events(visits: &mut [Visit], mut events: Vec<AudioBaitEvent>, lookback: Duration) {
    // newest first, matching the visit event ordering
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    for visit in visits.iter_mut() {
        let device_events: Vec<&AudioBaitEvent> = events
            .iter()
            .filter(|e| e.device_id == visit.device_id)
            .collect();
        if device_events.is_empty() {
            continue;
        }
        let mut matched: Vec<AudioBaitEvent> = device_events
            .iter()
            .filter(|e| e.timestamp >= visit.start && e.timestamp <= visit.end)
            .map(|e| (*e).clone())
            .collect();
        let nearest_preceding = device_events
            .iter()
            .filter(|e| e.timestamp < visit.start && visit.start - e.timestamp <= lookback)
            .map(|e| e.timestamp)
            .max();
        if let Some(timestamp) = nearest_preceding {
            matched.extend(
                device_events
                    .iter()
                    .filter(|e| e.timestamp == timestamp)
                    .map(|e| (*e).clone()),
            );
        }
        if !matched.is_empty() {
            debug!(
                visit = visit.id,
                device = visit.device_id,
                count = matched.len(),
                "matched audio bait events"
            );
        }
        visit.audio_bait_events = matched;
    }
}

/// Distinct audio file ids across every matched event, keying the single
/// bulk name lookup.
pub fn referenced_file_ids(visits: &[Visit]) -> HashSet<i64> {
    visits
        .iter()
        .flat_map(|v| v.audio_bait_events.iter())
        .map(|e| e.file_id)
        .collect()
}

/// Fills in resolved file names; an unresolvable id leaves the name blank
/// rather than failing the report.
pub fn apply_file_names(visits: &mut [Visit], names: &HashMap<i64, String>) {
    for visit in visits.iter_mut() {
        for event in &mut visit.audio_bait_events {
            event.file_name = names.get(&event.file_id).cloned();
        }
    }
}
