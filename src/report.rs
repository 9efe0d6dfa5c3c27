use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::AudioBaitEvent;
use crate::visits::{Visit, VisitEvent};

/// Column layout of the exported visit report.
pub const REPORT_HEADER: [&str; 14] = [
    "Visit ID",
    "Group",
    "Device",
    "Type",
    "AssumedTag",
    "What",
    "Rec ID",
    "Date",
    "Start",
    "End",
    "Confidence",
    "# Events",
    "Audio Played",
    "URL",
];

// ===== ROWS =====

/// One line of the visit report. Flattened to positional columns only at
/// the export boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportRow {
    Visit {
        visit_id: u32,
        group: String,
        device: String,
        assumed_tag: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        events: usize,
        audio_played: bool,
    },
    Event {
        visit_id: u32,
        group: String,
        device: String,
        assumed_tag: String,
        what: String,
        recording_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        confidence: f64,
    },
    AudioBait {
        visit_id: u32,
        group: String,
        device: String,
        file_name: String,
        timestamp: DateTime<Utc>,
        volume: Option<i64>,
    },
}

fn date_str(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d").to_string()
}

fn time_str(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%H:%M:%S").to_string()
}

impl ReportRow {
    /// The instant this row sorts by within a visit's feed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ReportRow::Visit { end, .. } => *end,
            ReportRow::Event { start, .. } => *start,
            ReportRow::AudioBait { timestamp, .. } => *timestamp,
        }
    }

    /// Flattens the row to the fixed 14-column layout. `server_url` roots
    /// the recording links.
    pub fn to_columns(&self, server_url: &str) -> [String; 14] {
        let base = server_url.trim_end_matches('/');
        match self {
            ReportRow::Visit {
                visit_id,
                group,
                device,
                assumed_tag,
                start,
                end,
                events,
                audio_played,
            } => [
                visit_id.to_string(),
                group.clone(),
                device.clone(),
                "Visit".to_string(),
                assumed_tag.clone(),
                String::new(),
                String::new(),
                date_str(*start),
                time_str(*start),
                time_str(*end),
                String::new(),
                events.to_string(),
                if *audio_played {
                    "true".to_string()
                } else {
                    String::new()
                },
                String::new(),
            ],
            ReportRow::Event {
                visit_id,
                group,
                device,
                assumed_tag,
                what,
                recording_id,
                start,
                end,
                confidence,
            } => [
                visit_id.to_string(),
                group.clone(),
                device.clone(),
                "Event".to_string(),
                assumed_tag.clone(),
                what.clone(),
                recording_id.to_string(),
                date_str(*start),
                time_str(*start),
                time_str(*end),
                format!("{:.2}", confidence),
                String::new(),
                String::new(),
                format!("{}/recording/{}", base, recording_id),
            ],
            ReportRow::AudioBait {
                visit_id,
                group,
                device,
                file_name,
                timestamp,
                volume,
            } => [
                visit_id.to_string(),
                group.clone(),
                device.clone(),
                "Audio Bait".to_string(),
                String::new(),
                file_name.clone(),
                String::new(),
                date_str(*timestamp),
                time_str(*timestamp),
                String::new(),
                String::new(),
                String::new(),
                volume.map(|v| v.to_string()).unwrap_or_default(),
                String::new(),
            ],
        }
    }
}

fn event_row(visit: &Visit, event: &VisitEvent) -> ReportRow {
    ReportRow::Event {
        visit_id: visit.id,
        group: visit.group_name.clone(),
        device: visit.device_name.clone(),
        assumed_tag: visit.what().to_string(),
        what: event
            .what
            .clone()
            .unwrap_or_else(|| crate::visits::UNIDENTIFIED.to_string()),
        recording_id: event.recording_id,
        start: event.start,
        end: event.end,
        confidence: event.confidence,
    }
}

fn audio_bait_row(visit: &Visit, event: &AudioBaitEvent) -> ReportRow {
    ReportRow::AudioBait {
        visit_id: visit.id,
        group: visit.group_name.clone(),
        device: visit.device_name.clone(),
        file_name: event.file_name.clone().unwrap_or_default(),
        timestamp: event.timestamp,
        volume: event.volume,
    }
}

// ===== INTERLEAVE =====

/// Rows for one visit: the visit's own summary row, then its events and
/// audio-bait plays woven into a single newest-first feed.
///
/// Bait events are walked with an index cursor over their time-descending
/// list: before each event row, every remaining bait newer than the event's
/// start is flushed, which places each play next to the event it most
/// plausibly triggered.
pub fn visit_rows(visit: &Visit) -> Vec<ReportRow> {
    let mut rows = Vec::with_capacity(1 + visit.events.len() + visit.audio_bait_events.len());
    rows.push(ReportRow::Visit {
        visit_id: visit.id,
        group: visit.group_name.clone(),
        device: visit.device_name.clone(),
        assumed_tag: visit.what().to_string(),
        start: visit.start,
        end: visit.end,
        events: visit.events.len(),
        audio_played: !visit.audio_bait_events.is_empty(),
    });
    let baits = &visit.audio_bait_events;
    let mut next_bait = 0;
    for event in &visit.events {
        while next_bait < baits.len() && baits[next_bait].timestamp > event.start {
            rows.push(audio_bait_row(visit, &baits[next_bait]));
            next_bait += 1;
        }
        rows.push(event_row(visit, event));
    }
    while next_bait < baits.len() {
        rows.push(audio_bait_row(visit, &baits[next_bait]));
        next_bait += 1;
    }
    rows
}

/// The full report: visits in their returned order, each expanded to its
/// row feed.
pub fn report_rows(visits: &[Visit]) -> Vec<ReportRow> {
    visits.iter().flat_map(visit_rows).collect()
}
