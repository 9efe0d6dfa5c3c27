use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{AudioBaitEvent, Recording, Track};

/// Label used for visits whose recordings carry no usable tag.
pub const UNIDENTIFIED: &str = "unidentified";

fn secs(seconds: f64) -> Duration {
    Duration::milliseconds((seconds * 1000.0) as i64)
}

// ===== VISIT EVENTS =====

/// One track (or untracked recording) folded into a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub recording_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what: Option<String>,
    pub automatic: bool,
}

impl VisitEvent {
    fn from_track(recording: &Recording, track: &Track) -> Self {
        let start = recording.recording_date_time + secs(track.start.unwrap_or(0.0));
        let end = recording.recording_date_time + secs(track.end.unwrap_or(recording.duration));
        let (what, automatic, confidence) = match &track.tag {
            Some(tag) => (Some(tag.what.clone()), tag.automatic, tag.confidence),
            None => (None, true, 0.0),
        };
        Self {
            recording_id: recording.id,
            track_id: Some(track.id),
            start,
            end,
            confidence,
            what,
            automatic,
        }
    }

    fn untracked(recording: &Recording) -> Self {
        Self {
            recording_id: recording.id,
            track_id: None,
            start: recording.recording_date_time,
            end: recording.recording_date_time + secs(recording.duration),
            confidence: 0.0,
            what: None,
            automatic: true,
        }
    }
}

// ===== VISITS =====

/// A stitched sequence of temporally-close recordings at one device,
/// attributed to a single animal presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: u32,
    pub device_id: i64,
    pub device_name: String,
    pub group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<i64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub events: Vec<VisitEvent>,
    pub audio_bait_events: Vec<AudioBaitEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumed_tag: Option<String>,
    /// Offset of the last recording this visit consumed.
    pub query_offset: usize,
    /// Offset of the recording that opened the visit; a discarded visit is
    /// rebuilt by rescanning from here.
    #[serde(skip)]
    pub first_offset: usize,
    pub complete: bool,
}

impl Visit {
    fn new(id: u32, recording: &Recording, offset: usize) -> Self {
        let mut visit = Self {
            id,
            device_id: recording.device_id,
            device_name: recording.device_name.clone(),
            group_name: recording.group_name.clone(),
            station_id: None,
            start: recording.recording_date_time,
            end: recording.recording_date_time,
            events: Vec::new(),
            audio_bait_events: Vec::new(),
            assumed_tag: None,
            query_offset: offset,
            first_offset: offset,
            complete: false,
        };
        visit.add_recording(recording, offset);
        visit
    }

    /// Gap between the visit's earliest member and an incoming (older)
    /// recording. Negative when the feed is out of order; the interval test
    /// then passes, matching the no-resort contract.
    fn gap_from_start(&self, recording: &Recording) -> Duration {
        self.start - recording.recording_date_time
    }

    fn add_recording(&mut self, recording: &Recording, offset: usize) {
        if recording.recording_date_time < self.start {
            self.start = recording.recording_date_time;
        }
        if recording.recording_date_time > self.end {
            self.end = recording.recording_date_time;
        }
        if self.station_id.is_none() {
            self.station_id = recording.station_id;
        }
        if recording.tracks.is_empty() {
            self.events.push(VisitEvent::untracked(recording));
        } else {
            for track in &recording.tracks {
                self.events.push(VisitEvent::from_track(recording, track));
            }
        }
        self.query_offset = offset;
        self.update_assumed_tag();
    }

    /// Human tags outrank automatic ones; within the preferred class the
    /// majority label wins, ties going to the most recent event's label.
    fn update_assumed_tag(&mut self) {
        let tagged: Vec<&VisitEvent> = self.events.iter().filter(|e| e.what.is_some()).collect();
        let manual: Vec<&VisitEvent> = tagged.iter().copied().filter(|e| !e.automatic).collect();
        let pool = if manual.is_empty() { tagged } else { manual };
        if pool.is_empty() {
            self.assumed_tag = None;
            return;
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for event in &pool {
            *counts.entry(event.what.as_deref().unwrap()).or_insert(0) += 1;
        }
        // events run newest-first, so the first label to reach the winning
        // count is also the most recent one
        let mut best: Option<(&str, usize)> = None;
        for event in &pool {
            let what = event.what.as_deref().unwrap();
            let count = counts[what];
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((what, count));
            }
        }
        self.assumed_tag = best.map(|(what, _)| what.to_string());
    }

    pub fn what(&self) -> &str {
        self.assumed_tag.as_deref().unwrap_or(UNIDENTIFIED)
    }
}

// ===== PER-DEVICE BUILDER =====

/// Owns the visits of one device: the closed ones (most recent first) plus
/// at most one visit still open for extension by older recordings.
#[derive(Debug, Clone)]
pub struct DeviceVisits {
    pub device_id: i64,
    pub device_name: String,
    pub group_name: String,
    visits: Vec<Visit>,
    current: Option<Visit>,
}

impl DeviceVisits {
    fn new(recording: &Recording) -> Self {
        Self {
            device_id: recording.device_id,
            device_name: recording.device_name.clone(),
            group_name: recording.group_name.clone(),
            visits: Vec::new(),
            current: None,
        }
    }

    fn consume(
        &mut self,
        recording: &Recording,
        offset: usize,
        visit_interval: Duration,
        next_visit_id: &mut u32,
    ) {
        if let Some(visit) = self.current.as_mut() {
            if visit.gap_from_start(recording) <= visit_interval {
                visit.add_recording(recording, offset);
                return;
            }
            let closed = self.current.take().unwrap();
            self.visits.push(closed);
        }
        let id = *next_visit_id;
        *next_visit_id += 1;
        self.current = Some(Visit::new(id, recording, offset));
    }

    /// Nothing still unfetched can be newer than `cutoff - visit_interval`,
    /// so a visit starting after `cutoff` can no longer grow backward.
    fn check_complete(&mut self, cutoff: DateTime<Utc>) {
        for visit in &mut self.visits {
            if !visit.complete && visit.start > cutoff {
                visit.complete = true;
            }
        }
        if self.current.as_ref().map_or(false, |v| v.start > cutoff) {
            let mut closed = self.current.take().unwrap();
            closed.complete = true;
            self.visits.push(closed);
        }
    }

    fn mark_completed(&mut self) {
        if let Some(visit) = self.current.take() {
            self.visits.push(visit);
        }
        for visit in &mut self.visits {
            visit.complete = true;
        }
    }

    fn complete_count(&self) -> usize {
        self.visits.iter().filter(|v| v.complete).count()
    }

    /// Drops visits not yet provably complete and returns their rebuild
    /// offsets.
    fn remove_incomplete(&mut self) -> Vec<usize> {
        let mut removed = Vec::new();
        if let Some(visit) = self.current.take() {
            removed.push(visit.first_offset);
        }
        self.visits.retain(|visit| {
            if visit.complete {
                true
            } else {
                removed.push(visit.first_offset);
                false
            }
        });
        removed
    }

    /// Withholds complete visits whose recordings sit at or past the
    /// resumption offset; they will be rebuilt by the resumed scan.
    fn demote_past(&mut self, resume_offset: usize) -> Vec<usize> {
        let mut demoted = Vec::new();
        self.visits.retain(|visit| {
            if visit.query_offset >= resume_offset {
                demoted.push(visit.first_offset);
                false
            } else {
                true
            }
        });
        demoted
    }
}

// ===== SUMMARY ACROSS DEVICES =====

/// Owns one `DeviceVisits` per device and the completeness cutoff state for
/// a single engine invocation. Not shared across invocations.
#[derive(Debug)]
pub struct DeviceSummary {
    device_map: HashMap<i64, DeviceVisits>,
    oldest_seen: Option<DateTime<Utc>>,
    visit_interval: Duration,
    next_visit_id: u32,
    resume_offset: Option<usize>,
}

impl DeviceSummary {
    pub fn new(visit_interval: Duration) -> Self {
        Self {
            device_map: HashMap::new(),
            oldest_seen: None,
            visit_interval,
            next_visit_id: 1,
            resume_offset: None,
        }
    }

    /// Feeds one page of recordings (already access-filtered, globally
    /// descending in time) through the per-device builders. `offset` is the
    /// page's position in the overall scan.
    pub fn generate_visits(&mut self, recordings: &[Recording], offset: usize) {
        for (i, recording) in recordings.iter().enumerate() {
            self.oldest_seen = Some(recording.recording_date_time);
            let device = self
                .device_map
                .entry(recording.device_id)
                .or_insert_with(|| DeviceVisits::new(recording));
            device.consume(
                recording,
                offset + i,
                self.visit_interval,
                &mut self.next_visit_id,
            );
        }
    }

    /// Re-evaluates completeness without assuming the scan is finished: any
    /// visit whose start lies more than one visit interval after the oldest
    /// row fed so far cannot be extended by a deeper page.
    pub fn check_for_complete_visits(&mut self) {
        let Some(oldest) = self.oldest_seen else {
            return;
        };
        let cutoff = oldest + self.visit_interval;
        for device in self.device_map.values_mut() {
            device.check_complete(cutoff);
        }
    }

    pub fn complete_visits_count(&self) -> usize {
        self.device_map.values().map(|d| d.complete_count()).sum()
    }

    /// Promotes every remaining visit to complete. Only valid once the
    /// source is exhausted.
    pub fn mark_completed(&mut self) {
        for device in self.device_map.values_mut() {
            device.mark_completed();
        }
        self.resume_offset = None;
    }

    /// Discards visits that could still grow, then withholds any complete
    /// visit the resumed scan would rebuild (fixed point over the resumption
    /// offset), so a resumed run never double-counts.
    pub fn remove_incomplete_visits(&mut self) {
        let mut removed: Vec<usize> = Vec::new();
        for device in self.device_map.values_mut() {
            removed.extend(device.remove_incomplete());
        }
        let mut resume = match removed.iter().min() {
            Some(&offset) => offset,
            None => {
                self.resume_offset = None;
                return;
            }
        };
        loop {
            let mut demoted: Vec<usize> = Vec::new();
            for device in self.device_map.values_mut() {
                demoted.extend(device.demote_past(resume));
            }
            if demoted.is_empty() {
                break;
            }
            debug!(
                count = demoted.len(),
                resume, "withholding complete visits past the resumption offset"
            );
            resume = resume.min(*demoted.iter().min().unwrap());
        }
        self.resume_offset = Some(resume);
    }

    /// The offset to restart the scan from, or `None` when every produced
    /// visit was returned.
    pub fn earliest_incomplete_offset(&self) -> Option<usize> {
        self.resume_offset
    }

    /// Consumes the summary, yielding the finalized visits of every device.
    /// Call after `mark_completed` or `remove_incomplete_visits`; everything
    /// left at that point is complete.
    pub fn complete_visits(self) -> Vec<Visit> {
        let mut visits: Vec<Visit> = Vec::new();
        for (_, device) in self.device_map {
            visits.extend(device.visits);
            if let Some(current) = device.current {
                visits.push(current);
            }
        }
        visits
    }

    /// Aggregates returned visits into per-device reporting rows.
    pub fn device_reports(visits: &[Visit]) -> HashMap<i64, DeviceReport> {
        let mut reports: HashMap<i64, DeviceReport> = HashMap::new();
        for visit in visits {
            let report = reports
                .entry(visit.device_id)
                .or_insert_with(|| DeviceReport::new(visit));
            report.visit_count += 1;
            report.event_count += visit.events.len();
            report.audio_bait |= !visit.audio_bait_events.is_empty();
            report.start_time = report.start_time.min(visit.start);
            report.end_time = report.end_time.max(visit.end);
            let animal = report
                .animal_summary
                .entry(visit.what().to_string())
                .or_insert_with(|| AnimalSummary::new(visit));
            animal.visits += 1;
            animal.events += visit.events.len();
            animal.start = animal.start.min(visit.start);
            animal.end = animal.end.max(visit.end);
        }
        reports
    }
}

// ===== REPORTING AGGREGATES =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device_name: String,
    pub group_name: String,
    pub visit_count: usize,
    pub event_count: usize,
    pub audio_bait: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub animal_summary: HashMap<String, AnimalSummary>,
}

impl DeviceReport {
    fn new(visit: &Visit) -> Self {
        Self {
            device_name: visit.device_name.clone(),
            group_name: visit.group_name.clone(),
            visit_count: 0,
            event_count: 0,
            audio_bait: false,
            start_time: visit.start,
            end_time: visit.end,
            animal_summary: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalSummary {
    pub visits: usize,
    pub events: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnimalSummary {
    fn new(visit: &Visit) -> Self {
        Self {
            visits: 0,
            events: 0,
            start: visit.start,
            end: visit.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackTag;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 14, 12, minute, 0).unwrap()
    }

    fn tagged_recording(id: i64, minute: u32, what: &str, automatic: bool) -> Recording {
        Recording::new(id, 1, "rimu", 1, "possum-watch", at(minute), 30.0).with_track(
            Track::new(id * 10)
                .with_span(1.0, 9.0)
                .with_tag(TrackTag::new(what, automatic, 0.9)),
        )
    }

    fn build_visit(recordings: &[Recording]) -> Visit {
        let mut summary = DeviceSummary::new(Duration::minutes(10));
        summary.generate_visits(recordings, 0);
        summary.mark_completed();
        let mut visits = summary.complete_visits();
        assert_eq!(visits.len(), 1);
        visits.remove(0)
    }

    #[test]
    fn human_tag_outranks_automatic_majority() {
        let visit = build_visit(&[
            tagged_recording(1, 9, "cat", true),
            tagged_recording(2, 8, "cat", true),
            tagged_recording(3, 7, "possum", false),
        ]);
        assert_eq!(visit.assumed_tag.as_deref(), Some("possum"));
    }

    #[test]
    fn majority_tag_wins_within_class() {
        let visit = build_visit(&[
            tagged_recording(1, 9, "rat", true),
            tagged_recording(2, 8, "possum", true),
            tagged_recording(3, 7, "possum", true),
        ]);
        assert_eq!(visit.assumed_tag.as_deref(), Some("possum"));
    }

    #[test]
    fn tie_goes_to_most_recent_event() {
        let visit = build_visit(&[
            tagged_recording(1, 9, "stoat", false),
            tagged_recording(2, 8, "possum", false),
        ]);
        assert_eq!(visit.assumed_tag.as_deref(), Some("stoat"));
    }

    #[test]
    fn untagged_recordings_still_form_a_visit() {
        let visit = build_visit(&[
            Recording::new(1, 1, "rimu", 1, "possum-watch", at(9), 30.0),
            Recording::new(2, 1, "rimu", 1, "possum-watch", at(8), 30.0),
        ]);
        assert_eq!(visit.assumed_tag, None);
        assert_eq!(visit.what(), UNIDENTIFIED);
        assert_eq!(visit.events.len(), 2);
    }

    #[test]
    fn same_instant_recordings_extend_the_visit() {
        let visit = build_visit(&[
            Recording::new(1, 1, "rimu", 1, "possum-watch", at(5), 30.0),
            Recording::new(2, 1, "rimu", 1, "possum-watch", at(5), 30.0),
        ]);
        assert_eq!(visit.events.len(), 2);
        assert_eq!(visit.start, visit.end);
    }

    #[test]
    fn station_comes_from_first_recording_that_has_one() {
        let visit = build_visit(&[
            Recording::new(1, 1, "rimu", 1, "possum-watch", at(9), 30.0),
            Recording::new(2, 1, "rimu", 1, "possum-watch", at(8), 30.0).with_station(44),
        ]);
        assert_eq!(visit.station_id, Some(44));
    }
}
