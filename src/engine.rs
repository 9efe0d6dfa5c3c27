use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::Duration;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio_bait;
use crate::models::{AudioBaitEvent, RecordingFilter, RecordingPage, TimeRange};
use crate::visits::{DeviceReport, DeviceSummary, Visit};

/// Hard cap on complete visits returned by one invocation.
pub const MAX_VISIT_RESULTS: usize = 5000;

static DEFAULT_VISIT_INTERVAL: Lazy<Duration> = Lazy::new(|| Duration::minutes(10));
static DEFAULT_AUDIO_BAIT_WINDOW: Lazy<Duration> = Lazy::new(|| Duration::days(1));

// ===== SOURCE SEAM =====

/// The paged, time-ordered recording store the engine reads from. For a
/// fixed filter the ordering must be deterministic: globally descending
/// `recording_date_time`, ties broken by id.
pub trait RecordingSource {
    async fn fetch_recordings(
        &mut self,
        filter: &RecordingFilter,
        offset: usize,
        limit: usize,
        want_count: bool,
    ) -> Result<RecordingPage>;

    async fn fetch_audio_events(&mut self, range: &TimeRange) -> Result<Vec<AudioBaitEvent>>;

    async fn lookup_files(&mut self, ids: &HashSet<i64>) -> Result<HashMap<i64, String>>;
}

// ===== CONFIGURATION =====

/// Policy constants for one visit query. The interval and lookback values
/// are owned by the caller, not the engine.
#[derive(Debug, Clone)]
pub struct VisitQueryConfig {
    /// Stop once this many complete visits have been produced.
    pub request_visits: usize,
    /// Upper bound on a single fetch window.
    pub query_max: usize,
    /// Maximum gap between recordings of one visit.
    pub visit_interval: Duration,
    /// Lookback/lookahead window for matching audio-bait events.
    pub audio_bait_window: Duration,
}

impl Default for VisitQueryConfig {
    fn default() -> Self {
        Self {
            request_visits: MAX_VISIT_RESULTS,
            query_max: MAX_VISIT_RESULTS * 2,
            visit_interval: *DEFAULT_VISIT_INTERVAL,
            audio_bait_window: *DEFAULT_AUDIO_BAIT_WINDOW,
        }
    }
}

impl VisitQueryConfig {
    pub fn with_request_visits(mut self, request_visits: usize) -> Self {
        self.request_visits = request_visits.clamp(1, MAX_VISIT_RESULTS);
        self
    }

    pub fn with_visit_interval(mut self, visit_interval: Duration) -> Self {
        self.visit_interval = visit_interval;
        self
    }

    pub fn with_audio_bait_window(mut self, audio_bait_window: Duration) -> Self {
        self.audio_bait_window = audio_bait_window;
        self
    }
}

/// Per-invocation inputs: where to resume the scan, and an optional
/// cancellation token checked between fetch iterations.
#[derive(Debug, Clone, Default)]
pub struct VisitQueryParams {
    pub offset: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

impl VisitQueryParams {
    pub fn from_offset(offset: usize) -> Self {
        Self {
            offset: Some(offset),
            cancel: None,
        }
    }
}

// ===== RESULT =====

#[derive(Debug, Clone, Serialize)]
pub struct VisitQueryResult {
    pub visits: Vec<Visit>,
    pub summary: HashMap<i64, DeviceReport>,
    pub has_more_visits: bool,
    /// Offset to pass back in to continue the scan without skipping or
    /// double-counting a visit.
    pub query_offset: usize,
    pub total_recordings: usize,
    pub num_recordings: usize,
    pub num_visits: usize,
}

// ===== WINDOWED FETCH LOOP =====

/// Reconstructs visits by growing the query window until enough complete
/// visits exist or the source is exhausted. Fetch failures propagate
/// unmodified; a partial result is never returned on error.
pub async fn query_visits<S: RecordingSource>(
    source: &mut S,
    filter: &RecordingFilter,
    config: &VisitQueryConfig,
    params: &VisitQueryParams,
) -> Result<VisitQueryResult> {
    let request_visits = config.request_visits.min(MAX_VISIT_RESULTS);
    let mut summary = DeviceSummary::new(config.visit_interval);
    let mut cursor = params.offset.unwrap_or(0);
    let mut total_count: Option<usize> = None;
    let mut got_all = false;
    let mut remaining = request_visits;
    let mut num_recordings = 0usize;

    while !got_all && remaining > 0 {
        if params.cancel.as_ref().map_or(false, |c| c.is_cancelled()) {
            info!(cursor, "visit query cancelled, keeping visits gathered so far");
            break;
        }
        let limit = (remaining * 2).min(config.query_max);
        let page = source
            .fetch_recordings(filter, cursor, limit, total_count.is_none())
            .await?;
        if total_count.is_none() {
            total_count = page.count;
        }
        if page.rows.is_empty() {
            if total_count.map_or(false, |count| cursor < count) {
                warn!(
                    cursor,
                    count = total_count.unwrap(),
                    "source returned no rows before reaching its declared count, treating as end of data"
                );
            }
            got_all = true;
            break;
        }
        let fetched = page.rows.len();
        got_all = total_count.map_or(false, |count| cursor + fetched >= count);
        summary.generate_visits(&page.rows, cursor);
        if !got_all {
            summary.check_for_complete_visits();
        }
        remaining = request_visits.saturating_sub(summary.complete_visits_count());
        cursor += fetched;
        num_recordings += fetched;
        debug!(
            fetched,
            cursor, remaining, got_all, "processed recording window"
        );
    }

    if got_all {
        summary.mark_completed();
    } else {
        summary.remove_incomplete_visits();
    }
    let resume_offset = summary.earliest_incomplete_offset();
    let mut visits = summary.complete_visits();

    if !visits.is_empty() {
        if let Some(range) = audio_bait::search_range(&visits, config.audio_bait_window) {
            let events = source.fetch_audio_events(&range).await?;
            audio_bait::assign_events(&mut visits, events, config.audio_bait_window);
            let file_ids = audio_bait::referenced_file_ids(&visits);
            if !file_ids.is_empty() {
                let names = source.lookup_files(&file_ids).await?;
                audio_bait::apply_file_names(&mut visits, &names);
            }
        }
    }

    visits.sort_by(|a, b| b.start.cmp(&a.start));

    let query_offset = resume_offset.unwrap_or_else(|| {
        visits
            .iter()
            .map(|v| v.query_offset + 1)
            .max()
            .unwrap_or(cursor)
    });
    let summary_map = DeviceSummary::device_reports(&visits);
    let num_visits = visits.len();
    info!(
        num_visits,
        num_recordings,
        has_more = !got_all,
        "visit query finished"
    );

    Ok(VisitQueryResult {
        summary: summary_map,
        has_more_visits: !got_all,
        query_offset,
        total_recordings: total_count.unwrap_or(num_recordings),
        num_recordings,
        num_visits,
        visits,
    })
}
