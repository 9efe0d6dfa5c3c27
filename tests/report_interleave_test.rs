use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;

use sentinel_rs::audio_bait;
use sentinel_rs::models::AudioBaitEvent;
use sentinel_rs::report::{report_rows, visit_rows, ReportRow, REPORT_HEADER};
use sentinel_rs::visits::{Visit, VisitEvent};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 14, 12, 0, 0).unwrap()
}

fn at(minutes: i64) -> DateTime<Utc> {
    base() + Duration::minutes(minutes)
}

fn event(recording_id: i64, minutes: i64) -> VisitEvent {
    VisitEvent {
        recording_id,
        track_id: Some(recording_id * 10),
        start: at(minutes),
        end: at(minutes) + Duration::seconds(30),
        confidence: 0.8,
        what: Some("possum".to_string()),
        automatic: true,
    }
}

fn bait(id: i64, device_id: i64, minutes: i64) -> AudioBaitEvent {
    AudioBaitEvent::new(id, device_id, at(minutes), 900)
}

/// A finished visit over the given event minutes (newest first).
fn visit(id: u32, device_id: i64, event_minutes: &[i64]) -> Visit {
    let events: Vec<VisitEvent> = event_minutes
        .iter()
        .enumerate()
        .map(|(i, &m)| event(id as i64 * 100 + i as i64, m))
        .collect();
    let start = events.iter().map(|e| e.start).min().unwrap();
    let end = events.iter().map(|e| e.start).max().unwrap();
    Visit {
        id,
        device_id,
        device_name: format!("camera-{}", device_id),
        group_name: "possum-watch".to_string(),
        station_id: None,
        start,
        end,
        events,
        audio_bait_events: Vec::new(),
        assumed_tag: Some("possum".to_string()),
        query_offset: 0,
        first_offset: 0,
        complete: true,
    }
}

#[test]
fn bait_row_lands_between_the_events_around_it() {
    // events at t=10 and t=0, bait at t=5: the feed must read
    // event(10), bait(5), event(0)
    let mut v = visit(1, 1, &[10, 0]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, 5)],
        Duration::days(1),
    );
    let rows = visit_rows(&v);

    assert_eq!(rows.len(), 4);
    assert!(matches!(rows[0], ReportRow::Visit { .. }));
    assert!(matches!(rows[1], ReportRow::Event { start, .. } if start == at(10)));
    assert!(matches!(rows[2], ReportRow::AudioBait { timestamp, .. } if timestamp == at(5)));
    assert!(matches!(rows[3], ReportRow::Event { start, .. } if start == at(0)));
}

#[test]
fn rows_are_monotonically_non_increasing_in_time() {
    let mut v = visit(1, 1, &[30, 22, 15, 3, 0]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![
            bait(1, 1, 25),
            bait(2, 1, 16),
            bait(3, 1, 1),
            bait(4, 1, -4),
        ],
        Duration::days(1),
    );
    let rows = visit_rows(&v);

    assert_eq!(rows.len(), 1 + 5 + 4);
    for pair in rows.windows(2) {
        assert!(
            pair[0].timestamp() >= pair[1].timestamp(),
            "rows out of order: {:?} before {:?}",
            pair[0],
            pair[1]
        );
    }
    // baits older than every event flush at the end
    assert!(matches!(rows.last().unwrap(), ReportRow::AudioBait { timestamp, .. } if *timestamp == at(-4)));
}

#[test]
fn contained_events_belong_to_exactly_one_visit() {
    let mut visits = vec![visit(1, 1, &[12, 10]), visit(2, 1, &[2, 0])];
    audio_bait::assign_events(&mut visits, vec![bait(1, 1, 11)], Duration::minutes(5));

    let contained: Vec<i64> = visits[0].audio_bait_events.iter().map(|e| e.id).collect();
    assert_eq!(contained, vec![1]);
    assert!(visits[1].audio_bait_events.is_empty());
}

#[test]
fn containment_includes_the_visit_boundaries() {
    let mut v = visit(1, 1, &[10, 0]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, 0), bait(2, 1, 10)],
        Duration::minutes(1),
    );
    let ids: Vec<i64> = v.audio_bait_events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![2, 1]);
}

#[test]
fn nearest_preceding_bait_is_kept_on_both_visits() {
    // the bait at t=5 falls inside the older visit and is also the nearest
    // play before the newer one; it is retained on both
    let mut visits = vec![visit(1, 1, &[12, 10]), visit(2, 1, &[6, 0])];
    audio_bait::assign_events(&mut visits, vec![bait(1, 1, 5)], Duration::minutes(30));

    assert_eq!(visits[0].audio_bait_events.len(), 1);
    assert_eq!(visits[1].audio_bait_events.len(), 1);
}

#[test]
fn only_the_nearest_preceding_bait_matches() {
    let mut v = visit(1, 1, &[12, 10]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, 8), bait(2, 1, 5), bait(3, 1, 2)],
        Duration::minutes(30),
    );
    let ids: Vec<i64> = v.audio_bait_events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1]);
}

#[test]
fn simultaneous_nearest_baits_are_all_retained() {
    let mut v = visit(1, 1, &[12, 10]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, 5), bait(2, 1, 5)],
        Duration::minutes(30),
    );
    assert_eq!(v.audio_bait_events.len(), 2);
}

#[test]
fn baits_outside_the_lookback_window_are_ignored() {
    let mut v = visit(1, 1, &[12, 10]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, -45)],
        Duration::minutes(30),
    );
    assert!(v.audio_bait_events.is_empty());
}

#[test]
fn other_devices_baits_never_match() {
    let mut v = visit(1, 1, &[12, 10]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 2, 11), bait(2, 3, 5)],
        Duration::minutes(30),
    );
    assert!(v.audio_bait_events.is_empty());
}

#[test]
fn file_names_resolve_through_the_bulk_lookup() {
    let mut v = visit(1, 1, &[12, 10]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, 11)],
        Duration::minutes(30),
    );
    let ids = audio_bait::referenced_file_ids(std::slice::from_ref(&v));
    assert!(ids.contains(&900));

    let names: HashMap<i64, String> = HashMap::new();
    audio_bait::apply_file_names(std::slice::from_mut(&mut v), &names);
    assert_eq!(v.audio_bait_events[0].file_name, None);

    let names: HashMap<i64, String> = [(900, "squeal.mp3".to_string())].into_iter().collect();
    audio_bait::apply_file_names(std::slice::from_mut(&mut v), &names);
    assert_eq!(v.audio_bait_events[0].file_name.as_deref(), Some("squeal.mp3"));
}

#[test]
fn columns_flatten_to_the_fixed_layout() {
    let mut v = visit(7, 1, &[10, 0]);
    audio_bait::assign_events(
        std::slice::from_mut(&mut v),
        vec![bait(1, 1, 5)],
        Duration::days(1),
    );
    let rows = visit_rows(&v);

    let visit_cols = rows[0].to_columns("https://browse.example.nz/");
    assert_eq!(visit_cols.len(), REPORT_HEADER.len());
    assert_eq!(visit_cols[0], "7");
    assert_eq!(visit_cols[3], "Visit");
    assert_eq!(visit_cols[4], "possum");
    assert_eq!(visit_cols[11], "2");
    assert_eq!(visit_cols[12], "true");

    let event_cols = rows[1].to_columns("https://browse.example.nz/");
    assert_eq!(event_cols[3], "Event");
    assert_eq!(event_cols[6], "700");
    assert_eq!(event_cols[13], "https://browse.example.nz/recording/700");

    let bait_cols = rows[2].to_columns("https://browse.example.nz/");
    assert_eq!(bait_cols[3], "Audio Bait");
    assert_eq!(bait_cols[9], "");
}

#[test]
fn full_report_walks_visits_in_their_returned_order() {
    let visits = vec![visit(1, 1, &[30]), visit(2, 2, &[10, 8])];
    let rows = report_rows(&visits);
    assert_eq!(rows.len(), 2 + 3);
    assert!(matches!(rows[0], ReportRow::Visit { visit_id: 1, .. }));
    assert!(matches!(rows[2], ReportRow::Visit { visit_id: 2, .. }));
}
