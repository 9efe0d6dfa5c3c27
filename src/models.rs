use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingType {
    ThermalRaw,
    Audio,
}

impl From<&str> for RecordingType {
    fn from(s: &str) -> Self {
        match s {
            "thermalRaw" => RecordingType::ThermalRaw,
            "audio" => RecordingType::Audio,
            _ => RecordingType::ThermalRaw,
        }
    }
}

// ===== RECORDINGS =====

/// One motion-triggered capture as served by the recordings view: device and
/// group names are flattened onto the row, tracks embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: i64,
    pub device_id: i64,
    pub device_name: String,
    pub group_id: i64,
    pub group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<i64>,
    pub recording_date_time: DateTime<Utc>,
    pub duration: f64,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Recording {
    pub fn new(
        id: i64,
        device_id: i64,
        device_name: &str,
        group_id: i64,
        group_name: &str,
        recording_date_time: DateTime<Utc>,
        duration: f64,
    ) -> Self {
        Self {
            id,
            device_id,
            device_name: device_name.to_string(),
            group_id,
            group_name: group_name.to_string(),
            station_id: None,
            recording_date_time,
            duration,
            tracks: Vec::new(),
        }
    }

    pub fn with_station(mut self, station_id: i64) -> Self {
        self.station_id = Some(station_id);
        self
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }
}

/// A motion track within a recording; start/end are offsets in seconds from
/// the start of the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<TrackTag>,
}

impl Track {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            start: None,
            end: None,
            tag: None,
        }
    }

    pub fn with_span(mut self, start: f64, end: f64) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_tag(mut self, tag: TrackTag) -> Self {
        self.tag = Some(tag);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTag {
    pub what: String,
    pub automatic: bool,
    pub confidence: f64,
}

impl TrackTag {
    pub fn new(what: &str, automatic: bool, confidence: f64) -> Self {
        Self {
            what: what.to_string(),
            automatic,
            confidence,
        }
    }
}

// ===== AUDIO BAIT =====

/// A logged playback of a lure sound at a device. The file name is resolved
/// late through the bulk file lookup and stays `None` when the id cannot be
/// resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBaitEvent {
    pub id: i64,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub file_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl AudioBaitEvent {
    pub fn new(id: i64, device_id: i64, timestamp: DateTime<Utc>, file_id: i64) -> Self {
        Self {
            id,
            device_id,
            timestamp,
            file_id,
            volume: None,
            file_name: None,
        }
    }

    pub fn with_volume(mut self, volume: i64) -> Self {
        self.volume = Some(volume);
        self
    }
}

// ===== QUERY TYPES =====

/// Recording predicate pushed down to the source. Empty id lists mean "no
/// restriction"; access filtering happens upstream of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingFilter {
    pub device_ids: Vec<i64>,
    pub group_ids: Vec<i64>,
    pub station_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_type: Option<RecordingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl RecordingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_devices(mut self, device_ids: Vec<i64>) -> Self {
        self.device_ids = device_ids;
        self
    }

    pub fn for_groups(mut self, group_ids: Vec<i64>) -> Self {
        self.group_ids = group_ids;
        self
    }

    pub fn for_stations(mut self, station_ids: Vec<i64>) -> Self {
        self.station_ids = station_ids;
        self
    }

    pub fn with_type(mut self, recording_type: RecordingType) -> Self {
        self.recording_type = Some(recording_type);
        self
    }

    pub fn with_range(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }
}

/// Inclusive time range used for the audio-bait event fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// One window of recordings from the source. `count` is only populated when
/// the fetch asked for it (first iteration of the engine loop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingPage {
    pub rows: Vec<Recording>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}
