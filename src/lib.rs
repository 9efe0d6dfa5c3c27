//! Reconstruction of animal "visits" from the Sentinel recordings database:
//! an incremental windowed fetch over a paged recording store, per-device
//! stitching of recordings into visits, audio-bait matching, and a
//! chronologically interleaved report feed.

pub mod audio_bait;
pub mod client;
pub mod db_client;
pub mod engine;
pub mod models;
pub mod report;
pub mod visits;
