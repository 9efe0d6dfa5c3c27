use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use postgrest::Postgrest;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::engine::RecordingSource;
use crate::models::{AudioBaitEvent, Recording, RecordingFilter, RecordingPage, TimeRange};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub rest_url: String,
    pub sentinel_api_key: String,
    pub anon_api_key: String,
}

impl DatabaseConfig {
    /// Creates a new database config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_api_key(None)
    }

    /// Creates a new database config from environment variables with an optional Sentinel API key
    pub fn from_env_with_api_key(sentinel_api_key: Option<String>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut rest_url = std::env::var("SENTINEL_DATABASE_REST_URL")
            .map_err(|_| anyhow!("SENTINEL_DATABASE_REST_URL environment variable is required"))?;

        Url::parse(&rest_url)
            .map_err(|e| anyhow!("SENTINEL_DATABASE_REST_URL is not a valid URL: {}", e))?;

        // Ensure the URL has the correct PostgREST path
        if !rest_url.ends_with("/rest/v1") {
            if rest_url.ends_with('/') {
                rest_url.push_str("rest/v1");
            } else {
                rest_url.push_str("/rest/v1");
            }
        }

        let sentinel_api_key = match sentinel_api_key {
            Some(key) => key,
            None => std::env::var("SENTINEL_API_KEY")
                .map_err(|_| anyhow!("SENTINEL_API_KEY environment variable is required"))?,
        };

        let anon_api_key = std::env::var("SENTINEL_PUBLIC_API_KEY").map_err(|_| {
            anyhow!("SENTINEL_PUBLIC_API_KEY environment variable is required for PostgREST access")
        })?;

        Ok(DatabaseConfig {
            rest_url,
            sentinel_api_key,
            anon_api_key,
        })
    }

    pub fn get_rest_url(&self) -> &str {
        &self.rest_url
    }
}

/// PostgREST row shape for the bulk audio-file name lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    id: i64,
    name: String,
}

pub struct SentinelDbClient {
    config: DatabaseConfig,
    client: Option<Postgrest>,
}

impl std::fmt::Debug for SentinelDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelDbClient")
            .field("config", &self.config)
            .field(
                "client",
                if self.client.is_some() {
                    &"Connected"
                } else {
                    &"Disconnected"
                },
            )
            .finish()
    }
}

impl SentinelDbClient {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Establishes a connection to the database via PostgREST
    pub fn connect(&mut self) -> Result<()> {
        let client = Postgrest::new(self.config.get_rest_url())
            .insert_header("apikey", &self.config.anon_api_key)
            .insert_header("api_key", &self.config.sentinel_api_key);

        self.client = Some(client);

        Ok(())
    }

    /// Gets the PostgREST client, ensuring connection is established
    pub fn get_client(&mut self) -> Result<&Postgrest> {
        if self.client.is_none() {
            self.connect()?;
        }

        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("No PostgREST client available"))
    }

    /// Closes the database connection
    pub fn disconnect(&mut self) {
        if self.client.is_some() {
            self.client = None;
        }
    }

    fn parse_rows<T>(body: &str) -> Result<Vec<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        // Try to parse as the expected type first
        if let Ok(results) = serde_json::from_str::<Vec<T>>(body) {
            Ok(results)
        } else {
            // If that fails, try to parse as an error response
            if let Ok(error_response) = serde_json::from_str::<serde_json::Value>(body) {
                if let Some(error_msg) = error_response.get("error") {
                    Err(anyhow!("Database error: {}", error_msg))
                } else if let Some(message) = error_response.get("message") {
                    Err(anyhow!("Database message: {}", message))
                } else {
                    Err(anyhow!("Database returned unexpected format: {}", body))
                }
            } else {
                Err(anyhow!("Failed to parse database response as JSON: {}", body))
            }
        }
    }

    /// Total row count from a PostgREST Content-Range header ("0-24/3573").
    fn parse_content_range(response: &reqwest::Response) -> Option<usize> {
        let header = response.headers().get(reqwest::header::CONTENT_RANGE)?;
        let text = header.to_str().ok()?;
        text.rsplit('/').next()?.parse().ok()
    }
}

impl RecordingSource for SentinelDbClient {
    async fn fetch_recordings(
        &mut self,
        filter: &RecordingFilter,
        offset: usize,
        limit: usize,
        want_count: bool,
    ) -> Result<RecordingPage> {
        let client = self.get_client()?;

        let mut builder = client
            .from("recordings_pretty")
            .select("*, tracks(*)")
            .order("recording_date_time.desc,id.desc");
        if !filter.device_ids.is_empty() {
            let ids: Vec<String> = filter.device_ids.iter().map(|id| id.to_string()).collect();
            builder = builder.in_("device_id", ids);
        }
        if !filter.group_ids.is_empty() {
            let ids: Vec<String> = filter.group_ids.iter().map(|id| id.to_string()).collect();
            builder = builder.in_("group_id", ids);
        }
        if !filter.station_ids.is_empty() {
            let ids: Vec<String> = filter.station_ids.iter().map(|id| id.to_string()).collect();
            builder = builder.in_("station_id", ids);
        }
        if let Some(recording_type) = filter.recording_type {
            let type_str = serde_json::to_value(recording_type)?
                .as_str()
                .unwrap_or("thermalRaw")
                .to_string();
            builder = builder.eq("type", type_str);
        }
        if let Some(from) = filter.from {
            builder = builder.gte("recording_date_time", from.to_rfc3339());
        }
        if let Some(until) = filter.until {
            builder = builder.lte("recording_date_time", until.to_rfc3339());
        }
        builder = builder.range(offset, offset + limit.saturating_sub(1));
        if want_count {
            builder = builder.exact_count();
        }

        let response = builder.execute().await?;
        let count = if want_count {
            Self::parse_content_range(&response)
        } else {
            None
        };
        let body = response.text().await?;
        let rows: Vec<Recording> = Self::parse_rows(&body)?;
        debug!(offset, limit, fetched = rows.len(), "fetched recording window");

        Ok(RecordingPage { rows, count })
    }

    async fn fetch_audio_events(&mut self, range: &TimeRange) -> Result<Vec<AudioBaitEvent>> {
        let client = self.get_client()?;

        let response = client
            .from("audio_events")
            .select("*")
            .gte("timestamp", range.start.to_rfc3339())
            .lte("timestamp", range.end.to_rfc3339())
            .order("timestamp.desc")
            .execute()
            .await?;

        let body = response.text().await?;
        Self::parse_rows(&body)
    }

    async fn lookup_files(&mut self, ids: &HashSet<i64>) -> Result<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let client = self.get_client()?;

        let id_list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let response = client
            .from("files")
            .select("id, name")
            .in_("id", id_list)
            .execute()
            .await?;

        let body = response.text().await?;
        let files: Vec<FileRecord> = Self::parse_rows(&body)?;
        Ok(files.into_iter().map(|f| (f.id, f.name)).collect())
    }
}

impl Drop for SentinelDbClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
