use anyhow::{anyhow, Result};
use tracing::info;

use crate::db_client::{DatabaseConfig, SentinelDbClient};
use crate::engine::{query_visits, VisitQueryConfig, VisitQueryParams, VisitQueryResult};
use crate::models::RecordingFilter;
use crate::report::{report_rows, ReportRow};

// ===== CLIENT IMPLEMENTATION =====

/// High-level entry point: owns the database connection and the visit
/// policy configuration, and runs visit queries against it.
#[derive(Debug)]
pub struct SentinelClient {
    pub api_key: String,
    pub config: VisitQueryConfig,
    db_client: Option<SentinelDbClient>,
}

impl SentinelClient {
    /// Creates a new SentinelClient instance.
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            api_key,
            config: VisitQueryConfig::default(),
            db_client: None,
        })
    }

    pub fn with_config(mut self, config: VisitQueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the database client from the environment and connects it.
    pub fn connect(&mut self) -> Result<()> {
        let db_config = DatabaseConfig::from_env_with_api_key(Some(self.api_key.clone()))?;
        let mut db_client = SentinelDbClient::new(db_config);
        db_client.connect()?;
        self.db_client = Some(db_client);
        info!("connected to recordings database");
        Ok(())
    }

    /// Gets the database client, ensuring it's available
    fn get_db_client(&mut self) -> Result<&mut SentinelDbClient> {
        self.db_client
            .as_mut()
            .ok_or_else(|| anyhow!("Database client not initialized. Call connect() first."))
    }

    pub fn is_connected(&self) -> bool {
        self.db_client.is_some()
    }

    /// Reconstructs visits for the filtered recordings. Pass the returned
    /// `query_offset` back in `params` to continue a partial scan.
    pub async fn query_visits(
        &mut self,
        filter: &RecordingFilter,
        params: &VisitQueryParams,
    ) -> Result<VisitQueryResult> {
        let config = self.config.clone();
        let db_client = self.get_db_client()?;
        query_visits(db_client, filter, &config, params).await
    }

    /// Runs a visit query and expands the result into report rows.
    pub async fn visit_report(
        &mut self,
        filter: &RecordingFilter,
        params: &VisitQueryParams,
    ) -> Result<(VisitQueryResult, Vec<ReportRow>)> {
        let result = self.query_visits(filter, params).await?;
        let rows = report_rows(&result.visits);
        Ok((result, rows))
    }
}
