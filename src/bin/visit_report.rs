use clap::Parser;
use std::env;

use sentinel_rs::client::SentinelClient;
use sentinel_rs::engine::{VisitQueryConfig, VisitQueryParams};
use sentinel_rs::models::{RecordingFilter, RecordingType};
use sentinel_rs::report::REPORT_HEADER;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reconstruct animal visits and export the visit report", long_about = None)]
struct Args {
    /// Group IDs to include (repeatable)
    #[arg(long = "group_id")]
    group_ids: Vec<i64>,

    /// Device IDs to include (repeatable)
    #[arg(long = "device_id")]
    device_ids: Vec<i64>,

    /// Station IDs to include (repeatable)
    #[arg(long = "station_id")]
    station_ids: Vec<i64>,

    /// Recording type: thermalRaw or audio
    #[arg(long = "recording_type")]
    recording_type: Option<String>,

    /// Maximum number of complete visits to return
    #[arg(long, default_value = "100")]
    limit: usize,

    /// Scan offset returned by a previous run (resumes the scan)
    #[arg(long)]
    offset: Option<usize>,

    /// Maximum gap between recordings of one visit, in minutes
    #[arg(long = "visit_interval_mins", default_value = "10")]
    visit_interval_mins: i64,

    /// API Key (or set SENTINEL_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Output format: json or csv
    #[arg(long, default_value = "json")]
    format: String,

    /// Server URL used for recording links in the report
    #[arg(long, default_value = "https://browse.sentinelworks.nz")]
    server_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

// Example usage:
// cargo run --bin visit_report -- --group_id 12 --limit 50 --format csv
// cargo run --bin visit_report -- --device_id 7 --device_id 9 --offset 340

fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| csv_field(c))
        .collect::<Vec<_>>()
        .join(",")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(format!("sentinel_rs={}", args.log_level))
        .init();

    // Get API key from args or environment
    let api_key = args.api_key.unwrap_or_else(|| {
        env::var("SENTINEL_API_KEY")
            .expect("SENTINEL_API_KEY environment variable not set or --api-key not provided")
    });

    let mut filter = RecordingFilter::new()
        .for_groups(args.group_ids)
        .for_devices(args.device_ids)
        .for_stations(args.station_ids);
    if let Some(recording_type) = &args.recording_type {
        filter = filter.with_type(RecordingType::from(recording_type.as_str()));
    }

    let config = VisitQueryConfig::default()
        .with_request_visits(args.limit)
        .with_visit_interval(chrono::Duration::minutes(args.visit_interval_mins));

    let mut client = SentinelClient::new(api_key)?.with_config(config);
    client.connect()?;

    let params = match args.offset {
        Some(offset) => VisitQueryParams::from_offset(offset),
        None => VisitQueryParams::default(),
    };

    let (result, rows) = client.visit_report(&filter, &params).await?;
    info!(
        "scanned {} recordings into {} visits",
        result.num_recordings, result.num_visits
    );

    match args.format.as_str() {
        "csv" => {
            println!("{}", REPORT_HEADER.join(","));
            for row in &rows {
                println!("{}", csv_line(&row.to_columns(&args.server_url)));
            }
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        other => {
            eprintln!("Unknown format: {} (expected json or csv)", other);
            std::process::exit(1);
        }
    }

    if result.has_more_visits {
        eprintln!(
            "More visits available; re-run with --offset {}",
            result.query_offset
        );
    }

    Ok(())
}
