use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use twittermap_client::{MemoryChannel, Session};
use twittermap_common::{Config, GeoId, Granularity, QueryParameters, TimeBin, TimeInterval, DEFAULT_STATE_IDS};

#[derive(Parser)]
#[command(
    name = "twittermap-replay",
    about = "Issue one query against an in-memory channel and replay recorded frames"
)]
struct Cli {
    /// Comma-separated search keywords
    #[arg(long, value_delimiter = ',')]
    keywords: Vec<String>,

    #[arg(long, default_value = "state")]
    geo_level: Granularity,

    /// Comma-separated geo ids (defaults to every state)
    #[arg(long, value_delimiter = ',')]
    geo_ids: Vec<GeoId>,

    #[arg(long, default_value = "day")]
    time_bin: TimeBin,

    /// RFC 3339 start of the window (defaults to the configured start)
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// RFC 3339 end of the window (defaults to the configured end, or now)
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// File of inbound frames, one JSON object per line (stdin when omitted)
    #[arg(long)]
    frames: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("twittermap=info".parse()?))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_summary();

    let start = cli.start.unwrap_or(config.start_date);
    let end = cli.end.or(config.end_date).unwrap_or_else(Utc::now);
    let geo_ids = if cli.geo_ids.is_empty() {
        DEFAULT_STATE_IDS.to_vec()
    } else {
        cli.geo_ids
    };
    let parameters = QueryParameters::new(TimeInterval::new(start, end))
        .with_keywords(cli.keywords)
        .with_geo(cli.geo_level, geo_ids)
        .with_time_bin(cli.time_bin);

    let (channel, mut outbound) = MemoryChannel::open();
    let session = Session::new(&config, Arc::new(channel));
    let key = session.issue_query(parameters).await?;
    info!(key = %key, "Query issued");

    while let Ok(message) = outbound.try_recv() {
        println!("{message}");
    }

    let reader: Box<dyn BufRead> = match &cli.frames {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("Cannot open frames file {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut applied = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome = session.apply_frame(&line);
        debug!(?outcome, "Frame applied");
        applied += 1;
    }
    info!(applied, cached = session.cached_len(), "Replay finished");

    println!("{}", serde_json::to_string_pretty(&session.model())?);
    Ok(())
}
