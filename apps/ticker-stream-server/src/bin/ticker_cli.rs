//! Ticker CLI
//!
//! Thin client for manual checks against a running server.
//!
//! Usage:
//!   # Print every live batch (decoded) as it arrives:
//!   cargo run --bin ticker-cli -- tail --url ws://localhost:8080/ws
//!
//!   # Only BTCUSDT, stop after 10 frames:
//!   cargo run --bin ticker-cli -- tail --symbol BTCUSDT --frames 10
//!
//!   # Range query:
//!   cargo run --bin ticker-cli -- search --coin BTCUSDT \
//!       --start 2024-01-15T00:00:00Z --end 2024-01-15T01:00:00Z

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::json;
use ticker_stream_server::{CompressionCodec, TickRecord};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(name = "ticker-cli")]
#[command(about = "Subscribe to and query a ticker stream server")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode and print the live subscriber stream
    Tail {
        /// Subscriber WebSocket URL
        #[arg(long, env = "TICKER_WS_URL", default_value = "ws://localhost:8080/ws")]
        url: String,

        /// Only print records for this trading pair
        #[arg(long)]
        symbol: Option<String>,

        /// Stop after this many frames (0 = run until closed)
        #[arg(long, default_value = "0")]
        frames: u64,
    },

    /// Run a historical range query
    Search {
        /// API base URL
        #[arg(long, env = "TICKER_API_URL", default_value = "http://localhost:8080")]
        url: String,

        /// Trading pair, e.g. BTCUSDT
        #[arg(long)]
        coin: String,

        /// Range start (RFC 3339)
        #[arg(long)]
        start: String,

        /// Range end (RFC 3339)
        #[arg(long)]
        end: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ticker_cli=info")),
        )
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let args = Args::parse();

    match args.command {
        Commands::Tail {
            url,
            symbol,
            frames,
        } => tail(&url, symbol.as_deref(), frames).await,
        Commands::Search {
            url,
            coin,
            start,
            end,
        } => search(&url, &coin, &start, &end).await,
    }
}

async fn tail(url: &str, symbol: Option<&str>, max_frames: u64) -> Result<()> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    tracing::info!(url, "Subscribed");

    let codec = CompressionCodec::new();
    let mut received = 0u64;

    while let Some(message) = ws.next().await {
        let data = match message.context("subscriber stream failed")? {
            Message::Binary(data) => data,
            Message::Close(frame) => {
                tracing::info!(?frame, "Server closed the stream");
                break;
            }
            _ => continue,
        };

        received += 1;
        let records: Vec<TickRecord> = match codec.decode(&data) {
            Ok(records) => records,
            Err(e) => {
                // A bad frame is reported and skipped; the stream continues.
                tracing::warn!(error = %e, bytes = data.len(), "Dropping undecodable frame");
                continue;
            }
        };

        let shown: Vec<&TickRecord> = records
            .iter()
            .filter(|r| symbol.is_none_or(|s| r.trading_pair == s))
            .collect();
        tracing::info!(frame = received, records = records.len(), shown = shown.len(), "Batch");
        for record in shown {
            println!("{}", serde_json::to_string(record)?);
        }

        if max_frames > 0 && received >= max_frames {
            break;
        }
    }

    Ok(())
}

async fn search(base_url: &str, coin: &str, start: &str, end: &str) -> Result<()> {
    let endpoint = format!("{}/api/searchCoinData", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&endpoint)
        .json(&json!({ "startDate": start, "endDate": end, "coinName": coin }))
        .send()
        .await
        .with_context(|| format!("request to {endpoint} failed"))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("response body is not JSON")?;

    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("search failed with HTTP {status}");
    }
    if let Some(records) = body.get("data").and_then(serde_json::Value::as_array) {
        tracing::info!(coin, records = records.len(), "Search complete");
    }
    Ok(())
}
