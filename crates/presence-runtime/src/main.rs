//! presence: BLE beacon proximity presence engine.
//!
//! Reads iBeacon advertisements, tracks per-device presence and writes
//! `client_in` / `client_out` / `update_nearby` messages to stdout as NDJSON.
//! Logs go to stderr.

use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use presence_events::{CategoryLookup, StaticCategoryMap};
use presence_source_ibeacon::{NdjsonSource, RawAdvertisement};

mod cli;
mod run_loop;
mod sink;

/// How long shutdown waits for a blocked advertisement read.
const BLOCKING_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("PRESENCE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let mut config = cli::load_config(args.config.as_deref())?;

    match args.command {
        cli::Command::Run(opts) => {
            if let Some(id) = opts.collection_point_id {
                config.collection_point_id = id;
            }
            let category = match opts.categories {
                Some(path) => {
                    let map = StaticCategoryMap::load(&path)
                        .with_context(|| format!("loading categories from {}", path.display()))?;
                    tracing::info!(entries = map.len(), "category map loaded");
                    Some(Arc::new(map) as Arc<dyn CategoryLookup>)
                }
                None => None,
            };

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(async {
                let stdout = tokio::io::stdout();
                if opts.input == "-" {
                    let source = NdjsonSource::new(BufReader::new(std::io::stdin()));
                    run_loop::run(config, source, category, stdout, run_loop::shutdown_signal())
                        .await
                } else {
                    let file = std::fs::File::open(&opts.input)
                        .with_context(|| format!("opening input {}", opts.input))?;
                    let source = NdjsonSource::new(BufReader::new(file));
                    run_loop::run(config, source, category, stdout, run_loop::shutdown_signal())
                        .await
                }
            });
            runtime.shutdown_timeout(BLOCKING_SHUTDOWN_GRACE);
            let summary = result?;
            tracing::info!(
                new_events = summary.audit.new_events,
                remove_events = summary.audit.remove_events,
                messages_written = summary.messages_written,
                stopped = ?summary.stopped,
                "presence engine stopped"
            );
        }
        cli::Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        cli::Command::Decode(opts) => {
            let adv = RawAdvertisement {
                sender: opts.sender,
                rssi: opts.rssi,
                data: opts.data,
                timestamp: None,
            };
            match presence_source_ibeacon::decode(&adv, &config, Utc::now())? {
                Some(sample) => println!("{}", serde_json::to_string_pretty(&sample)?),
                None => {
                    eprintln!("advertisement outside the configured major/minor window");
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
