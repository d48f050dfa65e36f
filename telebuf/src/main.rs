//! telebuf - CLI for the client-side telemetry buffer
//!
//! This tool provides commands for:
//! - Checking collector configuration and the envelopes waiting on disk
//! - Flushing envelopes left behind by earlier runs
//! - Sending a demo session through the full pipeline
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/telebuf/config.toml (~/.config/telebuf/config.toml)
//! - Outbox: $XDG_DATA_HOME/telebuf/outbox/ (~/.local/share/telebuf/outbox/)
//! - Logs: $XDG_STATE_HOME/telebuf/ (~/.local/state/telebuf/)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map};
use telebuf_core::storage::{DataStorage, FileStorage};
use telebuf_core::{device, CollectorConfig, Config, DeliveryStats, Tracker, UploadRecord};

#[derive(Parser)]
#[command(name = "telebuf")]
#[command(about = "Buffer and deliver client-side telemetry")]
#[command(version)]
struct Args {
    /// Verbose output (writes logs to the XDG state directory)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show collector configuration and pending envelopes
    Status,

    /// Deliver envelopes left in the outbox by earlier runs
    Flush {
        /// How long to wait for delivery before giving up
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },

    /// Track a demo session and deliver it
    Demo {
        /// Number of events to track
        #[arg(short, long, default_value_t = 5)]
        events: usize,

        /// How long to wait for delivery before giving up
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Keep the guard alive until exit so buffered log lines are flushed
    let _log_guard = if args.verbose || config.logging.enabled {
        Some(telebuf_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Flush { timeout_ms } => cmd_flush(&config, Duration::from_millis(timeout_ms)),
        Command::Demo { events, timeout_ms } => {
            cmd_demo(&config, events, Duration::from_millis(timeout_ms))
        }
    }
}

/// Outbox used by the CLI: the configured storage dir or the XDG default
fn outbox_dir(collector: &CollectorConfig) -> PathBuf {
    collector
        .storage_dir
        .clone()
        .unwrap_or_else(Config::default_storage_dir)
}

/// Collector config with file storage pointed at the outbox
fn outbox_config(config: &Config) -> CollectorConfig {
    CollectorConfig {
        storage_dir: Some(outbox_dir(&config.collector)),
        ..config.collector.clone()
    }
}

fn pending_envelopes(collector: &CollectorConfig) -> Result<usize> {
    let dir = outbox_dir(collector);
    if !dir.exists() {
        return Ok(0);
    }
    let storage = FileStorage::open(&dir, collector.max_storage_records)
        .with_context(|| format!("failed to open outbox {}", dir.display()))?;
    Ok(storage.pending_count())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("telebuf Collector Configuration");
    println!("===============================");
    println!();

    let collector = &config.collector;

    println!(
        "Host:            {}",
        collector.api_host.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Port:            {}",
        collector
            .api_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "<not set>".to_string())
    );
    println!("Path:            {}", collector.api_path);
    println!(
        "App Key:         {}",
        if collector.app_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Platform:        {}", collector.platform);
    println!("Max Send Size:   {}", collector.max_send_size);
    println!("Flush Interval:  {}ms", collector.flush_interval_ms);
    println!("Max Stored:      {}", collector.max_storage_records);
    println!("Outbox:          {}", outbox_dir(collector).display());

    println!();
    match collector.endpoint_url() {
        Ok(url) => println!("Status: Ready to deliver to {}", url),
        Err(e) => {
            println!("Status: Not ready ({})", e);
            println!();
            println!("Configure the collector in {}:", Config::config_path().display());
            println!();
            println!("  [collector]");
            println!("  api_host = \"collector.example.com\"");
            println!("  api_port = 8081");
            println!("  app_key = \"your-app-key\"");
        }
    }

    println!();
    println!("Pending Envelopes: {}", pending_envelopes(collector)?);

    Ok(())
}

fn cmd_flush(config: &Config, timeout: Duration) -> Result<()> {
    if !config.collector.is_ready() {
        println!("Collector is not configured. Run 'status' for details.");
        return Ok(());
    }

    let pending = pending_envelopes(&config.collector)?;
    if pending == 0 {
        println!("No pending envelopes to flush.");
        return Ok(());
    }

    println!("Flushing {} pending envelope(s)...", pending);

    // Starting a tracker runs one tick; stopping it runs the final one
    let tracker = Tracker::new(outbox_config(config)).context("failed to start tracker")?;
    let stopped = tracker.stop(Some(timeout));
    let stats = tracker.stats();

    println!();
    if stats.envelopes_delivered > 0 {
        println!("Delivered {} envelope(s)", stats.envelopes_delivered);
    } else {
        println!("No envelopes delivered");
    }
    if !stopped {
        println!("Timed out after {}ms; delivery may still be in progress", timeout.as_millis());
    }
    println!("Remaining: {}", stats.pending);

    Ok(())
}

fn cmd_demo(config: &Config, events: usize, timeout: Duration) -> Result<()> {
    if !config.collector.is_ready() {
        println!("Collector is not configured. Run 'status' for details.");
        return Ok(());
    }

    let tracker = Tracker::new(outbox_config(config)).context("failed to start tracker")?;
    tracing::info!(events, device_id = %tracker.device_id(), "Running demo session");

    tracker.identify(UploadRecord::user("demo-user"));
    tracker.platform(device::platform_snapshot());
    tracker.start_session();

    let mut common = Map::new();
    common.insert("demo".to_string(), json!(true));
    tracker.set_common_custom_properties(common);

    for index in 0..events {
        let mut event = UploadRecord::event("demo_event");
        event.add_custom_property("index", index);
        tracker.track(event);
    }

    let timed = tracker.start_track(UploadRecord::event("demo_timed"));
    tracker.end_track(timed);
    tracker.stop_session();

    let stopped = tracker.stop(Some(timeout));

    println!("Demo session tracked");
    println!("  Device ID:  {}", tracker.device_id());
    println!("  Events:     {}", events + 1);
    print_stats(&tracker.stats());
    if !stopped {
        println!();
        println!("Timed out after {}ms; delivery may still be in progress", timeout.as_millis());
    }

    Ok(())
}

fn print_stats(stats: &DeliveryStats) {
    println!();
    println!("Stats:");
    println!("  Records:    {}", stats.records_drained);
    println!("  Envelopes:  {}", stats.envelopes_built);
    println!("  Delivered:  {}", stats.envelopes_delivered);
    println!("  Failures:   {}", stats.delivery_failures);
    println!("  Pending:    {}", stats.pending);
}
