//! nodvote-replay: drive the gesture engine from an s-expression stream.
//!
//! Reads one message per line from a file or stdin, writes events and
//! responses to stdout. Logs go to stderr.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use nodvote_engine::ipc::handle_message;
use nodvote_engine::{EngineConfig, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "nodvote-replay", about = "Replay landmark frames through the nod/shake gesture engine")]
struct Cli {
    /// Message file (default: stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Pose units: landmarks or degrees
    #[arg(long, default_value = "landmarks")]
    units: String,

    /// Recognize gestures immediately instead of calibrating new subjects first
    #[arg(long)]
    no_calibration: bool,

    /// Minimum time between head gestures for one subject (ms)
    #[arg(long)]
    refractory_ms: Option<f64>,

    /// Evict subjects unseen for this long (ms)
    #[arg(long)]
    lost_timeout_ms: Option<f64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("nodvote-replay {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Logs on stderr; stdout carries protocol output only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nodvote_engine=info,nodvote_replay=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = match cli.units.as_str() {
        "landmarks" => EngineConfig::default(),
        "degrees" => EngineConfig::degrees(),
        other => anyhow::bail!("Unknown units: {other}. Use: landmarks or degrees"),
    };
    if cli.no_calibration {
        config.registry.auto_calibrate = false;
    }
    if let Some(ms) = cli.refractory_ms {
        config.head.refractory_ms = ms;
    }
    if let Some(ms) = cli.lost_timeout_ms {
        config.registry.lost_timeout_ms = ms;
    }

    let mut registry = SessionRegistry::new(config).context("invalid engine configuration")?;

    info!("nodvote-replay v{} starting", env!("CARGO_PKG_VERSION"));
    info!("units: {}", cli.units);

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut out = BufWriter::new(io::stdout().lock());

    let mut messages = 0u64;
    for line in reader.lines() {
        let line = line.context("reading input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        messages += 1;
        for response in handle_message(&mut registry, line) {
            writeln!(out, "{}", response)?;
        }
    }
    out.flush()?;

    info!(
        "Replay finished: {} messages, {} subjects still tracked",
        messages,
        registry.subject_count()
    );
    Ok(())
}
