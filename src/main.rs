use std::sync::Mutex;
use std::{fs, path::Path};

use anyhow::Result;
use autotriage::cli::{commands, flags::Cli};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;
    commands::run(cli).await
}

fn init_tracing(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Stdout carries the JSON results; logs go to stderr.
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file_layer = match log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            if let Ok(meta) = fs::metadata(log_path) {
                if meta.len() > 1_000_000 {
                    let rotated = log_path.with_extension("log.1");
                    let _ = fs::rename(log_path, rotated);
                }
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
