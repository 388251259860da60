use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::core::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "autotriage",
    version,
    about = "Rule-based alert triage with a safety-gated remediation executor"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Policy file (TOML). Default: config/autotriage.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (debug, trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also append logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the detectors over a batch file and print the alerts
    Detect {
        /// JSON batch `{ "logs": [...], "profile": {...} }` or an array of them
        #[arg(long)]
        input: PathBuf,
        /// Output format for --output
        #[arg(long, value_enum, default_value = "jsonl")]
        format: FormatArg,
        /// Write alerts to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Detect, assess, synthesize and gate actions (dry run unless --execute)
    Triage {
        /// JSON batch `{ "logs": [...], "profile": {...} }` or an array of them
        #[arg(long)]
        input: PathBuf,
        /// Dispatch approved actions instead of a dry run
        #[arg(long)]
        execute: bool,
        /// Post escalations to this webhook
        #[arg(long)]
        webhook_url: Option<String>,
        /// Webhook request timeout
        #[arg(long, default_value_t = 5000)]
        webhook_timeout_ms: u64,
        /// Append investigations to this JSONL file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate the policy file and print the effective policy
    CheckConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FormatArg {
    Jsonl,
    Md,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Jsonl => OutputFormat::Jsonl,
            FormatArg::Md => OutputFormat::Markdown,
        }
    }
}
