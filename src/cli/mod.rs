//! CLI module for Oppsum.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Oppsum - Transcript Summarization
///
/// A job-based map-reduce summarizer that turns long timestamped transcripts
/// into structured, timestamp-anchored summaries. The name comes from the
/// Norwegian "oppsummere," to summarize.
#[derive(Parser, Debug)]
#[command(name = "oppsum")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize Oppsum and verify configuration
    Init,

    /// Summarize a transcript file (.json or .srt)
    Summarize {
        /// Path to the transcript file
        input: String,

        /// Language hint for the summarization prompts
        #[arg(short, long)]
        language: Option<String>,

        /// Token budget per chunk
        #[arg(short, long)]
        budget: Option<usize>,

        /// Model for the map stage
        #[arg(long)]
        map_model: Option<String>,

        /// Model for the reduce stage
        #[arg(long)]
        reduce_model: Option<String>,

        /// Write the full artifact set as JSON to a file instead of printing
        #[arg(short, long)]
        output: Option<String>,

        /// Skip the persistent cache for this run
        #[arg(long)]
        no_cache: bool,
    },

    /// Inspect or clean the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP API server (submit/status/result/cancel/events)
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,

    /// Delete expired cache entries
    Purge,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
