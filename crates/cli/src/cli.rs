//! CLI definitions for `jobhouse`.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jobhouse")]
#[command(about = "Database-backed multi-worker job queue")]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a worker until SIGINT/SIGTERM
    Work {
        /// Queue alias or identifier to serve (repeatable)
        #[arg(short, long = "queue", default_value = "default")]
        queues: Vec<String>,
    },

    /// Evict stale workers, reset stuck jobs and rotate old jobs
    Clean,

    /// Serve the HTTP read API
    Serve {
        /// Listen address, overrides JOBHOUSE_BIND
        #[arg(long)]
        bind: Option<String>,
    },

    /// Create the queue tables if missing
    Migrate,
}
