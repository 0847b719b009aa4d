use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "omni-dispatch")]
#[command(about = "Run jobs on pooled worker processes with per-job concurrency limits.")]
pub(crate) struct Cli {
    /// Extra settings file layered over the system and user settings.
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Debug logging (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Submit a job one or more times and print each result as a JSON line.
    Run {
        /// Job name; requests with the same name share workers and a concurrency limit.
        #[arg(long)]
        job_name: String,

        /// Path of the job executable (run through `worker.program` when set).
        #[arg(long)]
        job_path: String,

        /// JSON arguments passed with every submission.
        #[arg(long, default_value = "{}")]
        args: String,

        /// Number of submissions.
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Override `pool.concurrency`.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the effective settings as YAML.
    Config,
}
