//! omni-dispatch CLI: run jobs on pooled worker processes.
//!
//! Settings come from `packages/conf/dispatch.yaml`, the user's
//! `omni-dev-fusion/dispatch.yaml`, `--config`, then `OMNI_DISPATCH_*`.
//!
//! Logging: set `RUST_LOG=omni_dispatch=debug,omni_pool=debug` to see worker lifecycle on stderr.

mod cli;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use omni_dispatch::{
    DispatchSettings, Dispatcher, DispatcherConfig, ProcessWorkerConfig, ProcessWorkerFactory,
    load_settings,
};

use crate::cli::{Cli, Command};

#[derive(Serialize)]
struct EffectiveSettings {
    dispatcher: DispatcherConfig,
    worker: ProcessWorkerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "omni_dispatch=debug,omni_pool=debug"
        } else {
            "omni_dispatch=info,omni_pool=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let mut settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Command::Config => print_settings(&settings),
        Command::Run {
            job_name,
            job_path,
            args,
            repeat,
            concurrency,
        } => {
            if concurrency.is_some() {
                settings.pool.concurrency = concurrency;
            }
            let args: Value =
                serde_json::from_str(&args).with_context(|| format!("--args is not JSON: {args}"))?;
            run_jobs(&settings, &job_name, &job_path, &args, repeat).await
        }
    }
}

fn print_settings(settings: &DispatchSettings) -> anyhow::Result<()> {
    let effective = EffectiveSettings {
        dispatcher: settings.dispatcher_config()?,
        worker: settings.process_config(),
    };
    print!("{}", serde_yaml::to_string(&effective)?);
    Ok(())
}

async fn run_jobs(
    settings: &DispatchSettings,
    job_name: &str,
    job_path: &str,
    args: &Value,
    repeat: usize,
) -> anyhow::Result<()> {
    let factory = Arc::new(ProcessWorkerFactory::new(settings.process_config()));
    let dispatcher = Dispatcher::start(factory, settings.dispatcher_config()?)?;

    let handles = (0..repeat)
        .map(|_| dispatcher.submit(job_name, job_path, args.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut failures = 0usize;
    let collect = async {
        for handle in handles {
            let request_id = handle.request_id();
            let line = match handle.await {
                Ok(result) => json!({ "requestId": request_id, "result": result }),
                Err(error) => {
                    failures += 1;
                    json!({ "requestId": request_id, "error": error.to_string() })
                }
            };
            println!("{line}");
        }
    };

    tokio::select! {
        () = collect => dispatcher.shutdown().await,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; cancelling outstanding jobs");
            dispatcher.abort().await;
            bail!("interrupted");
        }
    }

    let metrics = dispatcher.metrics();
    tracing::info!(
        completed = metrics.completed,
        failed = metrics.failed,
        workers_created = metrics.pool.created,
        workers_recycled = metrics.pool.recycled,
        "dispatch finished"
    );
    if failures > 0 {
        bail!("{failures} of {repeat} jobs failed");
    }
    Ok(())
}
