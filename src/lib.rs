// src/lib.rs

pub mod cli;
pub mod compiler;
pub mod config;
pub mod dag;
pub mod dsl;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod low;
pub mod outcome;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::compiler::Compiler;
use crate::config::{resolve_config, ConfigFile};
use crate::dag::Scheduler;
use crate::engine::{
    ChannelEventSource, Event, HighSource, JsonFileSource, ThoriumCore, ThoriumRuntime,
};
use crate::exec::Registry;

/// High-level entry point used by `main.rs`.
///
/// Loads config and high data, then either prints the compiled chunks
/// (`--dry-run`), runs one pass and prints the report, or hands over to
/// the Thorium loop (`--thorium`).
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = resolve_config(args.config.as_deref())
        .context("loading configuration")?;
    if args.test {
        cfg.state.test = true;
    }

    let compiler = Compiler::new(cfg.compile_options());
    let scheduler = Scheduler::new(Arc::new(Registry::with_builtins()), cfg.scheduler_options());

    if args.thorium {
        return run_thorium(&args, &cfg, compiler, scheduler).await;
    }

    let high = JsonFileSource::new(&args.high)
        .high()
        .with_context(|| format!("reading high data from {}", args.high.display()))?;
    let chunks = compiler.compile(high)?;

    if args.dry_run {
        print_dry_run(&chunks)?;
        return Ok(());
    }

    let mut scheduler = scheduler;
    let plan = scheduler.plan(chunks)?;
    let report = scheduler.call_chunks(&plan);
    let report = report.to_value();
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !outcome::check_result(&report) {
        anyhow::bail!("one or more states failed");
    }
    Ok(())
}

async fn run_thorium(
    args: &CliArgs,
    cfg: &ConfigFile,
    compiler: Compiler,
    scheduler: Scheduler,
) -> Result<()> {
    let (tx, events) = ChannelEventSource::channel(256);
    tokio::spawn(read_stdin_events(tx));

    let source = Box::new(JsonFileSource::new(&args.high));
    let core = ThoriumCore::new(compiler, scheduler, source);
    let runtime = ThoriumRuntime::new(core, events, cfg.thorium_options());

    tokio::select! {
        core = runtime.run() => {
            info!(iterations = core.iterations(), "thorium finished");
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("ctrl-c received; stopping thorium");
        }
    }
    Ok(())
}

/// Feed JSON events from stdin, one per line, until EOF.
async fn read_stdin_events(tx: mpsc::Sender<Event>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "ignoring malformed event line"),
            },
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "stdin read failed; no more events");
                break;
            }
        }
    }
}

/// Print the compiled chunks in execution order.
fn print_dry_run(chunks: &[low::LowChunk]) -> Result<()> {
    println!("highstate dry-run: {} chunks", chunks.len());
    for chunk in chunks {
        println!("  - {}", chunk.tag());
    }
    let values: Vec<_> = chunks.iter().map(low::LowChunk::to_value).collect();
    println!("{}", serde_json::to_string_pretty(&values)?);
    debug!("dry-run complete (no execution)");
    Ok(())
}
