//! Metav entrypoint.
use anyhow::Result;
use clap::Parser;
use core_driver::{Driver, NoopScriptHost};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "metav", version, about = "Metaprogramming preprocessor for Verilog")] // minimal metadata
struct Args {
    /// Top module to process; its instantiations are followed recursively.
    pub top_module: String,
    /// Include search directory for `include resolution (repeatable).
    #[arg(short = 'I', value_name = "INCDIR")]
    pub include: Vec<PathBuf>,
    /// Module search directory (repeatable).
    #[arg(short = 'y', value_name = "MODPATH")]
    pub modpath: Vec<PathBuf>,
    /// Parse and run scripts, but skip the rewrite step.
    #[arg(short = 'n', long = "noop")]
    pub noop: bool,
    /// Optional configuration file path (overrides discovery of `metav.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Append logs to this file instead of stderr.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let config = core_config::load_from(args.config.clone())?;
    let incpath = config.include_paths(&args.include);
    let modpath = config.module_paths(&args.modpath);
    debug!(target: "metav", ?incpath, ?modpath, "search paths");

    let mut driver = Driver::new(modpath, incpath);
    let mut host = NoopScriptHost;
    driver.process(&args.top_module, &mut host)?;

    if args.noop {
        info!(target: "metav", "noop: skipping rewrite");
        return Ok(());
    }
    let written = driver.rewrite()?;
    for path in &written {
        info!(target: "metav", file = %path.display(), "wrote");
    }
    if written.is_empty() {
        info!(target: "metav", "no edits; nothing written");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_file.as_ref());
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // One diagnostic line per error: kind, position (with macro
            // frames), message.
            eprintln!("metav: error: {e}");
            ExitCode::FAILURE
        }
    }
}
