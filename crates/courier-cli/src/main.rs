//! `courier` – message bus demo
//!
//! Runs a small system on a [`MessageBus`]:
//!
//! 1. Loads `courier.toml` (see [`config`]) and initializes tracing.
//! 2. Spawns a clock, `squarers` request-answering workers and a requester
//!    that asks for the square of every tick number.
//! 3. Starts the clock once every worker has finished initializing.
//! 4. Intercepts **Ctrl-C** to stop every worker and exit cleanly.
//! 5. Prints a summary of answered, timed-out and undeliverable requests.

mod config;
mod demo;

use colored::Colorize;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use courier_bus::MessageBus;
use courier_runtime::{Launcher, WorkerReport, init_tracing};

use demo::{Clock, Requester, Squarer, Start, Summary};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    init: bool,
    help: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or_else(|| format!("{arg} expects a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--init" => parsed.init = true,
            "--help" | "-h" => parsed.help = true,
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {}", "Argument error".red(), e);
            print_usage();
            return ExitCode::FAILURE;
        }
    };
    if args.help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    print_banner();

    let path = config::resolve_path(args.config);
    if args.init {
        return write_default_config(&path);
    }
    let cfg = match config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Config: {} ({} squarer(s), {} tick(s) every {} ms)",
        path.display().to_string().bold(),
        cfg.squarers,
        cfg.duration_ticks,
        cfg.tick_interval_ms
    );

    let _guard = init_tracing("courier");

    let bus = Arc::new(MessageBus::new());
    let mut launcher = Launcher::new(Arc::clone(&bus));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = launcher.shutdown_token().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping all workers …".yellow().bold());
        shutdown.stop();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop workers gracefully");
    }

    // ── Workers ───────────────────────────────────────────────────────────
    let summary = Arc::new(Mutex::new(Summary::default()));
    if let Err(e) = spawn_workers(&mut launcher, &cfg, &summary) {
        error!(error = %e, "failed to start workers");
        launcher.stop_all();
        print_reports(&launcher.join());
        return ExitCode::FAILURE;
    }

    if !launcher.wait_ready(READY_TIMEOUT) {
        println!("{}", "  Workers did not become ready in time.".red());
        launcher.stop_all();
        print_reports(&launcher.join());
        return ExitCode::FAILURE;
    }

    println!("  {} worker(s) running; starting clock.\n", launcher.workers().len());
    bus.send_notification(Start);

    let reports = launcher.join();
    print_summary(&summary.lock());
    print_reports(&reports);

    if reports.iter().all(|r| r.result.is_ok()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn spawn_workers(
    launcher: &mut Launcher,
    cfg: &config::Config,
    summary: &Arc<Mutex<Summary>>,
) -> Result<(), courier_types::CourierError> {
    launcher.spawn(Clock {
        interval: cfg.tick_interval(),
        ticks: cfg.duration_ticks,
    })?;
    for i in 0..cfg.squarers {
        launcher.spawn(Squarer::new(i))?;
    }
    launcher.spawn(Requester {
        timeout: cfg.request_timeout(),
        summary: Arc::clone(summary),
    })?;
    Ok(())
}

fn write_default_config(path: &std::path::Path) -> ExitCode {
    if path.exists() {
        println!("  {} already exists; leaving it untouched.", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save_to(&config::Config::default(), path) {
        Ok(()) => {
            println!("  {} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _________  __  ___________________ "#.bold().cyan());
    println!("{}", r#"  / ___/ __ \/ / / / __ \/  _/ ____/ _ \"#.bold().cyan());
    println!("{}", r#" / /__/ /_/ / /_/ / /_/ // // __/ / , _/"#.bold().cyan());
    println!("{}", r#" \___/\____/\____/_/ |_/___/____//_/|_| "#.bold().cyan());
    println!();
    println!("  {} {}", "Courier".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  In-process message bus");
    println!();
}

fn print_usage() {
    println!("Usage: courier [--config <path>] [--init]");
    println!();
    println!("  -c, --config <path>  Config file (default: $COURIER_CONFIG or ./{})", config::DEFAULT_FILE);
    println!("      --init           Write a default config file and exit");
    println!("  -h, --help           Show this help");
}

fn print_summary(summary: &Summary) {
    println!();
    println!("  {}", "Summary".bold().underline());
    println!("    answered       {}", summary.answered.to_string().green());
    println!("    sum of squares {}", summary.sum_of_squares);
    let warn_if_nonzero = |n: u64| {
        if n == 0 { n.to_string().normal() } else { n.to_string().yellow() }
    };
    println!("    timed out      {}", warn_if_nonzero(summary.timed_out));
    println!("    undeliverable  {}", warn_if_nonzero(summary.undeliverable));
    println!("    abandoned      {}", warn_if_nonzero(summary.abandoned));
    println!("    interrupted    {}", warn_if_nonzero(summary.interrupted));
}

fn print_reports(reports: &[WorkerReport]) {
    println!();
    for report in reports {
        match &report.result {
            Ok(()) => println!("  {} {} ({})", "✓".green().bold(), report.name, report.id),
            Err(e) => println!("  {} {} ({}): {}", "✗".red().bold(), report.name, report.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args, String> {
        parse_args(raw.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_use_defaults() {
        assert_eq!(args(&[]).expect("parse"), Args::default());
    }

    #[test]
    fn config_flag_takes_a_path() {
        let parsed = args(&["--config", "/tmp/c.toml"]).expect("parse");
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(!parsed.init);
    }

    #[test]
    fn config_flag_without_path_is_an_error() {
        assert!(args(&["-c"]).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = args(&["--verbose"]).expect_err("unknown flag");
        assert!(err.contains("--verbose"));
    }

    #[test]
    fn init_and_help_flags() {
        let parsed = args(&["--init", "-h"]).expect("parse");
        assert!(parsed.init);
        assert!(parsed.help);
    }
}
