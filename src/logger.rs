use chrono::Local;
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::fs;
use std::path::Path;

use crate::domain::metrics::aggregator::ANALYTICS_TARGET;

const MAIN_LOG: &str = "energy_manager.log";
const ANALYTICS_LOG: &str = "analytics.log";

/// Installs the global logger. Call once, first thing in `main`.
///
/// Three sinks:
/// * stderr, colored, at the `RUST_LOG` level (default `info`), without the analytics stream
/// * `<log_dir>/energy_manager.log`, same records uncolored
/// * `<log_dir>/analytics.log`, only the per-slot `analytics` events (metrics, dispatch transitions)
///
/// `tracing` events reach these sinks through the `log` feature of the `tracing` crate. A sink whose file
/// cannot be opened is skipped; logging to stderr always works.
pub fn init(log_dir: &Path) {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Failed to create log directory at '{}': {}", log_dir.display(), e);
    }

    let level = level_from_env();

    let mut root = Dispatch::new()
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("mio", LevelFilter::Warn)
        .level_for(ANALYTICS_TARGET, LevelFilter::Info)
        .chain(console_sink());

    let main_path = log_dir.join(MAIN_LOG);
    match fern::log_file(&main_path) {
        Ok(file) => root = root.chain(plain_format().filter(|meta| meta.target() != ANALYTICS_TARGET).chain(file)),
        Err(e) => eprintln!("Failed to open log file '{}': {}", main_path.display(), e),
    }

    let analytics_path = log_dir.join(ANALYTICS_LOG);
    match fern::log_file(&analytics_path) {
        Ok(file) => root = root.chain(plain_format().filter(|meta| meta.target() == ANALYTICS_TARGET).chain(file)),
        Err(e) => eprintln!("Failed to open analytics log '{}': {}", analytics_path.display(), e),
    }

    if let Err(e) = root.apply() {
        eprintln!("Failed to apply logger configuration: {}", e);
        return;
    }

    log::info!("Logger initialized at level {}. Log files in '{}'.", level, log_dir.display());
}

fn level_from_env() -> LevelFilter {
    std::env::var("RUST_LOG").ok().and_then(|l| l.parse::<LevelFilter>().ok()).unwrap_or(LevelFilter::Info)
}

fn console_sink() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    Dispatch::new()
        .filter(|meta| meta.target() != ANALYTICS_TARGET)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr())
}

fn plain_format() -> Dispatch {
    Dispatch::new().format(|out, message, record| {
        out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
    })
}
