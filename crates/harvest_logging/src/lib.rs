#![deny(missing_docs)]
//! Shared logging bootstrap for the harvest workspace.
//!
//! The CLI logs to the terminal and, optionally, into a log file placed next
//! to the harvest output. Tests use [`initialize_for_tests`], which no-ops if
//! a logger is already installed.

use std::fs::File;
use std::path::Path;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

/// Initialize terminal logging at `level`, optionally teeing into `log_file`.
///
/// A log file that cannot be created is reported on stderr and skipped rather
/// than failing startup. Calling this twice leaves the first logger in place.
pub fn initialize(level: LevelFilter, log_file: Option<&Path>) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        build_config(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        match File::create(path) {
            Ok(file) => loggers.push(WriteLogger::new(level, build_config(), file)),
            Err(err) => {
                eprintln!("warning: could not create log file {}: {err}", path.display());
            }
        }
    }

    let _ = CombinedLogger::init(loggers);
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
