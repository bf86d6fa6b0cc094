mod chars;
mod classify;
mod cli;
mod config;
mod download;
mod error;
mod gamebanana;
mod pak;
mod registry;
mod sync;

use anyhow::Result;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

fn main() -> Result<()> {
    let level = if std::env::args().any(|arg| arg == "--verbose" || arg == "-v") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = TermLogger::init(
        level,
        ConfigBuilder::new().set_time_level(LevelFilter::Off).build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    cli::run()
}
