//! Tracing setup for the binary. Events go to stderr so that command output
//! on stdout stays pipeable.

use std::io;

use shared::config::{LogFormat, LoggingConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber and returns the configured default level.
pub fn initialize_tracing(config: &LoggingConfig) -> LevelFilter {
    let default_level = default_level(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(default_level))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(io::stderr);

    let installed = if matches!(config.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if let Err(err) = installed {
        eprintln!("warning: tracing already initialised: {err}");
    }

    default_level
}

fn default_level(config: &LoggingConfig) -> LevelFilter {
    config
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO)
}

fn build_env_filter(default_level: LevelFilter) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}
