use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;

pub use formatter::*;

use crate::configs::Config;

/// Builds the filter directive from `[logging]`, e.g. `info,voicelink::player=debug`.
pub fn filter_directive(config: &Config) -> String {
    let level = config.logging.level.as_deref().unwrap_or("info");
    match config.logging.filters.as_deref() {
        Some(filters) if !filters.is_empty() => format!("{level},{filters}"),
        _ => level.to_string(),
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let stdout_layer = fmt::layer()
        .event_format(LineFormatter::new(config.logging.ansi))
        .with_ansi(config.logging.ansi);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}
