//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when set.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let writer = if config.output.is_empty() {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        let path = Path::new(&config.output);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        BoxMakeWriter::new(std::sync::Mutex::new(file))
    };
    let ansi = config.output.is_empty();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    let result = if config.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
