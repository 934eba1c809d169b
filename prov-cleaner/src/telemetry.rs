//! Tracing subscriber setup for the cleaner process.

use prov_core::{ConfigError, ProvResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "prov_cleaner=info,prov_engine=info,warn";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Plain,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// `PROV_LOG_FORMAT=json` selects JSON, anything else plain text.
    pub fn from_env() -> Self {
        std::env::var("PROV_LOG_FORMAT")
            .ok()
            .map(|s| Self::parse(&s))
            .unwrap_or_default()
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Plain
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Fails when a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> ProvResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ConfigError::InvalidValue {
        field: "tracing".to_string(),
        value: format!("{:?}", format),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}
