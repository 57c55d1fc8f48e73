//! Logging setup
//!
//! Logs go to stderr; stdout is the protocol channel. `RUST_LOG` selects the
//! filter (default `sqlgate=info`) and `LOG_FORMAT=json` switches to JSON lines.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "sqlgate=info";

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT`; anything but `json` means text
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Install the global subscriber. `verbose` raises the default filter to debug.
///
/// Does nothing if a subscriber is already installed.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "sqlgate=debug" } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match LogFormat::from_env() {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_ansi(false))
            .try_init(),
        LogFormat::Text => {
            registry.with(fmt::layer().with_writer(std::io::stderr).with_ansi(false)).try_init()
        }
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
