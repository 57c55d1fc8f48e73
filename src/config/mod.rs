//! Configuration Management
//!
//! This module loads the server configuration: database connection settings,
//! query limits and safety switches, and the identity reported at handshake.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>` or `SQLGATE_CONFIG`
//! - Local: `.sqlgate/config.json` (per-project)
//! - Global: `~/.config/sqlgate/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Command-line flags and their `SQLGATE_*` environment fallbacks
//! 2. The explicit config file, if one was named (it must exist)
//! 3. Otherwise the first of local, then global, that exists
//! 4. Built-in defaults
//!
//! The resolved [`ServerConfig`] is immutable once the session starts and is
//! shared by reference.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ConnectionConfig, DatabaseType, QueryLimits};
use crate::error::{GateError, Result};

/// Protocol revision announced by `initialize`
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Connection settings for the single shared connection
    pub database: ConnectionConfig,

    /// Statement limits and safety switches
    pub query: QuerySettings,

    /// Identity reported in the handshake
    pub server: ServerInfo,
}

/// Statement limits and safety switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Upper bound for every statement and catalog call, in seconds
    pub timeout_secs: u64,

    /// Maximum rows returned per query (0 = unlimited)
    pub max_rows: usize,

    /// When true, an omitted `readonly` argument counts as `readonly=true`
    pub readonly_enforced: bool,

    /// When true, every statement must pass the read-only prefix test
    pub readonly_mode: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self { timeout_secs: 30, max_rows: 10_000, readonly_enforced: false, readonly_mode: false }
    }
}

impl QuerySettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn limits(&self) -> QueryLimits {
        QueryLimits::new(self.max_rows, self.timeout())
    }
}

/// Server identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Values supplied on the command line, applied over the loaded file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub engine: Option<DatabaseType>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub password_env: Option<String>,
    pub database: Option<String>,
    pub server: Option<String>,
    pub file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub max_rows: Option<usize>,
    pub readonly_enforced: Option<bool>,
    pub readonly_mode: Option<bool>,
}

impl ServerConfig {
    /// Apply command-line overrides; unset fields keep the loaded value
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        let db = &mut self.database;
        if let Some(engine) = overrides.engine {
            db.engine = engine;
        }
        overlay(&mut db.host, overrides.host);
        overlay(&mut db.port, overrides.port);
        overlay(&mut db.user, overrides.user);
        overlay(&mut db.password, overrides.password);
        overlay(&mut db.password_env, overrides.password_env);
        overlay(&mut db.database, overrides.database);
        overlay(&mut db.server, overrides.server);
        overlay(&mut db.file, overrides.file);

        let query = &mut self.query;
        query.timeout_secs = overrides.timeout_secs.unwrap_or(query.timeout_secs);
        query.max_rows = overrides.max_rows.unwrap_or(query.max_rows);
        query.readonly_enforced = overrides.readonly_enforced.unwrap_or(query.readonly_enforced);
        query.readonly_mode = overrides.readonly_mode.unwrap_or(query.readonly_mode);
        self
    }

    /// Check settings that would only fail later, mid-session
    ///
    /// # Errors
    /// Returns a config error for a zero timeout or an engine this build
    /// does not include.
    pub fn validate(&self) -> Result<()> {
        if self.query.timeout_secs == 0 {
            return Err(GateError::config_error("query.timeout_secs must be greater than zero"));
        }
        if !self.database.engine.is_enabled() {
            return Err(GateError::config_error(format!(
                "Engine '{}' is not enabled in this build",
                self.database.engine
            )));
        }
        Ok(())
    }

    /// Copy safe to print: the password is masked
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self { database: self.database.redacted(), ..self.clone() }
    }
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Get path to local config file (`.sqlgate/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        GateError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".sqlgate").join("config.json"))
}

/// Get path to global config file (`~/.config/sqlgate/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| GateError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("sqlgate").join("config.json"))
}

/// Load a configuration file
///
/// # Errors
/// Returns a config error when the file cannot be read or is not a valid
/// configuration document.
pub fn load_file(path: &Path) -> Result<ServerConfig> {
    let contents = fs::read_to_string(path).map_err(|e| {
        GateError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    serde_json::from_str(&contents).map_err(|e| {
        GateError::config_error(format!("Invalid config file format in {}: {e}", path.display()))
    })
}

/// Pick the file to load.
///
/// An explicit path is returned as-is (its absence surfaces when loading);
/// otherwise the first existing candidate wins.
#[must_use]
pub fn select_path(explicit: Option<&Path>, candidates: &[PathBuf]) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// Load configuration with precedence (explicit, then local, then global)
///
/// Returns the configuration and the file it came from, if any.
///
/// # Errors
/// Returns a config error if the explicit file is missing or any selected
/// file fails to parse.
pub fn load_with_precedence(explicit: Option<&Path>) -> Result<(ServerConfig, Option<PathBuf>)> {
    let candidates = if explicit.is_some() {
        Vec::new()
    } else {
        // An undeterminable location simply has no file to offer
        [local_config_path(), global_config_path()].into_iter().filter_map(Result::ok).collect()
    };

    match select_path(explicit, &candidates) {
        Some(path) => {
            let config = load_file(&path)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok((config, Some(path)))
        }
        None => Ok((ServerConfig::default(), None)),
    }
}
