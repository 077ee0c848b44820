//! TOML configuration for the NetPulse server.
//!
//! A layered model with sensible defaults: an environment variable can
//! override the config file path, a standard filesystem location is tried
//! next, and compiled-in defaults are the final fallback.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the netpulse process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetPulseConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl NetPulseConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `NETPULSE_CONFIG` environment variable.
    /// 2. `/etc/netpulse/netpulse.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("NETPULSE_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "NETPULSE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/netpulse/netpulse.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/netpulse.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Lifecycle engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum count of simultaneously running tests.
    pub max_concurrent_tests: usize,
    /// Capacity of the admitted-but-not-yet-running queue.
    pub queue_capacity: usize,
    /// Seconds between queue dispatch sweeps.
    pub dispatch_interval_sec: u64,
    /// Seconds between monitor sweeps; 0 disables the monitor.
    pub monitor_interval_sec: u64,
    /// Queue depth at which the monitor starts warning.
    pub queue_depth_warn: usize,
    /// Process RSS (MB) at which the monitor starts warning.
    pub memory_warn_mb: u64,
    /// Event buffer size per live subscriber.
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tests: 10,
            queue_capacity: 100,
            dispatch_interval_sec: 1,
            monitor_interval_sec: 30,
            queue_depth_warn: 50,
            memory_warn_mb: 512,
            broadcast_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = NetPulseConfig::default();
        assert_eq!(cfg.engine.max_concurrent_tests, 10);
        assert_eq!(cfg.engine.queue_capacity, 100);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: NetPulseConfig = toml::from_str(
            r#"
            [engine]
            max_concurrent_tests = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.max_concurrent_tests, 3);
        assert_eq!(cfg.engine.queue_capacity, 100);
        assert_eq!(cfg.database.path, "data/netpulse.db");
    }

    #[test]
    fn test_round_trip() {
        let cfg = NetPulseConfig::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let parsed: NetPulseConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.engine.broadcast_capacity, cfg.engine.broadcast_capacity);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = NetPulseConfig::load(Path::new("/nonexistent/netpulse.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
