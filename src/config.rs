//! Engine configuration.
//!
//! Loaded from `tellur.toml` when present, falling back to defaults. The
//! knobs here tune the runtime; the CLI itself consults no environment
//! variables.
//!
//! ```toml
//! # tellur.toml
//! [execution]
//! num_threads = 8
//!
//! [logging]
//! level = "debug"
//! ```

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worker threads for parallel pipelines. 0 means all available cores.
    #[serde(default)]
    pub num_threads: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig { num_threads: 0 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `tellur.toml`, merged over defaults.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("tellur.toml"))
            .extract()
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
    }

    /// Worker thread count with the 0-means-all-cores rule applied.
    pub fn worker_threads(&self) -> usize {
        if self.execution.num_threads == 0 {
            num_cpus::get()
        } else {
            self.execution.num_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.execution.num_threads, 0);
        assert_eq!(config.logging.level, "info");
        assert!(config.worker_threads() >= 1);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[execution]\nnum_threads = 3\n[logging]\nlevel = \"debug\"")
            .expect("write");
        let config =
            Config::from_file(file.path().to_str().expect("utf-8 path")).expect("parses");
        assert_eq!(config.execution.num_threads, 3);
        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.logging.level, "debug");
    }
}
