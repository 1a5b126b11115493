//! Configuration for the SQL builder.
//!
//! Supports TOML-based configuration with global defaults and per-metrics-view overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;
use crate::error::{MetricsSqlError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSqlConfig {
    /// Defaults applied to every metrics view unless overridden.
    pub defaults: CompilerConfig,

    /// Per-metrics-view overrides (keyed by metrics view name).
    pub metrics_views: HashMap<String, CompilerOverrides>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Deepest allowed subquery nesting (default: 8).
    pub max_subquery_depth: usize,
    /// Dialect used when neither an override nor the metrics view names one.
    pub dialect: DialectKind,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_subquery_depth: 8,
            dialect: DialectKind::DuckDb,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerOverrides {
    pub max_subquery_depth: Option<usize>,
    pub dialect: Option<DialectKind>,
}

impl MetricsSqlConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MetricsSqlError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| MetricsSqlError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `METRICSQL_CONFIG` environment variable
    /// 2. `./metricsql.toml` (current directory)
    /// 3. `~/.config/metricsql/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("METRICSQL_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from METRICSQL_CONFIG");
                    return cfg;
                }
                Err(err) => tracing::warn!(path = %path, error = %err, "ignoring METRICSQL_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("metricsql.toml") {
            tracing::info!("loaded config from ./metricsql.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("metricsql").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Resolved settings for a metrics view (overrides merged over defaults).
    pub fn for_metrics_view(&self, name: &str) -> CompilerConfig {
        match self.metrics_views.get(name) {
            Some(o) => CompilerConfig {
                max_subquery_depth: o
                    .max_subquery_depth
                    .unwrap_or(self.defaults.max_subquery_depth),
                dialect: o.dialect.unwrap_or(self.defaults.dialect),
            },
            None => self.defaults.clone(),
        }
    }
}
