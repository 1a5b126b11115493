use std::collections::HashMap;
use std::fs;
use std::path::Path;

use glob::glob;

use crate::error::{MetricsSqlError, Result};
use crate::metrics_view::MetricsView;

/// Metrics views indexed by name.
#[derive(Debug, Default, Clone)]
pub struct MetricsViewRegistry {
    pub metrics_views: HashMap<String, MetricsView>,
}

impl MetricsViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(metrics_views: Vec<MetricsView>) -> Self {
        let mut registry = MetricsViewRegistry::new();
        for mv in metrics_views {
            registry.metrics_views.insert(mv.name.clone(), mv);
        }
        registry
    }

    /// Loads every `*.yml` / `*.yaml` file in `dir`, one metrics view per file.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(MetricsSqlError::Validation(format!(
                "metrics views directory not found: {}",
                dir.display()
            )));
        }

        let mut registry = MetricsViewRegistry::new();
        for pattern in ["*.yml", "*.yaml"] {
            for entry in glob(&format!("{}/{pattern}", dir.display()))
                .map_err(|e| MetricsSqlError::Other(e.into()))?
                .flatten()
            {
                registry.load_file(&entry)?;
            }
        }
        tracing::info!(
            dir = %dir.display(),
            count = registry.metrics_views.len(),
            "loaded metrics views"
        );
        Ok(registry)
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        let mv: MetricsView = serde_yaml::from_str(&contents)?;
        mv.validate()?;
        if self.metrics_views.contains_key(&mv.name) {
            return Err(MetricsSqlError::Validation(format!(
                "duplicate metrics view {} in {}",
                mv.name,
                path.display()
            )));
        }
        tracing::debug!(name = %mv.name, path = %path.display(), "loaded metrics view");
        self.metrics_views.insert(mv.name.clone(), mv);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MetricsView> {
        self.metrics_views.get(name)
    }
}
