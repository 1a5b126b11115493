//! Metrics view metadata: the dimension and measure catalog that
//! expressions are resolved against, plus its access policy.

use std::collections::HashSet;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dialect::DialectKind;
use crate::error::{MetricsSqlError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsView {
    pub name: String,
    /// Table (optionally schema-qualified with dots) the view reads from.
    pub table: String,
    #[serde(default)]
    pub dialect: Option<DialectKind>,
    #[serde(default)]
    pub time_dimension: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<MetricsViewDimension>,
    #[serde(default)]
    pub measures: Vec<MetricsViewMeasure>,
    #[serde(default)]
    pub security: Option<SecurityPolicy>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsViewDimension {
    pub name: String,
    pub column: Option<String>,
    /// Raw SQL expression; takes precedence over `column`.
    pub expression: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    /// Backed by an array column that must be unnested to filter on elements.
    pub unnest: bool,
}

impl MetricsViewDimension {
    pub fn column(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: Some(name.clone()),
            name,
            ..Default::default()
        }
    }

    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: Some(expression.into()),
            ..Default::default()
        }
    }
}

impl<'de> Deserialize<'de> for MetricsViewDimension {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(MetricsViewDimension::column(s)),
            other => {
                #[derive(Deserialize)]
                #[serde(deny_unknown_fields)]
                struct Full {
                    name: String,
                    column: Option<String>,
                    expression: Option<String>,
                    label: Option<String>,
                    description: Option<String>,
                    #[serde(default)]
                    unnest: bool,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                Ok(MetricsViewDimension {
                    name: full.name,
                    column: full.column,
                    expression: full.expression,
                    label: full.label,
                    description: full.description,
                    unnest: full.unnest,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsViewMeasure {
    pub name: String,
    /// Aggregate SQL expression, e.g. `SUM(amount)`.
    pub expression: String,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl MetricsViewMeasure {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            label: None,
            description: None,
        }
    }
}

/// Field visibility and row-level restrictions applied to every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityPolicy {
    pub access: bool,
    /// SQL predicate AND-ed into the innermost WHERE clause.
    pub row_filter: Option<String>,
    /// When non-empty, only these fields are accessible.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            access: true,
            row_filter: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl SecurityPolicy {
    pub fn can_access_field(&self, name: &str) -> bool {
        if !self.access {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|f| f == name) {
            return false;
        }
        !self.exclude.iter().any(|f| f == name)
    }
}

impl MetricsView {
    pub fn dimension(&self, name: &str) -> Option<&MetricsViewDimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&MetricsViewMeasure> {
        self.measures.iter().find(|m| m.name == name)
    }

    /// Structural checks that don't need a database connection.
    pub fn validate(&self) -> Result<()> {
        check(!self.name.is_empty(), "metrics view name is empty".to_string())?;
        check(
            !self.table.is_empty(),
            format!("metrics view {} has no table", self.name),
        )?;

        let mut seen = HashSet::new();
        for dim in &self.dimensions {
            check(
                !dim.name.is_empty(),
                format!("metrics view {} has a dimension without a name", self.name),
            )?;
            check(
                dim.column.is_some() || dim.expression.is_some(),
                format!(
                    "dimension {} on metrics view {} needs a column or an expression",
                    dim.name, self.name
                ),
            )?;
            check(
                seen.insert(dim.name.as_str()),
                format!("duplicate field {} on metrics view {}", dim.name, self.name),
            )?;
        }
        for measure in &self.measures {
            check(
                !measure.name.is_empty() && !measure.expression.is_empty(),
                format!(
                    "metrics view {} has a measure without a name or expression",
                    self.name
                ),
            )?;
            check(
                seen.insert(measure.name.as_str()),
                format!(
                    "duplicate field {} on metrics view {}",
                    measure.name, self.name
                ),
            )?;
        }

        if let Some(time_dim) = &self.time_dimension {
            check(
                self.dimension(time_dim).is_some(),
                format!(
                    "time dimension {time_dim} is not a dimension of metrics view {}",
                    self.name
                ),
            )?;
        }
        Ok(())
    }
}

fn check(condition: bool, message: String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(MetricsSqlError::Validation(message))
    }
}
