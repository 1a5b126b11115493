//! SQL dialect abstractions for different database backends.
//!
//! Each dialect is implemented in its own file. The expression compiler
//! never branches on a concrete backend; it only asks the dialect for
//! fragments and capabilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsSqlError, Result};
use crate::metrics_view::MetricsViewDimension;
use crate::query::TimeGrain;

mod bigquery;
mod duckdb;
mod postgres;

pub use bigquery::BigQueryDialect;
pub use duckdb::DuckDbDialect;
pub use postgres::PostgresDialect;

/// How an array-valued expression is turned into one row per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnnestFrom {
    /// FROM-clause fragment exposing the elements as `<table_alias>.<column>`.
    Join(String),
    /// The database unnests implicitly; filter against the expression as-is.
    Automatic,
}

/// Dialects render identifiers and primitive expression pieces.
/// Expression tree walking lives in the query builder; the dialect
/// only maps logical constructs to SQL fragments.
pub trait Dialect {
    fn name(&self) -> &'static str;

    fn quote_ident(&self, ident: &str) -> String;

    fn qualify_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn supports_ilike(&self) -> bool {
        true
    }

    fn lateral_unnest(&self, expr: &str, table_alias: &str, column: &str) -> Result<UnnestFrom>;

    fn metrics_view_dimension_expression(&self, dim: &MetricsViewDimension) -> String {
        match (&dim.expression, &dim.column) {
            (Some(expression), _) => expression.clone(),
            (None, Some(column)) => self.quote_ident(column),
            (None, None) => self.quote_ident(&dim.name),
        }
    }

    /// Truncate a timestamp expression to `grain`, optionally in `time_zone`.
    fn time_floor(&self, expr: &str, grain: TimeGrain, time_zone: Option<&str>) -> String;
}

/// Quote a string literal that is embedded directly in SQL text.
pub(crate) fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Runtime selector for the built-in dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    DuckDb,
    Postgres,
    BigQuery,
}

static DUCKDB: DuckDbDialect = DuckDbDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static BIGQUERY: BigQueryDialect = BigQueryDialect;

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::DuckDb => &DUCKDB,
            DialectKind::Postgres => &POSTGRES,
            DialectKind::BigQuery => &BIGQUERY,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().name())
    }
}

impl FromStr for DialectKind {
    type Err = MetricsSqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(DialectKind::DuckDb),
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "bigquery" => Ok(DialectKind::BigQuery),
            other => Err(MetricsSqlError::Config(format!("unknown dialect {other}"))),
        }
    }
}
