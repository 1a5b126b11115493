//! DuckDB dialect implementation.

use crate::error::Result;
use crate::query::TimeGrain;

use super::{quote_string, Dialect, UnnestFrom};

#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn lateral_unnest(&self, expr: &str, table_alias: &str, column: &str) -> Result<UnnestFrom> {
        Ok(UnnestFrom::Join(format!(
            "LATERAL UNNEST({expr}) {table_alias}({})",
            self.quote_ident(column)
        )))
    }

    fn time_floor(&self, expr: &str, grain: TimeGrain, time_zone: Option<&str>) -> String {
        let unit = grain.as_str();
        match time_zone {
            Some(tz) => format!("date_trunc('{unit}', timezone({}, {expr}))", quote_string(tz)),
            None => format!("date_trunc('{unit}', {expr})"),
        }
    }
}
