//! BigQuery dialect implementation.

use crate::error::Result;
use crate::query::TimeGrain;

use super::{quote_string, Dialect, UnnestFrom};

#[derive(Debug, Default, Clone, Copy)]
pub struct BigQueryDialect;

impl Dialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_ident(&self, ident: &str) -> String {
        // BigQuery uses backticks for identifiers
        format!("`{}`", ident.replace('`', "\\`"))
    }

    fn supports_ilike(&self) -> bool {
        false
    }

    fn lateral_unnest(&self, expr: &str, table_alias: &str, column: &str) -> Result<UnnestFrom> {
        // Unnesting an array of single-field structs exposes `<alias>.<column>`.
        Ok(UnnestFrom::Join(format!(
            "UNNEST(ARRAY(SELECT AS STRUCT v AS {} FROM UNNEST({expr}) AS v)) AS {}",
            self.quote_ident(column),
            self.quote_ident(table_alias)
        )))
    }

    fn time_floor(&self, expr: &str, grain: TimeGrain, time_zone: Option<&str>) -> String {
        let unit = grain.as_str().to_ascii_uppercase();
        match time_zone {
            Some(tz) => format!("TIMESTAMP_TRUNC({expr}, {unit}, {})", quote_string(tz)),
            None => format!("TIMESTAMP_TRUNC({expr}, {unit})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_backticks_and_lacks_ilike() {
        let d = BigQueryDialect;
        assert_eq!(d.quote_ident("we`ird"), "`we\\`ird`");
        assert!(!d.supports_ilike());
        assert_eq!(
            d.time_floor("`ts`", TimeGrain::Month, None),
            "TIMESTAMP_TRUNC(`ts`, MONTH)"
        );
    }
}
