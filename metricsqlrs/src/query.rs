use serde::{Deserialize, Serialize};

use crate::expression::Expression;

/// A request against a single metrics view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub metrics_view: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub pivot_on: Vec<String>,
    #[serde(default)]
    pub sort: Vec<Sort>,
    pub time_range: Option<TimeRange>,
    pub comparison_time_range: Option<TimeRange>,
    #[serde(default)]
    pub r#where: Option<Expression>,
    #[serde(default)]
    pub having: Option<Expression>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub time_zone: Option<String>,
    /// Name output columns after their labels instead of their names.
    #[serde(default)]
    pub label: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<DimensionCompute>,
}

impl Dimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute: None,
        }
    }

    /// A dimension computed by truncating `dimension` to `grain`.
    pub fn time_floor(name: impl Into<String>, dimension: impl Into<String>, grain: TimeGrain) -> Self {
        Self {
            name: name.into(),
            compute: Some(DimensionCompute::TimeFloor {
                dimension: dimension.into(),
                grain,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionCompute {
    TimeFloor { dimension: String, grain: TimeGrain },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
}

impl Measure {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub name: String,
    #[serde(default)]
    pub desc: bool,
}

/// Half-open interval `[start, end)` over the metrics view's time dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeGrain {
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Hour => "hour",
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}
