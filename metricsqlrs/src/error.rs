use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetricsSqlError>;

#[derive(Debug, Error)]
pub enum MetricsSqlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    #[error("invalid expression operator {0:?}")]
    InvalidOperator(String),
    #[error("invalid dimension reference {name:?}: {reason}")]
    UnknownDimension { name: String, reason: String },
    #[error(
        "name {name:?} in expression is not a {} available in the current context",
        visible_kinds(.measures_visible)
    )]
    NameNotVisible { name: String, measures_visible: bool },
    #[error(
        "cannot apply expression to dimension {name:?} because it requires unnesting, which {}",
        unnest_position_hint(.right_operand)
    )]
    UnsupportedUnnestPosition { name: String, right_operand: bool },
    #[error("binary condition must have exactly 2 expressions, got {0}")]
    Arity(usize),
    #[error("failed to generate SQL for subquery on dimension {dimension:?}: {source}")]
    Subquery {
        dimension: String,
        #[source]
        source: Box<MetricsSqlError>,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("subquery nesting exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn visible_kinds(measures_visible: &bool) -> &'static str {
    if *measures_visible {
        "dimension or measure"
    } else {
        "dimension"
    }
}

fn unnest_position_hint(right_operand: &bool) -> &'static str {
    if *right_operand {
        "is only supported for the left side of an operation"
    } else {
        "is not supported for expressions of this structure"
    }
}
