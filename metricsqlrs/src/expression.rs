//! Predicate expressions used in `where` and `having` clauses.
//!
//! An [`Expression`] is a tree whose leaves are names, literal values and
//! correlated subqueries, and whose inner nodes are [`Condition`]s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::MetricsSqlError;
use crate::query::{Dimension, Measure};

/// A node in a filter expression tree.
///
/// On the wire an expression is an object with exactly one of the keys
/// `name`, `val`, `subquery` or `cond`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExpression", into = "RawExpression")]
pub enum Expression {
    /// Reference to a dimension or measure.
    Name(String),
    /// Literal bound as a positional parameter. May be a list.
    Value(Value),
    /// Correlated sub-selection of a single dimension.
    Subquery(Box<Subquery>),
    Condition(Condition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: Operator,
    #[serde(default)]
    pub exprs: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subquery {
    pub dimension: Dimension,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub r#where: Option<Expression>,
    #[serde(default)]
    pub having: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operator {
    #[default]
    Unspecified,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Ilike,
    Nilike,
    In,
    Nin,
    Or,
    And,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Unspecified => "unspecified",
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Ilike => "ilike",
            Operator::Nilike => "nilike",
            Operator::In => "in",
            Operator::Nin => "nin",
            Operator::Or => "or",
            Operator::And => "and",
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Operator::Unspecified)
    }

    /// True for `in` and `nin`.
    pub fn is_membership(&self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }

    /// Splits a negated operator into its positive form and a negation flag.
    pub fn split_negation(self) -> (Operator, bool) {
        match self {
            Operator::Neq => (Operator::Eq, true),
            Operator::Nin => (Operator::In, true),
            Operator::Nilike => (Operator::Ilike, true),
            other => (other, false),
        }
    }

    /// SQL token for the plain comparison operators.
    pub fn comparison_token(&self) -> Option<&'static str> {
        match self {
            Operator::Eq => Some("="),
            Operator::Neq => Some("!="),
            Operator::Lt => Some("<"),
            Operator::Lte => Some("<="),
            Operator::Gt => Some(">"),
            Operator::Gte => Some(">="),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = MetricsSqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "" | "unspecified" => Operator::Unspecified,
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "ilike" => Operator::Ilike,
            "nilike" => Operator::Nilike,
            "in" => Operator::In,
            "nin" => Operator::Nin,
            "or" => Operator::Or,
            "and" => Operator::And,
            _ => return Err(MetricsSqlError::InvalidOperator(s.to_string())),
        })
    }
}

impl Serialize for Operator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Wire form of [`Expression`]: every case optional so that malformed
/// input can be reported instead of silently picking one.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawExpression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    val: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subquery: Option<Box<Subquery>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cond: Option<Condition>,
}

// Keeps `{"val": null}` distinct from a missing `val`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawExpression> for Expression {
    type Error = MetricsSqlError;

    fn try_from(raw: RawExpression) -> Result<Self, Self::Error> {
        let name = raw.name.filter(|n| !n.is_empty());
        let populated = [
            name.is_some(),
            raw.val.is_some(),
            raw.subquery.is_some(),
            raw.cond.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();

        match (name, raw.val, raw.subquery, raw.cond) {
            (Some(name), None, None, None) => Ok(Expression::Name(name)),
            (None, Some(val), None, None) => Ok(Expression::Value(val)),
            (None, None, Some(sub), None) => Ok(Expression::Subquery(sub)),
            (None, None, None, Some(cond)) => Ok(Expression::Condition(cond)),
            (None, None, None, None) => Err(MetricsSqlError::InvalidExpression(
                "expected one of name, val, subquery or cond".to_string(),
            )),
            _ => Err(MetricsSqlError::InvalidExpression(format!(
                "expected exactly one of name, val, subquery or cond, found {populated}"
            ))),
        }
    }
}

impl From<Expression> for RawExpression {
    fn from(expr: Expression) -> Self {
        match expr {
            Expression::Name(name) => RawExpression {
                name: Some(name),
                ..Default::default()
            },
            Expression::Value(val) => RawExpression {
                val: Some(val),
                ..Default::default()
            },
            Expression::Subquery(sub) => RawExpression {
                subquery: Some(sub),
                ..Default::default()
            },
            Expression::Condition(cond) => RawExpression {
                cond: Some(cond),
                ..Default::default()
            },
        }
    }
}

impl Expression {
    pub fn name(name: impl Into<String>) -> Self {
        Expression::Name(name.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Expression::Value(value.into())
    }

    pub fn condition(op: Operator, exprs: Vec<Expression>) -> Self {
        Expression::Condition(Condition { op, exprs })
    }

    pub fn and(exprs: Vec<Expression>) -> Self {
        Self::condition(Operator::And, exprs)
    }

    pub fn or(exprs: Vec<Expression>) -> Self {
        Self::condition(Operator::Or, exprs)
    }

    /// Builds `<op>(name, value)`, the shape of most dashboard filters.
    pub fn compare(op: Operator, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(op, vec![Self::name(name), Self::value(value)])
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(Operator::Eq, name, value)
    }

    pub fn in_list(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::compare(Operator::In, name, Value::Array(values))
    }

    pub fn not_in_list(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::compare(Operator::Nin, name, Value::Array(values))
    }

    pub fn subquery(sub: Subquery) -> Self {
        Expression::Subquery(Box::new(sub))
    }
}
