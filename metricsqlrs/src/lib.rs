pub mod config;
pub mod dialect;
pub mod error;
pub mod expression;
pub mod metrics_view;
pub mod query;
pub mod query_builder;
pub mod registry;
pub mod sql_ast;

pub use config::MetricsSqlConfig;
pub use dialect::{Dialect, DialectKind};
pub use error::{MetricsSqlError, Result};
pub use expression::{Condition, Expression, Operator, Subquery};
pub use metrics_view::{MetricsView, MetricsViewDimension, MetricsViewMeasure, SecurityPolicy};
pub use query::{Dimension, Measure, Query, Sort, TimeGrain, TimeRange};
pub use query_builder::{QueryCompiler, SqlBuilder};
pub use registry::MetricsViewRegistry;
pub use sql_ast::CompiledSql;
