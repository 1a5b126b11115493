//! Per-query compilation context.
//!
//! An [`Ast`] resolves the query's dimensions and measures against the
//! metrics view once, so that expression compilation and SELECT planning
//! share the same projected fields.

use std::cell::Cell;

use crate::dialect::{Dialect, UnnestFrom};
use crate::error::{MetricsSqlError, Result};
use crate::metrics_view::{MetricsView, MetricsViewDimension, MetricsViewMeasure, SecurityPolicy};
use crate::query::{Dimension, DimensionCompute, Query};

use super::QueryCompiler;

/// Hands out `t0`, `t1`, ... aliases. Shared by a query and its subqueries
/// so generated aliases never collide.
#[derive(Debug, Default)]
pub struct IdentifierGenerator {
    next: Cell<usize>,
}

impl IdentifierGenerator {
    pub fn next_identifier(&self) -> String {
        let n = self.next.get();
        self.next.set(n + 1);
        format!("t{n}")
    }
}

/// Everything a nested compilation inherits from its parent.
#[derive(Clone, Copy)]
pub struct CompileEnv<'a> {
    pub metrics_view: &'a MetricsView,
    pub security: &'a SecurityPolicy,
    pub dialect: &'a dyn Dialect,
    pub identifiers: &'a IdentifierGenerator,
    /// Subquery nesting level; 0 for the outermost query.
    pub depth: usize,
}

/// A column produced by a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub name: String,
    /// Output column alias (the label when the query asks for labels).
    pub alias: String,
    /// SQL expression producing the value.
    pub expr: String,
    pub unnest: bool,
    /// Table alias of the lateral unnest that exposes the elements.
    pub unnest_alias: Option<String>,
}

impl FieldNode {
    pub fn new(name: impl Into<String>, expr: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            expr: expr.into(),
            unnest: false,
            unnest_alias: None,
        }
    }
}

/// An already-built selection whose output columns are the only names
/// visible to filters layered on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectNode {
    pub alias: String,
    pub dim_fields: Vec<FieldNode>,
    pub measure_fields: Vec<FieldNode>,
}

pub struct Ast<'a> {
    pub(crate) env: CompileEnv<'a>,
    pub(crate) query: &'a Query,
    pub(crate) compiler: &'a dyn QueryCompiler,
    pub(crate) dim_fields: Vec<FieldNode>,
    pub(crate) measure_fields: Vec<FieldNode>,
    /// Lateral joins for projected dimensions backed by arrays.
    pub(crate) unnest_joins: Vec<String>,
}

impl<'a> Ast<'a> {
    pub fn new(env: CompileEnv<'a>, query: &'a Query, compiler: &'a dyn QueryCompiler) -> Result<Self> {
        if !env.security.access {
            return Err(MetricsSqlError::Validation(format!(
                "access to metrics view {} is denied",
                env.metrics_view.name
            )));
        }
        if !query.pivot_on.is_empty() {
            return Err(MetricsSqlError::Validation(
                "pivot queries are not supported by the SQL builder".to_string(),
            ));
        }

        let mut ast = Ast {
            env,
            query,
            compiler,
            dim_fields: Vec::with_capacity(query.dimensions.len()),
            measure_fields: Vec::with_capacity(query.measures.len()),
            unnest_joins: Vec::new(),
        };

        for dim in &query.dimensions {
            let field = ast.resolve_dimension_field(dim)?;
            ast.dim_fields.push(field);
        }
        for measure in &query.measures {
            let mv_measure = ast.lookup_measure(&measure.name)?;
            let alias = ast.output_alias(&measure.name, mv_measure.label.as_deref());
            ast.measure_fields.push(FieldNode {
                name: measure.name.clone(),
                alias,
                expr: mv_measure.expression.clone(),
                unnest: false,
                unnest_alias: None,
            });
        }

        Ok(ast)
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.env.dialect
    }

    pub fn query(&self) -> &'a Query {
        self.query
    }

    pub fn dim_fields(&self) -> &[FieldNode] {
        &self.dim_fields
    }

    pub fn measure_fields(&self) -> &[FieldNode] {
        &self.measure_fields
    }

    pub fn generate_identifier(&self) -> String {
        self.env.identifiers.next_identifier()
    }

    /// `<table>.<name>`, both quoted.
    pub fn sql_for_member(&self, table: &str, name: &str) -> String {
        let dialect = self.dialect();
        format!("{}.{}", dialect.quote_ident(table), dialect.quote_ident(name))
    }

    /// Finds a dimension in the metrics view. With `visible`, fields hidden
    /// by the security policy are reported as missing.
    pub fn lookup_dimension(&self, name: &str, visible: bool) -> Result<&'a MetricsViewDimension> {
        let mv = self.env.metrics_view;
        let dim = mv
            .dimension(name)
            .ok_or_else(|| MetricsSqlError::UnknownDimension {
                name: name.to_string(),
                reason: format!("dimension not found in metrics view {}", mv.name),
            })?;
        if visible && !self.env.security.can_access_field(name) {
            return Err(MetricsSqlError::UnknownDimension {
                name: name.to_string(),
                reason: format!("dimension not found in metrics view {}", mv.name),
            });
        }
        Ok(dim)
    }

    pub fn lookup_measure(&self, name: &str) -> Result<&'a MetricsViewMeasure> {
        let mv = self.env.metrics_view;
        mv.measure(name)
            .filter(|_| self.env.security.can_access_field(name))
            .ok_or_else(|| {
                MetricsSqlError::Validation(format!(
                    "measure {name} not found in metrics view {}",
                    mv.name
                ))
            })
    }

    /// Wraps the current projection as the selection aliased `alias`.
    pub fn wrap_node(&self, alias: String) -> SelectNode {
        let wrap = |f: &FieldNode| FieldNode {
            name: f.name.clone(),
            alias: f.alias.clone(),
            expr: self.sql_for_member(&alias, &f.alias),
            unnest: false,
            unnest_alias: None,
        };
        SelectNode {
            dim_fields: self.dim_fields.iter().map(wrap).collect(),
            measure_fields: self.measure_fields.iter().map(wrap).collect(),
            alias,
        }
    }

    fn output_alias(&self, name: &str, label: Option<&str>) -> String {
        match label {
            Some(label) if self.query.label && !label.is_empty() => label.to_string(),
            _ => name.to_string(),
        }
    }

    fn resolve_dimension_field(&mut self, dim: &Dimension) -> Result<FieldNode> {
        let dialect = self.dialect();

        if let Some(DimensionCompute::TimeFloor { dimension, grain }) = &dim.compute {
            let base = self.lookup_dimension(dimension, true)?;
            let expr = dialect.time_floor(
                &dialect.metrics_view_dimension_expression(base),
                *grain,
                self.query.time_zone.as_deref(),
            );
            return Ok(FieldNode {
                name: dim.name.clone(),
                alias: dim.name.clone(),
                expr,
                unnest: false,
                unnest_alias: None,
            });
        }

        let mv_dim = self.lookup_dimension(&dim.name, true)?;
        let expr = dialect.metrics_view_dimension_expression(mv_dim);
        let alias = self.output_alias(&dim.name, mv_dim.label.as_deref());
        if !mv_dim.unnest {
            return Ok(FieldNode {
                name: dim.name.clone(),
                alias,
                expr,
                unnest: false,
                unnest_alias: None,
            });
        }

        let table_alias = self.generate_identifier();
        match dialect.lateral_unnest(&expr, &table_alias, &dim.name)? {
            UnnestFrom::Automatic => Ok(FieldNode {
                name: dim.name.clone(),
                alias,
                expr,
                unnest: false,
                unnest_alias: None,
            }),
            UnnestFrom::Join(from) => {
                self.unnest_joins.push(from);
                Ok(FieldNode {
                    name: dim.name.clone(),
                    alias,
                    expr: self.sql_for_member(&table_alias, &dim.name),
                    unnest: true,
                    unnest_alias: Some(table_alias),
                })
            }
        }
    }
}
