//! Turns a resolved [`Ast`] into a [`SelectQuery`].
//!
//! The innermost SELECT projects dimensions and measures straight from the
//! metrics view table and carries every row-level filter. A HAVING clause
//! wraps it in an outer SELECT whose WHERE can only see the inner output
//! columns (pseudo-HAVING).

use crate::error::{MetricsSqlError, Result};
use crate::expression::Expression;
use crate::query::{Query, TimeRange};
use crate::sql_ast::{
    CompiledSql, FromSource, OrderItem, SelectItem, SelectQuery, SortDirection, TableRef,
};

use super::ast::{Ast, FieldNode};
use super::expr::compile_expression;
use super::scope::Scope;

pub(crate) fn build_select(ast: &Ast<'_>) -> Result<SelectQuery> {
    let query = ast.query();
    let base = build_base_select(ast, query)?;

    let mut select = match &query.having {
        Some(having) => wrap_with_having(ast, base, having)?,
        None => base,
    };

    select.order_by = build_order_items(ast, query)?;
    select.limit = query.limit;
    select.offset = query.offset;
    Ok(select)
}

fn build_base_select(ast: &Ast<'_>, query: &Query) -> Result<SelectQuery> {
    let mut select = SelectQuery {
        select: select_items(ast.dim_fields().iter().chain(ast.measure_fields())),
        from: TableRef {
            source: FromSource::Table(ast.env.metrics_view.table.clone()),
            alias: None,
            laterals: ast.unnest_joins.clone(),
        },
        group_by: ast.dim_fields().iter().map(|f| f.expr.clone()).collect(),
        ..Default::default()
    };

    if let Some(range) = &query.time_range {
        if let Some(filter) = time_range_filter(ast, range)? {
            select.filters.push(filter);
        }
    }
    if let Some(row_filter) = &ast.env.security.row_filter {
        select
            .filters
            .push(CompiledSql::new(format!("({row_filter})"), Vec::new()));
    }
    if let Some(where_expr) = &query.r#where {
        select
            .filters
            .push(compile_expression(ast, where_expr, Scope::Base)?);
    }

    Ok(select)
}

fn wrap_with_having(
    ast: &Ast<'_>,
    inner: SelectQuery,
    having: &Expression,
) -> Result<SelectQuery> {
    let node = ast.wrap_node(ast.generate_identifier());
    let filter = compile_expression(
        ast,
        having,
        Scope::Node {
            node: &node,
            pseudo_having: true,
        },
    )?;

    Ok(SelectQuery {
        select: select_items(node.dim_fields.iter().chain(&node.measure_fields)),
        from: TableRef {
            source: FromSource::Subquery(Box::new(inner)),
            alias: Some(node.alias.clone()),
            laterals: Vec::new(),
        },
        filters: vec![filter],
        ..Default::default()
    })
}

fn select_items<'f>(fields: impl Iterator<Item = &'f FieldNode>) -> Vec<SelectItem> {
    fields
        .map(|f| SelectItem {
            expr: f.expr.clone(),
            alias: f.alias.clone(),
        })
        .collect()
}

fn time_range_filter(ast: &Ast<'_>, range: &TimeRange) -> Result<Option<CompiledSql>> {
    if range.start.is_none() && range.end.is_none() {
        return Ok(None);
    }

    let mv = ast.env.metrics_view;
    let time_dim = mv.time_dimension.as_deref().ok_or_else(|| {
        MetricsSqlError::Validation(format!(
            "metrics view {} has no time dimension to apply a time range to",
            mv.name
        ))
    })?;
    let dim = ast.lookup_dimension(time_dim, false)?;
    let expr = ast.dialect().metrics_view_dimension_expression(dim);

    let mut parts = Vec::new();
    let mut params = Vec::new();
    if let Some(start) = &range.start {
        parts.push(format!("({expr}) >= ?"));
        params.push(serde_json::Value::String(start.clone()));
    }
    if let Some(end) = &range.end {
        parts.push(format!("({expr}) < ?"));
        params.push(serde_json::Value::String(end.clone()));
    }
    Ok(Some(CompiledSql::new(parts.join(" AND "), params)))
}

fn build_order_items(ast: &Ast<'_>, query: &Query) -> Result<Vec<OrderItem>> {
    query
        .sort
        .iter()
        .map(|sort| {
            let field = ast
                .dim_fields()
                .iter()
                .chain(ast.measure_fields())
                .find(|f| f.name == sort.name)
                .ok_or_else(|| {
                    MetricsSqlError::Validation(format!(
                        "sort field {} is not a dimension or measure in the query",
                        sort.name
                    ))
                })?;
            Ok(OrderItem {
                expr: ast.dialect().quote_ident(&field.alias),
                direction: if sort.desc {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                },
            })
        })
        .collect()
}
