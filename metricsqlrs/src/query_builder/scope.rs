//! Name resolution for expressions.

use crate::error::{MetricsSqlError, Result};

use super::ast::{Ast, SelectNode};

/// Where names in an expression are looked up.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'n> {
    /// Directly against the metrics view, at the innermost query level.
    Base,
    /// Against the output columns of an already-built selection. Measures are
    /// only visible when compiling a pseudo-HAVING filter.
    Node {
        node: &'n SelectNode,
        pseudo_having: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    pub expr: String,
    /// The caller has to unnest `expr` before comparing against elements.
    pub unnest: bool,
}

impl ResolvedName {
    fn direct(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            unnest: false,
        }
    }
}

impl<'n> Scope<'n> {
    pub fn resolve_name(&self, ast: &Ast<'_>, name: &str) -> Result<ResolvedName> {
        match *self {
            Scope::Base => resolve_in_base(ast, name),
            Scope::Node {
                node,
                pseudo_having,
            } => resolve_in_node(node, pseudo_having, name),
        }
    }
}

fn resolve_in_base(ast: &Ast<'_>, name: &str) -> Result<ResolvedName> {
    // Projected dimensions first; this also covers computed dimensions.
    if let Some(field) = ast.dim_fields().iter().find(|f| f.name == name) {
        // Already unnested by the projection's lateral join.
        if let Some(unnest_alias) = field.unnest_alias.as_deref().filter(|_| field.unnest) {
            return Ok(ResolvedName::direct(ast.sql_for_member(unnest_alias, &field.name)));
        }
        return Ok(ResolvedName::direct(field.expr.clone()));
    }

    // Filters may reference dimensions the query doesn't project.
    let dim = ast.lookup_dimension(name, true)?;
    Ok(ResolvedName {
        expr: ast.dialect().metrics_view_dimension_expression(dim),
        unnest: dim.unnest,
    })
}

fn resolve_in_node(node: &SelectNode, pseudo_having: bool, name: &str) -> Result<ResolvedName> {
    // Unnesting only ever happens at the innermost level.
    if let Some(field) = node.dim_fields.iter().find(|f| f.name == name) {
        return Ok(ResolvedName::direct(field.expr.clone()));
    }

    if pseudo_having {
        if let Some(field) = node.measure_fields.iter().find(|f| f.name == name) {
            return Ok(ResolvedName::direct(field.expr.clone()));
        }
    }

    Err(MetricsSqlError::NameNotVisible {
        name: name.to_string(),
        measures_visible: pseudo_having,
    })
}
