//! Compiles [`Expression`] trees into SQL predicates with positional params.

use std::borrow::Cow;

use serde_json::Value;

use crate::dialect::UnnestFrom;
use crate::error::{MetricsSqlError, Result};
use crate::expression::{Condition, Expression, Operator, Subquery};
use crate::query::Query;
use crate::sql_ast::CompiledSql;

use super::ast::{Ast, CompileEnv};
use super::scope::{ResolvedName, Scope};

/// Compile `expr` in `scope`. An empty AND/OR yields empty SQL, which
/// callers treat as "no predicate".
pub fn compile_expression(ast: &Ast<'_>, expr: &Expression, scope: Scope<'_>) -> Result<CompiledSql> {
    let mut builder = ExprBuilder {
        ast,
        scope,
        out: String::new(),
        params: Vec::new(),
    };
    builder.write_expression(expr)?;
    Ok(CompiledSql {
        sql: builder.out,
        params: builder.params,
    })
}

/// Left operand of a binary condition: either an expression to compile or
/// SQL already resolved from a name.
#[derive(Clone, Copy)]
enum Left<'e> {
    Expr(&'e Expression),
    Sql(&'e str),
}

struct ExprBuilder<'b, 'a> {
    ast: &'b Ast<'a>,
    scope: Scope<'b>,
    out: String,
    params: Vec<Value>,
}

impl<'b, 'a> ExprBuilder<'b, 'a> {
    fn write_expression(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Name(name) => self.write_name(name),
            Expression::Value(val) => {
                self.write_value(val.clone());
                Ok(())
            }
            Expression::Subquery(sub) => self.write_subquery(sub),
            Expression::Condition(cond) => self.write_condition(cond),
        }
    }

    fn write_name(&mut self, name: &str) -> Result<()> {
        let resolved = self.resolve(name)?;
        if resolved.unnest {
            // Unnest is only handled for the left side of binary conditions.
            return Err(MetricsSqlError::UnsupportedUnnestPosition {
                name: name.to_string(),
                right_operand: false,
            });
        }
        self.write_parenthesized(&resolved.expr);
        Ok(())
    }

    fn write_value(&mut self, val: Value) {
        self.out.push('?');
        self.params.push(val);
    }

    fn write_subquery(&mut self, sub: &Subquery) -> Result<()> {
        // The subquery inherits the parent's context but nothing that shapes its output.
        let outer = self.ast.query();
        let inner = Query {
            metrics_view: outer.metrics_view.clone(),
            dimensions: vec![sub.dimension.clone()],
            measures: sub.measures.clone(),
            time_range: outer.time_range.clone(),
            comparison_time_range: outer.comparison_time_range.clone(),
            r#where: sub.r#where.clone(),
            having: sub.having.clone(),
            time_zone: outer.time_zone.clone(),
            ..Query::default()
        };

        let env = CompileEnv {
            depth: self.ast.env.depth + 1,
            ..self.ast.env
        };
        tracing::trace!(
            dimension = %sub.dimension.name,
            depth = env.depth,
            "compiling subquery expression"
        );
        let compiled = self
            .ast
            .compiler
            .compile_query(env, &inner)
            .map_err(|e| MetricsSqlError::Subquery {
                dimension: sub.dimension.name.clone(),
                source: Box::new(e),
            })?;

        // Output: (SELECT <dimension> FROM (<subquery>))
        self.out.push_str("(SELECT ");
        self.out
            .push_str(&self.ast.dialect().quote_ident(&sub.dimension.name));
        self.out.push_str(" FROM (");
        self.out.push_str(&compiled.sql);
        self.out.push_str("))");
        self.params.extend(compiled.params);
        Ok(())
    }

    fn write_condition(&mut self, cond: &Condition) -> Result<()> {
        match cond.op {
            Operator::Or => self.write_joined(&cond.exprs, " OR "),
            Operator::And => self.write_joined(&cond.exprs, " AND "),
            op if !op.is_valid() => Err(MetricsSqlError::InvalidOperator(op.to_string())),
            op => self.write_binary_condition(&cond.exprs, op),
        }
    }

    fn write_joined(&mut self, exprs: &[Expression], joiner: &str) -> Result<()> {
        if exprs.is_empty() {
            return Ok(());
        }

        self.out.push('(');
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(joiner);
            }
            self.write_expression(expr)?;
        }
        self.out.push(')');
        Ok(())
    }

    fn write_binary_condition(&mut self, exprs: &[Expression], op: Operator) -> Result<()> {
        let (left, right) = binary_operands(exprs, op)?;
        let right = &*right;

        if let Expression::Name(name) = right {
            if self.resolve(name)?.unnest {
                return Err(MetricsSqlError::UnsupportedUnnestPosition {
                    name: name.clone(),
                    right_operand: true,
                });
            }
        }

        let Expression::Name(name) = left else {
            return self.write_binary_inner(Left::Expr(left), right, op);
        };

        let resolved = self.resolve(name)?;
        if !resolved.unnest {
            return self.write_binary_inner(Left::Sql(&resolved.expr), right, op);
        }

        let table_alias = self.ast.generate_identifier();
        let unnest_from = match self
            .ast
            .dialect()
            .lateral_unnest(&resolved.expr, &table_alias, name)?
        {
            // The database unnests on its own; compare against the value directly.
            UnnestFrom::Automatic => {
                return self.write_binary_inner(Left::Sql(&resolved.expr), right, op)
            }
            UnnestFrom::Join(from) => from,
        };
        let element = self.ast.sql_for_member(&table_alias, name);

        // Negation has to wrap the EXISTS, not the per-element comparison.
        let (op, negated) = op.split_negation();

        // Output: [NOT] EXISTS (SELECT 1 FROM <unnest> WHERE <element> <op> <right>)
        if negated {
            self.out.push_str("NOT ");
        }
        self.out.push_str("EXISTS (SELECT 1 FROM ");
        self.out.push_str(&unnest_from);
        self.out.push_str(" WHERE ");
        self.write_binary_inner(Left::Sql(&element), right, op)?;
        self.out.push(')');
        Ok(())
    }

    fn write_binary_inner(&mut self, left: Left<'_>, right: &Expression, op: Operator) -> Result<()> {
        match op {
            Operator::Ilike => return self.write_ilike(left, right, false),
            Operator::Nilike => return self.write_ilike(left, right, true),
            Operator::In => return self.write_in(left, right, false),
            Operator::Nin => return self.write_in(left, right, true),
            _ => {}
        }

        let token = op
            .comparison_token()
            .ok_or_else(|| MetricsSqlError::InvalidOperator(op.to_string()))?;
        self.write_left(left)?;
        self.out.push(' ');
        self.out.push_str(token);
        self.out.push(' ');
        self.write_expression(right)
    }

    fn write_ilike(&mut self, left: Left<'_>, right: &Expression, negated: bool) -> Result<()> {
        if negated {
            self.out.push('(');
        }

        if self.ast.dialect().supports_ilike() {
            // Output: <left> [NOT] ILIKE <right>
            self.write_left(left)?;
            self.out
                .push_str(if negated { " NOT ILIKE " } else { " ILIKE " });
            self.write_expression(right)?;
        } else {
            // Output: LOWER(<left>) [NOT] LIKE LOWER(<right>)
            self.out.push_str("LOWER(");
            match left {
                Left::Sql(sql) => self.out.push_str(sql),
                Left::Expr(expr) => self.write_expression(expr)?,
            }
            self.out.push(')');
            self.out
                .push_str(if negated { " NOT LIKE " } else { " LIKE " });
            self.out.push_str("LOWER(");
            self.write_expression(right)?;
            self.out.push(')');
        }

        // NOT ILIKE drops NULL rows; a negated filter keeps them.
        if negated {
            self.out.push_str(" OR ");
            self.write_left(left)?;
            self.out.push_str(" IS NULL)");
        }
        Ok(())
    }

    fn write_in(&mut self, left: Left<'_>, right: &Expression, negated: bool) -> Result<()> {
        match right {
            Expression::Value(Value::Array(values)) => self.write_in_values(left, values, negated),
            Expression::Value(other) => Err(MetricsSqlError::Type(format!(
                "the right value must be a list of values for an IN condition, got {other}"
            ))),
            _ => {
                self.write_left(left)?;
                self.out
                    .push_str(if negated { " NOT IN " } else { " IN " });
                self.write_expression(right)
            }
        }
    }

    fn write_in_values(&mut self, left: Left<'_>, values: &[Value], negated: bool) -> Result<()> {
        // Membership in an empty set is false; its negation is true.
        if values.is_empty() {
            self.out.push_str(if negated { "TRUE" } else { "FALSE" });
            return Ok(());
        }

        let has_null = values.iter().any(Value::is_null);
        let bound: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();

        let wrap = negated || has_null;
        if wrap {
            self.out.push('(');
        }

        if bound.is_empty() {
            // Only NULLs: membership reduces to a null check.
            self.write_left(left)?;
            self.out
                .push_str(if negated { " IS NOT NULL" } else { " IS NULL" });
        } else {
            self.write_left(left)?;
            self.out
                .push_str(if negated { " NOT IN (" } else { " IN (" });
            for i in 0..bound.len() {
                if i > 0 {
                    self.out.push(',');
                }
                self.out.push('?');
            }
            self.out.push(')');
            self.params.extend(bound.into_iter().cloned());

            if has_null {
                // IN never matches NULL, so NULL membership is spelled out.
                self.out
                    .push_str(if negated { " AND " } else { " OR " });
                self.write_left(left)?;
                self.out
                    .push_str(if negated { " IS NOT NULL" } else { " IS NULL" });
            } else if negated {
                // NOT IN drops NULL rows; a negated filter keeps them.
                self.out.push_str(" OR ");
                self.write_left(left)?;
                self.out.push_str(" IS NULL");
            }
        }

        if wrap {
            self.out.push(')');
        }
        Ok(())
    }

    fn write_left(&mut self, left: Left<'_>) -> Result<()> {
        match left {
            Left::Sql(sql) => {
                self.write_parenthesized(sql);
                Ok(())
            }
            Left::Expr(expr) => self.write_expression(expr),
        }
    }

    fn write_parenthesized(&mut self, sql: &str) {
        self.out.push('(');
        self.out.push_str(sql);
        self.out.push(')');
    }

    fn resolve(&self, name: &str) -> Result<ResolvedName> {
        self.scope.resolve_name(self.ast, name)
    }
}

/// Splits a comparison's children into `(left, right)`.
///
/// IN/NIN also accept a flattened list (`[left, v1, v2, ...]`) or a bare
/// scalar on the right; both become a single list value. The input is
/// never modified.
fn binary_operands(exprs: &[Expression], op: Operator) -> Result<(&Expression, Cow<'_, Expression>)> {
    if op.is_membership() {
        match exprs {
            [left, Expression::Value(val)] if !val.is_array() => {
                let list = Expression::Value(Value::Array(vec![val.clone()]));
                return Ok((left, Cow::Owned(list)));
            }
            [left, rest @ ..] if rest.len() > 1 => {
                let values = rest
                    .iter()
                    .map(|e| match e {
                        Expression::Value(val) => Ok(val.clone()),
                        _ => Err(MetricsSqlError::Type(format!(
                            "flattened {op} lists may only contain values"
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                return Ok((left, Cow::Owned(Expression::Value(Value::Array(values)))));
            }
            _ => {}
        }
    }

    match exprs {
        [left, right] => Ok((left, Cow::Borrowed(right))),
        _ => Err(MetricsSqlError::Arity(exprs.len())),
    }
}
