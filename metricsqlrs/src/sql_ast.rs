use serde_json::Value;

use crate::dialect::Dialect;

/// SQL text with `?` placeholders and the values bound to them, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledSql {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SelectItem {
    /// Rendered SQL expression.
    pub expr: String,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub enum FromSource {
    /// Table name, qualified by the renderer.
    Table(String),
    Subquery(Box<SelectQuery>),
}

impl Default for FromSource {
    fn default() -> Self {
        FromSource::Table(String::new())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableRef {
    pub source: FromSource,
    pub alias: Option<String>,
    /// Lateral FROM items (e.g. unnest joins) appended after the source.
    pub laterals: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    /// Boolean predicates AND-ed together; each carries its own params.
    pub filters: Vec<CompiledSql>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn render_select(&self, query: &SelectQuery) -> CompiledSql {
        let mut out = CompiledSql::default();
        self.write_select(query, &mut out);
        out
    }

    fn write_select(&self, query: &SelectQuery, out: &mut CompiledSql) {
        let select_items: Vec<String> = query
            .select
            .iter()
            .map(|item| format!("{} AS {}", item.expr, self.dialect.quote_ident(&item.alias)))
            .collect();
        out.sql.push_str("SELECT ");
        if select_items.is_empty() {
            out.sql.push('*');
        } else {
            out.sql.push_str(&select_items.join(", "));
        }

        out.sql.push_str(" FROM ");
        self.write_table_ref(&query.from, out);

        // Params follow placeholder order: FROM subqueries first, then filters.
        let filters: Vec<&CompiledSql> = query.filters.iter().filter(|f| !f.is_empty()).collect();
        if !filters.is_empty() {
            out.sql.push_str(" WHERE ");
            let wrap = filters.len() > 1;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    out.sql.push_str(" AND ");
                }
                if wrap {
                    out.sql.push('(');
                }
                out.sql.push_str(&filter.sql);
                if wrap {
                    out.sql.push(')');
                }
                out.params.extend(filter.params.iter().cloned());
            }
        }

        if !query.group_by.is_empty() {
            out.sql.push_str(&format!(" GROUP BY {}", query.group_by.join(", ")));
        }

        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {dir}", o.expr)
                })
                .collect();
            out.sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        if let Some(limit) = query.limit {
            out.sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            out.sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    fn write_table_ref(&self, table: &TableRef, out: &mut CompiledSql) {
        match &table.source {
            FromSource::Table(name) => out.sql.push_str(&self.dialect.qualify_table(name)),
            FromSource::Subquery(inner) => {
                out.sql.push('(');
                self.write_select(inner, out);
                out.sql.push(')');
            }
        }
        if let Some(alias) = &table.alias {
            out.sql.push(' ');
            out.sql.push_str(&self.dialect.quote_ident(alias));
        }
        for lateral in &table.laterals {
            out.sql.push_str(", ");
            out.sql.push_str(lateral);
        }
    }
}
