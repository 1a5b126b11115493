use crate::config::MetricsSqlConfig;
use crate::dialect::Dialect;
use crate::error::{MetricsSqlError, Result};
use crate::expression::Expression;
use crate::metrics_view::{MetricsView, SecurityPolicy};
use crate::query::Query;
use crate::registry::MetricsViewRegistry;
use crate::sql_ast::{CompiledSql, SqlRenderer};

mod ast;
mod expr;
mod planner;
mod scope;

pub use ast::{Ast, CompileEnv, FieldNode, IdentifierGenerator, SelectNode};
pub use expr::compile_expression;
pub use scope::{ResolvedName, Scope};

/// Compiles a full query in an inherited context. Subquery expressions
/// recurse through this trait so the expression compiler never depends on
/// a concrete builder.
pub trait QueryCompiler {
    fn compile_query(&self, env: CompileEnv<'_>, query: &Query) -> Result<CompiledSql>;
}

#[derive(Debug, Clone, Default)]
pub struct SqlBuilder {
    config: MetricsSqlConfig,
}

impl SqlBuilder {
    pub fn new(config: MetricsSqlConfig) -> Self {
        Self { config }
    }

    /// Builder configured from the default config search path.
    pub fn from_default_config() -> Self {
        Self::new(MetricsSqlConfig::load_default())
    }

    pub fn config(&self) -> &MetricsSqlConfig {
        &self.config
    }

    /// Build SQL using a provided dialect (useful for tests).
    pub fn build_with_dialect(
        &self,
        metrics_view: &MetricsView,
        security: &SecurityPolicy,
        query: &Query,
        dialect: &dyn Dialect,
    ) -> Result<CompiledSql> {
        let identifiers = IdentifierGenerator::default();
        let env = CompileEnv {
            metrics_view,
            security,
            dialect,
            identifiers: &identifiers,
            depth: 0,
        };
        self.compile_query(env, query)
    }

    /// Build SQL by looking up the query's metrics view and choosing a
    /// dialect from config overrides, the view itself, then config defaults.
    pub fn build_for_query(&self, registry: &MetricsViewRegistry, query: &Query) -> Result<CompiledSql> {
        let mv = registry.get(&query.metrics_view).ok_or_else(|| {
            MetricsSqlError::Validation(format!("unknown metrics view {}", query.metrics_view))
        })?;
        let dialect = self.dialect_for(mv);
        let default_security = SecurityPolicy::default();
        let security = mv.security.as_ref().unwrap_or(&default_security);
        self.build_with_dialect(mv, security, query, dialect)
    }

    /// Compile a single filter expression against `query`'s projection, in
    /// the scope of the metrics view itself.
    pub fn compile_filter(
        &self,
        metrics_view: &MetricsView,
        security: &SecurityPolicy,
        query: &Query,
        dialect: &dyn Dialect,
        expr: &Expression,
    ) -> Result<CompiledSql> {
        let identifiers = IdentifierGenerator::default();
        let env = CompileEnv {
            metrics_view,
            security,
            dialect,
            identifiers: &identifiers,
            depth: 0,
        };
        let ast = Ast::new(env, query, self)?;
        compile_expression(&ast, expr, Scope::Base)
    }

    fn dialect_for(&self, mv: &MetricsView) -> &'static dyn Dialect {
        let kind = self
            .config
            .metrics_views
            .get(&mv.name)
            .and_then(|o| o.dialect)
            .or(mv.dialect)
            .unwrap_or(self.config.defaults.dialect);
        kind.dialect()
    }
}

impl QueryCompiler for SqlBuilder {
    fn compile_query(&self, env: CompileEnv<'_>, query: &Query) -> Result<CompiledSql> {
        let mv = env.metrics_view;
        let max = self.config.for_metrics_view(&mv.name).max_subquery_depth;
        if env.depth > max {
            return Err(MetricsSqlError::DepthExceeded { max });
        }
        if query.metrics_view != mv.name {
            return Err(MetricsSqlError::Validation(format!(
                "query targets metrics view {} but was compiled against {}",
                query.metrics_view, mv.name
            )));
        }

        let ast = Ast::new(env, query, self)?;
        let select = planner::build_select(&ast)?;
        let compiled = SqlRenderer::new(env.dialect).render_select(&select);
        tracing::debug!(
            metrics_view = %mv.name,
            dialect = env.dialect.name(),
            depth = env.depth,
            params = compiled.params.len(),
            "compiled metrics query"
        );
        Ok(compiled)
    }
}
