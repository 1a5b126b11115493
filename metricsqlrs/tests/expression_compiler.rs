//! Integration tests for compiling filter expressions into SQL predicates.

use metricsql::dialect::{BigQueryDialect, Dialect, DuckDbDialect, PostgresDialect, UnnestFrom};
use metricsql::error::{MetricsSqlError, Result};
use metricsql::expression::{Condition, Expression, Operator, Subquery};
use metricsql::metrics_view::{MetricsView, SecurityPolicy};
use metricsql::query::{Dimension, Measure, Query, TimeGrain, TimeRange};
use metricsql::query_builder::SqlBuilder;
use metricsql::sql_ast::CompiledSql;
use metricsql::MetricsSqlConfig;
use serde_json::{json, Value};

fn orders_view() -> MetricsView {
    serde_yaml::from_str(
        r#"
name: orders
table: orders
time_dimension: created_at
dimensions:
  - country
  - status
  - created_at
  - name: domain
    expression: lower(host)
  - name: tags
    column: tags
    unnest: true
measures:
  - name: revenue
    expression: SUM(amount)
    label: Revenue
  - name: orders
    expression: count(*)
"#,
    )
    .unwrap()
}

fn base_query() -> Query {
    Query {
        metrics_view: "orders".to_string(),
        dimensions: vec![Dimension::new("country")],
        measures: vec![Measure::new("revenue")],
        ..Default::default()
    }
}

fn compile_with(dialect: &dyn Dialect, query: &Query, expr: &Expression) -> Result<CompiledSql> {
    let mv = orders_view();
    SqlBuilder::default().compile_filter(&mv, &SecurityPolicy::default(), query, dialect, expr)
}

fn compile(expr: &Expression) -> CompiledSql {
    let compiled = compile_with(&DuckDbDialect, &base_query(), expr).unwrap();
    assert_eq!(
        compiled.sql.matches('?').count(),
        compiled.params.len(),
        "placeholder count must match params for {}",
        compiled.sql
    );
    compiled
}

fn compile_err(expr: &Expression) -> MetricsSqlError {
    compile_with(&DuckDbDialect, &base_query(), expr).unwrap_err()
}

fn cond(op: Operator, exprs: Vec<Expression>) -> Expression {
    Expression::Condition(Condition { op, exprs })
}

#[test]
fn equality_binds_value() {
    let compiled = compile(&Expression::eq("country", "US"));
    assert_eq!(compiled.sql, "(\"country\") = ?");
    assert_eq!(compiled.params, vec![json!("US")]);
}

#[test]
fn comparison_operators_render_tokens() {
    let cases = [
        (Operator::Neq, "!="),
        (Operator::Lt, "<"),
        (Operator::Lte, "<="),
        (Operator::Gt, ">"),
        (Operator::Gte, ">="),
    ];
    for (op, token) in cases {
        let compiled = compile(&Expression::compare(op, "created_at", "2024-01-01"));
        assert_eq!(compiled.sql, format!("(\"created_at\") {token} ?"));
    }
}

#[test]
fn expression_dimensions_compile_to_their_sql() {
    let compiled = compile(&Expression::eq("domain", "example.com"));
    assert_eq!(compiled.sql, "(lower(host)) = ?");
}

#[test]
fn decodes_and_compiles_wire_format() {
    let expr: Expression = serde_json::from_value(json!({
        "cond": {"op": "eq", "exprs": [{"name": "country"}, {"val": "US"}]}
    }))
    .unwrap();
    let compiled = compile(&expr);
    assert_eq!(compiled.sql, "(\"country\") = ?");
    assert_eq!(compiled.params, vec![json!("US")]);
}

#[test]
fn and_or_wrap_children() {
    let expr = Expression::and(vec![
        Expression::eq("country", "US"),
        Expression::or(vec![
            Expression::eq("status", "paid"),
            Expression::eq("status", "shipped"),
        ]),
    ]);
    let compiled = compile(&expr);
    assert_eq!(
        compiled.sql,
        "((\"country\") = ? AND ((\"status\") = ? OR (\"status\") = ?))"
    );
    assert_eq!(compiled.params, vec![json!("US"), json!("paid"), json!("shipped")]);
}

#[test]
fn empty_and_or_produce_no_predicate() {
    assert!(compile(&Expression::and(vec![])).is_empty());
    assert!(compile(&Expression::or(vec![])).is_empty());
    let single = compile(&Expression::or(vec![Expression::eq("country", "US")]));
    assert_eq!(single.sql, "((\"country\") = ?)");
}

#[test]
fn in_list_binds_each_value() {
    let compiled = compile(&Expression::in_list("country", vec![json!("US"), json!("CA")]));
    assert_eq!(compiled.sql, "(\"country\") IN (?,?)");
    assert_eq!(compiled.params, vec![json!("US"), json!("CA")]);
}

#[test]
fn not_in_keeps_null_rows() {
    let compiled = compile(&Expression::not_in_list("country", vec![json!("US"), json!("CA")]));
    assert_eq!(
        compiled.sql,
        "((\"country\") NOT IN (?,?) OR (\"country\") IS NULL)"
    );
}

#[test]
fn empty_lists_are_constant() {
    assert_eq!(compile(&Expression::in_list("country", vec![])).sql, "FALSE");
    let compiled = compile(&Expression::not_in_list("country", vec![]));
    assert_eq!(compiled.sql, "TRUE");
    assert!(compiled.params.is_empty());
}

#[test]
fn in_list_with_null_matches_null_rows() {
    let compiled = compile(&Expression::in_list("country", vec![json!("US"), Value::Null]));
    assert_eq!(
        compiled.sql,
        "((\"country\") IN (?) OR (\"country\") IS NULL)"
    );
    assert_eq!(compiled.params, vec![json!("US")]);
}

#[test]
fn flattened_not_in_with_null() {
    let expr = cond(
        Operator::Nin,
        vec![
            Expression::name("status"),
            Expression::value(1),
            Expression::value(2),
            Expression::Value(Value::Null),
        ],
    );
    let compiled = compile(&expr);
    assert_eq!(
        compiled.sql,
        "((\"status\") NOT IN (?,?) AND (\"status\") IS NOT NULL)"
    );
    assert_eq!(compiled.params, vec![json!(1), json!(2)]);
}

#[test]
fn null_only_lists_become_null_checks() {
    let expr = cond(
        Operator::In,
        vec![Expression::name("country"), Expression::Value(Value::Null)],
    );
    assert_eq!(compile(&expr).sql, "((\"country\") IS NULL)");

    let compiled = compile(&Expression::not_in_list("country", vec![Value::Null]));
    assert_eq!(compiled.sql, "((\"country\") IS NOT NULL)");
    assert!(compiled.params.is_empty());
}

#[test]
fn scalar_membership_operand_is_wrapped() {
    let expr = cond(
        Operator::In,
        vec![Expression::name("country"), Expression::value("US")],
    );
    let compiled = compile(&expr);
    assert_eq!(compiled.sql, "(\"country\") IN (?)");
    assert_eq!(compiled.params, vec![json!("US")]);
}

#[test]
fn compilation_does_not_modify_the_expression() {
    let expr = cond(
        Operator::Nin,
        vec![
            Expression::name("status"),
            Expression::value(1),
            Expression::value(2),
        ],
    );
    let before = expr.clone();
    let first = compile(&expr);
    let second = compile(&expr);
    assert_eq!(expr, before);
    assert_eq!(first, second);
}

#[test]
fn ilike_is_native_where_supported() {
    let compiled = compile(&Expression::compare(Operator::Ilike, "country", "%us%"));
    assert_eq!(compiled.sql, "(\"country\") ILIKE ?");

    let compiled = compile(&Expression::compare(Operator::Nilike, "country", "%us%"));
    assert_eq!(
        compiled.sql,
        "((\"country\") NOT ILIKE ? OR (\"country\") IS NULL)"
    );
}

#[test]
fn ilike_falls_back_to_lower_like() {
    let query = base_query();
    let compiled = compile_with(
        &BigQueryDialect,
        &query,
        &Expression::compare(Operator::Ilike, "country", "%us%"),
    )
    .unwrap();
    assert_eq!(compiled.sql, "LOWER(`country`) LIKE LOWER(?)");
    assert_eq!(compiled.params, vec![json!("%us%")]);

    let compiled = compile_with(
        &BigQueryDialect,
        &query,
        &Expression::compare(Operator::Nilike, "country", "%us%"),
    )
    .unwrap();
    assert_eq!(
        compiled.sql,
        "(LOWER(`country`) NOT LIKE LOWER(?) OR (`country`) IS NULL)"
    );
}

#[test]
fn unnest_dimension_filters_through_exists() {
    let compiled = compile(&Expression::eq("tags", "vip"));
    assert_eq!(
        compiled.sql,
        "EXISTS (SELECT 1 FROM LATERAL UNNEST(\"tags\") t0(\"tags\") WHERE (\"t0\".\"tags\") = ?)"
    );
    assert_eq!(compiled.params, vec![json!("vip")]);
}

#[test]
fn negated_unnest_filters_use_not_exists() {
    let compiled = compile(&Expression::compare(Operator::Neq, "tags", "vip"));
    assert_eq!(
        compiled.sql,
        "NOT EXISTS (SELECT 1 FROM LATERAL UNNEST(\"tags\") t0(\"tags\") WHERE (\"t0\".\"tags\") = ?)"
    );

    let compiled = compile(&Expression::not_in_list("tags", vec![json!("a"), json!("b")]));
    assert_eq!(
        compiled.sql,
        "NOT EXISTS (SELECT 1 FROM LATERAL UNNEST(\"tags\") t0(\"tags\") WHERE (\"t0\".\"tags\") IN (?,?))"
    );

    let compiled = compile(&Expression::compare(Operator::Nilike, "tags", "v%"));
    assert_eq!(
        compiled.sql,
        "NOT EXISTS (SELECT 1 FROM LATERAL UNNEST(\"tags\") t0(\"tags\") WHERE (\"t0\".\"tags\") ILIKE ?)"
    );
}

#[test]
fn unnest_aliases_are_unique_within_a_filter() {
    let compiled = compile(&Expression::and(vec![
        Expression::eq("tags", "a"),
        Expression::eq("tags", "b"),
    ]));
    assert!(compiled.sql.contains("t0(\"tags\") WHERE (\"t0\".\"tags\") = ?"));
    assert!(compiled.sql.contains("t1(\"tags\") WHERE (\"t1\".\"tags\") = ?"));
}

#[test]
fn unnest_renders_per_dialect() {
    let query = base_query();
    let expr = Expression::eq("tags", "vip");

    let pg = compile_with(&PostgresDialect, &query, &expr).unwrap();
    assert_eq!(
        pg.sql,
        "EXISTS (SELECT 1 FROM LATERAL UNNEST(\"tags\") AS t0(\"tags\") WHERE (\"t0\".\"tags\") = ?)"
    );

    let bq = compile_with(&BigQueryDialect, &query, &expr).unwrap();
    assert_eq!(
        bq.sql,
        "EXISTS (SELECT 1 FROM UNNEST(ARRAY(SELECT AS STRUCT v AS `tags` FROM UNNEST(`tags`) AS v)) AS `t0` \
         WHERE (`t0`.`tags`) = ?)"
    );
}

#[test]
fn unnest_is_rejected_on_the_right() {
    let expr = cond(
        Operator::Eq,
        vec![Expression::name("country"), Expression::name("tags")],
    );
    let err = compile_err(&expr);
    assert!(matches!(
        err,
        MetricsSqlError::UnsupportedUnnestPosition { ref name, right_operand: true } if name == "tags"
    ));
    assert!(err.to_string().contains("left side"));
}

#[test]
fn unnest_is_rejected_outside_binary_conditions() {
    let err = compile_err(&Expression::and(vec![Expression::name("tags")]));
    assert!(matches!(
        err,
        MetricsSqlError::UnsupportedUnnestPosition { right_operand: false, .. }
    ));
}

struct ImplicitUnnestDialect;

impl Dialect for ImplicitUnnestDialect {
    fn name(&self) -> &'static str {
        "implicit"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{ident}]")
    }

    fn lateral_unnest(&self, _expr: &str, _table_alias: &str, _column: &str) -> Result<UnnestFrom> {
        Ok(UnnestFrom::Automatic)
    }

    fn time_floor(&self, expr: &str, grain: TimeGrain, _time_zone: Option<&str>) -> String {
        format!("floor_{}({expr})", grain.as_str())
    }
}

#[test]
fn automatic_unnest_compares_directly() {
    let compiled = compile_with(
        &ImplicitUnnestDialect,
        &base_query(),
        &Expression::compare(Operator::Neq, "tags", "vip"),
    )
    .unwrap();
    assert_eq!(compiled.sql, "([tags]) != ?");
}

#[test]
fn unknown_and_hidden_dimensions_are_rejected() {
    assert!(matches!(
        compile_err(&Expression::eq("nope", 1)),
        MetricsSqlError::UnknownDimension { ref name, .. } if name == "nope"
    ));

    let mv = orders_view();
    let security = SecurityPolicy {
        exclude: vec!["status".to_string()],
        ..Default::default()
    };
    let err = SqlBuilder::default()
        .compile_filter(
            &mv,
            &security,
            &base_query(),
            &DuckDbDialect,
            &Expression::eq("status", "paid"),
        )
        .unwrap_err();
    assert!(matches!(err, MetricsSqlError::UnknownDimension { .. }));
}

#[test]
fn measures_are_not_visible_in_where() {
    assert!(matches!(
        compile_err(&Expression::eq("revenue", 10)),
        MetricsSqlError::UnknownDimension { ref name, .. } if name == "revenue"
    ));
}

#[test]
fn malformed_conditions_are_rejected() {
    let unspecified = cond(
        Operator::Unspecified,
        vec![Expression::name("country"), Expression::value("US")],
    );
    assert!(matches!(
        compile_err(&unspecified),
        MetricsSqlError::InvalidOperator(_)
    ));

    let unary = cond(Operator::Eq, vec![Expression::name("country")]);
    assert!(matches!(compile_err(&unary), MetricsSqlError::Arity(1)));

    let mixed = cond(
        Operator::In,
        vec![
            Expression::name("country"),
            Expression::value("US"),
            Expression::name("status"),
        ],
    );
    assert!(matches!(compile_err(&mixed), MetricsSqlError::Type(_)));

    let nested = Expression::and(vec![Expression::eq("country", "US"), unary]);
    assert!(matches!(compile_err(&nested), MetricsSqlError::Arity(1)));
}

#[test]
fn unknown_operator_fails_decoding() {
    let err = serde_json::from_value::<Expression>(json!({
        "cond": {"op": "like", "exprs": []}
    }))
    .unwrap_err();
    assert!(err.to_string().contains("like"));
}

fn domain_subquery() -> Expression {
    Expression::Subquery(Box::new(Subquery {
        dimension: Dimension::new("domain"),
        measures: vec![Measure::new("revenue")],
        r#where: Some(Expression::eq("country", "US")),
        having: Some(Expression::compare(Operator::Gt, "revenue", 1000)),
    }))
}

#[test]
fn subquery_params_follow_outer_params() {
    let expr = Expression::and(vec![
        Expression::eq("status", "paid"),
        Expression::condition(
            Operator::In,
            vec![Expression::name("domain"), domain_subquery()],
        ),
    ]);
    let compiled = compile(&expr);
    assert_eq!(
        compiled.sql,
        "((\"status\") = ? AND (lower(host)) IN (SELECT \"domain\" FROM (\
         SELECT \"t0\".\"domain\" AS \"domain\", \"t0\".\"revenue\" AS \"revenue\" FROM (\
         SELECT lower(host) AS \"domain\", SUM(amount) AS \"revenue\" FROM \"orders\" \
         WHERE (\"country\") = ? GROUP BY lower(host)) \"t0\" WHERE (\"t0\".\"revenue\") > ?)))"
    );
    assert_eq!(compiled.params, vec![json!("paid"), json!("US"), json!(1000)]);
}

#[test]
fn subquery_inherits_time_range() {
    let query = Query {
        time_range: Some(TimeRange {
            start: Some("2024-01-01".to_string()),
            end: None,
        }),
        ..base_query()
    };
    let subquery = Expression::Subquery(Box::new(Subquery {
        dimension: Dimension::new("country"),
        measures: vec![],
        r#where: None,
        having: None,
    }));
    let expr = Expression::condition(Operator::In, vec![Expression::name("country"), subquery]);
    let compiled = compile_with(&DuckDbDialect, &query, &expr).unwrap();
    assert_eq!(
        compiled.sql,
        "(\"country\") IN (SELECT \"country\" FROM (SELECT \"country\" AS \"country\" FROM \"orders\" \
         WHERE (\"created_at\") >= ? GROUP BY \"country\"))"
    );
    assert_eq!(compiled.params, vec![json!("2024-01-01")]);
}

#[test]
fn subquery_errors_are_wrapped() {
    let broken = Expression::Subquery(Box::new(Subquery {
        dimension: Dimension::new("domain"),
        measures: vec![],
        r#where: Some(Expression::eq("nope", 1)),
        having: None,
    }));
    let expr = Expression::condition(Operator::In, vec![Expression::name("domain"), broken]);
    let err = compile_err(&expr);
    let MetricsSqlError::Subquery { dimension, source } = &err else {
        panic!("expected a subquery error, got {err:?}");
    };
    assert_eq!(dimension, "domain");
    assert!(matches!(**source, MetricsSqlError::UnknownDimension { .. }));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn subquery_depth_is_bounded() {
    let config = MetricsSqlConfig::from_toml("[defaults]\nmax_subquery_depth = 0\n").unwrap();
    let builder = SqlBuilder::new(config);
    let mv = orders_view();
    let expr = Expression::condition(
        Operator::In,
        vec![Expression::name("domain"), domain_subquery()],
    );
    let err = builder
        .compile_filter(&mv, &SecurityPolicy::default(), &base_query(), &DuckDbDialect, &expr)
        .unwrap_err();
    let MetricsSqlError::Subquery { source, .. } = err else {
        panic!("expected a subquery error");
    };
    assert!(matches!(*source, MetricsSqlError::DepthExceeded { max: 0 }));
}
