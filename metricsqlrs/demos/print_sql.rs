use std::{env, fs, path::PathBuf};

use metricsql::{query_builder::SqlBuilder, registry::MetricsViewRegistry, Query};
use tracing_subscriber::EnvFilter;

fn usage() {
    eprintln!("Usage: print_sql <metrics_views_dir> <query_json>");
    eprintln!(
        "Example: cargo run --example print_sql -- demos/metrics_views demos/queries/orders_by_country.json"
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let views_dir = PathBuf::from(args.remove(0));
    let query_path = PathBuf::from(args.remove(0));

    let registry = MetricsViewRegistry::load_from_dir(views_dir)?;
    let query_str = fs::read_to_string(query_path)?;
    let query: Query = serde_json::from_str(&query_str)?;

    let builder = SqlBuilder::from_default_config();
    let compiled = builder.build_for_query(&registry, &query)?;
    println!("{}", compiled.sql);
    println!("-- params: {}", serde_json::to_string(&compiled.params)?);
    Ok(())
}
