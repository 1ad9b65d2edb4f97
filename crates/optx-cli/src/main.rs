//! # optx: Command Line Driver for the Iterative Optimizer
//!
//! Reads a logical plan as JSON, rewrites it to a fixpoint of the default rule set and
//! prints the result.
//!
//! ```text
//! optx --plan plan.json --catalog tpch.json --set disabled_rules=JoinCommutativity
//! ```
//!
//! ## Output
//!
//! By default the optimized plan is printed as indented text with row, size and cost
//! estimates per node, followed by a one-line summary. With `--json` the full result
//! (plan, iteration count and per-rule statistics) is printed as JSON instead.
//!
//! ## Configuration
//!
//! - `--catalog`: JSON catalog with table columns, statistics and unique keys.
//! - `--config`: JSON optimizer config (`timeout_ms`, `max_iterations`, `apply_order`).
//! - `--set NAME=VALUE`: session system property, repeatable. Session properties
//!   override the config for this query.
//!
//! Logging is controlled by the `RUST_LOG` environment variable (defaults to
//! `optx=info`). Logs go to stderr so that stdout stays machine-readable.

mod error;
mod state;

use clap::Parser;
use error::CliResult;
use optx_core::catalog::InMemoryCatalog;
use optx_core::config::OptimizerConfig;
use optx_core::plan::PlanNodeRef;
use optx_core::session::Session;
use state::{read_json, CliState};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "optx", version, about = "Optimize a JSON logical plan")]
struct Args {
    /// Plan to optimize, as JSON.
    #[arg(long)]
    plan: PathBuf,

    /// Catalog with table metadata and statistics, as JSON.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Optimizer configuration, as JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session system property.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,

    #[arg(long, default_value = "optx")]
    query_id: String,

    /// Skip logical property derivation.
    #[arg(long)]
    no_logical_properties: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{value}'")),
    }
}

fn run(args: Args) -> CliResult<()> {
    let catalog: InMemoryCatalog = match &args.catalog {
        Some(path) => read_json(path)?,
        None => InMemoryCatalog::new(),
    };
    let config: OptimizerConfig = match &args.config {
        Some(path) => read_json(path)?,
        None => OptimizerConfig::default(),
    };
    let mut session = Session::new(args.query_id);
    for (name, value) in args.properties {
        session.set_system_property(name, value);
    }
    let plan: PlanNodeRef = read_json(&args.plan)?;

    let mut state = CliState::new(catalog, config, session);
    state.logical_properties = !args.no_logical_properties;
    let result = state.optimize(plan)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", state.explain(&result.plan));
        println!(
            "-- {} rule attempts, {} rewrites",
            result.iterations, result.rules_applied
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .parse_lossy(std::env::var("RUST_LOG").unwrap_or_else(|_| "optx=info".into())),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            eprintln!("optx: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property() {
        assert_eq!(
            parse_property("disabled_rules = MergeLimits").unwrap(),
            ("disabled_rules".to_string(), "MergeLimits".to_string())
        );
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=x").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from([
            "optx",
            "--plan",
            "plan.json",
            "--set",
            "join_reordering_enabled=false",
            "--json",
        ]);
        assert_eq!(args.plan, PathBuf::from("plan.json"));
        assert_eq!(
            args.properties,
            vec![("join_reordering_enabled".to_string(), "false".to_string())]
        );
        assert!(args.json);
    }
}
