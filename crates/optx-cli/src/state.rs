//! # Driver State
//!
//! Everything one invocation of `optx` needs, loaded up front:
//!
//! - **Catalog**: table columns, statistics and unique keys, read from a JSON file in
//!   the `InMemoryCatalog` layout. Without a file every table is unknown and estimates
//!   print as `?`.
//! - **Optimizer config**: time budget, iteration budget and apply order, read from a
//!   JSON file. Missing fields keep their defaults.
//! - **Session**: query id plus the `--set` system properties. Session properties
//!   override the config's budget for this query.
//!
//! The optimization itself runs inside a transaction scope, the same way a planner
//! would run it for a real query.

use crate::error::{CliError, CliResult};
use optx_core::allocator::PlanNodeIdAllocator;
use optx_core::catalog::InMemoryCatalog;
use optx_core::config::OptimizerConfig;
use optx_core::cost::{CachingCostProvider, DefaultCostCalculator};
use optx_core::error::{OptimizerError, OptimizerResult};
use optx_core::lookup::Lookup;
use optx_core::optimizer::{IterativeOptimizer, OptimizedPlan};
use optx_core::plan::{PlanNode, PlanNodeRef, PlanRef};
use optx_core::printer::PlanPrinter;
use optx_core::properties::DefaultLogicalPropertiesProvider;
use optx_core::session::Session;
use optx_core::stats::{CachingStatsProvider, DefaultStatsCalculator};
use optx_core::transaction::{run_in_transaction, NoopTransactionScope};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct CliState {
    pub catalog: Arc<InMemoryCatalog>,
    pub config: OptimizerConfig,
    pub session: Session,
    /// Derive logical properties so that key- and cardinality-based rules can fire.
    pub logical_properties: bool,
}

impl CliState {
    pub fn new(catalog: InMemoryCatalog, config: OptimizerConfig, session: Session) -> Self {
        Self {
            catalog: Arc::new(catalog),
            config,
            session,
            logical_properties: true,
        }
    }

    pub fn optimizer(&self) -> IterativeOptimizer {
        let mut optimizer = IterativeOptimizer::new(
            optx_rules::default_rule_set(),
            Arc::new(DefaultStatsCalculator::new(self.catalog.clone())),
            Arc::new(DefaultCostCalculator),
        )
        .with_config(self.config.clone());
        if self.logical_properties {
            optimizer = optimizer.with_logical_properties_provider(Arc::new(
                DefaultLogicalPropertiesProvider::new(self.catalog.clone()),
            ));
        }
        optimizer
    }

    /// Optimize `plan` in a transaction of the session.
    pub fn optimize(&self, plan: PlanNodeRef) -> CliResult<OptimizedPlan> {
        plan.validate()?;
        // Fresh ids must not collide with the ones already in the plan.
        let ids = PlanNodeIdAllocator::starting_at(next_free_id(&plan)?);
        let optimizer = self.optimizer();
        let result = run_in_transaction(&NoopTransactionScope, &self.session, &[], |session| {
            optimizer.optimize(plan, session, &ids)
        })?;
        info!(
            "Optimized query {} in {} rule attempts ({} applied)",
            self.session.query_id, result.iterations, result.rules_applied
        );
        Ok(result)
    }

    /// Text rendering of `plan` annotated with estimates from the catalog.
    pub fn explain(&self, plan: &PlanNodeRef) -> String {
        let calculator = DefaultStatsCalculator::new(self.catalog.clone());
        let cost_calculator = DefaultCostCalculator;
        let lookup = Lookup::no_lookup();
        let stats = CachingStatsProvider::new(&calculator, None, &lookup, &self.session);
        let cost = CachingCostProvider::new(&cost_calculator, &stats, None, &lookup, &self.session);
        PlanPrinter::new(&lookup)
            .with_stats(&stats)
            .with_cost(&cost)
            .print(&PlanRef::Node(plan.clone()))
    }
}

/// One past the largest numeric node id in `plan`.
fn next_free_id(plan: &PlanNode) -> OptimizerResult<u64> {
    let own = match plan.id.as_str().parse::<u64>() {
        Ok(id) => id.checked_add(1).ok_or_else(|| {
            OptimizerError::invalid_plan(format!("node id {} leaves no room for new ids", plan.id))
        })?,
        Err(_) => 0,
    };
    plan.sources
        .iter()
        .filter_map(PlanRef::as_node)
        .try_fold(own, |max, source| Ok(max.max(next_free_id(source)?)))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::builder::PlanBuilder;
    use optx_core::catalog::ColumnMetadata;
    use optx_core::expr::{DataType, Expr, TableRef};
    use optx_core::plan::{LogicalOp, OpKind};
    use optx_core::session::ITERATIVE_OPTIMIZER_MAX_ITERATIONS;
    use optx_core::stats::StatsEstimate;

    fn nation_catalog() -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            &TableRef::new("tpch", "nation"),
            vec![ColumnMetadata::new("nationkey", DataType::Bigint)],
            StatsEstimate::new(25.0, 200.0),
        );
        catalog
    }

    fn plan_json() -> String {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let nationkey = b.variable("nationkey", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "nation"), vec![nationkey]);
        let filter = b.filter(Expr::literal_true(), scan);
        let plan = b.limit(10, filter);
        serde_json::to_string(&plan).unwrap()
    }

    #[test]
    fn test_optimize_json_plan() {
        let plan: PlanNodeRef = serde_json::from_str(&plan_json()).unwrap();
        let state = CliState::new(nation_catalog(), OptimizerConfig::default(), Session::new("cli"));
        let result = state.optimize(plan).unwrap();

        assert_eq!(result.plan.kind(), OpKind::Limit);
        let scan = result.plan.sources[0].as_node().unwrap();
        assert_eq!(scan.kind(), OpKind::TableScan);
        assert!(matches!(&result.plan.op, LogicalOp::Limit { count: 10, .. }));

        let text = state.explain(&result.plan);
        assert!(text.contains("- TableScan[tpch.nation] => [nationkey:bigint]"), "{text}");
        assert!(text.contains("rows: 25 (200B)"), "{text}");
    }

    #[test]
    fn test_fresh_ids_follow_plan_ids() {
        let plan: PlanNodeRef = serde_json::from_str(&plan_json()).unwrap();
        assert_eq!(next_free_id(&plan).unwrap(), 3);
    }

    #[test]
    fn test_exhausted_plan_ids_are_rejected() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let nationkey = b.variable("nationkey", DataType::Bigint);
        let scan = b.table_scan_with_id(
            u64::MAX.to_string(),
            TableRef::new("tpch", "nation"),
            vec![nationkey],
        );
        let plan = b.limit(10, scan);
        assert!(matches!(next_free_id(&plan), Err(OptimizerError::InvalidPlan(_))));

        let state = CliState::new(nation_catalog(), OptimizerConfig::default(), Session::new("cli"));
        let err = state.optimize(plan).unwrap_err();
        assert!(matches!(err, CliError::Optimizer(OptimizerError::InvalidPlan(_))));
    }

    #[test]
    fn test_session_budget_applies() {
        let plan: PlanNodeRef = serde_json::from_str(&plan_json()).unwrap();
        let session = Session::new("cli").with_system_property(ITERATIVE_OPTIMIZER_MAX_ITERATIONS, "0");
        let state = CliState::new(nation_catalog(), OptimizerConfig::default(), session);
        let err = state.optimize(plan).unwrap_err();
        assert!(matches!(
            err,
            CliError::Optimizer(OptimizerError::PlanOptimizationTimeout { .. })
        ));
    }
}
