//! Stats calculator with pinned per-node estimates.

use crate::error::{OptimizerError, OptimizerResult};
use crate::lookup::Lookup;
use crate::plan::{PlanNode, PlanNodeId, PlanRef};
use crate::session::Session;
use crate::stats::{StatsCalculator, StatsEstimate, StatsProvider};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Delegating calculator whose overrides, keyed by plan node id, win over the delegate.
pub struct TestingStatsCalculator {
    delegate: Arc<dyn StatsCalculator>,
    overrides: HashMap<PlanNodeId, StatsEstimate>,
}

impl TestingStatsCalculator {
    pub fn new(delegate: Arc<dyn StatsCalculator>) -> Self {
        Self {
            delegate,
            overrides: HashMap::new(),
        }
    }

    pub fn set_override(&mut self, id: impl Into<String>, stats: StatsEstimate) {
        self.overrides.insert(PlanNodeId::new(id), stats);
    }

    pub fn clear_overrides(&mut self) {
        self.overrides.clear();
    }

    pub fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    /// Every override must name a node of `plan`.
    pub fn check_overrides(&self, plan: &PlanNode) -> OptimizerResult<()> {
        let mut ids = BTreeSet::new();
        collect_ids(plan, &mut ids);
        let mut unknown: Vec<&str> = self
            .overrides
            .keys()
            .filter(|id| !ids.contains(*id))
            .map(PlanNodeId::as_str)
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort_unstable();
        Err(OptimizerError::estimation(format!(
            "stats overrides for node ids not in the plan: {}",
            unknown.join(", ")
        )))
    }
}

fn collect_ids(node: &PlanNode, ids: &mut BTreeSet<PlanNodeId>) {
    ids.insert(node.id.clone());
    for source in &node.sources {
        if let PlanRef::Node(child) = source {
            collect_ids(child, ids);
        }
    }
}

impl StatsCalculator for TestingStatsCalculator {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        source_stats: &dyn StatsProvider,
        lookup: &Lookup,
        session: &Session,
    ) -> OptimizerResult<StatsEstimate> {
        if let Some(stats) = self.overrides.get(&node.id) {
            return Ok(stats.clone());
        }
        self.delegate
            .calculate_stats(node, source_stats, lookup, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PlanNodeIdAllocator;
    use crate::builder::PlanBuilder;
    use crate::catalog::InMemoryCatalog;
    use crate::expr::{DataType, Expr, TableRef};
    use crate::memo::Memo;
    use crate::stats::{CachingStatsProvider, DefaultStatsCalculator};

    #[test]
    fn test_override_wins_over_delegate() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let scan = b.table_scan_with_id("scan", TableRef::new("tpch", "t"), vec![a]);
        let filter = b.filter(Expr::literal_true(), scan);

        let mut calculator =
            TestingStatsCalculator::new(Arc::new(DefaultStatsCalculator::new(Arc::new(InMemoryCatalog::new()))));
        calculator.set_override("scan", StatsEstimate::new(42.0, 336.0));
        calculator.check_overrides(&filter).unwrap();

        let memo = Memo::new(filter.into(), None).unwrap();
        let lookup = Lookup::from_memo(&memo);
        let session = Session::new("q");
        let provider = CachingStatsProvider::new(&calculator, Some(&memo), &lookup, &session);
        let root = memo.reference_to(memo.root_group()).unwrap();
        let scan_ref = memo.node(root.group).unwrap().sources[0].clone();

        assert_eq!(provider.get_stats(&scan_ref).unwrap().row_count, 42.0);
        // The filter is estimated by the delegate on top of the pinned scan.
        assert_eq!(provider.get_stats(&root.into()).unwrap().row_count, 42.0);
    }

    #[test]
    fn test_unknown_override_key_is_rejected() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);

        let mut calculator =
            TestingStatsCalculator::new(Arc::new(DefaultStatsCalculator::new(Arc::new(InMemoryCatalog::new()))));
        calculator.set_override("nope", StatsEstimate::new(1.0, 8.0));
        let err = calculator.check_overrides(&scan).unwrap_err();
        assert!(matches!(err, OptimizerError::Estimation(ref msg) if msg.contains("nope")));
    }
}
