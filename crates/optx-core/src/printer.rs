//! Indented text rendering of plans, optionally annotated with estimates.
//!
//! ```text
//! - Limit[10] => [orderkey:bigint]
//!         Estimates: {rows: 10 (80B), cpu: 120000.0, memory: 0.0, network: 0.0}
//!     - TableScan[tpch.orders] => [orderkey:bigint]
//!             Estimates: {rows: 15000 (120000B), cpu: 120000.0, memory: 0.0, network: 0.0}
//! ```
//!
//! Rendering never fails: unknown estimates, estimation errors and unresolvable group
//! references print as `?`.

use crate::cost::CostProvider;
use crate::lookup::Lookup;
use crate::plan::{PlanNodeRef, PlanRef};
use crate::stats::StatsProvider;
use std::fmt::Write;

pub struct PlanPrinter<'a> {
    lookup: &'a Lookup<'a>,
    stats: Option<&'a dyn StatsProvider>,
    cost: Option<&'a dyn CostProvider>,
}

impl<'a> PlanPrinter<'a> {
    pub fn new(lookup: &'a Lookup<'a>) -> Self {
        Self {
            lookup,
            stats: None,
            cost: None,
        }
    }

    pub fn with_stats(mut self, stats: &'a dyn StatsProvider) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_cost(mut self, cost: &'a dyn CostProvider) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn print(&self, plan: &PlanRef) -> String {
        let mut out = String::new();
        self.print_node(plan, 0, &mut out);
        out
    }

    fn print_node(&self, plan: &PlanRef, depth: usize, out: &mut String) {
        let indent = "    ".repeat(depth);
        let node = match self.lookup.resolve(plan) {
            Ok(node) => node,
            Err(_) => {
                let group = plan.group().map_or("?".to_string(), |g| g.to_string());
                let _ = writeln!(out, "{indent}- <unresolved group {group}>");
                return;
            }
        };
        let outputs: Vec<String> = node.output_variables().iter().map(|v| v.to_string()).collect();
        let _ = writeln!(out, "{indent}- {} => [{}]", node.op, outputs.join(", "));
        if self.stats.is_some() || self.cost.is_some() {
            let _ = writeln!(out, "{indent}        Estimates: {}", self.estimates(plan));
        }
        for source in &node.sources {
            self.print_node(source, depth + 1, out);
        }
    }

    fn estimates(&self, plan: &PlanRef) -> String {
        let rows = match self.stats.map(|s| s.get_stats(plan)) {
            Some(Ok(stats)) if !stats.is_unknown() => {
                let size = stats.output_size_in_bytes(&plan.output_variables());
                if size.is_nan() {
                    format!("{:.0} (?)", stats.row_count)
                } else {
                    format!("{:.0} ({:.0}B)", stats.row_count, size)
                }
            }
            _ => "? (?)".to_string(),
        };
        let (cpu, memory, network) = match self.cost.map(|c| c.get_cost(plan)) {
            Some(Ok(cost)) => (
                format_cost(cost.cpu_cost),
                format_cost(cost.max_memory),
                format_cost(cost.network_cost),
            ),
            _ => ("?".to_string(), "?".to_string(), "?".to_string()),
        };
        format!("{{rows: {rows}, cpu: {cpu}, memory: {memory}, network: {network}}}")
    }
}

fn format_cost(value: f64) -> String {
    if value.is_nan() {
        "?".to_string()
    } else {
        format!("{value:.1}")
    }
}

/// Plain rendering of a fully materialized plan.
pub fn format_plan(plan: &PlanNodeRef) -> String {
    let lookup = Lookup::no_lookup();
    PlanPrinter::new(&lookup).print(&PlanRef::Node(plan.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PlanNodeIdAllocator;
    use crate::builder::PlanBuilder;
    use crate::catalog::{ColumnMetadata, InMemoryCatalog};
    use crate::cost::{CachingCostProvider, DefaultCostCalculator};
    use crate::expr::{DataType, TableRef};
    use crate::session::Session;
    use crate::stats::{CachingStatsProvider, DefaultStatsCalculator, StatsEstimate};
    use std::sync::Arc;

    #[test]
    fn test_plain_format() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);
        let limit = b.limit(3, scan);
        assert_eq!(
            format_plan(&limit),
            "- Limit[3] => [a:bigint]\n    - TableScan[tpch.t] => [a:bigint]\n"
        );
    }

    #[test]
    fn test_estimates() {
        let orders = TableRef::new("tpch", "orders");
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            &orders,
            vec![ColumnMetadata::new("orderkey", DataType::Bigint)],
            StatsEstimate::new(15000.0, 120000.0),
        );
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let orderkey = b.variable("orderkey", DataType::Bigint);
        let unknown = b.variable("x", DataType::Bigint);
        let scan = b.table_scan(orders, vec![orderkey]);
        let missing = b.table_scan(TableRef::new("tpch", "missing"), vec![unknown]);

        let calculator = DefaultStatsCalculator::new(Arc::new(catalog));
        let lookup = Lookup::no_lookup();
        let session = Session::new("q");
        let stats = CachingStatsProvider::new(&calculator, None, &lookup, &session);
        let cost_calculator = DefaultCostCalculator;
        let cost = CachingCostProvider::new(&cost_calculator, &stats, None, &lookup, &session);
        let printer = PlanPrinter::new(&lookup).with_stats(&stats).with_cost(&cost);

        let text = printer.print(&scan.into());
        assert!(text.contains("Estimates: {rows: 15000 (120000B)"), "{text}");
        let text = printer.print(&missing.into());
        assert!(text.contains("rows: ? (?)"), "{text}");
    }
}
