//! # Projection Pushdown Rule
//!
//! This rule implements column pruning by pushing projection requirements down to
//! table scans. When a Project node only references a subset of the columns produced
//! by a child TableScan, this rule creates a new TableScan that reads only those
//! columns.
//!
//! ```text
//! Before: Project([a, b + 1], TableScan(t, [a, b, c, d]))
//! After:  Project([a, b + 1], TableScan(t, [a, b]))
//! ```
//!
//! ## Why This Helps
//!
//! - **Reduces I/O**: columnar storage formats can skip entire columns that are not
//!   needed.
//! - **Reduces memory**: narrower rows mean smaller hash tables and sort buffers
//!   above the scan.
//!
//! ## Current Scope
//!
//! Only Project directly over TableScan is handled. The rule fires only when at least
//! one scan column is unreferenced, so applying it twice is a no-op.

use optx_core::error::OptimizerResult;
use optx_core::expr::{TableRef, Variable};
use optx_core::pattern::{Capture, Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef, PlanRef, ScanColumn};
use optx_core::rule::{Rule, RuleContext, RuleResult};
use std::collections::HashSet;

const REFERENCED: Capture = Capture::new("referenced");
const SCAN: Capture = Capture::new("scan");

/// Narrow table scans to the columns a projection above them reads.
pub struct ProjectionPushdownRule;

/// Variables the assignments of a projection read.
fn referenced_variables(node: &PlanNode) -> Option<HashSet<Variable>> {
    match &node.op {
        LogicalOp::Project { assignments } => Some(
            assignments
                .iter()
                .flat_map(|a| a.expr.variables())
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

fn scanned(node: &PlanNode) -> Option<(TableRef, Vec<ScanColumn>)> {
    match &node.op {
        LogicalOp::TableScan { table, columns } => Some((table.clone(), columns.clone())),
        _ => None,
    }
}

impl Rule for ProjectionPushdownRule {
    fn name(&self) -> &str {
        "ProjectionPushdown"
    }

    fn pattern(&self) -> Pattern {
        // Match: Project(TableScan)
        Pattern::project()
            .capturing(REFERENCED, referenced_variables)
            .with_source(Pattern::table_scan().capturing(SCAN, scanned))
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let referenced = captures.require_value::<HashSet<Variable>>(REFERENCED)?;
        let (table, columns) = captures.require_value::<(TableRef, Vec<ScanColumn>)>(SCAN)?;
        let kept: Vec<_> = columns
            .iter()
            .filter(|c| referenced.contains(&c.variable))
            .cloned()
            .collect();
        if kept.len() == columns.len() {
            return Ok(RuleResult::empty());
        }

        let narrowed = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::TableScan {
                table: table.clone(),
                columns: kept,
            },
            vec![],
        );
        let project = node.replace_sources(vec![PlanRef::from(narrowed)]);
        Ok(RuleResult::of(project))
    }
}
