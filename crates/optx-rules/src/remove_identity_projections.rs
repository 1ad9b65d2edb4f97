//! # Remove Redundant Identity Projections
//!
//! A projection that only forwards variables, and forwards every variable its source
//! produces, does nothing:
//!
//! ```text
//! Project([a := a, b := b], X[a, b])  ->  X
//! ```
//!
//! Output order is not significant; a projection that drops a column is kept.

use optx_core::error::OptimizerResult;
use optx_core::expr::Variable;
use optx_core::pattern::{Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};
use std::collections::HashSet;

pub struct RemoveRedundantIdentityProjectionsRule;

fn is_identity_projection(node: &PlanNode) -> bool {
    matches!(&node.op, LogicalOp::Project { assignments } if assignments.iter().all(|a| a.is_identity()))
}

impl Rule for RemoveRedundantIdentityProjectionsRule {
    fn name(&self) -> &str {
        "RemoveRedundantIdentityProjections"
    }

    fn pattern(&self) -> Pattern {
        Pattern::project().matching("identity assignments", is_identity_projection)
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        _captures: &Captures,
        _context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let Some(source) = node.source(0) else {
            return Ok(RuleResult::empty());
        };
        let source_outputs: HashSet<Variable> = source.output_variables().into_iter().collect();
        if node.output_set() != source_outputs {
            return Ok(RuleResult::empty());
        }
        Ok(RuleResult::of(source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{DataType, TableRef};
    use optx_core::testing::RuleTester;

    #[test]
    fn test_removes_reordering_identity() {
        RuleTester::default()
            .assert_that(RemoveRedundantIdentityProjectionsRule)
            .on(|b| {
                let a = b.variable("a", DataType::Bigint);
                let c = b.variable("c", DataType::Bigint);
                let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a.clone(), c.clone()]);
                b.identity_project(&[c, a], scan)
            })
            .matches(&Pattern::table_scan());
    }

    #[test]
    fn test_keeps_pruning_projection() {
        RuleTester::default()
            .assert_that(RemoveRedundantIdentityProjectionsRule)
            .on(|b| {
                let a = b.variable("a", DataType::Bigint);
                let c = b.variable("c", DataType::Bigint);
                let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a.clone(), c]);
                b.identity_project(&[a], scan)
            })
            .does_not_fire();
    }
}
