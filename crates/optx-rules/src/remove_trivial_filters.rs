//! # Remove Trivial Filters
//!
//! A filter whose predicate is a constant decides nothing per row:
//!
//! ```text
//! Filter(true,  X)  ->  X
//! Filter(false, X)  ->  Values(outputs of X, no rows)
//! Filter(null,  X)  ->  Values(outputs of X, no rows)
//! ```
//!
//! The empty `Values` keeps the filter's output variables so that parents are
//! unaffected.

use optx_core::error::OptimizerResult;
use optx_core::pattern::{Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};

pub struct RemoveTrivialFiltersRule;

fn is_constant_predicate(node: &PlanNode) -> bool {
    matches!(
        &node.op,
        LogicalOp::Filter { predicate }
            if predicate.is_true() || predicate.is_false() || predicate.is_null()
    )
}

impl Rule for RemoveTrivialFiltersRule {
    fn name(&self) -> &str {
        "RemoveTrivialFilters"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter().matching("constant predicate", is_constant_predicate)
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        _captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let LogicalOp::Filter { predicate } = &node.op else {
            return Ok(RuleResult::empty());
        };
        let Some(source) = node.source(0) else {
            return Ok(RuleResult::empty());
        };
        if predicate.is_true() {
            return Ok(RuleResult::of(source.clone()));
        }
        let empty = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::Values {
                outputs: node.output_variables(),
                rows: vec![],
            },
            vec![],
        );
        Ok(RuleResult::of(empty))
    }
}
