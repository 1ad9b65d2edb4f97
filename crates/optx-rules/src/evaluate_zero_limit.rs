//! # Evaluate Zero Limit
//!
//! `Limit(count 0, X)` produces no rows whatever `X` is, so it becomes an empty
//! `Values` with the same outputs. The subtree below is dropped.

use optx_core::error::OptimizerResult;
use optx_core::pattern::{Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};

pub struct EvaluateZeroLimitRule;

impl Rule for EvaluateZeroLimitRule {
    fn name(&self) -> &str {
        "EvaluateZeroLimit"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().matching("zero count", |node| {
            matches!(node.op, LogicalOp::Limit { count: 0, .. })
        })
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        _captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
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
