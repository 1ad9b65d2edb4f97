//! # Remove Redundant Limit
//!
//! A limit without offset whose input can never exceed the count is a no-op:
//!
//! ```text
//! Limit(10, Aggregate(global, X))  ->  Aggregate(global, X)
//! ```
//!
//! The bound comes from the logical properties of the input when they are available,
//! otherwise from the input's shape (`cardinality::max_cardinality`).

use crate::cardinality::max_cardinality;
use optx_core::error::OptimizerResult;
use optx_core::pattern::{Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};

pub struct RemoveRedundantLimitRule;

impl Rule for RemoveRedundantLimitRule {
    fn name(&self) -> &str {
        "RemoveRedundantLimit"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().matching("no offset", |node| {
            matches!(node.op, LogicalOp::Limit { offset: 0, .. })
        })
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        _captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let (LogicalOp::Limit { count, .. }, Some(source)) = (&node.op, node.source(0)) else {
            return Ok(RuleResult::empty());
        };
        let bounded = match context.logical_properties(source)? {
            Some(properties) if properties.is_at_most(*count) => true,
            _ => max_cardinality(source, context.lookup)?.is_some_and(|max| max <= *count),
        };
        if !bounded {
            return Ok(RuleResult::empty());
        }
        Ok(RuleResult::of(source.clone()))
    }
}
