//! # Remove Redundant Distinct
//!
//! A DISTINCT (an Aggregate with grouping keys and no aggregate functions) over an
//! input that is already distinct on those keys removes nothing:
//!
//! ```text
//! Aggregate(group by [k], TableScan(t, [k, v]))   where k is a key of t
//!   ->  Project([k := k], TableScan(t, [k, v]))
//! ```
//!
//! When the grouping keys are exactly the input's outputs the input is returned as is,
//! otherwise an identity projection narrows it to the grouping keys.
//!
//! Distinctness is read from logical properties. Without them the rule only fires on
//! inputs that are structurally at most one row.

use crate::cardinality::max_cardinality;
use optx_core::error::OptimizerResult;
use optx_core::expr::Variable;
use optx_core::pattern::{Captures, Pattern};
use optx_core::plan::{Assignment, LogicalOp, PlanNode, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};
use std::collections::{BTreeSet, HashSet};

pub struct RemoveRedundantDistinctRule;

fn is_distinct_aggregate(node: &PlanNode) -> bool {
    matches!(
        &node.op,
        LogicalOp::Aggregate { group_by, aggregates }
            if !group_by.is_empty() && aggregates.is_empty()
    )
}

impl Rule for RemoveRedundantDistinctRule {
    fn name(&self) -> &str {
        "RemoveRedundantDistinct"
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate().matching("distinct", is_distinct_aggregate)
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        _captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let (LogicalOp::Aggregate { group_by, .. }, Some(source)) = (&node.op, node.source(0))
        else {
            return Ok(RuleResult::empty());
        };

        let keys: BTreeSet<Variable> = group_by.iter().cloned().collect();
        let distinct = match context.logical_properties(source)? {
            Some(properties) => properties.is_distinct(&keys),
            None => max_cardinality(source, context.lookup)?.is_some_and(|max| max <= 1),
        };
        if !distinct {
            return Ok(RuleResult::empty());
        }

        let source_outputs: HashSet<Variable> = source.output_variables().into_iter().collect();
        if node.output_set() == source_outputs {
            return Ok(RuleResult::of(source.clone()));
        }
        let project = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::Project {
                assignments: group_by.iter().map(Assignment::identity).collect(),
            },
            vec![source.clone()],
        );
        Ok(RuleResult::of(project))
    }
}
