//! # Merge Limits
//!
//! Two stacked limits select one contiguous window of the innermost input:
//!
//! ```text
//! Limit(offset p_o, count p_c, Limit(offset c_o, count c_c, X))
//!   ->  Limit(offset c_o + p_o, count min(p_c, max(c_c - p_o, 0)), X)
//! ```
//!
//! A zero count produced here is left to `EvaluateZeroLimit`.

use optx_core::error::OptimizerResult;
use optx_core::pattern::{Capture, Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};

const CHILD: Capture = Capture::new("child");
const PARENT_WINDOW: Capture = Capture::new("parent window");
const CHILD_WINDOW: Capture = Capture::new("child window");

pub struct MergeLimitsRule;

/// `(offset, count)` of a limit.
fn window(node: &PlanNode) -> Option<(u64, u64)> {
    match node.op {
        LogicalOp::Limit { offset, count } => Some((offset, count)),
        _ => None,
    }
}

/// The single window equivalent to applying `child` and then `parent`.
pub fn merge_windows(parent: (u64, u64), child: (u64, u64)) -> (u64, u64) {
    let (parent_offset, parent_count) = parent;
    let (child_offset, child_count) = child;
    (
        child_offset.saturating_add(parent_offset),
        parent_count.min(child_count.saturating_sub(parent_offset)),
    )
}

impl Rule for MergeLimitsRule {
    fn name(&self) -> &str {
        "MergeLimits"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().capturing(PARENT_WINDOW, window).with_source(
            Pattern::limit()
                .capturing(CHILD_WINDOW, window)
                .captured_as(CHILD),
        )
    }

    fn apply(
        &self,
        _node: &PlanNodeRef,
        captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let child = captures.require(CHILD)?;
        let (offset, count) = merge_windows(
            *captures.require_value::<(u64, u64)>(PARENT_WINDOW)?,
            *captures.require_value::<(u64, u64)>(CHILD_WINDOW)?,
        );
        let merged = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::Limit { offset, count },
            child.sources.clone(),
        );
        Ok(RuleResult::of(merged))
    }
}
