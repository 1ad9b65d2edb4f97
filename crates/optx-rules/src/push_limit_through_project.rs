//! # Push Limit Through Project
//!
//! Projections are row-preserving, so a limit may run before them:
//!
//! ```text
//! Limit(n, Project(p, X))  ->  Project(p, Limit(n, X))
//! ```
//!
//! Moving the limit down lets it meet other limits, scans and values that the
//! limit-family rules can simplify further. The offset travels with the limit.

use optx_core::error::OptimizerResult;
use optx_core::pattern::{Capture, Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef, PlanRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};

const PROJECT: Capture = Capture::new("project");

pub struct PushLimitThroughProjectRule;

impl Rule for PushLimitThroughProjectRule {
    fn name(&self) -> &str {
        "PushLimitThroughProject"
    }

    fn pattern(&self) -> Pattern {
        Pattern::limit().with_source(Pattern::project().captured_as(PROJECT))
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let project = captures.require(PROJECT)?;
        let LogicalOp::Limit { .. } = &node.op else {
            return Ok(RuleResult::empty());
        };
        let limit = PlanNode::new(
            context.id_allocator.get_next_id(),
            node.op.clone(),
            project.sources.clone(),
        );
        let pushed = PlanNode::new(
            context.id_allocator.get_next_id(),
            project.op.clone(),
            vec![PlanRef::from(limit)],
        );
        Ok(RuleResult::of(pushed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{DataType, TableRef};
    use optx_core::testing::RuleTester;

    #[test]
    fn test_pushes_limit_with_offset() {
        let result = RuleTester::default()
            .assert_that(PushLimitThroughProjectRule)
            .on(|b| {
                let a = b.variable("a", DataType::Bigint);
                let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a.clone()]);
                let project = b.identity_project(&[a], scan);
                b.offset_limit(2, 10, project)
            })
            .matches(
                &Pattern::project()
                    .with_source(Pattern::limit().with_source(Pattern::table_scan())),
            );
        let limit = result.sources[0].as_node().unwrap();
        assert_eq!(limit.op, LogicalOp::Limit { offset: 2, count: 10 });
    }

    #[test]
    fn test_does_not_fire_over_scan() {
        RuleTester::default()
            .assert_that(PushLimitThroughProjectRule)
            .on(|b| {
                let a = b.variable("a", DataType::Bigint);
                let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);
                b.limit(10, scan)
            })
            .does_not_fire();
    }
}
