//! # Merge Filters
//!
//! Collapses stacked filters into one conjunction:
//!
//! ```text
//! Filter(p, Filter(q, X))  ->  Filter(q AND p, X)
//! ```
//!
//! The child predicate comes first so that evaluation order matches the original plan.
//! Duplicate conjuncts are dropped.

use optx_core::error::OptimizerResult;
use optx_core::expr::Expr;
use optx_core::pattern::{Capture, Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};

const CHILD: Capture = Capture::new("child");

pub struct MergeFiltersRule;

impl Rule for MergeFiltersRule {
    fn name(&self) -> &str {
        "MergeFilters"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter().with_source(Pattern::filter().captured_as(CHILD))
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let child = captures.require(CHILD)?;
        let (LogicalOp::Filter { predicate: parent }, LogicalOp::Filter { predicate: inner }) =
            (&node.op, &child.op)
        else {
            return Ok(RuleResult::empty());
        };
        let merged = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::Filter {
                predicate: Expr::combine_conjuncts([inner.clone(), parent.clone()]),
            },
            child.sources.clone(),
        );
        Ok(RuleResult::of(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{BinaryOp, DataType, ScalarValue, TableRef};
    use optx_core::testing::RuleTester;

    #[test]
    fn test_merges_into_conjunction() {
        let result = RuleTester::default()
            .assert_that(MergeFiltersRule)
            .on(|b| {
                let a = b.variable("a", DataType::Bigint);
                let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a.clone()]);
                let inner = b.filter(
                    Expr::binary(BinaryOp::Gt, a.to_expr(), Expr::Literal(ScalarValue::Int64(1))),
                    scan,
                );
                b.filter(
                    Expr::binary(BinaryOp::Lt, a.to_expr(), Expr::Literal(ScalarValue::Int64(9))),
                    inner,
                )
            })
            .matches(&Pattern::filter().with_source(Pattern::table_scan()));

        let LogicalOp::Filter { predicate } = &result.op else {
            panic!("expected a filter");
        };
        assert_eq!(predicate.to_string(), "((a > 1) AND (a < 9))");
    }

    #[test]
    fn test_single_filter_does_not_fire() {
        RuleTester::default()
            .assert_that(MergeFiltersRule)
            .on(|b| {
                let a = b.variable("a", DataType::Bigint);
                let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);
                b.filter(Expr::literal_true(), scan)
            })
            .does_not_fire();
    }
}
