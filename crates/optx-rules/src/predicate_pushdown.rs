//! # Predicate Pushdown Rule
//!
//! Predicate pushdown is one of the most impactful rewrites because it reduces the
//! amount of data flowing through the plan as early as possible.
//!
//! ## What It Does
//!
//! When a Filter sits on top of an inner or cross Join, the filter predicate is split
//! into its conjuncts and each conjunct is sent as deep as its variables allow:
//!
//! ```text
//! Before: Filter(l > 1 AND r < 5 AND l = r, Join(L, R, cond))
//! After:  Join(Filter(l > 1, L), Filter(r < 5, R), cond AND l = r)
//! ```
//!
//! - Conjuncts that only reference left outputs become a Filter over the left side.
//! - Conjuncts that only reference right outputs become a Filter over the right side.
//! - Everything else, including constant conjuncts, joins the join condition.
//!
//! A cross join that receives a condition becomes an inner join.
//!
//! ## Why This Helps
//!
//! - **Reduces intermediate data**: rows are discarded before they are joined.
//! - **Better estimates**: side filters are visible to the stats calculator when it
//!   estimates each join input.
//!
//! ## Applicability
//!
//! Outer, semi and anti joins treat rows from one side specially; moving a filter
//! below them changes which rows survive, so the rule does not fire on them.

use optx_core::error::OptimizerResult;
use optx_core::expr::{Expr, JoinType, Variable};
use optx_core::pattern::{Capture, Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef, PlanRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};
use std::collections::HashSet;

const PREDICATE: Capture = Capture::new("predicate");
const JOIN: Capture = Capture::new("join");
const JOIN_TYPE: Capture = Capture::new("join type");
const CONDITION: Capture = Capture::new("condition");

/// Push filter conjuncts into join inputs and the join condition.
pub struct PredicatePushdownRule;

fn predicate(node: &PlanNode) -> Option<Expr> {
    match &node.op {
        LogicalOp::Filter { predicate } => Some(predicate.clone()),
        _ => None,
    }
}

/// Only inner and cross joins.
fn symmetric_join_type(node: &PlanNode) -> Option<JoinType> {
    match node.op {
        LogicalOp::Join {
            join_type: join_type @ (JoinType::Inner | JoinType::Cross),
            ..
        } => Some(join_type),
        _ => None,
    }
}

fn join_condition(node: &PlanNode) -> Option<Expr> {
    match &node.op {
        LogicalOp::Join { condition, .. } => Some(condition.clone()),
        _ => None,
    }
}

fn references_only(expr: &Expr, outputs: &HashSet<Variable>) -> bool {
    let variables = expr.variables();
    !variables.is_empty() && variables.into_iter().all(|v| outputs.contains(v))
}

impl Rule for PredicatePushdownRule {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn pattern(&self) -> Pattern {
        // Match: Filter(Join(A, B)) for inner and cross joins
        Pattern::filter().capturing(PREDICATE, predicate).with_source(
            Pattern::join()
                .capturing(JOIN_TYPE, symmetric_join_type)
                .capturing(CONDITION, join_condition)
                .captured_as(JOIN),
        )
    }

    fn apply(
        &self,
        _node: &PlanNodeRef,
        captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let join = captures.require(JOIN)?;
        let predicate = captures.require_value::<Expr>(PREDICATE)?;
        let join_type = *captures.require_value::<JoinType>(JOIN_TYPE)?;
        let condition = captures.require_value::<Expr>(CONDITION)?;
        let [left, right] = join.sources.as_slice() else {
            return Ok(RuleResult::empty());
        };

        let left_outputs: HashSet<Variable> = left.output_variables().into_iter().collect();
        let right_outputs: HashSet<Variable> = right.output_variables().into_iter().collect();

        let mut left_conjuncts = Vec::new();
        let mut right_conjuncts = Vec::new();
        let mut join_conjuncts = vec![condition.clone()];
        for conjunct in predicate.conjuncts() {
            if references_only(conjunct, &left_outputs) {
                left_conjuncts.push(conjunct.clone());
            } else if references_only(conjunct, &right_outputs) {
                right_conjuncts.push(conjunct.clone());
            } else {
                join_conjuncts.push(conjunct.clone());
            }
        }

        let new_left = filter_over(left, left_conjuncts, context);
        let new_right = filter_over(right, right_conjuncts, context);
        let new_condition = Expr::combine_conjuncts(join_conjuncts);
        let new_join_type = if join_type == JoinType::Cross && !new_condition.is_true() {
            JoinType::Inner
        } else {
            join_type
        };

        let new_join = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::Join {
                join_type: new_join_type,
                condition: new_condition,
            },
            vec![new_left, new_right],
        );
        Ok(RuleResult::of(new_join))
    }
}

fn filter_over(source: &PlanRef, conjuncts: Vec<Expr>, context: &RuleContext) -> PlanRef {
    if conjuncts.is_empty() {
        return source.clone();
    }
    PlanRef::from(PlanNode::new(
        context.id_allocator.get_next_id(),
        LogicalOp::Filter {
            predicate: Expr::combine_conjuncts(conjuncts),
        },
        vec![source.clone()],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{BinaryOp, DataType, ScalarValue, TableRef};
    use optx_core::testing::RuleTester;

    fn int(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(v))
    }

    #[test]
    fn test_splits_conjuncts_across_join() {
        let result = RuleTester::default()
            .assert_that(PredicatePushdownRule)
            .on(|b| {
                let l = b.variable("l", DataType::Bigint);
                let r = b.variable("r", DataType::Bigint);
                let left = b.table_scan(TableRef::new("tpch", "left"), vec![l.clone()]);
                let right = b.table_scan(TableRef::new("tpch", "right"), vec![r.clone()]);
                let join = b.join(JoinType::Cross, left, right, Expr::literal_true());
                b.filter(
                    Expr::combine_conjuncts([
                        Expr::binary(BinaryOp::Gt, l.to_expr(), int(1)),
                        Expr::binary(BinaryOp::Lt, r.to_expr(), int(5)),
                        Expr::equal(l.to_expr(), r.to_expr()),
                    ]),
                    join,
                )
            })
            .matches(
                &Pattern::join()
                    .with_source_at(0, Pattern::filter().with_source(Pattern::table_scan()))
                    .with_source_at(1, Pattern::filter().with_source(Pattern::table_scan())),
            );

        let LogicalOp::Join {
            join_type,
            condition,
        } = &result.op
        else {
            panic!("expected a join");
        };
        assert_eq!(*join_type, JoinType::Inner);
        assert_eq!(condition.to_string(), "(l = r)");
    }

    #[test]
    fn test_side_without_conjuncts_is_untouched() {
        let result = RuleTester::default()
            .assert_that(PredicatePushdownRule)
            .on(|b| {
                let l = b.variable("l", DataType::Bigint);
                let r = b.variable("r", DataType::Bigint);
                let left = b.table_scan(TableRef::new("tpch", "left"), vec![l.clone()]);
                let right = b.table_scan(TableRef::new("tpch", "right"), vec![r.clone()]);
                let join = b.join(
                    JoinType::Inner,
                    left,
                    right,
                    Expr::equal(l.to_expr(), r.to_expr()),
                );
                b.filter(Expr::binary(BinaryOp::Gt, l.to_expr(), int(1)), join)
            })
            .matches(
                &Pattern::join()
                    .with_source_at(0, Pattern::filter())
                    .with_source_at(1, Pattern::table_scan()),
            );
        let LogicalOp::Join { condition, .. } = &result.op else {
            panic!("expected a join");
        };
        assert_eq!(condition.to_string(), "(l = r)");
    }

    #[test]
    fn test_does_not_fire_on_left_join() {
        RuleTester::default()
            .assert_that(PredicatePushdownRule)
            .on(|b| {
                let l = b.variable("l", DataType::Bigint);
                let r = b.variable("r", DataType::Bigint);
                let left = b.table_scan(TableRef::new("tpch", "left"), vec![l.clone()]);
                let right = b.table_scan(TableRef::new("tpch", "right"), vec![r.clone()]);
                let join = b.join(
                    JoinType::Left,
                    left,
                    right,
                    Expr::equal(l.to_expr(), r.to_expr()),
                );
                b.filter(Expr::binary(BinaryOp::Gt, r.to_expr(), int(1)), join)
            })
            .does_not_fire();
    }
}
