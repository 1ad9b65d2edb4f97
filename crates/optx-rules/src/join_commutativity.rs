//! # Join Commutativity Rule
//!
//! This rule implements the algebraic identity `A JOIN B = B JOIN A` for symmetric
//! join types (inner joins and cross joins), and uses it to put the smaller input on
//! the right.
//!
//! ## Why Orientation Matters
//!
//! The right input of a join is the build side: it is loaded into a hash table while
//! the left input streams past. Building the smaller relation keeps memory usage and
//! build time low.
//!
//! ## When It Fires
//!
//! - The join is `Inner` or `Cross`. Left, Right, Full, Semi and Anti joins have fixed
//!   left/right semantics and cannot be commuted without changing the result.
//! - Join reordering is enabled for the session (`join_reordering_enabled`).
//! - Both inputs have known statistics and the right input's estimated output size is
//!   strictly larger than the left's. The strict comparison keeps the rule from
//!   swapping the same join back and forth.
//!
//! ## Condition Swapping
//!
//! When swapping `A.x = B.y` becomes `B.y = A.x`, keeping each equality oriented
//! (probe side first).

use optx_core::error::OptimizerResult;
use optx_core::expr::{BinaryOp, Expr, JoinType};
use optx_core::pattern::{Captures, Pattern};
use optx_core::plan::{LogicalOp, PlanNode, PlanNodeRef, PlanRef};
use optx_core::rule::{Rule, RuleContext, RuleResult};
use optx_core::session::Session;
use optx_core::stats::StatsProvider;
use tracing::{debug, warn};

/// Join commutativity: A JOIN B -> B JOIN A when B is the larger input.
pub struct JoinCommutativityRule;

impl Rule for JoinCommutativityRule {
    fn name(&self) -> &str {
        "JoinCommutativity"
    }

    fn pattern(&self) -> Pattern {
        Pattern::join().matching("inner or cross", |node| {
            matches!(
                &node.op,
                LogicalOp::Join {
                    join_type: JoinType::Inner | JoinType::Cross,
                    ..
                }
            )
        })
    }

    fn is_enabled(&self, session: &Session) -> bool {
        if !session.is_rule_enabled(self.name()) {
            return false;
        }
        match session.join_reordering_enabled() {
            Ok(enabled) => enabled,
            Err(err) => {
                warn!("{}: treating join reordering as disabled: {}", self.name(), err);
                false
            }
        }
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        _captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult> {
        let LogicalOp::Join {
            join_type,
            condition,
        } = &node.op
        else {
            return Ok(RuleResult::empty());
        };
        let [left, right] = node.sources.as_slice() else {
            return Ok(RuleResult::empty());
        };

        let (Some(left_size), Some(right_size)) = (
            output_size(context.stats, left)?,
            output_size(context.stats, right)?,
        ) else {
            return Ok(RuleResult::empty());
        };
        if right_size <= left_size {
            return Ok(RuleResult::empty());
        }
        debug!(
            "swapping join {} inputs: left {:.0}B, right {:.0}B",
            node.id, left_size, right_size
        );

        let swapped = PlanNode::new(
            context.id_allocator.get_next_id(),
            LogicalOp::Join {
                join_type: *join_type,
                condition: swap_condition_sides(condition),
            },
            vec![right.clone(), left.clone()],
        );
        Ok(RuleResult::of(swapped))
    }
}

fn output_size(stats: &dyn StatsProvider, plan: &PlanRef) -> OptimizerResult<Option<f64>> {
    let estimate = stats.get_stats(plan)?;
    if estimate.is_unknown() {
        return Ok(None);
    }
    let size = estimate.output_size_in_bytes(&plan.output_variables());
    Ok((!size.is_nan()).then_some(size))
}

/// Swap the sides of an equi-join condition.
/// For A.x = B.y, produce B.y = A.x (semantically the same, but tracks the swap).
fn swap_condition_sides(expr: &Expr) -> Expr {
    match expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } => Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: right.clone(),
            right: left.clone(),
        },
        Expr::And(conjuncts) => Expr::And(conjuncts.iter().map(swap_condition_sides).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::expr::{DataType, TableRef, Variable};
    use optx_core::session::JOIN_REORDERING_ENABLED;
    use optx_core::stats::StatsEstimate;
    use optx_core::testing::{RuleAssert, RuleTester};

    #[test]
    fn test_swap_condition() {
        let a = Variable::new("a_x", DataType::Bigint);
        let b = Variable::new("b_y", DataType::Bigint);
        let swapped = swap_condition_sides(&Expr::equal(a.to_expr(), b.to_expr()));
        assert_eq!(swapped, Expr::equal(b.to_expr(), a.to_expr()));
    }

    // Node ids: left scan "0", right scan "1", join "2".
    fn join_of(tester: &RuleTester, left_rows: f64, right_rows: f64) -> RuleAssert {
        tester
            .assert_that(JoinCommutativityRule)
            .override_stats("0", StatsEstimate::new(left_rows, left_rows * 8.0))
            .override_stats("1", StatsEstimate::new(right_rows, right_rows * 8.0))
            .on(|b| {
                let l = b.variable("l", DataType::Bigint);
                let r = b.variable("r", DataType::Bigint);
                let left = b.table_scan(TableRef::new("tpch", "left"), vec![l.clone()]);
                let right = b.table_scan(TableRef::new("tpch", "right"), vec![r.clone()]);
                b.join(JoinType::Inner, left, right, Expr::equal(l.to_expr(), r.to_expr()))
            })
    }

    #[test]
    fn test_swaps_larger_right_side() {
        let tester = RuleTester::default();
        let result = join_of(&tester, 100.0, 10000.0).matches(&Pattern::join());
        let right = result.sources[1].as_node().unwrap();
        assert!(matches!(&right.op, LogicalOp::TableScan { table, .. } if table.name == "left"));
        let LogicalOp::Join { condition, .. } = &result.op else {
            panic!("expected a join");
        };
        assert_eq!(condition.to_string(), "(r = l)");
    }

    #[test]
    fn test_keeps_smaller_right_side() {
        let tester = RuleTester::default();
        join_of(&tester, 10000.0, 100.0).does_not_fire();
        join_of(&tester, 100.0, 100.0).does_not_fire();
    }

    #[test]
    fn test_unknown_stats_do_not_fire() {
        RuleTester::default()
            .assert_that(JoinCommutativityRule)
            .on(|b| {
                let l = b.variable("l", DataType::Bigint);
                let r = b.variable("r", DataType::Bigint);
                let left = b.table_scan(TableRef::new("tpch", "left"), vec![l]);
                let right = b.table_scan(TableRef::new("tpch", "right"), vec![r]);
                b.join(JoinType::Cross, left, right, Expr::literal_true())
            })
            .does_not_fire();
    }

    #[test]
    fn test_disabled_by_session() {
        let tester = RuleTester::default();
        join_of(&tester, 100.0, 10000.0)
            .set_system_property(JOIN_REORDERING_ENABLED, "false")
            .does_not_fire();
        join_of(&tester, 100.0, 10000.0)
            .set_system_property(JOIN_REORDERING_ENABLED, "sometimes")
            .does_not_fire();
    }
}
