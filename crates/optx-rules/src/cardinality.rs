//! Structural row-count bounds, for rules running without logical properties.

use optx_core::error::OptimizerResult;
use optx_core::expr::JoinType;
use optx_core::lookup::Lookup;
use optx_core::plan::{LogicalOp, PlanRef};

/// Upper bound on the rows `plan` produces, when the plan's shape alone proves one.
pub fn max_cardinality(plan: &PlanRef, lookup: &Lookup) -> OptimizerResult<Option<u64>> {
    let node = lookup.resolve(plan)?;
    let source_bound = |index: usize| -> OptimizerResult<Option<u64>> {
        match node.source(index) {
            Some(source) => max_cardinality(source, lookup),
            None => Ok(None),
        }
    };
    let bound = match &node.op {
        LogicalOp::Values { rows, .. } => Some(rows.len() as u64),
        LogicalOp::TableScan { .. } => None,
        LogicalOp::Limit { count, .. } => Some(match source_bound(0)? {
            Some(source) => source.min(*count),
            None => *count,
        }),
        LogicalOp::Aggregate { group_by, .. } if group_by.is_empty() => Some(1),
        LogicalOp::Aggregate { .. }
        | LogicalOp::Filter { .. }
        | LogicalOp::Project { .. }
        | LogicalOp::Sort { .. } => source_bound(0)?,
        LogicalOp::Join { join_type, .. } => match join_type {
            JoinType::Semi | JoinType::Anti => source_bound(0)?,
            _ => match (source_bound(0)?, source_bound(1)?) {
                (Some(left), Some(right)) => join_bound(*join_type, left, right),
                _ => None,
            },
        },
    };
    Ok(bound)
}

/// Outer joins keep unmatched rows of their preserved sides on top of the matches.
fn join_bound(join_type: JoinType, left: u64, right: u64) -> Option<u64> {
    let matched = left.checked_mul(right)?;
    match join_type {
        JoinType::Left => Some(matched.max(left)),
        JoinType::Right => Some(matched.max(right)),
        JoinType::Full => matched.checked_add(left)?.checked_add(right),
        _ => Some(matched),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::allocator::PlanNodeIdAllocator;
    use optx_core::builder::PlanBuilder;
    use optx_core::expr::{DataType, Expr, ScalarValue, TableRef};
    use optx_core::plan::PlanNodeRef;

    #[test]
    fn test_bounds() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let lookup = Lookup::no_lookup();
        let row = |v: i64| vec![Expr::Literal(ScalarValue::Int64(v))];

        let values = b.values(vec![a.clone()], vec![row(1), row(2), row(3)]);
        let limited = b.limit(2, values.clone());
        let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a.clone()]);
        let global = b.aggregate(vec![], vec![], scan.clone());
        let filtered = b.filter(Expr::literal_true(), limited.clone());

        assert_eq!(max_cardinality(&values.into(), &lookup).unwrap(), Some(3));
        assert_eq!(max_cardinality(&limited.into(), &lookup).unwrap(), Some(2));
        assert_eq!(max_cardinality(&filtered.into(), &lookup).unwrap(), Some(2));
        assert_eq!(max_cardinality(&global.into(), &lookup).unwrap(), Some(1));
        assert_eq!(max_cardinality(&scan.into(), &lookup).unwrap(), None);
    }

    #[test]
    fn test_outer_joins_keep_unmatched_rows() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let c = b.variable("c", DataType::Bigint);
        let lookup = Lookup::no_lookup();
        let row = |v: i64| vec![Expr::Literal(ScalarValue::Int64(v))];

        let two = b.values(vec![a.clone()], vec![row(1), row(2)]);
        let three = b.values(vec![c.clone()], vec![row(1), row(2), row(3)]);
        let empty = b.empty_values(vec![c.clone()]);
        let bound = |join_type: JoinType, left: &PlanNodeRef, right: &PlanNodeRef| {
            let join = b.join(join_type, left.clone(), right.clone(), Expr::literal_true());
            max_cardinality(&join.into(), &lookup).unwrap()
        };

        assert_eq!(bound(JoinType::Inner, &two, &empty), Some(0));
        assert_eq!(bound(JoinType::Left, &two, &empty), Some(2));
        assert_eq!(bound(JoinType::Right, &empty, &two), Some(2));
        assert_eq!(bound(JoinType::Full, &two, &empty), Some(2));
        assert_eq!(bound(JoinType::Left, &two, &three), Some(6));
        assert_eq!(bound(JoinType::Full, &two, &three), Some(11));
        assert_eq!(bound(JoinType::Semi, &two, &empty), Some(2));
    }
}
