//! # Statistics for Cost-Based Rewrites
//!
//! This module defines the statistics structures, the derivation formulas used to
//! estimate intermediate results, and the caching layer rules read statistics through.
//! Rules use them to make decisions such as which join input should be the build side.
//!
//! ## Statistics Hierarchy
//!
//! - **Relation-level**: row count and total size in bytes. A `NaN` row count means
//!   "unknown" and propagates through derivations.
//! - **Variable-level**: number of distinct values (NDV), null fraction, low/high
//!   bounds and average value size, keyed by variable name.
//!
//! ## Derivation Formulas
//!
//! Statistics for intermediate plan nodes are derived bottom-up:
//!
//! - **Filter**: output_rows = input_rows * selectivity. Variable NDVs are scaled
//!   proportionally to the row reduction ratio.
//! - **Join**: output_rows = |left| * |right| / max(NDV_left_key, NDV_right_key).
//!   This is the standard equi-join cardinality formula assuming uniform distribution.
//! - **Aggregate**: output_rows = product of NDVs of group-by variables, capped by
//!   input rows.
//! - **Limit**: output_rows = min(input_rows - offset, count).
//!
//! ## Selectivity Estimation
//!
//! - **Equality with a constant**: 1 / NDV (uniform distribution assumption).
//! - **Range**: fixed 1/3 heuristic.
//! - **Default**: 0.1 (10%) when no better estimate is available.
//!
//! ## Caching
//!
//! `CachingStatsProvider` memoizes estimates by node *identity*: a node that is
//! re-derived by a rule is a new allocation and always recomputes. Estimates for memo
//! groups are stored on the group itself and evicted by `Memo::replace`. A provider
//! lives for a single rule attempt, so nothing it caches can go stale.

use crate::catalog::Catalog;
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::{BinaryOp, Expr, JoinType, UnaryOp, Variable};
use crate::lookup::Lookup;
use crate::memo::Memo;
use crate::plan::{GroupReference, LogicalOp, PlanNode, PlanNodeRef, PlanRef};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Statistics of the rows a plan node produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsEstimate {
    /// Estimated number of rows. `NaN` if unknown.
    pub row_count: f64,
    pub total_size_bytes: f64,
    #[serde(default)]
    pub variable_stats: HashMap<String, VariableStatsEstimate>,
}

impl StatsEstimate {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            variable_stats: HashMap::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }

    pub fn is_unknown(&self) -> bool {
        self.row_count.is_nan()
    }

    pub fn with_variable(mut self, name: impl Into<String>, stats: VariableStatsEstimate) -> Self {
        self.variable_stats.insert(name.into(), stats);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&VariableStatsEstimate> {
        self.variable_stats.get(name)
    }

    /// Size of `row_count` rows of `outputs`, from per-variable widths where known and
    /// type widths otherwise.
    pub fn output_size_in_bytes(&self, outputs: &[Variable]) -> f64 {
        let width: f64 = outputs
            .iter()
            .map(|v| {
                self.variable(&v.name)
                    .map(|s| s.avg_row_size)
                    .filter(|w| !w.is_nan())
                    .unwrap_or_else(|| v.data_type.default_width())
            })
            .sum();
        self.row_count * width
    }
}

/// Per-variable statistics used for selectivity estimation and cost modeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableStatsEstimate {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub nulls_fraction: f64,
    /// Average size of a single value in bytes.
    pub avg_row_size: f64,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
}

impl VariableStatsEstimate {
    pub fn new(distinct_count: f64, nulls_fraction: f64) -> Self {
        Self {
            distinct_count,
            nulls_fraction,
            avg_row_size: 8.0,
            low: None,
            high: None,
        }
    }

    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.low = Some(low);
        self.high = Some(high);
        self
    }
}

/// Derive statistics for join output.
///
/// Uses the standard cardinality estimation formula for equi-joins:
///
/// ```text
/// |A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))
/// ```
///
/// For multi-column joins, selectivities are multiplied (independence assumption).
/// When NDV information is unavailable for a variable, the relation's row count is
/// used as its NDV (assuming all values are distinct).
pub fn derive_join_stats(
    left: &StatsEstimate,
    right: &StatsEstimate,
    join_columns: &[(String, String)],
) -> StatsEstimate {
    if left.is_unknown() || right.is_unknown() {
        return StatsEstimate::unknown();
    }
    let mut selectivity = 1.0_f64;

    for (left_col, right_col) in join_columns {
        let left_ndv = left
            .variable(left_col)
            .map(|s| s.distinct_count)
            .unwrap_or(left.row_count);
        let right_ndv = right
            .variable(right_col)
            .map(|s| s.distinct_count)
            .unwrap_or(right.row_count);
        // Containment: the smaller domain is fully contained in the larger one.
        let max_ndv = left_ndv.max(right_ndv).max(1.0);
        selectivity /= max_ndv;
    }

    let row_count = (left.row_count * right.row_count * selectivity).max(1.0);

    let avg_row_size_left = if left.row_count > 0.0 {
        left.total_size_bytes / left.row_count
    } else {
        100.0
    };
    let avg_row_size_right = if right.row_count > 0.0 {
        right.total_size_bytes / right.row_count
    } else {
        100.0
    };
    let total_size_bytes = row_count * (avg_row_size_left + avg_row_size_right);

    // NDV is capped by the output row count.
    let mut variable_stats = HashMap::new();
    for (name, stats) in left.variable_stats.iter().chain(right.variable_stats.iter()) {
        let mut vs = stats.clone();
        vs.distinct_count = vs.distinct_count.min(row_count);
        variable_stats.insert(name.clone(), vs);
    }

    StatsEstimate {
        row_count,
        total_size_bytes,
        variable_stats,
    }
}

/// Derive statistics for filter output.
///
/// - Output rows = input rows * selectivity (floored at 1 unless the selectivity is 0).
/// - Output size is scaled proportionally.
/// - Variable NDVs are scaled by the same ratio.
pub fn derive_filter_stats(input: &StatsEstimate, selectivity: f64) -> StatsEstimate {
    if input.is_unknown() {
        return StatsEstimate::unknown();
    }
    let row_count = if selectivity <= 0.0 {
        0.0
    } else {
        (input.row_count * selectivity).max(1.0).min(input.row_count)
    };
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };

    let mut variable_stats = HashMap::new();
    for (name, stats) in &input.variable_stats {
        let mut vs = stats.clone();
        vs.distinct_count = (vs.distinct_count * ratio).max(1.0).min(row_count);
        variable_stats.insert(name.clone(), vs);
    }

    StatsEstimate {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        variable_stats,
    }
}

/// Derive statistics for aggregate output.
///
/// The number of output groups is the product of the group-by NDVs, capped by the
/// input row count. A global aggregate (no group-by) always yields one row.
pub fn derive_aggregate_stats(input: &StatsEstimate, group_by: &[String]) -> StatsEstimate {
    if group_by.is_empty() {
        return StatsEstimate::new(1.0, 100.0);
    }
    if input.is_unknown() {
        return StatsEstimate::unknown();
    }
    let mut row_count = 1.0_f64;
    for name in group_by {
        let ndv = input
            .variable(name)
            .map(|s| s.distinct_count)
            .unwrap_or(input.row_count);
        row_count *= ndv;
    }
    row_count = row_count.min(input.row_count).max(1.0);

    let variable_stats = group_by
        .iter()
        .filter_map(|name| {
            input.variable(name).map(|s| {
                let mut vs = s.clone();
                vs.distinct_count = vs.distinct_count.min(row_count);
                (name.clone(), vs)
            })
        })
        .collect();

    StatsEstimate {
        row_count,
        // Rough estimate: 100 bytes per output row.
        total_size_bytes: row_count * 100.0,
        variable_stats,
    }
}

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

pub const RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// Fraction of left rows a semi or anti join is assumed to keep.
pub const SEMI_JOIN_SELECTIVITY: f64 = 0.5;

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
pub fn equality_selectivity(stats: &StatsEstimate, name: &str) -> f64 {
    stats
        .variable(name)
        .map(|vs| 1.0 / vs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Selectivity of a whole predicate, assuming independent conjuncts.
pub fn estimate_selectivity(predicate: &Expr, stats: &StatsEstimate) -> f64 {
    match predicate {
        Expr::Literal(_) if predicate.is_true() => 1.0,
        Expr::Literal(_) => 0.0,
        Expr::And(conjuncts) => conjuncts
            .iter()
            .map(|c| estimate_selectivity(c, stats))
            .product(),
        Expr::Or(disjuncts) => {
            1.0 - disjuncts
                .iter()
                .map(|d| 1.0 - estimate_selectivity(d, stats))
                .product::<f64>()
        }
        Expr::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => 1.0 - estimate_selectivity(operand, stats),
        Expr::UnaryOp {
            op: op @ (UnaryOp::IsNull | UnaryOp::IsNotNull),
            operand,
        } => {
            let nulls = match operand.as_ref() {
                Expr::Variable(v) => stats
                    .variable(&v.name)
                    .map(|s| s.nulls_fraction)
                    .unwrap_or(DEFAULT_FILTER_SELECTIVITY),
                _ => DEFAULT_FILTER_SELECTIVITY,
            };
            if *op == UnaryOp::IsNull {
                nulls
            } else {
                1.0 - nulls
            }
        }
        Expr::BinaryOp { op, left, right } => match (op, left.as_ref(), right.as_ref()) {
            (BinaryOp::Eq, Expr::Variable(l), Expr::Variable(r)) => {
                let ndv = |v: &Variable| {
                    stats
                        .variable(&v.name)
                        .map(|s| s.distinct_count)
                        .unwrap_or(stats.row_count)
                };
                1.0 / ndv(l).max(ndv(r)).max(1.0)
            }
            (BinaryOp::Eq, Expr::Variable(v), Expr::Literal(_))
            | (BinaryOp::Eq, Expr::Literal(_), Expr::Variable(v)) => {
                equality_selectivity(stats, &v.name)
            }
            (BinaryOp::NotEq, _, _) => {
                1.0 - estimate_selectivity(&Expr::equal((**left).clone(), (**right).clone()), stats)
            }
            (BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq, _, _) => {
                RANGE_SELECTIVITY
            }
            _ => DEFAULT_FILTER_SELECTIVITY,
        },
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

/// Pluggable per-node statistics estimator.
///
/// Computes the estimate of one node from the estimates of its sources, which it reads
/// through `source_stats`.
pub trait StatsCalculator: Send + Sync {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        source_stats: &dyn StatsProvider,
        lookup: &Lookup,
        session: &Session,
    ) -> OptimizerResult<StatsEstimate>;
}

/// Statistics for any node or group reference of the current plan.
pub trait StatsProvider {
    fn get_stats(&self, node: &PlanRef) -> OptimizerResult<StatsEstimate>;
}

/// Catalog-backed estimator implementing the formulas above.
pub struct DefaultStatsCalculator {
    catalog: Arc<dyn Catalog>,
}

impl DefaultStatsCalculator {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

fn source(node: &PlanNode, index: usize) -> OptimizerResult<&PlanRef> {
    node.source(index).ok_or_else(|| {
        OptimizerError::invalid_plan(format!("{} node {} has no source {}", node.kind(), node.id, index))
    })
}

impl StatsCalculator for DefaultStatsCalculator {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        source_stats: &dyn StatsProvider,
        _lookup: &Lookup,
        _session: &Session,
    ) -> OptimizerResult<StatsEstimate> {
        let stats = match &node.op {
            LogicalOp::TableScan { table, columns } => {
                let Some(table_stats) = self.catalog.get_table_stats(table) else {
                    return Ok(StatsEstimate::unknown());
                };
                let mut stats = StatsEstimate::new(table_stats.row_count, table_stats.total_size_bytes);
                for column in columns {
                    if let Some(vs) = table_stats.variable(&column.column) {
                        stats.variable_stats.insert(column.variable.name.clone(), vs.clone());
                    }
                }
                stats
            }
            LogicalOp::Values { outputs, rows } => {
                let row_count = rows.len() as f64;
                let mut stats = StatsEstimate::new(row_count, 0.0);
                for (i, output) in outputs.iter().enumerate() {
                    let values: Vec<&Expr> = rows.iter().filter_map(|r| r.get(i)).collect();
                    let nulls = values.iter().filter(|e| e.is_null()).count() as f64;
                    let distinct: HashSet<&Expr> =
                        values.iter().copied().filter(|e| !e.is_null()).collect();
                    let mut vs = VariableStatsEstimate::new(
                        distinct.len() as f64,
                        if row_count > 0.0 { nulls / row_count } else { 0.0 },
                    );
                    vs.avg_row_size = output.data_type.default_width();
                    stats.variable_stats.insert(output.name.clone(), vs);
                }
                stats.total_size_bytes = stats.output_size_in_bytes(outputs);
                stats
            }
            LogicalOp::Filter { predicate } => {
                let input = source_stats.get_stats(source(node, 0)?)?;
                derive_filter_stats(&input, estimate_selectivity(predicate, &input))
            }
            LogicalOp::Project { assignments } => {
                let input = source_stats.get_stats(source(node, 0)?)?;
                let mut stats = StatsEstimate::new(input.row_count, 0.0);
                for a in assignments {
                    if let Expr::Variable(v) = &a.expr {
                        if let Some(vs) = input.variable(&v.name) {
                            stats.variable_stats.insert(a.output.name.clone(), vs.clone());
                        }
                    }
                }
                let outputs = node.output_variables();
                stats.total_size_bytes = stats.output_size_in_bytes(&outputs);
                stats
            }
            LogicalOp::Join {
                join_type,
                condition,
            } => {
                let left_ref = source(node, 0)?;
                let right_ref = source(node, 1)?;
                let left = source_stats.get_stats(left_ref)?;
                let right = source_stats.get_stats(right_ref)?;
                if left.is_unknown() || right.is_unknown() {
                    return Ok(StatsEstimate::unknown());
                }
                let left_outputs: HashSet<Variable> = left_ref.output_variables().into_iter().collect();
                let mut pairs = Vec::new();
                let mut residual = Vec::new();
                for conjunct in condition.conjuncts() {
                    match conjunct.as_variable_equality() {
                        Some((l, r)) if left_outputs.contains(l) && !left_outputs.contains(r) => {
                            pairs.push((l.name.clone(), r.name.clone()))
                        }
                        Some((l, r)) if left_outputs.contains(r) && !left_outputs.contains(l) => {
                            pairs.push((r.name.clone(), l.name.clone()))
                        }
                        _ if conjunct.is_true() => {}
                        _ => residual.push(conjunct.clone()),
                    }
                }
                let inner = derive_join_stats(&left, &right, &pairs);
                let inner = if residual.is_empty() {
                    inner
                } else {
                    let residual = Expr::combine_conjuncts(residual);
                    derive_filter_stats(&inner, estimate_selectivity(&residual, &inner))
                };
                match join_type {
                    JoinType::Inner | JoinType::Cross => inner,
                    JoinType::Left => with_min_rows(inner, left.row_count),
                    JoinType::Right => with_min_rows(inner, right.row_count),
                    JoinType::Full => with_min_rows(inner, left.row_count.max(right.row_count)),
                    JoinType::Semi | JoinType::Anti => {
                        derive_filter_stats(&left, SEMI_JOIN_SELECTIVITY)
                    }
                }
            }
            LogicalOp::Aggregate { group_by, .. } => {
                let input = source_stats.get_stats(source(node, 0)?)?;
                let names: Vec<String> = group_by.iter().map(|v| v.name.clone()).collect();
                derive_aggregate_stats(&input, &names)
            }
            LogicalOp::Sort { .. } => source_stats.get_stats(source(node, 0)?)?,
            LogicalOp::Limit { offset, count } => {
                let input = source_stats.get_stats(source(node, 0)?)?;
                let available = (input.row_count - *offset as f64).max(0.0);
                // An unknown input row count yields `count`.
                let row_count = if !input.is_unknown() && available <= *count as f64 {
                    available
                } else {
                    *count as f64
                };
                if row_count == input.row_count {
                    input
                } else {
                    let ratio = if input.row_count > 0.0 {
                        row_count / input.row_count
                    } else {
                        0.0
                    };
                    StatsEstimate {
                        row_count,
                        total_size_bytes: input.total_size_bytes * ratio,
                        variable_stats: input.variable_stats,
                    }
                }
            }
        };
        Ok(stats)
    }
}

fn with_min_rows(mut stats: StatsEstimate, min_rows: f64) -> StatsEstimate {
    if stats.row_count < min_rows {
        let ratio = min_rows / stats.row_count.max(1.0);
        stats.row_count = min_rows;
        stats.total_size_bytes *= ratio;
    }
    stats
}

/// Identity-keyed memoization over a `StatsCalculator`, scoped to one rule attempt.
pub struct CachingStatsProvider<'a> {
    calculator: &'a dyn StatsCalculator,
    memo: Option<&'a Memo>,
    lookup: &'a Lookup<'a>,
    session: &'a Session,
    /// Keyed by allocation address; the stored `Arc` keeps the address from being reused.
    cache: RefCell<HashMap<*const PlanNode, (PlanNodeRef, StatsEstimate)>>,
}

impl<'a> CachingStatsProvider<'a> {
    pub fn new(
        calculator: &'a dyn StatsCalculator,
        memo: Option<&'a Memo>,
        lookup: &'a Lookup<'a>,
        session: &'a Session,
    ) -> Self {
        Self {
            calculator,
            memo,
            lookup,
            session,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn group_stats(&self, reference: &GroupReference) -> OptimizerResult<StatsEstimate> {
        let Some(memo) = self.memo else {
            let node = self.lookup.resolve_group(reference)?;
            return self.node_stats(&node);
        };
        if let Some(stats) = memo.stats(reference.group)? {
            trace!("Stats cache hit for group {}", reference.group);
            return Ok(stats);
        }
        let node = memo.resolve(reference)?;
        let stats = self.node_stats(&node)?;
        memo.store_stats(reference.group, stats.clone())?;
        Ok(stats)
    }

    fn node_stats(&self, node: &PlanNodeRef) -> OptimizerResult<StatsEstimate> {
        let key = Arc::as_ptr(node);
        if let Some((_, stats)) = self.cache.borrow().get(&key) {
            trace!("Stats cache hit for node {}", node.id);
            return Ok(stats.clone());
        }
        let stats = self
            .calculator
            .calculate_stats(node, self, self.lookup, self.session)?;
        self.cache
            .borrow_mut()
            .insert(key, (node.clone(), stats.clone()));
        Ok(stats)
    }
}

impl StatsProvider for CachingStatsProvider<'_> {
    fn get_stats(&self, node: &PlanRef) -> OptimizerResult<StatsEstimate> {
        match node {
            PlanRef::Group(reference) => self.group_stats(reference),
            PlanRef::Node(node) => self.node_stats(node),
        }
    }
}
