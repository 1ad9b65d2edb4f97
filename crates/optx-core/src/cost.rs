//! # Cost Model
//!
//! This module defines the cost estimate, a default cost calculator, and the caching
//! cost provider rules read costs through.
//!
//! ## Multi-Dimensional Cost Model
//!
//! Query execution cost is not a single number -- it depends on CPU time, memory
//! consumption, and network transfer. `CostEstimate` keeps the three dimensions apart
//! and collapses them into a single comparable value only on request:
//!
//! ```text
//! total_cost = cpu_weight * cpu_cost + memory_weight * max_memory + network_weight * network_cost
//! ```
//!
//! The default weights (1.0, 1.0, 10.0) reflect the assumption that network I/O is the
//! most expensive dimension in a distributed system.
//!
//! ## Cost Accumulation
//!
//! A `CostCalculator` computes the *local* cost of one operator. The total cost of a
//! plan is its local cost plus the accumulated cost of its sources: CPU and network
//! add up, memory is the peak over the subtree. `CachingCostProvider` performs that
//! accumulation and caches it like the stats provider does.

use crate::error::OptimizerResult;
use crate::lookup::Lookup;
use crate::memo::Memo;
use crate::plan::{GroupReference, LogicalOp, PlanNode, PlanNodeRef, PlanRef};
use crate::session::Session;
use crate::stats::StatsProvider;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Weights used to collapse a `CostEstimate` into one number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub network_weight: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub cpu_cost: f64,
    /// Peak memory held at once.
    pub max_memory: f64,
    pub network_cost: f64,
}

impl CostEstimate {
    pub fn new(cpu_cost: f64, max_memory: f64, network_cost: f64) -> Self {
        Self {
            cpu_cost,
            max_memory,
            network_cost,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn unknown() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }

    pub fn is_unknown(&self) -> bool {
        self.cpu_cost.is_nan() || self.max_memory.is_nan() || self.network_cost.is_nan()
    }

    /// Combine with the cost of a source subtree.
    pub fn add(&self, other: &CostEstimate) -> CostEstimate {
        CostEstimate {
            cpu_cost: self.cpu_cost + other.cpu_cost,
            max_memory: if self.max_memory.is_nan() || other.max_memory.is_nan() {
                f64::NAN
            } else {
                self.max_memory.max(other.max_memory)
            },
            network_cost: self.network_cost + other.network_cost,
        }
    }

    pub fn total_with(&self, weights: &CostWeights) -> f64 {
        weights.cpu_weight * self.cpu_cost
            + weights.memory_weight * self.max_memory
            + weights.network_weight * self.network_cost
    }

    pub fn total(&self) -> f64 {
        self.total_with(&CostWeights::default())
    }
}

/// Pluggable estimator of the local cost of one operator.
pub trait CostCalculator: Send + Sync {
    fn calculate_cost(
        &self,
        node: &PlanNodeRef,
        stats: &dyn StatsProvider,
        lookup: &Lookup,
        session: &Session,
    ) -> OptimizerResult<CostEstimate>;
}

/// Cost of any node or group reference of the current plan, sources included.
pub trait CostProvider {
    fn get_cost(&self, node: &PlanRef) -> OptimizerResult<CostEstimate>;
}

/// Default local cost model.
///
/// - **Scan / Filter / Project / Limit**: CPU proportional to the bytes processed.
/// - **Join**: builds a hash table on the right input (CPU + memory for the build side)
///   and probes it with the left input (CPU only). Choosing the smaller input as the
///   build side is what keeps memory down.
/// - **Aggregate**: CPU for hashing each input row, memory for the output groups.
/// - **Sort**: `n log n` CPU plus memory to materialize the input.
///
/// No operator is charged network cost: exchanges are not part of the logical plan.
#[derive(Debug, Default)]
pub struct DefaultCostCalculator;

impl DefaultCostCalculator {
    fn source_size(
        node: &PlanNode,
        index: usize,
        stats: &dyn StatsProvider,
    ) -> OptimizerResult<(f64, f64)> {
        match node.source(index) {
            Some(source) => {
                let s = stats.get_stats(source)?;
                let outputs = source.output_variables();
                Ok((s.row_count, s.output_size_in_bytes(&outputs)))
            }
            None => Ok((0.0, 0.0)),
        }
    }
}

impl CostCalculator for DefaultCostCalculator {
    fn calculate_cost(
        &self,
        node: &PlanNodeRef,
        stats: &dyn StatsProvider,
        _lookup: &Lookup,
        _session: &Session,
    ) -> OptimizerResult<CostEstimate> {
        let output_size = || -> OptimizerResult<f64> {
            let own = stats.get_stats(&PlanRef::Node(node.clone()))?;
            Ok(own.output_size_in_bytes(&node.output_variables()))
        };
        let cost = match &node.op {
            LogicalOp::TableScan { .. } => CostEstimate::new(output_size()?, 0.0, 0.0),
            LogicalOp::Values { .. } => CostEstimate::zero(),
            LogicalOp::Filter { .. } | LogicalOp::Project { .. } | LogicalOp::Limit { .. } => {
                let (_, size) = Self::source_size(node, 0, stats)?;
                CostEstimate::new(size, 0.0, 0.0)
            }
            LogicalOp::Join { .. } => {
                let (_, probe_size) = Self::source_size(node, 0, stats)?;
                let (_, build_size) = Self::source_size(node, 1, stats)?;
                CostEstimate::new(probe_size + build_size, build_size, 0.0)
            }
            LogicalOp::Aggregate { .. } => {
                let (_, size) = Self::source_size(node, 0, stats)?;
                CostEstimate::new(size, output_size()?, 0.0)
            }
            LogicalOp::Sort { .. } => {
                let (rows, size) = Self::source_size(node, 0, stats)?;
                let n_log_n = if rows > 1.0 { rows * rows.log2() } else { 1.0 };
                CostEstimate::new(n_log_n, size, 0.0)
            }
        };
        Ok(cost)
    }
}

/// Identity-keyed memoization of accumulated costs, scoped to one rule attempt.
pub struct CachingCostProvider<'a> {
    calculator: &'a dyn CostCalculator,
    stats: &'a dyn StatsProvider,
    memo: Option<&'a Memo>,
    lookup: &'a Lookup<'a>,
    session: &'a Session,
    cache: RefCell<HashMap<*const PlanNode, (PlanNodeRef, CostEstimate)>>,
}

impl<'a> CachingCostProvider<'a> {
    pub fn new(
        calculator: &'a dyn CostCalculator,
        stats: &'a dyn StatsProvider,
        memo: Option<&'a Memo>,
        lookup: &'a Lookup<'a>,
        session: &'a Session,
    ) -> Self {
        Self {
            calculator,
            stats,
            memo,
            lookup,
            session,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn group_cost(&self, reference: &GroupReference) -> OptimizerResult<CostEstimate> {
        let Some(memo) = self.memo else {
            let node = self.lookup.resolve_group(reference)?;
            return self.node_cost(&node);
        };
        if let Some(cost) = memo.cost(reference.group)? {
            trace!("Cost cache hit for group {}", reference.group);
            return Ok(cost);
        }
        let node = memo.resolve(reference)?;
        let cost = self.node_cost(&node)?;
        memo.store_cost(reference.group, cost)?;
        Ok(cost)
    }

    fn node_cost(&self, node: &PlanNodeRef) -> OptimizerResult<CostEstimate> {
        let key = Arc::as_ptr(node);
        if let Some((_, cost)) = self.cache.borrow().get(&key) {
            trace!("Cost cache hit for node {}", node.id);
            return Ok(*cost);
        }
        let mut cost = self
            .calculator
            .calculate_cost(node, self.stats, self.lookup, self.session)?;
        for source in &node.sources {
            cost = cost.add(&self.get_cost(source)?);
        }
        self.cache.borrow_mut().insert(key, (node.clone(), cost));
        Ok(cost)
    }
}

impl CostProvider for CachingCostProvider<'_> {
    fn get_cost(&self, node: &PlanRef) -> OptimizerResult<CostEstimate> {
        match node {
            PlanRef::Group(reference) => self.group_cost(reference),
            PlanRef::Node(node) => self.node_cost(node),
        }
    }
}
