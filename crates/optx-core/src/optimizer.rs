//! # Iterative Optimizer
//!
//! The driver applies an ordered rule set to a plan until no rule changes anything.
//!
//! ## How It Works
//!
//! The input plan is inserted into a fresh `Memo`, one group per node. Exploration
//! starts at the root group:
//!
//! 1. **Explore node**: try every candidate rule on the group's current node, in rule
//!    set order. Whenever a rule fires, its result replaces the group's node and the
//!    candidates are tried again from the first one. The node is done when a full round
//!    over the candidates changes nothing.
//! 2. **Explore children**: explore each source group the same way.
//! 3. If any child changed, explore the node again, since its rules may now match. This
//!    repeats until both the node and its children are stable.
//!
//! With `ApplyOrder::BottomUp` the children are explored before the node.
//!
//! ## Group States
//!
//! Each group moves through `Unexplored -> Exploring -> Stable`. A group only changes
//! while it is being explored, so a stable group is never visited again in the same
//! pass. Groups created by a replacement start unexplored.
//!
//! ## Termination
//!
//! A rule that keeps producing new nodes would loop forever. The pass has a wall-clock
//! budget and a budget on rule attempts; both are checked before every round over the
//! candidates and by rules through `RuleContext::check_timeout_not_exhausted`.
//! Exhausting either fails the pass with `PlanOptimizationTimeout`.
//!
//! ## Caching
//!
//! Every rule attempt gets its own stats and cost providers. Their per-node caches die
//! with the attempt; per-group entries live in the memo and are evicted when a group
//! or one of its descendants is replaced.

use crate::allocator::{PlanNodeIdAllocator, VariableAllocator};
use crate::config::{ApplyOrder, OptimizerConfig};
use crate::cost::{CachingCostProvider, CostCalculator};
use crate::error::{OptimizerError, OptimizerResult};
use crate::lookup::Lookup;
use crate::memo::{GroupId, Memo};
use crate::pattern::{Pattern, PlanNodeMatcher};
use crate::plan::{PlanNodeRef, PlanRef};
use crate::properties::LogicalPropertiesProvider;
use crate::rule::{Rule, RuleContext, RuleSet};
use crate::session::Session;
use crate::stats::{CachingStatsProvider, StatsCalculator};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Per-rule counters of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleStats {
    /// Times the rule's pattern matched and `apply` ran.
    pub attempts: u64,
    /// Times the rule produced a replacement.
    pub hits: u64,
    pub time: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizedPlan {
    pub plan: PlanNodeRef,
    /// Rule attempts over the whole pass.
    pub iterations: usize,
    pub rules_applied: usize,
    pub rule_stats: BTreeMap<String, RuleStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Unexplored,
    Exploring,
    Stable,
}

/// Fixpoint rule driver.
pub struct IterativeOptimizer {
    rules: RuleSet,
    stats_calculator: Arc<dyn StatsCalculator>,
    cost_calculator: Arc<dyn CostCalculator>,
    logical_properties_provider: Option<Arc<dyn LogicalPropertiesProvider>>,
    config: OptimizerConfig,
}

impl IterativeOptimizer {
    pub fn new(
        rules: RuleSet,
        stats_calculator: Arc<dyn StatsCalculator>,
        cost_calculator: Arc<dyn CostCalculator>,
    ) -> Self {
        Self {
            rules,
            stats_calculator,
            cost_calculator,
            logical_properties_provider: None,
            config: OptimizerConfig::default(),
        }
    }

    /// Derive logical properties for the memo groups so rules can consult them.
    pub fn with_logical_properties_provider(
        mut self,
        provider: Arc<dyn LogicalPropertiesProvider>,
    ) -> Self {
        self.logical_properties_provider = Some(provider);
        self
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Rewrite `plan` to a fixpoint of the rule set.
    pub fn optimize(
        &self,
        plan: PlanNodeRef,
        session: &Session,
        id_allocator: &PlanNodeIdAllocator,
    ) -> OptimizerResult<OptimizedPlan> {
        let config = self.config.with_session_overrides(session)?;
        let variable_allocator = VariableAllocator::new(plan.all_variables());
        let memo = Memo::new(PlanRef::Node(plan), self.logical_properties_provider.clone())?;
        debug!(
            "Starting iterative optimization with rule set '{}' ({} rules), order={:?}",
            self.rules.name,
            self.rules.len(),
            config.apply_order
        );

        let mut pass = Pass {
            memo,
            rules: &self.rules,
            stats_calculator: self.stats_calculator.as_ref(),
            cost_calculator: self.cost_calculator.as_ref(),
            logical_properties_provider: self.logical_properties_provider.as_deref(),
            id_allocator,
            variable_allocator,
            session,
            budget: Budget {
                start: Instant::now(),
                timeout: config.timeout(),
                timeout_ms: config.timeout_ms,
                max_iterations: config.max_iterations,
            },
            apply_order: config.apply_order,
            iterations: 0,
            rules_applied: 0,
            rule_stats: BTreeMap::new(),
            states: HashMap::new(),
        };

        let root = pass.memo.root_group();
        if let Err(err) = pass.explore_group(root) {
            if let OptimizerError::PlanOptimizationTimeout { .. } = err {
                warn!("{}", err);
            }
            return Err(err);
        }

        let plan = pass.memo.extract()?;
        debug!(
            "Iterative optimization finished: iterations={}, rules_applied={}, elapsed={:?}",
            pass.iterations,
            pass.rules_applied,
            pass.budget.start.elapsed()
        );
        Ok(OptimizedPlan {
            plan,
            iterations: pass.iterations,
            rules_applied: pass.rules_applied,
            rule_stats: pass.rule_stats,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    start: Instant,
    timeout: Duration,
    timeout_ms: u64,
    max_iterations: usize,
}

impl Budget {
    fn check(&self, iterations: usize) -> OptimizerResult<()> {
        let elapsed = self.start.elapsed();
        if elapsed > self.timeout || iterations > self.max_iterations {
            return Err(OptimizerError::PlanOptimizationTimeout {
                elapsed_ms: elapsed.as_millis(),
                timeout_ms: self.timeout_ms,
                iterations,
                max_iterations: self.max_iterations,
            });
        }
        Ok(())
    }
}

/// State of one optimization pass.
struct Pass<'a> {
    memo: Memo,
    rules: &'a RuleSet,
    stats_calculator: &'a dyn StatsCalculator,
    cost_calculator: &'a dyn CostCalculator,
    logical_properties_provider: Option<&'a dyn LogicalPropertiesProvider>,
    id_allocator: &'a PlanNodeIdAllocator,
    variable_allocator: VariableAllocator,
    session: &'a Session,
    budget: Budget,
    apply_order: ApplyOrder,
    iterations: usize,
    rules_applied: usize,
    rule_stats: BTreeMap<String, RuleStats>,
    states: HashMap<GroupId, GroupState>,
}

impl Pass<'_> {
    fn state(&self, group: GroupId) -> GroupState {
        self.states
            .get(&group)
            .copied()
            .unwrap_or(GroupState::Unexplored)
    }

    /// Explore `group` to a fixpoint. Returns whether anything in its subtree changed.
    fn explore_group(&mut self, group: GroupId) -> OptimizerResult<bool> {
        if self.state(group) == GroupState::Stable {
            return Ok(false);
        }
        self.states.insert(group, GroupState::Exploring);

        let progress = match self.apply_order {
            ApplyOrder::TopDown => {
                let mut progress = self.explore_node(group)?;
                while self.explore_children(group)? {
                    progress = true;
                    if !self.explore_node(group)? {
                        break;
                    }
                }
                progress
            }
            ApplyOrder::BottomUp => {
                let mut progress = false;
                loop {
                    let children = self.explore_children(group)?;
                    let node = self.explore_node(group)?;
                    if !children && !node {
                        break;
                    }
                    progress = true;
                }
                progress
            }
        };

        self.states.insert(group, GroupState::Stable);
        trace!("Group {} is stable (progress={})", group, progress);
        Ok(progress)
    }

    fn explore_node(&mut self, group: GroupId) -> OptimizerResult<bool> {
        let rules = self.rules;
        let mut progress = false;
        let mut done = false;
        while !done {
            self.budget.check(self.iterations)?;
            done = true;
            let node = self.memo.node(group)?;
            for (rule, pattern) in rules.candidates_for(node.kind()) {
                if !rule.is_enabled(self.session) {
                    continue;
                }
                if let Some(transformed) = self.transform(group, &node, rule, pattern)? {
                    self.memo.replace(group, transformed, rule.name())?;
                    self.rules_applied += 1;
                    progress = true;
                    done = false;
                    // The node kind may have changed; pick candidates again.
                    break;
                }
            }
        }
        Ok(progress)
    }

    fn explore_children(&mut self, group: GroupId) -> OptimizerResult<bool> {
        let node = self.memo.node(group)?;
        let mut progress = false;
        for source in &node.sources {
            if let PlanRef::Group(reference) = source {
                if self.explore_group(reference.group)? {
                    progress = true;
                }
            }
        }
        Ok(progress)
    }

    /// Match and apply one rule. `None` when the pattern does not match or the rule
    /// declined.
    fn transform(
        &mut self,
        group: GroupId,
        node: &PlanNodeRef,
        rule: &dyn Rule,
        pattern: &Pattern,
    ) -> OptimizerResult<Option<PlanRef>> {
        let lookup = Lookup::from_memo(&self.memo);
        let matcher = PlanNodeMatcher::new(&lookup);
        let Some(matched) = matcher.match_pattern(pattern, node)? else {
            return Ok(None);
        };

        self.iterations += 1;
        let budget = self.budget;
        let iterations = self.iterations;
        let check_timeout = move || budget.check(iterations);

        let stats = CachingStatsProvider::new(
            self.stats_calculator,
            Some(&self.memo),
            &lookup,
            self.session,
        );
        let cost = CachingCostProvider::new(
            self.cost_calculator,
            &stats,
            Some(&self.memo),
            &lookup,
            self.session,
        );
        let context = RuleContext {
            lookup: &lookup,
            id_allocator: self.id_allocator,
            variable_allocator: &self.variable_allocator,
            session: self.session,
            stats: &stats,
            cost: &cost,
            logical_properties_provider: self.logical_properties_provider,
            memo: Some(&self.memo),
            check_timeout: &check_timeout,
        };

        let started = Instant::now();
        let result = rule.apply(&matched.node, &matched.captures, &context)?;
        let elapsed = started.elapsed();

        let transformed = match result.transformed {
            Some(plan) if plan.ptr_eq(&PlanRef::Node(node.clone())) || plan.group() == Some(group) => {
                warn!(
                    "Rule {} returned its input node {} unchanged; ignoring the result",
                    rule.name(),
                    node.id
                );
                None
            }
            other => other,
        };

        let counters = self.rule_stats.entry(rule.name().to_string()).or_default();
        counters.attempts += 1;
        counters.time += elapsed;
        if transformed.is_some() {
            counters.hits += 1;
            debug!(
                "Rule {} fired on group {} (node {})",
                rule.name(),
                group,
                node.id
            );
        }
        Ok(transformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PlanBuilder;
    use crate::catalog::InMemoryCatalog;
    use crate::cost::DefaultCostCalculator;
    use crate::expr::{DataType, Expr, TableRef};
    use crate::pattern::{Capture, Captures};
    use crate::plan::OpKind;
    use crate::rule::RuleResult;
    use crate::session::ITERATIVE_OPTIMIZER_MAX_ITERATIONS;
    use crate::stats::DefaultStatsCalculator;

    const FILTER: Capture = Capture::new("filter");

    /// Removes `Filter(true)`.
    struct DropTrueFilter;

    impl Rule for DropTrueFilter {
        fn name(&self) -> &str {
            "DropTrueFilter"
        }

        fn pattern(&self) -> Pattern {
            Pattern::filter()
                .matching("true", |node| match &node.op {
                    crate::plan::LogicalOp::Filter { predicate } => predicate.is_true(),
                    _ => false,
                })
                .captured_as(FILTER)
        }

        fn apply(
            &self,
            node: &PlanNodeRef,
            captures: &Captures,
            _context: &RuleContext,
        ) -> OptimizerResult<RuleResult> {
            assert!(Arc::ptr_eq(captures.require(FILTER)?, node));
            Ok(RuleResult::of(node.sources[0].clone()))
        }
    }

    /// Rebuilds every filter forever.
    struct Rebuild;

    impl Rule for Rebuild {
        fn name(&self) -> &str {
            "Rebuild"
        }

        fn pattern(&self) -> Pattern {
            Pattern::filter()
        }

        fn apply(
            &self,
            node: &PlanNodeRef,
            _captures: &Captures,
            context: &RuleContext,
        ) -> OptimizerResult<RuleResult> {
            context.check_timeout_not_exhausted()?;
            Ok(RuleResult::of(node.replace_sources(node.sources.clone())))
        }
    }

    fn optimizer(rules: RuleSet) -> IterativeOptimizer {
        let catalog = Arc::new(InMemoryCatalog::new());
        IterativeOptimizer::new(
            rules,
            Arc::new(DefaultStatsCalculator::new(catalog)),
            Arc::new(DefaultCostCalculator),
        )
    }

    fn nested_true_filters(ids: &PlanNodeIdAllocator) -> PlanNodeRef {
        let mut b = PlanBuilder::new(ids);
        let a = b.variable("a", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);
        let inner = b.filter(Expr::literal_true(), scan);
        let limit = b.limit(3, inner);
        b.filter(Expr::literal_true(), limit)
    }

    #[test]
    fn test_fixpoint_removes_every_match() {
        let ids = PlanNodeIdAllocator::new();
        let plan = nested_true_filters(&ids);
        let optimizer = optimizer(RuleSet::new("test").with_rule(Arc::new(DropTrueFilter)));

        let result = optimizer.optimize(plan, &Session::new("q"), &ids).unwrap();
        assert_eq!(result.plan.kind(), OpKind::Limit);
        assert_eq!(result.plan.sources[0].as_node().unwrap().kind(), OpKind::TableScan);
        assert_eq!(result.rules_applied, 2);
        assert_eq!(result.rule_stats["DropTrueFilter"].hits, 2);

        // A stable plan stays stable.
        let again = optimizer.optimize(result.plan.clone(), &Session::new("q"), &ids).unwrap();
        assert_eq!(again.rules_applied, 0);
        assert_eq!(again.plan, result.plan);
    }

    #[test]
    fn test_bottom_up_reaches_same_plan() {
        let ids = PlanNodeIdAllocator::new();
        let plan = nested_true_filters(&ids);
        let optimizer = optimizer(RuleSet::new("test").with_rule(Arc::new(DropTrueFilter)))
            .with_config(OptimizerConfig {
                apply_order: ApplyOrder::BottomUp,
                ..OptimizerConfig::default()
            });
        let result = optimizer.optimize(plan, &Session::new("q"), &ids).unwrap();
        assert_eq!(result.plan.kind(), OpKind::Limit);
        assert_eq!(result.rules_applied, 2);
    }

    #[test]
    fn test_adversarial_rule_exhausts_budget() {
        let ids = PlanNodeIdAllocator::new();
        let plan = nested_true_filters(&ids);
        let optimizer = optimizer(RuleSet::new("test").with_rule(Arc::new(Rebuild)));
        let session = Session::new("q").with_system_property(ITERATIVE_OPTIMIZER_MAX_ITERATIONS, "50");

        let err = optimizer.optimize(plan, &session, &ids).unwrap_err();
        match err {
            OptimizerError::PlanOptimizationTimeout {
                iterations,
                max_iterations,
                ..
            } => {
                assert_eq!(max_iterations, 50);
                assert!(iterations > 50);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let ids = PlanNodeIdAllocator::new();
        let plan = nested_true_filters(&ids);
        let optimizer = optimizer(RuleSet::new("test").with_rule(Arc::new(DropTrueFilter)));
        let session = Session::new("q")
            .with_system_property(crate::session::DISABLED_RULES, "DropTrueFilter");
        let result = optimizer.optimize(plan.clone(), &session, &ids).unwrap();
        assert_eq!(result.rules_applied, 0);
        assert_eq!(result.plan, plan);
        assert!(result.rule_stats.is_empty());
    }
}
