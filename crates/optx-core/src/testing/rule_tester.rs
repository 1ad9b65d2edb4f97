//! `RuleTester` and the fluent `RuleAssert`.

use super::stats::TestingStatsCalculator;
use crate::allocator::{PlanNodeIdAllocator, VariableAllocator};
use crate::builder::PlanBuilder;
use crate::catalog::{Catalog, InMemoryCatalog};
use crate::cost::{CachingCostProvider, CostCalculator, DefaultCostCalculator};
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::Variable;
use crate::lookup::Lookup;
use crate::memo::Memo;
use crate::pattern::{Pattern, PlanNodeMatcher};
use crate::plan::{PlanNodeRef, PlanRef};
use crate::printer::{format_plan, PlanPrinter};
use crate::properties::{DefaultLogicalPropertiesProvider, LogicalProperties, LogicalPropertiesProvider};
use crate::rule::{Rule, RuleContext};
use crate::session::Session;
use crate::stats::{CachingStatsProvider, DefaultStatsCalculator, StatsCalculator, StatsEstimate};
use crate::transaction::{run_in_transaction, NoopTransactionScope, TransactionScope};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Shared setup for rule tests: catalog, calculators, session and transaction scope.
pub struct RuleTester {
    catalog: Arc<dyn Catalog>,
    stats_calculator: Arc<dyn StatsCalculator>,
    cost_calculator: Arc<dyn CostCalculator>,
    session: Session,
    transaction_scope: Arc<dyn TransactionScope>,
}

impl Default for RuleTester {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryCatalog::new()))
    }
}

impl RuleTester {
    /// Default calculators over `catalog`, session `test` on `local.tiny`.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            stats_calculator: Arc::new(DefaultStatsCalculator::new(catalog.clone())),
            cost_calculator: Arc::new(DefaultCostCalculator),
            catalog,
            session: Session::new("test").with_catalog("local", "tiny"),
            transaction_scope: Arc::new(NoopTransactionScope),
        }
    }

    pub fn with_stats_calculator(mut self, calculator: Arc<dyn StatsCalculator>) -> Self {
        self.stats_calculator = calculator;
        self
    }

    pub fn with_cost_calculator(mut self, calculator: Arc<dyn CostCalculator>) -> Self {
        self.cost_calculator = calculator;
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn with_transaction_scope(mut self, scope: Arc<dyn TransactionScope>) -> Self {
        self.transaction_scope = scope;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn assert_that<R: Rule + 'static>(&self, rule: R) -> RuleAssert {
        self.assert_that_rule(Arc::new(rule))
    }

    pub fn assert_that_rule(&self, rule: Arc<dyn Rule>) -> RuleAssert {
        RuleAssert {
            rule,
            session: self.session.clone(),
            catalog: self.catalog.clone(),
            stats_calculator: TestingStatsCalculator::new(self.stats_calculator.clone()),
            cost_calculator: self.cost_calculator.clone(),
            transaction_scope: self.transaction_scope.clone(),
            logical_properties: false,
            extra_catalogs: Vec::new(),
            id_allocator: PlanNodeIdAllocator::new(),
            plan: None,
        }
    }
}

/// Outcome of applying the rule once.
#[derive(Debug, Clone)]
pub struct RuleApplication {
    /// The extracted plan after the rewrite. `None` when the rule did not fire.
    pub result: Option<PlanNodeRef>,
    /// Root group properties after the rewrite, when derivation is enabled.
    pub logical_properties: Option<LogicalProperties>,
    /// The input plan with estimates.
    pub explain: String,
}

/// One rule, one plan, one application.
pub struct RuleAssert {
    rule: Arc<dyn Rule>,
    session: Session,
    catalog: Arc<dyn Catalog>,
    stats_calculator: TestingStatsCalculator,
    cost_calculator: Arc<dyn CostCalculator>,
    transaction_scope: Arc<dyn TransactionScope>,
    logical_properties: bool,
    extra_catalogs: Vec<String>,
    id_allocator: PlanNodeIdAllocator,
    plan: Option<PlanNodeRef>,
}

impl RuleAssert {
    pub fn set_system_property(mut self, name: &str, value: &str) -> Self {
        self.session.set_system_property(name, value);
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// Pin the estimate of the node with id `id`. The id must exist in the plan.
    pub fn override_stats(mut self, id: &str, stats: StatsEstimate) -> Self {
        self.stats_calculator.set_override(id, stats);
        self
    }

    /// Let the memo derive logical properties from the catalog.
    pub fn with_logical_properties(mut self) -> Self {
        self.logical_properties = true;
        self
    }

    /// Catalogs registered with the transaction in addition to the session catalog.
    pub fn with_extra_catalogs<I, S>(mut self, catalogs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_catalogs.extend(catalogs.into_iter().map(Into::into));
        self
    }

    pub fn on<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut PlanBuilder) -> PlanNodeRef,
    {
        let plan = {
            let mut builder = PlanBuilder::new(&self.id_allocator);
            build(&mut builder)
        };
        self.plan = Some(plan);
        self
    }

    /// Apply the rule once, reporting contract violations as errors.
    pub fn try_apply(&self) -> OptimizerResult<RuleApplication> {
        let plan = self.plan.clone().ok_or_else(|| {
            OptimizerError::RuleApplicationAssertion("no plan to test; call on() first".to_string())
        })?;
        self.stats_calculator.check_overrides(&plan)?;
        run_in_transaction(
            self.transaction_scope.as_ref(),
            &self.session,
            &self.extra_catalogs,
            |session| self.apply_in(session, plan),
        )
    }

    fn apply_in(&self, session: &Session, plan: PlanNodeRef) -> OptimizerResult<RuleApplication> {
        let provider: Option<Arc<dyn LogicalPropertiesProvider>> = if self.logical_properties {
            Some(Arc::new(DefaultLogicalPropertiesProvider::new(self.catalog.clone())))
        } else {
            None
        };
        let variable_allocator = VariableAllocator::new(plan.all_variables());
        let mut memo = Memo::new(PlanRef::Node(plan), provider.clone())?;
        let root = memo.root_group();
        let node = memo.node(root)?;

        let (transformed, explain) = {
            let lookup = Lookup::from_memo(&memo);
            let stats = CachingStatsProvider::new(&self.stats_calculator, Some(&memo), &lookup, session);
            let cost = CachingCostProvider::new(
                self.cost_calculator.as_ref(),
                &stats,
                Some(&memo),
                &lookup,
                session,
            );
            let explain = PlanPrinter::new(&lookup)
                .with_stats(&stats)
                .with_cost(&cost)
                .print(&PlanRef::Group(memo.reference_to(root)?));

            let matcher = PlanNodeMatcher::new(&lookup);
            let pattern = self.rule.pattern();
            let transformed = match matcher.match_pattern(&pattern, &node)? {
                Some(matched) if self.rule.is_enabled(session) => {
                    let check_timeout = || -> OptimizerResult<()> { Ok(()) };
                    let context = RuleContext {
                        lookup: &lookup,
                        id_allocator: &self.id_allocator,
                        variable_allocator: &variable_allocator,
                        session,
                        stats: &stats,
                        cost: &cost,
                        logical_properties_provider: provider.as_deref(),
                        memo: Some(&memo),
                        check_timeout: &check_timeout,
                    };
                    self.rule
                        .apply(&matched.node, &matched.captures, &context)?
                        .transformed
                }
                _ => None,
            };
            (transformed, explain)
        };

        let Some(transformed) = transformed else {
            return Ok(RuleApplication {
                result: None,
                logical_properties: None,
                explain,
            });
        };

        if transformed.ptr_eq(&PlanRef::Node(node.clone())) || transformed.group() == Some(root) {
            return Err(OptimizerError::RuleApplicationAssertion(format!(
                "{} returned the same node it was applied to, expected an empty result instead:\n{}",
                self.rule.name(),
                explain
            )));
        }
        let expected: BTreeSet<Variable> = node.output_variables().into_iter().collect();
        let actual: BTreeSet<Variable> = transformed.output_variables().into_iter().collect();
        if expected != actual {
            return Err(OptimizerError::RuleApplicationAssertion(format!(
                "{}: output variables changed\n\texpected: {:?}\n\tactual:   {:?}\n{}",
                self.rule.name(),
                expected,
                actual,
                explain
            )));
        }

        memo.replace(root, transformed, self.rule.name())?;
        let result = memo.extract()?;
        let logical_properties = memo.logical_properties(root)?;
        Ok(RuleApplication {
            result: Some(result),
            logical_properties,
            explain,
        })
    }

    fn application(&self) -> RuleApplication {
        match self.try_apply() {
            Ok(application) => application,
            Err(err) => panic!("{}: {}", self.rule.name(), err),
        }
    }

    /// The rewritten plan. Panics if the rule did not fire.
    pub fn get(&self) -> PlanNodeRef {
        let application = self.application();
        match application.result {
            Some(result) => result,
            None => panic!(
                "{} did not fire for:\n{}",
                self.rule.name(),
                application.explain
            ),
        }
    }

    pub fn does_not_fire(&self) {
        let application = self.application();
        if let Some(result) = application.result {
            panic!(
                "Expected {} to not fire for:\n{}\nbut it produced:\n{}",
                self.rule.name(),
                application.explain,
                format_plan(&result)
            );
        }
    }

    /// The rewritten plan must match `expected`.
    pub fn matches(&self, expected: &Pattern) -> PlanNodeRef {
        let result = self.get();
        let lookup = Lookup::no_lookup();
        let matched = PlanNodeMatcher::new(&lookup).match_pattern(expected, &result);
        match matched {
            Ok(Some(_)) => result,
            Ok(None) => panic!(
                "{} produced a plan not matching {:?}:\n{}",
                self.rule.name(),
                expected,
                format_plan(&result)
            ),
            Err(err) => panic!("{}: {}", self.rule.name(), err),
        }
    }

    /// Root group properties after the rewrite must equal `expected`.
    pub fn matches_logical_properties(&self, expected: &LogicalProperties) {
        assert!(
            self.logical_properties,
            "call with_logical_properties() before asserting on logical properties"
        );
        let application = self.application();
        if application.result.is_none() {
            panic!(
                "{} did not fire for:\n{}",
                self.rule.name(),
                application.explain
            );
        }
        assert_eq!(
            application.logical_properties.as_ref(),
            Some(expected),
            "{}: unexpected logical properties after the rewrite",
            self.rule.name()
        );
    }
}
