//! # Rule System
//!
//! This module defines the rule contract, the per-application context handed to rules,
//! and the ordered rule set the optimizer driver iterates.
//!
//! ## Rule Contract
//!
//! A rule is a named pattern plus a transform:
//!
//! - `pattern()` describes the plan shape the rule applies to. The driver only calls
//!   `apply` on nodes the pattern matched, so `apply` can rely on the captures being
//!   present.
//! - `is_enabled(session)` lets configuration switch a rule off without removing it from
//!   the rule set. By default a rule is enabled unless its name appears in the session's
//!   `disabled_rules` property.
//! - `apply(node, captures, context)` returns either an empty result (the rule declined)
//!   or a replacement plan producing the same set of output variables.
//!
//! Rules never touch the memo. All structural change flows back through `RuleResult` and
//! is installed by the caller (the optimizer driver or the single-rule harness).
//!
//! ## Identity Contract
//!
//! A non-empty result must not be the input node itself. Callers detect that a rewrite
//! happened by pointer identity, so a rule that has nothing to do must return
//! `RuleResult::empty()` rather than echoing its input.
//!
//! ## Rule Context
//!
//! `RuleContext` bundles everything a rule may consult: the lookup, id and variable
//! allocators, the session, stats and cost providers scoped to this attempt, the logical
//! properties of any plan fragment, and a budget check for long-running rules.

use crate::allocator::{PlanNodeIdAllocator, VariableAllocator};
use crate::cost::CostProvider;
use crate::error::{OptimizerError, OptimizerResult};
use crate::lookup::Lookup;
use crate::memo::Memo;
use crate::pattern::{Captures, Pattern};
use crate::plan::{OpKind, PlanNodeRef, PlanRef};
use crate::properties::{LogicalProperties, LogicalPropertiesProvider};
use crate::session::Session;
use crate::stats::StatsProvider;
use std::sync::Arc;

/// Outcome of one rule application.
#[derive(Debug, Clone, Default)]
pub struct RuleResult {
    pub transformed: Option<PlanRef>,
}

impl RuleResult {
    pub fn empty() -> Self {
        Self { transformed: None }
    }

    pub fn of(plan: impl Into<PlanRef>) -> Self {
        Self {
            transformed: Some(plan.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transformed.is_none()
    }
}

/// A plan rewrite.
pub trait Rule: Send + Sync {
    /// Unique name of this rule. Matched case-insensitively against `disabled_rules`.
    fn name(&self) -> &str;

    /// Pattern the root of a candidate node must match.
    fn pattern(&self) -> Pattern;

    fn is_enabled(&self, session: &Session) -> bool {
        session.is_rule_enabled(self.name())
    }

    fn apply(
        &self,
        node: &PlanNodeRef,
        captures: &Captures,
        context: &RuleContext,
    ) -> OptimizerResult<RuleResult>;
}

/// Collaborators available to one rule application.
pub struct RuleContext<'a> {
    pub lookup: &'a Lookup<'a>,
    pub id_allocator: &'a PlanNodeIdAllocator,
    pub variable_allocator: &'a VariableAllocator,
    pub session: &'a Session,
    pub stats: &'a dyn StatsProvider,
    pub cost: &'a dyn CostProvider,
    pub logical_properties_provider: Option<&'a dyn LogicalPropertiesProvider>,
    pub memo: Option<&'a Memo>,
    pub check_timeout: &'a dyn Fn() -> OptimizerResult<()>,
}

impl RuleContext<'_> {
    /// Fails with `PlanOptimizationTimeout` once the pass has run out of budget.
    pub fn check_timeout_not_exhausted(&self) -> OptimizerResult<()> {
        (self.check_timeout)()
    }

    /// Logical properties of `plan`. Group references read the memo's cached value;
    /// concrete nodes are derived from their sources. `None` when no provider is
    /// configured.
    pub fn logical_properties(&self, plan: &PlanRef) -> OptimizerResult<Option<LogicalProperties>> {
        let Some(provider) = self.logical_properties_provider else {
            return Ok(None);
        };
        match plan {
            PlanRef::Group(reference) => match self.memo {
                Some(memo) if memo.has_logical_properties_provider() => {
                    memo.logical_properties(reference.group)
                }
                _ => {
                    let node = self.lookup.resolve_group(reference)?;
                    self.logical_properties(&PlanRef::Node(node))
                }
            },
            PlanRef::Node(node) => {
                let mut sources = Vec::with_capacity(node.sources.len());
                for source in &node.sources {
                    let properties = self.logical_properties(source)?.ok_or_else(|| {
                        OptimizerError::invalid_plan(format!(
                            "no logical properties for a source of node {}",
                            node.id
                        ))
                    })?;
                    sources.push(properties);
                }
                provider.derive(node, &sources).map(Some)
            }
        }
    }
}

struct RuleEntry {
    rule: Arc<dyn Rule>,
    pattern: Pattern,
    root_kind: Option<OpKind>,
}

/// Ordered rules with their patterns computed once.
///
/// Candidates for a node are the rules whose pattern root can match the node's kind,
/// in the order the rules were added.
pub struct RuleSet {
    pub name: String,
    entries: Vec<RuleEntry>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn Rule>) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) {
        let pattern = rule.pattern();
        let root_kind = pattern.root_kind();
        self.entries.push(RuleEntry {
            rule,
            pattern,
            root_kind,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.rule.name()).collect()
    }

    /// Rules that may match a node of `kind`, with their patterns.
    pub fn candidates_for(&self, kind: OpKind) -> impl Iterator<Item = (&dyn Rule, &Pattern)> {
        self.entries
            .iter()
            .filter(move |e| e.root_kind.map_or(true, |k| k == kind))
            .map(|e| (e.rule.as_ref(), &e.pattern))
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("name", &self.name)
            .field("rules", &self.rule_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DISABLED_RULES;

    struct Named(&'static str, Pattern);

    impl Rule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn pattern(&self) -> Pattern {
            self.1.clone()
        }

        fn apply(
            &self,
            _node: &PlanNodeRef,
            _captures: &Captures,
            _context: &RuleContext,
        ) -> OptimizerResult<RuleResult> {
            Ok(RuleResult::empty())
        }
    }

    #[test]
    fn test_candidates_keep_order() {
        let rules = RuleSet::new("test")
            .with_rule(Arc::new(Named("a", Pattern::filter())))
            .with_rule(Arc::new(Named("b", Pattern::limit())))
            .with_rule(Arc::new(Named("c", Pattern::Any)))
            .with_rule(Arc::new(Named("d", Pattern::filter().with_source(Pattern::filter()))));

        let names: Vec<&str> = rules
            .candidates_for(OpKind::Filter)
            .map(|(rule, _)| rule.name())
            .collect();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert_eq!(rules.len(), 4);
    }

    #[test]
    fn test_disabled_by_session() {
        let rule = Named("MergeLimits", Pattern::limit());
        assert!(rule.is_enabled(&Session::new("q")));
        let session = Session::new("q").with_system_property(DISABLED_RULES, "mergelimits");
        assert!(!rule.is_enabled(&session));
    }
}
