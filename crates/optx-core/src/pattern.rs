//! # Declarative Pattern Matching for Rules
//!
//! Every rule declares a `Pattern` describing the shape of plan it can rewrite. The
//! driver only calls `Rule::apply` on nodes the pattern matches, and hands the rule the
//! sub-nodes and payload values the pattern captured.
//!
//! ## Pattern Language
//!
//! Patterns are a small combinator algebra interpreted by `PlanNodeMatcher`:
//!
//! - `Pattern::Any`: matches every node.
//! - `Pattern::Leaf`: matches nodes without sources.
//! - `Pattern::Kind(kind)`: matches nodes of one operator kind.
//! - `Pattern::Operator(kind, children)`: kind plus exact arity, with one pattern per
//!   source. `Any` children are not resolved at all.
//! - `Pattern::Source(i, p)`: the `i`-th source, resolved through the `Lookup`,
//!   matches `p`.
//! - `Pattern::Capture(c, p)`: `p` matches, and the node is bound to `c`.
//! - `Pattern::CaptureValue(c, f)`: `f` extracts a value from the node, bound to `c`.
//!   A node `f` extracts nothing from does not match.
//! - `Pattern::Filter(pred)`: an arbitrary predicate over the node.
//! - `Pattern::And` / `Pattern::Or`.
//!
//! Rules usually build patterns fluently:
//!
//! ```text
//! Pattern::filter()
//!     .capturing(PREDICATE, |n| ...)
//!     .with_source(Pattern::join().captured_as(JOIN))
//! ```
//!
//! ## Captures
//!
//! A successful match returns the matched node, the captured sub-nodes and the
//! captured values. Nodes and values share one namespace: binding a name twice fails
//! the match. A failed `Or` branch leaves no bindings behind: every branch matches
//! against its own copy of the captures.

use crate::error::{OptimizerError, OptimizerResult};
use crate::lookup::Lookup;
use crate::plan::{OpKind, PlanNode, PlanNodeRef};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name under which a pattern binds a node or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capture(&'static str);

impl Capture {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

/// Named predicate over a single node.
#[derive(Clone)]
pub struct NodePredicate {
    name: &'static str,
    predicate: Arc<dyn Fn(&PlanNode) -> bool + Send + Sync>,
}

impl NodePredicate {
    pub fn test(&self, node: &PlanNode) -> bool {
        (self.predicate)(node)
    }
}

impl fmt::Debug for NodePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePredicate({})", self.name)
    }
}

/// A payload value bound by `Pattern::CaptureValue`.
pub type CapturedValue = Arc<dyn Any + Send + Sync>;

/// Named extraction of a value from a single node.
#[derive(Clone)]
pub struct ValueExtractor {
    extract: Arc<dyn Fn(&PlanNode) -> Option<CapturedValue> + Send + Sync>,
}

impl ValueExtractor {
    pub fn new<T, F>(extract: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&PlanNode) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(move |node: &PlanNode| {
                extract(node).map(|v| Arc::new(v) as CapturedValue)
            }),
        }
    }

    pub fn extract(&self, node: &PlanNode) -> Option<CapturedValue> {
        (self.extract)(node)
    }
}

impl fmt::Debug for ValueExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueExtractor")
    }
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Any,
    Leaf,
    Kind(OpKind),
    Operator(OpKind, Vec<Pattern>),
    Source(usize, Box<Pattern>),
    Capture(Capture, Box<Pattern>),
    CaptureValue(Capture, ValueExtractor),
    Filter(NodePredicate),
    And(Vec<Pattern>),
    Or(Vec<Pattern>),
}

impl Pattern {
    pub fn table_scan() -> Self {
        Pattern::Kind(OpKind::TableScan)
    }

    pub fn values() -> Self {
        Pattern::Kind(OpKind::Values)
    }

    pub fn filter() -> Self {
        Pattern::Kind(OpKind::Filter)
    }

    pub fn project() -> Self {
        Pattern::Kind(OpKind::Project)
    }

    pub fn join() -> Self {
        Pattern::Kind(OpKind::Join)
    }

    pub fn aggregate() -> Self {
        Pattern::Kind(OpKind::Aggregate)
    }

    pub fn sort() -> Self {
        Pattern::Kind(OpKind::Sort)
    }

    pub fn limit() -> Self {
        Pattern::Kind(OpKind::Limit)
    }

    /// Also require the first source to match `source`.
    pub fn with_source(self, source: Pattern) -> Self {
        self.with_source_at(0, source)
    }

    pub fn with_source_at(self, index: usize, source: Pattern) -> Self {
        self.and(Pattern::Source(index, Box::new(source)))
    }

    pub fn captured_as(self, capture: Capture) -> Self {
        Pattern::Capture(capture, Box::new(self))
    }

    /// Also bind the value `extract` finds in the node to `capture`. Nodes it finds
    /// nothing in do not match.
    pub fn capturing<T, F>(self, capture: Capture, extract: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&PlanNode) -> Option<T> + Send + Sync + 'static,
    {
        self.and(Pattern::CaptureValue(capture, ValueExtractor::new(extract)))
    }

    /// Also require `predicate` to hold on the node.
    pub fn matching<F>(self, name: &'static str, predicate: F) -> Self
    where
        F: Fn(&PlanNode) -> bool + Send + Sync + 'static,
    {
        self.and(Pattern::Filter(NodePredicate {
            name,
            predicate: Arc::new(predicate),
        }))
    }

    pub fn and(self, other: Pattern) -> Self {
        match self {
            Pattern::And(mut parts) => {
                parts.push(other);
                Pattern::And(parts)
            }
            first => Pattern::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Pattern) -> Self {
        match self {
            Pattern::Or(mut branches) => {
                branches.push(other);
                Pattern::Or(branches)
            }
            first => Pattern::Or(vec![first, other]),
        }
    }

    /// The operator kind every matching node must have, if the pattern fixes one.
    pub fn root_kind(&self) -> Option<OpKind> {
        match self {
            Pattern::Kind(kind) | Pattern::Operator(kind, _) => Some(*kind),
            Pattern::Capture(_, inner) => inner.root_kind(),
            Pattern::And(parts) => parts.iter().find_map(Pattern::root_kind),
            Pattern::Or(branches) => {
                let first = branches.first()?.root_kind()?;
                branches
                    .iter()
                    .all(|b| b.root_kind() == Some(first))
                    .then_some(first)
            }
            Pattern::Any
            | Pattern::Leaf
            | Pattern::Source(..)
            | Pattern::CaptureValue(..)
            | Pattern::Filter(_) => None,
        }
    }
}

/// Nodes and values bound by a successful match.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    bindings: BTreeMap<Capture, PlanNodeRef>,
    values: BTreeMap<Capture, CapturedValue>,
}

impl Captures {
    pub fn get(&self, capture: Capture) -> Option<&PlanNodeRef> {
        self.bindings.get(&capture)
    }

    /// The node bound to `capture`. A missing binding means the rule's pattern and
    /// its `apply` disagree.
    pub fn require(&self, capture: Capture) -> OptimizerResult<&PlanNodeRef> {
        self.get(capture).ok_or_else(|| {
            OptimizerError::invalid_plan(format!("no node captured as '{}'", capture.name()))
        })
    }

    /// The value bound to `capture`, if it was bound to a `T`.
    pub fn value<T: Any>(&self, capture: Capture) -> Option<&T> {
        self.values.get(&capture)?.downcast_ref::<T>()
    }

    pub fn require_value<T: Any>(&self, capture: Capture) -> OptimizerResult<&T> {
        self.value(capture).ok_or_else(|| {
            OptimizerError::invalid_plan(format!(
                "no {} value captured as '{}'",
                std::any::type_name::<T>(),
                capture.name()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.len() + self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty() && self.values.is_empty()
    }

    fn is_bound(&self, capture: Capture) -> bool {
        self.bindings.contains_key(&capture) || self.values.contains_key(&capture)
    }

    /// Returns false if the name is already bound.
    fn bind(&mut self, capture: Capture, node: PlanNodeRef) -> bool {
        if self.is_bound(capture) {
            return false;
        }
        self.bindings.insert(capture, node);
        true
    }

    fn bind_value(&mut self, capture: Capture, value: CapturedValue) -> bool {
        if self.is_bound(capture) {
            return false;
        }
        self.values.insert(capture, value);
        true
    }
}

#[derive(Debug, Clone)]
pub struct Match {
    pub node: PlanNodeRef,
    pub captures: Captures,
}

/// Interprets patterns against plan nodes, resolving group references on the way.
pub struct PlanNodeMatcher<'a> {
    lookup: &'a Lookup<'a>,
}

impl<'a> PlanNodeMatcher<'a> {
    pub fn new(lookup: &'a Lookup<'a>) -> Self {
        Self { lookup }
    }

    pub fn match_pattern(
        &self,
        pattern: &Pattern,
        node: &PlanNodeRef,
    ) -> OptimizerResult<Option<Match>> {
        let mut captures = Captures::default();
        if self.matches(pattern, node, &mut captures)? {
            Ok(Some(Match {
                node: node.clone(),
                captures,
            }))
        } else {
            Ok(None)
        }
    }

    fn matches(
        &self,
        pattern: &Pattern,
        node: &PlanNodeRef,
        captures: &mut Captures,
    ) -> OptimizerResult<bool> {
        match pattern {
            Pattern::Any => Ok(true),
            Pattern::Leaf => Ok(node.sources.is_empty()),
            Pattern::Kind(kind) => Ok(node.kind() == *kind),
            Pattern::Operator(kind, children) => {
                if node.kind() != *kind || node.sources.len() != children.len() {
                    return Ok(false);
                }
                for (index, child) in children.iter().enumerate() {
                    if !self.source_matches(index, child, node, captures)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Pattern::Source(index, inner) => self.source_matches(*index, inner, node, captures),
            Pattern::Capture(capture, inner) => {
                if !self.matches(inner, node, captures)? {
                    return Ok(false);
                }
                Ok(captures.bind(*capture, node.clone()))
            }
            Pattern::CaptureValue(capture, extractor) => Ok(extractor
                .extract(node)
                .is_some_and(|value| captures.bind_value(*capture, value))),
            Pattern::Filter(predicate) => Ok(predicate.test(node)),
            Pattern::And(parts) => {
                for part in parts {
                    if !self.matches(part, node, captures)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Pattern::Or(branches) => {
                for branch in branches {
                    let mut attempt = captures.clone();
                    if self.matches(branch, node, &mut attempt)? {
                        *captures = attempt;
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn source_matches(
        &self,
        index: usize,
        pattern: &Pattern,
        node: &PlanNode,
        captures: &mut Captures,
    ) -> OptimizerResult<bool> {
        let Some(source) = node.sources.get(index) else {
            return Ok(false);
        };
        if matches!(pattern, Pattern::Any) {
            return Ok(true);
        }
        let resolved = self.lookup.resolve(source)?;
        self.matches(pattern, &resolved, captures)
    }
}
