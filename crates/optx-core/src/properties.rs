//! # Logical Properties
//!
//! Logical properties are invariants of the *rows* a plan produces, independent of
//! how it is executed. They are derived bottom-up: the properties of a node are a
//! function of its operator and the properties of its sources.
//!
//! ## What Is Tracked
//!
//! - **Keys**: sets of variables whose combined values are unique in the output.
//!   Scans get them from the catalog; aggregates create one from their grouping keys.
//! - **Max cardinality**: an upper bound on the row count, known for values, limits
//!   and global aggregates.
//! - **Equivalences**: classes of variables known to be equal (from `a = b` filters
//!   and equi-join conditions) and variables bound to a constant (`a = 5`).
//!
//! Equivalences make key checks stronger: a key `{a}` also covers a request for
//! distinctness on `{b}` when `a = b` holds, and a key variable bound to a constant
//! never needs to be requested at all.
//!
//! ## Where They Are Used
//!
//! The memo caches properties per group and recomputes them when a group or one of its
//! descendants is replaced. Rules such as redundant limit and redundant distinct
//! removal ask them whether an operator can have any effect.

use crate::catalog::Catalog;
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::{Expr, JoinType, ScalarValue, Variable};
use crate::plan::{LogicalOp, PlanNode};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Equality classes over variables plus constant bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EquivalenceClasses {
    /// Disjoint classes, each with at least two members.
    pub classes: Vec<BTreeSet<Variable>>,
    pub constants: BTreeMap<Variable, ScalarValue>,
}

impl EquivalenceClasses {
    pub fn add_equality(&mut self, a: &Variable, b: &Variable) {
        if a == b {
            return;
        }
        let mut merged: BTreeSet<Variable> = [a.clone(), b.clone()].into_iter().collect();
        self.classes.retain(|class| {
            if class.contains(a) || class.contains(b) {
                merged.extend(class.iter().cloned());
                false
            } else {
                true
            }
        });
        self.classes.push(merged);
        self.classes.sort();
    }

    pub fn add_constant(&mut self, variable: &Variable, value: ScalarValue) {
        self.constants.insert(variable.clone(), value);
    }

    /// All variables equal to `variable`, itself included.
    pub fn class_of(&self, variable: &Variable) -> BTreeSet<Variable> {
        self.classes
            .iter()
            .find(|class| class.contains(variable))
            .cloned()
            .unwrap_or_else(|| [variable.clone()].into_iter().collect())
    }

    pub fn are_equivalent(&self, a: &Variable, b: &Variable) -> bool {
        a == b || self.class_of(a).contains(b)
    }

    /// A variable is constant if any member of its class is bound to a constant.
    pub fn is_constant(&self, variable: &Variable) -> bool {
        self.class_of(variable)
            .iter()
            .any(|v| self.constants.contains_key(v))
    }

    pub fn union(&mut self, other: &EquivalenceClasses) {
        for class in &other.classes {
            let mut members = class.iter();
            if let Some(first) = members.next() {
                for member in members {
                    self.add_equality(first, member);
                }
            }
        }
        for (variable, value) in &other.constants {
            self.constants.insert(variable.clone(), value.clone());
        }
    }

    /// Drop every variable outside `outputs`. Constants of a dropped variable move to a
    /// surviving member of its class.
    pub fn restrict_to(&self, outputs: &BTreeSet<Variable>) -> EquivalenceClasses {
        let mut restricted = EquivalenceClasses::default();
        for (variable, value) in &self.constants {
            for member in self.class_of(variable) {
                if outputs.contains(&member) {
                    restricted.constants.insert(member, value.clone());
                }
            }
        }
        for class in &self.classes {
            let kept: BTreeSet<Variable> = class.intersection(outputs).cloned().collect();
            if kept.len() > 1 {
                restricted.classes.push(kept);
            }
        }
        restricted.classes.sort();
        restricted
    }
}

/// Properties derived for one plan node or memo group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalProperties {
    /// Each set is a unique key of the output.
    pub keys: Vec<BTreeSet<Variable>>,
    /// Upper bound on the number of rows.
    pub max_card: Option<u64>,
    pub equivalences: EquivalenceClasses,
}

impl LogicalProperties {
    pub fn with_key<I: IntoIterator<Item = Variable>>(mut self, key: I) -> Self {
        self.add_key(key.into_iter().collect());
        self
    }

    pub fn with_max_card(mut self, max_card: u64) -> Self {
        self.max_card = Some(max_card);
        self
    }

    /// Add a key, keeping only minimal ones.
    pub fn add_key(&mut self, key: BTreeSet<Variable>) {
        if self.keys.iter().any(|existing| existing.is_subset(&key)) {
            return;
        }
        self.keys.retain(|existing| !key.is_subset(existing));
        self.keys.push(key);
        self.keys.sort();
    }

    /// Whether the output has no two rows agreeing on all of `variables`.
    pub fn is_distinct(&self, variables: &BTreeSet<Variable>) -> bool {
        if self.is_at_most_single_row() {
            return true;
        }
        self.keys.iter().any(|key| {
            key.iter().all(|k| {
                self.equivalences.is_constant(k)
                    || variables
                        .iter()
                        .any(|v| self.equivalences.are_equivalent(k, v))
            })
        })
    }

    pub fn is_at_most(&self, rows: u64) -> bool {
        self.max_card.is_some_and(|max| max <= rows)
    }

    pub fn is_at_most_single_row(&self) -> bool {
        self.is_at_most(1)
    }

    /// Keep only what is expressible over `outputs`.
    fn restrict_to(&self, outputs: &BTreeSet<Variable>) -> LogicalProperties {
        let mut restricted = LogicalProperties {
            keys: Vec::new(),
            max_card: self.max_card,
            equivalences: self.equivalences.restrict_to(outputs),
        };
        for key in &self.keys {
            // Replace each key member by an equivalent output if it was projected away.
            let mapped: Option<BTreeSet<Variable>> = key
                .iter()
                .map(|k| {
                    if outputs.contains(k) {
                        Some(k.clone())
                    } else {
                        self.equivalences
                            .class_of(k)
                            .into_iter()
                            .find(|v| outputs.contains(v))
                    }
                })
                .collect();
            if let Some(mapped) = mapped {
                restricted.add_key(mapped);
            }
        }
        restricted
    }
}

/// Derives the properties of a node from the properties of its sources.
pub trait LogicalPropertiesProvider: Send + Sync {
    fn derive(
        &self,
        node: &PlanNode,
        sources: &[LogicalProperties],
    ) -> OptimizerResult<LogicalProperties>;
}

/// Property derivation for every built-in operator, with scan keys from the catalog.
pub struct DefaultLogicalPropertiesProvider {
    catalog: Arc<dyn Catalog>,
}

impl DefaultLogicalPropertiesProvider {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

fn source_properties<'a>(
    node: &PlanNode,
    sources: &'a [LogicalProperties],
    index: usize,
) -> OptimizerResult<&'a LogicalProperties> {
    sources.get(index).ok_or_else(|| {
        OptimizerError::invalid_plan(format!(
            "{} node {} derived without properties for source {}",
            node.kind(),
            node.id,
            index
        ))
    })
}

/// Record `a = b` and `a = constant` conjuncts of `predicate`.
fn add_predicate_equivalences(equivalences: &mut EquivalenceClasses, predicate: &Expr) {
    for conjunct in predicate.conjuncts() {
        if let Some((a, b)) = conjunct.as_variable_equality() {
            equivalences.add_equality(a, b);
        } else if let Some((variable, value)) = conjunct.as_constant_binding() {
            equivalences.add_constant(variable, value.clone());
        }
    }
}

impl LogicalPropertiesProvider for DefaultLogicalPropertiesProvider {
    fn derive(
        &self,
        node: &PlanNode,
        sources: &[LogicalProperties],
    ) -> OptimizerResult<LogicalProperties> {
        let properties = match &node.op {
            LogicalOp::TableScan { table, columns } => {
                let mut properties = LogicalProperties::default();
                for key in self.catalog.get_table_keys(table) {
                    let mapped: Option<BTreeSet<Variable>> = key
                        .iter()
                        .map(|name| {
                            columns
                                .iter()
                                .find(|c| &c.column == name)
                                .map(|c| c.variable.clone())
                        })
                        .collect();
                    if let Some(mapped) = mapped {
                        properties.add_key(mapped);
                    }
                }
                properties
            }
            LogicalOp::Values { outputs, rows } => {
                let mut properties = LogicalProperties::default().with_max_card(rows.len() as u64);
                if let [row] = rows.as_slice() {
                    for (variable, value) in outputs.iter().zip(row) {
                        if let Expr::Literal(literal) = value {
                            if *literal != ScalarValue::Null {
                                properties.equivalences.add_constant(variable, literal.clone());
                            }
                        }
                    }
                }
                properties
            }
            LogicalOp::Filter { predicate } => {
                let mut properties = source_properties(node, sources, 0)?.clone();
                if predicate.is_false() || predicate.is_null() {
                    properties.max_card = Some(0);
                }
                add_predicate_equivalences(&mut properties.equivalences, predicate);
                // A key bound entirely to constants admits a single row.
                let single_row = properties
                    .keys
                    .iter()
                    .any(|key| key.iter().all(|k| properties.equivalences.is_constant(k)));
                if single_row {
                    properties.max_card = Some(properties.max_card.map_or(1, |m| m.min(1)));
                }
                properties
            }
            LogicalOp::Project { assignments } => {
                let source = source_properties(node, sources, 0)?;
                let mut widened = source.clone();
                for a in assignments {
                    match &a.expr {
                        Expr::Variable(input) => widened.equivalences.add_equality(&a.output, input),
                        Expr::Literal(value) if *value != ScalarValue::Null => {
                            widened.equivalences.add_constant(&a.output, value.clone())
                        }
                        _ => {}
                    }
                }
                let outputs: BTreeSet<Variable> = node.output_variables().into_iter().collect();
                widened.restrict_to(&outputs)
            }
            LogicalOp::Join {
                join_type,
                condition,
            } => {
                let left = source_properties(node, sources, 0)?;
                let right = source_properties(node, sources, 1)?;
                derive_join(node, *join_type, condition, left, right)
            }
            LogicalOp::Aggregate { group_by, .. } => {
                let source = source_properties(node, sources, 0)?;
                let keys: BTreeSet<Variable> = group_by.iter().cloned().collect();
                let mut properties = source.restrict_to(&keys);
                if group_by.is_empty() {
                    properties.max_card = Some(1);
                } else {
                    properties.add_key(keys);
                }
                properties
            }
            LogicalOp::Sort { .. } => source_properties(node, sources, 0)?.clone(),
            LogicalOp::Limit { count, .. } => {
                let mut properties = source_properties(node, sources, 0)?.clone();
                properties.max_card = Some(properties.max_card.map_or(*count, |m| m.min(*count)));
                properties
            }
        };
        Ok(properties)
    }
}

fn derive_join(
    node: &PlanNode,
    join_type: JoinType,
    condition: &Expr,
    left: &LogicalProperties,
    right: &LogicalProperties,
) -> LogicalProperties {
    let left_outputs: BTreeSet<Variable> = node
        .sources
        .first()
        .map(|s| s.output_variables().into_iter().collect())
        .unwrap_or_default();

    // Equi-join pairs oriented (left, right).
    let mut left_keys = BTreeSet::new();
    let mut right_keys = BTreeSet::new();
    for conjunct in condition.conjuncts() {
        if let Some((a, b)) = conjunct.as_variable_equality() {
            match (left_outputs.contains(a), left_outputs.contains(b)) {
                (true, false) => {
                    left_keys.insert(a.clone());
                    right_keys.insert(b.clone());
                }
                (false, true) => {
                    left_keys.insert(b.clone());
                    right_keys.insert(a.clone());
                }
                _ => {}
            }
        }
    }
    // Each left row matches at most one right row, and vice versa.
    let right_unique = !right_keys.is_empty() && right.is_distinct(&right_keys);
    let left_unique = !left_keys.is_empty() && left.is_distinct(&left_keys);

    let product = match (left.max_card, right.max_card) {
        (Some(l), Some(r)) => Some(l.saturating_mul(r)),
        _ => None,
    };

    let mut properties = LogicalProperties::default();
    match join_type {
        JoinType::Semi | JoinType::Anti => {
            properties = left.clone();
        }
        JoinType::Inner | JoinType::Cross => {
            properties.equivalences = left.equivalences.clone();
            properties.equivalences.union(&right.equivalences);
            add_predicate_equivalences(&mut properties.equivalences, condition);
            for lk in &left.keys {
                for rk in &right.keys {
                    properties.add_key(lk.union(rk).cloned().collect());
                }
            }
            if right_unique {
                for key in &left.keys {
                    properties.add_key(key.clone());
                }
            }
            if left_unique {
                for key in &right.keys {
                    properties.add_key(key.clone());
                }
            }
            properties.max_card = match (right_unique, left_unique) {
                (true, _) if left.max_card.is_some() => left.max_card,
                (_, true) if right.max_card.is_some() => right.max_card,
                _ => product,
            };
        }
        JoinType::Left => {
            properties.equivalences = left.equivalences.clone();
            for lk in &left.keys {
                for rk in &right.keys {
                    properties.add_key(lk.union(rk).cloned().collect());
                }
            }
            if right_unique {
                for key in &left.keys {
                    properties.add_key(key.clone());
                }
                properties.max_card = left.max_card;
            } else {
                properties.max_card = match (left.max_card, product) {
                    (Some(l), Some(p)) => Some(l.max(p)),
                    _ => None,
                };
            }
        }
        JoinType::Right => {
            properties.equivalences = right.equivalences.clone();
            if left_unique {
                for key in &right.keys {
                    properties.add_key(key.clone());
                }
                properties.max_card = right.max_card;
            } else {
                properties.max_card = match (right.max_card, product) {
                    (Some(r), Some(p)) => Some(r.max(p)),
                    _ => None,
                };
            }
        }
        JoinType::Full => {}
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PlanNodeIdAllocator;
    use crate::builder::PlanBuilder;
    use crate::catalog::{ColumnMetadata, InMemoryCatalog};
    use crate::expr::{BinaryOp, DataType, TableRef};
    use crate::memo::Memo;
    use crate::stats::StatsEstimate;

    fn var(name: &str) -> Variable {
        Variable::new(name, DataType::Bigint)
    }

    fn set(vars: &[&Variable]) -> BTreeSet<Variable> {
        vars.iter().map(|v| (*v).clone()).collect()
    }

    fn catalog() -> Arc<InMemoryCatalog> {
        let orders = TableRef::new("tpch", "orders");
        let customer = TableRef::new("tpch", "customer");
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            &orders,
            vec![
                ColumnMetadata::new("orderkey", DataType::Bigint),
                ColumnMetadata::new("custkey", DataType::Bigint),
            ],
            StatsEstimate::new(15000.0, 240000.0),
        );
        catalog.add_unique_key(&orders, &["orderkey"]);
        catalog.add_table(
            &customer,
            vec![ColumnMetadata::new("custkey", DataType::Bigint)],
            StatsEstimate::new(1500.0, 12000.0),
        );
        catalog.add_unique_key(&customer, &["custkey"]);
        Arc::new(catalog)
    }

    #[test]
    fn test_equivalence_classes_merge() {
        let mut eq = EquivalenceClasses::default();
        eq.add_equality(&var("a"), &var("b"));
        eq.add_equality(&var("c"), &var("d"));
        eq.add_equality(&var("b"), &var("c"));
        assert_eq!(eq.classes.len(), 1);
        assert!(eq.are_equivalent(&var("a"), &var("d")));
        eq.add_constant(&var("d"), ScalarValue::Int64(1));
        assert!(eq.is_constant(&var("a")));

        let restricted = eq.restrict_to(&set(&[&var("a"), &var("b")]));
        assert_eq!(restricted.classes, vec![set(&[&var("a"), &var("b")])]);
        assert_eq!(restricted.constants.len(), 2);
    }

    #[test]
    fn test_is_distinct_uses_equivalences() {
        let mut props = LogicalProperties::default().with_key([var("a")]);
        props.equivalences.add_equality(&var("a"), &var("b"));
        assert!(props.is_distinct(&set(&[&var("b")])));
        assert!(props.is_distinct(&set(&[&var("a"), &var("c")])));
        assert!(!props.is_distinct(&set(&[&var("c")])));

        let single = LogicalProperties::default().with_max_card(1);
        assert!(single.is_distinct(&set(&[&var("z")])));
    }

    #[test]
    fn test_constant_key_members_are_implied() {
        let mut props = LogicalProperties::default().with_key([var("a"), var("b")]);
        props.equivalences.add_constant(&var("b"), ScalarValue::Int64(3));
        assert!(props.is_distinct(&set(&[&var("a")])));
    }

    #[test]
    fn test_minimal_keys() {
        let props = LogicalProperties::default()
            .with_key([var("a"), var("b")])
            .with_key([var("a")])
            .with_key([var("a"), var("c")]);
        assert_eq!(props.keys, vec![set(&[&var("a")])]);
    }

    #[test]
    fn test_derivation_through_memo() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let o_orderkey = b.variable("o_orderkey", DataType::Bigint);
        let o_custkey = b.variable("o_custkey", DataType::Bigint);
        let c_custkey = b.variable("c_custkey", DataType::Bigint);
        let orders = b.table_scan_columns(
            TableRef::new("tpch", "orders"),
            vec![(o_orderkey.clone(), "orderkey"), (o_custkey.clone(), "custkey")],
        );
        let customer = b.table_scan_columns(
            TableRef::new("tpch", "customer"),
            vec![(c_custkey.clone(), "custkey")],
        );
        let join = b.join(
            JoinType::Inner,
            orders,
            customer,
            Expr::equal(o_custkey.to_expr(), c_custkey.to_expr()),
        );
        let filtered = b.filter(
            Expr::binary(BinaryOp::Eq, o_orderkey.to_expr(), Expr::Literal(ScalarValue::Int64(10))),
            join,
        );
        let limited = b.limit(5, filtered);

        let provider: Arc<dyn LogicalPropertiesProvider> =
            Arc::new(DefaultLogicalPropertiesProvider::new(catalog()));
        let memo = Memo::new(limited.into(), Some(provider)).unwrap();
        let props = memo.logical_properties(memo.root_group()).unwrap().unwrap();

        // customer is unique on the join key, so orders' key survives the join.
        assert!(props.is_distinct(&set(&[&o_orderkey])));
        assert!(props.equivalences.are_equivalent(&o_custkey, &c_custkey));
        assert!(props.equivalences.is_constant(&o_orderkey));
        // The key is pinned to a constant, which is tighter than the limit.
        assert_eq!(props.max_card, Some(1));
    }

    #[test]
    fn test_aggregate_and_project() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let x = b.variable("x", DataType::Bigint);
        let y = b.variable("y", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "unknown"), vec![x.clone(), y.clone()]);
        let distinct = b.aggregate(vec![x.clone()], vec![], scan);
        let renamed = b.variable("x2", DataType::Bigint);
        let project = b.project(
            vec![crate::plan::Assignment {
                output: renamed.clone(),
                expr: x.to_expr(),
            }],
            distinct,
        );

        let provider: Arc<dyn LogicalPropertiesProvider> =
            Arc::new(DefaultLogicalPropertiesProvider::new(catalog()));
        let memo = Memo::new(project.into(), Some(provider)).unwrap();
        let props = memo.logical_properties(memo.root_group()).unwrap().unwrap();
        assert_eq!(props.keys, vec![set(&[&renamed])]);
    }

    #[test]
    fn test_false_filter_has_no_rows() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let x = b.variable("x", DataType::Bigint);
        let values = b.values(vec![x.clone()], vec![vec![Expr::Literal(ScalarValue::Int64(1))]; 3]);
        let filter = b.filter(Expr::literal_false(), values.clone());
        let provider = DefaultLogicalPropertiesProvider::new(catalog());

        let values_props = provider.derive(&values, &[]).unwrap();
        assert_eq!(values_props.max_card, Some(3));
        let props = provider.derive(&filter, &[values_props]).unwrap();
        assert!(props.is_at_most(0));
    }
}
