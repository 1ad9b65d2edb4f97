//! # Plan Node Model
//!
//! Immutable relational operator trees. A plan is a tree of `PlanNode`s, each holding
//! an operator payload (`LogicalOp`) and an ordered list of sources.
//!
//! ## Sources and Group References
//!
//! A source is a `PlanRef`: either a concrete node or a `GroupReference` into the memo.
//! Plans handed to the optimizer contain only concrete nodes; once inserted into the
//! memo every source becomes a group reference, and rules build their results from a
//! mix of both (new nodes on top of untouched group references).
//!
//! ## Identity
//!
//! Nodes are shared through `Arc` and never mutated. Two nodes are *the same node* only
//! if they are the same allocation (`Arc::ptr_eq`); structural equality (`==`) is used
//! by tests and printers but never to detect that a rewrite happened. Node ids
//! (`PlanNodeId`) are external labels: `replace_sources` keeps the id of the original
//! node while producing a new allocation.

use crate::expr::{AggExpr, Expr, JoinType, SortKey, TableRef, Variable};
use crate::memo::GroupId;
use crate::error::{OptimizerError, OptimizerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// External id of a plan node. Unique within one plan, stable across `replace_sources`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(String);

impl PlanNodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared handle to an immutable plan node.
pub type PlanNodeRef = Arc<PlanNode>;

/// Stand-in for "whatever node currently represents group `group`".
///
/// Carries the group's output variables so that parents can compute their own schema
/// without resolving the reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupReference {
    pub group: GroupId,
    pub outputs: Vec<Variable>,
}

/// A source of a plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanRef {
    Node(PlanNodeRef),
    Group(GroupReference),
}

impl PlanRef {
    pub fn output_variables(&self) -> Vec<Variable> {
        match self {
            PlanRef::Node(node) => node.output_variables(),
            PlanRef::Group(reference) => reference.outputs.clone(),
        }
    }

    pub fn as_node(&self) -> Option<&PlanNodeRef> {
        match self {
            PlanRef::Node(node) => Some(node),
            PlanRef::Group(_) => None,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self {
            PlanRef::Node(_) => None,
            PlanRef::Group(reference) => Some(reference.group),
        }
    }

    /// Identity comparison: same allocation, or a reference to the same group.
    pub fn ptr_eq(&self, other: &PlanRef) -> bool {
        match (self, other) {
            (PlanRef::Node(a), PlanRef::Node(b)) => Arc::ptr_eq(a, b),
            (PlanRef::Group(a), PlanRef::Group(b)) => a.group == b.group,
            _ => false,
        }
    }
}

impl From<PlanNodeRef> for PlanRef {
    fn from(node: PlanNodeRef) -> Self {
        PlanRef::Node(node)
    }
}

impl From<PlanNode> for PlanRef {
    fn from(node: PlanNode) -> Self {
        PlanRef::Node(Arc::new(node))
    }
}

impl From<GroupReference> for PlanRef {
    fn from(reference: GroupReference) -> Self {
        PlanRef::Group(reference)
    }
}

/// Operator kind without payload. Used by patterns and the rule index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    TableScan,
    Values,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Limit,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One scanned column: the connector column name and the variable it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanColumn {
    pub variable: Variable,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub output: Variable,
    pub expr: Expr,
}

impl Assignment {
    pub fn identity(variable: &Variable) -> Self {
        Self {
            output: variable.clone(),
            expr: variable.to_expr(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(&self.expr, Expr::Variable(v) if *v == self.output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregation {
    pub output: Variable,
    pub call: AggExpr,
}

/// Logical relational operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    TableScan {
        table: TableRef,
        columns: Vec<ScanColumn>,
    },
    /// Inline rows. An empty `rows` list is the canonical empty relation.
    Values {
        outputs: Vec<Variable>,
        rows: Vec<Vec<Expr>>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        assignments: Vec<Assignment>,
    },
    Join {
        join_type: JoinType,
        condition: Expr,
    },
    /// Grouped aggregation. No aggregations means DISTINCT over `group_by`.
    Aggregate {
        group_by: Vec<Variable>,
        aggregates: Vec<Aggregation>,
    },
    Sort {
        order: Vec<SortKey>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
}

impl LogicalOp {
    pub fn kind(&self) -> OpKind {
        match self {
            LogicalOp::TableScan { .. } => OpKind::TableScan,
            LogicalOp::Values { .. } => OpKind::Values,
            LogicalOp::Filter { .. } => OpKind::Filter,
            LogicalOp::Project { .. } => OpKind::Project,
            LogicalOp::Join { .. } => OpKind::Join,
            LogicalOp::Aggregate { .. } => OpKind::Aggregate,
            LogicalOp::Sort { .. } => OpKind::Sort,
            LogicalOp::Limit { .. } => OpKind::Limit,
        }
    }

    /// Number of sources the operator takes.
    pub fn arity(&self) -> usize {
        match self {
            LogicalOp::TableScan { .. } | LogicalOp::Values { .. } => 0,
            LogicalOp::Join { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::TableScan { table, .. } => write!(f, "TableScan[{table}]"),
            LogicalOp::Values { rows, .. } => write!(f, "Values[{} rows]", rows.len()),
            LogicalOp::Filter { predicate } => write!(f, "Filter[{predicate}]"),
            LogicalOp::Project { assignments } => {
                f.write_str("Project[")?;
                for (i, a) in assignments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if a.is_identity() {
                        write!(f, "{}", a.output.name)?;
                    } else {
                        write!(f, "{} := {}", a.output.name, a.expr)?;
                    }
                }
                f.write_str("]")
            }
            LogicalOp::Join {
                join_type,
                condition,
            } => write!(f, "{join_type}Join[{condition}]"),
            LogicalOp::Aggregate {
                group_by,
                aggregates,
            } => {
                let keys: Vec<&str> = group_by.iter().map(|v| v.name.as_str()).collect();
                write!(f, "Aggregate[keys=[{}]", keys.join(", "))?;
                for a in aggregates {
                    let distinct = if a.call.distinct { "DISTINCT " } else { "" };
                    write!(
                        f,
                        ", {} := {:?}({distinct}{})",
                        a.output.name, a.call.func, a.call.arg
                    )?;
                }
                f.write_str("]")
            }
            LogicalOp::Sort { order } => {
                f.write_str("Sort[")?;
                for (i, key) in order.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    let dir = if key.ascending { "ASC" } else { "DESC" };
                    write!(f, "{} {dir}", key.expr)?;
                }
                f.write_str("]")
            }
            LogicalOp::Limit { offset, count } if *offset > 0 => {
                write!(f, "Limit[{count} offset {offset}]")
            }
            LogicalOp::Limit { count, .. } => write!(f, "Limit[{count}]"),
        }
    }
}

/// An immutable plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: PlanNodeId,
    pub op: LogicalOp,
    #[serde(default)]
    pub sources: Vec<PlanRef>,
}

impl PlanNode {
    pub fn new(id: PlanNodeId, op: LogicalOp, sources: Vec<PlanRef>) -> Self {
        Self { id, op, sources }
    }

    pub fn into_ref(self) -> PlanNodeRef {
        Arc::new(self)
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn source(&self, index: usize) -> Option<&PlanRef> {
        self.sources.get(index)
    }

    /// A copy of this node (same id, same payload) over different sources.
    pub fn replace_sources(&self, sources: Vec<PlanRef>) -> PlanNode {
        PlanNode {
            id: self.id.clone(),
            op: self.op.clone(),
            sources,
        }
    }

    /// Output columns in order.
    pub fn output_variables(&self) -> Vec<Variable> {
        let source_outputs = |i: usize| {
            self.sources
                .get(i)
                .map(PlanRef::output_variables)
                .unwrap_or_default()
        };
        match &self.op {
            LogicalOp::TableScan { columns, .. } => {
                columns.iter().map(|c| c.variable.clone()).collect()
            }
            LogicalOp::Values { outputs, .. } => outputs.clone(),
            LogicalOp::Filter { .. } | LogicalOp::Sort { .. } | LogicalOp::Limit { .. } => {
                source_outputs(0)
            }
            LogicalOp::Project { assignments } => {
                assignments.iter().map(|a| a.output.clone()).collect()
            }
            LogicalOp::Join { join_type, .. } => {
                let mut outputs = source_outputs(0);
                if join_type.outputs_right() {
                    outputs.extend(source_outputs(1));
                }
                outputs
            }
            LogicalOp::Aggregate {
                group_by,
                aggregates,
            } => group_by
                .iter()
                .cloned()
                .chain(aggregates.iter().map(|a| a.output.clone()))
                .collect(),
        }
    }

    pub fn output_set(&self) -> HashSet<Variable> {
        self.output_variables().into_iter().collect()
    }

    /// Check arity and that every referenced variable is produced by a source.
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.sources.len() != self.op.arity() {
            return Err(OptimizerError::invalid_plan(format!(
                "{} node {} expects {} sources, got {}",
                self.kind(),
                self.id,
                self.op.arity(),
                self.sources.len()
            )));
        }
        let available: HashSet<Variable> = self
            .sources
            .iter()
            .flat_map(PlanRef::output_variables)
            .collect();
        let mut referenced: Vec<&Variable> = Vec::new();
        match &self.op {
            LogicalOp::TableScan { .. } => {}
            LogicalOp::Values { outputs, rows } => {
                if let Some(row) = rows.iter().find(|r| r.len() != outputs.len()) {
                    return Err(OptimizerError::invalid_plan(format!(
                        "Values node {} has a row of width {} for {} outputs",
                        self.id,
                        row.len(),
                        outputs.len()
                    )));
                }
            }
            LogicalOp::Filter { predicate } => referenced.extend(predicate.variables()),
            LogicalOp::Project { assignments } => {
                for a in assignments {
                    referenced.extend(a.expr.variables());
                }
            }
            LogicalOp::Join { condition, .. } => referenced.extend(condition.variables()),
            LogicalOp::Aggregate {
                group_by,
                aggregates,
            } => {
                referenced.extend(group_by.iter());
                for a in aggregates {
                    referenced.extend(a.call.arg.variables());
                }
            }
            LogicalOp::Sort { order } => {
                for key in order {
                    referenced.extend(key.expr.variables());
                }
            }
            LogicalOp::Limit { .. } => {}
        }
        if let Some(missing) = referenced.into_iter().find(|v| !available.contains(*v)) {
            return Err(OptimizerError::invalid_plan(format!(
                "{} node {} references {} which no source produces",
                self.kind(),
                self.id,
                missing
            )));
        }
        Ok(())
    }

    /// Every variable mentioned anywhere in the subtree rooted here. Group references
    /// contribute their outputs.
    pub fn all_variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        collect_all_variables(self, &mut out);
        out
    }
}

fn collect_all_variables(node: &PlanNode, out: &mut Vec<Variable>) {
    out.extend(node.output_variables());
    match &node.op {
        LogicalOp::Filter { predicate } => out.extend(predicate.variables().into_iter().cloned()),
        LogicalOp::Project { assignments } => {
            for a in assignments {
                out.extend(a.expr.variables().into_iter().cloned());
            }
        }
        LogicalOp::Join { condition, .. } => {
            out.extend(condition.variables().into_iter().cloned())
        }
        _ => {}
    }
    for source in &node.sources {
        match source {
            PlanRef::Node(child) => collect_all_variables(child, out),
            PlanRef::Group(reference) => out.extend(reference.outputs.iter().cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DataType;

    fn scan(id: &str, names: &[&str]) -> PlanNodeRef {
        PlanNode::new(
            PlanNodeId::new(id),
            LogicalOp::TableScan {
                table: TableRef::new("tpch", "t"),
                columns: names
                    .iter()
                    .map(|n| ScanColumn {
                        variable: Variable::new(*n, DataType::Bigint),
                        column: n.to_string(),
                    })
                    .collect(),
            },
            vec![],
        )
        .into_ref()
    }

    #[test]
    fn test_semi_join_outputs_left_only() {
        let a = Variable::new("a", DataType::Bigint);
        let c = Variable::new("c", DataType::Bigint);
        let join = PlanNode::new(
            PlanNodeId::new("3"),
            LogicalOp::Join {
                join_type: JoinType::Semi,
                condition: Expr::equal(a.to_expr(), c.to_expr()),
            },
            vec![scan("1", &["a", "b"]).into(), scan("2", &["c"]).into()],
        );
        let names: Vec<_> = join
            .output_variables()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        join.validate().unwrap();
    }

    #[test]
    fn test_replace_sources_keeps_id() {
        let filter = PlanNode::new(
            PlanNodeId::new("2"),
            LogicalOp::Filter {
                predicate: Expr::literal_true(),
            },
            vec![scan("1", &["a"]).into()],
        );
        let replaced = filter.replace_sources(vec![scan("9", &["a"]).into()]);
        assert_eq!(replaced.id, filter.id);
        assert_ne!(replaced, filter);
    }

    #[test]
    fn test_validate_rejects_unknown_variable() {
        let filter = PlanNode::new(
            PlanNodeId::new("2"),
            LogicalOp::Filter {
                predicate: Expr::equal(
                    Variable::new("zzz", DataType::Bigint).to_expr(),
                    Variable::new("a", DataType::Bigint).to_expr(),
                ),
            },
            vec![scan("1", &["a"]).into()],
        );
        assert!(matches!(
            filter.validate(),
            Err(OptimizerError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_ptr_eq_is_identity() {
        let a = scan("1", &["a"]);
        let b = scan("1", &["a"]);
        assert_eq!(a, b);
        assert!(PlanRef::Node(a.clone()).ptr_eq(&PlanRef::Node(a.clone())));
        assert!(!PlanRef::Node(a).ptr_eq(&PlanRef::Node(b)));
    }
}
