//! Fluent construction of plan trees.
//!
//! Used by tests, by the rule test harness and by rules that build replacement
//! nodes. Sources may be concrete nodes or group references, so a rule can stack new
//! operators on top of untouched memo groups.

use crate::allocator::PlanNodeIdAllocator;
use crate::expr::{AggExpr, DataType, Expr, JoinType, SortKey, TableRef, Variable};
use crate::plan::{
    Aggregation, Assignment, LogicalOp, PlanNode, PlanNodeId, PlanNodeRef, PlanRef, ScanColumn,
};
use std::collections::BTreeMap;

pub struct PlanBuilder<'a> {
    id_allocator: &'a PlanNodeIdAllocator,
    variables: BTreeMap<String, Variable>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(id_allocator: &'a PlanNodeIdAllocator) -> Self {
        Self {
            id_allocator,
            variables: BTreeMap::new(),
        }
    }

    /// Declare a variable. Declaring the same name twice returns the first declaration.
    pub fn variable(&mut self, name: &str, data_type: DataType) -> Variable {
        self.variables
            .entry(name.to_string())
            .or_insert_with(|| Variable::new(name, data_type))
            .clone()
    }

    /// Every variable declared so far, by name.
    pub fn variables(&self) -> &BTreeMap<String, Variable> {
        &self.variables
    }

    fn node(&self, op: LogicalOp, sources: Vec<PlanRef>) -> PlanNodeRef {
        PlanNode::new(self.id_allocator.get_next_id(), op, sources).into_ref()
    }

    fn same_name_columns(outputs: Vec<Variable>) -> Vec<ScanColumn> {
        outputs
            .into_iter()
            .map(|variable| ScanColumn {
                column: variable.name.clone(),
                variable,
            })
            .collect()
    }

    /// Scan where every variable reads the column of the same name.
    pub fn table_scan(&self, table: TableRef, outputs: Vec<Variable>) -> PlanNodeRef {
        let columns = Self::same_name_columns(outputs);
        self.node(LogicalOp::TableScan { table, columns }, vec![])
    }

    pub fn table_scan_columns(
        &self,
        table: TableRef,
        columns: Vec<(Variable, &str)>,
    ) -> PlanNodeRef {
        let columns = columns
            .into_iter()
            .map(|(variable, column)| ScanColumn {
                variable,
                column: column.to_string(),
            })
            .collect();
        self.node(LogicalOp::TableScan { table, columns }, vec![])
    }

    /// Scan with a caller-chosen id, for stats overrides keyed by node id.
    pub fn table_scan_with_id(
        &self,
        id: impl Into<String>,
        table: TableRef,
        outputs: Vec<Variable>,
    ) -> PlanNodeRef {
        let columns = Self::same_name_columns(outputs);
        PlanNode::new(PlanNodeId::new(id), LogicalOp::TableScan { table, columns }, vec![]).into_ref()
    }

    pub fn values(&self, outputs: Vec<Variable>, rows: Vec<Vec<Expr>>) -> PlanNodeRef {
        self.node(LogicalOp::Values { outputs, rows }, vec![])
    }

    pub fn values_with_id(
        &self,
        id: impl Into<String>,
        outputs: Vec<Variable>,
        rows: Vec<Vec<Expr>>,
    ) -> PlanNodeRef {
        PlanNode::new(PlanNodeId::new(id), LogicalOp::Values { outputs, rows }, vec![]).into_ref()
    }

    /// The empty relation over `outputs`.
    pub fn empty_values(&self, outputs: Vec<Variable>) -> PlanNodeRef {
        self.values(outputs, vec![])
    }

    pub fn filter(&self, predicate: Expr, source: impl Into<PlanRef>) -> PlanNodeRef {
        self.node(LogicalOp::Filter { predicate }, vec![source.into()])
    }

    pub fn project(&self, assignments: Vec<Assignment>, source: impl Into<PlanRef>) -> PlanNodeRef {
        self.node(LogicalOp::Project { assignments }, vec![source.into()])
    }

    /// Project that passes `outputs` through unchanged.
    pub fn identity_project(&self, outputs: &[Variable], source: impl Into<PlanRef>) -> PlanNodeRef {
        let assignments = outputs.iter().map(Assignment::identity).collect();
        self.project(assignments, source)
    }

    pub fn join(
        &self,
        join_type: JoinType,
        left: impl Into<PlanRef>,
        right: impl Into<PlanRef>,
        condition: Expr,
    ) -> PlanNodeRef {
        self.node(
            LogicalOp::Join {
                join_type,
                condition,
            },
            vec![left.into(), right.into()],
        )
    }

    pub fn aggregate(
        &self,
        group_by: Vec<Variable>,
        aggregates: Vec<(Variable, AggExpr)>,
        source: impl Into<PlanRef>,
    ) -> PlanNodeRef {
        let aggregates = aggregates
            .into_iter()
            .map(|(output, call)| Aggregation { output, call })
            .collect();
        self.node(
            LogicalOp::Aggregate {
                group_by,
                aggregates,
            },
            vec![source.into()],
        )
    }

    /// DISTINCT over every output of `source`.
    pub fn distinct(&self, source: impl Into<PlanRef>) -> PlanNodeRef {
        let source = source.into();
        let group_by = source.output_variables();
        self.aggregate(group_by, vec![], source)
    }

    pub fn sort(&self, order: Vec<SortKey>, source: impl Into<PlanRef>) -> PlanNodeRef {
        self.node(LogicalOp::Sort { order }, vec![source.into()])
    }

    pub fn limit(&self, count: u64, source: impl Into<PlanRef>) -> PlanNodeRef {
        self.offset_limit(0, count, source)
    }

    pub fn offset_limit(&self, offset: u64, count: u64, source: impl Into<PlanRef>) -> PlanNodeRef {
        self.node(LogicalOp::Limit { offset, count }, vec![source.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a]);
        let limit = b.limit(5, scan.clone());
        assert_eq!(scan.id.as_str(), "0");
        assert_eq!(limit.id.as_str(), "1");
    }

    #[test]
    fn test_variable_is_declared_once() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let first = b.variable("a", DataType::Bigint);
        let second = b.variable("a", DataType::Varchar);
        assert_eq!(first, second);
        assert_eq!(b.variables().len(), 1);
    }

    #[test]
    fn test_distinct_groups_by_all_outputs() {
        let ids = PlanNodeIdAllocator::new();
        let mut b = PlanBuilder::new(&ids);
        let a = b.variable("a", DataType::Bigint);
        let c = b.variable("c", DataType::Bigint);
        let scan = b.table_scan(TableRef::new("tpch", "t"), vec![a.clone(), c.clone()]);
        let distinct = b.distinct(scan);
        assert_eq!(distinct.output_variables(), vec![a, c]);
        distinct.validate().unwrap();
    }
}
