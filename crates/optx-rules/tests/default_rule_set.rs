//! End-to-end tests: the default rule set driven to a fixpoint.
//!
//! Each test builds a small TPC-H flavored plan, runs the iterative optimizer with
//! every built-in rule enabled and checks the shape of the final plan.

use optx_core::allocator::PlanNodeIdAllocator;
use optx_core::builder::PlanBuilder;
use optx_core::catalog::{ColumnMetadata, InMemoryCatalog};
use optx_core::cost::DefaultCostCalculator;
use optx_core::expr::*;
use optx_core::lookup::Lookup;
use optx_core::optimizer::{IterativeOptimizer, OptimizedPlan};
use optx_core::pattern::{Pattern, PlanNodeMatcher};
use optx_core::plan::{LogicalOp, PlanNodeRef};
use optx_core::printer::format_plan;
use optx_core::properties::DefaultLogicalPropertiesProvider;
use optx_core::session::{Session, DISABLED_RULES};
use optx_core::stats::{DefaultStatsCalculator, StatsEstimate, VariableStatsEstimate};
use optx_rules::default_rule_set;
use std::sync::Arc;

fn build_catalog() -> Arc<InMemoryCatalog> {
    let mut catalog = InMemoryCatalog::new();

    // orders: 15,000 rows
    let orders = TableRef::new("tpch", "orders");
    catalog.add_table(
        &orders,
        vec![
            ColumnMetadata::new("orderkey", DataType::Bigint),
            ColumnMetadata::new("custkey", DataType::Bigint),
            ColumnMetadata::new("totalprice", DataType::Double),
        ],
        StatsEstimate::new(15000.0, 360000.0)
            .with_variable("orderkey", VariableStatsEstimate::new(15000.0, 0.0))
            .with_variable("custkey", VariableStatsEstimate::new(150.0, 0.0)),
    );
    catalog.add_unique_key(&orders, &["orderkey"]);

    // customer: 150 rows
    let customer = TableRef::new("tpch", "customer");
    catalog.add_table(
        &customer,
        vec![
            ColumnMetadata::new("custkey", DataType::Bigint),
            ColumnMetadata::new("name", DataType::Varchar),
        ],
        StatsEstimate::new(150.0, 4800.0)
            .with_variable("custkey", VariableStatsEstimate::new(150.0, 0.0)),
    );
    catalog.add_unique_key(&customer, &["custkey"]);

    Arc::new(catalog)
}

fn optimize(plan: PlanNodeRef, session: &Session, ids: &PlanNodeIdAllocator) -> OptimizedPlan {
    let catalog = build_catalog();
    let optimizer = IterativeOptimizer::new(
        default_rule_set(),
        Arc::new(DefaultStatsCalculator::new(catalog.clone())),
        Arc::new(DefaultCostCalculator),
    )
    .with_logical_properties_provider(Arc::new(DefaultLogicalPropertiesProvider::new(catalog)));
    optimizer.optimize(plan, session, ids).unwrap()
}

fn assert_shape(plan: &PlanNodeRef, expected: &Pattern) {
    let lookup = Lookup::no_lookup();
    let matched = PlanNodeMatcher::new(&lookup).match_pattern(expected, plan).unwrap();
    assert!(matched.is_some(), "unexpected plan:\n{}", format_plan(plan));
}

#[test]
fn test_filter_over_cross_join_becomes_inner_join() {
    let ids = PlanNodeIdAllocator::new();
    let mut b = PlanBuilder::new(&ids);
    let o_orderkey = b.variable("o_orderkey", DataType::Bigint);
    let o_custkey = b.variable("o_custkey", DataType::Bigint);
    let o_totalprice = b.variable("o_totalprice", DataType::Double);
    let c_custkey = b.variable("c_custkey", DataType::Bigint);
    let orders = b.table_scan_columns(
        TableRef::new("tpch", "orders"),
        vec![
            (o_orderkey.clone(), "orderkey"),
            (o_custkey.clone(), "custkey"),
            (o_totalprice.clone(), "totalprice"),
        ],
    );
    let customer = b.table_scan_columns(
        TableRef::new("tpch", "customer"),
        vec![(c_custkey.clone(), "custkey")],
    );
    let join = b.join(JoinType::Cross, orders, customer, Expr::literal_true());
    let filter = b.filter(
        Expr::combine_conjuncts([
            Expr::equal(o_custkey.to_expr(), c_custkey.to_expr()),
            Expr::binary(
                BinaryOp::Gt,
                o_totalprice.to_expr(),
                Expr::Literal(ScalarValue::Int64(100)),
            ),
        ]),
        join,
    );
    let plan = b.filter(Expr::literal_true(), filter);

    let result = optimize(plan, &Session::new("q1"), &ids);
    assert_shape(
        &result.plan,
        &Pattern::join()
            .with_source_at(0, Pattern::filter().with_source(Pattern::table_scan()))
            .with_source_at(1, Pattern::table_scan()),
    );
    let LogicalOp::Join {
        join_type,
        condition,
    } = &result.plan.op
    else {
        panic!("expected a join:\n{}", format_plan(&result.plan));
    };
    assert_eq!(*join_type, JoinType::Inner);
    assert_eq!(condition.to_string(), "(o_custkey = c_custkey)");
    assert_eq!(result.rule_stats["RemoveTrivialFilters"].hits, 1);
    assert_eq!(result.rule_stats["PredicatePushdown"].hits, 1);
}

#[test]
fn test_stacked_limits_collapse() {
    let ids = PlanNodeIdAllocator::new();
    let mut b = PlanBuilder::new(&ids);
    let orderkey = b.variable("orderkey", DataType::Bigint);
    let scan = b.table_scan(TableRef::new("tpch", "orders"), vec![orderkey.clone()]);
    let inner_project = b.identity_project(&[orderkey.clone()], scan);
    let inner_limit = b.limit(10, inner_project);
    let outer_project = b.identity_project(&[orderkey], inner_limit);
    let plan = b.limit(5, outer_project);

    let result = optimize(plan, &Session::new("q2"), &ids);
    assert_shape(
        &result.plan,
        &Pattern::limit().with_source(Pattern::table_scan()),
    );
    assert_eq!(result.plan.op, LogicalOp::Limit { offset: 0, count: 5 });
}

#[test]
fn test_limit_over_false_filter_is_empty() {
    let ids = PlanNodeIdAllocator::new();
    let mut b = PlanBuilder::new(&ids);
    let orderkey = b.variable("orderkey", DataType::Bigint);
    let scan = b.table_scan(TableRef::new("tpch", "orders"), vec![orderkey]);
    let filter = b.filter(Expr::literal_false(), scan);
    let plan = b.limit(3, filter);

    let result = optimize(plan, &Session::new("q3"), &ids);
    assert!(
        matches!(&result.plan.op, LogicalOp::Values { rows, .. } if rows.is_empty()),
        "unexpected plan:\n{}",
        format_plan(&result.plan)
    );
    assert_eq!(result.plan.output_variables()[0].name, "orderkey");
}

#[test]
fn test_distinct_on_key_is_removed_and_scan_pruned() {
    let ids = PlanNodeIdAllocator::new();
    let mut b = PlanBuilder::new(&ids);
    let orderkey = b.variable("orderkey", DataType::Bigint);
    let custkey = b.variable("custkey", DataType::Bigint);
    let scan = b.table_scan(TableRef::new("tpch", "orders"), vec![orderkey.clone(), custkey]);
    let plan = b.aggregate(vec![orderkey], vec![], scan);

    let result = optimize(plan, &Session::new("q4"), &ids);
    assert_shape(&result.plan, &Pattern::table_scan());
    let names: Vec<String> = result
        .plan
        .output_variables()
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(names, vec!["orderkey"]);
}

#[test]
fn test_result_is_a_fixpoint() {
    let ids = PlanNodeIdAllocator::new();
    let mut b = PlanBuilder::new(&ids);
    let orderkey = b.variable("orderkey", DataType::Bigint);
    let scan = b.table_scan(TableRef::new("tpch", "orders"), vec![orderkey.clone()]);
    let filter = b.filter(Expr::literal_true(), scan);
    let project = b.identity_project(&[orderkey], filter);
    let plan = b.limit(7, project);

    let first = optimize(plan, &Session::new("q5"), &ids);
    assert!(first.rules_applied > 0);
    let second = optimize(first.plan.clone(), &Session::new("q5"), &ids);
    assert_eq!(second.rules_applied, 0);
    assert_eq!(second.plan, first.plan);
}

#[test]
fn test_disabled_rule_is_skipped() {
    let ids = PlanNodeIdAllocator::new();
    let mut b = PlanBuilder::new(&ids);
    let orderkey = b.variable("orderkey", DataType::Bigint);
    let scan = b.table_scan(TableRef::new("tpch", "orders"), vec![orderkey]);
    let plan = b.filter(Expr::literal_true(), scan);

    let session = Session::new("q6").with_system_property(DISABLED_RULES, "RemoveTrivialFilters");
    let result = optimize(plan, &session, &ids);
    assert_shape(&result.plan, &Pattern::filter().with_source(Pattern::table_scan()));
    assert_eq!(result.rules_applied, 0);
}
