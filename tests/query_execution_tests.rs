//! Whole-pipeline tests: plans are lowered to TPL, compiled to bytecode,
//! and executed against the synthetic catalog.

use std::sync::Arc;

use tellur::planner::{
    AggregateExpr, AggregateFunc, ComparisonOp, Expression, OutputSchema, PlanNode, SortDirection,
};
use tellur::sql::catalog::{SMALL_1, TEST_1};
use tellur::sql::join_probe::JoinType;
use tellur::sql::value::GenericValue;
use tellur::sql::{Catalog, TypeId};
use tellur::ExecutableQuery;

fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::with_test_tables())
}

fn scan_small_1(parallel: bool) -> PlanNode {
    PlanNode::SeqScan {
        table_id: SMALL_1,
        predicate: None,
        column_indexes: vec![0, 1],
        output: OutputSchema::new(vec![("colA", TypeId::Integer), ("colB", TypeId::BigInt)]),
        parallel,
    }
}

fn as_i64(value: &GenericValue) -> Option<i64> {
    match value {
        GenericValue::BigInt(v) => *v,
        _ => None,
    }
}

#[test]
fn full_scan_returns_every_row() {
    let catalog = catalog();
    let plan = scan_small_1(false);
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 500);
}

#[test]
fn filtered_scan() {
    let catalog = catalog();
    // colA < 10
    let plan = PlanNode::SeqScan {
        table_id: SMALL_1,
        predicate: Some(Expression::compare(
            ComparisonOp::Lt,
            Expression::column(0),
            Expression::constant(GenericValue::Integer(Some(10))),
        )),
        column_indexes: vec![0, 1],
        output: OutputSchema::new(vec![("colA", TypeId::Integer), ("colB", TypeId::BigInt)]),
        parallel: false,
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 10);
    for row in &result.rows {
        let a = as_i64(&row[0]).expect("non-null");
        assert!(a < 10);
    }
}

#[test]
fn scan_projects_nullable_column() {
    let catalog = catalog();
    let plan = scan_small_1(false);
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    // Every 10th colB value is NULL in small_1.
    let nulls = result.rows.iter().filter(|row| row[1].is_null()).count();
    assert_eq!(nulls, 50);
}

#[test]
fn global_aggregation_counts_rows() {
    let catalog = catalog();
    let plan = PlanNode::Aggregate {
        child: Box::new(scan_small_1(false)),
        group_by: vec![],
        aggregates: vec![
            AggregateExpr::count_star(),
            AggregateExpr::new(AggregateFunc::Sum, Expression::column(0)),
        ],
        output: OutputSchema::new(vec![("count", TypeId::BigInt), ("sum", TypeId::BigInt)]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 1);
    assert_eq!(as_i64(&result.rows[0][0]), Some(500));
    // Sum of 0..500.
    assert_eq!(as_i64(&result.rows[0][1]), Some(499 * 500 / 2));
}

#[test]
fn grouped_aggregation_matches_serial_expectation() {
    let catalog = catalog();
    // Group test_1 by colB (uniform 0..=9), counting per group; the counts
    // must sum to the table's cardinality.
    let plan = PlanNode::Aggregate {
        child: Box::new(PlanNode::SeqScan {
            table_id: TEST_1,
            predicate: None,
            column_indexes: vec![1],
            output: OutputSchema::new(vec![("colB", TypeId::Integer)]),
            parallel: true,
        }),
        group_by: vec![Expression::column(0)],
        aggregates: vec![AggregateExpr::count_star()],
        output: OutputSchema::new(vec![("colB", TypeId::Integer), ("count", TypeId::BigInt)]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 10);
    let total: i64 = result
        .rows
        .iter()
        .map(|row| as_i64(&row[1]).expect("count"))
        .sum();
    assert_eq!(total, 200_000);
}

#[test]
fn parallel_and_serial_grouped_aggregation_agree() {
    let catalog = catalog();
    let make_plan = |parallel| PlanNode::Aggregate {
        child: Box::new(PlanNode::SeqScan {
            table_id: TEST_1,
            predicate: None,
            column_indexes: vec![1],
            output: OutputSchema::new(vec![("colB", TypeId::Integer)]),
            parallel,
        }),
        group_by: vec![Expression::column(0)],
        aggregates: vec![AggregateExpr::count_star()],
        output: OutputSchema::new(vec![("colB", TypeId::Integer), ("count", TypeId::BigInt)]),
    };

    let run = |parallel| {
        let query =
            ExecutableQuery::compile(&make_plan(parallel), Arc::clone(&catalog)).expect("compiles");
        let mut rows: Vec<(i64, i64)> = query
            .run()
            .expect("runs")
            .rows
            .iter()
            .map(|row| (as_i64(&row[0]).expect("key"), as_i64(&row[1]).expect("count")))
            .collect();
        rows.sort_unstable();
        rows
    };

    assert_eq!(run(false), run(true));
}

#[test]
fn order_by_with_top_k() {
    let catalog = catalog();
    let plan = PlanNode::OrderBy {
        child: Box::new(scan_small_1(false)),
        sort_keys: vec![(Expression::column(0), SortDirection::Descending)],
        limit: Some(5),
        offset: None,
        output: OutputSchema::new(vec![("colA", TypeId::Integer), ("colB", TypeId::BigInt)]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    let keys: Vec<i64> = result
        .rows
        .iter()
        .map(|row| as_i64(&row[0]).expect("key"))
        .collect();
    assert_eq!(keys, vec![499, 498, 497, 496, 495]);
}

#[test]
fn order_by_with_offset() {
    let catalog = catalog();
    let plan = PlanNode::OrderBy {
        child: Box::new(scan_small_1(false)),
        sort_keys: vec![(Expression::column(0), SortDirection::Ascending)],
        limit: Some(3),
        offset: Some(2),
        output: OutputSchema::new(vec![("colA", TypeId::Integer), ("colB", TypeId::BigInt)]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    let keys: Vec<i64> = result
        .rows
        .iter()
        .map(|row| as_i64(&row[0]).expect("key"))
        .collect();
    assert_eq!(keys, vec![2, 3, 4]);
}

#[test]
fn hash_join_self_join() {
    let catalog = catalog();
    // small_1 ⋈ small_1 on colA: one match per row.
    let plan = PlanNode::HashJoin {
        left: Box::new(scan_small_1(false)),
        right: Box::new(scan_small_1(false)),
        join_type: JoinType::Inner,
        left_keys: vec![0],
        right_keys: vec![0],
        output: OutputSchema::new(vec![
            ("l_colA", TypeId::Integer),
            ("l_colB", TypeId::BigInt),
            ("r_colA", TypeId::Integer),
            ("r_colB", TypeId::BigInt),
        ]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 500);
    for row in &result.rows {
        assert_eq!(as_i64(&row[0]), as_i64(&row[2]));
    }
}

#[test]
fn parallel_join_build_agrees_with_serial() {
    let catalog = catalog();
    let make_plan = |parallel| PlanNode::HashJoin {
        left: Box::new(scan_small_1(parallel)),
        right: Box::new(scan_small_1(false)),
        join_type: JoinType::Inner,
        left_keys: vec![0],
        right_keys: vec![0],
        output: OutputSchema::new(vec![
            ("l_colA", TypeId::Integer),
            ("l_colB", TypeId::BigInt),
            ("r_colA", TypeId::Integer),
            ("r_colB", TypeId::BigInt),
        ]),
    };
    let run = |parallel| {
        let query =
            ExecutableQuery::compile(&make_plan(parallel), Arc::clone(&catalog)).expect("compiles");
        let mut keys: Vec<i64> = query
            .run()
            .expect("runs")
            .rows
            .iter()
            .map(|row| as_i64(&row[0]).expect("key"))
            .collect();
        keys.sort_unstable();
        keys
    };
    assert_eq!(run(false), run(true));
}

#[test]
fn semi_join_deduplicates_matches() {
    let catalog = catalog();
    let plan = PlanNode::HashJoin {
        left: Box::new(scan_small_1(false)),
        right: Box::new(scan_small_1(false)),
        join_type: JoinType::Semi,
        left_keys: vec![0],
        right_keys: vec![0],
        output: OutputSchema::new(vec![("colA", TypeId::Integer), ("colB", TypeId::BigInt)]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 500);
}

#[test]
fn right_outer_join_is_rejected() {
    let catalog = catalog();
    let plan = PlanNode::HashJoin {
        left: Box::new(scan_small_1(false)),
        right: Box::new(scan_small_1(false)),
        join_type: JoinType::RightOuter,
        left_keys: vec![0],
        right_keys: vec![0],
        output: OutputSchema::new(vec![("colA", TypeId::Integer)]),
    };
    assert!(ExecutableQuery::compile(&plan, catalog).is_err());
}

#[test]
fn min_max_aggregates() {
    let catalog = catalog();
    let plan = PlanNode::Aggregate {
        child: Box::new(scan_small_1(false)),
        group_by: vec![],
        aggregates: vec![
            AggregateExpr::new(AggregateFunc::Min, Expression::column(0)),
            AggregateExpr::new(AggregateFunc::Max, Expression::column(0)),
        ],
        output: OutputSchema::new(vec![("min", TypeId::Integer), ("max", TypeId::Integer)]),
    };
    let query = ExecutableQuery::compile(&plan, Arc::clone(&catalog)).expect("compiles");
    let result = query.run().expect("runs");
    assert_eq!(result.row_count(), 1);
    assert_eq!(as_i64(&result.rows[0][0]), Some(0));
    assert_eq!(as_i64(&result.rows[0][1]), Some(499));
}

#[test]
fn generated_tpl_is_inspectable() {
    let catalog = catalog();
    let plan = scan_small_1(false);
    let query = ExecutableQuery::compile(&plan, catalog).expect("compiles");
    let source = query.tpl_source();
    assert!(source.contains("struct QueryState"));
    assert!(source.contains("@tableIterInit"));
    assert!(!query.disassembly().is_empty());
}
