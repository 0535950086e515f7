//! Physical plan nodes.
//!
//! Plans arrive from an external optimizer; the engine only consumes them.
//! Every node carries an output schema describing the tuples it produces to
//! its parent, and the operator translators compile the tree bottom-up into
//! TPL pipelines.

pub mod expressions;

pub use expressions::{
    AggregateExpr, AggregateFunc, ArithmeticOp, ComparisonOp, ConjunctionOp, Expression,
};

use crate::sql::join_probe::JoinType;
use crate::sql::TypeId;

/// One output column: a name and its SQL type.
#[derive(Debug, Clone)]
pub struct OutputColumn {
    pub name: String,
    pub type_id: TypeId,
}

/// The schema an operator produces.
#[derive(Debug, Clone, Default)]
pub struct OutputSchema {
    pub columns: Vec<OutputColumn>,
}

impl OutputSchema {
    pub fn new(columns: Vec<(&str, TypeId)>) -> Self {
        OutputSchema {
            columns: columns
                .into_iter()
                .map(|(name, type_id)| OutputColumn {
                    name: name.to_string(),
                    type_id,
                })
                .collect(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }
}

/// Sort direction for order-by keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A physical plan node.
#[derive(Debug)]
pub enum PlanNode {
    /// Sequential scan over a catalog table, with an optional pushed-down
    /// predicate over the table's columns.
    SeqScan {
        table_id: u16,
        predicate: Option<Expression>,
        /// Indexes of the table columns this scan projects, in output order.
        column_indexes: Vec<usize>,
        output: OutputSchema,
        /// Run the scan (and any in-pipeline build above it) in parallel.
        parallel: bool,
    },
    /// Per-tuple expression projection.
    Projection {
        child: Box<PlanNode>,
        expressions: Vec<Expression>,
        output: OutputSchema,
    },
    /// Hash join: build on the left child, probe with the right.
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        join_type: JoinType,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        output: OutputSchema,
    },
    /// Hash aggregation with grouping keys.
    Aggregate {
        child: Box<PlanNode>,
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
        output: OutputSchema,
    },
    /// Sort, with optional limit (Top-K) and offset.
    OrderBy {
        child: Box<PlanNode>,
        sort_keys: Vec<(Expression, SortDirection)>,
        limit: Option<u64>,
        offset: Option<u64>,
        output: OutputSchema,
    },
}

impl PlanNode {
    pub fn output(&self) -> &OutputSchema {
        match self {
            PlanNode::SeqScan { output, .. }
            | PlanNode::Projection { output, .. }
            | PlanNode::HashJoin { output, .. }
            | PlanNode::Aggregate { output, .. }
            | PlanNode::OrderBy { output, .. } => output,
        }
    }

    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::SeqScan { .. } => Vec::new(),
            PlanNode::Projection { child, .. }
            | PlanNode::Aggregate { child, .. }
            | PlanNode::OrderBy { child, .. } => vec![child],
            PlanNode::HashJoin { left, right, .. } => vec![left, right],
        }
    }
}
