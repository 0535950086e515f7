//! Operator translators: compile a physical plan into a TPL module.
//!
//! Translation walks the plan bottom-up in pipelines. Within a pipeline,
//! producers emit their scan loops and push tuples to consumers as plain TPL
//! locals holding SQL values; pipeline breakers (join build, aggregation
//! build, sort build) materialize into runtime state held in the generated
//! `QueryState` struct and register a fresh pipeline for their output side.
//!
//! Pipelines whose source scan is marked parallel place their operator state
//! in the thread-state container, run workers through `@tableIterParallel`,
//! and merge at pipeline-finish with `@joinHTBuildParallel`,
//! `@aggHTMovePartitions`, or `@sorterSortParallel`.

use thiserror::Error;

use super::source::{BodyBuilder, SourceBuilder};
use crate::planner::{
    AggregateExpr, AggregateFunc, ArithmeticOp, ComparisonOp, ConjunctionOp, Expression,
    OutputSchema, PlanNode, SortDirection,
};
use crate::sql::join_probe::JoinType;
use crate::sql::value::GenericValue;
use crate::sql::{Catalog, TypeId};
use crate::util::align_to;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslateError {
    #[error("unknown table id {0}")]
    UnknownTable(u16),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("unsupported plan construct: {0}")]
    Unsupported(String),
}

/// The TPL SQL value type backing a column of the given physical type, with
/// its Rust-side layout.
pub fn sql_value_type(type_id: TypeId) -> (&'static str, usize, usize) {
    use crate::sql::value as v;
    match type_id {
        TypeId::Boolean => (
            "Boolean",
            std::mem::size_of::<v::BoolVal>(),
            std::mem::align_of::<v::BoolVal>(),
        ),
        TypeId::TinyInt | TypeId::SmallInt | TypeId::Integer | TypeId::BigInt => (
            "Integer",
            std::mem::size_of::<v::Integer>(),
            std::mem::align_of::<v::Integer>(),
        ),
        TypeId::Float | TypeId::Double => (
            "Real",
            std::mem::size_of::<v::Real>(),
            std::mem::align_of::<v::Real>(),
        ),
        TypeId::Date => (
            "Date",
            std::mem::size_of::<v::DateVal>(),
            std::mem::align_of::<v::DateVal>(),
        ),
        TypeId::Timestamp => (
            "Timestamp",
            std::mem::size_of::<v::TimestampVal>(),
            std::mem::align_of::<v::TimestampVal>(),
        ),
        _ => (
            "StringVal",
            std::mem::size_of::<v::StringVal>(),
            std::mem::align_of::<v::StringVal>(),
        ),
    }
}

/// Host-side mirror of an emitted struct of SQL values. The layout algorithm
/// matches the type system's struct layout, so offsets agree with what
/// generated code computes via `@offsetOf`.
#[derive(Debug, Clone)]
pub struct RowLayout {
    pub types: Vec<TypeId>,
    pub offsets: Vec<usize>,
    pub size: usize,
}

impl RowLayout {
    pub fn for_schema(schema: &OutputSchema) -> Self {
        let mut offsets = Vec::with_capacity(schema.columns.len());
        let mut offset = 0usize;
        let mut max_align = 1usize;
        let mut types = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let (_, size, align) = sql_value_type(column.type_id);
            offset = align_to(offset, align);
            offsets.push(offset);
            offset += size;
            max_align = max_align.max(align);
            types.push(column.type_id);
        }
        RowLayout {
            types,
            offsets,
            size: align_to(offset, max_align).max(1),
        }
    }

    /// Decode one output row into owned values.
    pub fn decode(&self, row: &[u8]) -> Vec<GenericValue> {
        use crate::sql::value as v;
        self.types
            .iter()
            .zip(&self.offsets)
            .map(|(&type_id, &offset)| unsafe {
                let ptr = row.as_ptr().add(offset);
                match type_id {
                    TypeId::Boolean => {
                        let value = ptr.cast::<v::BoolVal>().read_unaligned();
                        if value.is_null {
                            GenericValue::Boolean(None)
                        } else {
                            GenericValue::Boolean(Some(value.value))
                        }
                    }
                    TypeId::TinyInt | TypeId::SmallInt | TypeId::Integer | TypeId::BigInt => {
                        let value = ptr.cast::<v::Integer>().read_unaligned();
                        if value.is_null {
                            GenericValue::BigInt(None)
                        } else {
                            GenericValue::BigInt(Some(value.value))
                        }
                    }
                    TypeId::Float | TypeId::Double => {
                        let value = ptr.cast::<v::Real>().read_unaligned();
                        if value.is_null {
                            GenericValue::Double(None)
                        } else {
                            GenericValue::Double(Some(value.value))
                        }
                    }
                    TypeId::Date => {
                        let value = ptr.cast::<v::DateVal>().read_unaligned();
                        if value.is_null {
                            GenericValue::Date(None)
                        } else {
                            GenericValue::Date(Some(value.value))
                        }
                    }
                    TypeId::Timestamp => {
                        let value = ptr.cast::<v::TimestampVal>().read_unaligned();
                        if value.is_null {
                            GenericValue::Timestamp(None)
                        } else {
                            GenericValue::Timestamp(Some(value.value))
                        }
                    }
                    _ => {
                        let value = ptr.cast::<v::StringVal>().read_unaligned();
                        if value.is_null {
                            GenericValue::Varchar(None)
                        } else {
                            GenericValue::Varchar(Some(value.value.as_str_lossy().into_owned()))
                        }
                    }
                }
            })
            .collect()
    }
}

/// Everything the executable query needs from translation.
#[derive(Debug)]
pub struct TranslatedQuery {
    pub source: String,
    /// Size of the generated `QueryState` struct.
    pub state_size: usize,
    pub output_layout: RowLayout,
    /// Pipeline function names, in run order.
    pub pipelines: Vec<String>,
}

/// How a scan loop addresses its table iterator.
#[derive(Clone, Copy, PartialEq)]
enum ScanEnv {
    /// The pipeline function owns and drives the iterator.
    Serial,
    /// The iterator arrives as the worker's `tvi` parameter.
    Worker,
}

type Consume<'x, 'a> = &'x mut dyn FnMut(
    &mut Translator<'a>,
    &mut BodyBuilder,
    usize,
    &[String],
) -> Result<(), TranslateError>;

pub struct Translator<'a> {
    catalog: &'a Catalog,
    structs: SourceBuilder,
    functions: SourceBuilder,
    pipelines: Vec<String>,
    init_lines: Vec<String>,
    teardown_lines: Vec<String>,
    /// QueryState fields after `execCtx`: `(name, tpl_type, size, align)`.
    state_fields: Vec<(String, String, usize, usize)>,
    next_id: usize,
}

impl<'a> Translator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Translator {
            catalog,
            structs: SourceBuilder::new(),
            functions: SourceBuilder::new(),
            pipelines: Vec::new(),
            init_lines: Vec::new(),
            teardown_lines: Vec::new(),
            state_fields: Vec::new(),
            next_id: 0,
        }
    }

    fn fresh(&mut self, prefix: &str) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("{prefix}{id}")
    }

    /// Translate `plan` into a complete TPL module.
    pub fn translate(mut self, plan: &PlanNode) -> Result<TranslatedQuery, TranslateError> {
        let output_schema = plan.output().clone();
        self.emit_struct(
            "OutputRow",
            &output_schema
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("c{i}"), sql_value_type(c.type_id).0.to_string()))
                .collect::<Vec<_>>(),
        );

        // The root pipeline drives the plan into the output buffer.
        let mut body = BodyBuilder::new();
        self.produce(plan, &mut body, 1, ScanEnv::Serial, &mut |t, body, ind, bindings| {
            t.emit_output_row(body, ind, bindings)
        })?;
        body.line(1, "@resultBufferFinalize(qs.execCtx)");
        let root = self.fresh("pipeline");
        self.emit_pipeline_fn(&root, &body);
        self.pipelines.push(root);

        // Assemble the final module.
        let mut src = SourceBuilder::new();
        let mut state_struct = vec![(
            "execCtx".to_string(),
            "*ExecutionContext".to_string(),
        )];
        for (name, ty, _, _) in &self.state_fields {
            state_struct.push((name.clone(), ty.clone()));
        }
        src.line(0, "struct QueryState {");
        for (name, ty) in &state_struct {
            src.line(1, format!("{name}: {ty}"));
        }
        src.line(0, "}");
        src.blank();
        let structs = std::mem::take(&mut self.structs).finish();
        if !structs.is_empty() {
            src.extend(0, &structs.lines().map(String::from).collect::<Vec<_>>());
            src.blank();
        }

        src.line(0, "fun initQuery(qs: *QueryState, execCtx: *ExecutionContext) -> nil {");
        src.line(1, "qs.execCtx = execCtx");
        src.extend(1, &self.init_lines.clone());
        src.line(0, "}");
        src.blank();

        let functions = std::mem::take(&mut self.functions).finish();
        if !functions.is_empty() {
            src.extend(0, &functions.lines().map(String::from).collect::<Vec<_>>());
        }

        src.line(0, "fun teardownQuery(qs: *QueryState) -> nil {");
        src.extend(1, &self.teardown_lines.clone());
        src.line(0, "}");

        // Host-side QueryState layout: pointer field then operator states.
        let mut state_size = std::mem::size_of::<usize>();
        let mut state_align = std::mem::align_of::<usize>();
        for (_, _, size, align) in &self.state_fields {
            state_size = align_to(state_size, *align) + size;
            state_align = state_align.max(*align);
        }
        let state_size = align_to(state_size, state_align);

        Ok(TranslatedQuery {
            source: src.finish(),
            state_size,
            output_layout: RowLayout::for_schema(&output_schema),
            pipelines: self.pipelines,
        })
    }

    // ---------------------------------------------------------------
    // Emission helpers
    // ---------------------------------------------------------------

    fn emit_struct(&mut self, name: &str, fields: &[(String, String)]) {
        self.structs.line(0, format!("struct {name} {{"));
        for (field, ty) in fields {
            self.structs.line(1, format!("{field}: {ty}"));
        }
        self.structs.line(0, "}");
        self.structs.blank();
    }

    fn emit_pipeline_fn(&mut self, name: &str, body: &BodyBuilder) {
        self.functions
            .line(0, format!("fun {name}(qs: *QueryState) -> nil {{"));
        self.functions.extend(0, &body.lines);
        self.functions.line(0, "}");
        self.functions.blank();
    }

    fn emit_output_row(
        &mut self,
        body: &mut BodyBuilder,
        indent: usize,
        bindings: &[String],
    ) -> Result<(), TranslateError> {
        let out = self.fresh("out");
        body.line(
            indent,
            format!("var {out} = @ptrCast(*OutputRow, @resultBufferAllocRow(qs.execCtx))"),
        );
        for (i, binding) in bindings.iter().enumerate() {
            body.line(indent, format!("{out}.c{i} = {binding}"));
        }
        Ok(())
    }

    /// Render a plan expression as a TPL expression over `bindings`.
    fn emit_expr(
        &mut self,
        expr: &Expression,
        bindings: &[String],
    ) -> Result<String, TranslateError> {
        match expr {
            Expression::ColumnValue { index } => bindings
                .get(*index)
                .cloned()
                .ok_or_else(|| TranslateError::Unsupported(format!("column {index} out of range"))),
            Expression::Constant(value) => Self::emit_constant(value),
            Expression::Arithmetic { op, left, right } => {
                let l = self.emit_expr(left, bindings)?;
                let r = self.emit_expr(right, bindings)?;
                let op = match op {
                    ArithmeticOp::Add => "+",
                    ArithmeticOp::Sub => "-",
                    ArithmeticOp::Mul => "*",
                    ArithmeticOp::Div => "/",
                    ArithmeticOp::Rem => "%",
                };
                Ok(format!("({l} {op} {r})"))
            }
            Expression::Comparison { op, left, right } => {
                let l = self.emit_expr(left, bindings)?;
                let r = self.emit_expr(right, bindings)?;
                let op = match op {
                    ComparisonOp::Eq => "==",
                    ComparisonOp::Ne => "!=",
                    ComparisonOp::Lt => "<",
                    ComparisonOp::Le => "<=",
                    ComparisonOp::Gt => ">",
                    ComparisonOp::Ge => ">=",
                };
                Ok(format!("({l} {op} {r})"))
            }
            Expression::Conjunction { op, left, right } => {
                let l = self.emit_expr(left, bindings)?;
                let r = self.emit_expr(right, bindings)?;
                let op = match op {
                    ConjunctionOp::And => "and",
                    ConjunctionOp::Or => "or",
                };
                Ok(format!("({l} {op} {r})"))
            }
            Expression::NullCheck { is_null, input } => {
                let inner = self.emit_expr(input, bindings)?;
                if *is_null {
                    Ok(format!("@isValNull({inner})"))
                } else {
                    Ok(format!("@isValNotNull({inner})"))
                }
            }
            Expression::Like {
                negated,
                input,
                pattern,
            } => {
                let i = self.emit_expr(input, bindings)?;
                let p = self.emit_expr(pattern, bindings)?;
                if *negated {
                    Ok(format!("!@sqlToBool(@like({i}, {p}))"))
                } else {
                    Ok(format!("@like({i}, {p})"))
                }
            }
        }
    }

    fn emit_constant(value: &GenericValue) -> Result<String, TranslateError> {
        if value.is_null() {
            return Err(TranslateError::NotImplemented(
                "NULL constants in plan expressions".to_string(),
            ));
        }
        Ok(match value {
            GenericValue::Boolean(Some(v)) => format!("@boolToSql({v})"),
            GenericValue::TinyInt(Some(v)) => format!("@intToSql({v})"),
            GenericValue::SmallInt(Some(v)) => format!("@intToSql({v})"),
            GenericValue::Integer(Some(v)) => format!("@intToSql({v})"),
            GenericValue::BigInt(Some(v)) => format!("@intToSql({v})"),
            GenericValue::Float(Some(v)) => format!("@floatToSql({v:?})"),
            GenericValue::Double(Some(v)) => format!("@floatToSql({v:?})"),
            GenericValue::Date(Some(v)) => {
                format!("@dateToSql({}, {}, {})", v.year(), v.month(), v.day())
            }
            GenericValue::Varchar(Some(v)) => format!("@stringToSql(\"{v}\")"),
            other => {
                return Err(TranslateError::Unsupported(format!(
                    "constant {other:?} in plan expression"
                )))
            }
        })
    }

    // ---------------------------------------------------------------
    // Producers
    // ---------------------------------------------------------------

    /// The SQL type an expression produces over `schema`.
    fn expr_type(expr: &Expression, schema: &OutputSchema) -> TypeId {
        match expr {
            Expression::ColumnValue { index } => schema
                .columns
                .get(*index)
                .map_or(TypeId::Integer, |c| c.type_id),
            Expression::Constant(value) => value.type_id(),
            Expression::Arithmetic { left, .. } => Self::expr_type(left, schema),
            Expression::Comparison { .. }
            | Expression::Conjunction { .. }
            | Expression::NullCheck { .. }
            | Expression::Like { .. } => TypeId::Boolean,
        }
    }

    /// True when the pipeline rooted at `node` is sourced by a parallel scan.
    fn source_scan_is_parallel(node: &PlanNode) -> bool {
        match node {
            PlanNode::SeqScan { parallel, .. } => *parallel,
            PlanNode::Projection { child, .. } => Self::source_scan_is_parallel(child),
            // The probe side stays in-pipeline.
            PlanNode::HashJoin { right, .. } => Self::source_scan_is_parallel(right),
            // Breakers start their own pipelines.
            PlanNode::Aggregate { .. } | PlanNode::OrderBy { .. } => false,
        }
    }

    fn produce(
        &mut self,
        node: &PlanNode,
        body: &mut BodyBuilder,
        indent: usize,
        env: ScanEnv,
        consume: Consume<'_, 'a>,
    ) -> Result<(), TranslateError> {
        match node {
            PlanNode::SeqScan {
                table_id,
                predicate,
                column_indexes,
                output,
                ..
            } => self.produce_scan(
                *table_id,
                predicate.as_ref(),
                column_indexes,
                output,
                body,
                indent,
                env,
                consume,
            ),
            PlanNode::Projection {
                child, expressions, ..
            } => self.produce(child, body, indent, env, &mut |t, body, ind, bindings| {
                let mut mapped = Vec::with_capacity(expressions.len());
                for expr in expressions {
                    let rendered = t.emit_expr(expr, bindings)?;
                    let local = t.fresh("proj");
                    body.line(ind, format!("var {local} = {rendered}"));
                    mapped.push(local);
                }
                consume(t, body, ind, &mapped)
            }),
            PlanNode::HashJoin {
                left,
                right,
                join_type,
                left_keys,
                right_keys,
                ..
            } => self.produce_hash_join(
                left, right, *join_type, left_keys, right_keys, body, indent, env, consume,
            ),
            PlanNode::Aggregate {
                child,
                group_by,
                aggregates,
                ..
            } => self.produce_aggregate(child, group_by, aggregates, body, indent, consume),
            PlanNode::OrderBy {
                child,
                sort_keys,
                limit,
                offset,
                ..
            } => self.produce_order_by(child, sort_keys, *limit, *offset, body, indent, consume),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn produce_scan(
        &mut self,
        table_id: u16,
        predicate: Option<&Expression>,
        column_indexes: &[usize],
        _output: &OutputSchema,
        body: &mut BodyBuilder,
        indent: usize,
        env: ScanEnv,
        consume: Consume<'_, 'a>,
    ) -> Result<(), TranslateError> {
        let table = self
            .catalog
            .lookup_table_by_id(table_id)
            .ok_or(TranslateError::UnknownTable(table_id))?;

        let (tvi, mut ind) = match env {
            ScanEnv::Serial => {
                let tvi = self.fresh("tvi");
                body.line(indent, format!("var {tvi}: TableVectorIterator"));
                body.line(
                    indent,
                    format!("@tableIterInit(&{tvi}, qs.execCtx, {table_id})"),
                );
                (format!("&{tvi}"), indent)
            }
            ScanEnv::Worker => ("tvi".to_string(), indent),
        };

        body.line(ind, format!("for @tableIterAdvance({tvi}) {{"));
        ind += 1;
        let vpi = self.fresh("vpi");
        body.line(ind, format!("var {vpi} = @tableIterGetVPI({tvi})"));
        body.line(
            ind,
            format!("for ; @vpiHasNext({vpi}); @vpiAdvance({vpi}) {{"),
        );
        ind += 1;

        // Extract projected columns as SQL values.
        let mut bindings = Vec::with_capacity(column_indexes.len());
        for (out_idx, &col) in column_indexes.iter().enumerate() {
            let info = table.schema().column(col);
            let getter = match (info.type_id, info.nullable) {
                (TypeId::Boolean, _) => "vpiGetBool",
                (TypeId::TinyInt, _) => "vpiGetTinyInt",
                (TypeId::SmallInt, _) => "vpiGetSmallInt",
                (TypeId::Integer, false) => "vpiGetInt",
                (TypeId::Integer, true) => "vpiGetIntNull",
                (TypeId::BigInt, false) => "vpiGetBigInt",
                (TypeId::BigInt, true) => "vpiGetBigIntNull",
                (TypeId::Float, false) => "vpiGetReal",
                (TypeId::Float, true) => "vpiGetRealNull",
                (TypeId::Double, false) => "vpiGetDouble",
                (TypeId::Double, true) => "vpiGetDoubleNull",
                (TypeId::Date, false) => "vpiGetDate",
                (TypeId::Date, true) => "vpiGetDateNull",
                (TypeId::Varchar, false) => "vpiGetString",
                (TypeId::Varchar, true) => "vpiGetStringNull",
                (other, _) => {
                    return Err(TranslateError::Unsupported(format!(
                        "scan over {other} column"
                    )))
                }
            };
            let local = format!("col{}_{out_idx}", self.next_id);
            body.line(ind, format!("var {local} = @{getter}({vpi}, {col})"));
            bindings.push(local);
        }
        self.next_id += 1;

        match predicate {
            Some(predicate) => {
                let cond = self.emit_expr(predicate, &bindings)?;
                body.line(ind, format!("if {cond} {{"));
                consume(self, body, ind + 1, &bindings)?;
                body.line(ind, "}");
            }
            None => consume(self, body, ind, &bindings)?,
        }

        ind -= 1;
        body.line(ind, "}");
        body.line(ind, format!("@vpiReset({vpi})"));
        ind -= 1;
        body.line(ind, "}");
        if env == ScanEnv::Serial {
            body.line(ind, format!("@tableIterClose({tvi})"));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn produce_hash_join(
        &mut self,
        left: &PlanNode,
        right: &PlanNode,
        join_type: JoinType,
        left_keys: &[usize],
        right_keys: &[usize],
        body: &mut BodyBuilder,
        indent: usize,
        env: ScanEnv,
        consume: Consume<'_, 'a>,
    ) -> Result<(), TranslateError> {
        if join_type == JoinType::RightOuter {
            return Err(TranslateError::NotImplemented(
                "right outer hash join".to_string(),
            ));
        }

        let (state, row_struct, left_cols) = self.translate_join_build(left, left_keys)?;

        self.produce(right, body, indent, env, &mut |t, body, ind, right_bindings| {
            let hash = t.fresh("hash");
            let keys = right_keys
                .iter()
                .map(|&k| right_bindings[k].clone())
                .collect::<Vec<_>>()
                .join(", ");
            body.line(ind, format!("var {hash} = @hash({keys})"));
            let iter = t.fresh("htIter");
            body.line(ind, format!("var {iter}: HashTableEntryIterator"));
            body.line(ind, format!("@joinHTLookup(&{state}, &{iter}, {hash})"));

            let row = t.fresh("buildRow");
            let key_check = left_keys
                .iter()
                .zip(right_keys)
                .map(|(&lk, &rk)| format!("({row}.c{lk} == {})", right_bindings[rk]))
                .collect::<Vec<_>>()
                .join(" and ");

            match join_type {
                JoinType::Inner => {
                    body.line(ind, format!("for @htEntryIterHasNext(&{iter}) {{"));
                    body.line(
                        ind + 1,
                        format!(
                            "var {row} = @ptrCast(*{row_struct}, @htEntryIterGetRow(&{iter}))"
                        ),
                    );
                    body.line(ind + 1, format!("if {key_check} {{"));
                    let mut bindings: Vec<String> =
                        (0..left_cols).map(|i| format!("{row}.c{i}")).collect();
                    bindings.extend(right_bindings.iter().cloned());
                    consume(t, body, ind + 2, &bindings)?;
                    body.line(ind + 1, "}");
                    body.line(ind, "}");
                }
                JoinType::Semi | JoinType::Anti => {
                    let matched = t.fresh("matched");
                    body.line(ind, format!("var {matched} = false"));
                    body.line(
                        ind,
                        format!("for !{matched} and @htEntryIterHasNext(&{iter}) {{"),
                    );
                    body.line(
                        ind + 1,
                        format!(
                            "var {row} = @ptrCast(*{row_struct}, @htEntryIterGetRow(&{iter}))"
                        ),
                    );
                    body.line(ind + 1, format!("if {key_check} {{"));
                    body.line(ind + 2, format!("{matched} = true"));
                    body.line(ind + 1, "}");
                    body.line(ind, "}");
                    let want = if join_type == JoinType::Semi {
                        format!("if {matched} {{")
                    } else {
                        format!("if !{matched} {{")
                    };
                    body.line(ind, want);
                    consume(t, body, ind + 1, right_bindings)?;
                    body.line(ind, "}");
                }
                JoinType::RightOuter => unreachable!("rejected above"),
            }
            Ok(())
        })
    }

    /// Create the join build pipeline. Returns the QueryState field holding
    /// the table, the build-row struct name, and the build column count.
    fn translate_join_build(
        &mut self,
        left: &PlanNode,
        left_keys: &[usize],
    ) -> Result<(String, String, usize), TranslateError> {
        let left_schema = left.output().clone();
        let row_struct = self.fresh("BuildRow");
        self.emit_struct(
            &row_struct,
            &left_schema
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("c{i}"), sql_value_type(c.type_id).0.to_string()))
                .collect::<Vec<_>>(),
        );

        let field = self.fresh("join");
        self.state_fields.push((
            field.clone(),
            "JoinHashTable".to_string(),
            std::mem::size_of::<crate::sql::JoinHashTable>(),
            std::mem::align_of::<crate::sql::JoinHashTable>(),
        ));
        let state = format!("qs.{field}");
        self.init_lines.push(format!(
            "@joinHTInit(&{state}, qs.execCtx, @sizeOf({row_struct}))"
        ));
        self.teardown_lines.push(format!("@joinHTFree(&{state})"));

        let parallel = Self::source_scan_is_parallel(left);
        let insert_into = |t: &mut Self,
                           body: &mut BodyBuilder,
                           ind: usize,
                           bindings: &[String],
                           target: &str|
         -> Result<(), TranslateError> {
            let hash = t.fresh("hash");
            let keys = left_keys
                .iter()
                .map(|&k| bindings[k].clone())
                .collect::<Vec<_>>()
                .join(", ");
            body.line(ind, format!("var {hash} = @hash({keys})"));
            let row = t.fresh("row");
            body.line(
                ind,
                format!("var {row} = @ptrCast(*{row_struct}, @joinHTInsert(&{target}, {hash}))"),
            );
            for (i, binding) in bindings.iter().enumerate() {
                body.line(ind, format!("{row}.c{i} = {binding}"));
            }
            Ok(())
        };

        let pipeline = self.fresh("pipeline");
        if parallel {
            let ts_struct = self.fresh("JoinBuildTS");
            self.emit_struct(
                &ts_struct,
                &[("table".to_string(), "JoinHashTable".to_string())],
            );
            let init_ts = self.fresh("joinBuildInitTS");
            self.functions.line(
                0,
                format!("fun {init_ts}(qs: *QueryState, ts: *{ts_struct}) -> nil {{"),
            );
            self.functions.line(
                1,
                format!("@joinHTInit(&ts.table, qs.execCtx, @sizeOf({row_struct}))"),
            );
            self.functions.line(0, "}");
            self.functions.blank();
            let tear_ts = self.fresh("joinBuildTearTS");
            self.functions.line(
                0,
                format!("fun {tear_ts}(qs: *QueryState, ts: *{ts_struct}) -> nil {{"),
            );
            self.functions.line(1, "@joinHTFree(&ts.table)");
            self.functions.line(0, "}");
            self.functions.blank();

            // Worker over a table range.
            let worker = self.fresh("joinBuildWorker");
            let mut worker_body = BodyBuilder::new();
            self.produce(left, &mut worker_body, 1, ScanEnv::Worker, &mut |t,
                                                                           body,
                                                                           ind,
                                                                           bindings| {
                insert_into(t, body, ind, bindings, "ts.table")
            })?;
            self.functions.line(
                0,
                format!(
                    "fun {worker}(qs: *QueryState, ts: *{ts_struct}, tvi: *TableVectorIterator) -> nil {{"
                ),
            );
            self.functions.extend(0, &worker_body.lines);
            self.functions.line(0, "}");
            self.functions.blank();

            let table_id = Self::pipeline_source_table(left)?;
            let mut body = BodyBuilder::new();
            body.line(1, "var tls = @execCtxGetTLS(qs.execCtx)");
            body.line(
                1,
                format!("@tlsReset(tls, @sizeOf({ts_struct}), {init_ts}, {tear_ts}, qs)"),
            );
            body.line(1, format!("@tableIterParallel({table_id}, qs, tls, {worker})"));
            body.line(
                1,
                format!("@joinHTBuildParallel(&{state}, tls, @offsetOf({ts_struct}, table))"),
            );
            body.line(1, "@tlsClear(tls)");
            self.emit_pipeline_fn(&pipeline, &body);
        } else {
            let mut body = BodyBuilder::new();
            self.produce(left, &mut body, 1, ScanEnv::Serial, &mut |t, body, ind, bindings| {
                insert_into(t, body, ind, bindings, &state)
            })?;
            body.line(1, format!("@joinHTBuild(&{state})"));
            self.emit_pipeline_fn(&pipeline, &body);
        }
        self.pipelines.push(pipeline);

        Ok((state, row_struct, left_schema.num_columns()))
    }

    /// The table a pipeline's source scan reads, for `@tableIterParallel`.
    fn pipeline_source_table(node: &PlanNode) -> Result<u16, TranslateError> {
        match node {
            PlanNode::SeqScan { table_id, .. } => Ok(*table_id),
            PlanNode::Projection { child, .. } => Self::pipeline_source_table(child),
            PlanNode::HashJoin { right, .. } => Self::pipeline_source_table(right),
            _ => Err(TranslateError::Unsupported(
                "parallel pipeline without a scan source".to_string(),
            )),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn produce_aggregate(
        &mut self,
        child: &PlanNode,
        group_by: &[Expression],
        aggregates: &[AggregateExpr],
        body: &mut BodyBuilder,
        indent: usize,
        consume: Consume<'_, 'a>,
    ) -> Result<(), TranslateError> {
        // Payload: group keys g0.. then accumulators a0.. (AVG gets a count
        // shadow field right after its sum).
        let child_schema = child.output().clone();
        let payload_struct = self.fresh("AggPayload");
        let probe_struct = self.fresh("AggProbe");
        let num_keys = group_by.len().max(1);

        let mut payload_fields = Vec::new();
        let mut probe_fields = Vec::new();
        for i in 0..num_keys {
            let key_ty = group_by
                .get(i)
                .map_or(TypeId::Integer, |e| Self::expr_type(e, &child_schema));
            let tpl_ty = sql_value_type(key_ty).0.to_string();
            payload_fields.push((format!("g{i}"), tpl_ty.clone()));
            probe_fields.push((format!("g{i}"), tpl_ty));
        }
        let mut agg_types = Vec::with_capacity(aggregates.len());
        for (i, agg) in aggregates.iter().enumerate() {
            let agg_ty = match agg.func {
                AggregateFunc::CountStar | AggregateFunc::Count => TypeId::BigInt,
                _ => agg
                    .input
                    .as_ref()
                    .map_or(TypeId::BigInt, |e| Self::expr_type(e, &child_schema)),
            };
            let tpl_ty = sql_value_type(agg_ty).0.to_string();
            payload_fields.push((format!("a{i}"), tpl_ty.clone()));
            if agg.func == AggregateFunc::Avg {
                payload_fields.push((format!("a{i}n"), "Integer".to_string()));
            }
            agg_types.push(tpl_ty);
        }
        self.emit_struct(&payload_struct, &payload_fields);
        self.emit_struct(&probe_struct, &probe_fields);

        let field = self.fresh("agg");
        self.state_fields.push((
            field.clone(),
            "AggregationHashTable".to_string(),
            std::mem::size_of::<crate::sql::AggregationHashTable>(),
            std::mem::align_of::<crate::sql::AggregationHashTable>(),
        ));
        let state = format!("qs.{field}");
        self.init_lines.push(format!(
            "@aggHTInit(&{state}, qs.execCtx, @sizeOf({payload_struct}))"
        ));
        self.teardown_lines.push(format!("@aggHTFree(&{state})"));

        // Key-equality helper shared by build and merge, NULL-aware so NULL
        // keys group together.
        let key_check = self.fresh("aggKeyCheck");
        self.functions.line(
            0,
            format!(
                "fun {key_check}(payload: *{payload_struct}, probe: *{probe_struct}) -> bool {{"
            ),
        );
        let cond = (0..num_keys)
            .map(|i| {
                format!(
                    "(@sqlToBool(payload.g{i} == probe.g{i}) or (@isValNull(payload.g{i}) and @isValNull(probe.g{i})))"
                )
            })
            .collect::<Vec<_>>()
            .join(" and ");
        self.functions.line(1, format!("return {cond}"));
        self.functions.line(0, "}");
        self.functions.blank();

        let parallel = Self::source_scan_is_parallel(child);

        // The per-tuple upsert, shared by serial and worker paths.
        let upsert = |t: &mut Self,
                      body: &mut BodyBuilder,
                      ind: usize,
                      bindings: &[String],
                      target: &str,
                      partitioned: bool|
         -> Result<(), TranslateError> {
            let probe = t.fresh("probe");
            body.line(ind, format!("var {probe}: {probe_struct}"));
            if group_by.is_empty() {
                body.line(ind, format!("{probe}.g0 = @intToSql(0)"));
            } else {
                for (i, expr) in group_by.iter().enumerate() {
                    let rendered = t.emit_expr(expr, bindings)?;
                    body.line(ind, format!("{probe}.g{i} = {rendered}"));
                }
            }
            let hash = t.fresh("hash");
            let keys = (0..num_keys)
                .map(|i| format!("{probe}.g{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            body.line(ind, format!("var {hash} = @hash({keys})"));
            let payload = t.fresh("payload");
            body.line(
                ind,
                format!(
                    "var {payload} = @ptrCast(*{payload_struct}, @aggHTLookup(&{target}, {hash}, {key_check}, &{probe}))"
                ),
            );
            body.line(ind, format!("if {payload} == nil {{"));
            let insert = if partitioned {
                "aggHTInsertPartitioned"
            } else {
                "aggHTInsert"
            };
            body.line(
                ind + 1,
                format!(
                    "{payload} = @ptrCast(*{payload_struct}, @{insert}(&{target}, {hash}))"
                ),
            );
            for i in 0..num_keys {
                body.line(ind + 1, format!("{payload}.g{i} = {probe}.g{i}"));
            }
            for (i, agg) in aggregates.iter().enumerate() {
                match agg.func {
                    AggregateFunc::Min | AggregateFunc::Max => {
                        // NULL seed: the first non-null value wins the first
                        // comparison below.
                        body.line(
                            ind + 1,
                            format!("{payload}.a{i} = @initSqlNull({})", agg_types[i]),
                        );
                    }
                    AggregateFunc::Avg => {
                        body.line(ind + 1, format!("{payload}.a{i} = @intToSql(0)"));
                        body.line(ind + 1, format!("{payload}.a{i}n = @intToSql(0)"));
                    }
                    _ => body.line(ind + 1, format!("{payload}.a{i} = @intToSql(0)")),
                }
            }
            body.line(ind, "}");
            // Accumulate.
            for (i, agg) in aggregates.iter().enumerate() {
                let dest = format!("{payload}.a{i}");
                match agg.func {
                    AggregateFunc::CountStar => {
                        body.line(ind, format!("{dest} = {dest} + @intToSql(1)"));
                    }
                    AggregateFunc::Count => {
                        let input = agg.input.as_ref().ok_or_else(|| {
                            TranslateError::Unsupported("COUNT without input".into())
                        })?;
                        let value = t.emit_expr(input, bindings)?;
                        body.line(ind, format!("if @isValNotNull({value}) {{"));
                        body.line(ind + 1, format!("{dest} = {dest} + @intToSql(1)"));
                        body.line(ind, "}");
                    }
                    AggregateFunc::Sum => {
                        let input = agg.input.as_ref().ok_or_else(|| {
                            TranslateError::Unsupported("SUM without input".into())
                        })?;
                        let value = t.emit_expr(input, bindings)?;
                        body.line(ind, format!("if @isValNotNull({value}) {{"));
                        body.line(ind + 1, format!("{dest} = {dest} + {value}"));
                        body.line(ind, "}");
                    }
                    AggregateFunc::Min | AggregateFunc::Max => {
                        let input = agg.input.as_ref().ok_or_else(|| {
                            TranslateError::Unsupported("MIN/MAX without input".into())
                        })?;
                        let value = t.emit_expr(input, bindings)?;
                        let cmp = if agg.func == AggregateFunc::Min {
                            "<"
                        } else {
                            ">"
                        };
                        // First non-null value seeds; later values compare.
                        body.line(ind, format!("if @isValNotNull({value}) {{"));
                        body.line(
                            ind + 1,
                            format!(
                                "if @isValNull({dest}) or @sqlToBool({value} {cmp} {dest}) {{"
                            ),
                        );
                        body.line(ind + 2, format!("{dest} = {value}"));
                        body.line(ind + 1, "}");
                        body.line(ind, "}");
                    }
                    AggregateFunc::Avg => {
                        let input = agg.input.as_ref().ok_or_else(|| {
                            TranslateError::Unsupported("AVG without input".into())
                        })?;
                        let value = t.emit_expr(input, bindings)?;
                        body.line(ind, format!("if @isValNotNull({value}) {{"));
                        body.line(ind + 1, format!("{dest} = {dest} + {value}"));
                        body.line(
                            ind + 1,
                            format!("{payload}.a{i}n = {payload}.a{i}n + @intToSql(1)"),
                        );
                        body.line(ind, "}");
                    }
                }
            }
            Ok(())
        };

        let build_pipeline = self.fresh("pipeline");
        if parallel {
            let ts_struct = self.fresh("AggBuildTS");
            self.emit_struct(
                &ts_struct,
                &[("table".to_string(), "AggregationHashTable".to_string())],
            );
            let init_ts = self.fresh("aggBuildInitTS");
            self.functions.line(
                0,
                format!("fun {init_ts}(qs: *QueryState, ts: *{ts_struct}) -> nil {{"),
            );
            self.functions.line(
                1,
                format!("@aggHTInit(&ts.table, qs.execCtx, @sizeOf({payload_struct}))"),
            );
            self.functions.line(0, "}");
            self.functions.blank();
            let tear_ts = self.fresh("aggBuildTearTS");
            self.functions.line(
                0,
                format!("fun {tear_ts}(qs: *QueryState, ts: *{ts_struct}) -> nil {{"),
            );
            self.functions.line(1, "@aggHTFree(&ts.table)");
            self.functions.line(0, "}");
            self.functions.blank();

            let worker = self.fresh("aggBuildWorker");
            let mut worker_body = BodyBuilder::new();
            self.produce(child, &mut worker_body, 1, ScanEnv::Worker, &mut |t,
                                                                            body,
                                                                            ind,
                                                                            bindings| {
                upsert(t, body, ind, bindings, "ts.table", true)
            })?;
            self.functions.line(
                0,
                format!(
                    "fun {worker}(qs: *QueryState, ts: *{ts_struct}, tvi: *TableVectorIterator) -> nil {{"
                ),
            );
            self.functions.extend(0, &worker_body.lines);
            self.functions.line(0, "}");
            self.functions.blank();

            // Partition merge: fold partial groups into the global table.
            let merge = self.fresh("aggMerge");
            let mut mb = BodyBuilder::new();
            mb.line(
                1,
                format!("for ; @aggPartIterHasNext(iter); @aggPartIterNext(iter) {{"),
            );
            mb.line(2, "var hashVal = @aggPartIterGetHash(iter)");
            mb.line(
                2,
                format!(
                    "var partial = @ptrCast(*{payload_struct}, @aggPartIterGetRow(iter))"
                ),
            );
            mb.line(2, format!("var probe: {probe_struct}"));
            for i in 0..num_keys {
                mb.line(2, format!("probe.g{i} = partial.g{i}"));
            }
            mb.line(
                2,
                format!(
                    "var payload = @ptrCast(*{payload_struct}, @aggHTLookup(agg, hashVal, {key_check}, &probe))"
                ),
            );
            mb.line(2, "if payload == nil {");
            mb.line(
                3,
                format!("payload = @ptrCast(*{payload_struct}, @aggHTInsert(agg, hashVal))"),
            );
            for i in 0..num_keys {
                mb.line(3, format!("payload.g{i} = partial.g{i}"));
            }
            for (i, agg) in aggregates.iter().enumerate() {
                mb.line(3, format!("payload.a{i} = partial.a{i}"));
                if agg.func == AggregateFunc::Avg {
                    mb.line(3, format!("payload.a{i}n = partial.a{i}n"));
                }
            }
            mb.line(2, "} else {");
            for (i, agg) in aggregates.iter().enumerate() {
                match agg.func {
                    AggregateFunc::CountStar | AggregateFunc::Count | AggregateFunc::Sum => {
                        mb.line(3, format!("payload.a{i} = payload.a{i} + partial.a{i}"));
                    }
                    AggregateFunc::Avg => {
                        mb.line(3, format!("payload.a{i} = payload.a{i} + partial.a{i}"));
                        mb.line(3, format!("payload.a{i}n = payload.a{i}n + partial.a{i}n"));
                    }
                    AggregateFunc::Min | AggregateFunc::Max => {
                        let cmp = if agg.func == AggregateFunc::Min {
                            "<"
                        } else {
                            ">"
                        };
                        mb.line(3, format!("if @isValNotNull(partial.a{i}) {{"));
                        mb.line(
                            4,
                            format!(
                                "if @isValNull(payload.a{i}) or @sqlToBool(partial.a{i} {cmp} payload.a{i}) {{"
                            ),
                        );
                        mb.line(5, format!("payload.a{i} = partial.a{i}"));
                        mb.line(4, "}");
                        mb.line(3, "}");
                    }
                }
            }
            mb.line(2, "}");
            mb.line(1, "}");
            self.functions.line(
                0,
                format!(
                    "fun {merge}(agg: *AggregationHashTable, iter: *AHTOverflowPartitionIterator) -> nil {{"
                ),
            );
            self.functions.extend(0, &mb.lines);
            self.functions.line(0, "}");
            self.functions.blank();

            let table_id = Self::pipeline_source_table(child)?;
            let mut pb = BodyBuilder::new();
            pb.line(1, "var tls = @execCtxGetTLS(qs.execCtx)");
            pb.line(
                1,
                format!("@tlsReset(tls, @sizeOf({ts_struct}), {init_ts}, {tear_ts}, qs)"),
            );
            pb.line(1, format!("@tableIterParallel({table_id}, qs, tls, {worker})"));
            pb.line(
                1,
                format!(
                    "@aggHTMovePartitions(&{state}, tls, @offsetOf({ts_struct}, table), {merge})"
                ),
            );
            pb.line(1, "@tlsClear(tls)");
            self.emit_pipeline_fn(&build_pipeline, &pb);
        } else {
            let mut pb = BodyBuilder::new();
            self.produce(child, &mut pb, 1, ScanEnv::Serial, &mut |t, body, ind, bindings| {
                upsert(t, body, ind, bindings, &state, false)
            })?;
            self.emit_pipeline_fn(&build_pipeline, &pb);
        }
        self.pipelines.push(build_pipeline);

        // Current pipeline: iterate the final groups.
        let iter = self.fresh("aggIter");
        body.line(indent, format!("var {iter}: AHTIterator"));
        body.line(indent, format!("@aggHTIterInit(&{iter}, &{state})"));
        body.line(
            indent,
            format!("for ; @aggHTIterHasNext(&{iter}); @aggHTIterNext(&{iter}) {{"),
        );
        let row = self.fresh("group");
        body.line(
            indent + 1,
            format!("var {row} = @ptrCast(*{payload_struct}, @aggHTIterGetRow(&{iter}))"),
        );
        let mut bindings = Vec::new();
        if !group_by.is_empty() {
            for i in 0..num_keys {
                bindings.push(format!("{row}.g{i}"));
            }
        }
        for (i, agg) in aggregates.iter().enumerate() {
            if agg.func == AggregateFunc::Avg {
                let avg = self.fresh("avg");
                body.line(indent + 1, format!("var {avg} = @intToSql(0)"));
                body.line(
                    indent + 1,
                    format!("if @sqlToBool({row}.a{i}n > @intToSql(0)) {{"),
                );
                body.line(indent + 2, format!("{avg} = {row}.a{i} / {row}.a{i}n"));
                body.line(indent + 1, "}");
                bindings.push(avg);
            } else {
                bindings.push(format!("{row}.a{i}"));
            }
        }
        consume(self, body, indent + 1, &bindings)?;
        body.line(indent, "}");
        body.line(indent, format!("@aggHTIterClose(&{iter})"));
        Ok(())
    }

    fn produce_order_by(
        &mut self,
        child: &PlanNode,
        sort_keys: &[(Expression, SortDirection)],
        limit: Option<u64>,
        offset: Option<u64>,
        body: &mut BodyBuilder,
        indent: usize,
        consume: Consume<'_, 'a>,
    ) -> Result<(), TranslateError> {
        let child_schema = child.output().clone();
        let row_struct = self.fresh("SortRow");
        self.emit_struct(
            &row_struct,
            &child_schema
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("c{i}"), sql_value_type(c.type_id).0.to_string()))
                .collect::<Vec<_>>(),
        );

        let field = self.fresh("sorter");
        self.state_fields.push((
            field.clone(),
            "Sorter".to_string(),
            std::mem::size_of::<crate::sql::Sorter>(),
            std::mem::align_of::<crate::sql::Sorter>(),
        ));
        let state = format!("qs.{field}");

        // Comparator: key by key, NULLs first, descending keys flipped.
        let cmp_fn = self.fresh("sortCmp");
        let mut cb = BodyBuilder::new();
        let lhs_bindings: Vec<String> = (0..child_schema.num_columns())
            .map(|i| format!("lhs.c{i}"))
            .collect();
        let rhs_bindings: Vec<String> = (0..child_schema.num_columns())
            .map(|i| format!("rhs.c{i}"))
            .collect();
        for (key_idx, (key, direction)) in sort_keys.iter().enumerate() {
            let lk = format!("lk{key_idx}");
            let rk = format!("rk{key_idx}");
            let l_expr = self.emit_expr(key, &lhs_bindings)?;
            let r_expr = self.emit_expr(key, &rhs_bindings)?;
            cb.line(1, format!("var {lk} = {l_expr}"));
            cb.line(1, format!("var {rk} = {r_expr}"));
            let (before, after) = match direction {
                SortDirection::Ascending => ("-1", "1"),
                SortDirection::Descending => ("1", "-1"),
            };
            cb.line(1, format!("if @isValNull({lk}) and @isValNotNull({rk}) {{"));
            cb.line(2, format!("return {before}"));
            cb.line(1, "}");
            cb.line(1, format!("if @isValNotNull({lk}) and @isValNull({rk}) {{"));
            cb.line(2, format!("return {after}"));
            cb.line(1, "}");
            cb.line(1, format!("if @sqlToBool({lk} < {rk}) {{"));
            cb.line(2, format!("return {before}"));
            cb.line(1, "}");
            cb.line(1, format!("if @sqlToBool({lk} > {rk}) {{"));
            cb.line(2, format!("return {after}"));
            cb.line(1, "}");
        }
        cb.line(1, "return 0");
        self.functions.line(
            0,
            format!("fun {cmp_fn}(lhs: *{row_struct}, rhs: *{row_struct}) -> int32 {{"),
        );
        self.functions.extend(0, &cb.lines);
        self.functions.line(0, "}");
        self.functions.blank();

        self.init_lines.push(format!(
            "@sorterInit(&{state}, qs.execCtx, {cmp_fn}, @sizeOf({row_struct}))"
        ));
        self.teardown_lines.push(format!("@sorterFree(&{state})"));

        // Top-K retains limit+offset rows.
        let top_k = limit.map(|l| l + offset.unwrap_or(0));
        let parallel = Self::source_scan_is_parallel(child);

        let insert_into = |t: &mut Self,
                           body: &mut BodyBuilder,
                           ind: usize,
                           bindings: &[String],
                           target: &str|
         -> Result<(), TranslateError> {
            let row = t.fresh("sortRow");
            match top_k {
                Some(k) => {
                    body.line(
                        ind,
                        format!(
                            "var {row} = @ptrCast(*{row_struct}, @sorterInsertTopK(&{target}, {k}))"
                        ),
                    );
                    for (i, binding) in bindings.iter().enumerate() {
                        body.line(ind, format!("{row}.c{i} = {binding}"));
                    }
                    body.line(ind, format!("@sorterInsertTopKFinish(&{target}, {k})"));
                }
                None => {
                    body.line(
                        ind,
                        format!("var {row} = @ptrCast(*{row_struct}, @sorterInsert(&{target}))"),
                    );
                    for (i, binding) in bindings.iter().enumerate() {
                        body.line(ind, format!("{row}.c{i} = {binding}"));
                    }
                }
            }
            Ok(())
        };

        let build_pipeline = self.fresh("pipeline");
        if parallel {
            let ts_struct = self.fresh("SortBuildTS");
            self.emit_struct(&ts_struct, &[("table".to_string(), "Sorter".to_string())]);
            let init_ts = self.fresh("sortBuildInitTS");
            self.functions.line(
                0,
                format!("fun {init_ts}(qs: *QueryState, ts: *{ts_struct}) -> nil {{"),
            );
            self.functions.line(
                1,
                format!("@sorterInit(&ts.table, qs.execCtx, {cmp_fn}, @sizeOf({row_struct}))"),
            );
            self.functions.line(0, "}");
            self.functions.blank();
            let tear_ts = self.fresh("sortBuildTearTS");
            self.functions.line(
                0,
                format!("fun {tear_ts}(qs: *QueryState, ts: *{ts_struct}) -> nil {{"),
            );
            self.functions.line(1, "@sorterFree(&ts.table)");
            self.functions.line(0, "}");
            self.functions.blank();

            let worker = self.fresh("sortBuildWorker");
            let mut worker_body = BodyBuilder::new();
            self.produce(child, &mut worker_body, 1, ScanEnv::Worker, &mut |t,
                                                                            body,
                                                                            ind,
                                                                            bindings| {
                insert_into(t, body, ind, bindings, "ts.table")
            })?;
            self.functions.line(
                0,
                format!(
                    "fun {worker}(qs: *QueryState, ts: *{ts_struct}, tvi: *TableVectorIterator) -> nil {{"
                ),
            );
            self.functions.extend(0, &worker_body.lines);
            self.functions.line(0, "}");
            self.functions.blank();

            let table_id = Self::pipeline_source_table(child)?;
            let mut pb = BodyBuilder::new();
            pb.line(1, "var tls = @execCtxGetTLS(qs.execCtx)");
            pb.line(
                1,
                format!("@tlsReset(tls, @sizeOf({ts_struct}), {init_ts}, {tear_ts}, qs)"),
            );
            pb.line(1, format!("@tableIterParallel({table_id}, qs, tls, {worker})"));
            match top_k {
                Some(k) => pb.line(
                    1,
                    format!(
                        "@sorterSortTopKParallel(&{state}, tls, @offsetOf({ts_struct}, table), {k})"
                    ),
                ),
                None => pb.line(
                    1,
                    format!("@sorterSortParallel(&{state}, tls, @offsetOf({ts_struct}, table))"),
                ),
            }
            pb.line(1, "@tlsClear(tls)");
            self.emit_pipeline_fn(&build_pipeline, &pb);
        } else {
            let mut pb = BodyBuilder::new();
            self.produce(child, &mut pb, 1, ScanEnv::Serial, &mut |t, body, ind, bindings| {
                insert_into(t, body, ind, bindings, &state)
            })?;
            pb.line(1, format!("@sorterSort(&{state})"));
            self.emit_pipeline_fn(&build_pipeline, &pb);
        }
        self.pipelines.push(build_pipeline);

        // Current pipeline: iterate sorted rows.
        let iter = self.fresh("sortIter");
        body.line(indent, format!("var {iter}: SorterIterator"));
        body.line(indent, format!("@sorterIterInit(&{iter}, &{state})"));
        if let Some(offset) = offset {
            if offset > 0 {
                body.line(indent, format!("@sorterIterSkipRows(&{iter}, {offset})"));
            }
        }
        let mut loop_cond = format!("@sorterIterHasNext(&{iter})");
        if let Some(limit) = limit {
            let remaining = self.fresh("remaining");
            body.line(indent, format!("var {remaining}: int64 = {limit}"));
            loop_cond = format!("{remaining} > 0 and {loop_cond}");
            body.line(
                indent,
                format!("for ; {loop_cond}; @sorterIterNext(&{iter}) {{"),
            );
            body.line(indent + 1, format!("{remaining} = {remaining} - 1"));
        } else {
            body.line(
                indent,
                format!("for ; {loop_cond}; @sorterIterNext(&{iter}) {{"),
            );
        }
        let row = self.fresh("sorted");
        body.line(
            indent + 1,
            format!("var {row} = @ptrCast(*{row_struct}, @sorterIterGetRow(&{iter}))"),
        );
        let bindings: Vec<String> = (0..child_schema.num_columns())
            .map(|i| format!("{row}.c{i}"))
            .collect();
        consume(self, body, indent + 1, &bindings)?;
        body.line(indent, "}");
        body.line(indent, format!("@sorterIterClose(&{iter})"));
        Ok(())
    }
}
