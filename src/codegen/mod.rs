//! Plan compilation: operator translators emit a TPL module, the front-end
//! compiles it to bytecode, and [`ExecutableQuery`] drives the generated
//! `init → pipeline* → teardown` functions through the interpreter.

pub mod source;
pub mod translator;

pub use translator::{RowLayout, TranslateError, TranslatedQuery, Translator};

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::planner::PlanNode;
use crate::sql::exec::ExecutionContext;
use crate::sql::value::GenericValue;
use crate::sql::{Catalog, ExecutionError};
use crate::vm::{compile_source, CompileError, VM};

/// Anything that can go wrong compiling or running a plan.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// The result rows of one query invocation.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<Vec<GenericValue>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A plan compiled down to bytecode, ready to run repeatedly.
pub struct ExecutableQuery {
    vm: VM,
    catalog: Arc<Catalog>,
    state_size: usize,
    output_layout: RowLayout,
    pipelines: Vec<String>,
    source: String,
}

impl ExecutableQuery {
    /// Lower `plan` to TPL, compile the module, and prepare for execution.
    pub fn compile(plan: &PlanNode, catalog: Arc<Catalog>) -> Result<ExecutableQuery, QueryError> {
        let translated = Translator::new(&catalog).translate(plan)?;
        debug!(
            pipelines = translated.pipelines.len(),
            state_bytes = translated.state_size,
            "plan lowered to TPL"
        );
        let module = compile_source(&translated.source, "query")?;
        Ok(ExecutableQuery {
            vm: VM::new(Arc::new(module), Arc::clone(&catalog)),
            catalog,
            state_size: translated.state_size,
            output_layout: translated.output_layout,
            pipelines: translated.pipelines,
            source: translated.source,
        })
    }

    /// The generated TPL source, for inspection.
    pub fn tpl_source(&self) -> &str {
        &self.source
    }

    /// The compiled module's disassembly, for inspection.
    pub fn disassembly(&self) -> String {
        self.vm.module().disassemble()
    }

    /// Run the query: `init`, every pipeline in order, `teardown`.
    pub fn run(&self) -> Result<QueryResult, QueryError> {
        let layout = self.output_layout.clone();
        let rows = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rows);
        let mut ctx = ExecutionContext::new(
            Arc::clone(&self.catalog),
            layout.size,
            Some(Box::new(move |row: &[u8]| {
                sink.lock().push(layout.decode(row));
            })),
        );

        // The generated QueryState lives in one zeroed, aligned buffer.
        let mut state = vec![0u128; self.state_size.div_ceil(16).max(1)];
        let qs = state.as_mut_ptr().cast::<u8>() as usize;
        let ctx_ptr = std::ptr::addr_of_mut!(ctx) as usize;

        self.vm.invoke_by_name("initQuery", &[qs, ctx_ptr])?;
        for pipeline in &self.pipelines {
            debug!(pipeline, "running pipeline");
            self.vm.invoke_by_name(pipeline, &[qs])?;
        }
        self.vm.invoke_by_name("teardownQuery", &[qs])?;

        let rows = std::mem::take(&mut *rows.lock());
        info!(rows = rows.len(), "query complete");
        Ok(QueryResult { rows })
    }
}
