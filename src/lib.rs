//! # Tellur
//!
//! A JIT-compiling, vectorized SQL execution engine. Query plans produced by
//! an external optimizer are lowered to a small imperative language ("TPL"),
//! compiled to a register-based bytecode, and executed by a vector-at-a-time
//! relational runtime.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Physical Plan
//!     ↓
//! [Operator Translators]   → TPL source (one module per query)
//!     ↓
//! [Parser]                 → arena AST
//!     ↓
//! [Semantic Analysis]      → typed AST + implicit casts
//!     ↓
//! [Bytecode Generator]     → register bytecode + frame layouts
//!     ↓
//! [Interpreter]            → init / pipeline-run* / teardown
//!     ↓
//! Result rows
//! ```
//!
//! The runtime underneath moves data as vector projections: groups of
//! fixed-capacity column vectors sharing a tuple-id-list filter, through
//! scan iterators, vectorized filter/arithmetic/hash kernels, and the
//! stateful operator kernels (join hash table, aggregation hash table,
//! sorter) with their parallel build paths on a rayon pool.
//!
//! ## Usage
//!
//! Run a TPL file directly:
//!
//! ```rust,ignore
//! use tellur::sql::Catalog;
//! use tellur::vm::{compile_source, VM};
//! use std::sync::Arc;
//!
//! let module = compile_source("fun main() -> int64 { return 42 }", "demo")?;
//! let vm = VM::new(Arc::new(module), Arc::new(Catalog::with_test_tables()));
//! let mut result: i64 = 0;
//! vm.invoke_by_name("main", &[std::ptr::from_mut(&mut result) as usize])?;
//! ```
//!
//! Or execute a plan end-to-end:
//!
//! ```rust,ignore
//! use tellur::codegen::ExecutableQuery;
//!
//! let query = ExecutableQuery::compile(&plan, catalog)?;
//! let result = query.run()?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `util` | Bitmaps, chunked row storage, typed arenas, hashing |
//! | `ast` | Arena AST, interned identifiers and types, builtins |
//! | `parser` | TPL scanner and recursive-descent parser |
//! | `sema` | Type checking, scopes, implicit casts, diagnostics |
//! | `vm` | Bytecode set, emitter, module, generator, interpreter |
//! | `sql` | Vectors, TID lists, kernels, tables, operator state |
//! | `planner` | Physical plan nodes and expressions |
//! | `codegen` | Operator translators and the executable query driver |

pub mod ast;
pub mod codegen;
pub mod config;
pub mod parser;
pub mod planner;
pub mod sema;
pub mod sql;
pub mod util;
pub mod vm;

pub use codegen::{ExecutableQuery, QueryError, QueryResult};
pub use config::Config;
pub use sql::Catalog;
