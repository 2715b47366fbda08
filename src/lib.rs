//! Recursive query execution for MoteDB
//!
//! Evaluates `WITH RECURSIVE` style queries to a fixpoint with a pull-based
//! operator tree.
//!
//! ## Architecture
//! - Query layer: plan builder, Volcano-style operators, recursive union and
//!   working-table scan bound through the execution param table
//! - Storage layer: working-table stores that spill to snappy-compressed,
//!   CRC-checked temp-file blocks once they outgrow their memory budget
//!
//! ## Example
//! ```
//! use motedb_recursive::query::{Expr, ExecutionEngine, ExecutionPlan, ProjectItem, QueryPlanner, UnionMode};
//! use motedb_recursive::types::{ColumnType, Schema, Value};
//!
//! let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
//! let mut planner = QueryPlanner::new();
//! let plan = planner.plan_recursive_union(
//!     schema.clone(),
//!     UnionMode::All,
//!     ExecutionPlan::values(schema, vec![vec![Value::Integer(1)]]),
//!     |_, wt| Ok(wt.scan_with(
//!         Some(Expr::col(0).lt(Expr::lit(4))),
//!         Some(vec![ProjectItem::new(Expr::col(0).add(Expr::lit(1)), "n")]),
//!     )),
//! )?;
//!
//! let result = ExecutionEngine::new().execute(&plan)?;
//! assert_eq!(result.len(), 4);
//! # Ok::<(), motedb_recursive::ExecError>(())
//! ```

/// Debug-level tracing for hot paths
macro_rules! debug_log {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

pub mod config;
pub mod query;
pub mod storage;
pub mod types;

mod error;

pub use config::{ExecutorConfig, WorkTableConfig};
pub use error::{ExecError, Result};
pub use query::{ExecutionEngine, ExecutionPlan, QueryExecution, QueryPlanner, RecursionStats, ResultIterator};
