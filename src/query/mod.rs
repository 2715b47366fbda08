//! Query execution layer
//!
//! Plans are built by [`QueryPlanner`] and run by [`ExecutionEngine`] as a
//! tree of pull-based operators. Recursive queries evaluate through a
//! [`RecursiveUnion`] and the [`WorkTableScan`]s in its recursive term.

pub mod binding;
mod context;
mod executor;
mod expr;
mod node;
mod planner;
mod recursive_union;
mod worktable_scan;

pub use binding::{ParamId, ParamSlot, ParamTable, WorkTableHandle, WorkTableState};
pub use context::{ExecContext, ExecFlags};
pub use executor::{ExecutionEngine, QueryExecution, ResultIterator};
pub use expr::{BinaryOperator, Expr, ExprEvaluator, UnaryOperator};
pub use node::{ExecNode, FilterNode, LimitNode, Operator, ProjectNode, ScanProjection, ValuesScan};
pub use planner::{ExecutionPlan, ProjectItem, QueryPlanner, UnionMode, WorkTableRef};
pub use recursive_union::{RecursionStats, RecursiveUnion};
pub use worktable_scan::WorkTableScan;
