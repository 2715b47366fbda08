//! Execution plans and the planner that wires recursive unions
//!
//! A recursive union and the working-table scan inside its recursive term
//! share nothing but a `ParamId`. The planner hands out those ids, so the
//! wiring is fixed before execution starts.

use super::binding::ParamId;
use super::expr::Expr;
use crate::error::{ExecError, Result};
use crate::types::{Row, Schema};
use std::fmt::Write as _;

/// Result semantics of a recursive union
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionMode {
    /// UNION ALL: every produced row, duplicates included
    All,
    /// UNION: a row already emitted in any iteration is dropped
    Distinct,
}

/// One output column of a projection
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectItem {
    pub expr: Expr,
    pub alias: String,
}

impl ProjectItem {
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
        }
    }
}

/// Execution plan tree
#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    /// Literal rows
    Values { schema: Schema, rows: Vec<Row> },

    /// Filter operation
    Filter {
        input: Box<ExecutionPlan>,
        predicate: Expr,
    },

    /// Projection operation
    Project {
        input: Box<ExecutionPlan>,
        items: Vec<ProjectItem>,
    },

    /// LIMIT / OFFSET
    Limit {
        input: Box<ExecutionPlan>,
        limit: Option<usize>,
        offset: usize,
    },

    /// Scan of the working table published at `param`
    WorkTableScan {
        param: ParamId,
        /// Row shape the planner expects the working table to have
        schema: Schema,
        qual: Option<Expr>,
        targets: Option<Vec<ProjectItem>>,
    },

    /// Fixpoint evaluation of `seed UNION [ALL] recursive`
    RecursiveUnion {
        param: ParamId,
        schema: Schema,
        mode: UnionMode,
        seed: Box<ExecutionPlan>,
        recursive: Box<ExecutionPlan>,
    },
}

impl ExecutionPlan {
    /// Create a literal rows plan
    pub fn values(schema: Schema, rows: Vec<Row>) -> Self {
        ExecutionPlan::Values { schema, rows }
    }

    /// Add a filter operator
    pub fn with_filter(self, predicate: Expr) -> Self {
        ExecutionPlan::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    /// Add a projection operator
    pub fn with_project(self, items: Vec<ProjectItem>) -> Self {
        ExecutionPlan::Project {
            input: Box::new(self),
            items,
        }
    }

    /// Add a limit operator
    pub fn with_limit(self, limit: usize) -> Self {
        ExecutionPlan::Limit {
            input: Box::new(self),
            limit: Some(limit),
            offset: 0,
        }
    }

    /// Add a limit operator with offset
    pub fn with_limit_offset(self, limit: Option<usize>, offset: usize) -> Self {
        ExecutionPlan::Limit {
            input: Box::new(self),
            limit,
            offset,
        }
    }

    /// Number of param slots the plan needs
    pub fn param_count(&self) -> usize {
        let mut max: Option<usize> = None;
        self.visit(&mut |plan| {
            let mut note = |id: ParamId| max = Some(max.map_or(id.0, |m| m.max(id.0)));
            match plan {
                ExecutionPlan::WorkTableScan { param, qual, targets, .. } => {
                    note(*param);
                    qual.iter().for_each(|e| expr_params(e, &mut note));
                    targets.iter().flatten().for_each(|t| expr_params(&t.expr, &mut note));
                }
                ExecutionPlan::RecursiveUnion { param, .. } => note(*param),
                ExecutionPlan::Filter { predicate, .. } => expr_params(predicate, &mut note),
                ExecutionPlan::Project { items, .. } => {
                    items.iter().for_each(|t| expr_params(&t.expr, &mut note))
                }
                ExecutionPlan::Values { .. } | ExecutionPlan::Limit { .. } => {}
            }
        });
        max.map_or(0, |m| m + 1)
    }

    /// Count working-table scans bound to `param`
    pub fn work_table_refs(&self, param: ParamId) -> usize {
        let mut count = 0;
        self.visit(&mut |plan| {
            if let ExecutionPlan::WorkTableScan { param: p, .. } = plan {
                if *p == param {
                    count += 1;
                }
            }
        });
        count
    }

    /// Indented tree for EXPLAIN-style output
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            ExecutionPlan::Values { rows, .. } => {
                let _ = writeln!(out, "{}Values (rows={})", pad, rows.len());
            }
            ExecutionPlan::Filter { input, predicate } => {
                let _ = writeln!(out, "{}Filter {:?}", pad, predicate);
                input.explain_into(out, depth + 1);
            }
            ExecutionPlan::Project { input, items } => {
                let names: Vec<&str> = items.iter().map(|i| i.alias.as_str()).collect();
                let _ = writeln!(out, "{}Project [{}]", pad, names.join(", "));
                input.explain_into(out, depth + 1);
            }
            ExecutionPlan::Limit { input, limit, offset } => {
                let _ = writeln!(out, "{}Limit (limit={:?}, offset={})", pad, limit, offset);
                input.explain_into(out, depth + 1);
            }
            ExecutionPlan::WorkTableScan { param, qual, .. } => {
                let _ = write!(out, "{}WorkTableScan (param={})", pad, param);
                if let Some(qual) = qual {
                    let _ = write!(out, " qual={:?}", qual);
                }
                out.push('\n');
            }
            ExecutionPlan::RecursiveUnion { param, mode, seed, recursive, .. } => {
                let _ = writeln!(out, "{}RecursiveUnion {:?} (param={})", pad, mode, param);
                seed.explain_into(out, depth + 1);
                recursive.explain_into(out, depth + 1);
            }
        }
    }

    fn visit(&self, f: &mut impl FnMut(&ExecutionPlan)) {
        f(self);
        match self {
            ExecutionPlan::Values { .. } | ExecutionPlan::WorkTableScan { .. } => {}
            ExecutionPlan::Filter { input, .. }
            | ExecutionPlan::Project { input, .. }
            | ExecutionPlan::Limit { input, .. } => input.visit(f),
            ExecutionPlan::RecursiveUnion { seed, recursive, .. } => {
                seed.visit(f);
                recursive.visit(f);
            }
        }
    }
}

fn expr_params(expr: &Expr, note: &mut impl FnMut(ParamId)) {
    match expr {
        Expr::Param(id) => note(*id),
        Expr::Column(_) | Expr::Literal(_) => {}
        Expr::BinaryOp { left, right, .. } => {
            expr_params(left, note);
            expr_params(right, note);
        }
        Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. } => expr_params(expr, note),
    }
}

/// Symbolic reference to the working table of a recursive union being planned
#[derive(Debug, Clone)]
pub struct WorkTableRef {
    param: ParamId,
    schema: Schema,
}

impl WorkTableRef {
    pub fn param(&self) -> ParamId {
        self.param
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Plain scan of the working table
    pub fn scan(&self) -> ExecutionPlan {
        self.scan_with(None, None)
    }

    /// Scan with a qual and/or projection evaluated by the scan itself
    pub fn scan_with(&self, qual: Option<Expr>, targets: Option<Vec<ProjectItem>>) -> ExecutionPlan {
        ExecutionPlan::WorkTableScan {
            param: self.param,
            schema: self.schema.clone(),
            qual,
            targets,
        }
    }
}

/// Query planner - assigns param slots and checks recursive-union wiring
#[derive(Debug, Default)]
pub struct QueryPlanner {
    next_param: usize,
}

impl QueryPlanner {
    /// Create a new query planner
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a param slot
    pub fn alloc_param(&mut self) -> ParamId {
        let id = ParamId(self.next_param);
        self.next_param += 1;
        id
    }

    /// Slots reserved so far
    pub fn param_count(&self) -> usize {
        self.next_param
    }

    /// Plan `seed UNION [ALL] recursive`.
    ///
    /// `build_recursive` receives the working-table reference and must scan
    /// it exactly once; the seed must not scan it at all. A second scan in
    /// the recursive term is rejected: the working table has a single read
    /// cursor, so two scans would steal rows from each other.
    pub fn plan_recursive_union<F>(
        &mut self,
        schema: Schema,
        mode: UnionMode,
        seed: ExecutionPlan,
        build_recursive: F,
    ) -> Result<ExecutionPlan>
    where
        F: FnOnce(&mut QueryPlanner, &WorkTableRef) -> Result<ExecutionPlan>,
    {
        let param = self.alloc_param();
        let work_table = WorkTableRef {
            param,
            schema: schema.clone(),
        };
        let recursive = build_recursive(self, &work_table)?;

        if seed.work_table_refs(param) > 0 {
            return Err(ExecError::Query(
                "recursive reference to the working table in the non-recursive term".into(),
            ));
        }
        match recursive.work_table_refs(param) {
            0 => {
                return Err(ExecError::Query(
                    "recursive term does not reference the working table".into(),
                ))
            }
            1 => {}
            n => {
                return Err(ExecError::Query(format!(
                    "recursive reference to the working table must not appear more than once (found {})",
                    n
                )))
            }
        }

        Ok(ExecutionPlan::RecursiveUnion {
            param,
            schema,
            mode,
            seed: Box::new(seed),
            recursive: Box::new(recursive),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnType, Value};

    fn counter(planner: &mut QueryPlanner) -> Result<ExecutionPlan> {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let seed = ExecutionPlan::values(schema.clone(), vec![vec![Value::Integer(1)]]);
        planner.plan_recursive_union(schema, UnionMode::All, seed, |_, wt| {
            Ok(wt
                .scan_with(Some(Expr::col(0).lt(Expr::lit(4))), None)
                .with_project(vec![ProjectItem::new(Expr::col(0).add(Expr::lit(1)), "n")]))
        })
    }

    #[test]
    fn test_plan_recursive_union() {
        let mut planner = QueryPlanner::new();
        let plan = counter(&mut planner).unwrap();

        assert_eq!(planner.param_count(), 1);
        assert_eq!(plan.param_count(), 1);
        assert_eq!(plan.work_table_refs(ParamId(0)), 1);

        let explain = plan.explain();
        assert!(explain.starts_with("RecursiveUnion All (param=$0)"));
        assert!(explain.contains("  Values (rows=1)"));
        assert!(explain.contains("    WorkTableScan (param=$0)"));
    }

    #[test]
    fn test_plan_rejects_bad_references() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let mut planner = QueryPlanner::new();

        let missing = planner.plan_recursive_union(
            schema.clone(),
            UnionMode::All,
            ExecutionPlan::values(schema.clone(), vec![]),
            |_, _| Ok(ExecutionPlan::values(schema.clone(), vec![])),
        );
        assert!(matches!(missing, Err(ExecError::Query(_))));

        let twice = planner.plan_recursive_union(
            schema.clone(),
            UnionMode::All,
            ExecutionPlan::values(schema.clone(), vec![]),
            |_, wt| {
                Ok(ExecutionPlan::RecursiveUnion {
                    param: ParamId(99),
                    schema: schema.clone(),
                    mode: UnionMode::All,
                    seed: Box::new(wt.scan()),
                    recursive: Box::new(wt.scan()),
                })
            },
        );
        assert!(matches!(twice, Err(ExecError::Query(msg)) if msg.contains("more than once")));
    }

    #[test]
    fn test_nested_plan_param_count() {
        let mut planner = QueryPlanner::new();
        let inner = counter(&mut planner).unwrap();
        let outer_param = planner.alloc_param();
        let plan = inner.with_filter(Expr::col(0).gt(Expr::param(outer_param)));
        assert_eq!(plan.param_count(), 2);
    }
}
