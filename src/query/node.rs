//! Pull-based operator protocol and the generic operators
//!
//! Every operator follows the same lifecycle:
//! 1. `ExecNode::open()` - build state from the plan, open children
//! 2. `next()` - pull rows until `None`
//! 3. `rescan()` - restart from the first row (optional)
//! 4. `close()` - release resources, close children
//!
//! `None` is not terminal: an operator may be rescanned, and a working-table
//! scan produces rows again once its recursive union swaps in a new table.

use super::context::{ExecContext, ExecFlags};
use super::expr::{Expr, ExprEvaluator};
use super::planner::{ExecutionPlan, ProjectItem};
use super::recursive_union::{RecursionStats, RecursiveUnion};
use super::worktable_scan::WorkTableScan;
use crate::error::Result;
use crate::types::{ColumnDef, Row, Schema};
use super::binding::ParamTable;

/// Volcano-style operator
pub trait Operator {
    /// Output row shape, fixed once the operator is open
    fn schema(&self) -> &Schema;

    /// Pull the next row, `None` at end-of-data
    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>>;

    /// Restart from the first row
    fn rescan(&mut self, ctx: &mut ExecContext) -> Result<()>;

    /// Release resources
    fn close(&mut self, ctx: &mut ExecContext);
}

/// Operator tree node. The set of operators is closed, so dispatch is a match.
pub enum ExecNode {
    Values(ValuesScan),
    Filter(Box<FilterNode>),
    Project(Box<ProjectNode>),
    Limit(Box<LimitNode>),
    WorkTableScan(WorkTableScan),
    RecursiveUnion(Box<RecursiveUnion>),
}

impl ExecNode {
    /// Build the operator tree for `plan`
    pub fn open(plan: &ExecutionPlan, ctx: &mut ExecContext, flags: ExecFlags) -> Result<ExecNode> {
        Ok(match plan {
            ExecutionPlan::Values { schema, rows } => {
                ExecNode::Values(ValuesScan::open(schema.clone(), rows.clone())?)
            }
            ExecutionPlan::Filter { input, predicate } => {
                let input = ExecNode::open(input, ctx, flags)?;
                ExecNode::Filter(Box::new(FilterNode::open(input, predicate.clone(), ctx)?))
            }
            ExecutionPlan::Project { input, items } => {
                let input = ExecNode::open(input, ctx, flags)?;
                ExecNode::Project(Box::new(ProjectNode::open(input, items.clone(), ctx)?))
            }
            ExecutionPlan::Limit { input, limit, offset } => {
                let input = ExecNode::open(input, ctx, flags)?;
                ExecNode::Limit(Box::new(LimitNode::new(input, *limit, *offset)))
            }
            ExecutionPlan::WorkTableScan { param, schema, qual, targets } => {
                ExecNode::WorkTableScan(WorkTableScan::open(
                    *param,
                    schema.clone(),
                    qual.clone(),
                    targets.clone(),
                    ctx,
                    flags,
                )?)
            }
            ExecutionPlan::RecursiveUnion { param, schema, mode, seed, recursive } => {
                ExecNode::RecursiveUnion(Box::new(RecursiveUnion::open(
                    *param,
                    schema.clone(),
                    *mode,
                    seed,
                    recursive,
                    ctx,
                    flags,
                )?))
            }
        })
    }

    /// Stats of the topmost recursive union in this subtree
    pub fn recursion_stats(&self) -> Option<&RecursionStats> {
        match self {
            ExecNode::RecursiveUnion(node) => Some(node.stats()),
            ExecNode::Filter(node) => node.input.recursion_stats(),
            ExecNode::Project(node) => node.input.recursion_stats(),
            ExecNode::Limit(node) => node.input.recursion_stats(),
            ExecNode::Values(_) | ExecNode::WorkTableScan(_) => None,
        }
    }

    fn as_operator(&mut self) -> &mut dyn Operator {
        match self {
            ExecNode::Values(node) => node,
            ExecNode::Filter(node) => &mut **node,
            ExecNode::Project(node) => &mut **node,
            ExecNode::Limit(node) => &mut **node,
            ExecNode::WorkTableScan(node) => node,
            ExecNode::RecursiveUnion(node) => &mut **node,
        }
    }
}

impl Operator for ExecNode {
    fn schema(&self) -> &Schema {
        match self {
            ExecNode::Values(node) => node.schema(),
            ExecNode::Filter(node) => node.schema(),
            ExecNode::Project(node) => node.schema(),
            ExecNode::Limit(node) => node.schema(),
            ExecNode::WorkTableScan(node) => node.schema(),
            ExecNode::RecursiveUnion(node) => node.schema(),
        }
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>> {
        self.as_operator().next(ctx)
    }

    fn rescan(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.as_operator().rescan(ctx)
    }

    fn close(&mut self, ctx: &mut ExecContext) {
        self.as_operator().close(ctx)
    }
}

/// Output schema of a projection over `input`
pub(crate) fn project_schema(items: &[ProjectItem], input: &Schema, params: &ParamTable) -> Result<Schema> {
    let evaluator = ExprEvaluator::new();
    let columns = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let ty = evaluator.infer_type(&item.expr, input, params)?;
            Ok(ColumnDef::new(item.alias.clone(), ty, i))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Schema::new(columns))
}

/// Qual + projection applied by scan operators to each fetched row
pub struct ScanProjection {
    qual: Option<Expr>,
    targets: Option<Vec<ProjectItem>>,
    result_schema: Schema,
    bound: bool,
    evaluator: ExprEvaluator,
}

impl ScanProjection {
    /// Result shape is derived from the declared scan shape; expressions are
    /// checked against the real shape later, in `bind`
    pub fn new(
        qual: Option<Expr>,
        targets: Option<Vec<ProjectItem>>,
        declared: &Schema,
        params: &ParamTable,
    ) -> Result<Self> {
        let result_schema = match &targets {
            Some(items) => project_schema(items, declared, params)?,
            None => declared.clone(),
        };
        Ok(Self {
            qual,
            targets,
            result_schema,
            bound: false,
            evaluator: ExprEvaluator::new(),
        })
    }

    pub fn result_schema(&self) -> &Schema {
        &self.result_schema
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Finish setup once the scanned row shape is known
    pub fn bind(&mut self, scan_schema: &Schema, params: &ParamTable) -> Result<()> {
        if let Some(qual) = &self.qual {
            self.evaluator.infer_type(qual, scan_schema, params)?;
        }
        if let Some(items) = &self.targets {
            let bound = project_schema(items, scan_schema, params)?;
            if !bound.is_compatible(&self.result_schema) {
                return Err(crate::error::ExecError::Query(format!(
                    "scan projection changed shape after binding: {:?} vs {:?}",
                    bound.columns, self.result_schema.columns
                )));
            }
        }
        self.bound = true;
        Ok(())
    }

    /// `None` when the qual rejects the row
    pub fn apply(&self, row: Row, params: &ParamTable) -> Result<Option<Row>> {
        debug_assert!(self.bound, "scan projection used before bind");
        if let Some(qual) = &self.qual {
            if !self.evaluator.eval_predicate(qual, &row, params)? {
                return Ok(None);
            }
        }
        match &self.targets {
            None => Ok(Some(row)),
            Some(items) => items
                .iter()
                .map(|item| self.evaluator.eval(&item.expr, &row, params))
                .collect::<Result<Row>>()
                .map(Some),
        }
    }
}

/// Literal rows
pub struct ValuesScan {
    schema: Schema,
    rows: Vec<Row>,
    pos: usize,
}

impl ValuesScan {
    pub fn open(schema: Schema, rows: Vec<Row>) -> Result<Self> {
        let rows = rows
            .into_iter()
            .map(|row| schema.coerce_row(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { schema, rows, pos: 0 })
    }
}

impl Operator for ValuesScan {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, _ctx: &mut ExecContext) -> Result<Option<Row>> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }

    fn rescan(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self, _ctx: &mut ExecContext) {
        self.rows.clear();
        self.pos = 0;
    }
}

/// WHERE over an arbitrary input
pub struct FilterNode {
    input: ExecNode,
    predicate: Expr,
    evaluator: ExprEvaluator,
}

impl FilterNode {
    /// Closes `input` if the predicate does not fit its shape
    pub fn open(mut input: ExecNode, predicate: Expr, ctx: &mut ExecContext) -> Result<Self> {
        let evaluator = ExprEvaluator::new();
        if let Err(e) = evaluator.infer_type(&predicate, input.schema(), ctx.params()) {
            input.close(ctx);
            return Err(e);
        }
        Ok(Self { input, predicate, evaluator })
    }
}

impl Operator for FilterNode {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>> {
        while let Some(row) = self.input.next(ctx)? {
            if self.evaluator.eval_predicate(&self.predicate, &row, ctx.params())? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn rescan(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.input.rescan(ctx)
    }

    fn close(&mut self, ctx: &mut ExecContext) {
        self.input.close(ctx)
    }
}

/// SELECT list over an arbitrary input
pub struct ProjectNode {
    input: ExecNode,
    items: Vec<ProjectItem>,
    schema: Schema,
    evaluator: ExprEvaluator,
}

impl ProjectNode {
    /// Closes `input` if an item does not fit its shape
    pub fn open(mut input: ExecNode, items: Vec<ProjectItem>, ctx: &mut ExecContext) -> Result<Self> {
        let schema = match project_schema(&items, input.schema(), ctx.params()) {
            Ok(schema) => schema,
            Err(e) => {
                input.close(ctx);
                return Err(e);
            }
        };
        Ok(Self {
            input,
            items,
            schema,
            evaluator: ExprEvaluator::new(),
        })
    }
}

impl Operator for ProjectNode {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let projected = self
            .items
            .iter()
            .map(|item| self.evaluator.eval(&item.expr, &row, ctx.params()))
            .collect::<Result<Row>>()?;
        Ok(Some(projected))
    }

    fn rescan(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.input.rescan(ctx)
    }

    fn close(&mut self, ctx: &mut ExecContext) {
        self.input.close(ctx)
    }
}

/// LIMIT / OFFSET. Stops pulling its input once the limit is reached,
/// which is how callers bound an otherwise endless recursion.
pub struct LimitNode {
    input: ExecNode,
    limit: Option<usize>,
    offset: usize,
    skipped: usize,
    emitted: usize,
}

impl LimitNode {
    pub fn new(input: ExecNode, limit: Option<usize>, offset: usize) -> Self {
        Self {
            input,
            limit,
            offset,
            skipped: 0,
            emitted: 0,
        }
    }
}

impl Operator for LimitNode {
    fn schema(&self) -> &Schema {
        self.input.schema()
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        while self.skipped < self.offset {
            if self.input.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        let row = self.input.next(ctx)?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    fn rescan(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.skipped = 0;
        self.emitted = 0;
        self.input.rescan(ctx)
    }

    fn close(&mut self, ctx: &mut ExecContext) {
        self.input.close(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::query::binding::{ParamId, ParamSlot};
    use crate::query::expr::BinaryOperator;
    use crate::query::planner::{QueryPlanner, UnionMode};
    use crate::types::{ColumnType, Value};

    fn ints(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![Value::Integer(*v)]).collect()
    }

    fn drain(node: &mut ExecNode, ctx: &mut ExecContext) -> Vec<Row> {
        let mut out = Vec::new();
        while let Some(row) = node.next(ctx).unwrap() {
            out.push(row);
        }
        out
    }

    #[test]
    fn test_filter_project_limit_pipeline() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let plan = ExecutionPlan::values(schema, ints(&[1, 2, 3, 4, 5, 6]))
            .with_filter(Expr::col(0).modulo(Expr::lit(2)).equals(Expr::lit(0)))
            .with_project(vec![
                ProjectItem::new(Expr::col(0).mul(Expr::lit(10)), "tens"),
                ProjectItem::new(Expr::col(0).concat(Expr::lit("!")), "label"),
            ])
            .with_limit_offset(Some(1), 1);

        let mut ctx = ExecContext::new(ExecutorConfig::default(), 0);
        let mut node = ExecNode::open(&plan, &mut ctx, ExecFlags::empty()).unwrap();

        assert_eq!(node.schema().column_count(), 2);
        assert_eq!(node.schema().columns[0].col_type, ColumnType::Integer);
        assert_eq!(node.schema().columns[1].col_type, ColumnType::Text);
        assert_eq!(
            drain(&mut node, &mut ctx),
            vec![vec![Value::Integer(40), Value::Text("4!".into())]]
        );

        node.rescan(&mut ctx).unwrap();
        assert_eq!(drain(&mut node, &mut ctx).len(), 1);
        assert!(node.recursion_stats().is_none());
        node.close(&mut ctx);
    }

    #[test]
    fn test_values_rejects_mistyped_rows() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let plan = ExecutionPlan::values(schema, vec![vec![Value::Text("x".into())]]);
        let mut ctx = ExecContext::new(ExecutorConfig::default(), 0);
        assert!(ExecNode::open(&plan, &mut ctx, ExecFlags::empty()).is_err());
    }

    #[test]
    fn test_values_widen_integers_in_float_columns() {
        let schema = Schema::from_pairs(&[("w", ColumnType::Float)]);
        let plan = ExecutionPlan::values(schema, ints(&[3]))
            .with_project(vec![ProjectItem::new(
                Expr::col(0).binary(BinaryOperator::Div, Expr::lit(2)),
                "half",
            )]);
        let mut ctx = ExecContext::new(ExecutorConfig::default(), 0);
        let mut node = ExecNode::open(&plan, &mut ctx, ExecFlags::empty()).unwrap();
        assert_eq!(node.schema().columns[0].col_type, ColumnType::Float);
        assert_eq!(drain(&mut node, &mut ctx), vec![vec![Value::Float(1.5)]]);
    }

    #[test]
    fn test_failed_filter_open_closes_nested_recursion() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let mut planner = QueryPlanner::new();
        let plan = planner
            .plan_recursive_union(
                schema.clone(),
                UnionMode::All,
                ExecutionPlan::values(schema, ints(&[1])),
                |_, wt| Ok(wt.scan_with(Some(Expr::col(0).lt(Expr::lit(3))), None)),
            )
            .unwrap()
            .with_filter(Expr::col(5).is_null());

        let mut ctx = ExecContext::new(ExecutorConfig::default(), plan.param_count());
        assert!(ExecNode::open(&plan, &mut ctx, ExecFlags::empty()).is_err());
        assert!(matches!(ctx.params().get(ParamId(0)), ParamSlot::Unset));
    }

    #[test]
    fn test_failed_project_open_closes_nested_recursion() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let mut planner = QueryPlanner::new();
        let plan = planner
            .plan_recursive_union(
                schema.clone(),
                UnionMode::All,
                ExecutionPlan::values(schema, ints(&[1])),
                |_, wt| Ok(wt.scan_with(Some(Expr::col(0).lt(Expr::lit(3))), None)),
            )
            .unwrap()
            .with_project(vec![ProjectItem::new(Expr::col(0).concat(Expr::col(9)), "s")]);

        let mut ctx = ExecContext::new(ExecutorConfig::default(), plan.param_count());
        assert!(ExecNode::open(&plan, &mut ctx, ExecFlags::empty()).is_err());
        assert!(matches!(ctx.params().get(ParamId(0)), ParamSlot::Unset));
    }

    #[test]
    fn test_filter_rejects_unknown_column() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer)]);
        let plan = ExecutionPlan::values(schema, ints(&[1])).with_filter(Expr::col(3).is_null());
        let mut ctx = ExecContext::new(ExecutorConfig::default(), 0);
        assert!(ExecNode::open(&plan, &mut ctx, ExecFlags::empty()).is_err());
    }
}
