//! Working-table scan
//!
//! Leaf of the recursive term. Reads the rows of the previous iteration out of
//! the read-role store of the enclosing recursive union. The store is not
//! reachable at open time: the scan finds it through its param slot on the
//! first pull, after the union has published it.

use super::binding::{self, ParamId, WorkTableHandle};
use super::context::{ExecContext, ExecFlags};
use super::expr::Expr;
use super::node::{Operator, ScanProjection};
use super::planner::ProjectItem;
use crate::error::{ExecError, Result};
use crate::types::{Row, Schema};

pub struct WorkTableScan {
    param: ParamId,
    declared: Schema,
    projection: ScanProjection,
    handle: Option<WorkTableHandle>,
}

impl WorkTableScan {
    /// # Panics
    ///
    /// If the parent asks for backward scan or mark/restore.
    pub fn open(
        param: ParamId,
        declared: Schema,
        qual: Option<Expr>,
        targets: Option<Vec<ProjectItem>>,
        ctx: &ExecContext,
        flags: ExecFlags,
    ) -> Result<Self> {
        assert!(
            !flags.intersects(ExecFlags::BACKWARD | ExecFlags::MARK),
            "working table scan does not support backward scan or mark/restore"
        );
        let projection = ScanProjection::new(qual, targets, &declared, ctx.params())?;
        Ok(Self {
            param,
            declared,
            projection,
            handle: None,
        })
    }

    pub fn param(&self) -> ParamId {
        self.param
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    fn bind(&mut self, ctx: &ExecContext) -> Result<WorkTableHandle> {
        let handle = binding::resolve(ctx.params(), self.param);
        {
            let state = handle.lock();
            if !state.schema.is_compatible(&self.declared) {
                return Err(ExecError::Query(format!(
                    "working table {} has shape {:?}, scan expects {:?}",
                    self.param, state.schema.columns, self.declared.columns
                )));
            }
            self.projection.bind(&state.schema, ctx.params())?;
        }
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

impl Operator for WorkTableScan {
    fn schema(&self) -> &Schema {
        self.projection.result_schema()
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => self.bind(ctx)?,
        };

        loop {
            let row = handle.lock().read_store.next()?;
            let Some(row) = row else {
                return Ok(None);
            };
            if let Some(out) = self.projection.apply(row, ctx.params())? {
                return Ok(Some(out));
            }
        }
    }

    fn rescan(&mut self, _ctx: &mut ExecContext) -> Result<()> {
        // Unbound: the first pull starts from the first row anyway
        if let Some(handle) = &self.handle {
            handle.lock().read_store.open_cursor();
        }
        Ok(())
    }

    fn close(&mut self, _ctx: &mut ExecContext) {
        self.handle = None;
    }
}
