//! Query execution engine

use super::binding::ParamId;
use super::context::{ExecContext, ExecFlags};
use super::node::{ExecNode, Operator};
use super::planner::ExecutionPlan;
use super::recursive_union::RecursionStats;
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::types::{Row, Schema, Value};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Fully materialized query result
pub struct ResultIterator {
    schema: Schema,
    rows: Vec<Row>,
    pos: usize,
    stats: Option<RecursionStats>,
}

impl ResultIterator {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows,
            pos: 0,
            stats: None,
        }
    }

    /// Get next row
    pub fn next(&mut self) -> Option<&Row> {
        if self.pos < self.rows.len() {
            let row = &self.rows[self.pos];
            self.pos += 1;
            Some(row)
        } else {
            None
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Stats of the top-level recursive union, if the plan has one
    pub fn recursion_stats(&self) -> Option<&RecursionStats> {
        self.stats.as_ref()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Volcano-style execution engine
pub struct ExecutionEngine {
    config: ExecutorConfig,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
        }
    }

    /// Create with a validated config
    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get batch size
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Open `plan` for streaming
    pub fn start(&self, plan: &ExecutionPlan) -> Result<QueryExecution> {
        self.start_with_params(plan, &[])
    }

    /// Open `plan` with scalar params bound before any operator opens
    pub fn start_with_params(&self, plan: &ExecutionPlan, params: &[(ParamId, Value)]) -> Result<QueryExecution> {
        let mut ctx = ExecContext::new(self.config.clone(), plan.param_count());
        for (id, value) in params {
            ctx.set_param(*id, value.clone())?;
        }

        let root = ExecNode::open(plan, &mut ctx, ExecFlags::REWIND)?;
        let schema = root.schema().clone();
        log::debug!(
            "[ExecutionEngine] started plan with {} param slots:\n{}",
            ctx.params().len(),
            plan.explain()
        );

        Ok(QueryExecution {
            ctx,
            root: Some(root),
            schema,
            batch_size: self.config.batch_size,
        })
    }

    /// Run `plan` to completion
    pub fn execute(&self, plan: &ExecutionPlan) -> Result<ResultIterator> {
        self.execute_with_params(plan, &[])
    }

    pub fn execute_with_params(&self, plan: &ExecutionPlan, params: &[(ParamId, Value)]) -> Result<ResultIterator> {
        let mut execution = self.start_with_params(plan, params)?;
        let mut rows = Vec::new();
        loop {
            let batch = execution.next_batch()?;
            if batch.is_empty() {
                break;
            }
            rows.extend(batch);
        }

        let mut result = ResultIterator::new(execution.schema().clone(), rows);
        result.stats = execution.recursion_stats().cloned();
        execution.close();
        Ok(result)
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A running query. Closed on drop, on the first error, or explicitly.
pub struct QueryExecution {
    ctx: ExecContext,
    root: Option<ExecNode>,
    schema: Schema,
    batch_size: usize,
}

impl QueryExecution {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Pull one row. After an error the execution is closed and returns `None`.
    pub fn next(&mut self) -> Result<Option<Row>> {
        let Some(root) = self.root.as_mut() else {
            return Ok(None);
        };
        match root.next(&mut self.ctx) {
            Ok(row) => Ok(row),
            Err(e) => {
                log::debug!("[ExecutionEngine] query failed: {}", e);
                self.close();
                Err(e)
            }
        }
    }

    /// Pull up to `batch_size` rows; empty at end-of-data
    pub fn next_batch(&mut self) -> Result<Vec<Row>> {
        let mut batch = Vec::with_capacity(self.batch_size.min(64));
        while batch.len() < self.batch_size {
            match self.next()? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Restart from the first row
    pub fn rescan(&mut self) -> Result<()> {
        match self.root.as_mut() {
            Some(root) => root.rescan(&mut self.ctx),
            None => Ok(()),
        }
    }

    /// Flag another thread can set to abort the query at the next pull
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.ctx.cancel_handle()
    }

    pub fn recursion_stats(&self) -> Option<&RecursionStats> {
        self.root.as_ref().and_then(ExecNode::recursion_stats)
    }

    pub fn is_closed(&self) -> bool {
        self.root.is_none()
    }

    pub fn close(&mut self) {
        if let Some(mut root) = self.root.take() {
            root.close(&mut self.ctx);
        }
    }
}

impl Drop for QueryExecution {
    fn drop(&mut self) {
        self.close();
    }
}
