//! Recursive union: fixpoint evaluation of a recursive query
//!
//! ```text
//! RecursiveUnion ──publish──> param slot <──resolve── WorkTableScan
//!   ├─ seed                                            (inside recursive)
//!   └─ recursive
//! ```
//!
//! Semi-naive evaluation. The seed rows form the first working table; each
//! iteration runs the recursive term against the previous iteration's rows
//! only, and its output becomes the next working table. The loop stops after
//! an iteration that contributes no rows. Rows stream to the parent as soon
//! as they are produced.
//!
//! The read store lives in the shared state the scans resolve; the write store
//! stays private to the union, so a scan can never see the running iteration.
//!
//! ## 迭代过程
//! 1. 种子项的结果直接写入读表，同时输出给上层
//! 2. 递归项只读上一轮的结果（读表），新结果写入写表
//! 3. 本轮无新行 → 到达不动点，结束；否则交换读写表，继续下一轮
//!
//! 不设迭代上限：无界的 UNION ALL 需要上层用 LIMIT 截断或取消查询

use super::binding::{self, ParamId, WorkTableHandle};
use super::context::{ExecContext, ExecFlags};
use super::node::{ExecNode, Operator};
use super::planner::{ExecutionPlan, UnionMode};
use crate::error::{ExecError, Result};
use crate::storage::{StoreRole, WorkTableStore};
use crate::types::{Row, Schema};
use ahash::AHashSet;

/// Counters of one recursive evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecursionStats {
    /// Rows produced by the seed term (after duplicate suppression)
    pub seed_rows: usize,
    /// Evaluations of the recursive term, including the final empty one
    pub iterations: usize,
    /// Rows contributed by each evaluation of the recursive term
    pub rows_per_iteration: Vec<usize>,
    /// Rows emitted to the parent
    pub total_rows: usize,
    /// Rows dropped by set semantics
    pub duplicates_suppressed: usize,
    /// Spill blocks written by both stores
    pub spilled_blocks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seed,
    Recursive,
    Done,
}

pub struct RecursiveUnion {
    param: ParamId,
    schema: Schema,
    mode: UnionMode,
    seed: ExecNode,
    recursive: ExecNode,
    shared: WorkTableHandle,
    write_store: WorkTableStore,
    seen: AHashSet<Row>,
    phase: Phase,
    iteration_rows: usize,
    stats: RecursionStats,
}

impl RecursiveUnion {
    /// Publish the working table, then open both children.
    ///
    /// # Panics
    ///
    /// If the parent asks for backward scan or mark/restore.
    pub fn open(
        param: ParamId,
        schema: Schema,
        mode: UnionMode,
        seed_plan: &ExecutionPlan,
        recursive_plan: &ExecutionPlan,
        ctx: &mut ExecContext,
        flags: ExecFlags,
    ) -> Result<Self> {
        assert!(
            !flags.intersects(ExecFlags::BACKWARD | ExecFlags::MARK),
            "recursive union does not support backward scan or mark/restore"
        );

        let config = ctx.config().work_table.clone();
        // Seed rows go straight into the store the first iteration reads
        let read_store = WorkTableStore::new(config.clone(), StoreRole::Write);
        let write_store = WorkTableStore::new(config, StoreRole::Write);
        let shared = WorkTableHandle::new(schema.clone(), read_store);

        // The recursive term resolves the slot lazily, but it must hold our
        // table before anything below us is opened.
        binding::publish(ctx.params_mut(), param, &shared);

        let (seed, recursive) = match Self::open_children(&schema, seed_plan, recursive_plan, ctx, flags) {
            Ok(children) => children,
            Err(e) => {
                binding::release(ctx.params_mut(), param);
                return Err(e);
            }
        };

        debug_log!(
            "[RecursiveUnion] opened {} ({:?}, {} columns)",
            param,
            mode,
            schema.column_count()
        );

        Ok(Self {
            param,
            schema,
            mode,
            seed,
            recursive,
            shared,
            write_store,
            seen: AHashSet::new(),
            phase: Phase::Seed,
            iteration_rows: 0,
            stats: RecursionStats::default(),
        })
    }

    fn open_children(
        schema: &Schema,
        seed_plan: &ExecutionPlan,
        recursive_plan: &ExecutionPlan,
        ctx: &mut ExecContext,
        flags: ExecFlags,
    ) -> Result<(ExecNode, ExecNode)> {
        let mut seed = ExecNode::open(seed_plan, ctx, flags)?;
        if let Err(e) = check_shape("non-recursive term", seed.schema(), schema) {
            seed.close(ctx);
            return Err(e);
        }

        let mut recursive = match ExecNode::open(recursive_plan, ctx, flags | ExecFlags::REWIND) {
            Ok(node) => node,
            Err(e) => {
                seed.close(ctx);
                return Err(e);
            }
        };
        if let Err(e) = check_shape("recursive term", recursive.schema(), schema) {
            recursive.close(ctx);
            seed.close(ctx);
            return Err(e);
        }
        Ok((seed, recursive))
    }

    pub fn param(&self) -> ParamId {
        self.param
    }

    pub fn stats(&self) -> &RecursionStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    // Set semantics: false when the row was already emitted
    fn admit(&mut self, row: &Row) -> bool {
        match self.mode {
            UnionMode::All => true,
            UnionMode::Distinct => {
                if self.seen.insert(row.clone()) {
                    true
                } else {
                    self.stats.duplicates_suppressed += 1;
                    false
                }
            }
        }
    }

    fn emit(&mut self) {
        self.iteration_rows += 1;
        self.stats.total_rows += 1;
    }

    fn finish_seed(&mut self) {
        let mut state = self.shared.lock();
        state.read_store.set_role(StoreRole::Read);
        state.read_store.open_cursor();
        self.stats.seed_rows = self.iteration_rows;
        self.stats.spilled_blocks += state.read_store.stats().spilled_blocks;
        drop(state);

        debug_log!(
            "[RecursiveUnion] {} seed produced {} rows",
            self.param,
            self.stats.seed_rows
        );
        self.iteration_rows = 0;
        self.phase = Phase::Recursive;
    }

    // End of one evaluation of the recursive term. Returns false at the fixpoint.
    fn finish_iteration(&mut self, ctx: &mut ExecContext) -> Result<bool> {
        self.stats.iterations += 1;
        self.stats.rows_per_iteration.push(self.iteration_rows);
        self.stats.spilled_blocks += self.write_store.stats().spilled_blocks;

        debug_log!(
            "[RecursiveUnion] {} iteration {} produced {} rows",
            self.param,
            self.stats.iterations,
            self.iteration_rows
        );

        if self.iteration_rows == 0 {
            self.phase = Phase::Done;
            log::debug!(
                "[RecursiveUnion] {} reached fixpoint: {:?}",
                self.param,
                self.stats
            );
            return Ok(false);
        }
        self.iteration_rows = 0;

        {
            let mut state = self.shared.lock();
            std::mem::swap(&mut state.read_store, &mut self.write_store);
            state.read_store.set_role(StoreRole::Read);
            state.read_store.open_cursor();
        }
        self.write_store.clear();
        self.write_store.set_role(StoreRole::Write);

        binding::publish(ctx.params_mut(), self.param, &self.shared);
        self.recursive.rescan(ctx)?;
        Ok(true)
    }

    fn reset_stores(&mut self) {
        let mut state = self.shared.lock();
        state.read_store.clear();
        state.read_store.set_role(StoreRole::Write);
        drop(state);
        self.write_store.clear();
        self.write_store.set_role(StoreRole::Write);
    }
}

fn check_shape(term: &str, actual: &Schema, declared: &Schema) -> Result<()> {
    if actual.is_compatible(declared) {
        Ok(())
    } else {
        Err(ExecError::Query(format!(
            "{} of the recursive query produces {:?}, expected {:?}",
            term, actual.columns, declared.columns
        )))
    }
}

impl Operator for RecursiveUnion {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self, ctx: &mut ExecContext) -> Result<Option<Row>> {
        loop {
            match self.phase {
                Phase::Done => return Ok(None),
                Phase::Seed => {
                    ctx.check_cancelled()?;
                    match self.seed.next(ctx)? {
                        Some(row) => {
                            let row = self.schema.coerce_row(row)?;
                            if !self.admit(&row) {
                                continue;
                            }
                            self.shared.lock().read_store.append(row.clone())?;
                            self.emit();
                            return Ok(Some(row));
                        }
                        None => self.finish_seed(),
                    }
                }
                Phase::Recursive => {
                    ctx.check_cancelled()?;
                    match self.recursive.next(ctx)? {
                        Some(row) => {
                            let row = self.schema.coerce_row(row)?;
                            if !self.admit(&row) {
                                continue;
                            }
                            self.write_store.append(row.clone())?;
                            self.emit();
                            return Ok(Some(row));
                        }
                        None => {
                            if !self.finish_iteration(ctx)? {
                                return Ok(None);
                            }
                        }
                    }
                }
            }
        }
    }

    fn rescan(&mut self, ctx: &mut ExecContext) -> Result<()> {
        self.reset_stores();
        self.seen.clear();
        self.stats = RecursionStats::default();
        self.iteration_rows = 0;
        self.phase = Phase::Seed;

        self.seed.rescan(ctx)?;
        binding::publish(ctx.params_mut(), self.param, &self.shared);
        self.recursive.rescan(ctx)
    }

    fn close(&mut self, ctx: &mut ExecContext) {
        self.seed.close(ctx);
        self.recursive.close(ctx);
        self.reset_stores();
        self.seen = AHashSet::new();
        self.phase = Phase::Done;
        binding::release(ctx.params_mut(), self.param);
        debug_log!("[RecursiveUnion] closed {}", self.param);
    }
}
