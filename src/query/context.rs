//! Per-execution state shared by every operator of one plan

use super::binding::{ParamId, ParamSlot, ParamTable};
use crate::config::ExecutorConfig;
use crate::error::{ExecError, Result};
use crate::types::Value;
use bitflags::bitflags;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

bitflags! {
    /// Capabilities a parent requests from a child at open time
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecFlags: u32 {
        /// Parent may fetch backwards
        const BACKWARD = 0b0000_0001;
        /// Parent may mark/restore positions
        const MARK = 0b0000_0010;
        /// Parent may rescan
        const REWIND = 0b0000_0100;
    }
}

impl Default for ExecFlags {
    fn default() -> Self {
        ExecFlags::empty()
    }
}

/// Execution state: config, param table and the cancellation flag
pub struct ExecContext {
    config: ExecutorConfig,
    params: ParamTable,
    cancelled: Arc<AtomicBool>,
}

impl ExecContext {
    /// Create a context with `param_count` unset slots
    pub fn new(config: ExecutorConfig, param_count: usize) -> Self {
        Self {
            config,
            params: ParamTable::with_len(param_count),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamTable {
        &mut self.params
    }

    /// Bind a scalar query parameter
    pub fn set_param(&mut self, id: ParamId, value: Value) -> Result<()> {
        if id.0 >= self.params.len() {
            return Err(ExecError::InvalidArgument(format!(
                "param {} out of range ({} slots)",
                id,
                self.params.len()
            )));
        }
        if let ParamSlot::WorkTable(_) = self.params.get(id) {
            return Err(ExecError::InvalidArgument(format!(
                "param {} is reserved for a working table",
                id
            )));
        }
        self.params.set(id, ParamSlot::Datum(value));
        Ok(())
    }

    /// Flag another thread can set to abort the query
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the query was cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_flags() {
        let flags = ExecFlags::REWIND | ExecFlags::MARK;
        assert!(flags.contains(ExecFlags::REWIND));
        assert!(!flags.contains(ExecFlags::BACKWARD));
        assert!(flags.intersects(ExecFlags::BACKWARD | ExecFlags::MARK));
        assert_eq!(flags.difference(ExecFlags::MARK), ExecFlags::REWIND);
        assert_eq!(ExecFlags::default(), ExecFlags::empty());
        assert_eq!(ExecFlags::from_bits(0b1000), None);
    }

    #[test]
    fn test_set_param_and_cancel() {
        let mut ctx = ExecContext::new(ExecutorConfig::default(), 2);
        ctx.set_param(ParamId(0), Value::Integer(10)).unwrap();
        assert!(matches!(ctx.params().get(ParamId(0)), ParamSlot::Datum(Value::Integer(10))));
        assert!(ctx.set_param(ParamId(5), Value::Null).is_err());

        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel_handle().store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check_cancelled(), Err(ExecError::Cancelled)));
    }
}
