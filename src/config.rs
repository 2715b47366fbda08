//! Executor configuration and working-table memory budgets
//!
//! Provides knobs for trading memory against spill I/O during recursive evaluation.

use crate::error::{ExecError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Working-table store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkTableConfig {
    /// Resident row budget per store (bytes)
    ///
    /// 工作表内存预算：超过后整块溢写到临时文件
    ///
    /// - 4MB: 默认值
    /// - 64KB: 低内存设备（嵌入式）
    /// - 256B: 测试用，几乎每次追加都会触发溢写
    ///
    /// 每个递归查询有两个工作表（读/写），峰值内存约为 2 × work_mem_bytes
    pub work_mem_bytes: usize,

    /// Directory for spill files (None = OS temp dir)
    pub spill_dir: Option<PathBuf>,

    /// Snappy-compress spilled blocks
    ///
    /// 小于 1KB 的块或压缩后不变小的块按原样写入
    pub spill_compression: bool,
}

impl Default for WorkTableConfig {
    fn default() -> Self {
        Self {
            work_mem_bytes: 4 * 1024 * 1024, // 4MB
            spill_dir: None,
            spill_compression: true,
        }
    }
}

impl WorkTableConfig {
    /// Config for memory-constrained devices
    pub fn for_low_memory() -> Self {
        Self {
            work_mem_bytes: 64 * 1024,
            ..Default::default()
        }
    }

    /// Tiny budget so that even small tests exercise the spill path
    pub fn for_testing() -> Self {
        Self {
            work_mem_bytes: 256,
            spill_dir: None,
            spill_compression: true,
        }
    }

    /// Use a specific spill directory
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Working-table settings, shared by both stores of every recursive union
    pub work_table: WorkTableConfig,

    /// Rows buffered per `ResultIterator` refill
    pub batch_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            work_table: WorkTableConfig::default(),
            batch_size: 1000,
        }
    }
}

impl ExecutorConfig {
    /// Config for memory-constrained devices
    pub fn for_low_memory() -> Self {
        Self {
            work_table: WorkTableConfig::for_low_memory(),
            batch_size: 128,
        }
    }

    /// Test config (forces spilling)
    pub fn for_testing() -> Self {
        Self {
            work_table: WorkTableConfig::for_testing(),
            ..Default::default()
        }
    }

    /// Parse a complete config from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ExecutorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if self.work_table.work_mem_bytes == 0 {
            return Err(ExecError::Config("work_mem_bytes must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(ExecError::Config("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_presets() {
        let default = ExecutorConfig::default();
        assert_eq!(default.work_table.work_mem_bytes, 4 * 1024 * 1024);
        assert!(default.work_table.spill_compression);
        assert!(default.validate().is_ok());

        let low = ExecutorConfig::for_low_memory();
        assert!(low.work_table.work_mem_bytes < default.work_table.work_mem_bytes);

        let testing = ExecutorConfig::for_testing();
        assert_eq!(testing.work_table.work_mem_bytes, 256);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = ExecutorConfig {
            work_table: WorkTableConfig::default().with_spill_dir("/tmp/motedb-spill"),
            batch_size: 64,
        };
        let json = config.to_json().unwrap();
        let parsed = ExecutorConfig::from_json(&json).unwrap();
        assert_eq!(parsed.batch_size, 64);
        assert_eq!(parsed.work_table.spill_dir, Some(PathBuf::from("/tmp/motedb-spill")));
    }

    #[test]
    fn test_config_validation() {
        let json = r#"{"work_table":{"work_mem_bytes":0,"spill_dir":null,"spill_compression":false},"batch_size":10}"#;
        assert!(matches!(ExecutorConfig::from_json(json), Err(ExecError::Config(_))));

        assert!(matches!(ExecutorConfig::from_json("not json"), Err(ExecError::Config(_))));
    }
}
