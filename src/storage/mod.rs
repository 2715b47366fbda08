//! Storage layer for recursive evaluation
//!
//! Working-table buffers and their spill files. Nothing here is persisted
//! beyond the query that created it.

pub mod spill;
pub mod work_table;

pub use spill::{SpillBlockRef, SpillFile};
pub use work_table::{ScanDirection, StoreRole, WorkTableStats, WorkTableStore};
