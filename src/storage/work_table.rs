//! Working-table store: append-only tuple buffer with one forward cursor
//!
//! A recursive union owns two of these. One is in the write role and
//! collects the rows of the running iteration; the other is in the read
//! role and feeds the working-table scans of the recursive term.
//!
//! ## Layout
//! ```text
//! [spilled block 0] [spilled block 1] ... [resident rows]
//!  ^ oldest rows                            ^ newest rows
//! ```
//! Once the resident rows exceed `work_mem_bytes` they are written to the
//! spill file as one block. The cursor walks spilled blocks first, then the
//! resident tail, so spilling never changes the read order.

use super::spill::SpillFile;
use crate::config::WorkTableConfig;
use crate::error::Result;
use crate::types::{row_size, Row};

/// Role of a store within one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// Accumulating the current iteration's output
    Write,
    /// Readable by working-table scans
    Read,
}

/// Scan direction requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkTableStats {
    pub rows: usize,
    pub resident_rows: usize,
    pub resident_bytes: usize,
    pub spilled_blocks: usize,
    pub spilled_bytes: u64,
}

// Position (block, offset). block == spilled block count means the resident
// buffer, so a spill of the resident rows leaves a cursor pointing at the
// same row.
#[derive(Debug, Default)]
struct Cursor {
    block: usize,
    offset: usize,
    loaded: Option<Vec<Row>>,
}

pub struct WorkTableStore {
    config: WorkTableConfig,
    role: StoreRole,
    resident: Vec<Row>,
    resident_bytes: usize,
    spill: Option<SpillFile>,
    cursor: Cursor,
    len: usize,
}

impl WorkTableStore {
    pub fn new(config: WorkTableConfig, role: StoreRole) -> Self {
        Self {
            config,
            role,
            resident: Vec::new(),
            resident_bytes: 0,
            spill: None,
            cursor: Cursor::default(),
            len: 0,
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    pub fn set_role(&mut self, role: StoreRole) {
        self.role = role;
    }

    /// Append a row at the end. Only valid in the write role.
    pub fn append(&mut self, row: Row) -> Result<()> {
        assert_eq!(
            self.role,
            StoreRole::Write,
            "append to a working table in the read role"
        );

        self.resident_bytes += row_size(&row);
        self.resident.push(row);
        self.len += 1;

        if self.resident_bytes > self.config.work_mem_bytes {
            self.spill_resident()?;
        }
        Ok(())
    }

    /// Reset the read position to the first row
    pub fn open_cursor(&mut self) {
        self.cursor = Cursor::default();
    }

    /// Next row in insertion order
    pub fn next(&mut self) -> Result<Option<Row>> {
        self.fetch(ScanDirection::Forward)
    }

    /// Fetch the next row in `direction`. Backward scans are not supported.
    pub fn fetch(&mut self, direction: ScanDirection) -> Result<Option<Row>> {
        assert_eq!(
            direction,
            ScanDirection::Forward,
            "working table does not support backward scan"
        );

        loop {
            let spilled_blocks = self.spill.as_ref().map_or(0, SpillFile::block_count);

            if self.cursor.block < spilled_blocks {
                if self.cursor.loaded.is_none() {
                    if let Some(spill) = self.spill.as_mut() {
                        self.cursor.loaded = Some(spill.read_block(self.cursor.block)?);
                    }
                }
                let offset = self.cursor.offset;
                if let Some(row) = self.cursor.loaded.as_ref().and_then(|rows| rows.get(offset)) {
                    self.cursor.offset += 1;
                    return Ok(Some(row.clone()));
                }
                self.cursor.loaded = None;
                self.cursor.block += 1;
                self.cursor.offset = 0;
                continue;
            }

            return Ok(match self.resident.get(self.cursor.offset) {
                Some(row) => {
                    self.cursor.offset += 1;
                    Some(row.clone())
                }
                None => None,
            });
        }
    }

    /// Discard every row and the spill file
    pub fn clear(&mut self) {
        self.resident = Vec::new();
        self.resident_bytes = 0;
        self.spill = None;
        self.cursor = Cursor::default();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    pub fn stats(&self) -> WorkTableStats {
        WorkTableStats {
            rows: self.len,
            resident_rows: self.resident.len(),
            resident_bytes: self.resident_bytes,
            spilled_blocks: self.spill.as_ref().map_or(0, SpillFile::block_count),
            spilled_bytes: self.spill.as_ref().map_or(0, SpillFile::bytes_written),
        }
    }

    fn spill_resident(&mut self) -> Result<()> {
        if self.spill.is_none() {
            self.spill = Some(SpillFile::create(
                self.config.spill_dir.as_deref(),
                self.config.spill_compression,
            )?);
        }
        if let Some(spill) = self.spill.as_mut() {
            let block = spill.write_block(&self.resident)?;
            log::debug!(
                "[WorkTable] spilled block {} ({} rows, {} bytes resident)",
                spill.block_count() - 1,
                block.rows,
                self.resident_bytes
            );
        }
        self.resident.clear();
        self.resident_bytes = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::TempDir;

    fn row(i: i64) -> Row {
        vec![Value::Integer(i), Value::Text(format!("row-{}", i))]
    }

    fn drain(store: &mut WorkTableStore) -> Vec<Row> {
        let mut out = Vec::new();
        while let Some(r) = store.next().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_append_and_read_in_order() {
        let mut store = WorkTableStore::new(WorkTableConfig::default(), StoreRole::Write);
        for i in 0..5 {
            store.append(row(i)).unwrap();
        }
        assert_eq!(store.len(), 5);
        assert!(!store.is_spilled());

        let rows = drain(&mut store);
        assert_eq!(rows, (0..5).map(row).collect::<Vec<_>>());
        // Stays at end-of-data
        assert!(store.next().unwrap().is_none());
    }

    #[test]
    fn test_rescan_replays_identical_sequence() {
        let mut store = WorkTableStore::new(WorkTableConfig::default(), StoreRole::Write);
        for i in 0..20 {
            store.append(row(i)).unwrap();
        }
        store.set_role(StoreRole::Read);

        let first = drain(&mut store);
        store.open_cursor();
        let second = drain(&mut store);
        assert_eq!(first, second);
        assert_eq!(store.len(), 20);
    }

    #[test]
    fn test_spill_is_transparent_to_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let config = WorkTableConfig::for_testing().with_spill_dir(temp_dir.path());
        let mut store = WorkTableStore::new(config, StoreRole::Write);
        for i in 0..200 {
            store.append(row(i)).unwrap();
        }

        let stats = store.stats();
        assert!(store.is_spilled());
        assert!(stats.spilled_blocks > 1);
        assert!(stats.spilled_bytes > 0);
        assert_eq!(stats.rows, 200);

        store.set_role(StoreRole::Read);
        let expected: Vec<Row> = (0..200).map(row).collect();
        assert_eq!(drain(&mut store), expected);
        store.open_cursor();
        assert_eq!(drain(&mut store), expected);
    }

    #[test]
    fn test_cursor_survives_spill_of_resident_rows() {
        let mut store = WorkTableStore::new(WorkTableConfig::for_testing(), StoreRole::Write);
        store.append(row(0)).unwrap();
        assert_eq!(store.next().unwrap(), Some(row(0)));

        // Enough appends to push row 0 into a spilled block
        for i in 1..50 {
            store.append(row(i)).unwrap();
        }
        assert!(store.is_spilled());

        let rest = drain(&mut store);
        assert_eq!(rest, (1..50).map(row).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear_discards_rows_and_spill() {
        let mut store = WorkTableStore::new(WorkTableConfig::for_testing(), StoreRole::Write);
        for i in 0..100 {
            store.append(row(i)).unwrap();
        }
        assert!(store.is_spilled());

        store.clear();
        assert!(store.is_empty());
        assert!(!store.is_spilled());
        assert_eq!(store.stats(), WorkTableStats::default());
        assert!(store.next().unwrap().is_none());

        store.append(row(7)).unwrap();
        assert_eq!(drain(&mut store), vec![row(7)]);
    }

    #[test]
    fn test_spill_allocation_failure_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let not_a_dir = temp_dir.path().join("spill");
        std::fs::write(&not_a_dir, b"x").unwrap();

        let config = WorkTableConfig::for_testing().with_spill_dir(&not_a_dir);
        let mut store = WorkTableStore::new(config, StoreRole::Write);
        let err = (0..100).find_map(|i| store.append(row(i)).err());
        assert!(matches!(err, Some(crate::error::ExecError::ResourceExhausted(_))));
    }

    #[test]
    #[should_panic(expected = "backward scan")]
    fn test_backward_fetch_faults() {
        let mut store = WorkTableStore::new(WorkTableConfig::default(), StoreRole::Read);
        let _ = store.fetch(ScanDirection::Backward);
    }

    #[test]
    #[should_panic(expected = "read role")]
    fn test_append_in_read_role_faults() {
        let mut store = WorkTableStore::new(WorkTableConfig::default(), StoreRole::Read);
        let _ = store.append(row(1));
    }
}
