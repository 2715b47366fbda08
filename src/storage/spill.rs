//! Spill File: overflow storage for working-table rows
//!
//! ## Design
//! - Anonymous temp file, removed by the OS when dropped (never persisted)
//! - Rows are written in blocks, one block per spill of the resident buffer
//! - Blocks are read back whole, in write order
//!
//! ## File Format
//! ```text
//! [Header (magic + version)] [Block 1] [Block 2] ... [Block N]
//!
//! Each Block:
//!   [payload_len: u32] [flag: u8] [payload] [crc32: u32]
//!   flag 0 = raw bincode, flag 1 = snappy(bincode)
//! ```
use crate::error::{ExecError, Result};
use crate::types::Row;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

const SPILL_MAGIC: u32 = 0x5754_424C; // "WTBL"
const SPILL_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 8;

/// Blocks smaller than this are stored raw
const MIN_COMPRESS_SIZE: usize = 1024;

/// Location of one spilled block
#[derive(Debug, Clone, Copy)]
pub struct SpillBlockRef {
    pub offset: u64,
    pub payload_len: u32,
    pub rows: usize,
}

/// Append-only block file backing a spilled working table
pub struct SpillFile {
    file: File,
    blocks: Vec<SpillBlockRef>,
    end_offset: u64,
    compress: bool,
    total_rows: usize,
}

impl SpillFile {
    /// Allocate a spill file in `dir` (or the OS temp dir)
    pub fn create(dir: Option<&Path>, compress: bool) -> Result<Self> {
        let file = match dir {
            Some(dir) => std::fs::create_dir_all(dir).and_then(|_| tempfile::tempfile_in(dir)),
            None => tempfile::tempfile(),
        };
        let mut file = file.map_err(|e| {
            log::warn!("[SpillFile] cannot allocate spill file: {}", e);
            ExecError::ResourceExhausted(format!("cannot allocate spill file: {}", e))
        })?;

        file.write_all(&SPILL_MAGIC.to_le_bytes())?;
        file.write_all(&SPILL_VERSION.to_le_bytes())?;

        Ok(Self {
            file,
            blocks: Vec::new(),
            end_offset: HEADER_SIZE,
            compress,
            total_rows: 0,
        })
    }

    /// Write `rows` as one block at the end of the file
    pub fn write_block(&mut self, rows: &[Row]) -> Result<SpillBlockRef> {
        let encoded = bincode::serialize(rows)?;

        let (flag, payload) = if self.compress && encoded.len() >= MIN_COMPRESS_SIZE {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(&encoded)
                .map_err(|e| ExecError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Compression failed: {}", e),
                )))?;
            // Only use compressed if it's actually smaller
            if compressed.len() < encoded.len() {
                (1u8, compressed)
            } else {
                (0u8, encoded)
            }
        } else {
            (0u8, encoded)
        };

        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            ExecError::ResourceExhausted(format!("spill block of {} bytes exceeds 4GB", payload.len()))
        })?;

        // Write: len | flag | payload | crc32
        let mut buf = Vec::with_capacity(payload.len() + 9);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.push(flag);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

        self.file.seek(SeekFrom::Start(self.end_offset))?;
        self.file.write_all(&buf)?;

        let block = SpillBlockRef {
            offset: self.end_offset,
            payload_len,
            rows: rows.len(),
        };
        self.end_offset += buf.len() as u64;
        self.total_rows += rows.len();
        self.blocks.push(block);
        Ok(block)
    }

    /// Read block `index` back into rows
    pub fn read_block(&mut self, index: usize) -> Result<Vec<Row>> {
        let block = *self.blocks.get(index).ok_or_else(|| {
            ExecError::InvalidArgument(format!("spill block {} out of range ({} blocks)", index, self.blocks.len()))
        })?;

        self.file.seek(SeekFrom::Start(block.offset))?;

        let mut head = [0u8; 5];
        self.file.read_exact(&mut head)?;
        let payload_len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        if payload_len != block.payload_len {
            return Err(ExecError::Corruption(format!(
                "spill block {} length mismatch: expected {}, found {}",
                index, block.payload_len, payload_len
            )));
        }
        let flag = head[4];

        let mut payload = vec![0u8; payload_len as usize];
        self.file.read_exact(&mut payload)?;

        let mut crc_buf = [0u8; 4];
        self.file.read_exact(&mut crc_buf)?;
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return Err(ExecError::Corruption(format!("spill block {} CRC mismatch", index)));
        }

        let raw = match flag {
            0 => payload,
            1 => snap::raw::Decoder::new()
                .decompress_vec(&payload)
                .map_err(|e| ExecError::Corruption(format!("Decompression failed: {}", e)))?,
            _ => {
                return Err(ExecError::Corruption(format!("Unknown compression flag: {}", flag)));
            }
        };

        let rows: Vec<Row> = bincode::deserialize(&raw)?;
        if rows.len() != block.rows {
            return Err(ExecError::Corruption(format!(
                "spill block {} row count mismatch: expected {}, found {}",
                index, block.rows, rows.len()
            )));
        }
        Ok(rows)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Bytes written past the header
    pub fn bytes_written(&self) -> u64 {
        self.end_offset - HEADER_SIZE
    }
}
