use crate::layout::{Geometry, SB_MAGIC};

use log::warn;
use std::convert::TryInto;
use std::fmt;

/// Bytes of the superblock carrying fields; the rest of block 0 is reserved.
pub const SB_ENCODED_LEN: usize = 34;

/// The first block of the file system storing the image geometry. It is read
/// once when the image is opened and never written back by the checker.
///
/// On disk the fields are packed little endian with no padding, in declaration
/// order, followed by a reserved area running to the end of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Format sentinel, `SB_MAGIC` for supported images.
    pub magic: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub inode_bitmap_block: u32,
    pub data_bitmap_block: u32,
    pub inode_table_start: u32,
    pub data_block_start: u32,
    pub inode_size: u32,
    pub inode_count: u32,
}

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

impl SuperBlock {
    /// Describes `geo` with the supported magic number.
    pub fn new(geo: &Geometry) -> Self {
        Self {
            magic: SB_MAGIC,
            block_size: geo.block_size as u32,
            total_blocks: geo.total_blocks as u32,
            inode_bitmap_block: geo.inode_bitmap_block as u32,
            data_bitmap_block: geo.data_bitmap_block as u32,
            inode_table_start: geo.inode_table_start as u32,
            data_block_start: geo.data_block_start as u32,
            inode_size: geo.inode_size as u32,
            inode_count: geo.inode_count as u32,
        }
    }

    /// Reads the super block from the start of a block buffer. No field is
    /// checked here, see [`SuperBlock::validate`]. Passing a slice shorter than
    /// the encoded record will result in a panic.
    pub fn parse(buf: &[u8]) -> Self {
        assert!(
            buf.len() >= SB_ENCODED_LEN,
            "Buffer too short to hold a superblock."
        );
        Self {
            magic: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            block_size: u32_at(buf, 2),
            total_blocks: u32_at(buf, 6),
            inode_bitmap_block: u32_at(buf, 10),
            data_bitmap_block: u32_at(buf, 14),
            inode_table_start: u32_at(buf, 18),
            data_block_start: u32_at(buf, 22),
            inode_size: u32_at(buf, 26),
            inode_count: u32_at(buf, 30),
        }
    }

    /// Serializes the SuperBlock into a `block_size` buffer for writing to disk,
    /// zero filling the reserved area.
    pub fn serialize(&self, block_size: usize) -> Vec<u8> {
        let mut sb_encoded = Vec::with_capacity(block_size);
        sb_encoded.extend_from_slice(&self.magic.to_le_bytes());
        for field in [
            self.block_size,
            self.total_blocks,
            self.inode_bitmap_block,
            self.data_bitmap_block,
            self.inode_table_start,
            self.data_block_start,
            self.inode_size,
            self.inode_count,
        ] {
            sb_encoded.extend_from_slice(&field.to_le_bytes());
        }
        sb_encoded.resize(block_size.max(SB_ENCODED_LEN), 0);
        sb_encoded
    }

    /// Compares magic number, block size and block count against `expected`.
    /// Mismatches are reported, never corrected.
    pub fn validate(&self, expected: &Geometry) -> ValidationReport {
        let checks = vec![
            FieldCheck {
                field: Field::Magic,
                observed: self.magic as u32,
                expected: SB_MAGIC as u32,
            },
            FieldCheck {
                field: Field::BlockSize,
                observed: self.block_size,
                expected: expected.block_size as u32,
            },
            FieldCheck {
                field: Field::TotalBlocks,
                observed: self.total_blocks,
                expected: expected.total_blocks as u32,
            },
        ];
        for check in checks.iter().filter(|c| !c.is_ok()) {
            warn!("superblock: {}", check);
        }
        ValidationReport { checks }
    }
}

/// Superblock fields that are checked against the supported format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Magic,
    BlockSize,
    TotalBlocks,
}

/// Outcome of checking one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCheck {
    pub field: Field,
    pub observed: u32,
    pub expected: u32,
}

impl FieldCheck {
    pub fn is_ok(&self) -> bool {
        self.observed == self.expected
    }
}

impl fmt::Display for FieldCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.field, self.is_ok()) {
            (Field::Magic, true) => write!(f, "Magic number OK"),
            (Field::Magic, false) => write!(f, "Invalid magic number: 0x{:x}", self.observed),
            (Field::BlockSize, true) => write!(f, "Block size OK: {}", self.observed),
            (Field::BlockSize, false) => write!(f, "Invalid block size: {}", self.observed),
            (Field::TotalBlocks, true) => write!(f, "Total blocks OK: {}", self.observed),
            (Field::TotalBlocks, false) => write!(f, "Invalid total blocks: {}", self.observed),
        }
    }
}

/// One line per checked superblock field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub checks: Vec<FieldCheck>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(FieldCheck::is_ok)
    }
}
