//! Image geometry.
//!
//! A VSFS image is a flat run of equal sized blocks:
//!
//! ```text
//! ==================================================================================
//! | SuperBlock | Bitmap (inodes) | Bitmap (data region) | Inode table | Data region |
//! |     0      |        1        |          2           |    3..8     |    8..64    |
//! ==================================================================================
//! ```
use crate::fs::FsckError;
use crate::node::INODE_SIZE;

/// 4k is a common block size for file systems. Disks commonly are composed of
/// 512 byte blocks mapping each file system block to 8 hard disk blocks.
pub const BLOCK_SIZE: usize = 4096;

/// Identifies the on-disk format version.
pub const SB_MAGIC: u16 = 0xD34D;

/// Where everything lives on an image. All indices are block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: usize,
    pub total_blocks: usize,
    pub inode_bitmap_block: usize,
    pub data_bitmap_block: usize,
    pub inode_table_start: usize,
    pub data_block_start: usize,
    pub inode_size: usize,
    pub inode_count: usize,
}

impl Geometry {
    /// The fixed 64 block layout: one super block, one inode bitmap, one data
    /// block bitmap, five inode blocks and 56 blocks for data storage.
    pub const VSFS: Geometry = Geometry {
        block_size: BLOCK_SIZE,
        total_blocks: 64,
        inode_bitmap_block: 1,
        data_bitmap_block: 2,
        inode_table_start: 3,
        data_block_start: 8,
        inode_size: INODE_SIZE,
        inode_count: 5 * (BLOCK_SIZE / INODE_SIZE),
    };

    pub fn inodes_per_block(&self) -> usize {
        self.block_size / self.inode_size
    }

    /// Number of blocks the inode table spans.
    pub fn inode_table_blocks(&self) -> usize {
        (self.inode_count + self.inodes_per_block() - 1) / self.inodes_per_block()
    }

    /// Block holding inode `inum` and the byte offset of its record inside that block.
    pub fn inode_location(&self, inum: usize) -> (usize, usize) {
        let ipb = self.inodes_per_block();
        (
            self.inode_table_start + inum / ipb,
            (inum % ipb) * self.inode_size,
        )
    }

    /// True when `block` may legally be named by an inode's data pointer.
    pub fn is_data_block(&self, block: u32) -> bool {
        let block = block as usize;
        block >= self.data_block_start && block < self.total_blocks
    }

    /// Upper bound on repair rounds. Each round that changes anything moves at
    /// least one of `inode_count + total_blocks` bits to its final value, plus one
    /// round to observe that nothing changed.
    pub fn default_max_rounds(&self) -> usize {
        self.inode_count + self.total_blocks + 1
    }

    /// Rejects geometries the checker cannot operate on.
    pub fn validate(&self) -> Result<(), FsckError> {
        let invalid = |msg: String| Err(FsckError::InvalidArgument(msg));

        if self.block_size == 0 || self.total_blocks == 0 || self.inode_count == 0 {
            return invalid(format!(
                "block size, block count and inode count must be non-zero: {:?}",
                self
            ));
        }
        if self.inode_size != INODE_SIZE {
            return invalid(format!(
                "inode size must be {} bytes, got {}",
                INODE_SIZE, self.inode_size
            ));
        }
        if self.block_size % self.inode_size != 0 {
            return invalid(format!(
                "block size {} is not a multiple of the inode size {}",
                self.block_size, self.inode_size
            ));
        }
        let bits_per_block = self.block_size * 8;
        if self.inode_count > bits_per_block || self.total_blocks > bits_per_block {
            return invalid(format!(
                "a single bitmap block tracks at most {} entries",
                bits_per_block
            ));
        }
        let table_end = self.inode_table_start + self.inode_table_blocks();
        if table_end > self.data_block_start {
            return invalid(format!(
                "inode table ends at block {} past the data region start {}",
                table_end, self.data_block_start
            ));
        }
        if self.data_block_start > self.total_blocks {
            return invalid(format!(
                "data region starts at block {} past the end of the image ({} blocks)",
                self.data_block_start, self.total_blocks
            ));
        }
        let metadata = [
            ("inode bitmap", self.inode_bitmap_block),
            ("data bitmap", self.data_bitmap_block),
        ];
        for (name, block) in metadata.iter() {
            let in_table = *block >= self.inode_table_start && *block < table_end;
            if in_table || *block >= self.data_block_start {
                return invalid(format!(
                    "{} block {} overlaps the inode table or data region",
                    name, block
                ));
            }
        }
        if self.inode_bitmap_block == self.data_bitmap_block {
            return invalid("inode and data bitmaps share a block".to_string());
        }
        Ok(())
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry::VSFS
    }
}
