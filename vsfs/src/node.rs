use crate::io::BlockStorage;
use crate::layout::Geometry;

use std::io::{Error, ErrorKind};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size of one inode record in the table.
pub const INODE_SIZE: usize = 256;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, PartialEq, Eq)]
/// This structure __must be exactly 256 bytes.__
pub struct Inode {
  /// The file mode.
  pub mode: u32,
  /// The id of the owning user.
  pub uid: u32,
  /// The id of the owning group.
  pub gid: u32,
  /// The total size of the file in bytes.
  pub size: u32,
  pub access_time: u32,
  pub creation_time: u32,
  pub modification_time: u32,
  /// Non-zero once the file has been deleted.
  pub deletion_time: u32,
  /// The number of links to this file.
  pub links_count: u32,
  /// Number of data blocks held by the file.
  pub block_count: u32,
  /// The single data block owned by this file, 0 when none.
  pub direct_pointer: u32,
  // Indirect pointers are carried through untouched.
  pub single_indirect_pointer: u32,
  pub double_indirect_pointer: u32,
  pub triple_indirect_pointer: u32,
  reserved: [u8; 200],
}

const _: () = assert!(std::mem::size_of::<Inode>() == INODE_SIZE);

impl Default for Inode {
  fn default() -> Self {
    Self::new_zeroed()
  }
}

impl Inode {
  /// A live regular file owning `block`, or no block when `block` is 0.
  pub fn file(block: u32) -> Self {
    let mut node = Self::new_zeroed();
    node.mode = 0o100644;
    node.links_count = 1;
    node.direct_pointer = block;
    node.block_count = if block == 0 { 0 } else { 1 };
    node
  }

  /// A live inode has at least one link and has not been deleted.
  pub fn is_valid(&self) -> bool {
    self.links_count > 0 && self.deletion_time == 0
  }

  /// The block named by the direct pointer, if any.
  pub fn data_block(&self) -> Option<u32> {
    match self.direct_pointer {
      0 => None,
      block => Some(block),
    }
  }

  /// Drops the inode's claim on its data block.
  pub fn clear_data_block(&mut self) {
    self.direct_pointer = 0;
    self.block_count = 0;
  }
}

fn record_out_of_block(inum: usize) -> Error {
  Error::new(
    ErrorKind::InvalidData,
    format!("inode {} does not fit inside its table block", inum),
  )
}

/// Reads and writes inode records in place inside the inode table. Every access
/// moves the whole containing block so neighbouring records are preserved.
pub struct InodeTable {
  geometry: Geometry,
}

impl InodeTable {
  pub fn new(geometry: Geometry) -> Self {
    Self { geometry }
  }

  pub fn read<T: BlockStorage>(&self, dev: &mut T, inum: usize) -> std::io::Result<Inode> {
    let (block, offset) = self.geometry.inode_location(inum);
    let mut block_buf = vec![0; self.geometry.block_size];
    dev.read_block(block, &mut block_buf)?;

    block_buf
      .get(offset..offset + INODE_SIZE)
      .and_then(Inode::read_from)
      .ok_or_else(|| record_out_of_block(inum))
  }

  pub fn write<T: BlockStorage>(
    &self,
    dev: &mut T,
    inum: usize,
    node: &Inode,
  ) -> std::io::Result<()> {
    let (block, offset) = self.geometry.inode_location(inum);
    let mut block_buf = vec![0; self.geometry.block_size];
    dev.read_block(block, &mut block_buf)?;

    block_buf
      .get_mut(offset..offset + INODE_SIZE)
      .and_then(|record| node.write_to(record))
      .ok_or_else(|| record_out_of_block(inum))?;
    dev.write_block(block, &block_buf)
  }

  /// Zeroes every block of the table.
  pub fn clear<T: BlockStorage>(&self, dev: &mut T) -> std::io::Result<()> {
    let zeroes = vec![0; self.geometry.block_size];
    let start = self.geometry.inode_table_start;
    for block in start..start + self.geometry.inode_table_blocks() {
      dev.write_block(block, &zeroes)?;
    }
    Ok(())
  }
}
