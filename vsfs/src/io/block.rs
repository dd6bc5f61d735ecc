use std::path::Path;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// Whole-block access to a backing image. Every read and write moves exactly one
/// block; callers that need to change part of a block read it, patch it in memory
/// and write the full block back.
///
/// Positioning is owned by the implementation: block `n` lives at byte offset
/// `n * block_size()`.
pub trait BlockStorage {
    /// Opens a disk at the specified path. This method does not validate the
    /// storage blocks, it is up for clients to ensure disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// The size in bytes of one block.
    fn block_size(&self) -> usize;
    /// The number of addressable blocks.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer shorter than a
    /// block, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or a buffer that is not exactly
    /// one block long, will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
