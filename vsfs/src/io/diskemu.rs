use crate::io::{BlockNumber, BlockStorage};
use crate::layout::BLOCK_SIZE;

use log::trace;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Block storage backed by a regular file, one image block per `block_size`
/// bytes of the file.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
    /// Bytes per block.
    block_size: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "block {} out of range (device has {} blocks)",
                    blocknr, self.block_count
                ),
            ));
        }
        Ok(())
    }

    fn offset_of(&self, blocknr: BlockNumber) -> u64 {
        (blocknr * self.block_size) as u64
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        FileBlockEmulatorBuilder::from(file)
            .with_block_count(nblocks)
            .build()
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }

        trace!("read block {}", blocknr);
        let offset = self.offset_of(blocknr);
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.read_exact(&mut buf[..self.block_size])
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() != self.block_size {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "refusing partial block write of {} bytes (block size {})",
                    buf.len(),
                    self.block_size
                ),
            ));
        }

        trace!("write block {}", blocknr);
        let offset = self.offset_of(blocknr);
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    block_size: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_count: 0,
            block_size: BLOCK_SIZE,
            clear_medium: false,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Sets the number of bytes per block. Defaults to 4096.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// When set, `build` overwrites the whole medium with zeroes. Off by default
    /// so that opening an existing image never destroys it.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// Transfers ownership of the file to the emulator. If `clear_medium` was
    /// requested the file is zeroed to exactly `block_count` blocks first.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 || self.block_size == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block device needs a non-zero block count and block size",
            ));
        }
        if self.clear_medium {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
            block_size: self.block_size,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let zeroes = vec![0x00; self.block_size];
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk" block, buffering each write to prevent excessive reads.
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()?;
        drop(bfd);
        self.fd.set_len((self.block_count * self.block_size) as u64)
    }
}
