use crate::alloc::Bitmap;
use crate::fsck::{CheckReport, Checker};
use crate::io::BlockStorage;
use crate::layout::Geometry;
use crate::node::{Inode, InodeTable};
use crate::sb::{SuperBlock, ValidationReport};

use log::debug;
use thiserror::Error;

/// Known locations.
const SUPERBLOCK_INDEX: usize = 0;

#[derive(Error, Debug)]
pub enum FsckError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no fixed point reached after {rounds} rounds")]
    NoFixedPoint { rounds: usize },
    #[error("image i/o failed")]
    Io(#[from] std::io::Error),
}

/// An open VSFS image: a fixed 64 4k block file system with one super block,
/// one inode bitmap, one data block bitmap, five inode blocks, and 56 blocks
/// for data storage.
///
/// The superblock is validated when the image is opened, but the stated
/// geometry is only reported; all block arithmetic uses the geometry the image
/// was opened with.
pub struct Vsfs<T: BlockStorage> {
    dev: T,
    geometry: Geometry,
    super_block: SuperBlock,
    validation: ValidationReport,
}

impl<T: BlockStorage> Vsfs<T> {
    /// Formats the device with the standard geometry.
    ///
    /// # Layout
    /// ==================================================================================
    /// | SuperBlock | Bitmap (inodes) | Bitmap (data region) | Inode table | Data Region |
    /// ==================================================================================
    pub fn create(dev: T) -> Result<Self, FsckError> {
        Self::create_with(dev, Geometry::VSFS)
    }

    /// Writes a superblock describing `geometry`, empty bitmaps and a zeroed
    /// inode table. Data blocks are left as they are.
    pub fn create_with(mut dev: T, geometry: Geometry) -> Result<Self, FsckError> {
        geometry.validate()?;
        check_device(&dev, &geometry)?;

        let super_block = SuperBlock::new(&geometry);
        dev.write_block(SUPERBLOCK_INDEX, &super_block.serialize(geometry.block_size))?;

        let inode_bmp = Bitmap::new(geometry.inode_count, geometry.block_size);
        dev.write_block(geometry.inode_bitmap_block, inode_bmp.serialize())?;
        let data_bmp = Bitmap::new(geometry.total_blocks, geometry.block_size);
        dev.write_block(geometry.data_bitmap_block, data_bmp.serialize())?;

        InodeTable::new(geometry).clear(&mut dev)?;
        dev.sync_disk()?;
        debug!("formatted image: {:?}", geometry);

        let validation = super_block.validate(&geometry);
        Ok(Vsfs {
            dev,
            geometry,
            super_block,
            validation,
        })
    }

    /// Opens an image assuming the standard geometry.
    pub fn open(dev: T) -> Result<Self, FsckError> {
        Self::open_with(dev, Geometry::VSFS)
    }

    /// Reads and validates the superblock. A superblock that disagrees with
    /// `geometry` does not fail the open; see [`Vsfs::validation`].
    pub fn open_with(mut dev: T, geometry: Geometry) -> Result<Self, FsckError> {
        geometry.validate()?;
        check_device(&dev, &geometry)?;

        let mut block_buf = vec![0; geometry.block_size];
        dev.read_block(SUPERBLOCK_INDEX, &mut block_buf)?;
        let super_block = SuperBlock::parse(&block_buf);
        let validation = super_block.validate(&geometry);

        Ok(Vsfs {
            dev,
            geometry,
            super_block,
            validation,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// The result of checking the superblock when the image was opened.
    pub fn validation(&self) -> &ValidationReport {
        &self.validation
    }

    /// Repairs the image until it is consistent.
    pub fn check(&mut self) -> Result<CheckReport, FsckError> {
        let checker = Checker::new().with_geometry(self.geometry);
        self.check_with(&checker)
    }

    pub fn check_with(&mut self, checker: &Checker) -> Result<CheckReport, FsckError> {
        checker.run(&mut self.dev)
    }

    pub fn read_inode(&mut self, inum: usize) -> Result<Inode, FsckError> {
        self.check_inum(inum)?;
        Ok(InodeTable::new(self.geometry).read(&mut self.dev, inum)?)
    }

    pub fn write_inode(&mut self, inum: usize, node: &Inode) -> Result<(), FsckError> {
        self.check_inum(inum)?;
        Ok(InodeTable::new(self.geometry).write(&mut self.dev, inum, node)?)
    }

    /// Current on-disk inode and data bitmaps.
    pub fn bitmaps(&mut self) -> Result<(Bitmap, Bitmap), FsckError> {
        let geo = self.geometry;
        let mut block_buf = vec![0; geo.block_size];
        self.dev.read_block(geo.inode_bitmap_block, &mut block_buf)?;
        let inodes = Bitmap::parse(&block_buf, geo.inode_count);
        self.dev.read_block(geo.data_bitmap_block, &mut block_buf)?;
        let data = Bitmap::parse(&block_buf, geo.total_blocks);
        Ok((inodes, data))
    }

    /// Overwrites both bitmaps on disk.
    pub fn write_bitmaps(&mut self, inodes: &Bitmap, data: &Bitmap) -> Result<(), FsckError> {
        let geo = self.geometry;
        self.dev.write_block(geo.inode_bitmap_block, inodes.serialize())?;
        self.dev.write_block(geo.data_bitmap_block, data.serialize())?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), FsckError> {
        Ok(self.dev.sync_disk()?)
    }

    /// Returns ownership of the underlying device.
    pub fn into_device(self) -> T {
        self.dev
    }

    fn check_inum(&self, inum: usize) -> Result<(), FsckError> {
        if inum >= self.geometry.inode_count {
            return Err(FsckError::InvalidArgument(format!(
                "inode {} out of range, image has {} inodes",
                inum, self.geometry.inode_count
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_device<T: BlockStorage>(
    dev: &T,
    geometry: &Geometry,
) -> Result<(), FsckError> {
    if dev.block_size() != geometry.block_size || dev.block_count() < geometry.total_blocks {
        return Err(FsckError::InvalidArgument(format!(
            "device of {} blocks of {} bytes cannot hold {} blocks of {} bytes",
            dev.block_count(),
            dev.block_size(),
            geometry.total_blocks,
            geometry.block_size
        )));
    }
    Ok(())
}
