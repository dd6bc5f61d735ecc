//! Consistency checking and repair for VSFS images.
//!
//! A VSFS image is a fixed 64 block file system: a superblock, an inode bitmap,
//! a data block bitmap, a five block inode table and 56 data blocks. Every inode
//! owns at most one data block through its direct pointer.
//!
//! [`Vsfs`] opens an image over any [`io::BlockStorage`], reports whether the
//! superblock matches the supported format and runs [`Checker`] to bring the
//! bitmaps and inode pointers back into agreement.
mod alloc;
mod fs;
mod fsck;
pub mod io;
mod layout;
mod node;
mod sb;

pub use crate::alloc::{AllocationTracker, Bitmap, State};
pub use crate::fs::{FsckError, Vsfs};
pub use crate::fsck::{
    scan_data_bitmap, scan_inodes, CheckReport, Checker, Repair, Round, RunState,
};
pub use crate::layout::{Geometry, BLOCK_SIZE, SB_MAGIC};
pub use crate::node::{Inode, InodeTable, INODE_SIZE};
pub use crate::sb::{Field, FieldCheck, SuperBlock, ValidationReport};
