//! Consistency check and repair.
//!
//! A check cross-validates the inode table against the inode bitmap, the data
//! bitmap and the set of blocks the live inodes point at. Each round runs two
//! passes:
//!
//! 1. [`scan_inodes`] walks every inode in ascending order. It makes the inode
//!    bitmap agree with inode validity, drops data pointers that fall outside
//!    the data region or name a block an earlier inode already claimed, and
//!    marks every surviving block used in the data bitmap.
//! 2. [`scan_data_bitmap`] frees every data block the first pass found no owner
//!    for.
//!
//! Both bitmaps are written back after every round. Rounds repeat until one
//! makes no change at all.
//!
//! ```ignore
//! let report = Checker::new().run(&mut dev)?;
//! for repair in report.repairs() {
//!     println!("FIX: {}", repair);
//! }
//! ```

use crate::alloc::{AllocationTracker, Bitmap};
use crate::fs::{check_device, FsckError};
use crate::io::BlockStorage;
use crate::layout::Geometry;
use crate::node::InodeTable;

use log::{debug, info};
use std::fmt;

/// A single correction applied to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// The inode bitmap marked a dead inode as allocated.
    ClearedInodeBit { inode: usize },
    /// A live inode was missing from the inode bitmap.
    SetInodeBit { inode: usize },
    /// A live inode pointed outside the data region; its pointer was zeroed.
    ZeroedOutOfRangePointer { inode: usize, block: u32 },
    /// A live inode pointed at a block already owned by `owner`; its pointer was zeroed.
    ZeroedDuplicatePointer { inode: usize, block: u32, owner: usize },
    /// A block in use by `inode` was marked free in the data bitmap.
    SetDataBit { inode: usize, block: u32 },
    /// A block no live inode uses was marked allocated in the data bitmap.
    ClearedDataBit { block: usize },
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Repair::ClearedInodeBit { inode } => {
                write!(f, "Clearing inode bitmap for invalid inode {}", inode)
            }
            Repair::SetInodeBit { inode } => {
                write!(f, "Setting inode bitmap for valid inode {}", inode)
            }
            Repair::ZeroedOutOfRangePointer { inode, block } => {
                write!(f, "Inode {} has invalid block {}, zeroing pointer", inode, block)
            }
            Repair::ZeroedDuplicatePointer {
                inode,
                block,
                owner,
            } => write!(
                f,
                "Duplicate block {} in inode {}, removing pointer (owned by inode {})",
                block, inode, owner
            ),
            Repair::SetDataBit { inode, block } => write!(
                f,
                "Setting data bitmap for used block {} (inode {})",
                block, inode
            ),
            Repair::ClearedDataBit { block } => {
                write!(f, "Clearing data bitmap for unused block {}", block)
            }
        }
    }
}

fn record(repairs: &mut Vec<Repair>, repair: Repair) {
    info!("fix: {}", repair);
    repairs.push(repair);
}

/// In-memory state of one check: both bitmaps plus the allocation tracker.
/// Only the bitmaps are ever persisted.
#[derive(Debug, Clone)]
pub struct RunState {
    pub inode_bitmap: Bitmap,
    pub data_bitmap: Bitmap,
    pub tracker: AllocationTracker,
}

impl RunState {
    /// Reads both bitmap blocks from the image.
    pub fn load<T: BlockStorage>(dev: &mut T, geo: &Geometry) -> std::io::Result<Self> {
        let mut block_buf = vec![0; geo.block_size];

        dev.read_block(geo.inode_bitmap_block, &mut block_buf)?;
        let inode_bitmap = Bitmap::parse(&block_buf, geo.inode_count);

        dev.read_block(geo.data_bitmap_block, &mut block_buf)?;
        let data_bitmap = Bitmap::parse(&block_buf, geo.total_blocks);

        Ok(Self {
            inode_bitmap,
            data_bitmap,
            tracker: AllocationTracker::new(geo.total_blocks),
        })
    }

    /// Writes both bitmap blocks back to the image.
    pub fn flush<T: BlockStorage>(&self, dev: &mut T, geo: &Geometry) -> std::io::Result<()> {
        dev.write_block(geo.inode_bitmap_block, self.inode_bitmap.serialize())?;
        dev.write_block(geo.data_bitmap_block, self.data_bitmap.serialize())
    }
}

/// Reconciles every inode with the inode bitmap, the data region bounds, the
/// blocks claimed by lower numbered inodes and the data bitmap. Rejected
/// pointers are zeroed on disk. The allocation tracker is rebuilt from scratch.
pub fn scan_inodes<T: BlockStorage>(
    dev: &mut T,
    geo: &Geometry,
    state: &mut RunState,
) -> std::io::Result<Vec<Repair>> {
    let table = InodeTable::new(*geo);
    let mut repairs = Vec::new();
    state.tracker.reset();

    for inum in 0..geo.inode_count {
        let mut node = table.read(dev, inum)?;
        let valid = node.is_valid();

        match (state.inode_bitmap.is_used(inum), valid) {
            (true, false) => {
                state.inode_bitmap.set_free(inum);
                record(&mut repairs, Repair::ClearedInodeBit { inode: inum });
            }
            (false, true) => {
                state.inode_bitmap.set_reserved(inum);
                record(&mut repairs, Repair::SetInodeBit { inode: inum });
            }
            _ => {}
        }

        if !valid {
            continue;
        }
        let block = match node.data_block() {
            Some(block) => block,
            None => continue,
        };

        if !geo.is_data_block(block) {
            node.clear_data_block();
            table.write(dev, inum, &node)?;
            record(
                &mut repairs,
                Repair::ZeroedOutOfRangePointer { inode: inum, block },
            );
            continue;
        }

        if let Err(owner) = state.tracker.claim(block as usize, inum) {
            node.clear_data_block();
            table.write(dev, inum, &node)?;
            record(
                &mut repairs,
                Repair::ZeroedDuplicatePointer {
                    inode: inum,
                    block,
                    owner,
                },
            );
            continue;
        }

        if !state.data_bitmap.is_used(block as usize) {
            state.data_bitmap.set_reserved(block as usize);
            record(&mut repairs, Repair::SetDataBit { inode: inum, block });
        }
    }

    Ok(repairs)
}

/// Frees every data region block that is marked allocated but has no owner in
/// the tracker built by the preceding [`scan_inodes`].
pub fn scan_data_bitmap(geo: &Geometry, state: &mut RunState) -> Vec<Repair> {
    let mut repairs = Vec::new();
    for block in geo.data_block_start..geo.total_blocks {
        if state.data_bitmap.is_used(block) && !state.tracker.is_referenced(block) {
            state.data_bitmap.set_free(block);
            record(&mut repairs, Repair::ClearedDataBit { block });
        }
    }
    repairs
}

/// Repairs made by one round, per pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Round {
    pub inodes: Vec<Repair>,
    pub data_bitmap: Vec<Repair>,
}

impl Round {
    pub fn changes(&self) -> usize {
        self.inodes.len() + self.data_bitmap.len()
    }

    pub fn is_clean(&self) -> bool {
        self.changes() == 0
    }
}

/// Everything a check did. The last round is always clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub rounds: Vec<Round>,
}

impl CheckReport {
    /// True when the image was already consistent.
    pub fn is_clean(&self) -> bool {
        self.rounds.iter().all(Round::is_clean)
    }

    /// Every repair in the order it was applied.
    pub fn repairs(&self) -> impl Iterator<Item = &Repair> + '_ {
        self.rounds
            .iter()
            .flat_map(|round| round.inodes.iter().chain(round.data_bitmap.iter()))
    }
}

/// Runs repair rounds until the image reaches a fixed point.
#[derive(Debug, Clone)]
pub struct Checker {
    geometry: Geometry,
    max_rounds: Option<usize>,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        Self {
            geometry: Geometry::VSFS,
            max_rounds: None,
        }
    }

    /// Sets the layout used for every block computation. Defaults to
    /// `Geometry::VSFS` regardless of what the superblock claims.
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Caps the number of rounds. Defaults to `Geometry::default_max_rounds`.
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn run<T: BlockStorage>(&self, dev: &mut T) -> Result<CheckReport, FsckError> {
        let geo = &self.geometry;
        geo.validate()?;
        check_device(&*dev, geo)?;
        let max_rounds = self.max_rounds.unwrap_or_else(|| geo.default_max_rounds());
        if max_rounds == 0 {
            return Err(FsckError::InvalidArgument(
                "round cap must allow at least one round".to_string(),
            ));
        }

        let mut state = RunState::load(dev, geo)?;
        let mut report = CheckReport::default();
        while report.rounds.len() < max_rounds {
            let round_nr = report.rounds.len() + 1;
            debug!("round {}: scanning inodes", round_nr);
            let inodes = scan_inodes(dev, geo, &mut state)?;
            debug!("round {}: scanning data bitmap", round_nr);
            let data_bitmap = scan_data_bitmap(geo, &mut state);

            state.flush(dev, geo)?;
            dev.sync_disk()?;

            let round = Round {
                inodes,
                data_bitmap,
            };
            debug!("round {}: {} changes", round_nr, round.changes());
            let fixed_point = round.is_clean();
            report.rounds.push(round);
            if fixed_point {
                return Ok(report);
            }
        }
        Err(FsckError::NoFixedPoint { rounds: max_rounds })
    }
}
