#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Free,
    Used,
}

/// One bit per tracked object, bit `i` living in byte `i / 8` at position
/// `i % 8`. The map is backed by a whole block so bytes past the tracked range
/// are carried back to disk unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    /// Number of meaningful bits.
    len: usize,
}

impl Bitmap {
    /// An all-free map of `len` bits inside a `block_size` byte block.
    pub fn new(len: usize, block_size: usize) -> Self {
        assert!(len <= block_size * 8, "Bitmap does not fit in one block.");
        Self {
            bytes: vec![0; block_size],
            len,
        }
    }

    /// Reads a map of `len` bits from a block buffer.
    pub fn parse(buf: &[u8], len: usize) -> Self {
        assert!(len <= buf.len() * 8, "Bitmap does not fit in one block.");
        Self {
            bytes: buf.to_vec(),
            len,
        }
    }

    /// The full backing block, ready to be written to disk.
    pub fn serialize(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, nr: usize) -> State {
        assert!(nr < self.len, "bit {} out of range for bitmap of {}", nr, self.len);
        match (self.bytes[nr / 8] >> (nr % 8)) & 1 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn is_used(&self, nr: usize) -> bool {
        self.get(nr) == State::Used
    }

    pub fn set_reserved(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range for bitmap of {}", nr, self.len);
        self.bytes[nr / 8] |= 1 << (nr % 8);
    }

    pub fn set_free(&mut self, nr: usize) {
        assert!(nr < self.len, "bit {} out of range for bitmap of {}", nr, self.len);
        self.bytes[nr / 8] &= !(1 << (nr % 8));
    }

    /// Indices of every used bit, ascending.
    pub fn iter_used(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&nr| self.is_used(nr))
    }
}

/// Per-block reference counts and owners, rebuilt on every inode scan. A block
/// is claimed by the first inode that names it; later claimants are refused.
#[derive(Debug, Clone)]
pub struct AllocationTracker {
    refs: Vec<u32>,
    owners: Vec<Option<usize>>,
}

impl AllocationTracker {
    pub fn new(total_blocks: usize) -> Self {
        Self {
            refs: vec![0; total_blocks],
            owners: vec![None; total_blocks],
        }
    }

    /// Forgets every claim.
    pub fn reset(&mut self) {
        self.refs.iter_mut().for_each(|r| *r = 0);
        self.owners.iter_mut().for_each(|o| *o = None);
    }

    pub fn ref_count(&self, block: usize) -> u32 {
        self.refs[block]
    }

    pub fn owner(&self, block: usize) -> Option<usize> {
        self.owners[block]
    }

    pub fn is_referenced(&self, block: usize) -> bool {
        self.refs[block] > 0
    }

    /// Records `inum` as the owner of `block`. If the block is already claimed
    /// the claim is refused and the current owner returned.
    pub fn claim(&mut self, block: usize, inum: usize) -> Result<(), usize> {
        if self.refs[block] > 0 {
            return Err(self.owners[block].unwrap_or(inum));
        }
        self.refs[block] = 1;
        self.owners[block] = Some(inum);
        Ok(())
    }
}
