//! Writes a VSFS image with a handful of known inconsistencies, for trying out
//! `vsfsck`:
//!
//! ```text
//! cargo run -p vsfs --example mkimage -- broken.img
//! cargo run -p vsfsck -- broken.img
//! ```
use std::env;
use std::fs::OpenOptions;

use vsfs::io::FileBlockEmulatorBuilder;
use vsfs::{Geometry, Inode, Vsfs};

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = env::args().nth(1).unwrap_or_else(|| "vsfs.img".to_string());
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    let dev = FileBlockEmulatorBuilder::from(file)
        .with_block_count(Geometry::VSFS.total_blocks)
        .clear_medium(true)
        .build()?;
    let mut fs = Vsfs::create(dev)?;

    // Points past the end of the image.
    fs.write_inode(1, &Inode::file(70))?;
    // Inodes 2 and 5 share block 10.
    fs.write_inode(2, &Inode::file(10))?;
    fs.write_inode(5, &Inode::file(10))?;
    // Unlinked but still marked allocated.
    let mut unlinked = Inode::file(0);
    unlinked.links_count = 0;
    fs.write_inode(3, &unlinked)?;
    // Live but missing from the inode bitmap.
    fs.write_inode(4, &Inode::file(12))?;

    let (mut inodes, mut data) = fs.bitmaps()?;
    for inum in [1, 2, 3, 5] {
        inodes.set_reserved(inum);
    }
    // Nobody owns block 20.
    data.set_reserved(20);
    fs.write_bitmaps(&inodes, &data)?;
    fs.sync()?;

    println!("wrote {}", path);
    Ok(())
}
