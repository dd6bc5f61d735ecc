use tempfile::NamedTempFile;
use vsfs::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use vsfs::{Bitmap, Geometry, Inode, Repair, Vsfs};

fn formatted_image() -> (NamedTempFile, Vsfs<FileBlockEmulator>) {
  let tf = NamedTempFile::new().unwrap();
  let dev = FileBlockEmulatorBuilder::from(tf.reopen().unwrap())
    .with_block_count(64)
    .clear_medium(true)
    .build()
    .unwrap();
  let fs = Vsfs::create(dev).unwrap();
  (tf, fs)
}

fn reopen(tf: &NamedTempFile) -> Vsfs<FileBlockEmulator> {
  let dev = FileBlockEmulator::open_disk(tf.path(), 64).unwrap();
  Vsfs::open(dev).unwrap()
}

fn set_bits(fs: &mut Vsfs<FileBlockEmulator>, inode_bits: &[usize], data_bits: &[usize]) {
  let (mut inodes, mut data) = fs.bitmaps().unwrap();
  inode_bits.iter().for_each(|&i| inodes.set_reserved(i));
  data_bits.iter().for_each(|&b| data.set_reserved(b));
  fs.write_bitmaps(&inodes, &data).unwrap();
  fs.sync().unwrap();
}

fn used(bitmap: &Bitmap) -> Vec<usize> {
  bitmap.iter_used().collect()
}

/// Asserts both bitmap invariants against the stored inode table.
fn assert_consistent(fs: &mut Vsfs<FileBlockEmulator>) {
  let geo = Geometry::VSFS;
  let (inodes, data) = fs.bitmaps().unwrap();
  let mut owners = vec![0; geo.total_blocks];

  for inum in 0..geo.inode_count {
    let node = fs.read_inode(inum).unwrap();
    assert_eq!(inodes.is_used(inum), node.is_valid(), "inode bitmap bit {}", inum);
    if let (true, Some(block)) = (node.is_valid(), node.data_block()) {
      assert!(geo.is_data_block(block), "inode {} kept block {}", inum, block);
      owners[block as usize] += 1;
    }
  }
  for block in geo.data_block_start..geo.total_blocks {
    assert!(owners[block] <= 1, "block {} has {} owners", block, owners[block]);
    assert_eq!(data.is_used(block), owners[block] == 1, "data bitmap bit {}", block);
  }
}

#[test]
fn out_of_range_pointer_is_dropped() {
  let (_tf, mut fs) = formatted_image();
  let mut node = Inode::file(70);
  node.size = 100;
  fs.write_inode(1, &node).unwrap();
  set_bits(&mut fs, &[1], &[]);

  let report = fs.check().unwrap();

  assert_eq!(
    report.repairs().copied().collect::<Vec<_>>(),
    vec![Repair::ZeroedOutOfRangePointer { inode: 1, block: 70 }]
  );
  let node = fs.read_inode(1).unwrap();
  assert_eq!(node.direct_pointer, 0);
  assert_eq!(node.block_count, 0);
  assert_eq!(node.size, 100);
  let (_, data) = fs.bitmaps().unwrap();
  assert!(used(&data).is_empty());
  assert_consistent(&mut fs);
}

#[test]
fn duplicate_claim_is_won_by_lowest_inode() {
  let (_tf, mut fs) = formatted_image();
  fs.write_inode(2, &Inode::file(10)).unwrap();
  fs.write_inode(5, &Inode::file(10)).unwrap();
  set_bits(&mut fs, &[2, 5], &[]);

  let report = fs.check().unwrap();

  assert_eq!(
    report.rounds[0].inodes,
    vec![
      Repair::SetDataBit { inode: 2, block: 10 },
      Repair::ZeroedDuplicatePointer {
        inode: 5,
        block: 10,
        owner: 2
      },
    ]
  );
  assert_eq!(fs.read_inode(2).unwrap().direct_pointer, 10);
  assert_eq!(fs.read_inode(2).unwrap().block_count, 1);
  assert_eq!(fs.read_inode(5).unwrap().direct_pointer, 0);
  assert_eq!(fs.read_inode(5).unwrap().block_count, 0);
  let (inodes, data) = fs.bitmaps().unwrap();
  assert_eq!(used(&inodes), vec![2, 5]);
  assert_eq!(used(&data), vec![10]);
  assert_consistent(&mut fs);
}

#[test]
fn stale_inode_bits_follow_validity() {
  let (_tf, mut fs) = formatted_image();
  let mut unlinked = Inode::file(0);
  unlinked.links_count = 0;
  fs.write_inode(3, &unlinked).unwrap();
  fs.write_inode(4, &Inode::file(0)).unwrap();
  set_bits(&mut fs, &[3], &[]);

  let report = fs.check().unwrap();

  assert_eq!(
    report.rounds[0].inodes,
    vec![
      Repair::ClearedInodeBit { inode: 3 },
      Repair::SetInodeBit { inode: 4 },
    ]
  );
  let (inodes, _) = fs.bitmaps().unwrap();
  assert_eq!(used(&inodes), vec![4]);
  assert_consistent(&mut fs);
}

#[test]
fn deleted_inode_releases_its_block() {
  let (_tf, mut fs) = formatted_image();
  let mut deleted = Inode::file(30);
  deleted.deletion_time = 1_700_000_000;
  fs.write_inode(11, &deleted).unwrap();
  set_bits(&mut fs, &[11], &[30]);

  let report = fs.check().unwrap();

  assert_eq!(
    report.rounds[0].inodes,
    vec![Repair::ClearedInodeBit { inode: 11 }]
  );
  assert_eq!(
    report.rounds[0].data_bitmap,
    vec![Repair::ClearedDataBit { block: 30 }]
  );
  assert_consistent(&mut fs);
}

#[test]
fn orphan_block_is_freed_in_one_run() {
  let (_tf, mut fs) = formatted_image();
  fs.write_inode(0, &Inode::file(21)).unwrap();
  set_bits(&mut fs, &[0], &[20, 21]);

  let report = fs.check().unwrap();

  assert_eq!(report.rounds.len(), 2);
  assert_eq!(
    report.rounds[0].data_bitmap,
    vec![Repair::ClearedDataBit { block: 20 }]
  );
  let (_, data) = fs.bitmaps().unwrap();
  assert_eq!(used(&data), vec![21]);
  assert_consistent(&mut fs);
}

#[test]
fn second_run_makes_no_changes() {
  let (tf, mut fs) = formatted_image();
  fs.write_inode(2, &Inode::file(10)).unwrap();
  fs.write_inode(5, &Inode::file(10)).unwrap();
  fs.write_inode(6, &Inode::file(99)).unwrap();
  set_bits(&mut fs, &[7, 8], &[40, 41]);

  let first = fs.check().unwrap();
  assert!(!first.is_clean());
  drop(fs);

  let mut fs = reopen(&tf);
  let second = fs.check().unwrap();
  assert!(second.is_clean());
  assert_eq!(second.rounds.len(), 1);
  assert_consistent(&mut fs);
}

#[test]
fn metadata_bits_in_data_bitmap_are_left_alone() {
  let (_tf, mut fs) = formatted_image();
  set_bits(&mut fs, &[], &[0, 1, 2, 7]);

  assert!(fs.check().unwrap().is_clean());
  let (_, data) = fs.bitmaps().unwrap();
  assert_eq!(used(&data), vec![0, 1, 2, 7]);
}

#[test]
fn repairs_survive_a_reopen() {
  let (tf, mut fs) = formatted_image();
  fs.write_inode(40, &Inode::file(63)).unwrap();
  fs.check().unwrap();
  drop(fs);

  let mut fs = reopen(&tf);
  let (inodes, data) = fs.bitmaps().unwrap();
  assert_eq!(used(&inodes), vec![40]);
  assert_eq!(used(&data), vec![63]);
}

/// Small deterministic generator so scrambled images are reproducible.
struct Lcg(u64);

impl Lcg {
  fn next(&mut self, bound: u32) -> u32 {
    self.0 = self
      .0
      .wrapping_mul(6_364_136_223_846_793_005)
      .wrapping_add(1_442_695_040_888_963_407);
    ((self.0 >> 33) % bound as u64) as u32
  }
}

#[test]
fn scrambled_images_converge_to_a_fixed_point() {
  for seed in 1..=20 {
    let (_tf, mut fs) = formatted_image();
    let mut rng = Lcg(seed);

    for inum in 0..80 {
      let mut node = Inode::file(rng.next(80));
      node.links_count = rng.next(3);
      if rng.next(5) == 0 {
        node.deletion_time = 1 + rng.next(1000);
      }
      fs.write_inode(inum, &node).unwrap();
    }
    let inode_bits: Vec<usize> = (0..80).filter(|_| rng.next(2) == 0).collect();
    let data_bits: Vec<usize> = (0..64).filter(|_| rng.next(2) == 0).collect();
    set_bits(&mut fs, &inode_bits, &data_bits);

    let report = fs.check().unwrap();
    assert!(report.rounds.len() <= 2, "seed {} took {} rounds", seed, report.rounds.len());
    assert!(report.rounds.last().unwrap().is_clean());
    assert_consistent(&mut fs);
    assert!(fs.check().unwrap().is_clean(), "seed {} not idempotent", seed);
  }
}
