use std::mem;

use fat_fs::{DiskDirEntry, DiskInode, SuperBlock};

#[test]
fn on_disk_layout() {
    assert_eq!(512, mem::size_of::<DiskInode>());
    assert_eq!(64, mem::size_of::<DiskDirEntry>());
    assert_eq!(16, mem::size_of::<SuperBlock>());
}
