//! # FAT风格的存储层
//!
//! 教学内核的磁盘文件系统，自下而上：
//! 扇区缓存层、簇链表分配器(FAT表)、inode层、目录层、路径解析与门面。

#![no_std]

extern crate alloc;

mod dir;
mod fat;
mod file;
mod fs;
mod inode;
mod path;
mod sector;

pub use self::{
    dir::{Dir, DiskDirEntry, EntryFlag},
    fat::ClusterId,
    file::File,
    fs::{Context, FatFileSystem, SuperBlock},
    inode::{DiskInode, InodeHandle},
    path::Path,
    sector::SectorId,
};

/// 扇区字节数，挂载时即固定
pub const SECTOR_SIZE: usize = 512;

/// 目录项名称的最大长度
pub const NAME_MAX: usize = 14;
