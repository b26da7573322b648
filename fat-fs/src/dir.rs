//! # 目录层
//!
//! 目录就是`is_dir`置位的inode，其数据是定长目录项槽位的数组。
//! 没有独立的空闲表：插入时线性扫描第一个空槽，扫不到就在末尾扩展。
//!
//! 符号链接项分两种：已解析的项直接存目标的inode扇区；
//! 目标尚不存在的**惰性链接**改存目标名称，等同名项出现后即可解析。

use alloc::string::String;
use core::{ptr, slice};

use enumflags2::{BitFlags, bitflags};
use vfs::{DirEntryType, Error};

use crate::NAME_MAX;
use crate::inode::InodeHandle;
use crate::sector::SectorId;

/// 目录项槽位的属性
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlag {
    /// 槽位占用中；清零即空闲可复用
    InUse = 1,
    SymLink = 1 << 1,
}

/// 磁盘上的目录项槽位，定长64字节
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DiskDirEntry {
    /// 目标inode记录的扇区号；待决惰性链接为0
    inode_sector: u32,
    name: [u8; NAME_MAX + 1],
    flags: u8,
    /// 惰性链接存储的目标名称
    lazy: [u8; NAME_MAX + 1],
    _pad: [u8; 29],
}

impl DiskDirEntry {
    /// 槽位大小恒为64字节
    pub const SIZE: usize = 64;

    pub fn new(name: &str, sector: SectorId) -> Self {
        let mut entry = Self::default();
        entry.inode_sector = usize::from(sector) as u32;
        entry.set_name(name);
        entry.set_flags(EntryFlag::InUse.into());
        entry
    }

    /// 已解析的符号链接：直接指向目标的inode扇区
    pub fn new_symlink(name: &str, target: SectorId) -> Self {
        let mut entry = Self::new(name, target);
        entry.set_flags(EntryFlag::InUse | EntryFlag::SymLink);
        entry
    }

    /// 惰性链接：目标尚不存在，只记下名字
    pub fn new_lazy(name: &str, target: &str) -> Self {
        let mut entry = Self::default();
        entry.set_name(name);
        let bytes = target.as_bytes();
        entry.lazy[..bytes.len()].copy_from_slice(bytes);
        entry.set_flags(EntryFlag::InUse | EntryFlag::SymLink);
        entry
    }

    pub fn name(&self) -> &str {
        str_field(&self.name)
    }

    pub fn lazy_target(&self) -> &str {
        str_field(&self.lazy)
    }

    #[inline]
    pub fn inode_sector(&self) -> SectorId {
        SectorId::new(self.inode_sector as usize)
    }

    #[inline]
    pub fn flags(&self) -> BitFlags<EntryFlag> {
        BitFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.flags().contains(EntryFlag::InUse)
    }

    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.flags().contains(EntryFlag::SymLink)
    }

    /// 本项是否为尚未解析的惰性链接
    #[inline]
    pub fn is_pending_lazy(&self) -> bool {
        self.is_symlink() && self.inode_sector == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        self.name[..bytes.len()].copy_from_slice(bytes);
    }

    fn set_flags(&mut self, flags: BitFlags<EntryFlag>) {
        self.flags = flags.bits();
    }
}

impl Default for DiskDirEntry {
    fn default() -> Self {
        Self {
            inode_sector: 0,
            name: [0; NAME_MAX + 1],
            flags: 0,
            lazy: [0; NAME_MAX + 1],
            _pad: [0; 29],
        }
    }
}

/// 名称字段以0结尾
fn str_field(field: &[u8]) -> &str {
    let len = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..len]).unwrap_or("")
}

/// 打开的目录。
/// 克隆即重新打开：引用同一inode，读取游标归零。
pub struct Dir {
    handle: InodeHandle,
    /// `read_entry`的字节游标
    pos: usize,
}

impl Dir {
    pub fn open(handle: InodeHandle) -> Result<Self, Error> {
        if !handle.is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(Self { handle, pos: 0 })
    }

    #[inline]
    pub fn handle(&self) -> &InodeHandle {
        &self.handle
    }

    /// 按名称查找目标的inode扇区，大小写敏感、精确匹配。
    /// 待决惰性链接沿存储的名字继续查找，目标出现后即告解析；
    /// 已解析的链接项存的就是目标扇区，天然透明。
    pub fn lookup(&self, name: &str) -> Result<SectorId, Error> {
        let mut name = String::from(name);
        // 链上每一环最终都指向同一个名字，环路以跳数上限兜底
        for _ in 0..8 {
            let (_, entry) = self.find(&name).ok_or(Error::NotFound)?;
            if entry.is_pending_lazy() {
                name = String::from(entry.lazy_target());
                continue;
            }
            return Ok(entry.inode_sector());
        }
        Err(Error::NotFound)
    }

    /// 名称是否已被占用（不解析惰性链接）
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// 名称对应的原始目录项（不解析惰性链接）
    pub(crate) fn entry_of(&self, name: &str) -> Option<DiskDirEntry> {
        self.find(name).map(|(_, entry)| entry)
    }

    /// 目录下是否存在此名称的待决惰性链接，存在则给出其目标名
    pub(crate) fn pending_target(&self, name: &str) -> Option<String> {
        self.find(name).and_then(|(_, entry)| {
            entry
                .is_pending_lazy()
                .then(|| String::from(entry.lazy_target()))
        })
    }

    /// 添加普通项。重名返回[`Error::AlreadyExists`]，
    /// 目录存储无法扩展时返回[`Error::Exhausted`]。
    pub fn add(&self, name: &str, sector: SectorId) -> Result<(), Error> {
        check_name(name)?;
        self.insert(DiskDirEntry::new(name, sector))
    }

    /// 添加指向已存在inode的符号链接项
    pub fn add_symlink(&self, name: &str, target: SectorId) -> Result<(), Error> {
        check_name(name)?;
        self.insert(DiskDirEntry::new_symlink(name, target))
    }

    /// 添加惰性链接项
    pub fn add_lazy(&self, name: &str, target: &str) -> Result<(), Error> {
        check_name(name)?;
        check_name(target)?;
        self.insert(DiskDirEntry::new_lazy(name, target))
    }

    /// 删除名称对应的项：槽位标记空闲，所指inode标记待删除。
    /// 符号链接项只清除槽位本身，不碰目标inode。
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let (offset, entry) = self.find(name).ok_or(Error::NotFound)?;

        if !entry.is_symlink() {
            let target = self.handle.fs().open_inode(entry.inode_sector())?;
            target.remove();
            // 句柄在此析构：没有其它持有者时立即物理回收
        }

        let wrote = self
            .handle
            .write_at(offset, DiskDirEntry::default().as_bytes());
        debug_assert_eq!(wrote, DiskDirEntry::SIZE);
        Ok(())
    }

    /// 惰性前向遍历占用中的项；重新遍历需要重新打开目录
    pub fn read_entry(&mut self) -> Option<vfs::DirEntry> {
        let size = self.handle.length();
        let mut entry = DiskDirEntry::default();

        while self.pos < size {
            if self.handle.read_at(self.pos, entry.as_bytes_mut()) != DiskDirEntry::SIZE {
                return None;
            }
            self.pos += DiskDirEntry::SIZE;

            if !entry.in_use() {
                continue;
            }

            let ty = if entry.is_symlink() {
                DirEntryType::SymLink
            } else {
                self.handle
                    .fs()
                    .open_inode(entry.inode_sector())
                    .map(|h| {
                        if h.is_dir() {
                            DirEntryType::Directory
                        } else {
                            DirEntryType::Regular
                        }
                    })
                    .unwrap_or_default()
            };

            return Some(vfs::DirEntry {
                inode: usize::from(entry.inode_sector()) as u64,
                ty,
                name: String::from(entry.name()),
            });
        }

        None
    }
}

impl Dir {
    fn find(&self, name: &str) -> Option<(usize, DiskDirEntry)> {
        let size = self.handle.length();
        let mut entry = DiskDirEntry::default();

        for offset in (0..size).step_by(DiskDirEntry::SIZE) {
            if self.handle.read_at(offset, entry.as_bytes_mut()) != DiskDirEntry::SIZE {
                break;
            }
            if entry.in_use() && entry.name() == name {
                return Some((offset, entry));
            }
        }

        None
    }

    fn insert(&self, entry: DiskDirEntry) -> Result<(), Error> {
        if self.contains(entry.name()) {
            return Err(Error::AlreadyExists);
        }

        // 复用第一个空槽，否则在末尾扩展一个
        let size = self.handle.length();
        let mut probe = DiskDirEntry::default();
        let mut slot = size;
        for offset in (0..size).step_by(DiskDirEntry::SIZE) {
            if self.handle.read_at(offset, probe.as_bytes_mut()) != DiskDirEntry::SIZE {
                break;
            }
            if !probe.in_use() {
                slot = offset;
                break;
            }
        }

        if self.handle.write_at(slot, entry.as_bytes()) != DiskDirEntry::SIZE {
            return Err(Error::Exhausted);
        }
        Ok(())
    }
}

impl Clone for Dir {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            pos: 0,
        }
    }
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(Error::Invalid);
    }
    Ok(())
}
