//! # 簇链表分配器
//!
//! 卷的布局：超级块 | FAT区 | 数据区
//!
//! FAT区每个`u32`表项对应一个簇，记录该簇的后继。
//! 簇与扇区之间的换算是格式化时固定的纯算术双射。

use core::mem;

use spin::Mutex;
use vfs::Error;

use crate::SECTOR_SIZE;
use crate::sector::{SectorCache, SectorId};

/// 一个扇区能容纳多少条簇表项
const SECTOR_ENTRIES: usize = SECTOR_SIZE / mem::size_of::<u32>();

/// 簇编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClusterId(u32);

impl ClusterId {
    /// 未分配哨兵，也用作"无簇"
    pub const FREE: Self = Self(0);

    /// 最小的可用簇号
    pub const MIN: Self = Self(1);

    /// 链表结束标记
    pub const EOC: Self = Self(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<u32> for ClusterId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<ClusterId> for u32 {
    fn from(id: ClusterId) -> Self {
        id.0
    }
}

impl From<ClusterId> for usize {
    fn from(id: ClusterId) -> Self {
        id.0 as usize
    }
}

/// FAT表与簇算术
#[derive(Debug)]
pub struct Fat {
    /// FAT区的起始扇区
    start: SectorId,
    /// FAT区占据的扇区数
    sectors: usize,
    /// 数据区的起始扇区
    data_start: SectorId,
    /// 可用簇的总数
    clusters: usize,
    /// 串行化空闲簇扫描
    scan: Mutex<()>,
}

impl Fat {
    pub fn new(start: SectorId, sectors: usize, data_start: SectorId, clusters: usize) -> Self {
        Self {
            start,
            sectors,
            data_start,
            clusters,
            scan: Mutex::new(()),
        }
    }

    /// 簇号到其数据所在扇区
    pub fn cluster_to_sector(&self, id: ClusterId) -> SectorId {
        debug_assert!(id >= ClusterId::MIN && usize::from(id) <= self.clusters);
        self.data_start + (usize::from(id) - 1)
    }

    /// 数据区扇区到簇号
    pub fn sector_to_cluster(&self, sid: SectorId) -> ClusterId {
        let offset = usize::from(sid) - usize::from(self.data_start);
        ClusterId::new(offset as u32 + 1)
    }

    /// 获取下一个簇编号。
    /// `Ok(None)`表示`id`为链表上最后一个簇；
    /// 表项指向未分配簇或保留区时视为链表损坏。
    pub fn next(&self, cache: &SectorCache, id: ClusterId) -> Result<Option<ClusterId>, Error> {
        let raw = self.entry(cache, self.checked(id)?);
        match ClusterId::new(raw) {
            ClusterId::EOC => Ok(None),
            next => Ok(Some(self.checked(next)?)),
        }
    }

    /// 寻找链表上最后一个簇
    pub fn last(&self, cache: &SectorCache, start: ClusterId) -> Result<ClusterId, Error> {
        let mut id = start;
        while let Some(next) = self.next(cache, id)? {
            id = next;
        }
        Ok(id)
    }

    /// 分配一个空闲簇并标记为链尾，挂在`after`之后；
    /// `after`为[`ClusterId::FREE`]时新开一条链。
    /// 空间耗尽返回[`None`]，不留下任何半成品状态。
    pub fn create_chain(&self, cache: &SectorCache, after: ClusterId) -> Option<ClusterId> {
        let _scan = self.scan.lock();

        for i in 0..self.sectors {
            let found = cache
                .get(self.start + i)
                .lock()
                .map_slice(|entries: &[u32]| {
                    entries.iter().enumerate().find_map(|(nth, &e)| {
                        let id = i * SECTOR_ENTRIES + nth;
                        (e == ClusterId::FREE.0 && id >= 1 && id <= self.clusters)
                            .then_some(ClusterId::new(id as u32))
                    })
                });

            if let Some(id) = found {
                self.set_entry(cache, id, ClusterId::EOC.0);
                if after != ClusterId::FREE {
                    self.set_entry(cache, after, id.0);
                }
                return Some(id);
            }
        }

        log::warn!("cluster allocation failed: volume is full");
        None
    }

    /// 释放以`start`为首的整条簇链表。
    /// `keep_before`非空时保留它并把它改写成新的链尾，
    /// 也就是把链表截断而非整条删除。
    pub fn remove_chain(
        &self,
        cache: &SectorCache,
        start: ClusterId,
        keep_before: ClusterId,
    ) -> Result<(), Error> {
        if keep_before != ClusterId::FREE {
            self.set_entry(cache, self.checked(keep_before)?, ClusterId::EOC.0);
        }
        if start == ClusterId::FREE {
            return Ok(());
        }

        let mut id = self.checked(start)?;
        loop {
            let raw = self.entry(cache, id);
            self.set_entry(cache, id, ClusterId::FREE.0);
            match ClusterId::new(raw) {
                ClusterId::EOC => break,
                next => id = self.checked(next)?,
            }
        }

        Ok(())
    }

    /// 统计空闲簇
    pub fn free_clusters(&self, cache: &SectorCache) -> usize {
        let _scan = self.scan.lock();

        (0..self.sectors)
            .map(|i| {
                cache
                    .get(self.start + i)
                    .lock()
                    .map_slice(|entries: &[u32]| {
                        entries
                            .iter()
                            .enumerate()
                            .filter(|&(nth, &e)| {
                                let id = i * SECTOR_ENTRIES + nth;
                                e == ClusterId::FREE.0 && id >= 1 && id <= self.clusters
                            })
                            .count()
                    })
            })
            .sum()
    }

    /// 格式化时预占一个簇（如根目录的inode簇）
    pub fn reserve(&self, cache: &SectorCache, id: ClusterId) {
        self.set_entry(cache, id, ClusterId::EOC.0);
    }
}

impl Fat {
    fn checked(&self, id: ClusterId) -> Result<ClusterId, Error> {
        if id < ClusterId::MIN || usize::from(id) > self.clusters {
            log::error!("malformed cluster chain: hit {:?}", id);
            return Err(Error::Corruption);
        }
        Ok(id)
    }

    /// 返回簇表项实际所处的磁盘位置（扇区号 + 扇区内索引）
    fn entry_pos(&self, id: ClusterId) -> (SectorId, usize) {
        let raw = usize::from(id);
        (self.start + raw / SECTOR_ENTRIES, raw % SECTOR_ENTRIES)
    }

    fn entry(&self, cache: &SectorCache, id: ClusterId) -> u32 {
        let (sid, nth) = self.entry_pos(id);
        cache.get(sid).lock().map_slice(|entries: &[u32]| entries[nth])
    }

    fn set_entry(&self, cache: &SectorCache, id: ClusterId, raw: u32) {
        let (sid, nth) = self.entry_pos(id);
        cache
            .get(sid)
            .lock()
            .map_mut_slice(|entries: &mut [u32]| entries[nth] = raw);
    }
}
