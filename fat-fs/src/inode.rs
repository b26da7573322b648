//! # inode层
//!
//! 磁盘上的inode记录恰占一个扇区，把文件的字节流映射到一条簇链表上。
//! 内存中以**扇区号去重**的打开表保证同一记录只有一个内存对象；
//! 删除被推迟到最后一个持有者关闭之时。

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;
use vfs::Error;

use crate::SECTOR_SIZE;
use crate::fat::ClusterId;
use crate::fs::FatFileSystem;
use crate::sector::SectorId;

/// inode记录的校验魔数
const INODE_MAGIC: u32 = 0x494e_4f44;

/// 磁盘上的inode记录，恰为一个扇区大小
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DiskInode {
    /// 数据链表的首簇
    start: ClusterId,
    /// 文件字节长度
    length: u32,
    is_dir: u32,
    magic: u32,
    _pad: [u8; SECTOR_SIZE - 16],
}

impl DiskInode {
    pub fn new(start: ClusterId, length: usize, is_dir: bool) -> Self {
        Self {
            start,
            length: length as u32,
            is_dir: is_dir as u32,
            magic: INODE_MAGIC,
            _pad: [0; SECTOR_SIZE - 16],
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn start(&self) -> ClusterId {
        self.start
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    #[inline]
    fn set_length(&mut self, length: usize) {
        self.length = length as u32;
    }
}

/// 打开表中的inode对象，每个扇区至多一个
pub struct Inode {
    /// 身份：记录所在扇区
    sector: SectorId,
    /// 磁盘记录的内存副本
    disk: Mutex<DiskInode>,
    state: Mutex<OpenState>,
}

#[derive(Debug)]
struct OpenState {
    open_cnt: usize,
    deny_write_cnt: usize,
    stage: Stage,
}

/// 删除状态机：`Live --remove--> PendingDelete --最后一次close--> 物理回收`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Live,
    PendingDelete,
}

/// 打开的inode句柄。
/// 克隆即重新打开（引用计数加一），析构即关闭。
pub struct InodeHandle {
    fs: Arc<FatFileSystem>,
    inode: Arc<Inode>,
}

impl FatFileSystem {
    /// 按扇区号打开inode：已打开则复用同一内存对象
    pub fn open_inode(self: &Arc<Self>, sector: SectorId) -> Result<InodeHandle, Error> {
        let mut open_inodes = self.open_inodes.lock();

        if let Some(node) = open_inodes.iter().find(|n| n.sector == sector) {
            node.state.lock().open_cnt += 1;
            return Ok(InodeHandle {
                fs: self.clone(),
                inode: node.clone(),
            });
        }

        let disk: DiskInode = *self.cache.get(sector).lock().get(0);
        if !disk.is_valid() {
            log::error!("inode magic mismatch at {sector:?}");
            return Err(Error::Invalid);
        }

        let node = Arc::new(Inode {
            sector,
            disk: Mutex::new(disk),
            state: Mutex::new(OpenState {
                open_cnt: 1,
                deny_write_cnt: 0,
                stage: Stage::Live,
            }),
        });
        open_inodes.push(node.clone());

        Ok(InodeHandle {
            fs: self.clone(),
            inode: node,
        })
    }

    /// 在`sector`处创建一个`length`字节的inode记录，
    /// 一次性分配整条数据链并清零；中途分配失败则整体回滚。
    /// 零长文件也会分配一个占位簇，保证每个inode都有合法的首簇。
    pub(crate) fn create_inode(
        &self,
        sector: SectorId,
        length: usize,
        is_dir: bool,
    ) -> Result<(), Error> {
        let sectors = length.div_ceil(SECTOR_SIZE).max(1);

        let mut first = ClusterId::FREE;
        let mut last = ClusterId::FREE;
        for _ in 0..sectors {
            match self.fat.create_chain(&self.cache, last) {
                Some(id) => {
                    if first == ClusterId::FREE {
                        first = id;
                    }
                    last = id;
                }
                None => {
                    if first != ClusterId::FREE {
                        let _ = self.fat.remove_chain(&self.cache, first, ClusterId::FREE);
                    }
                    return Err(Error::Exhausted);
                }
            }
        }

        // 新可见字节恒为0，创建与增长共用同一清零纪律
        let mut id = first;
        loop {
            self.cache.get(self.fat.cluster_to_sector(id)).lock().zeroize();
            match self.fat.next(&self.cache, id)? {
                Some(next) => id = next,
                None => break,
            }
        }

        self.cache
            .get(sector)
            .lock()
            .map_mut(0, |disk: &mut DiskInode| {
                *disk = DiskInode::new(first, length, is_dir)
            });

        Ok(())
    }
}

impl InodeHandle {
    #[inline]
    pub fn sector(&self) -> SectorId {
        self.inode.sector
    }

    #[inline]
    pub(crate) fn fs(&self) -> &Arc<FatFileSystem> {
        &self.fs
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.inode.disk.lock().is_dir()
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.inode.disk.lock().length()
    }

    /// 两个句柄是否指向同一个打开表对象
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inode, &other.inode)
    }

    /// 标记待删除；物理回收推迟到最后一次关闭
    pub fn remove(&self) {
        self.inode.state.lock().stage = Stage::PendingDelete;
    }

    pub fn deny_write(&self) {
        let mut state = self.inode.state.lock();
        state.deny_write_cnt += 1;
        assert!(state.deny_write_cnt <= state.open_cnt);
    }

    pub fn allow_write(&self) {
        let mut state = self.inode.state.lock();
        assert!(state.deny_write_cnt > 0);
        assert!(state.deny_write_cnt <= state.open_cnt);
        state.deny_write_cnt -= 1;
    }

    /// 从`offset`读取至多`buf.len()`字节，返回实际读取的字节数。
    /// 只在到达文件末尾或链表损坏时读得更少。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let disk = *self.inode.disk.lock();

        let end = (offset + buf.len()).min(disk.length());
        if offset >= end {
            return 0;
        }

        let mut pos = offset;
        let mut read = 0;
        while pos < end {
            let Ok(Some(sid)) = byte_to_sector(&self.fs, &disk, pos) else {
                break;
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (end - pos).min(SECTOR_SIZE - sector_ofs);

            self.fs.cache.get(sid).lock().map_slice(|data: &[u8]| {
                buf[read..read + chunk].copy_from_slice(&data[sector_ofs..sector_ofs + chunk])
            });

            pos += chunk;
            read += chunk;
        }

        read
    }

    /// 从`offset`写入`buf`，必要时增长文件，返回实际写入的字节数。
    /// 拒写计数非零时写入0字节；增长失败时保留已长出的部分，写得更少。
    /// 每次调用结束都把inode记录落盘，保证`length`与`start`持久。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if self.inode.state.lock().deny_write_cnt > 0 {
            return 0;
        }

        // 整个写入持有记录锁，增长期间对同一inode互斥
        let mut disk = self.inode.disk.lock();

        let target = offset + buf.len();
        if target > disk.length() {
            self.grow(&mut disk, target);
        }
        let end = target.min(disk.length());

        let mut pos = offset;
        let mut wrote = 0;
        while pos < end {
            let Ok(Some(sid)) = byte_to_sector(&self.fs, &disk, pos) else {
                break;
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (end - pos).min(SECTOR_SIZE - sector_ofs);

            self.fs
                .cache
                .get(sid)
                .lock()
                .map_mut_slice(|data: &mut [u8]| {
                    data[sector_ofs..sector_ofs + chunk]
                        .copy_from_slice(&buf[wrote..wrote + chunk])
                });

            pos += chunk;
            wrote += chunk;
        }

        self.fs
            .cache
            .get(self.inode.sector)
            .lock()
            .map_mut(0, |record: &mut DiskInode| *record = *disk);
        self.fs.cache.sync_all();

        wrote
    }
}

impl InodeHandle {
    /// 逐簇追加直到容量覆盖`target`；
    /// 旧EOF与新数据之间的空洞显式清零，清零落盘后才推进`length`。
    fn grow(&self, disk: &mut DiskInode, target: usize) {
        let fs = &self.fs;

        // 最后一个已分配扇区中EOF之后的部分
        let length = disk.length();
        let tail = length % SECTOR_SIZE;
        if tail != 0 {
            let Ok(Some(sid)) = byte_to_sector(fs, disk, length - 1) else {
                return;
            };
            fs.cache
                .get(sid)
                .lock()
                .map_mut_slice(|data: &mut [u8]| data[tail..].fill(0));
        }

        // 已分配容量内的增长只需推进length（占位簇保证容量至少一个扇区）
        let capacity = length.div_ceil(SECTOR_SIZE).max(1) * SECTOR_SIZE;
        disk.set_length(capacity.min(target));

        let Ok(mut last) = fs.fat.last(&fs.cache, disk.start()) else {
            return;
        };
        while disk.length() < target {
            let Some(id) = fs.fat.create_chain(&fs.cache, last) else {
                // 空间耗尽：保留已长出的部分
                break;
            };
            fs.cache.get(fs.fat.cluster_to_sector(id)).lock().zeroize();
            disk.set_length((disk.length() + SECTOR_SIZE).min(target));
            last = id;
        }
    }
}

/// `pos`处字节所在的扇区；`pos`超出文件长度时为[`None`]，
/// 既是读取时的EOF信号，也是写入时的"需要增长"信号。
fn byte_to_sector(
    fs: &FatFileSystem,
    disk: &DiskInode,
    pos: usize,
) -> Result<Option<SectorId>, Error> {
    if pos >= disk.length() {
        return Ok(None);
    }

    let mut id = disk.start();
    for _ in 0..pos / SECTOR_SIZE {
        id = fs.fat.next(&fs.cache, id)?.ok_or_else(|| {
            log::error!("cluster chain shorter than inode length");
            Error::Corruption
        })?;
    }
    Ok(Some(fs.fat.cluster_to_sector(id)))
}

impl Clone for InodeHandle {
    fn clone(&self) -> Self {
        self.inode.state.lock().open_cnt += 1;
        Self {
            fs: self.fs.clone(),
            inode: self.inode.clone(),
        }
    }
}

impl Drop for InodeHandle {
    fn drop(&mut self) {
        let mut open_inodes = self.fs.open_inodes.lock();
        let mut state = self.inode.state.lock();
        state.open_cnt -= 1;
        if state.open_cnt != 0 {
            return;
        }

        open_inodes.retain(|n| !Arc::ptr_eq(n, &self.inode));
        let pending = state.stage == Stage::PendingDelete;
        drop(state);
        drop(open_inodes);

        if pending {
            // 最后一个关闭者释放记录自身的簇与整条数据链
            let start = self.inode.disk.lock().start();
            let record = self.fs.fat.sector_to_cluster(self.inode.sector);
            if let Err(e) = self.fs.fat.remove_chain(&self.fs.cache, record, ClusterId::FREE) {
                log::error!("reclaiming inode record cluster failed: {e:?}");
            }
            if let Err(e) = self.fs.fat.remove_chain(&self.fs.cache, start, ClusterId::FREE) {
                log::error!("reclaiming data chain failed: {e:?}");
            }
            self.fs.cache.sync_all();
        }
    }
}

pub(crate) type OpenInodes = Mutex<Vec<Arc<Inode>>>;
