//! # 扇区缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的扇区复制到内存中，提高对块设备的操作效率。
//! 同时，缓存层也会尝试返回已缓存的扇区。
//!
//! 每个卷持有自己的缓存，互不干扰。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use block_dev::BlockDevice;
use derive_more::{Add, From, Into};
use spin::Mutex;

use crate::SECTOR_SIZE;

/// 扇区号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, From, Into)]
#[repr(transparent)]
pub struct SectorId(usize);

impl core::ops::Add<usize> for SectorId {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        self + Self(rhs)
    }
}

impl SectorId {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }
}

/// 单个卷的扇区缓存，缓存、调度扇区
pub struct SectorCache {
    /// 底层块设备的引用
    dev: Arc<dyn BlockDevice>,
    queue: Mutex<Vec<(SectorId, Arc<Mutex<Sector>>)>>,
}

impl SectorCache {
    /// 扇区缓存个数的上限
    const CAPACITY: usize = 16;

    pub fn new(dev: Arc<dyn BlockDevice>) -> Self {
        Self {
            dev,
            queue: Mutex::new(Vec::new()),
        }
    }

    // 缓存调度策略：踢走闲置扇区
    pub fn get(&self, id: SectorId) -> Arc<Mutex<Sector>> {
        let mut queue = self.queue.lock();

        // 尝试从缓冲区中读取扇区
        if let Some(cache) = queue
            .iter()
            .find_map(|(sid, cache)| (id == *sid).then_some(cache))
        {
            return Arc::clone(cache);
        };

        // 触及上限，写回一个扇区
        if queue.len() == Self::CAPACITY {
            let index = queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1) // 没有其它引用的才能写回
                .expect("run out of sector cache");
            queue.remove(index);
        }

        // 缓存新扇区
        let sector = Arc::new(Mutex::new(Sector::new(id, self.dev.clone())));
        queue.push((id, sector.clone()));

        sector
    }

    pub fn sync_all(&self) {
        self.queue
            .lock()
            .iter()
            .for_each(|(_, cache)| cache.lock().sync());
    }
}

/// 内存中的扇区
pub struct Sector {
    /// 缓存的数据
    data: [u8; SECTOR_SIZE],
    /// 对应的扇区ID
    id: SectorId,
    /// 底层块设备的引用
    dev: Arc<dyn BlockDevice>,
    /// 是否为脏扇区
    modified: bool,
}

impl Sector {
    pub fn new(id: SectorId, dev: Arc<dyn BlockDevice>) -> Self {
        let mut data = [0; SECTOR_SIZE];
        dev.read_block(id.into(), &mut data);

        Self {
            data,
            id,
            dev,
            modified: false,
        }
    }

    pub fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.dev.write_block(self.id.into(), &self.data);
        }
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= SECTOR_SIZE);
        let addr = self.offset(offset).cast();
        unsafe { &*addr }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= SECTOR_SIZE);
        self.modified = true;
        let addr = self.offset(offset).cast_mut().cast();
        unsafe { &mut *addr }
    }

    pub fn as_slice<T: Sized>(&self) -> &[T] {
        let type_size = mem::size_of::<T>();
        assert_eq!(0, SECTOR_SIZE % type_size);
        unsafe { core::slice::from_raw_parts(self.data.as_ptr().cast(), SECTOR_SIZE / type_size) }
    }

    pub fn as_mut_slice<T: Sized>(&mut self) -> &mut [T] {
        let type_size = mem::size_of::<T>();
        assert_eq!(0, SECTOR_SIZE % type_size);
        self.modified = true;
        unsafe {
            core::slice::from_raw_parts_mut(self.data.as_mut_ptr().cast(), SECTOR_SIZE / type_size)
        }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    #[inline]
    pub fn map_slice<T: Sized, V>(&self, f: impl FnOnce(&[T]) -> V) -> V {
        f(self.as_slice())
    }

    #[inline]
    pub fn map_mut_slice<T: Sized, V>(&mut self, f: impl FnOnce(&mut [T]) -> V) -> V {
        f(self.as_mut_slice())
    }

    #[inline]
    pub fn zeroize(&mut self) {
        self.data.fill(0);
        self.modified = true;
    }
}

impl Sector {
    #[inline]
    fn offset(&self, count: usize) -> *const u8 {
        &self.data[count]
    }
}

impl Drop for Sector {
    fn drop(&mut self) {
        self.sync();
    }
}
