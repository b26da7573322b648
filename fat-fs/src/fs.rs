//! # 文件系统门面
//!
//! 组合下层各组件实现`create/open/remove/mkdir/chdir/symlink`。
//! 所有入口共用一把命名空间锁：目录项与簇链表的变更互斥进行，
//! 粗粒度换取简单。已打开inode上的裸`read_at`/`write_at`不在此列。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::Mutex;
use vfs::Error;

use crate::SECTOR_SIZE;
use crate::dir::{Dir, DiskDirEntry};
use crate::fat::{ClusterId, Fat};
use crate::file::File;
use crate::inode::{DiskInode, OpenInodes};
use crate::path::Path;
use crate::sector::{SectorCache, SectorId};

/// 超级块的校验魔数
const MAGIC: u32 = 0x4641_5453;

/// 根目录inode固定占据的簇
const ROOT_CLUSTER: ClusterId = ClusterId::new(1);

/// 根目录初始槽位数，恰好填满一个扇区
const ROOT_DIR_SLOTS: usize = SECTOR_SIZE / DiskDirEntry::SIZE;

/// 新建目录的初始槽位数
const DIR_INIT_SLOTS: usize = 16;

/// 超级块：校验卷合法性，定位FAT区与数据区
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    magic: u32,
    pub total_sectors: u32,
    pub fat_sectors: u32,
    pub root_cluster: u32,
}

impl SuperBlock {
    #[inline]
    fn init(&mut self, total_sectors: usize, fat_sectors: usize) {
        *self = Self {
            magic: MAGIC,
            total_sectors: total_sectors as u32,
            fat_sectors: fat_sectors as u32,
            root_cluster: u32::from(ROOT_CLUSTER),
        };
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }
}

/// 每个进程的文件系统状态：当前工作目录。
/// `chdir`整体替换；其指向的目录被删除时清空。
#[derive(Default)]
pub struct Context {
    cwd: Option<Dir>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cwd(&self) -> Option<&Dir> {
        self.cwd.as_ref()
    }
}

pub struct FatFileSystem {
    pub(crate) cache: SectorCache,
    pub(crate) fat: Fat,
    /// 打开表：以扇区号去重的inode对象
    pub(crate) open_inodes: OpenInodes,
    /// 命名空间锁
    ns: Mutex<()>,
    root_sector: SectorId,
}

impl FatFileSystem {
    /// 格式化空卷：建立FAT表与空的根目录。
    /// 仅在首次启动或显式重格式化时调用。
    pub fn format(dev: Arc<dyn BlockDevice>, total_sectors: usize) -> Result<Arc<Self>, Error> {
        let fat_sectors = (total_sectors * size_of::<u32>()).div_ceil(SECTOR_SIZE);
        let data_start = 1 + fat_sectors;
        if total_sectors < data_start + 3 {
            log::error!("volume too small: {total_sectors} sectors");
            return Err(Error::Invalid);
        }
        let clusters = total_sectors - data_start;

        let cache = SectorCache::new(dev);
        for i in 0..fat_sectors {
            cache.get(SectorId::new(1 + i)).lock().zeroize();
        }
        cache
            .get(SectorId::new(0))
            .lock()
            .map_mut(0, |sb: &mut SuperBlock| sb.init(total_sectors, fat_sectors));

        let fs = Arc::new(Self {
            cache,
            fat: Fat::new(
                SectorId::new(1),
                fat_sectors,
                SectorId::new(data_start),
                clusters,
            ),
            open_inodes: OpenInodes::new(Vec::new()),
            ns: Mutex::new(()),
            root_sector: SectorId::new(data_start),
        });

        // 预占簇1，随后建立根目录
        fs.fat.reserve(&fs.cache, ROOT_CLUSTER);
        fs.create_inode(fs.root_sector, ROOT_DIR_SLOTS * DiskDirEntry::SIZE, true)?;
        {
            let root = fs.root_dir()?;
            root.add(".", fs.root_sector)?;
        }
        fs.cache.sync_all();

        log::info!("formatted volume: {total_sectors} sectors, {clusters} clusters");
        Ok(fs)
    }

    /// 挂载已格式化的卷
    pub fn mount(dev: Arc<dyn BlockDevice>) -> Result<Arc<Self>, Error> {
        let cache = SectorCache::new(dev);
        let sb: SuperBlock = *cache.get(SectorId::new(0)).lock().get(0);
        if !sb.is_valid() {
            log::error!("superblock magic mismatch, not a formatted volume");
            return Err(Error::Invalid);
        }

        let fat_sectors = sb.fat_sectors as usize;
        let data_start = 1 + fat_sectors;
        let total_sectors = sb.total_sectors as usize;
        if total_sectors <= data_start {
            log::error!("superblock geometry is inconsistent");
            return Err(Error::Invalid);
        }
        let clusters = total_sectors - data_start;

        Ok(Arc::new(Self {
            cache,
            fat: Fat::new(
                SectorId::new(1),
                fat_sectors,
                SectorId::new(data_start),
                clusters,
            ),
            open_inodes: OpenInodes::new(Vec::new()),
            ns: Mutex::new(()),
            root_sector: SectorId::new(data_start),
        }))
    }

    /// 打开根目录
    pub fn root_dir(self: &Arc<Self>) -> Result<Dir, Error> {
        Dir::open(self.open_inode(self.root_sector)?)
    }

    /// 创建`size`字节的文件
    pub fn create(self: &Arc<Self>, ctx: &Context, path: &str, size: usize) -> Result<(), Error> {
        let _ns = self.ns.lock();

        let path = Path::parse(path).ok_or(Error::Invalid)?;
        let Some(name) = path.filename() else {
            // 根目录恒已存在
            return Err(Error::AlreadyExists);
        };
        let dir = self.walk(ctx, &path)?;

        // 重名时提前返回，不触碰分配器
        if dir.contains(name) {
            return Err(Error::AlreadyExists);
        }
        self.create_at(&dir, name, size, false)
    }

    /// 打开路径指向的文件或目录
    pub fn open(self: &Arc<Self>, ctx: &Context, path: &str) -> Result<File, Error> {
        let _ns = self.ns.lock();

        let path = Path::parse(path).ok_or(Error::Invalid)?;
        let Some(name) = path.filename() else {
            return Ok(File::new(self.open_inode(self.root_sector)?));
        };

        let dir = self.walk(ctx, &path)?;
        let sector = dir.lookup(name)?;
        Ok(File::new(self.open_inode(sector)?))
    }

    /// 以目录方式打开路径，用于遍历目录项
    pub fn open_dir(self: &Arc<Self>, ctx: &Context, path: &str) -> Result<Dir, Error> {
        let _ns = self.ns.lock();

        let path = Path::parse(path).ok_or(Error::Invalid)?;
        let Some(name) = path.filename() else {
            return self.root_dir();
        };

        let dir = self.walk(ctx, &path)?;
        let sector = dir.lookup(name)?;
        Dir::open(self.open_inode(sector)?)
    }

    /// 删除路径指向的项。
    /// 目标是本进程的当前工作目录时，先解除该引用再删除。
    pub fn remove(self: &Arc<Self>, ctx: &mut Context, path: &str) -> Result<(), Error> {
        let _ns = self.ns.lock();

        let path = Path::parse(path).ok_or(Error::Invalid)?;
        let name = path.filename().ok_or(Error::Invalid)?;
        let dir = self.walk(ctx, &path)?;

        if let Some(entry) = dir.entry_of(name) {
            if !entry.is_symlink() {
                if let Some(cwd) = &ctx.cwd {
                    if cwd.handle().sector() == entry.inode_sector() {
                        ctx.cwd = None;
                    }
                }
            }
        }

        dir.remove(name)?;
        self.cache.sync_all();
        Ok(())
    }

    /// 创建目录
    pub fn mkdir(self: &Arc<Self>, ctx: &Context, path: &str) -> Result<(), Error> {
        let _ns = self.ns.lock();

        let path = Path::parse(path).ok_or(Error::Invalid)?;
        let name = path.filename().ok_or(Error::AlreadyExists)?;
        let dir = self.walk(ctx, &path)?;

        if dir.contains(name) {
            return Err(Error::AlreadyExists);
        }
        self.create_at(&dir, name, DIR_INIT_SLOTS * DiskDirEntry::SIZE, true)
    }

    /// 切换当前工作目录
    pub fn chdir(self: &Arc<Self>, ctx: &mut Context, path: &str) -> Result<(), Error> {
        let _ns = self.ns.lock();

        let path = Path::parse(path).ok_or(Error::Invalid)?;
        let dir = match path.filename() {
            None => self.root_dir()?,
            Some(name) => {
                let parent = self.walk(ctx, &path)?;
                let sector = parent.lookup(name)?;
                Dir::open(self.open_inode(sector)?)?
            }
        };

        ctx.cwd = Some(dir);
        Ok(())
    }

    /// 创建符号链接。目标尚不存在时记为惰性链接而非失败；
    /// 目标本身是待决惰性链接时传播其存储的最终名称。
    pub fn symlink(
        self: &Arc<Self>,
        ctx: &Context,
        target: &str,
        linkpath: &str,
    ) -> Result<(), Error> {
        let _ns = self.ns.lock();

        let link = Path::parse(linkpath).ok_or(Error::Invalid)?;
        let link_name = link.filename().ok_or(Error::Invalid)?;
        let target_path = Path::parse(target).ok_or(Error::Invalid)?;
        let target_name = target_path.filename().ok_or(Error::Invalid)?;

        let link_dir = self.walk(ctx, &link)?;
        let target_dir = self.walk(ctx, &target_path)?;

        if let Some(ultimate) = target_dir.pending_target(target_name) {
            link_dir.add_lazy(link_name, &ultimate)?;
        } else {
            match target_dir.lookup(target_name) {
                Ok(sector) => link_dir.add_symlink(link_name, sector)?,
                Err(Error::NotFound) => link_dir.add_lazy(link_name, target_name)?,
                Err(e) => return Err(e),
            }
        }

        self.cache.sync_all();
        Ok(())
    }

    /// 空闲簇统计
    pub fn free_clusters(&self) -> usize {
        self.fat.free_clusters(&self.cache)
    }

    /// 把所有脏扇区写回设备
    pub fn sync(&self) {
        self.cache.sync_all();
    }
}

impl FatFileSystem {
    /// 自起点逐级下降路径的中间目录。
    /// 任何成分缺失或不是目录都以[`Error::NotFound`]中止；
    /// 途中打开的目录句柄在任何退出路径上都随作用域关闭。
    fn walk(self: &Arc<Self>, ctx: &Context, path: &Path) -> Result<Dir, Error> {
        let mut dir = if path.is_absolute() {
            self.root_dir()?
        } else {
            match ctx.cwd.as_ref() {
                Some(cwd) => cwd.clone(), // 重新打开
                None => self.root_dir()?,
            }
        };

        for name in path.dirs() {
            let sector = dir.lookup(name)?;
            let next = self.open_inode(sector)?;
            if !next.is_dir() {
                return Err(Error::NotFound);
            }
            dir = Dir::open(next)?;
        }

        Ok(dir)
    }

    /// 分配-提交纪律：先分配记录簇与数据链，目录插入失败则全部回滚，
    /// 绝不留下已分配而无人引用的链。
    fn create_at(&self, dir: &Dir, name: &str, size: usize, is_dir: bool) -> Result<(), Error> {
        let record = self
            .fat
            .create_chain(&self.cache, ClusterId::FREE)
            .ok_or(Error::Exhausted)?;
        let sector = self.fat.cluster_to_sector(record);

        if let Err(e) = self.create_inode(sector, size, is_dir) {
            let _ = self.fat.remove_chain(&self.cache, record, ClusterId::FREE);
            return Err(e);
        }

        if let Err(e) = dir.add(name, sector) {
            let start = self
                .cache
                .get(sector)
                .lock()
                .map(0, |disk: &DiskInode| disk.start());
            let _ = self.fat.remove_chain(&self.cache, start, ClusterId::FREE);
            let _ = self.fat.remove_chain(&self.cache, record, ClusterId::FREE);
            return Err(e);
        }

        self.cache.sync_all();
        Ok(())
    }
}
