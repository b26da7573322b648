use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fat_fs::{Context, FatFileSystem, SECTOR_SIZE};
use vfs::{DirEntryType, Error};

use crate::BlockFile;

fn image_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fat-fs-{name}.img"))
}

/// 格式化一个新卷，镜像文件按测试名隔离
fn fresh(name: &str, total_sectors: usize) -> Arc<FatFileSystem> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image_path(name))
        .unwrap();
    fd.set_len((total_sectors * SECTOR_SIZE) as u64).unwrap();

    FatFileSystem::format(Arc::new(BlockFile(Mutex::new(fd))), total_sectors).unwrap()
}

fn remount(name: &str) -> Result<Arc<FatFileSystem>, Error> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .open(image_path(name))
        .unwrap();
    FatFileSystem::mount(Arc::new(BlockFile(Mutex::new(fd))))
}

#[test]
fn open_table_dedups_by_sector() {
    let fs = fresh("dedup", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/f", 0).unwrap();

    let a = fs.open(&ctx, "/f").unwrap();
    let b = fs.open(&ctx, "/f").unwrap();
    assert!(a.handle().ptr_eq(b.handle()));

    // 一个句柄的写入即刻对另一个可见
    a.write_at(0, b"hello");
    assert_eq!(b.length(), 5);
}

#[test]
fn grow_zero_fills_gap() {
    let fs = fresh("grow", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/a", 0).unwrap();

    let f = fs.open(&ctx, "/a").unwrap();
    assert_eq!(f.write_at(0, &[0xAA; 100]), 100);
    // 越过旧EOF写入，空洞跨扇区边界
    assert_eq!(f.write_at(600, &[0xBB; 50]), 50);
    assert_eq!(f.length(), 650);

    let mut buf = [0xFF; 650];
    assert_eq!(f.read_at(0, &mut buf), 650);
    assert!(buf[..100].iter().all(|&b| b == 0xAA));
    assert!(buf[100..600].iter().all(|&b| b == 0));
    assert!(buf[600..].iter().all(|&b| b == 0xBB));
}

#[test]
fn clusters_conserved_across_lifecycle() {
    let fs = fresh("conserve", 256);
    let mut ctx = Context::new();
    let before = fs.free_clusters();

    fs.create(&ctx, "/f", 1000).unwrap();
    {
        let f = fs.open(&ctx, "/f").unwrap();
        assert_eq!(f.write_at(0, &[1; 3000]), 3000);
    }
    fs.remove(&mut ctx, "/f").unwrap();

    assert_eq!(fs.free_clusters(), before);
}

#[test]
fn create_existing_allocates_nothing() {
    let fs = fresh("exists", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/f", 100).unwrap();

    let before = fs.free_clusters();
    assert!(matches!(
        fs.create(&ctx, "/f", 100),
        Err(Error::AlreadyExists)
    ));
    assert_eq!(fs.free_clusters(), before);
}

#[test]
fn removal_deferred_until_last_close() {
    let fs = fresh("unlink", 256);
    let mut ctx = Context::new();
    let before = fs.free_clusters();

    fs.create(&ctx, "/f", 0).unwrap();
    let f = fs.open(&ctx, "/f").unwrap();
    assert_eq!(f.write_at(0, b"still here"), 10);

    fs.remove(&mut ctx, "/f").unwrap();
    // 名称即刻消失
    assert!(matches!(fs.open(&ctx, "/f"), Err(Error::NotFound)));
    // 打开中的句柄照常工作
    let mut buf = [0; 10];
    assert_eq!(f.read_at(0, &mut buf), 10);
    assert_eq!(&buf, b"still here");

    // 最后一次关闭才回收空间
    drop(f);
    assert_eq!(fs.free_clusters(), before);
}

#[test]
fn write_partial_on_exhaustion() {
    let fs = fresh("full", 16);
    let ctx = Context::new();
    fs.create(&ctx, "/f", 0).unwrap();

    let f = fs.open(&ctx, "/f").unwrap();
    let wrote = f.write_at(0, &[7; 20000]);
    // 空间耗尽：保留已长出的部分
    assert!(0 < wrote && wrote < 20000);
    assert_eq!(f.length(), wrote);
    assert_eq!(fs.free_clusters(), 0);
}

#[test]
fn create_rolls_back_on_exhaustion() {
    let fs = fresh("rollback", 16);
    let ctx = Context::new();
    let before = fs.free_clusters();

    assert!(matches!(
        fs.create(&ctx, "/big", 64 * SECTOR_SIZE),
        Err(Error::Exhausted)
    ));
    // 半成品的链与目录项都不存在
    assert_eq!(fs.free_clusters(), before);
    assert!(matches!(fs.open(&ctx, "/big"), Err(Error::NotFound)));
}

#[test]
fn lazy_symlink_resolves_after_target_created() {
    let fs = fresh("lazy", 256);
    let ctx = Context::new();

    // 目标尚不存在，链接建立成功但无法解析
    fs.symlink(&ctx, "/data", "/ln").unwrap();
    assert!(matches!(fs.open(&ctx, "/ln"), Err(Error::NotFound)));

    fs.create(&ctx, "/data", 0).unwrap();
    fs.open(&ctx, "/data").unwrap().write_at(0, b"payload");

    let via = fs.open(&ctx, "/ln").unwrap();
    let mut buf = [0; 7];
    assert_eq!(via.read_at(0, &mut buf), 7);
    assert_eq!(&buf, b"payload");
}

#[test]
fn symlink_chain_propagates_pending_target() {
    let fs = fresh("chain", 256);
    let ctx = Context::new();

    fs.symlink(&ctx, "/data", "/ln1").unwrap();
    // 指向待决链接的链接继承最终目标名
    fs.symlink(&ctx, "/ln1", "/ln2").unwrap();

    fs.create(&ctx, "/data", 0).unwrap();
    assert!(fs.open(&ctx, "/ln1").is_ok());
    assert!(fs.open(&ctx, "/ln2").is_ok());
}

#[test]
fn symlink_to_existing_is_transparent() {
    let fs = fresh("transparent", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/data", 0).unwrap();
    fs.symlink(&ctx, "/data", "/ln").unwrap();

    let a = fs.open(&ctx, "/data").unwrap();
    let b = fs.open(&ctx, "/ln").unwrap();
    assert!(a.handle().ptr_eq(b.handle()));
}

#[test]
fn removing_symlink_keeps_target() {
    let fs = fresh("rmlink", 256);
    let mut ctx = Context::new();
    fs.create(&ctx, "/data", 0).unwrap();
    fs.symlink(&ctx, "/data", "/ln").unwrap();

    fs.remove(&mut ctx, "/ln").unwrap();
    assert!(matches!(fs.open(&ctx, "/ln"), Err(Error::NotFound)));
    assert!(fs.open(&ctx, "/data").is_ok());
}

#[test]
fn deny_write_pairs_per_handle() {
    let fs = fresh("deny", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/f", 0).unwrap();

    let mut a = fs.open(&ctx, "/f").unwrap();
    let b = fs.open(&ctx, "/f").unwrap();

    a.deny_write().unwrap();
    assert_eq!(b.write_at(0, b"x"), 0);
    // 同一句柄只能配对一次
    assert!(a.deny_write().is_err());

    a.allow_write().unwrap();
    assert_eq!(b.write_at(0, b"x"), 1);
    assert!(a.allow_write().is_err());
}

#[test]
fn deny_write_released_on_close() {
    let fs = fresh("deny-close", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/f", 0).unwrap();

    let mut a = fs.open(&ctx, "/f").unwrap();
    a.deny_write().unwrap();
    drop(a);

    let b = fs.open(&ctx, "/f").unwrap();
    assert_eq!(b.write_at(0, b"x"), 1);
}

#[test]
fn directory_listing() {
    let fs = fresh("listing", 256);
    let ctx = Context::new();
    fs.create(&ctx, "/a", 0).unwrap();
    fs.mkdir(&ctx, "/d").unwrap();
    fs.symlink(&ctx, "/a", "/ln").unwrap();

    let mut root = fs.open_dir(&ctx, "/").unwrap();
    let mut names: Vec<(String, DirEntryType)> = Vec::new();
    while let Some(entry) = root.read_entry() {
        names.push((entry.name, entry.ty));
    }

    assert_eq!(names.len(), 4);
    assert!(names.contains(&(".".into(), DirEntryType::Directory)));
    assert!(names.contains(&("a".into(), DirEntryType::Regular)));
    assert!(names.contains(&("d".into(), DirEntryType::Directory)));
    assert!(names.contains(&("ln".into(), DirEntryType::SymLink)));
}

#[test]
fn chdir_resolves_relative_paths() {
    let fs = fresh("chdir", 256);
    let mut ctx = Context::new();
    fs.mkdir(&ctx, "/d").unwrap();
    fs.create(&ctx, "/d/f", 0).unwrap();

    fs.chdir(&mut ctx, "/d").unwrap();
    let f = fs.open(&ctx, "f").unwrap();
    assert!(!f.is_dir());

    // 文件不能作为工作目录
    assert!(matches!(fs.chdir(&mut ctx, "f"), Err(Error::NotADirectory)));
}

#[test]
fn removing_cwd_resets_context() {
    let fs = fresh("rmcwd", 256);
    let mut ctx = Context::new();
    fs.mkdir(&ctx, "/d").unwrap();
    fs.chdir(&mut ctx, "/d").unwrap();
    assert!(ctx.cwd().is_some());

    fs.remove(&mut ctx, "/d").unwrap();
    assert!(ctx.cwd().is_none());

    // 相对路径回落到根目录
    fs.create(&ctx, "f", 0).unwrap();
    assert!(fs.open(&ctx, "/f").is_ok());
}

#[test]
fn remove_nonempty_dir_frees_its_inode() {
    let fs = fresh("rmdir-nonempty", 256);
    let mut ctx = Context::new();
    let before = fs.free_clusters();

    fs.mkdir(&ctx, "/d").unwrap();
    // 目录自身的开销：inode记录簇 + 项表的簇链
    let dir_cost = before - fs.free_clusters();
    fs.create(&ctx, "/d/f", 0).unwrap();
    assert!(matches!(
        fs.create(&ctx, "/d/f", 0),
        Err(Error::AlreadyExists)
    ));

    // 非空目录也允许删除；子项失去名字成为孤儿
    let occupied = fs.free_clusters();
    fs.remove(&mut ctx, "/d").unwrap();
    assert_eq!(fs.free_clusters(), occupied + dir_cost);
    assert!(matches!(fs.open(&ctx, "/d"), Err(Error::NotFound)));
}

#[test]
fn names_share_one_namespace() {
    let fs = fresh("namespace", 256);
    let ctx = Context::new();

    fs.create(&ctx, "/x", 0).unwrap();
    assert!(matches!(fs.mkdir(&ctx, "/x"), Err(Error::AlreadyExists)));

    fs.mkdir(&ctx, "/d").unwrap();
    assert!(matches!(fs.create(&ctx, "/d", 0), Err(Error::AlreadyExists)));
}

#[test]
fn missing_intermediate_component() {
    let fs = fresh("intermediate", 256);
    let ctx = Context::new();

    assert!(matches!(fs.create(&ctx, "/no/f", 0), Err(Error::NotFound)));

    fs.create(&ctx, "/plain", 0).unwrap();
    // 中间成分是文件同样视为缺失
    assert!(matches!(fs.open(&ctx, "/plain/f"), Err(Error::NotFound)));
}

#[test]
fn overlong_name_rejected_before_any_change() {
    let fs = fresh("overlong", 256);
    let ctx = Context::new();
    let before = fs.free_clusters();

    let long = "x".repeat(15);
    assert!(matches!(
        fs.create(&ctx, &format!("/{long}"), 0),
        Err(Error::Invalid)
    ));
    assert_eq!(fs.free_clusters(), before);
}

#[test]
fn root_is_openable_and_permanent() {
    let fs = fresh("root", 256);
    let mut ctx = Context::new();

    let root = fs.open(&ctx, "/").unwrap();
    assert!(root.is_dir());

    assert!(matches!(fs.create(&ctx, "/", 0), Err(Error::AlreadyExists)));
    assert!(matches!(fs.remove(&mut ctx, "/"), Err(Error::Invalid)));
}

#[test]
fn mount_preserves_volume_state() {
    {
        let fs = fresh("mount", 256);
        let ctx = Context::new();
        fs.create(&ctx, "/f", 0).unwrap();
        fs.open(&ctx, "/f").unwrap().write_at(0, b"persist");
        fs.sync();
    }

    let fs = remount("mount").unwrap();
    let ctx = Context::new();
    let f = fs.open(&ctx, "/f").unwrap();
    let mut buf = [0; 7];
    assert_eq!(f.read_at(0, &mut buf), 7);
    assert_eq!(&buf, b"persist");
}

#[test]
fn mount_rejects_inconsistent_geometry() {
    fresh("geometry", 256);

    // 魔数有效，但fat_sectors把数据区挤出了卷外
    let mut fd = OpenOptions::new()
        .read(true)
        .write(true)
        .open(image_path("geometry"))
        .unwrap();
    fd.seek(SeekFrom::Start(8)).unwrap();
    fd.write_all(&u32::MAX.to_le_bytes()).unwrap();
    drop(fd);

    assert!(matches!(remount("geometry"), Err(Error::Invalid)));
}

#[test]
fn mount_rejects_unformatted_volume() {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image_path("garbage"))
        .unwrap();
    fd.set_len((256 * SECTOR_SIZE) as u64).unwrap();

    assert!(matches!(
        FatFileSystem::mount(Arc::new(BlockFile(Mutex::new(fd)))),
        Err(Error::Invalid)
    ));
}
