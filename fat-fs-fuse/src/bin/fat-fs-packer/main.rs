mod cli;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use block_dev::BlockDevice;
use clap::Parser;
use fat_fs::{Context, FatFileSystem, SECTOR_SIZE};
use fat_fs_fuse::BlockFile;

use self::cli::Cli;

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    println!("source={:?}\nout_dir={:?}", cli.source, cli.out_dir);

    let total_sectors = cli.size.0 as usize / SECTOR_SIZE;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(cli.out_dir.join("fs.img"))?;
    fd.set_len((total_sectors * SECTOR_SIZE) as u64)?;

    let dev: Arc<dyn BlockDevice> = Arc::new(BlockFile(Mutex::new(fd)));
    let fs = FatFileSystem::format(dev, total_sectors).expect("formatting failed");
    let ctx = Context::new();
    fs.mkdir(&ctx, "/bin").unwrap();

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        let name = entry
            .file_name()
            .into_string()
            .expect("source file name is not utf-8");
        log::info!("packing {name:?}");

        let mut data: Vec<u8> = Vec::new();
        File::open(entry.path())?.read_to_end(&mut data)?;

        let path = format!("/bin/{name}");
        fs.create(&ctx, &path, data.len()).unwrap();
        let f = fs.open(&ctx, &path).unwrap();
        assert_eq!(f.write_at(0, &data), data.len(), "volume too small");
    }

    fs.sync();
    Ok(())
}
