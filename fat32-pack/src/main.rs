mod block_file;
mod cli;

use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Arc;

use block_dev::BlockDevice;
use clap::Parser;
use fat32::{FatFileSystem, FileType, FormatOptions, MountOptions};
use typed_bytesize::ByteSizeIec;

pub use self::{block_file::BlockFile, cli::Cli};

fn fs_error(e: vfs::Error) -> io::Error {
    io::Error::other(e.to_string())
}

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let disk_size = ByteSizeIec::mib(cli.size).0;
    log::info!("image={:?} size={}MiB dir={:?}", cli.out, cli.size, cli.dir);

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&cli.out)?;
    fd.set_len(disk_size)?;

    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
    fat32::format(block_dev.clone(), disk_size as usize, &FormatOptions::default()).map_err(fs_error)?;

    let fs = FatFileSystem::mount(block_dev, MountOptions::default()).map_err(fs_error)?;
    {
        let dir = fs.mkdir_all(&cli.dir).map_err(fs_error)?;
        for path in &cli.files {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| io::Error::other(format!("bad file name {path:?}")))?;
            let data = fs::read(path)?;

            dir.create(name, FileType::Regular)
                .and_then(|inode| inode.write_at(0, &data))
                .map_err(fs_error)?;
            log::info!("copied {path:?} ({} bytes)", data.len());

            // 大文件会占满页缓存，句柄释放后才能丢掉它的干净页
            fs.balance().map_err(fs_error)?;
        }
    }
    fs.unmount().map_err(fs_error)
}
