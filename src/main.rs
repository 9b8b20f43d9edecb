use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use ext2lite::{
    mount, Filesystem, Layout, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE, DEFAULT_INODE_COUNT,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
enum Cli {
    /// Write an empty filesystem to an image file, replacing its contents
    Format(FormatArgs),
    /// Serve an image through FUSE, formatting it first if it holds none
    Mount(MountArgs),
}

#[derive(clap::Args, Debug)]
struct LayoutArgs {
    /// Block size in bytes, a power of two between 512 and 8192
    #[clap(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,
    /// Count of blocks in the data region
    #[clap(long, default_value_t = DEFAULT_BLOCK_COUNT)]
    blocks: u32,
    /// Count of inodes
    #[clap(long, default_value_t = DEFAULT_INODE_COUNT)]
    inodes: u32,
}

impl LayoutArgs {
    fn layout(&self) -> Result<Layout, ext2lite::Error> {
        Layout::new(self.block_size, self.blocks, self.inodes)
    }
}

#[derive(clap::Args, Debug)]
struct FormatArgs {
    /// Path of the image file
    image: PathBuf,
    #[command(flatten)]
    layout: LayoutArgs,
}

#[derive(clap::Args, Debug)]
struct MountArgs {
    /// Path of the image file, created when missing
    image: PathBuf,
    /// Directory to mount the filesystem on
    mountpoint: PathBuf,
    #[command(flatten)]
    layout: LayoutArgs,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    match Cli::parse() {
        Cli::Format(args) => {
            let layout = args.layout.layout()?;
            let dev = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&args.image)?;
            let fs = Filesystem::format(Box::new(dev), layout)?;
            info!("Formatted {}", args.image.display());
            println!("{}", fs.layout());
        }
        Cli::Mount(args) => {
            let layout = args.layout.layout()?;
            let dev = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&args.image)?;
            let fs = Filesystem::open_or_format(Box::new(dev), layout)?;
            mount(fs, &args.mountpoint)?;
        }
    }
    Ok(())
}
