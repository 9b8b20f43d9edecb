use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;

use ext2lite::Filesystem;

/// Inspect the structures of an image, reloading it before every command
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path of the image file
    #[clap(default_value = "/tmp/ext2lite.img")]
    image: PathBuf,
}

const HELP: &str = "\
s          header and layout
b [n]      block bitmap, or block n
i [n]      inode bitmap, or inode n
d <n>      raw entries of directory inode n
l [path]   live entries of a directory
u          usage
q          quit";

fn prompt(separator: &str) -> Option<Vec<String>> {
    let mut line = String::new();
    print!("{separator}");
    std::io::stdout().flush().ok()?;
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.split_whitespace().map(str::to_string).collect()),
        Err(_) => None,
    }
}

fn execute(image: &Path, cmd: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if cmd.is_empty() {
        return Ok(());
    }
    let dev = std::fs::File::options()
        .read(true)
        .write(false)
        .open(image)?;
    let mut fs = Filesystem::load(Box::new(dev))?;
    match cmd[0].as_str() {
        "s" => println!["{}", fs.header()?],
        "b" => {
            if cmd.len() == 2 {
                println!["{}", fs.load_block(cmd[1].parse()?)?];
            } else {
                println!["{}", fs.block_bitmap()?]
            }
        }
        "i" => {
            if cmd.len() == 2 {
                println!["{}", fs.load_inode(cmd[1].parse()?)?];
            } else {
                println!["{}", fs.inode_bitmap()?]
            }
        }
        "d" if cmd.len() == 2 => {
            for entry in fs.raw_entries(cmd[1].parse()?)? {
                let state = if fs.load_inode(entry.inode())?.is_deleted() {
                    "deleted"
                } else {
                    "live"
                };
                println!["{entry}  ({state})"];
            }
        }
        "l" => {
            let path = cmd.get(1).map_or("/", String::as_str);
            for entry in fs.list_directory(path)? {
                println!["{entry}"];
            }
        }
        "u" => {
            let usage = fs.usage()?;
            println![
                "blocks: {} of {} free\ninodes: {} of {} free",
                usage.free_blocks, usage.total_blocks, usage.free_inodes, usage.total_inodes
            ];
        }
        _ => println!["{HELP}"],
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    while let Some(cmd) = prompt(">> ") {
        if cmd.first().map(String::as_str) == Some("q") {
            break;
        }
        if let Err(e) = execute(&args.image, &cmd) {
            eprintln!("{e}");
        }
    }
}
