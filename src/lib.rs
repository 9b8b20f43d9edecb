//! Single-file ext2-inspired filesystem: an image holding a header, block and
//! inode bitmaps, an inode table and a data region, with a path-based engine
//! on top and a FUSE adapter to mount it.

pub mod error;
mod filesystem;
mod filetypes;
mod structs;

pub use error::{Error, Resource};
pub use filesystem::{mount, BlockDevice, Filesystem, FuseFs, Usage};
pub use filetypes::{split_path, Creation, DirEntry, Directory, MAX_NAME_LENGTH};
pub use structs::{
    Bitmap, Block, FileKind, Header, Inode, Layout, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE,
    DEFAULT_INODE_COUNT, ROOT_INODE,
};
