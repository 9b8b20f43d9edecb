mod block_cursor;
mod dir_entry;
mod directory;
mod helpers;
mod regular_file;

pub use helpers::*;

use crate::structs::{FileKind, Inode};

const BYTES_IN_U32: usize = 4;
const BYTES_IN_U16: usize = 2;

/// Longest name a directory entry can hold
pub const MAX_NAME_LENGTH: usize = 255;
/// Bytes preceding the name in an encoded [`DirEntry`]
pub const DIR_ENTRY_HEADER_SIZE: usize = 8;

/// One record of a directory's data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode the entry points to
    pub(crate) inode: u32,
    /// Encoded width, header included
    pub(crate) record_length: u16,
    pub(crate) name_length: u16,
    pub(crate) kind: FileKind,
    /// Raw name bytes, not terminated
    pub(crate) name: Vec<u8>,
}

/// Directory with every record found in its blocks, stale ones included
#[derive(Debug, Clone)]
pub struct Directory {
    pub(crate) inode: Inode,
    pub(crate) entries: Vec<DirEntry>,
}

/// Outcome of creating a named file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created(u32),
    /// A live entry of the same kind already had the name
    Existing(u32),
}

impl Creation {
    pub fn id(&self) -> u32 {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Position inside a file's block list
#[derive(Debug, Clone)]
pub struct BlockCursor {
    pub(crate) block_size: usize,
    pub(crate) current_block: u64,
    pub(crate) current_byte: usize,
}
