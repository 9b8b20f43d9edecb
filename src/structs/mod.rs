mod bitmap;
mod block;
mod header;
mod inode;
mod layout;

use std::{
    io::{Read, Seek, Write},
    marker::PhantomData,
};

pub use layout::*;

pub const MAGIC_SIGNATURE: u32 = 0x6C32_6578;
pub const FORMAT_VERSION: u16 = 1;
/// Bytes reserved for the [`Header`] at the start of the image
pub const HEADER_SIZE: u64 = 64;
/// Bytes of one encoded [`Inode`]
pub const INODE_RECORD_SIZE: u64 = 54;
pub const BLOCK_POINTERS: usize = 15;
pub const DIRECT_POINTERS: usize = 14;
/// Slot in [`Inode::blocks`] naming the indirect block
pub const INDIRECT_POINTER: usize = 14;
/// Width of one block id inside an indirect block
pub const INDIRECT_ENTRY_SIZE: u32 = 4;
pub const ROOT_INODE: u32 = 0;
/// Sentinel for an unassigned indirect pointer
pub const NULL_BLOCK: u32 = 0;

pub(crate) trait PermanentIndexed: Sized {
    type Error;
    fn load<D: Read + Seek>(
        block_device: &mut D,
        layout: &Layout,
        index: u32,
    ) -> Result<Self, Self::Error>;
    fn flush<D: Write + Seek>(&self, block_device: &mut D, layout: &Layout)
        -> Result<(), Self::Error>;
}

pub trait AsBitmap {
    /// Region the bitmap of this resource occupies, as (position, slot count)
    fn region(layout: &Layout) -> (u64, u64);
}

/// Region sizes of an image, fixed at format time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Block size in bytes
    pub(crate) block_size: u32,
    /// Count of blocks in the data region
    pub(crate) block_count: u32,
    /// Count of slots in the inode table
    pub(crate) inode_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic signature
    pub(crate) magic: u32,
    /// On-disk format version
    pub(crate) version: u16,
    /// Encoded inode width, guards against mixing record versions
    pub(crate) inode_record_size: u16,
    pub(crate) layout: Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile = 0,
    Directory = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// Inode's index
    pub(crate) index: u32,
    /// File type, [`None`] while the slot is free
    pub(crate) kind: Option<FileKind>,
    /// Bytes used by the file's data
    pub(crate) size: u32,
    /// Creation timestamp in seconds
    pub(crate) created_at: u32,
    /// Last access timestamp in seconds
    pub(crate) accessed_at: u32,
    /// Last data modification timestamp in seconds
    pub(crate) modified_at: u32,
    /// Deletion timestamp in seconds (zero if undeleted)
    pub(crate) deleted_at: u32,
    /// Direct block pointers followed by the indirect pointer at
    /// [`INDIRECT_POINTER`]
    pub(crate) blocks: [u16; BLOCK_POINTERS],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block's index
    pub(crate) index: u32,
    /// Raw data as bytes
    pub(crate) data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Bitmap<T: AsBitmap> {
    /// One bit per slot, most significant bit first, set while free
    pub bitfield: Vec<u8>,
    /// Number of valid indexes
    pub count: u64,
    /// Position
    pub position: u64,
    #[doc(hidden)]
    __type: PhantomData<T>,
}
