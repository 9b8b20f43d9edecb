use log::debug;

use super::{helpers::*, BlockCursor};
use crate::structs::{FileKind, Inode};
use crate::{Error, Filesystem};

impl Filesystem {
    fn load_regular_file(&mut self, index: u32) -> Result<Inode, Error> {
        let inode = self.load_inode(index)?;
        if !inode.is_regular_file() || inode.is_deleted() {
            return Err(Error::NotFound(format!("file inode {index}")));
        }
        Ok(inode)
    }

    /// Whole content of the regular file at `path`
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        let index = self.resolve_file(path)?;
        self.read_inode_data(index)
    }

    pub fn read_inode_data(&mut self, index: u32) -> Result<Vec<u8>, Error> {
        let mut inode = self.load_regular_file(index)?;
        let block_size = self.layout.block_size() as usize;
        let mut remaining = inode.size as usize;
        let mut data = Vec::with_capacity(remaining);
        for id in self.block_ids(&inode)? {
            if remaining == 0 {
                break;
            }
            let block = self.load_block(id)?;
            let take = remaining.min(block_size);
            data.extend_from_slice(&block.data[..take]);
            remaining -= take;
        }
        inode.accessed_at = timestamp_now();
        self.flush_inode(&inode)?;
        Ok(data)
    }

    /// Replace or extend the content of the regular file at `path`,
    /// creating the file first when it does not exist
    pub fn write_file(&mut self, path: &str, data: &[u8], append: bool) -> Result<u32, Error> {
        let (parent, name) = split_path(path);
        let parent = self.resolve_directory(parent)?;
        let index = self.create_in(parent, name, FileKind::RegularFile)?.id();
        self.write_inode_data(index, data, append)?;
        Ok(index)
    }

    /// Write `data` at the start of the file, or after its last byte when
    /// `append` is set. Capacity and free space are checked before any
    /// block is touched.
    pub fn write_inode_data(&mut self, index: u32, data: &[u8], append: bool) -> Result<(), Error> {
        let mut inode = self.load_regular_file(index)?;
        let offset = if append { inode.size as u64 } else { 0 };
        let end = offset + data.len() as u64;
        let capacity = self.layout.max_file_blocks();
        if end > u32::MAX as u64 {
            return Err(Error::FileTooLarge {
                required: self.layout.blocks_for(end),
                capacity,
            });
        }
        let ids = self.resize_blocks(&mut inode, self.layout.blocks_for(end))?;
        let mut cursor = BlockCursor::new(&self.layout);
        cursor.set(offset);
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut block = self.load_block(ids[cursor.block() as usize])?;
            let rest = block.write_bytes(cursor.byte(), remaining);
            self.flush_block(&block)?;
            cursor.advance((remaining.len() - rest.len()) as u64);
            remaining = rest;
        }
        inode.size = end as u32;
        inode.modified_at = timestamp_now();
        debug!("Wrote {} bytes to inode {index}, now {end} bytes", data.len());
        self.flush_inode(&inode)
    }

    /// Soft delete the regular file at `path`, releasing its blocks
    pub fn remove_file(&mut self, path: &str) -> Result<(), Error> {
        let (parent, name) = split_path(path);
        let parent = self.resolve_directory(parent)?;
        self.remove_in(parent, name, FileKind::RegularFile)
    }
}
