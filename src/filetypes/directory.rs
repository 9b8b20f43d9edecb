use log::{debug, info};

use super::{helpers::*, Creation, DirEntry, Directory};
use crate::structs::{Block, FileKind, Inode, ROOT_INODE};
use crate::{Error, Filesystem, Resource};

/// Where the next `length` byte entry starts in a directory of `size` bytes.
/// Entries never straddle blocks, so one that does not fit the tail opens
/// a new block.
fn entry_position(size: u64, length: u64, block_size: u64) -> u64 {
    let tail = size % block_size;
    if size > 0 && (tail == 0 || tail + length > block_size) {
        size.div_ceil(block_size) * block_size
    } else {
        size
    }
}

impl Directory {
    pub fn load(fs: &mut Filesystem, index: u32) -> Result<Self, Error> {
        let inode = fs.load_inode(index)?;
        if !inode.is_dir() || inode.is_deleted() {
            return Err(Error::NotFound(format!("directory inode {index}")));
        }
        let block_size = fs.layout.block_size() as u64;
        let ids = fs.block_ids(&inode)?;
        let used = inode.size as u64;
        let mut entries = Vec::new();
        for (position, id) in ids.into_iter().enumerate() {
            let start = position as u64 * block_size;
            if start >= used {
                break;
            }
            let limit = (used - start).min(block_size) as usize;
            let block = fs.load_block(id)?;
            let mut records = &block.data[..limit];
            while let Some(entry) = DirEntry::read(&mut records)? {
                entries.push(entry);
            }
        }
        Ok(Self { inode, entries })
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }
}

impl Filesystem {
    /// Append `entry` to the end of directory `index`
    pub(crate) fn append_entry(&mut self, index: u32, entry: &DirEntry) -> Result<(), Error> {
        let mut inode = self.load_inode(index)?;
        let bytes = entry.as_bytes();
        let block_size = self.layout.block_size() as u64;
        let position = entry_position(inode.size as u64, bytes.len() as u64, block_size);
        let block_index = (position / block_size) as usize;
        let mut ids = self.block_ids(&inode)?;
        if block_index >= ids.len() {
            ids = self.resize_blocks(&mut inode, block_index as u64 + 1)?;
        }
        let mut block = self.load_block(ids[block_index])?;
        block.write_bytes((position % block_size) as usize, &bytes);
        self.flush_block(&block)?;
        inode.size = (position + bytes.len() as u64) as u32;
        inode.modified_at = timestamp_now();
        debug!(
            "Append {} to directory {index}, now {} bytes",
            entry.name_lossy(),
            inode.size
        );
        self.flush_inode(&inode)
    }

    /// Create an empty regular file at `path`
    pub fn create_file(&mut self, path: &str) -> Result<Creation, Error> {
        self.create(path, FileKind::RegularFile)
    }

    /// Create a directory at `path`, holding `.` and `..`
    pub fn create_directory(&mut self, path: &str) -> Result<Creation, Error> {
        self.create(path, FileKind::Directory)
    }

    fn create(&mut self, path: &str, kind: FileKind) -> Result<Creation, Error> {
        let (parent, name) = split_path(path);
        let parent = self.resolve_directory(parent)?;
        self.create_in(parent, name, kind)
    }

    /// Create `name` inside directory `parent`.
    /// A live entry with the same name and kind is returned as is.
    pub fn create_in(
        &mut self,
        parent: u32,
        name: &str,
        kind: FileKind,
    ) -> Result<Creation, Error> {
        validate_name(name)?;
        let parent_inode = self.load_inode(parent)?;
        if !parent_inode.is_dir() || parent_inode.is_deleted() {
            return Err(Error::NotFound(format!("directory inode {parent}")));
        }
        match self.lookup(parent, name, Some(kind)) {
            Ok(existing) => {
                debug!("{name} already exists as inode {existing}");
                return Ok(Creation::Existing(existing));
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let (index, _) = self.allocate_inode()?;
        let (block, _) = self.allocate_block()?;
        let block_size = self.layout.block_size() as u64;
        let entry = DirEntry::new(index, kind, name);
        let position =
            entry_position(parent_inode.size as u64, entry.record_length() as u64, block_size);
        let held = self.block_ids(&parent_inode)?.len();
        let parent_blocks = (position / block_size + 1).max(held as u64);
        // the new inode's own block plus whatever the parent must grow by
        let required = 1 + self.blocks_missing(&parent_inode, held, parent_blocks)?;
        if required > self.block_bitmap()?.free_count() {
            return Err(Error::ResourceExhausted(Resource::Blocks));
        }
        self.set_inode_state(index, false)?;
        self.set_block_state(block, false)?;
        self.flush_block(&Block::empty(&self.layout, block))?;
        self.flush_inode(&Inode::new(index, kind, block, timestamp_now()))?;
        self.append_entry(parent, &entry)?;
        if kind == FileKind::Directory {
            self.append_entry(index, &DirEntry::new(index, FileKind::Directory, "."))?;
            self.append_entry(index, &DirEntry::new(parent, FileKind::Directory, ".."))?;
        }
        info!("Created {kind:?} {name} as inode {index} in directory {parent}");
        Ok(Creation::Created(index))
    }

    /// Live entries of directory `index`, sorted by name
    pub fn list_files(&mut self, index: u32) -> Result<Vec<DirEntry>, Error> {
        let directory = Directory::load(self, index)?;
        let mut live = Vec::with_capacity(directory.entries.len());
        for entry in directory.entries {
            if !self.load_inode(entry.inode())?.is_deleted() {
                live.push(entry);
            }
        }
        live.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(live)
    }

    pub fn list_directory(&mut self, path: &str) -> Result<Vec<DirEntry>, Error> {
        let index = self.resolve_directory(path)?;
        self.list_files(index)
    }

    /// Every record of directory `index` in on-disk order, stale ones included
    pub fn raw_entries(&mut self, index: u32) -> Result<Vec<DirEntry>, Error> {
        Ok(Directory::load(self, index)?.entries)
    }

    /// Delete the directory at `path` with everything below it
    pub fn remove_directory(&mut self, path: &str) -> Result<(), Error> {
        let (parent, name) = split_path(path);
        let parent = self.resolve_directory(parent)?;
        self.remove_in(parent, name, FileKind::Directory)
    }

    /// Delete `name` of `kind` from directory `parent`.
    /// The entry bytes stay in the parent, the inode is stamped deleted.
    pub fn remove_in(&mut self, parent: u32, name: &str, kind: FileKind) -> Result<(), Error> {
        validate_name(name)?;
        let index = self.lookup(parent, name, Some(kind))?;
        match kind {
            FileKind::RegularFile => self.delete_inode(index)?,
            FileKind::Directory => self.delete_tree(index)?,
        }
        info!("Removed {kind:?} {name} from directory {parent}");
        Ok(())
    }

    /// Post-order deletion of a directory tree with an explicit stack
    fn delete_tree(&mut self, root: u32) -> Result<(), Error> {
        if root == ROOT_INODE {
            return Err(Error::InvalidName("/".to_owned()));
        }
        let mut pending = vec![(root, false)];
        while let Some((index, expanded)) = pending.pop() {
            if expanded {
                self.delete_inode(index)?;
                continue;
            }
            pending.push((index, true));
            for entry in self.list_files(index)? {
                if entry.is_link() {
                    continue;
                }
                match entry.kind() {
                    FileKind::RegularFile => self.delete_inode(entry.inode())?,
                    FileKind::Directory => pending.push((entry.inode(), false)),
                }
            }
        }
        if self.load_inode(self.current_dir)?.is_deleted() {
            debug!("Current directory was removed, returning to root");
            self.current_dir = ROOT_INODE;
        }
        Ok(())
    }

    /// Rewrite directory `index` without the entries of deleted inodes,
    /// releasing blocks it no longer needs. Returns the count of dropped entries.
    pub fn compact_directory(&mut self, index: u32) -> Result<usize, Error> {
        let directory = Directory::load(self, index)?;
        let total = directory.entries.len();
        let block_size = self.layout.block_size() as u64;
        let mut packed: Vec<u8> = Vec::new();
        let mut kept = 0;
        for entry in &directory.entries {
            if self.load_inode(entry.inode())?.is_deleted() {
                continue;
            }
            let bytes = entry.as_bytes();
            let position = entry_position(packed.len() as u64, bytes.len() as u64, block_size);
            packed.resize(position as usize, 0);
            packed.extend_from_slice(&bytes);
            kept += 1;
        }
        let size = packed.len() as u64;
        let mut inode = directory.inode;
        let ids = self.resize_blocks(&mut inode, self.layout.blocks_for(size))?;
        packed.resize(ids.len() * block_size as usize, 0);
        for (id, data) in ids.iter().zip(packed.chunks(block_size as usize)) {
            self.flush_block(&Block {
                index: *id,
                data: data.to_vec(),
            })?;
        }
        inode.size = size as u32;
        inode.modified_at = timestamp_now();
        self.flush_inode(&inode)?;
        info!("Compacted directory {index}, dropped {} entries", total - kept);
        Ok(total - kept)
    }
}
