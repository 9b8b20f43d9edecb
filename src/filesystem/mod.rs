use std::fmt::Debug;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use log::{debug, info, warn};

use crate::filetypes::{timestamp_now, DirEntry};
use crate::structs::*;
use crate::{Error, Resource};

mod fuse;
mod path;

pub use fuse::{mount, FuseFs};

pub trait BlockDevice: Read + Write + Seek + Debug {}

impl BlockDevice for std::fs::File {}

impl BlockDevice for Cursor<Vec<u8>> {}

#[derive(Debug)]
pub struct Filesystem {
    pub(crate) layout: Layout,
    pub(crate) device: Box<dyn BlockDevice>,
    /// Directory relative paths start from
    pub(crate) current_dir: u32,
}

/// Free and total counts of both allocatable resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub free_blocks: u64,
    pub total_blocks: u64,
    pub free_inodes: u64,
    pub total_inodes: u64,
}

impl Filesystem {
    /// Write an empty filesystem with `layout` to `device`.
    /// The root directory takes inode 0 and block 0.
    pub fn format(device: Box<dyn BlockDevice>, layout: Layout) -> Result<Self, Error> {
        info!(
            "Formatting {} byte image with {} blocks of {} bytes and {} inodes",
            layout.image_size(),
            layout.block_count(),
            layout.block_size(),
            layout.inode_count()
        );
        let mut fs = Self {
            layout,
            device,
            current_dir: ROOT_INODE,
        };
        fs.device.seek(SeekFrom::Start(layout.image_size() - 1))?;
        fs.device.write_all(&[0])?;
        Header::new(layout).flush(&mut fs.device)?;
        Bitmap::<Block>::new(&layout).flush(&mut fs.device)?;
        Bitmap::<Inode>::new(&layout).flush(&mut fs.device)?;
        let table: Vec<u8> = (0..layout.inode_count())
            .flat_map(|index| Inode::blank(index).as_bytes())
            .collect();
        fs.device.seek(SeekFrom::Start(layout.inode_table_start()))?;
        fs.device.write_all(&table)?;
        fs.create_root()?;
        fs.device.flush()?;
        Ok(fs)
    }

    fn create_root(&mut self) -> Result<(), Error> {
        self.set_inode_state(ROOT_INODE, false)?;
        self.set_block_state(NULL_BLOCK, false)?;
        self.flush_block(&Block::empty(&self.layout, NULL_BLOCK))?;
        let root = Inode::new(ROOT_INODE, FileKind::Directory, NULL_BLOCK, timestamp_now());
        self.flush_inode(&root)?;
        self.append_entry(ROOT_INODE, &DirEntry::new(ROOT_INODE, FileKind::Directory, "."))
    }

    /// Load filesystem from a formatted block device
    pub fn load(device: Box<dyn BlockDevice>) -> Result<Self, Error> {
        let mut device = device;
        let header = Header::load(&mut device)?;
        info!("Loaded filesystem:\n{}", header.layout);
        Ok(Self {
            layout: header.layout,
            device,
            current_dir: ROOT_INODE,
        })
    }

    /// Returns layout of an existing filesystem on `device` by checking magic signature
    pub fn detect_existing(device: &mut dyn BlockDevice) -> Result<Option<Layout>, Error> {
        match Header::load(device) {
            Ok(header) => {
                info!("Detected existing filesystem");
                Ok(Some(header.layout))
            }
            Err(Error::Unformatted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load the filesystem on `device`, formatting it with `layout` if there is none
    pub fn open_or_format(device: Box<dyn BlockDevice>, layout: Layout) -> Result<Self, Error> {
        let mut device = device;
        match Self::detect_existing(device.as_mut())? {
            Some(existing) => {
                if existing != layout {
                    warn!("Keeping existing layout {existing:?} over requested {layout:?}");
                }
                Self::load(device)
            }
            None => Self::format(device, layout),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn header(&mut self) -> Result<Header, Error> {
        Header::load(&mut self.device)
    }

    /// Give back the underlying block device
    pub fn into_device(self) -> Box<dyn BlockDevice> {
        self.device
    }

    pub fn sync(&mut self) -> Result<(), Error> {
        self.device.flush()?;
        Ok(())
    }

    pub fn block_bitmap(&mut self) -> Result<Bitmap<Block>, Error> {
        Bitmap::<Block>::load(&mut self.device, &self.layout)
    }

    pub fn inode_bitmap(&mut self) -> Result<Bitmap<Inode>, Error> {
        Bitmap::<Inode>::load(&mut self.device, &self.layout)
    }

    /// First free block and its byte offset in the image.
    /// The block stays free until [`Self::set_block_state`] occupies it.
    pub fn allocate_block(&mut self) -> Result<(u32, u64), Error> {
        let index = self
            .block_bitmap()?
            .first_free()
            .ok_or(Error::ResourceExhausted(Resource::Blocks))? as u32;
        Ok((index, self.layout.block_position(index)?))
    }

    pub fn set_block_state(&mut self, index: u32, free: bool) -> Result<(), Error> {
        debug!("Mark block {index} {}", if free { "free" } else { "occupied" });
        let mut bitmap = self.block_bitmap()?;
        bitmap.set(index as u64, free)?;
        bitmap.flush(&mut self.device)
    }

    /// First free inode slot and its current record.
    /// The slot stays free until [`Self::set_inode_state`] occupies it.
    pub fn allocate_inode(&mut self) -> Result<(u32, Inode), Error> {
        let index = self
            .inode_bitmap()?
            .first_free()
            .ok_or(Error::ResourceExhausted(Resource::Inodes))? as u32;
        Ok((index, self.load_inode(index)?))
    }

    pub fn set_inode_state(&mut self, index: u32, free: bool) -> Result<(), Error> {
        debug!("Mark inode {index} {}", if free { "free" } else { "occupied" });
        let mut bitmap = self.inode_bitmap()?;
        bitmap.set(index as u64, free)?;
        bitmap.flush(&mut self.device)
    }

    /// Occupy the first free block and zero it
    pub(crate) fn acquire_block(&mut self) -> Result<u32, Error> {
        let (index, _) = self.allocate_block()?;
        self.set_block_state(index, false)?;
        self.flush_block(&Block::empty(&self.layout, index))?;
        Ok(index)
    }

    pub(crate) fn release_block(&mut self, index: u32) -> Result<(), Error> {
        self.set_block_state(index, true)
    }

    pub fn usage(&mut self) -> Result<Usage, Error> {
        Ok(Usage {
            free_blocks: self.block_bitmap()?.free_count(),
            total_blocks: self.layout.block_count() as u64,
            free_inodes: self.inode_bitmap()?.free_count(),
            total_inodes: self.layout.inode_count() as u64,
        })
    }

    /// Load inode with index
    pub fn load_inode(&mut self, index: u32) -> Result<Inode, Error> {
        Inode::load(&mut self.device, &self.layout, index)
    }

    pub fn flush_inode(&mut self, inode: &Inode) -> Result<(), Error> {
        debug!("Flush inode {}", inode.index);
        inode.flush(&mut self.device, &self.layout)
    }

    /// Load block with index
    pub fn load_block(&mut self, index: u32) -> Result<Block, Error> {
        Block::load(&mut self.device, &self.layout, index)
    }

    pub fn flush_block(&mut self, block: &Block) -> Result<(), Error> {
        debug!("Flush block {}", block.index);
        block.flush(&mut self.device, &self.layout)
    }

    pub(crate) fn read_indirect_list(&mut self, index: u32) -> Result<Vec<u32>, Error> {
        Ok(self.load_block(index)?.as_block_list())
    }

    /// Persist `list` into the indirect block, ignoring an unassigned pointer
    pub(crate) fn write_indirect_list(&mut self, index: u32, list: &[u32]) -> Result<(), Error> {
        if index == NULL_BLOCK {
            return Ok(());
        }
        let block = Block::from_block_list(&self.layout, index, list)?;
        self.flush_block(&block)
    }

    /// Ids of every data block the inode occupies, in file order
    pub(crate) fn block_ids(&mut self, inode: &Inode) -> Result<Vec<u32>, Error> {
        let count = self.layout.blocks_for(inode.size as u64) as usize;
        let mut ids: Vec<u32> = inode.blocks[..count.min(DIRECT_POINTERS)]
            .iter()
            .map(|&block| block as u32)
            .collect();
        if count > DIRECT_POINTERS {
            let indirect = inode.indirect_block().ok_or_else(|| {
                Error::CorruptImage(format!(
                    "inode {} spans {count} blocks without an indirect block",
                    inode.index
                ))
            })?;
            let list = self.read_indirect_list(indirect)?;
            let rest = count - DIRECT_POINTERS;
            if rest > list.len() {
                return Err(Error::CorruptImage(format!(
                    "inode {} spans {count} blocks, more than it can address",
                    inode.index
                )));
            }
            ids.extend_from_slice(&list[..rest]);
        }
        Ok(ids)
    }

    /// Blocks an inode holding `held` data blocks must acquire to hold
    /// `count`, indirect block included
    pub(crate) fn blocks_missing(
        &self,
        inode: &Inode,
        held: usize,
        count: u64,
    ) -> Result<u64, Error> {
        let capacity = self.layout.max_file_blocks();
        if count > capacity {
            return Err(Error::FileTooLarge {
                required: count,
                capacity,
            });
        }
        let count = count.max(1);
        let needs_indirect = count > DIRECT_POINTERS as u64;
        let has_indirect = inode.indirect_block().is_some();
        Ok(count.saturating_sub(held as u64) + u64::from(needs_indirect && !has_indirect))
    }

    /// Grow or shrink the inode to `count` blocks, keeping the leading ones.
    /// Capacity and free space are checked before anything is acquired;
    /// `inode.size` must still describe the current block list.
    pub(crate) fn resize_blocks(
        &mut self,
        inode: &mut Inode,
        count: u64,
    ) -> Result<Vec<u32>, Error> {
        let mut ids = self.block_ids(inode)?;
        let missing = self.blocks_missing(inode, ids.len(), count)?;
        if missing > self.block_bitmap()?.free_count() {
            return Err(Error::ResourceExhausted(Resource::Blocks));
        }
        let count = count.max(1) as usize;
        let needs_indirect = count > DIRECT_POINTERS;
        if ids.len() != count {
            debug!("Resize inode {} from {} to {count} blocks", inode.index, ids.len());
        }
        for surplus in ids.split_off(count.min(ids.len())) {
            self.release_block(surplus)?;
        }
        while ids.len() < count {
            ids.push(self.acquire_block()?);
        }
        match (needs_indirect, inode.indirect_block()) {
            (true, None) => {
                inode.blocks[INDIRECT_POINTER] = self.acquire_block()? as u16;
            }
            (false, Some(indirect)) => {
                self.release_block(indirect)?;
                inode.blocks[INDIRECT_POINTER] = NULL_BLOCK as u16;
            }
            _ => {}
        }
        inode.blocks[..DIRECT_POINTERS].fill(0);
        for (slot, &id) in ids.iter().take(DIRECT_POINTERS).enumerate() {
            inode.blocks[slot] = id as u16;
        }
        if needs_indirect {
            let indirect = inode.blocks[INDIRECT_POINTER] as u32;
            self.write_indirect_list(indirect, &ids[DIRECT_POINTERS..])?;
        }
        Ok(ids)
    }

    /// Free every block of the inode and stamp its deletion time.
    /// Size and pointers stay behind as a record of what the file held.
    pub(crate) fn delete_inode(&mut self, index: u32) -> Result<(), Error> {
        let mut inode = self.load_inode(index)?;
        if inode.is_deleted() {
            return Ok(());
        }
        for block in self.block_ids(&inode)? {
            self.release_block(block)?;
        }
        if let Some(indirect) = inode.indirect_block() {
            self.release_block(indirect)?;
        }
        inode.deleted_at = timestamp_now();
        debug!("Delete inode {index}");
        self.flush_inode(&inode)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    pub(crate) fn small_layout() -> Layout {
        Layout::new(512, 256, 64).unwrap()
    }

    pub(crate) fn formatted(layout: Layout) -> Filesystem {
        let dev = Cursor::new(Vec::new());
        Filesystem::format(Box::new(dev), layout).unwrap()
    }

    #[test]
    fn format_and_load() {
        let layout = small_layout();
        let fs = formatted(layout);
        let mut device = fs.into_device();
        assert_eq![device.seek(SeekFrom::End(0)).unwrap(), layout.image_size()];
        assert_eq![Filesystem::detect_existing(device.as_mut()).unwrap(), Some(layout)];
        let mut fs = Filesystem::load(device).unwrap();
        assert_eq![fs.layout(), layout];
        assert_eq![fs.block_bitmap().unwrap().get(0).unwrap(), false];
        assert_eq![fs.inode_bitmap().unwrap().get(0).unwrap(), false];
        let root = fs.load_inode(ROOT_INODE).unwrap();
        assert![root.is_dir()];
        assert_eq![root.size(), 9];
        let last = fs.load_inode(layout.inode_count() - 1).unwrap();
        assert_eq![last.kind(), None];
    }

    #[test]
    fn unformatted_device() {
        let mut dev: Box<dyn BlockDevice> = Box::new(Cursor::new(vec![0u8; 4096]));
        assert_eq![Filesystem::detect_existing(dev.as_mut()).unwrap(), None];
        assert!(matches!(Filesystem::load(dev), Err(Error::Unformatted)));
    }

    #[test]
    fn open_or_format_keeps_existing() {
        let layout = small_layout();
        let mut fs = formatted(layout);
        fs.create_file("keep.txt").unwrap();
        let device = fs.into_device();
        let mut fs = Filesystem::open_or_format(device, Layout::default()).unwrap();
        assert_eq![fs.layout(), layout];
        assert![fs.resolve("keep.txt").is_ok()];
        let fresh = Box::new(Cursor::new(Vec::new()));
        let fs = Filesystem::open_or_format(fresh, layout).unwrap();
        assert_eq![fs.layout(), layout];
    }

    #[test]
    fn allocation_does_not_commit() {
        let mut fs = formatted(small_layout());
        let (block, position) = fs.allocate_block().unwrap();
        assert_eq![block, 1];
        assert_eq![position, small_layout().block_position(1).unwrap()];
        assert_eq![fs.allocate_block().unwrap().0, 1];
        fs.set_block_state(1, false).unwrap();
        assert_eq![fs.allocate_block().unwrap().0, 2];
        fs.set_block_state(1, true).unwrap();
        assert_eq![fs.allocate_block().unwrap().0, 1];

        let (inode, record) = fs.allocate_inode().unwrap();
        assert_eq![inode, 1];
        assert_eq![record.kind(), None];
        fs.set_inode_state(1, false).unwrap();
        assert_eq![fs.allocate_inode().unwrap().0, 2];
    }

    #[test]
    fn exhausted_resources() {
        let layout = Layout::new(512, 8, 2).unwrap();
        let mut fs = formatted(layout);
        fs.set_inode_state(1, false).unwrap();
        assert!(matches!(
            fs.allocate_inode(),
            Err(Error::ResourceExhausted(Resource::Inodes))
        ));
        for index in 1..8 {
            fs.set_block_state(index, false).unwrap();
        }
        assert!(matches!(
            fs.allocate_block(),
            Err(Error::ResourceExhausted(Resource::Blocks))
        ));
        assert!(fs.set_block_state(8, true).is_err());
    }

    #[test]
    fn indirect_list_round_trip() {
        let mut fs = formatted(small_layout());
        let root_block = fs.load_block(NULL_BLOCK).unwrap();
        fs.write_indirect_list(NULL_BLOCK, &[1, 2, 3]).unwrap();
        assert_eq![fs.load_block(NULL_BLOCK).unwrap(), root_block];
        let indirect = fs.acquire_block().unwrap();
        fs.write_indirect_list(indirect, &[7, 8, 9]).unwrap();
        assert_eq![&fs.read_indirect_list(indirect).unwrap()[..4], &[7, 8, 9, 0]];
    }

    #[test]
    fn resize_acquires_and_releases() {
        let mut fs = formatted(small_layout());
        let first = fs.acquire_block().unwrap();
        let mut inode = Inode::new(5, FileKind::RegularFile, first, 1);
        let ids = fs.resize_blocks(&mut inode, 16).unwrap();
        assert_eq![ids.len(), 16];
        assert_eq![ids[0], first];
        let indirect = inode.indirect_block().unwrap();
        inode.size = 16 * 512;
        assert_eq![fs.block_ids(&inode).unwrap(), ids];
        assert_eq![fs.usage().unwrap().free_blocks, 256 - 1 - 16 - 1];

        let ids = fs.resize_blocks(&mut inode, 2).unwrap();
        assert_eq![ids.len(), 2];
        assert_eq![inode.indirect_block(), None];
        assert_eq![fs.block_bitmap().unwrap().get(indirect as u64).unwrap(), true];
        assert_eq![fs.usage().unwrap().free_blocks, 256 - 1 - 2];
        assert!(matches!(
            fs.resize_blocks(&mut inode, 143),
            Err(Error::FileTooLarge { required: 143, capacity: 142 })
        ));
    }
}
