use std::fmt::Display;

use super::*;
use crate::Error;

pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const DEFAULT_BLOCK_COUNT: u32 = 65536;
pub const DEFAULT_INODE_COUNT: u32 = 1024;

const MIN_BLOCK_SIZE: u32 = 512;
const MAX_BLOCK_SIZE: u32 = 8192;
/// Inode block pointers and directory entry inode ids are 16 bits wide
const MAX_ADDRESSABLE: u32 = u16::MAX as u32 + 1;

impl Layout {
    pub fn new(block_size: u32, block_count: u32, inode_count: u32) -> Result<Self, Error> {
        if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
        {
            return Err(Error::InvalidLayout(format!(
                "block size {block_size} is not a power of two in {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}"
            )));
        }
        if !(1..=MAX_ADDRESSABLE).contains(&block_count) {
            return Err(Error::InvalidLayout(format!(
                "block count {block_count} outside of 1..={MAX_ADDRESSABLE}"
            )));
        }
        if !(1..=MAX_ADDRESSABLE).contains(&inode_count) {
            return Err(Error::InvalidLayout(format!(
                "inode count {inode_count} outside of 1..={MAX_ADDRESSABLE}"
            )));
        }
        Ok(Self {
            block_size,
            block_count,
            inode_count,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn inode_count(&self) -> u32 {
        self.inode_count
    }

    /// Count of block ids held by one indirect block
    pub fn fan_out(&self) -> u32 {
        self.block_size / INDIRECT_ENTRY_SIZE
    }

    /// Most blocks a single inode can address
    pub fn max_file_blocks(&self) -> u64 {
        DIRECT_POINTERS as u64 + self.fan_out() as u64
    }

    pub fn block_bitmap_start(&self) -> u64 {
        HEADER_SIZE
    }

    pub fn block_bitmap_size(&self) -> u64 {
        (self.block_count as u64).div_ceil(8)
    }

    pub fn inode_bitmap_start(&self) -> u64 {
        self.block_bitmap_start() + self.block_bitmap_size()
    }

    pub fn inode_bitmap_size(&self) -> u64 {
        (self.inode_count as u64).div_ceil(8)
    }

    pub fn inode_table_start(&self) -> u64 {
        self.inode_bitmap_start() + self.inode_bitmap_size()
    }

    pub fn inode_table_size(&self) -> u64 {
        self.inode_count as u64 * INODE_RECORD_SIZE
    }

    pub fn data_region_start(&self) -> u64 {
        self.inode_table_start() + self.inode_table_size()
    }

    pub fn data_region_size(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }

    /// Total bytes a formatted image occupies
    pub fn image_size(&self) -> u64 {
        self.data_region_start() + self.data_region_size()
    }

    /// Byte offset of block `index` inside the image
    pub fn block_position(&self, index: u32) -> Result<u64, Error> {
        if index >= self.block_count {
            return Err(Error::InvalidIndex {
                index: index as u64,
                limit: self.block_count as u64,
            });
        }
        Ok(self.data_region_start() + index as u64 * self.block_size as u64)
    }

    /// Byte offset of inode `index` inside the image
    pub fn inode_position(&self, index: u32) -> Result<u64, Error> {
        if index >= self.inode_count {
            return Err(Error::InvalidIndex {
                index: index as u64,
                limit: self.inode_count as u64,
            });
        }
        Ok(self.inode_table_start() + index as u64 * INODE_RECORD_SIZE)
    }

    /// Blocks needed to hold `bytes`, never less than the one every inode owns
    pub fn blocks_for(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.block_size as u64).max(1)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
            inode_count: DEFAULT_INODE_COUNT,
        }
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "block size:      {}", self.block_size)?;
        writeln!(f, "blocks:          {}", self.block_count)?;
        writeln!(f, "inodes:          {}", self.inode_count)?;
        writeln!(f, "block bitmap:    {:#x}", self.block_bitmap_start())?;
        writeln!(f, "inode bitmap:    {:#x}", self.inode_bitmap_start())?;
        writeln!(f, "inode table:     {:#x}", self.inode_table_start())?;
        writeln!(f, "data region:     {:#x}", self.data_region_start())?;
        write!(f, "image size:      {}", self.image_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_offsets() {
        let layout = Layout::new(512, 256, 64).unwrap();
        assert_eq!(layout.block_bitmap_start(), HEADER_SIZE);
        assert_eq!(layout.block_bitmap_size(), 32);
        assert_eq!(layout.inode_bitmap_start(), HEADER_SIZE + 32);
        assert_eq!(layout.inode_bitmap_size(), 8);
        assert_eq!(layout.inode_table_start(), HEADER_SIZE + 40);
        assert_eq!(
            layout.data_region_start(),
            HEADER_SIZE + 40 + 64 * INODE_RECORD_SIZE
        );
        assert_eq!(
            layout.block_position(3).unwrap(),
            layout.data_region_start() + 3 * 512
        );
        assert_eq!(layout.fan_out(), 128);
        assert_eq!(layout.max_file_blocks(), 142);
    }

    #[test]
    fn out_of_range_indexes() {
        let layout = Layout::new(512, 256, 64).unwrap();
        assert!(matches!(
            layout.block_position(256),
            Err(Error::InvalidIndex { index: 256, .. })
        ));
        assert!(matches!(
            layout.inode_position(64),
            Err(Error::InvalidIndex { index: 64, .. })
        ));
    }

    #[test]
    fn rejects_unsupported_parameters() {
        assert!(Layout::new(1000, 16, 16).is_err());
        assert!(Layout::new(256, 16, 16).is_err());
        assert!(Layout::new(512, 0, 16).is_err());
        assert!(Layout::new(512, 70_000, 16).is_err());
        assert!(Layout::new(512, 16, 0).is_err());
        assert!(Layout::new(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_COUNT, DEFAULT_INODE_COUNT).is_ok());
    }

    #[test]
    fn blocks_for_sizes() {
        let layout = Layout::new(512, 16, 16).unwrap();
        assert_eq!(layout.blocks_for(0), 1);
        assert_eq!(layout.blocks_for(512), 1);
        assert_eq!(layout.blocks_for(513), 2);
    }
}
