use std::fmt::Display;
use std::io::SeekFrom;

use super::*;
use crate::Error;

impl AsBitmap for Block {
    fn region(layout: &Layout) -> (u64, u64) {
        (layout.block_bitmap_start(), layout.block_count as u64)
    }
}

impl Block {
    /// Zero-initialized block with index
    pub fn empty(layout: &Layout, index: u32) -> Self {
        Self {
            index,
            data: vec![0; layout.block_size as usize],
        }
    }

    /// Write bytes at position and return ones exceeding Block's capacity
    pub fn write_bytes<'a>(&mut self, position: usize, data: &'a [u8]) -> &'a [u8] {
        if position + data.len() <= self.data.len() {
            self.data[position..position + data.len()].copy_from_slice(data);
            &[]
        } else {
            let end = self.data.len() - position;
            self.data[position..].copy_from_slice(&data[..end]);
            &data[end..]
        }
    }

    /// Reinterpret block contents as a list of block ids
    pub fn as_block_list(&self) -> Vec<u32> {
        self.data
            .chunks_exact(INDIRECT_ENTRY_SIZE as usize)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect()
    }

    /// Block holding `list` as raw block ids, zero padded
    pub fn from_block_list(layout: &Layout, index: u32, list: &[u32]) -> Result<Self, Error> {
        if list.len() > layout.fan_out() as usize {
            return Err(Error::InvalidIndex {
                index: list.len() as u64,
                limit: layout.fan_out() as u64,
            });
        }
        let mut block = Self::empty(layout, index);
        block.write_bytes(0, bytemuck::cast_slice(list));
        Ok(block)
    }
}

impl PermanentIndexed for Block {
    type Error = crate::Error;

    fn load<D: Read + Seek>(
        block_device: &mut D,
        layout: &Layout,
        index: u32,
    ) -> Result<Self, Self::Error> {
        let position = layout.block_position(index)?;
        block_device.seek(SeekFrom::Start(position))?;
        let mut block_raw = vec![0u8; layout.block_size as usize];
        block_device.read_exact(&mut block_raw)?;
        Ok(Self {
            data: block_raw,
            index,
        })
    }

    fn flush<D: Write + Seek>(
        &self,
        block_device: &mut D,
        layout: &Layout,
    ) -> Result<(), Self::Error> {
        let position = layout.block_position(self.index)?;
        block_device.seek(SeekFrom::Start(position))?;
        block_device.write_all(&self.data)?;
        Ok(())
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "block {}", self.index)?;
        for (row, chunk) in self.data.chunks(16).enumerate() {
            if chunk.iter().all(|&byte| byte == 0) {
                continue;
            }
            write!(f, "{:06x}:", row * 16)?;
            for byte in chunk {
                write!(f, " {byte:02x}")?;
            }
            let text: String = chunk
                .iter()
                .map(|&byte| {
                    if byte.is_ascii_graphic() {
                        byte as char
                    } else {
                        '.'
                    }
                })
                .collect();
            writeln!(f, "  {text}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_bytes_overflow() {
        let layout = Layout::new(512, 4, 4).unwrap();
        let mut block = Block::empty(&layout, 0);
        let data = vec![7u8; 600];
        let rest = block.write_bytes(500, &data);
        assert_eq!(rest.len(), 588);
        assert_eq!(&block.data[500..], &[7u8; 12]);
        assert!(block.write_bytes(0, &data[..512]).is_empty());
    }

    #[test]
    fn block_list_conversion() {
        let layout = Layout::new(512, 4, 4).unwrap();
        let block = Block::from_block_list(&layout, 2, &[5, 6, 70_000]).unwrap();
        let list = block.as_block_list();
        assert_eq!(list.len(), 128);
        assert_eq!(&list[..4], &[5, 6, 70_000, 0]);
        assert!(Block::from_block_list(&layout, 2, &[1; 129]).is_err());
    }

    #[test]
    fn load_and_flush() {
        let layout = Layout::new(512, 4, 4).unwrap();
        let mut dev = Cursor::new(vec![0u8; layout.image_size() as usize]);
        let mut block = Block::empty(&layout, 3);
        block.write_bytes(10, b"hello");
        block.flush(&mut dev, &layout).unwrap();
        assert_eq!(Block::load(&mut dev, &layout, 3).unwrap(), block);
        assert!(matches!(
            Block::load(&mut dev, &layout, 4),
            Err(Error::InvalidIndex { .. })
        ));
    }
}
