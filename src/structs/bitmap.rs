use std::fmt::Display;
use std::io::{Read, Seek, SeekFrom, Write};

use super::*;
use crate::Error;

const BITS_IN_BYTE: u64 = 8;

impl<T: AsBitmap> Bitmap<T> {
    /// Bitmap with every valid slot free
    pub fn new(layout: &Layout) -> Self {
        let (position, count) = T::region(layout);
        let mut bitmap = Self {
            bitfield: vec![0; count.div_ceil(BITS_IN_BYTE) as usize],
            count,
            position,
            __type: PhantomData,
        };
        for index in 0..count {
            bitmap.write_bit(index, true);
        }
        bitmap
    }

    /// Read bitmap region from block device
    pub fn load<D: Read + Seek>(block_device: &mut D, layout: &Layout) -> Result<Self, Error> {
        let (position, count) = T::region(layout);
        let mut bitfield = vec![0u8; count.div_ceil(BITS_IN_BYTE) as usize];
        block_device.seek(SeekFrom::Start(position))?;
        block_device.read_exact(&mut bitfield)?;
        Ok(Self {
            bitfield,
            count,
            position,
            __type: PhantomData,
        })
    }

    /// Flush the whole bitmap region to block device
    pub fn flush<D: Write + Seek>(&self, block_device: &mut D) -> Result<(), Error> {
        block_device.seek(SeekFrom::Start(self.position))?;
        block_device.write_all(&self.bitfield)?;
        Ok(())
    }

    /// Mark slot as free or occupied
    pub fn set(&mut self, index: u64, free: bool) -> Result<(), Error> {
        self.check(index)?;
        self.write_bit(index, free);
        Ok(())
    }

    /// Whether slot is free
    pub fn get(&self, index: u64) -> Result<bool, Error> {
        self.check(index)?;
        let mask = 0x80u8 >> (index % BITS_IN_BYTE);
        Ok(self.bitfield[(index / BITS_IN_BYTE) as usize] & mask != 0)
    }

    /// Lowest free slot, if any
    pub fn first_free(&self) -> Option<u64> {
        self.bitfield
            .iter()
            .enumerate()
            .find(|&(_, &chunk)| chunk != 0)
            .map(|(row, &chunk)| row as u64 * BITS_IN_BYTE + chunk.leading_zeros() as u64)
            .filter(|&index| index < self.count)
    }

    pub fn free_count(&self) -> u64 {
        self.bitfield
            .iter()
            .map(|chunk| chunk.count_ones() as u64)
            .sum()
    }

    fn check(&self, index: u64) -> Result<(), Error> {
        if index >= self.count {
            Err(Error::InvalidIndex {
                index,
                limit: self.count,
            })
        } else {
            Ok(())
        }
    }

    fn write_bit(&mut self, index: u64, free: bool) {
        let row = (index / BITS_IN_BYTE) as usize;
        let mask = 0x80u8 >> (index % BITS_IN_BYTE);
        if free {
            self.bitfield[row] |= mask;
        } else {
            self.bitfield[row] &= !mask;
        }
    }
}

impl AsBitmap for Inode {
    fn region(layout: &Layout) -> (u64, u64) {
        (layout.inode_bitmap_start(), layout.inode_count as u64)
    }
}

impl<T: AsBitmap> Display for Bitmap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} of {} free", self.free_count(), self.count)?;
        for (row, chunk) in self.bitfield.chunks(8).enumerate() {
            if chunk.iter().all(|&byte| byte == 0xff) {
                continue;
            }
            write!(f, "{:>6}:", row * 64)?;
            for byte in chunk {
                write!(f, " {byte:08b}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn layout() -> Layout {
        Layout::new(512, 20, 12).unwrap()
    }

    #[test]
    fn fresh_bitmap_is_free() {
        let bitmap = Bitmap::<Block>::new(&layout());
        assert_eq![bitmap.free_count(), 20];
        assert_eq![bitmap.bitfield, vec![0xff, 0xff, 0xf0]];
        assert_eq![bitmap.first_free(), Some(0)];
    }

    #[test]
    fn first_free_follows_occupation() {
        let mut bitmap = Bitmap::<Inode>::new(&layout());
        bitmap.set(0, false).unwrap();
        bitmap.set(1, false).unwrap();
        assert_eq![bitmap.first_free(), Some(2)];
        bitmap.set(0, true).unwrap();
        assert_eq![bitmap.first_free(), Some(0)];
        for index in 0..12 {
            bitmap.set(index, false).unwrap();
        }
        assert_eq![bitmap.first_free(), None];
        assert![bitmap.set(12, true).is_err()];
        assert![bitmap.get(12).is_err()];
    }

    #[test]
    fn load_and_flush() {
        let layout = layout();
        let mut dev = Cursor::new(vec![0u8; layout.image_size() as usize]);
        let mut bitmap = Bitmap::<Block>::new(&layout);
        bitmap.set(5, false).unwrap();
        bitmap.flush(&mut dev).unwrap();
        let inodes = Bitmap::<Inode>::new(&layout);
        inodes.flush(&mut dev).unwrap();
        let loaded = Bitmap::<Block>::load(&mut dev, &layout).unwrap();
        assert_eq![loaded.get(5).unwrap(), false];
        assert_eq![loaded.get(4).unwrap(), true];
        assert_eq![loaded.free_count(), 19];
        let loaded = Bitmap::<Inode>::load(&mut dev, &layout).unwrap();
        assert_eq![loaded.free_count(), 12];
    }
}
