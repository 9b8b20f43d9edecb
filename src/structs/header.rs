use std::fmt::Display;
use std::io::SeekFrom;

use log::debug;

use super::*;
use crate::filetypes::{u16_from_bytes, u32_from_bytes};
use crate::Error;

impl Header {
    pub fn new(layout: Layout) -> Self {
        Self {
            magic: MAGIC_SIGNATURE,
            version: FORMAT_VERSION,
            inode_record_size: INODE_RECORD_SIZE as u16,
            layout,
        }
    }

    pub fn as_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut bytes = [0u8; HEADER_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.inode_record_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.layout.block_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.layout.block_count.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.layout.inode_count.to_le_bytes());
        bytes
    }

    /// Decode a header, [`Error::Unformatted`] if the magic signature is missing
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HEADER_SIZE as usize || u32_from_bytes(&bytes[0..4]) != MAGIC_SIGNATURE {
            return Err(Error::Unformatted);
        }
        let version = u16_from_bytes(&bytes[4..6]);
        if version != FORMAT_VERSION {
            return Err(Error::CorruptImage(format!(
                "unsupported format version {version}"
            )));
        }
        let inode_record_size = u16_from_bytes(&bytes[6..8]);
        if inode_record_size as u64 != INODE_RECORD_SIZE {
            return Err(Error::CorruptImage(format!(
                "inode record size {inode_record_size}, expected {INODE_RECORD_SIZE}"
            )));
        }
        let layout = Layout::new(
            u32_from_bytes(&bytes[8..12]),
            u32_from_bytes(&bytes[12..16]),
            u32_from_bytes(&bytes[16..20]),
        )
        .map_err(|e| Error::CorruptImage(e.to_string()))?;
        Ok(Self {
            magic: MAGIC_SIGNATURE,
            version,
            inode_record_size,
            layout,
        })
    }

    pub fn load<D: Read + Seek + ?Sized>(block_device: &mut D) -> Result<Self, Error> {
        block_device.seek(SeekFrom::Start(0))?;
        let mut raw = [0u8; HEADER_SIZE as usize];
        if let Err(e) = block_device.read_exact(&mut raw) {
            return match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Err(Error::Unformatted),
                _ => Err(e.into()),
            };
        }
        let header = Self::from_bytes(&raw)?;
        debug!("Loaded header for layout {:?}", header.layout);
        Ok(header)
    }

    pub fn flush<D: Write + Seek>(&self, block_device: &mut D) -> Result<(), Error> {
        block_device.seek(SeekFrom::Start(0))?;
        block_device.write_all(&self.as_bytes())?;
        Ok(())
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "magic:           {:#010x}", self.magic)?;
        writeln!(f, "version:         {}", self.version)?;
        writeln!(f, "inode record:    {} bytes", self.inode_record_size)?;
        write!(f, "{}", self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn flush_and_load() {
        let layout = Layout::new(1024, 300, 40).unwrap();
        let mut dev = Cursor::new(vec![0u8; 128]);
        Header::new(layout).flush(&mut dev).unwrap();
        let header = Header::load(&mut dev).unwrap();
        assert_eq!(header, Header::new(layout));
        assert_eq!(header.layout.block_count(), 300);
    }

    #[test]
    fn missing_signature() {
        let mut dev = Cursor::new(vec![0u8; 128]);
        assert!(matches!(Header::load(&mut dev), Err(Error::Unformatted)));
        let mut short = Cursor::new(vec![0u8; 10]);
        assert!(matches!(Header::load(&mut short), Err(Error::Unformatted)));
    }

    #[test]
    fn foreign_record_size() {
        let mut bytes = Header::new(Layout::default()).as_bytes();
        bytes[6..8].copy_from_slice(&64u16.to_le_bytes());
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(Error::CorruptImage(_))
        ));
    }
}
