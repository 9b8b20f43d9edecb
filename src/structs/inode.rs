use std::fmt::Display;
use std::io::SeekFrom;

use super::*;
use crate::filetypes::{u16_from_bytes, u32_from_bytes};
use crate::Error;

const MODE_FREE: i32 = -1;
const POINTERS_START: usize = 24;

impl FileKind {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::RegularFile),
            1 => Some(Self::Directory),
            _ => None,
        }
    }
}

impl Inode {
    /// Free slot as written by format
    pub fn blank(index: u32) -> Self {
        Self {
            index,
            kind: None,
            size: 0,
            created_at: 0,
            accessed_at: 0,
            modified_at: 0,
            deleted_at: 0,
            blocks: [0; BLOCK_POINTERS],
        }
    }

    /// Freshly allocated inode owning `first_block`
    pub fn new(index: u32, kind: FileKind, first_block: u32, now: u32) -> Self {
        let mut blocks = [0; BLOCK_POINTERS];
        blocks[0] = first_block as u16;
        Self {
            index,
            kind: Some(kind),
            size: 0,
            created_at: now,
            accessed_at: now,
            modified_at: now,
            deleted_at: 0,
            blocks,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn kind(&self) -> Option<FileKind> {
        self.kind
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn created_at(&self) -> u32 {
        self.created_at
    }

    pub fn accessed_at(&self) -> u32 {
        self.accessed_at
    }

    pub fn modified_at(&self) -> u32 {
        self.modified_at
    }

    pub fn deleted_at(&self) -> u32 {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at != 0
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind == Some(FileKind::RegularFile)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == Some(FileKind::Directory)
    }

    /// Indirect block, [`None`] until the file outgrows its direct pointers
    pub fn indirect_block(&self) -> Option<u32> {
        match self.blocks[INDIRECT_POINTER] as u32 {
            NULL_BLOCK => None,
            block => Some(block),
        }
    }

    pub fn as_bytes(&self) -> [u8; INODE_RECORD_SIZE as usize] {
        let mut bytes = [0u8; INODE_RECORD_SIZE as usize];
        let mode = self.kind.map_or(MODE_FREE, |kind| kind as i32);
        bytes[0..4].copy_from_slice(&mode.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.created_at.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.accessed_at.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.modified_at.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.deleted_at.to_le_bytes());
        for (slot, pointer) in self.blocks.iter().enumerate() {
            let start = POINTERS_START + slot * 2;
            bytes[start..start + 2].copy_from_slice(&pointer.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(index: u32, bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < INODE_RECORD_SIZE as usize {
            return Err(Error::CorruptImage(format!(
                "inode {index} truncated to {} bytes",
                bytes.len()
            )));
        }
        let mode = u32_from_bytes(&bytes[0..4]) as i32;
        let kind = match mode {
            MODE_FREE => None,
            0 => Some(FileKind::RegularFile),
            1 => Some(FileKind::Directory),
            _ => {
                return Err(Error::CorruptImage(format!(
                    "inode {index} has unknown mode {mode}"
                )))
            }
        };
        let mut blocks = [0u16; BLOCK_POINTERS];
        for (slot, pointer) in blocks.iter_mut().enumerate() {
            let start = POINTERS_START + slot * 2;
            *pointer = u16_from_bytes(&bytes[start..start + 2]);
        }
        Ok(Self {
            index,
            kind,
            size: u32_from_bytes(&bytes[4..8]),
            created_at: u32_from_bytes(&bytes[8..12]),
            accessed_at: u32_from_bytes(&bytes[12..16]),
            modified_at: u32_from_bytes(&bytes[16..20]),
            deleted_at: u32_from_bytes(&bytes[20..24]),
            blocks,
        })
    }
}

impl PermanentIndexed for Inode {
    type Error = crate::Error;

    fn load<D: Read + Seek>(
        block_device: &mut D,
        layout: &Layout,
        index: u32,
    ) -> Result<Self, Self::Error> {
        let position = layout.inode_position(index)?;
        block_device.seek(SeekFrom::Start(position))?;
        let mut inode_raw = [0u8; INODE_RECORD_SIZE as usize];
        if let Err(e) = block_device.read_exact(&mut inode_raw) {
            return match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Err(Error::CorruptImage(format!(
                    "inode table ends before inode {index}"
                ))),
                _ => Err(e.into()),
            };
        }
        Self::from_bytes(index, &inode_raw)
    }

    fn flush<D: Write + Seek>(
        &self,
        block_device: &mut D,
        layout: &Layout,
    ) -> Result<(), Self::Error> {
        let position = layout.inode_position(self.index)?;
        block_device.seek(SeekFrom::Start(position))?;
        block_device.write_all(&self.as_bytes())?;
        Ok(())
    }
}

impl Display for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            None => "free",
            Some(FileKind::RegularFile) => "file",
            Some(FileKind::Directory) => "directory",
        };
        writeln!(f, "inode {} ({kind})", self.index)?;
        writeln!(f, "size:      {}", self.size)?;
        writeln!(f, "created:   {}", self.created_at)?;
        writeln!(f, "accessed:  {}", self.accessed_at)?;
        writeln!(f, "modified:  {}", self.modified_at)?;
        writeln!(f, "deleted:   {}", self.deleted_at)?;
        write!(f, "blocks:    {:?}", &self.blocks[..DIRECT_POINTERS])?;
        write!(f, "\nindirect:  {}", self.blocks[INDIRECT_POINTER])
    }
}
