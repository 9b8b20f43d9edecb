use std::fmt::Display;
use std::io::{ErrorKind, Read};

use super::{u16_from_bytes, DirEntry, DIR_ENTRY_HEADER_SIZE, MAX_NAME_LENGTH};
use crate::structs::FileKind;
use crate::Error;

const MAX_RECORD_LENGTH: usize = DIR_ENTRY_HEADER_SIZE + MAX_NAME_LENGTH;

impl DirEntry {
    pub fn new(inode: u32, kind: FileKind, name: &str) -> Self {
        let name = name.as_bytes().to_vec();
        Self {
            inode,
            record_length: (DIR_ENTRY_HEADER_SIZE + name.len()) as u16,
            name_length: name.len() as u16,
            kind,
            name,
        }
    }

    pub fn inode(&self) -> u32 {
        self.inode
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn record_length(&self) -> u16 {
        self.record_length
    }

    /// The `.` and `..` links every directory carries
    pub fn is_link(&self) -> bool {
        self.name == b"." || self.name == b".."
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.record_length as usize);
        bytes.extend_from_slice(&(self.inode as u16).to_le_bytes());
        bytes.extend_from_slice(&self.record_length.to_le_bytes());
        bytes.extend_from_slice(&self.name_length.to_le_bytes());
        bytes.extend_from_slice(&(self.kind as u16).to_le_bytes());
        bytes.extend_from_slice(&self.name);
        bytes
    }

    /// Decode the next record from `reader`.
    /// [`None`] marks the end of a block's records: too few bytes left for a
    /// header, a zero record length, or one longer than any valid record.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<Self>, Error> {
        let mut header = [0u8; DIR_ENTRY_HEADER_SIZE];
        if let Err(e) = reader.read_exact(&mut header) {
            return match e.kind() {
                ErrorKind::UnexpectedEof => Ok(None),
                _ => Err(e.into()),
            };
        }
        let inode = u16_from_bytes(&header[0..2]) as u32;
        let record_length = u16_from_bytes(&header[2..4]);
        let name_length = u16_from_bytes(&header[4..6]);
        let file_type = u16_from_bytes(&header[6..8]);
        if record_length == 0 || record_length as usize > MAX_RECORD_LENGTH {
            return Ok(None);
        }
        if record_length as usize != DIR_ENTRY_HEADER_SIZE + name_length as usize {
            return Err(Error::CorruptImage(format!(
                "directory entry of length {record_length} holds a {name_length} byte name"
            )));
        }
        let kind = FileKind::from_raw(file_type).ok_or_else(|| {
            Error::CorruptImage(format!("directory entry has unknown file type {file_type}"))
        })?;
        let mut name = vec![0u8; name_length as usize];
        if let Err(e) = reader.read_exact(&mut name) {
            return match e.kind() {
                ErrorKind::UnexpectedEof => Err(Error::CorruptImage(
                    "directory entry name runs past its block".to_owned(),
                )),
                _ => Err(e.into()),
            };
        }
        Ok(Some(Self {
            inode,
            record_length,
            name_length,
            kind,
            name,
        }))
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Option<Self>, Error> {
        Self::read(&mut bytes)
    }
}

impl Display for DirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            FileKind::RegularFile => 'f',
            FileKind::Directory => 'd',
        };
        write!(
            f,
            "{kind} {:>5} {:>4} {}",
            self.inode,
            self.record_length,
            self.name_lossy()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_layout() {
        let entry = DirEntry::new(3, FileKind::Directory, "docs");
        assert_eq![entry.record_length(), 12];
        assert_eq![
            entry.as_bytes(),
            vec![3, 0, 12, 0, 4, 0, 1, 0, b'd', b'o', b'c', b's']
        ];
        assert_eq![DirEntry::from_bytes(&entry.as_bytes()).unwrap(), Some(entry)];
    }

    #[test]
    fn consecutive_records() {
        let mut bytes = DirEntry::new(0, FileKind::Directory, ".").as_bytes();
        bytes.extend(DirEntry::new(9, FileKind::RegularFile, "a.txt").as_bytes());
        bytes.extend([0u8; 20]);
        let mut reader = &bytes[..];
        let first = DirEntry::read(&mut reader).unwrap().unwrap();
        let second = DirEntry::read(&mut reader).unwrap().unwrap();
        assert_eq![first.name(), b"."];
        assert_eq![second.inode(), 9];
        assert_eq![second.kind(), FileKind::RegularFile];
        assert_eq![DirEntry::read(&mut reader).unwrap(), None];
    }

    #[test]
    fn end_of_records() {
        assert_eq![DirEntry::from_bytes(&[]).unwrap(), None];
        assert_eq![DirEntry::from_bytes(&[1, 0, 9]).unwrap(), None];
        let oversized = [1, 0, 0xff, 0x0f, 4, 0, 0, 0];
        assert_eq![DirEntry::from_bytes(&oversized).unwrap(), None];
    }

    #[test]
    fn corrupt_records() {
        let mismatched = [1, 0, 12, 0, 5, 0, 0, 0, b'a', b'b', b'c', b'd'];
        assert!(matches!(
            DirEntry::from_bytes(&mismatched),
            Err(Error::CorruptImage(_))
        ));
        let unknown_type = [1, 0, 9, 0, 1, 0, 7, 0, b'a'];
        assert!(matches!(
            DirEntry::from_bytes(&unknown_type),
            Err(Error::CorruptImage(_))
        ));
        let truncated = [1, 0, 12, 0, 4, 0, 0, 0, b'a'];
        assert!(matches!(
            DirEntry::from_bytes(&truncated),
            Err(Error::CorruptImage(_))
        ));
    }
}
