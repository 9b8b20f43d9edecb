use std::fmt::Display;

/// Pool a [`Error::ResourceExhausted`] ran out of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Blocks,
    Inodes,
}

#[derive(Debug)]
pub enum Error {
    /// No free inode or block left in the bitmap
    ResourceExhausted(Resource),
    /// Bitmap or table index outside of the configured layout
    InvalidIndex { index: u64, limit: u64 },
    /// On-disk record failed structural sanity checks
    CorruptImage(String),
    /// Path or name lookup failure
    NotFound(String),
    /// Write would need more blocks than direct and indirect pointers address
    FileTooLarge { required: u64, capacity: u64 },
    /// Name unusable as a directory entry
    InvalidName(String),
    /// Layout parameters outside of supported bounds
    InvalidLayout(String),
    /// Device carries no recognizable image header
    Unformatted,
    Io(std::io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceExhausted(Resource::Blocks) => {
                write!(f, "no free blocks left, delete some files")
            }
            Self::ResourceExhausted(Resource::Inodes) => {
                write!(f, "no free inodes left, delete some files")
            }
            Self::InvalidIndex { index, limit } => {
                write!(f, "index {index} out of bounds (limit {limit})")
            }
            Self::CorruptImage(detail) => write!(f, "corrupt image: {detail}"),
            Self::NotFound(path) => write!(f, "{path}: not found"),
            Self::FileTooLarge { required, capacity } => write!(
                f,
                "file too large: needs {required} blocks, at most {capacity} addressable"
            ),
            Self::InvalidName(name) => write!(f, "invalid name {name:?}"),
            Self::InvalidLayout(detail) => write!(f, "invalid layout: {detail}"),
            Self::Unformatted => write!(f, "device holds no formatted image"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<Error> for libc::c_int {
    fn from(value: Error) -> Self {
        match value {
            Error::ResourceExhausted(_) => libc::ENOSPC,
            Error::InvalidIndex { .. } => libc::ERANGE,
            Error::CorruptImage(_) => libc::EIO,
            Error::NotFound(_) => libc::ENOENT,
            Error::FileTooLarge { .. } => libc::EFBIG,
            Error::InvalidName(_) => libc::EINVAL,
            Error::InvalidLayout(_) => libc::EINVAL,
            Error::Unformatted => libc::ENODEV,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Resource};

    #[test]
    fn errno_mapping() {
        assert_eq![libc::c_int::from(Error::NotFound("a".into())), libc::ENOENT];
        assert_eq![
            libc::c_int::from(Error::ResourceExhausted(Resource::Blocks)),
            libc::ENOSPC
        ];
        assert_eq![
            libc::c_int::from(Error::FileTooLarge {
                required: 200,
                capacity: 142
            }),
            libc::EFBIG
        ];
    }
}
