use std::time::{SystemTime, UNIX_EPOCH};

use super::{BYTES_IN_U16, BYTES_IN_U32, MAX_NAME_LENGTH};
use crate::Error;

pub fn u32_from_bytes(bytes: &[u8]) -> u32 {
    let mut raw = [0; BYTES_IN_U32];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

pub fn u16_from_bytes(bytes: &[u8]) -> u16 {
    let mut raw = [0; BYTES_IN_U16];
    raw.copy_from_slice(bytes);
    u16::from_le_bytes(raw)
}

/// Seconds since the epoch, never zero so it can mark a deletion
pub fn timestamp_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or_default()
        .max(1)
}

/// Split path into its parent directory and last component.
/// An empty parent stands for the current directory.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        return ("/", "");
    }
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(split) => (&trimmed[..split], &trimmed[split + 1..]),
        None => ("", trimmed),
    }
}

pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\0'])
        || name.len() > MAX_NAME_LENGTH
    {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_paths() {
        assert_eq!(split_path("a.txt"), ("", "a.txt"));
        assert_eq!(split_path("docs/a.txt"), ("docs", "a.txt"));
        assert_eq!(split_path("/docs/a.txt"), ("/docs", "a.txt"));
        assert_eq!(split_path("/a.txt"), ("/", "a.txt"));
        assert_eq!(split_path("docs/sub/"), ("docs", "sub"));
        assert_eq!(split_path("/"), ("/", ""));
        assert_eq!(split_path(""), ("", ""));
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
        assert!(validate_name(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn timestamps_are_nonzero() {
        assert!(timestamp_now() > 0);
    }
}
