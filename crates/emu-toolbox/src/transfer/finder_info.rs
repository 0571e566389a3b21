//! Classic Mac type/creator codes stored as Finder info on downloaded files.

use std::path::Path;

use crate::collaborators::FileKind;

/// Size of the Finder info record.
pub const FINDER_INFO_LEN: usize = 32;

#[cfg(target_os = "macos")]
const FINDER_INFO_ATTR: &str = "com.apple.FinderInfo";
// Other unixes only allow user-namespace attributes; this is the name Samba and netatalk expect
#[cfg(all(unix, not(target_os = "macos")))]
const FINDER_INFO_ATTR: &str = "user.com.apple.FinderInfo";

/// Builds a Finder info record: type in bytes 0–3, creator in 4–7, the rest zero.
pub fn encode_finder_info(kind: &FileKind) -> [u8; FINDER_INFO_LEN] {
    let mut info = [0u8; FINDER_INFO_LEN];
    info[..4].copy_from_slice(&kind.type_code);
    info[4..8].copy_from_slice(&kind.creator);
    info
}

/// Attaches `kind` to the file at `path`.
#[cfg(unix)]
pub fn write_finder_info(path: &Path, kind: &FileKind) -> std::io::Result<()> {
    xattr::set(path, FINDER_INFO_ATTR, &encode_finder_info(kind))
}

#[cfg(not(unix))]
pub fn write_finder_info(_path: &Path, _kind: &FileKind) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "extended attributes aren't supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_places_type_then_creator() {
        let info = encode_finder_info(&FileKind {
            type_code: *b"TEXT",
            creator: *b"ttxt",
        });
        assert_eq!(&info[..8], b"TEXTttxt");
        assert!(info[8..].iter().all(|b| *b == 0));
    }
}
