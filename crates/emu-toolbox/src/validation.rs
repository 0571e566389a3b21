//! Filename and size validation for transfers.
//!
//! Upload names go into the device's fixed 33-byte name field and onto whatever filesystem the
//! emulator's card uses, so they're held to a conservative portable set. Download names come
//! from the device and only need to be safe as a single local path component.

use serde::{Deserialize, Serialize};

use crate::scsi::commands::NAME_FIELD_LEN;

/// Maximum upload name length in bytes (the name field minus its terminator).
pub const MAX_NAME_BYTES: usize = NAME_FIELD_LEN - 1;
/// Largest file the 32-bit size field of a listing record can describe.
pub const MAX_FILE_BYTES: u64 = u32::MAX as u64;

/// Validation error types for filename and size checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ValidationError {
    /// Name is empty or whitespace-only.
    Empty,
    /// Name contains a disallowed character.
    DisallowedCharacter { character: String },
    /// Name exceeds the device's name field.
    NameTooLong { bytes: usize, max: usize },
    /// Name would not stay inside the destination directory.
    NotAPathComponent { name: String },
    /// Source file is too large for the device's size field.
    FileTooLarge { bytes: u64, max: u64 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Name can't be empty"),
            Self::DisallowedCharacter { character } => {
                write!(f, "Name contains a disallowed character: {}", character)
            }
            Self::NameTooLong { bytes, max } => {
                write!(f, "Name is {} bytes, which exceeds the {} byte limit", bytes, max)
            }
            Self::NotAPathComponent { name } => {
                write!(f, "Name \"{}\" can't be used as a local file name", name)
            }
            Self::FileTooLarge { bytes, max } => {
                write!(f, "File is {} bytes, which exceeds the {} byte limit", bytes, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

fn is_portable(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | ' ')
}

/// Validates a name for upload to the device.
///
/// Checks performed:
/// - Not empty / whitespace-only
/// - Only ASCII letters, digits, `_`, `-`, `.` and space
/// - At most 32 bytes
pub fn validate_upload_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    if let Some(ch) = name.chars().find(|ch| !is_portable(*ch)) {
        let character = match ch {
            '\0' => "NUL".to_string(),
            other => other.to_string(),
        };
        return Err(ValidationError::DisallowedCharacter { character });
    }

    let byte_len = name.len();
    if byte_len > MAX_NAME_BYTES {
        return Err(ValidationError::NameTooLong {
            bytes: byte_len,
            max: MAX_NAME_BYTES,
        });
    }

    Ok(())
}

/// Validates a device-supplied name before it's joined onto a local directory.
pub fn validate_local_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if name == "." || name == ".." {
        return Err(ValidationError::NotAPathComponent { name: name.to_string() });
    }
    for ch in name.chars() {
        if ch == '/' || ch == '\\' {
            return Err(ValidationError::DisallowedCharacter {
                character: ch.to_string(),
            });
        }
        if ch == '\0' {
            return Err(ValidationError::DisallowedCharacter {
                character: "NUL".to_string(),
            });
        }
    }
    Ok(())
}

/// Validates that a source file fits the device's 32-bit size field.
pub fn validate_source_size(bytes: u64) -> Result<(), ValidationError> {
    if bytes > MAX_FILE_BYTES {
        return Err(ValidationError::FileTooLarge {
            bytes,
            max: MAX_FILE_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // validate_upload_name
    // ========================================================================

    #[test]
    fn test_accepts_simple_name() {
        assert!(validate_upload_name("GAME.DSK").is_ok());
    }

    #[test]
    fn test_accepts_spaces_dashes_and_underscores() {
        assert!(validate_upload_name("my disk_image-2.hda").is_ok());
    }

    #[test]
    fn test_rejects_empty_and_blank() {
        assert_eq!(validate_upload_name(""), Err(ValidationError::Empty));
        assert_eq!(validate_upload_name("   "), Err(ValidationError::Empty));
    }

    #[test]
    fn test_rejects_non_portable_characters() {
        assert_eq!(
            validate_upload_name("a/b"),
            Err(ValidationError::DisallowedCharacter {
                character: "/".to_string()
            })
        );
        assert!(matches!(
            validate_upload_name("café.txt"),
            Err(ValidationError::DisallowedCharacter { .. })
        ));
        assert_eq!(
            validate_upload_name("a\0b"),
            Err(ValidationError::DisallowedCharacter {
                character: "NUL".to_string()
            })
        );
    }

    #[test]
    fn test_name_length_limit_is_32_bytes() {
        assert!(validate_upload_name(&"a".repeat(32)).is_ok());
        assert_eq!(
            validate_upload_name(&"a".repeat(33)),
            Err(ValidationError::NameTooLong { bytes: 33, max: 32 })
        );
    }

    // ========================================================================
    // validate_local_name
    // ========================================================================

    #[test]
    fn test_local_name_allows_anything_but_separators() {
        assert!(validate_local_name("Read Me!.txt").is_ok());
        assert!(validate_local_name("日本語").is_ok());
    }

    #[test]
    fn test_local_name_rejects_traversal() {
        assert!(matches!(
            validate_local_name(".."),
            Err(ValidationError::NotAPathComponent { .. })
        ));
        assert!(matches!(
            validate_local_name("../etc"),
            Err(ValidationError::DisallowedCharacter { .. })
        ));
    }

    // ========================================================================
    // validate_source_size
    // ========================================================================

    #[test]
    fn test_source_size_limit() {
        assert!(validate_source_size(u64::from(u32::MAX)).is_ok());
        assert!(matches!(
            validate_source_size(u64::from(u32::MAX) + 1),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_string(&ValidationError::NameTooLong { bytes: 40, max: 32 }).unwrap();
        assert!(json.contains("\"kind\":\"nameTooLong\""), "JSON: {}", json);
    }
}
