//! Filename sanitization for uploaded files.

use crate::TEMP_SUFFIX;

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Device names Windows refuses to use as regular files, with or without an extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters replaced with `_` because some filesystems reject them.
const REPLACED_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Reduce a client-declared filename to a single safe path component.
///
/// Directory components are stripped, but any `..` component or an absolute
/// path is rejected outright rather than silently rewritten.
pub fn sanitize_filename(declared: &str) -> crate::Result<String> {
    if declared.trim().is_empty() {
        return Err(invalid(declared, "name is empty"));
    }

    let normalized = declared.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return Err(invalid(declared, "absolute paths are not allowed"));
    }
    if normalized.split('/').any(|component| component.trim() == "..") {
        return Err(invalid(declared, "path traversal is not allowed"));
    }

    let base = normalized.rsplit('/').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if REPLACED_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() || cleaned == "." {
        return Err(invalid(declared, "name is empty after sanitization"));
    }
    if cleaned.len() > MAX_FILENAME_BYTES {
        return Err(invalid(
            declared,
            &format!("name exceeds {MAX_FILENAME_BYTES} bytes"),
        ));
    }
    if is_reserved(&cleaned) {
        return Err(invalid(declared, "name is reserved by the system"));
    }
    if cleaned.ends_with(TEMP_SUFFIX) {
        return Err(invalid(
            declared,
            &format!("names ending in {TEMP_SUFFIX} are reserved for in-flight uploads"),
        ));
    }

    Ok(cleaned)
}

fn invalid(declared: &str, reason: &str) -> crate::Error {
    crate::Error::InvalidFilename(format!("{declared:?}: {reason}"))
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn is_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim_end();
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}
