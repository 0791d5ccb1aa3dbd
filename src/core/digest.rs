//! Content digests for files and structurally comparable values.
//!
//! Digests are md5 checksums rendered as lowercase hex. File digests feed
//! the memoization database's change detection; value digests give cached
//! procedures a stable identity for their descriptors.

use std::fs;
use std::path::Path;

use crate::Result;
use crate::core::value::Value;

/// Digest the contents of a file as a lowercase hex string.
///
/// # Errors
///
/// Returns an I/O error if the file is absent or unreadable.
pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Digest an arbitrary string as a lowercase hex string.
pub fn digest_str(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

/// Produce a stable digest of a structurally comparable value.
///
/// Mappings serialize with sorted keys and sequences preserve order, so
/// two values that compare equal always digest identically regardless of
/// how they were constructed.
pub fn digest_value(value: &Value) -> String {
    // Serialization cannot fail for the closed Value domain.
    let canonical = serde_json::to_string(value).expect("Value serialization is infallible");
    digest_str(&canonical)
}
