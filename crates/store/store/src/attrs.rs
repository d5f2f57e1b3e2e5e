//! Attribute names and encodings shared by every writer and reader of
//! blob metadata.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Attribute holding the expiry instant.
pub const TTL_ATTR: &str = "TTL";
/// Attribute holding the original filename.
pub const FILENAME_ATTR: &str = "FILENAME";
/// Name of the advisory lock guarding a blob.
pub const LOCK_NAME: &str = "lock";
/// Upper bound on the stored filename, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Encode an expiry as 8-byte little-endian epoch seconds.
#[must_use]
pub fn encode_ttl(ttl: DateTime<Utc>) -> [u8; 8] {
    ttl.timestamp().to_le_bytes()
}

/// Decode a TTL attribute. Returns `None` for anything that is not
/// exactly 8 bytes or is out of range.
#[must_use]
pub fn decode_ttl(raw: &[u8]) -> Option<DateTime<Utc>> {
    let raw: [u8; 8] = raw.try_into().ok()?;
    DateTime::from_timestamp(i64::from_le_bytes(raw), 0)
}

/// `now + ttl`, saturating at the largest representable instant.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Truncate a filename to [`MAX_FILENAME_LEN`] bytes without splitting a
/// UTF-8 character.
#[must_use]
pub fn bounded_filename(name: &str) -> &str {
    if name.len() <= MAX_FILENAME_LEN {
        return name;
    }
    let mut end = MAX_FILENAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Decode a stored filename, dropping NUL padding and invalid UTF-8.
#[must_use]
pub fn decode_filename(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
