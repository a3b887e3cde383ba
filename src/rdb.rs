//! Snapshot (RDB) encoding, decoding and file I/O.
//!
//! Layout: the ASCII magic `REDIS0009`, then — only when the store is
//! non-empty — a body of big-endian length-prefixed entries (strings first,
//! then lists, each with an i64 expiration where -1 means none), then a
//! single `0xFF` terminator. The snapshot of an empty store is therefore
//! exactly the magic followed by `0xFF`.

use std::path::Path;

use thiserror::Error;
use tokio::fs;

use crate::keyspace::Keyspace;

pub const SNAPSHOT_MAGIC: &[u8] = b"REDIS0009";
const SNAPSHOT_EOF: u8 = 0xFF;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing snapshot magic header")]
    BadMagic,
    #[error("truncated snapshot while reading {0}")]
    Truncated(&'static str),
    #[error("snapshot field is not valid UTF-8")]
    InvalidUtf8,
    #[error("missing snapshot end-of-file marker")]
    MissingEof,
}

pub fn encode_snapshot(keyspace: &Keyspace) -> Vec<u8> {
    let (strings, lists) = keyspace.snapshot_entries();

    let mut bytes = Vec::from(SNAPSHOT_MAGIC);

    if !strings.is_empty() || !lists.is_empty() {
        bytes.extend_from_slice(&(strings.len() as u64).to_be_bytes());
        for (key, value, deadline) in &strings {
            write_string(&mut bytes, key);
            write_string(&mut bytes, value);
            bytes.extend_from_slice(&deadline.to_be_bytes());
        }

        bytes.extend_from_slice(&(lists.len() as u64).to_be_bytes());
        for (key, elements, deadline) in &lists {
            write_string(&mut bytes, key);
            bytes.extend_from_slice(&(elements.len() as u64).to_be_bytes());
            for element in elements {
                write_string(&mut bytes, element);
            }
            bytes.extend_from_slice(&deadline.to_be_bytes());
        }
    }

    bytes.push(SNAPSHOT_EOF);
    bytes
}

/// Replaces the contents of `keyspace` with the decoded snapshot.
///
/// The store is cleared before parsing; malformed input aborts the load
/// with an error and leaves the store empty.
pub fn decode_snapshot(bytes: &[u8], keyspace: &Keyspace) -> Result<(), SnapshotError> {
    keyspace.clear();

    if bytes.len() < SNAPSHOT_MAGIC.len() || &bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let mut cursor = SNAPSHOT_MAGIC.len();

    match bytes.get(cursor) {
        None => return Err(SnapshotError::MissingEof),
        Some(&SNAPSHOT_EOF) => return Ok(()),
        Some(_) => (),
    }

    let result = decode_body(bytes, &mut cursor, keyspace);
    if result.is_err() {
        keyspace.clear();
    }

    result
}

fn decode_body(
    bytes: &[u8],
    cursor: &mut usize,
    keyspace: &Keyspace,
) -> Result<(), SnapshotError> {
    let num_strings = read_u64(bytes, cursor, "string count")?;
    for _ in 0..num_strings {
        let key = read_string(bytes, cursor, "string key")?;
        let value = read_string(bytes, cursor, "string value")?;
        let deadline = read_i64(bytes, cursor, "string expiration")?;
        keyspace.restore_string(key, value, deadline);
    }

    let num_lists = read_u64(bytes, cursor, "list count")?;
    for _ in 0..num_lists {
        let key = read_string(bytes, cursor, "list key")?;
        let num_elements = read_u64(bytes, cursor, "list length")?;
        let mut elements = Vec::with_capacity(num_elements.min(1024) as usize);
        for _ in 0..num_elements {
            elements.push(read_string(bytes, cursor, "list element")?);
        }
        let deadline = read_i64(bytes, cursor, "list expiration")?;
        keyspace.restore_list(key, elements, deadline);
    }

    if bytes.get(*cursor) != Some(&SNAPSHOT_EOF) {
        return Err(SnapshotError::MissingEof);
    }

    Ok(())
}

/// Writes the snapshot to `path` atomically: the bytes land in a temp file
/// that is renamed over the target.
pub async fn save_snapshot(path: &Path, keyspace: &Keyspace) -> Result<(), SnapshotError> {
    let bytes = encode_snapshot(keyspace);

    let temp_path = path.with_extension("rdb.tmp");
    fs::write(&temp_path, &bytes).await?;
    fs::rename(&temp_path, path).await?;

    Ok(())
}

pub async fn load_snapshot(path: &Path, keyspace: &Keyspace) -> Result<(), SnapshotError> {
    let bytes = fs::read(path).await?;
    decode_snapshot(&bytes, keyspace)
}

fn write_string(bytes: &mut Vec<u8>, value: &str) {
    bytes.extend_from_slice(&(value.len() as u64).to_be_bytes());
    bytes.extend_from_slice(value.as_bytes());
}

fn take<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
    field: &'static str,
) -> Result<&'a [u8], SnapshotError> {
    let end = cursor
        .checked_add(len)
        .ok_or(SnapshotError::Truncated(field))?;

    if end > bytes.len() {
        return Err(SnapshotError::Truncated(field));
    }

    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_u64(bytes: &[u8], cursor: &mut usize, field: &'static str) -> Result<u64, SnapshotError> {
    let slice = take(bytes, cursor, 8, field)?;
    let eight_bytes: [u8; 8] = slice
        .try_into()
        .map_err(|_| SnapshotError::Truncated(field))?;
    Ok(u64::from_be_bytes(eight_bytes))
}

fn read_i64(bytes: &[u8], cursor: &mut usize, field: &'static str) -> Result<i64, SnapshotError> {
    let slice = take(bytes, cursor, 8, field)?;
    let eight_bytes: [u8; 8] = slice
        .try_into()
        .map_err(|_| SnapshotError::Truncated(field))?;
    Ok(i64::from_be_bytes(eight_bytes))
}

fn read_string(
    bytes: &[u8],
    cursor: &mut usize,
    field: &'static str,
) -> Result<String, SnapshotError> {
    let len = read_u64(bytes, cursor, field)?;
    let len = usize::try_from(len).map_err(|_| SnapshotError::Truncated(field))?;
    let slice = take(bytes, cursor, len, field)?;

    String::from_utf8(slice.to_vec()).map_err(|_| SnapshotError::InvalidUtf8)
}
