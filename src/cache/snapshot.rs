//! Cache snapshots as JSON Lines
//!
//! One record per line, entries in insertion order, so a snapshot imported
//! into an empty cache reproduces the eviction order it was taken with.
//! Import is line-by-line: a malformed line aborts with an error but keeps
//! everything imported before it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use super::entry::CacheEntry;
use super::store::BoundedCache;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },

    #[error("snapshot encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    key: String,
    status: u16,
    headers: BTreeMap<String, String>,
    content: Vec<u8>,
    content_type: String,
    created_at: i64,
    expires: i64,
    hit_count: u64,
    user_properties: BTreeMap<String, String>,
}

impl From<&CacheEntry> for SnapshotRecord {
    fn from(entry: &CacheEntry) -> Self {
        SnapshotRecord {
            key: entry.key.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            content: entry.content.to_vec(),
            content_type: entry.content_type.clone(),
            created_at: entry.created_at,
            expires: entry.expires,
            hit_count: entry.hit_count,
            user_properties: entry.user_properties.clone(),
        }
    }
}

impl From<SnapshotRecord> for CacheEntry {
    fn from(record: SnapshotRecord) -> Self {
        CacheEntry {
            key: record.key,
            status: record.status,
            headers: record.headers,
            content: Bytes::from(record.content),
            content_type: record.content_type,
            created_at: record.created_at,
            expires: record.expires,
            hit_count: record.hit_count,
            user_properties: record.user_properties,
        }
    }
}

/// Writes all live entries to `path`, returning how many were written
pub fn export(cache: &BoundedCache, path: &Path, now: i64) -> Result<usize, SnapshotError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for entry in cache.entries() {
        if entry.is_expired(now) {
            continue;
        }
        let line = serde_json::to_string(&SnapshotRecord::from(&entry))?;
        writeln!(writer, "{}", line)?;
        written += 1;
    }
    writer.flush()?;
    info!(path = %path.display(), entries = written, "Cache snapshot written");
    Ok(written)
}

/// Loads entries from `path` through the normal store path, so capacity and
/// entry-size rules hold. Entries already expired at import time are skipped.
pub fn import(cache: &BoundedCache, path: &Path, now: i64) -> Result<usize, SnapshotError> {
    let reader = BufReader::new(File::open(path)?);
    let mut imported = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SnapshotRecord =
            serde_json::from_str(&line).map_err(|source| SnapshotError::Malformed {
                line: index + 1,
                source,
            })?;
        let entry = CacheEntry::from(record);
        if entry.is_expired(now) {
            continue;
        }
        if cache.store(entry) {
            imported += 1;
        }
    }
    info!(path = %path.display(), entries = imported, "Cache snapshot loaded");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn entry(key: &str, body: &str, expires: i64) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            status: 200,
            headers: BTreeMap::from([(
                "Content-Type".to_string(),
                "image/png".to_string(),
            )]),
            content: Bytes::from(body.to_string()),
            content_type: "image/png".to_string(),
            created_at: 0,
            expires,
            hit_count: 3,
            user_properties: BTreeMap::from([("producer".to_string(), "image".to_string())]),
        }
    }

    #[test]
    fn test_round_trip_preserves_entries_and_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");

        let cache = BoundedCache::new(8, ByteSize::kib(1));
        cache.store(entry("/b.png", "bbb", 1000));
        cache.store(entry("/a.png", "aaa", 2000));
        assert_eq!(export(&cache, &path, 0).unwrap(), 2);

        let restored = BoundedCache::new(8, ByteSize::kib(1));
        assert_eq!(import(&restored, &path, 0).unwrap(), 2);
        let keys: Vec<String> = restored.entries().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["/b.png", "/a.png"]);
        let a = restored.entries().pop().unwrap();
        assert_eq!(&a.content[..], b"aaa");
        assert_eq!(a.hit_count, 3);
        assert_eq!(a.user_properties.get("producer").map(String::as_str), Some("image"));
    }

    #[test]
    fn test_expired_entries_are_not_exported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        let cache = BoundedCache::new(8, ByteSize::kib(1));
        cache.store(entry("/old.png", "x", 100));
        cache.store(entry("/live.png", "y", 9000));
        assert_eq!(export(&cache, &path, 500).unwrap(), 1);
    }

    #[test]
    fn test_expired_entries_are_skipped_on_import() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        let cache = BoundedCache::new(8, ByteSize::kib(1));
        cache.store(entry("/old.png", "x", 100));
        cache.store(entry("/live.png", "y", 9000));
        export(&cache, &path, 0).unwrap();

        let restored = BoundedCache::new(8, ByteSize::kib(1));
        assert_eq!(import(&restored, &path, 500).unwrap(), 1);
        assert!(restored.lookup("/old.png", 500).is_none());
        assert!(restored.lookup("/live.png", 500).is_some());
    }

    #[test]
    fn test_malformed_line_aborts_but_keeps_prior_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");

        let cache = BoundedCache::new(8, ByteSize::kib(1));
        cache.store(entry("/a.png", "aaa", 9000));
        export(&cache, &path, 0).unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{ this is not json\n");
        std::fs::write(&path, content).unwrap();

        let restored = BoundedCache::new(8, ByteSize::kib(1));
        let err = import(&restored, &path, 0).unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed { line: 2, .. }));
        assert_eq!(restored.len(), 1);
        assert!(restored.lookup("/a.png", 0).is_some());
    }

    #[test]
    fn test_import_respects_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.jsonl");
        let cache = BoundedCache::new(8, ByteSize::kib(1));
        for i in 0..5 {
            cache.store(entry(&format!("/img-{}.png", i), "x", 9000));
        }
        export(&cache, &path, 0).unwrap();

        let small = BoundedCache::new(2, ByteSize::kib(1));
        import(&small, &path, 0).unwrap();
        assert_eq!(small.len(), 2);
        // the newest two survive, imported through normal eviction
        assert!(small.lookup("/img-3.png", 0).is_some());
        assert!(small.lookup("/img-4.png", 0).is_some());
    }
}
