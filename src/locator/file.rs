//! Local filesystem locator

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::humanize::ByteSize;

use super::{LocatedResource, LocatorError, ResourceLocator};

/// Serves sources from a directory root. References that would escape the
/// root or address hidden files resolve to nothing rather than an error,
/// so callers cannot distinguish them from absent files.
pub struct FileLocator {
    root: PathBuf,
    max_bytes: ByteSize,
}

impl FileLocator {
    pub fn new(root: impl Into<PathBuf>, max_bytes: ByteSize) -> Self {
        FileLocator {
            root: root.into(),
            max_bytes,
        }
    }

    fn resolve(&self, source: &str) -> Option<PathBuf> {
        if source.is_empty() {
            return None;
        }
        let mut path = self.root.clone();
        for part in source.split('/') {
            if part.is_empty() {
                continue;
            }
            if part == ".." || part.starts_with('.') || part.contains('\\') {
                return None;
            }
            path.push(part);
        }
        (path != self.root).then_some(path)
    }
}

#[async_trait]
impl ResourceLocator for FileLocator {
    fn handles(&self, source: &str) -> bool {
        !source.contains("://")
    }

    async fn locate(&self, source: &str) -> Result<Option<LocatedResource>, LocatorError> {
        let Some(path) = self.resolve(source) else {
            return Ok(None);
        };
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LocatorError::Io(format!("{}: {}", path.display(), err))),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        if metadata.len() > self.max_bytes.as_u64() {
            return Err(LocatorError::TooLarge(format!(
                "{} exceeds the {} source limit",
                source,
                self.max_bytes.to_human_readable()
            )));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| LocatorError::Io(format!("{}: {}", path.display(), err)))?;
        let last_modified = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .map(truncate_to_seconds);

        Ok(Some(LocatedResource {
            bytes: Bytes::from(bytes),
            content_type: guess_content_type(&path).map(str::to_string),
            last_modified,
        }))
    }
}

fn guess_content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    crate::engine::codec::content_type_for(&extension)
}

// HTTP dates carry whole seconds
fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}
