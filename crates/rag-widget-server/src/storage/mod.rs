use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Contract with the external object store. The core only needs three
/// operations; bucket plumbing stays behind this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// Canonical object layout: bots/{bot_id}/sources/{source_id}/{filename}.
pub fn object_path(bot_id: Uuid, source_id: Uuid, filename: &str) -> String {
    format!("bots/{bot_id}/sources/{source_id}/{}", sanitize(filename))
}

pub fn source_prefix(bot_id: Uuid, source_id: Uuid) -> String {
    format!("bots/{bot_id}/sources/{source_id}")
}

fn sanitize(filename: &str) -> String {
    // Keep only the final path component, then the safe character set.
    let base = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let name: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = name.trim_start_matches('.').to_string();
    if name.is_empty() {
        "upload".to_string()
    } else {
        name
    }
}

/// Filesystem-backed store rooted at a configured directory.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        // Object paths are always generated by object_path(); the join is a
        // relative path with sanitized segments.
        self.root.join(Path::new(path))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("writing {}", full.display()))?;

        debug!(path, bytes = bytes.len(), "stored object");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("reading {}", full.display()))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let full = self.resolve(prefix);
        match tokio::fs::remove_dir_all(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", full.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths_follow_the_bucket_convention() {
        let bot = Uuid::nil();
        let source = Uuid::nil();
        let path = object_path(bot, source, "report.pdf");
        assert_eq!(
            path,
            format!("bots/{bot}/sources/{source}/report.pdf")
        );
    }

    #[test]
    fn filenames_are_sanitized() {
        let path = object_path(Uuid::nil(), Uuid::nil(), "../../etc/passwd");
        assert!(!path.contains(".."));
        assert!(!path.contains("/etc/"));
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let bot = Uuid::new_v4();
        let source = Uuid::new_v4();
        let path = object_path(bot, source, "notes.txt");

        store.put(&path, b"hello bytes").await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), b"hello bytes");

        store.delete_prefix(&source_prefix(bot, source)).await.unwrap();
        assert!(store.get(&path).await.is_err());

        // Deleting an already-missing prefix is not an error.
        store.delete_prefix(&source_prefix(bot, source)).await.unwrap();
    }
}
