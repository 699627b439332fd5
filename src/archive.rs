//! Raw-bytes archive store: `fix/{yyyy}/{MM}/{dd}/{HH}/{uuid}.fix`.
//!
//! New module against the `object_store` crate directly (chosen from
//! `examples/LenWilliamson-chapaty/Cargo.toml`; pure Rust, no native
//! dependency, so the local-filesystem backend builds in this sandbox).

use std::sync::Arc;

use chrono::Utc;
use object_store::{local::LocalFileSystem, path::Path as ObjectPath, ObjectStore};
use uuid::Uuid;

pub struct ArchiveStore {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveStore {
    pub fn local(root: &str) -> Result<Self, object_store::Error> {
        std::fs::create_dir_all(root).ok();
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Write raw trade bytes, returning the object path written.
    pub async fn archive_raw(&self, raw_bytes: &[u8]) -> Result<ObjectPath, object_store::Error> {
        let now = Utc::now();
        let path = ObjectPath::from(format!(
            "fix/{:04}/{:02}/{:02}/{:02}/{}.fix",
            now.format("%Y"),
            now.format("%m"),
            now.format("%d"),
            now.format("%H"),
            Uuid::new_v4(),
        ));
        self.store.put(&path, raw_bytes.to_vec().into()).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn qa_archive_raw_writes_under_fix_prefix() {
        let dir = std::env::temp_dir().join(format!("eod-archive-test-{}", std::process::id()));
        let archive = ArchiveStore::local(dir.to_str().unwrap()).unwrap();

        let path = archive.archive_raw(b"raw-fix-bytes").await.unwrap();
        assert!(path.as_ref().starts_with("fix/"));
        assert!(path.as_ref().ends_with(".fix"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
