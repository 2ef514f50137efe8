//! JSON-file key/value store
//!
//! The whole store is one JSON object on disk. It is read on first use and
//! rewritten after every mutation through a temporary file and an atomic
//! rename, so a crash leaves either the old or the new document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use circlepay_core::KeyValueStore;
use circlepay_domain::{CirclePayError, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::InfraError;

type Document = BTreeMap<String, String>;

/// [`KeyValueStore`] persisted to a single JSON file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    document: Mutex<Option<Document>>,
}

impl FileStore {
    /// Store backed by the JSON document at `path`; read on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), document: Mutex::new(None) }
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Document> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Document::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                CirclePayError::Serialization(format!(
                    "corrupt store file {}: {err}",
                    self.path.display()
                ))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store file missing, starting empty");
                Ok(Document::new())
            }
            Err(err) => Err(InfraError::from(err).into()),
        }
    }

    async fn persist(&self, document: &Document) -> Result<()> {
        let data = serde_json::to_vec(document)?;
        self.write_atomic(&data).await.map_err(|err| InfraError::from(err).into())
    }

    async fn write_atomic(&self, data: &[u8]) -> std::io::Result<()> {
        let temp_path = self.path.with_extension("tmp");

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await
    }

    /// Apply `change` to the loaded document and persist it.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let document = guard.get_or_insert_with(Document::new);

        let mut updated = document.clone();
        if change(&mut updated) {
            self.persist(&updated).await?;
            *document = updated;
        }
        Ok(())
    }

    async fn read<R>(&self, view: impl FnOnce(&Document) -> R) -> Result<R> {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(view(guard.get_or_insert_with(Document::new)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(|document| document.get(key).cloned()).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.mutate(|document| {
            document.insert(key.to_string(), value);
            true
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|document| document.remove(key).is_some()).await
    }

    async fn multi_remove(&self, keys: &[String]) -> Result<()> {
        self.mutate(|document| {
            let before = document.len();
            for key in keys {
                document.remove(key);
            }
            document.len() != before
        })
        .await
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        self.read(|document| document.keys().cloned().collect()).await
    }
}
