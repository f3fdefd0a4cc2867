//! Document Store
//!
//! Exclusive-access wrapper around the JSON document on disk. A single async mutex
//! (the "section") serializes every store operation, reads included, so no caller
//! ever observes a half-written document. The document is canonical only on disk:
//! every operation re-loads it, and every mutation persists it in full before the
//! section is released.
//!
//! Waiters queue FIFO on the mutex; there is no other fairness policy. Acquisition
//! is bounded by `lock_timeout` when one is configured.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::Document;

pub struct DocumentStore {
    path: PathBuf,
    section: Mutex<()>,
    lock_timeout: Option<Duration>,
}

/// Held for the lifetime of one store operation. Releasing is logged on drop so the
/// release shows up on every exit path, error paths included.
struct SectionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    operation: &'static str,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        debug!(operation = self.operation, "Store lock released");
    }
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            section: Mutex::new(()),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a consistent snapshot of the document.
    pub async fn read(&self) -> Result<Document, StoreError> {
        let _section = self.acquire("read").await?;
        self.load().await
    }

    /// Overwrite the stored document wholesale.
    pub async fn write(&self, document: &Document) -> Result<(), StoreError> {
        let _section = self.acquire("write").await?;
        self.persist(document).await
    }

    /// Read-modify-write in one uninterrupted hold of the section.
    pub async fn update<T, F>(&self, operation: &'static str, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Document) -> T,
    {
        let _section = self.acquire(operation).await?;
        let mut document = self.load().await?;
        let value = mutate(&mut document);
        self.persist(&document).await?;
        Ok(value)
    }

    /// Like [`update`](Self::update), but the closure may decline by returning
    /// `None`, in which case nothing is written and the in-memory change is dropped.
    pub async fn update_if<T, F>(
        &self,
        operation: &'static str,
        mutate: F,
    ) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(&mut Document) -> Option<T>,
    {
        let _section = self.acquire(operation).await?;
        let mut document = self.load().await?;
        match mutate(&mut document) {
            Some(value) => {
                self.persist(&document).await?;
                Ok(Some(value))
            }
            None => {
                debug!(operation, "Store update declined, nothing written");
                Ok(None)
            }
        }
    }

    async fn acquire(&self, operation: &'static str) -> Result<SectionGuard<'_>, StoreError> {
        debug!(operation, "Store lock requested");
        let guard = match self.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, self.section.lock())
                .await
                .map_err(|_| {
                    warn!(operation, ?limit, "Timed out waiting for store lock");
                    StoreError::LockTimeout {
                        operation,
                        waited: limit,
                    }
                })?,
            None => self.section.lock().await,
        };
        debug!(operation, "Store lock acquired");
        Ok(SectionGuard {
            _guard: guard,
            operation,
        })
    }

    /// Caller must hold the section.
    async fn load(&self) -> Result<Document, StoreError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No document on disk, starting empty");
                return Ok(Document::default());
            }
            Err(source) => {
                return Err(StoreError::Persistence {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Document::parse(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Caller must hold the section. Writes a sibling temp file and renames it over
    /// the document so the file on disk is always complete.
    async fn persist(&self, document: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(StoreError::Encode)?;
        let tmp_path = self.path.with_extension("partial");
        let io_err = |source| StoreError::Persistence {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp_path, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(io_err)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Document persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ChatRecord, Profile};
    use std::sync::Arc;

    fn temp_store() -> (DocumentStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(
            tmp.path().join("database.json"),
            Some(Duration::from_secs(5)),
        );
        (store, tmp)
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let (store, _tmp) = temp_store();
        let doc = store.read().await.unwrap();
        assert_eq!(doc, Document::default());
        // Reading must not create the file
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let (store, _tmp) = temp_store();
        std::fs::write(store.path(), "{ definitely not json").unwrap();

        let err = store.read().await.unwrap_err();
        assert!(err.is_corrupt());

        // Updates fail too and leave the file untouched
        let err = store
            .update("append", |doc| doc.append_message(ChatMessage::new(1, 2, "x")))
            .await
            .unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "{ definitely not json"
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, _tmp) = temp_store();
        let mut doc = Document::default();
        doc.profiles.push(Profile::citizen(1, "ada"));
        doc.append_message(ChatMessage::new(1, 0, "hello"));

        store.write(&doc).await.unwrap();
        assert_eq!(store.read().await.unwrap(), doc);

        // Pretty-printed on disk, no temp file left behind
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\n  \"profiles\""));
        assert!(!store.path().with_extension("partial").exists());
    }

    #[tokio::test]
    async fn test_legacy_array_document_is_normalized() {
        let (store, _tmp) = temp_store();
        std::fs::write(store.path(), r#"[{"id":1,"name":"ada"}]"#).unwrap();
        let doc = store.read().await.unwrap();
        assert_eq!(doc.profiles.len(), 1);
        assert!(doc.chats.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_and_returns_value() {
        let (store, _tmp) = temp_store();
        let id = store
            .update("create_profile", |doc| {
                let id = doc.next_profile_id().unwrap();
                doc.profiles.push(Profile::citizen(id, "neo"));
                id
            })
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.read().await.unwrap().profiles[0].id(), Some(1));
    }

    #[tokio::test]
    async fn test_declined_update_writes_nothing() {
        let (store, _tmp) = temp_store();
        let result: Option<()> = store
            .update_if("noop", |doc| {
                doc.profiles.push(Profile::citizen(1, "ghost"));
                None
            })
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path().join("missing/database.json"), None);

        let err = store
            .update("append", |doc| doc.append_message(ChatMessage::new(1, 2, "x")))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "persistence_failure");
        // The attempted change is gone: the next read still sees the empty document
        assert_eq!(store.read().await.unwrap(), Document::default());
    }

    #[tokio::test]
    async fn test_unreadable_path_is_persistence_failure() {
        let tmp = tempfile::tempdir().unwrap();
        // A directory where the document should be
        let store = DocumentStore::new(tmp.path(), None);
        let err = store.read().await.unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let (store, _tmp) = temp_store();
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..64u64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                // Half the writers in each direction of the same conversation
                let (from, to) = if i % 2 == 0 { (5, 7) } else { (7, 5) };
                store
                    .update("append", move |doc| {
                        doc.append_message(ChatMessage::new(from, to, format!("msg {i}")))
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let doc = store.read().await.unwrap();
        assert_eq!(doc.chats.len(), 1);
        let convo = &doc.chats["5--7"];
        assert_eq!(convo.len(), 64);
        let mut texts: Vec<_> = convo
            .iter()
            .filter_map(ChatRecord::as_message)
            .map(|m| m.text.clone())
            .collect();
        texts.sort();
        texts.dedup();
        assert_eq!(texts.len(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_wait_is_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(
            tmp.path().join("database.json"),
            Some(Duration::from_millis(50)),
        ));

        // Hold the section with a slow mutation
        let holder = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update("slow", |_doc| std::thread::sleep(Duration::from_millis(400)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = store.read().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::LockTimeout {
                operation: "read",
                ..
            }
        ));
        assert_eq!(err.error_code(), "persistence_failure");

        holder.await.unwrap().unwrap();
        // Once released the store is usable again
        store.read().await.unwrap();
    }
}
