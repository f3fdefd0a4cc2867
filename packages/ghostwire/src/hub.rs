//! Hub
//!
//! The owned service object behind every connection and HTTP handler. Holds the
//! document store, the connection registry, and the router and notifier built on
//! top of them.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{HubError, StoreError};
use crate::metrics::HubMetrics;
use crate::models::{Document, Profile, ProfileId, SystemLogEntry};
use crate::store::DocumentStore;
use crate::ws::notifier::BroadcastNotifier;
use crate::ws::protocol::parse_profile_id;
use crate::ws::registry::{ConnectionId, ConnectionRegistry, FrameSender};
use crate::ws::router::{MessageRouter, RoutedMessage};

const DATASET_EXTENSION: &str = "json";

pub struct Hub {
    store: Arc<DocumentStore>,
    registry: Arc<ConnectionRegistry>,
    router: MessageRouter,
    notifier: BroadcastNotifier,
    metrics: Arc<HubMetrics>,
    datasets_dir: PathBuf,
}

impl Hub {
    pub fn new(
        store: DocumentStore,
        datasets_dir: impl Into<PathBuf>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            router: MessageRouter::new(store.clone(), registry.clone(), metrics.clone()),
            notifier: BroadcastNotifier::new(store.clone(), registry.clone(), metrics.clone()),
            store,
            registry,
            metrics,
            datasets_dir: datasets_dir.into(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register a new connection; it receives broadcasts from now on.
    pub async fn connect(&self, sender: FrameSender) -> ConnectionId {
        let connection_id = uuid::Uuid::new_v4().to_string();
        self.registry.attach(connection_id.clone(), sender).await;
        debug!(conn_id = %connection_id, "Connection attached");
        connection_id
    }

    /// Forget a closed connection. If it still held an identity, everyone learns
    /// the new connected set.
    pub async fn disconnect(&self, connection_id: &str) {
        if let Some(identity) = self.registry.detach(connection_id).await {
            info!(identity, conn_id = %connection_id, "Identity went offline");
            self.notifier.broadcast_full_state().await;
        }
    }

    /// Bind the connection to the identity named by a raw `profileId` value.
    pub async fn identify(
        &self,
        connection_id: &str,
        raw_identity: &Value,
    ) -> Result<ProfileId, HubError> {
        let identity = parse_profile_id(raw_identity)?;
        if !self.registry.bind(identity, connection_id).await {
            warn!(identity, conn_id = %connection_id, "Identify from a detached connection ignored");
            return Ok(identity);
        }
        info!(identity, conn_id = %connection_id, "Connection identified");
        self.notifier.broadcast_full_state().await;
        Ok(identity)
    }

    // =========================================================================
    // Document operations
    // =========================================================================

    pub async fn get_document(&self) -> Result<Document, HubError> {
        Ok(self.store.read().await?)
    }

    /// Overwrite the whole document and push it to everyone.
    pub async fn replace_document(&self, document: Document) -> Result<(), HubError> {
        self.store.write(&document).await.inspect_err(|e| {
            warn!(error = %e, "Document replace failed");
            self.metrics.store_error();
        })?;
        info!(
            path = %self.store.path().display(),
            profiles = document.profiles.len(),
            messages = document.message_count(),
            "Document replaced"
        );
        self.notifier.broadcast_full_state().await;
        Ok(())
    }

    pub async fn send_message(
        &self,
        from: ProfileId,
        to: ProfileId,
        text: String,
    ) -> Result<RoutedMessage, HubError> {
        Ok(self.router.route(from, to, text).await?)
    }

    /// Append a new citizen profile and return its id.
    pub async fn create_profile(&self, name: &str) -> Result<ProfileId, HubError> {
        let name = name.trim().to_string();
        let id = self
            .store
            .update_if("create_profile", |doc| {
                let id = doc.next_profile_id()?;
                doc.profiles.push(Profile::citizen(id, &name));
                doc.push_system_log(SystemLogEntry::new(
                    "SYSTEM",
                    format!("New analyst account created: {name}"),
                ));
                Some(id)
            })
            .await
            .inspect_err(|_| self.metrics.store_error())?
            .ok_or(HubError::IdSpaceExhausted)?;
        info!(id, "Profile created");
        Ok(id)
    }

    /// Append to a profile's activity log. Returns false for an unknown profile,
    /// in which case nothing is written.
    pub async fn record_activity(
        &self,
        profile_id: ProfileId,
        action: &str,
        details: Value,
    ) -> Result<bool, HubError> {
        let recorded = self
            .store
            .update_if("record_activity", |doc| {
                doc.record_activity(profile_id, action, details).then_some(())
            })
            .await
            .inspect_err(|_| self.metrics.store_error())?;
        if recorded.is_none() {
            debug!(profile_id, "Activity for unknown profile ignored");
        }
        Ok(recorded.is_some())
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// `.json` files available in the datasets directory, sorted by name.
    pub async fn list_datasets(&self) -> Result<Vec<String>, HubError> {
        let mut entries = match tokio::fs::read_dir(&self.datasets_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.datasets_io_error(source)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| self.datasets_io_error(source))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == DATASET_EXTENSION) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Replace the active document with a stored dataset and push it to everyone.
    pub async fn switch_dataset(&self, filename: &str) -> Result<(), HubError> {
        let name = dataset_name(filename)
            .filter(|name| name == filename.trim())
            .filter(|name| has_dataset_extension(name))
            .ok_or_else(|| HubError::InvalidDataset(filename.to_string()))?;
        let path = self.datasets_dir.join(&name);

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HubError::DatasetNotFound(name));
            }
            Err(source) => return Err(StoreError::Persistence { path, source }.into()),
        };
        let document =
            Document::parse(&text).map_err(|source| StoreError::Corrupt { path, source })?;

        self.replace_document(document).await?;
        info!(dataset = %name, "Switched active document");
        Ok(())
    }

    /// Save `data`, or the current document when `data` is `None`, as a dataset.
    /// Returns the file name actually used.
    pub async fn save_dataset(
        &self,
        filename: &str,
        data: Option<Document>,
    ) -> Result<String, HubError> {
        let mut name = dataset_name(filename)
            .ok_or_else(|| HubError::InvalidDataset(filename.to_string()))?;
        if !has_dataset_extension(&name) {
            name = format!("{name}.{DATASET_EXTENSION}");
        }
        let document = match data {
            Some(document) => document,
            None => self.store.read().await?,
        };
        let path = self.datasets_dir.join(&name);
        let bytes = serde_json::to_vec_pretty(&document).map_err(StoreError::Encode)?;

        tokio::fs::create_dir_all(&self.datasets_dir)
            .await
            .map_err(|source| self.datasets_io_error(source))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StoreError::Persistence { path, source })?;
        info!(dataset = %name, "Dataset saved");
        Ok(name)
    }

    fn datasets_io_error(&self, source: std::io::Error) -> HubError {
        StoreError::Persistence {
            path: self.datasets_dir.clone(),
            source,
        }
        .into()
    }
}

/// Final path component of a user-supplied dataset name, if it has a usable one.
fn dataset_name(filename: &str) -> Option<String> {
    let name = Path::new(filename.trim()).file_name()?.to_str()?;
    (!name.starts_with('.')).then(|| name.to_string())
}

fn has_dataset_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == DATASET_EXTENSION)
}
