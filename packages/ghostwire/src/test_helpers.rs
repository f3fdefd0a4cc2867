use std::time::Duration;

use crate::AppState;
use crate::config::{FileConfig, HubPaths, ServerConfig};

/// Build a fully-wired `AppState` rooted in a fresh temp directory.
///
/// Returns `(AppState, TempDir)`; callers **must** hold the `TempDir` for
/// the lifetime of the test so the document and datasets stay on disk.
pub async fn test_app_state() -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut server_config = ServerConfig::from_file(&FileConfig::default());
    server_config.store.lock_timeout = Some(Duration::from_secs(5));
    let paths = HubPaths::new(tmp.path().to_path_buf(), &server_config.store.database_file)
        .expect("paths");

    (AppState::new(server_config, &paths), tmp)
}
