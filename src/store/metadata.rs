//! Chat metadata snapshot.
//!
//! Overwritten wholesale, at most once per debounce interval by the caller.
//! Each write is atomic relative to itself (temp file + rename); no ordering
//! is guaranteed against the history log. Metadata is regenerable, so a
//! missing or corrupt snapshot loads as `None` instead of failing.

use std::path::Path;

use tokio::fs;

use crate::error::StoreError;
use crate::model::ChatMetadata;

pub async fn save_metadata(path: &Path, metadata: &ChatMetadata) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(metadata)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

pub async fn load_metadata(path: &Path) -> Option<ChatMetadata> {
    let content = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(metadata) => Some(metadata),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "metadata snapshot unreadable, regenerating from stream"
            );
            None
        }
    }
}
