//! Error types for skiff-core.
//!
//! Domain-specific error enums using thiserror. The dispatcher itself never
//! fails — malformed input degrades per message — so errors here belong to
//! the persistence engine, where disk I/O and serialization can go wrong.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
