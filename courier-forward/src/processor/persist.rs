//! Status snapshot on disk
//!
//! The snapshot is a bincode-encoded list of status records, written to a
//! temporary file and renamed over the previous one.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::StateError,
    resource::ResourceSetId,
    status::{StatusStore, record::ResourceSetStatus},
};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<(ResourceSetId, ResourceSetStatus)>,
}

/// Write every tracked record of `store` to `path`.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub async fn save(path: &Path, store: &StatusStore) -> Result<usize, StateError> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        records: store.snapshot().await,
    };

    let encoded = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, encoded).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), records = snapshot.records.len(), "Saved status snapshot");
    Ok(snapshot.records.len())
}

/// Read the records saved at `path`. A missing file is an empty snapshot.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub async fn load(path: &Path) -> Result<Vec<(ResourceSetId, ResourceSetStatus)>, StateError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let (snapshot, _): (Snapshot, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StateError::Version(snapshot.version));
    }

    Ok(snapshot.records)
}
