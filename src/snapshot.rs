//! JSON snapshot persistence for the vector index and document registry.
//!
//! The snapshot is a single JSON file: index dimensionality, every stored
//! record (vector packed little-endian and base64-encoded to keep the file
//! compact), and the document registry. Saving writes to a temp file in
//! the same directory and renames over the target so a crash mid-write
//! never leaves a truncated snapshot.

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::info;

use docchat_core::embedding::{blob_to_vec, vec_to_blob};
use docchat_core::{DocumentInfo, RagEngine, VectorRecord};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    vector_b64: String,
    chunk: docchat_core::Chunk,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    dims: usize,
    records: Vec<SnapshotRecord>,
    documents: Vec<DocumentInfo>,
}

/// Persist the engine's index and document registry to `path`.
pub fn save(path: &Path, engine: &RagEngine) -> Result<()> {
    let records = engine.index().snapshot();
    let snapshot = Snapshot {
        dims: engine.index().dims().unwrap_or(0),
        records: records
            .into_iter()
            .map(|r| SnapshotRecord {
                vector_b64: BASE64.encode(vec_to_blob(&r.vector)),
                chunk: r.chunk,
            })
            .collect(),
        documents: engine.documents(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_string(&snapshot).context("Failed to serialize snapshot")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;

    info!(path = %path.display(), records = snapshot.records.len(), "saved index snapshot");
    Ok(())
}

/// Load a snapshot from `path`. Returns the stored vector records and the
/// document registry, ready for [`RagEngine::import_snapshot`].
pub fn load(path: &Path) -> Result<(Vec<VectorRecord>, Vec<DocumentInfo>)> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let snapshot: Snapshot =
        serde_json::from_str(&json).context("Failed to parse snapshot file")?;

    let mut records = Vec::with_capacity(snapshot.records.len());
    for record in snapshot.records {
        let blob = BASE64
            .decode(&record.vector_b64)
            .context("Snapshot contains invalid base64 vector data")?;
        let vector = blob_to_vec(&blob);
        if snapshot.dims != 0 && vector.len() != snapshot.dims {
            anyhow::bail!(
                "Snapshot record for chunk {} has {} dims, header says {}",
                record.chunk.id,
                vector.len(),
                snapshot.dims
            );
        }
        records.push(VectorRecord {
            vector,
            chunk: record.chunk,
        });
    }

    info!(path = %path.display(), records = records.len(), "loaded index snapshot");
    Ok((records, snapshot.documents))
}
