//! On-disk layout: one JSON file per generation, `<dir>/<name>.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::http::RequestKey;

use super::StoredResponse;

#[derive(Serialize)]
struct GenerationFileRef<'a> {
    name: &'a str,
    saved_at: DateTime<Utc>,
    entries: Vec<EntryRef<'a>>,
}

#[derive(Serialize)]
struct EntryRef<'a> {
    key: &'a RequestKey,
    response: &'a StoredResponse,
}

#[derive(Deserialize)]
struct GenerationFile {
    name: String,
    entries: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    key: RequestKey,
    response: StoredResponse,
}

pub(crate) type LoadedGeneration = (String, BTreeMap<RequestKey, Arc<StoredResponse>>);

/// Characters kept as-is in a generation's file name
fn is_file_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// File name for a generation.
///
/// Names made only of `[A-Za-z0-9._-]` map to `<name>.json`. Any other
/// character becomes `_` and a short digest of the raw name is appended,
/// so distinct names never share a file.
pub(crate) fn file_path(dir: &Path, name: &str) -> PathBuf {
    if name.chars().all(is_file_safe) {
        return dir.join(format!("{}.json", name));
    }

    let safe: String = name
        .chars()
        .map(|c| if is_file_safe(c) { c } else { '_' })
        .collect();
    let digest = Sha256::digest(name.as_bytes());
    dir.join(format!("{}-{}.json", safe, hex::encode(&digest[..4])))
}

pub(crate) fn encode(
    name: &str,
    entries: &BTreeMap<RequestKey, Arc<StoredResponse>>,
) -> Result<Vec<u8>, StoreError> {
    let file = GenerationFileRef {
        name,
        saved_at: Utc::now(),
        entries: entries
            .iter()
            .map(|(key, response)| EntryRef {
                key,
                response: response.as_ref(),
            })
            .collect(),
    };
    serde_json::to_vec(&file).map_err(|e| StoreError::Serialize(name.to_string(), e))
}

/// Write through a temp file so a crash never leaves a torn generation.
pub(crate) fn write_atomic(name: &str, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents).map_err(|e| StoreError::Io(name.to_string(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(name.to_string(), e))?;
    debug!(generation = name, bytes = contents.len(), "Generation saved");
    Ok(())
}

pub(crate) fn remove(name: &str, path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(name.to_string(), e)),
    }
}

/// Read every generation file in `dir`. Unreadable files are logged and
/// skipped rather than failing the whole store.
pub(crate) fn load_dir(dir: &Path) -> Result<Vec<(LoadedGeneration, PathBuf)>, StoreError> {
    let read_dir =
        std::fs::read_dir(dir).map_err(|e| StoreError::Io(dir.display().to_string(), e))?;

    let mut loaded = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load_file(&path) {
            Ok(generation) => loaded.push((generation, path)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable generation file");
            }
        }
    }
    Ok(loaded)
}

fn load_file(path: &Path) -> anyhow::Result<LoadedGeneration> {
    use anyhow::Context;

    let contents = std::fs::read(path)
        .with_context(|| format!("Failed to read generation file: {}", path.display()))?;
    let file: GenerationFile = serde_json::from_slice(&contents)
        .with_context(|| format!("Failed to parse generation file: {}", path.display()))?;

    let entries = file
        .entries
        .into_iter()
        .map(|entry| (entry.key, Arc::new(entry.response)))
        .collect();
    Ok((file.name, entries))
}
