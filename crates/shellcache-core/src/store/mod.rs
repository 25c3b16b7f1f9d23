//! Versioned response store.
//!
//! This module provides the `VersionedStore`, which owns every cache
//! generation. A generation is named after a release (`moneyplan01-v1.0.0`),
//! so shipping a new version starts a fresh generation and the activation
//! step deletes all others without any per-key invalidation.
//!
//! Generations live in memory and, when the store is opened on a directory,
//! are mirrored to one JSON file each.

mod generation;
mod persist;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{PopulateError, StoreError};
use crate::http::{Fetcher, Request};

pub use generation::{Generation, StoredResponse};

pub struct VersionedStore {
    generations: RwLock<BTreeMap<String, Arc<Generation>>>,
    dir: Option<PathBuf>,
}

impl VersionedStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            generations: RwLock::new(BTreeMap::new()),
            dir: None,
        }
    }

    /// A store persisted under `dir`, restoring any generations saved there.
    pub fn open_dir(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Io(dir.display().to_string(), e))?;

        let mut generations = BTreeMap::new();
        for ((name, entries), path) in persist::load_dir(dir)? {
            debug!(generation = %name, entries = entries.len(), "Restored generation");
            let generation = Generation::with_entries(&name, Some(path), entries);
            generations.insert(name, Arc::new(generation));
        }

        Ok(Self {
            generations: RwLock::new(generations),
            dir: Some(dir.to_path_buf()),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Return the generation called `name`, creating it if absent.
    ///
    /// Opening the same name twice yields the same generation.
    pub fn open(&self, name: &str) -> Arc<Generation> {
        if let Some(existing) = self.generation(name) {
            return existing;
        }

        let mut generations = self
            .generations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it between the two locks
        generations
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(generation = name, "Creating generation");
                let file = self.dir.as_deref().map(|d| persist::file_path(d, name));
                Arc::new(Generation::new(name, file))
            })
            .clone()
    }

    pub fn generation(&self, name: &str) -> Option<Arc<Generation>> {
        self.generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All generation names, in name order.
    pub fn generation_names(&self) -> Vec<String> {
        self.generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn delete_generation(&self, name: &str) -> Result<bool, StoreError> {
        let removed = self
            .generations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        match removed {
            Some(generation) => {
                generation.mark_deleted()?;
                info!(generation = name, "Deleted generation");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every generation except `current`, returning the deleted names.
    pub fn delete_generations_except(&self, current: &str) -> Result<Vec<String>, StoreError> {
        let stale: Vec<String> = self
            .generation_names()
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let mut deleted = Vec::with_capacity(stale.len());
        let mut first_error = None;
        for name in stale {
            match self.delete_generation(&name) {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => {
                    warn!(generation = %name, error = %e, "Failed to delete stale generation");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// Delete every generation. Returns how many were removed.
    pub fn purge_all(&self) -> Result<usize, StoreError> {
        let deleted = self.delete_generations_except("")?;
        // The empty name cannot be a generation created through `open` with
        // a real config, but handle it anyway
        let extra = usize::from(self.delete_generation("")?);
        Ok(deleted.len() + extra)
    }

    /// Persist every generation.
    pub fn flush(&self) -> Result<(), StoreError> {
        let generations: Vec<Arc<Generation>> = self
            .generations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for generation in generations {
            generation.save()?;
        }
        Ok(())
    }

    /// Fetch every seed request and store the results in `generation`.
    ///
    /// Keys are fetched concurrently and fail independently: one bad key
    /// never stops the others from being stored. If any key failed the
    /// whole population is reported as failed so the caller can retry.
    pub async fn populate(
        &self,
        generation: &Generation,
        seeds: &[Request],
        fetcher: &dyn Fetcher,
    ) -> Result<usize, PopulateError> {
        let results = join_all(seeds.iter().map(|request| async move {
            let outcome = match fetcher.fetch(request).await {
                Ok(response) => generation
                    .insert(request.key(), response)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            (request, outcome)
        }))
        .await;

        let mut failures = Vec::new();
        for (request, outcome) in results {
            if let Err(reason) = outcome {
                warn!(request = %request, reason = %reason, "Seed key failed to populate");
                failures.push((request.url().to_string(), reason));
            }
        }

        if let Err(e) = generation.save() {
            failures.push((generation.name().to_string(), e.to_string()));
        }

        let stored = seeds.len().saturating_sub(failures.len());
        if failures.is_empty() {
            info!(generation = generation.name(), stored, "Generation populated");
            Ok(stored)
        } else {
            Err(PopulateError {
                generation: generation.name().to_string(),
                attempted: seeds.len(),
                failures,
            })
        }
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
