//! Resolves category names to folder ids, creating folders on demand.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::library::{self, Folder, FolderId, FolderStore, UNCATEGORIZED};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Category name is empty")]
    EmptyCategory,

    #[error("Folder store error")]
    Store(#[from] library::Error),
}

/// A category name reduced to its leaf segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCategory {
    /// Lower-cased lookup key.
    pub key: String,
    /// Name to use when a folder has to be created.
    pub display_name: String,
}

/// Normalizes a category: hierarchical names keep only their last segment ("Technical/Coding"
/// becomes "Coding"), whitespace is collapsed and the key is compared case-insensitively.
pub fn normalize_category(category: &str) -> Option<NormalizedCategory> {
    let leaf = category
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .next_back()?;
    let display_name = leaf.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(NormalizedCategory {
        key: display_name.to_lowercase(),
        display_name,
    })
}

/// Category → folder cache over a [`FolderStore`].
///
/// Lookups go cache, then store, then create. Within the lifetime of one registry a normalized
/// name is created at most once, and entries are never evicted. The registry is owned by a
/// single organize run and needs `&mut self` to resolve, so it is never shared between runs.
pub struct FolderRegistry {
    store: Arc<dyn FolderStore>,
    cache: HashMap<String, Folder>,
    created: usize,
}

impl FolderRegistry {
    /// Creates a registry with an empty cache.
    pub fn new(store: Arc<dyn FolderStore>) -> Self {
        FolderRegistry {
            store,
            cache: HashMap::new(),
            created: 0,
        }
    }

    /// Creates a registry whose cache is filled from the store's current folders.
    pub async fn seeded(store: Arc<dyn FolderStore>) -> Result<Self, Error> {
        let mut registry = FolderRegistry::new(store);
        registry.refresh().await?;
        Ok(registry)
    }

    /// Adds every folder in the store that the cache does not know yet.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        for folder in self.store.list_all().await? {
            if let Some(normalized) = normalize_category(&folder.display_name) {
                self.cache.entry(normalized.key).or_insert(folder);
            }
        }
        debug!(folders = self.cache.len(), "Folder cache refreshed");
        Ok(())
    }

    /// Returns the folder id for `category`, creating the folder if nothing matches.
    ///
    /// A category that normalizes to the default folder's name resolves to the default folder
    /// and never creates anything.
    #[instrument(skip(self))]
    pub async fn resolve(&mut self, category: &str) -> Result<FolderId, Error> {
        let normalized = normalize_category(category).ok_or(Error::EmptyCategory)?;
        if normalized.key == UNCATEGORIZED {
            return Ok(FolderId::uncategorized());
        }
        if let Some(folder) = self.cache.get(&normalized.key) {
            return Ok(folder.id.clone());
        }

        // Another part of the application may have created it since the cache was seeded.
        self.refresh().await?;
        if let Some(folder) = self.cache.get(&normalized.key) {
            return Ok(folder.id.clone());
        }

        let folder = self.store.create(&normalized.display_name).await?;
        info!(folder = %folder.display_name, id = %folder.id, "Created folder");
        self.created += 1;
        let id = folder.id.clone();
        self.cache.insert(normalized.key, folder);
        Ok(id)
    }

    /// Display names of all cached folders, sorted.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.values().map(|f| f.display_name.clone()).collect();
        names.sort();
        names
    }

    /// Number of folders this registry has created.
    pub fn created_count(&self) -> usize {
        self.created
    }
}
