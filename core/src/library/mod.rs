//! The document library: imported documents, the folders they are filed under, and the
//! store contracts the rest of the crate reads and writes through.
//!
//! # Core Concepts
//!
//! *   **[`Document`]:** An imported file. The classification pipeline only ever changes its
//!     [`FolderId`]; content, name and size belong to whoever imported it.
//! *   **[`Folder`]:** A named grouping unit ("section" in the reader's library view).
//!     Display names are unique ignoring case, see [`crate::registry`].
//! *   **[`DocumentStore`] / [`FolderStore`]:** Persistence contracts. Two implementations
//!     ship with the crate: [`MemoryLibrary`] for tests and embedding, and [`JsonLibrary`],
//!     which keeps the library in a single JSON file next to the user's documents.
//!
//! Every document starts out (and can always fall back to) the [`UNCATEGORIZED`] sentinel
//! folder, which is never stored as a [`Folder`] record.

pub use self::json::JsonLibrary;
pub use self::memory::MemoryLibrary;

mod json;
mod memory;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Folder id shared by every document that has not been filed yet.
pub const UNCATEGORIZED: &str = "uncategorized";

pub const INTERNAL_DIR_NAME: &str = ".zenreader";
pub const LIBRARY_FILENAME: &str = "library.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    /// Builds the id the reader assigns on import: file name and byte size.
    pub fn from_import(filename: &str, size: u64) -> Self {
        DocumentId(format!("{}_{}", filename, size))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        FolderId(id.into())
    }

    pub fn uncategorized() -> Self {
        FolderId(UNCATEGORIZED.to_string())
    }

    pub fn is_uncategorized(&self) -> bool {
        self.0 == UNCATEGORIZED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FolderId {
    fn default() -> Self {
        FolderId::uncategorized()
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An imported document as the library sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    #[serde(default)]
    pub byte_size_estimate: u64,
    #[serde(default)]
    pub folder_id: FolderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_author: Option<String>,
}

impl Document {
    /// Creates an unfiled document with no cached metadata.
    pub fn new(id: impl Into<String>, filename: impl Into<String>, byte_size_estimate: u64) -> Self {
        Document {
            id: DocumentId::new(id),
            filename: filename.into(),
            byte_size_estimate,
            folder_id: FolderId::uncategorized(),
            cached_title: None,
            cached_author: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.cached_title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.cached_author = Some(author.into());
        self
    }

    pub fn in_folder(mut self, folder_id: FolderId) -> Self {
        self.folder_id = folder_id;
        self
    }

    pub fn is_uncategorized(&self) -> bool {
        self.folder_id.is_uncategorized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub display_name: String,
}

/// Read/write contract for the persisted document table.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Document>>;

    /// Moves a document into a folder. Must be atomic per document: readers observe either
    /// the old or the new assignment, never a partial record.
    async fn set_folder(&self, document: &DocumentId, folder: &FolderId) -> Result<()>;

    /// Returns the raw bytes of the document, for text extraction.
    async fn read_content(&self, document: &DocumentId) -> Result<Vec<u8>> {
        Err(Error::ContentUnavailable(document.clone()))
    }
}

/// Read/create contract for the persisted folder table. Folders are never renamed or
/// deleted through this interface.
#[async_trait]
pub trait FolderStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Folder>>;

    /// Creates a folder with the given display name. Id assignment is up to the store.
    async fn create(&self, name: &str) -> Result<Folder>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("No content available for document: {0}")]
    ContentUnavailable(DocumentId),

    #[error("Folder name cannot be empty")]
    EmptyFolderName,

    #[error("Library file is missing or invalid: {0}")]
    InvalidLibraryFile(PathBuf),

    #[error("Cannot create library: already exists at {0}")]
    LibraryExists(PathBuf),

    #[error("Library serialization/deserialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
