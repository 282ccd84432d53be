use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::crate_version;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    Document, DocumentId, DocumentStore, Error, Folder, FolderId, FolderStore, Result,
    INTERNAL_DIR_NAME, LIBRARY_FILENAME,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryFile {
    zenreader_version: String,
    #[serde(default)]
    documents: Vec<DocumentRecord>,
    #[serde(default)]
    folders: Vec<Folder>,
}

impl LibraryFile {
    fn new() -> Self {
        LibraryFile {
            zenreader_version: crate_version!().to_string(),
            documents: Vec::new(),
            folders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentRecord {
    #[serde(flatten)]
    document: Document,
    // Absolute path of the imported file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
}

/// A library persisted as a single JSON file under `<root>/.zenreader/library.json`.
///
/// The whole table is kept in memory and written through on every change. Writes go to a
/// temporary file that is then renamed over the old one, so a crash mid-write leaves the
/// previous state intact.
#[derive(Debug)]
pub struct JsonLibrary {
    root: PathBuf,
    file_path: PathBuf,
    state: Mutex<LibraryFile>,
}

impl JsonLibrary {
    /// Creates a new, empty library in `root`.
    ///
    /// Fails with [`Error::LibraryExists`] if the directory already holds a library file.
    #[instrument(fields(root = %root.display()))]
    pub async fn create(root: &Path) -> Result<Self> {
        let internal_dir = root.join(INTERNAL_DIR_NAME);
        let file_path = internal_dir.join(LIBRARY_FILENAME);
        if fs::try_exists(&file_path).await? {
            return Err(Error::LibraryExists(root.to_path_buf()));
        }
        fs::create_dir_all(&internal_dir).await?;

        let library = JsonLibrary {
            root: root.to_path_buf(),
            file_path,
            state: Mutex::new(LibraryFile::new()),
        };
        let state = library.state.lock().await.clone();
        library.persist(&state).await?;
        debug!("Library created");
        Ok(library)
    }

    /// Opens the library stored in `root`.
    #[instrument(fields(root = %root.display()))]
    pub async fn open(root: &Path) -> Result<Self> {
        let file_path = root.join(INTERNAL_DIR_NAME).join(LIBRARY_FILENAME);
        let text = match fs::read_to_string(&file_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::InvalidLibraryFile(file_path));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let state: LibraryFile = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, path = %file_path.display(), "Failed to parse library file");
            Error::InvalidLibraryFile(file_path.clone())
        })?;
        debug!(
            documents = state.documents.len(),
            folders = state.folders.len(),
            version = %state.zenreader_version,
            "Library opened"
        );
        Ok(JsonLibrary {
            root: root.to_path_buf(),
            file_path,
            state: Mutex::new(state),
        })
    }

    /// Returns the directory the library lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds a file to the library.
    ///
    /// Re-importing a file with the same name and size refreshes its source path but keeps
    /// its current folder assignment.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn import(&self, path: &Path) -> Result<Document> {
        let meta = fs::metadata(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a valid file name: {}", path.display()),
            )))?
            .to_string();
        let source = fs::canonicalize(path).await?;
        let id = DocumentId::from_import(&filename, meta.len());

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let document = match next.documents.iter_mut().find(|r| r.document.id == id) {
            Some(existing) => {
                debug!(document = %id, "Document already in library, keeping its folder");
                existing.source = Some(source);
                existing.document.clone()
            }
            None => {
                let document = Document::new(id.as_str(), filename, meta.len());
                next.documents.push(DocumentRecord {
                    document: document.clone(),
                    source: Some(source),
                });
                document
            }
        };
        self.persist(&next).await?;
        *state = next;
        Ok(document)
    }

    /// Moves every document back to the default folder. Returns the number of documents
    /// that were moved.
    pub async fn reset_assignments(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let mut moved = 0;
        for record in next.documents.iter_mut() {
            if !record.document.is_uncategorized() {
                record.document.folder_id = FolderId::uncategorized();
                moved += 1;
            }
        }
        if moved > 0 {
            self.persist(&next).await?;
            *state = next;
        }
        Ok(moved)
    }

    async fn persist(&self, state: &LibraryFile) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.file_path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonLibrary {
    async fn list_all(&self) -> Result<Vec<Document>> {
        let state = self.state.lock().await;
        Ok(state.documents.iter().map(|r| r.document.clone()).collect())
    }

    #[instrument(skip(self))]
    async fn set_folder(&self, document: &DocumentId, folder: &FolderId) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let record = next
            .documents
            .iter_mut()
            .find(|r| &r.document.id == document)
            .ok_or_else(|| Error::DocumentNotFound(document.clone()))?;
        record.document.folder_id = folder.clone();
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn read_content(&self, document: &DocumentId) -> Result<Vec<u8>> {
        let source = {
            let state = self.state.lock().await;
            let record = state
                .documents
                .iter()
                .find(|r| &r.document.id == document)
                .ok_or_else(|| Error::DocumentNotFound(document.clone()))?;
            record.source.clone()
        };
        match source {
            Some(path) => Ok(fs::read(path).await?),
            None => Err(Error::ContentUnavailable(document.clone())),
        }
    }
}

#[async_trait]
impl FolderStore for JsonLibrary {
    async fn list_all(&self) -> Result<Vec<Folder>> {
        Ok(self.state.lock().await.folders.clone())
    }

    #[instrument(skip(self))]
    async fn create(&self, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::EmptyFolderName);
        }
        let folder = Folder {
            id: FolderId::new(Uuid::new_v4().to_string()),
            display_name: name.to_string(),
        };

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.folders.push(folder.clone());
        self.persist(&next).await?;
        *state = next;
        debug!(folder_id = %folder.id, "Folder created");
        Ok(folder)
    }
}
