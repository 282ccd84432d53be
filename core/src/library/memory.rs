use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{Document, DocumentId, DocumentStore, Error, Folder, FolderId, FolderStore, Result};

/// A library held entirely in memory.
///
/// Implements both store contracts, so one instance can be handed to the organizer as
/// document store and folder store at once.
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    documents: Mutex<Vec<Document>>,
    folders: Mutex<Vec<Folder>>,
    contents: Mutex<HashMap<DocumentId, Vec<u8>>>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        MemoryLibrary {
            documents: Mutex::new(documents.into_iter().collect()),
            ..Default::default()
        }
    }

    pub async fn add_document(&self, document: Document) {
        self.documents.lock().await.push(document);
    }

    /// Attaches raw bytes to a document so that [`DocumentStore::read_content`] can serve them.
    pub async fn set_content(&self, document: &DocumentId, bytes: Vec<u8>) {
        self.contents.lock().await.insert(document.clone(), bytes);
    }

    /// Inserts a folder record as if it had been created elsewhere.
    pub async fn add_folder(&self, folder: Folder) {
        self.folders.lock().await.push(folder);
    }

    pub async fn document(&self, id: &DocumentId) -> Option<Document> {
        self.documents.lock().await.iter().find(|d| &d.id == id).cloned()
    }

    pub async fn folder_named(&self, name: &str) -> Option<Folder> {
        self.folders
            .lock()
            .await
            .iter()
            .find(|f| f.display_name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryLibrary {
    async fn list_all(&self) -> Result<Vec<Document>> {
        Ok(self.documents.lock().await.clone())
    }

    async fn set_folder(&self, document: &DocumentId, folder: &FolderId) -> Result<()> {
        let mut documents = self.documents.lock().await;
        let doc = documents
            .iter_mut()
            .find(|d| &d.id == document)
            .ok_or_else(|| Error::DocumentNotFound(document.clone()))?;
        debug!(document = %document, from = %doc.folder_id, to = %folder, "Updating folder assignment");
        doc.folder_id = folder.clone();
        Ok(())
    }

    async fn read_content(&self, document: &DocumentId) -> Result<Vec<u8>> {
        self.contents
            .lock()
            .await
            .get(document)
            .cloned()
            .ok_or_else(|| Error::ContentUnavailable(document.clone()))
    }
}

#[async_trait]
impl FolderStore for MemoryLibrary {
    async fn list_all(&self) -> Result<Vec<Folder>> {
        Ok(self.folders.lock().await.clone())
    }

    async fn create(&self, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::EmptyFolderName);
        }
        let folder = Folder {
            id: FolderId::new(Uuid::new_v4().to_string()),
            display_name: name.to_string(),
        };
        self.folders.lock().await.push(folder.clone());
        Ok(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_folder_updates_only_the_target() {
        let library = MemoryLibrary::with_documents([
            Document::new("a", "a.pdf", 1),
            Document::new("b", "b.pdf", 2),
        ]);
        let folder = FolderStore::create(&library, "Finance").await.unwrap();
        library.set_folder(&DocumentId::new("a"), &folder.id).await.unwrap();

        let a = library.document(&DocumentId::new("a")).await.unwrap();
        let b = library.document(&DocumentId::new("b")).await.unwrap();
        assert_eq!(a.folder_id, folder.id);
        assert!(b.is_uncategorized());
    }

    #[tokio::test]
    async fn set_folder_on_unknown_document_fails() {
        let library = MemoryLibrary::new();
        let result = library.set_folder(&DocumentId::new("missing"), &FolderId::uncategorized()).await;
        assert!(matches!(result, Err(Error::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn create_rejects_blank_names() {
        let library = MemoryLibrary::new();
        assert!(matches!(FolderStore::create(&library, "  ").await, Err(Error::EmptyFolderName)));
    }

    #[tokio::test]
    async fn content_is_unavailable_unless_set() {
        let library = MemoryLibrary::with_documents([Document::new("a", "a.pdf", 1)]);
        let id = DocumentId::new("a");
        assert!(matches!(library.read_content(&id).await, Err(Error::ContentUnavailable(_))));
        library.set_content(&id, b"%PDF".to_vec()).await;
        assert_eq!(library.read_content(&id).await.unwrap(), b"%PDF".to_vec());
    }
}
