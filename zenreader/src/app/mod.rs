use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use zenreader_core::confirm::{Confirmer, Intent};
use zenreader_core::library::{
    Document, DocumentStore, Folder, FolderId, FolderStore, INTERNAL_DIR_NAME, JsonLibrary, LIBRARY_FILENAME,
};
use zenreader_core::organize::{OrganizeReport, Organizer};
use zenreader_extensions::gemini::{GeminiClassifier, GeminiConfig};
use zenreader_extensions::openlibrary::OpenLibraryClient;
use zenreader_extensions::pdf::PdfTextExtractor;

use crate::config::Config;

mod progress;
pub use progress::ProgressRenderer;

/// What to organize and with which collaborators.
#[derive(Debug, Default)]
pub struct OrganizeRequest {
    pub all: bool,
    pub use_ai: bool,
    pub use_subjects: bool,
    pub cooldown_secs: Option<u64>,
    pub retry_limit: Option<u32>,
    pub api_key: Option<String>,
}

pub struct ZenReader {
    pub library: Arc<JsonLibrary>,
    pub config: Config,
}

impl ZenReader {
    pub async fn open(root: &Path) -> Result<Self> {
        let library = JsonLibrary::open(root)
            .await
            .with_context(|| format!("Failed to open library at {}", root.display()))?;
        let config = Config::load(root).await?;
        Ok(ZenReader {
            library: Arc::new(library),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        self.library.root()
    }

    /// Imports the given files. Directories contribute the PDF files directly inside them.
    pub async fn import(&self, paths: &[PathBuf]) -> Result<Vec<Document>> {
        let mut imported = Vec::new();
        for path in paths {
            if tokio::fs::metadata(path).await?.is_dir() {
                for file in pdf_files_in(path).await? {
                    imported.push(self.library.import(&file).await?);
                }
            } else {
                imported.push(self.library.import(path).await?);
            }
        }
        info!(count = imported.len(), "Imported documents");
        Ok(imported)
    }

    /// Builds an organizer from the library configuration and the request's overrides.
    pub fn organizer(&self, request: &OrganizeRequest) -> Result<Organizer> {
        let mut options = self.config.organize.clone();
        if let Some(secs) = request.cooldown_secs {
            options.cooldown_secs = secs;
        }
        if let Some(limit) = request.retry_limit {
            options.quota_retry_limit = limit;
        }
        // Re-organizing everything must look at filed documents too.
        if request.all {
            options.skip_assigned = false;
        }

        let mut organizer = Organizer::new(self.library.clone(), self.library.clone())
            .with_heuristics(self.config.heuristics()?)
            .with_text_extractor(Arc::new(PdfTextExtractor::new()))
            .with_options(options);

        if request.use_ai {
            match request.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
                Some(key) => organizer = organizer.with_classifier(Arc::new(self.gemini_classifier(key)?)),
                None => warn!("GEMINI_API_KEY is not set; unmatched documents stay uncategorized"),
            }
        }
        if request.use_subjects && self.config.subjects.enabled {
            organizer = organizer.with_subject_lookup(Arc::new(OpenLibraryClient::new()?));
        }
        Ok(organizer)
    }

    fn gemini_classifier(&self, api_key: &str) -> Result<GeminiClassifier> {
        let settings = &self.config.gemini;
        let mut config = GeminiConfig::new(api_key)?.timeout(settings.timeout());
        if let Some(base_url) = &settings.base_url {
            config = config.base_url(base_url)?;
        }
        Ok(GeminiClassifier::with_config(config, None)?.model(settings.model.clone()))
    }

    /// The documents an organize run should look at. Asks before re-organizing everything.
    pub async fn documents_to_organize(
        &self,
        organizer: &Organizer,
        all: bool,
        confirmer: &dyn Confirmer,
    ) -> Result<Option<Vec<Document>>> {
        if !all {
            return Ok(Some(organizer.pending_documents().await?));
        }
        let documents = DocumentStore::list_all(&*self.library).await?;
        let intent = Intent::ReorganizeAll {
            document_count: documents.len(),
        };
        if !confirmer.confirm(&intent).await? {
            return Ok(None);
        }
        Ok(Some(documents))
    }

    /// Runs the organizer over `documents`, rendering progress until the run ends.
    /// Ctrl-C requests cancellation.
    pub async fn organize(
        &self,
        organizer: &Organizer,
        documents: Vec<Document>,
        renderer: ProgressRenderer,
    ) -> Result<OrganizeReport> {
        let _listeners = renderer.listen(organizer.events());
        let handle = organizer.start(documents)?;

        let token = handle.cancellation_token();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing the current document");
                token.cancel();
            }
        });

        renderer.follow(handle.updates()).await;
        let report = handle.wait().await;
        ctrl_c.abort();
        Ok(report?)
    }

    pub async fn reset(&self, confirmer: &dyn Confirmer) -> Result<Option<usize>> {
        let documents = DocumentStore::list_all(&*self.library).await?;
        let filed = documents.iter().filter(|d| !d.is_uncategorized()).count();
        if filed == 0 {
            return Ok(Some(0));
        }
        let intent = Intent::ResetAssignments { document_count: filed };
        if !confirmer.confirm(&intent).await? {
            return Ok(None);
        }
        Ok(Some(self.library.reset_assignments().await?))
    }

    /// Documents paired with the display name of their folder, sorted by filename.
    pub async fn documents_with_folders(&self) -> Result<Vec<(Document, String)>> {
        let names = self.folder_names().await?;
        let mut documents = DocumentStore::list_all(&*self.library).await?;
        documents.sort_by(|a, b| a.filename.to_lowercase().cmp(&b.filename.to_lowercase()));
        Ok(documents
            .into_iter()
            .map(|d| {
                let name = folder_label(&names, &d.folder_id);
                (d, name)
            })
            .collect())
    }

    /// Folders with the number of documents in each, sorted by name. Uncategorized comes first.
    pub async fn folder_counts(&self) -> Result<Vec<(String, usize)>> {
        let folders = FolderStore::list_all(&*self.library).await?;
        let documents = DocumentStore::list_all(&*self.library).await?;
        let mut counts: HashMap<&FolderId, usize> = HashMap::new();
        for document in &documents {
            *counts.entry(&document.folder_id).or_default() += 1;
        }

        let uncategorized = FolderId::uncategorized();
        let mut rows: Vec<(String, usize)> = folders
            .iter()
            .map(|f: &Folder| (f.display_name.clone(), counts.get(&f.id).copied().unwrap_or(0)))
            .collect();
        rows.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
        rows.insert(0, ("Uncategorized".to_string(), counts.get(&uncategorized).copied().unwrap_or(0)));
        Ok(rows)
    }

    async fn folder_names(&self) -> Result<HashMap<FolderId, String>> {
        let folders = FolderStore::list_all(&*self.library).await?;
        Ok(folders.into_iter().map(|f| (f.id, f.display_name)).collect())
    }
}

fn folder_label(names: &HashMap<FolderId, String>, id: &FolderId) -> String {
    if id.is_uncategorized() {
        return "Uncategorized".to_string();
    }
    names.get(id).cloned().unwrap_or_else(|| format!("<missing folder {}>", id))
}

async fn pdf_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    debug!(dir = %dir.display(), count = files.len(), "Found PDF files");
    Ok(files)
}

/// Finds the library to use: `explicit` if given, otherwise the nearest directory at or above
/// the current one that contains a library file.
pub fn locate_library(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    for dir in cwd.ancestors() {
        if dir.join(INTERNAL_DIR_NAME).join(LIBRARY_FILENAME).is_file() {
            return Ok(dir.to_path_buf());
        }
    }
    bail!("No library found in {} or its parents (run `zenreader init`)", cwd.display())
}
