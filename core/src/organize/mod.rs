//! The organize pipeline: files every document of a batch into a folder.
//!
//! An [`Organizer`] holds the collaborators (stores, classifiers, extractor) and starts runs.
//! Each run is a single spawned task that walks a FIFO queue of documents:
//!
//! 1.  The status is updated with the current filename.
//! 2.  The document goes through the tiers in [`OrganizeOptions::tiers`] order: filename
//!     heuristics, heuristics on the probed title, then the external classifier.
//! 3.  The resulting category is resolved to a folder by a [`FolderRegistry`](crate::registry::FolderRegistry)
//!     and written back, unless the document is already there.
//!
//! When the external classifier reports an exhausted quota, the item goes back to the front of
//! the queue and the whole run waits out a cooldown before retrying it. After
//! [`OrganizeOptions::quota_retry_limit`] consecutive quota hits on the same item it is parked in
//! the fallback category instead. Any other classification problem also ends in the fallback
//! category; only store failures are reported as per-item failures, and none of them stop the run.
//!
//! Runs can be cancelled at any time through [`OrganizeHandle::cancel`]. Cancellation is observed
//! before every queue pop and while waiting on the probe, the classifier or a cooldown. Written
//! assignments are never rolled back, so [`Organizer::pending_documents`] can pick up where a
//! cancelled run stopped.
//!
//! The fallback category is only used once the external classifier has been consulted. Without
//! a classifier, a document no tier matches is left in its current folder (normally
//! Uncategorized), counted in [`OrganizeReport::unmatched`] and still returned by
//! [`Organizer::pending_documents`].
//!
//! Only one run per [`Organizer`] may be active at a time.

pub use self::events::{DocumentAssigned, ItemFailed, OrganizeEvents, ProgressUpdated};
pub use self::state::{ItemFailure, OrganizeReport, PipelineState, RunPhase};

mod events;
mod run;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::classify::{ExternalClassifier, LocalHeuristicClassifier, Tier};
use crate::library::{self, Document, DocumentStore, FolderStore};
use crate::probe::{MetadataProbe, TextExtractor};
use crate::subjects::SubjectLookup;

use self::run::{Collaborators, Run};

pub const DEFAULT_FALLBACK_CATEGORY: &str = "Unsorted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeOptions {
    /// Tier order. Tiers left out are not tried.
    pub tiers: Vec<Tier>,
    /// Consecutive quota hits on one item before it is parked in the fallback category.
    pub quota_retry_limit: u32,
    pub cooldown_secs: u64,
    /// Upper bound on a cooldown stretched by the classifier's retry hint. Never below
    /// `cooldown_secs`.
    pub max_cooldown_secs: u64,
    pub classify_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    /// Maximum number of probes in flight, the current item's included.
    pub extraction_concurrency: usize,
    pub max_snippet_chars: usize,
    pub max_subject_tags: usize,
    /// AI results below this confidence go to the fallback category.
    pub min_confidence: f32,
    pub fallback_category: String,
    /// Count documents that are already filed as processed without classifying them.
    pub skip_assigned: bool,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        OrganizeOptions {
            tiers: vec![Tier::Local, Tier::Metadata, Tier::Ai],
            quota_retry_limit: 3,
            cooldown_secs: 60,
            max_cooldown_secs: 300,
            classify_timeout_secs: 30,
            extraction_timeout_secs: 20,
            lookup_timeout_secs: 10,
            extraction_concurrency: 4,
            max_snippet_chars: 500,
            max_subject_tags: 5,
            min_confidence: 0.3,
            fallback_category: DEFAULT_FALLBACK_CATEGORY.to_string(),
            skip_assigned: true,
        }
    }
}

impl OrganizeOptions {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// How long to pause after a quota hit: the retry hint if it is longer than the
    /// configured cooldown, capped at `max_cooldown_secs`.
    pub fn cooldown_for(&self, retry_after: Option<Duration>) -> Duration {
        let base = self.cooldown();
        let cap = Duration::from_secs(self.max_cooldown_secs).max(base);
        retry_after.map_or(base, |hint| hint.clamp(base, cap))
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("An organize run is already in progress")]
    AlreadyRunning,

    #[error("Organize runs must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("Library error")]
    Library(#[from] library::Error),

    #[error("Organize task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Entry point of the pipeline. Configure with the `with_*` builders, then [`start`](Self::start).
pub struct Organizer {
    documents: Arc<dyn DocumentStore>,
    folders: Arc<dyn FolderStore>,
    heuristics: Arc<LocalHeuristicClassifier>,
    extractor: Option<Arc<dyn TextExtractor>>,
    classifier: Option<Arc<dyn ExternalClassifier>>,
    subjects: Option<Arc<dyn SubjectLookup>>,
    options: OrganizeOptions,
    events: Arc<OrganizeEvents>,
    running: Arc<AtomicBool>,
}

impl Organizer {
    /// An organizer with the default heuristic table and no metadata, subject or AI tiers.
    pub fn new(documents: Arc<dyn DocumentStore>, folders: Arc<dyn FolderStore>) -> Self {
        Organizer {
            documents,
            folders,
            heuristics: Arc::new(LocalHeuristicClassifier::default()),
            extractor: None,
            classifier: None,
            subjects: None,
            options: OrganizeOptions::default(),
            events: Arc::new(OrganizeEvents::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_heuristics(mut self, heuristics: LocalHeuristicClassifier) -> Self {
        self.heuristics = Arc::new(heuristics);
        self
    }

    pub fn with_text_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ExternalClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_subject_lookup(mut self, subjects: Arc<dyn SubjectLookup>) -> Self {
        self.subjects = Some(subjects);
        self
    }

    pub fn with_options(mut self, options: OrganizeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &OrganizeOptions {
        &self.options
    }

    /// Listener lists for run events. Register with [`crate::event::Listener::new`].
    pub fn events(&self) -> &OrganizeEvents {
        &self.events
    }

    /// Whether a run is active (running or paused).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Documents still in the default folder: what a follow-up run needs to look at.
    pub async fn pending_documents(&self) -> Result<Vec<Document>, OrganizeError> {
        let documents = self.documents.list_all().await?;
        Ok(documents.into_iter().filter(Document::is_uncategorized).collect())
    }

    /// Starts a run over `documents` in the background.
    ///
    /// Fails with [`OrganizeError::AlreadyRunning`] while another run of this organizer is active.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub fn start(&self, documents: Vec<Document>) -> Result<OrganizeHandle, OrganizeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| OrganizeError::NoRuntime)?;
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrganizeError::AlreadyRunning);
        }
        let guard = RunGuard(self.running.clone());

        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(PipelineState::new(documents.len()));
        let probe = self.extractor.as_ref().map(|extractor| {
            MetadataProbe::new(extractor.clone(), self.documents.clone())
                .with_timeout(self.options.extraction_timeout())
                .with_max_snippet_chars(self.options.max_snippet_chars)
        });
        let deps = Collaborators {
            documents: self.documents.clone(),
            folders: self.folders.clone(),
            heuristics: self.heuristics.clone(),
            probe,
            classifier: self.classifier.clone(),
            subjects: self.subjects.clone(),
            events: self.events.clone(),
        };
        let run = Run::new(deps, self.options.clone(), documents, cancel.clone(), progress_tx);

        let task = runtime.spawn(async move {
            let _guard = guard;
            run.execute().await
        });
        debug!("Organize run spawned");

        Ok(OrganizeHandle {
            cancel,
            progress: progress_rx,
            task,
        })
    }

    /// Runs the pipeline over `documents` and waits for it to finish.
    pub async fn organize(&self, documents: Vec<Document>) -> Result<OrganizeReport, OrganizeError> {
        self.start(documents)?.wait().await
    }
}

/// Clears the organizer's running flag when the run task ends, however it ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to an active run: observe progress, cancel, or wait for the report.
#[derive(Debug)]
pub struct OrganizeHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<PipelineState>,
    task: JoinHandle<OrganizeReport>,
}

impl OrganizeHandle {
    /// Requests cooperative cancellation. Safe to call at any time, any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The run's cancellation token, for wiring cancellation to other sources (e.g. Ctrl-C).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The most recent progress snapshot.
    pub fn state(&self) -> PipelineState {
        self.progress.borrow().clone()
    }

    /// A stream of progress snapshots: the current one first, then every change until the run
    /// ends. Intermediate snapshots may be skipped when the consumer is slow; the last one is not.
    pub fn updates(&self) -> BoxStream<'static, PipelineState> {
        let rx = self.progress.clone();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let state = rx.borrow_and_update().clone();
            Some((state, (rx, false)))
        })
        .boxed()
    }

    /// Waits for the run to finish and returns its report.
    pub async fn wait(self) -> Result<OrganizeReport, OrganizeError> {
        Ok(self.task.await?)
    }
}
