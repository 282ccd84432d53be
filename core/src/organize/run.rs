use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::classify::{
    ClassificationRequest, ClassificationResult, ClassifyError, ClassifyOutcome, ExternalClassifier,
    LocalHeuristicClassifier, Tier,
};
use crate::library::{Document, DocumentId, DocumentStore, FolderStore};
use crate::probe::{ExtractionError, MetadataProbe, ProbeResult};
use crate::registry::FolderRegistry;
use crate::subjects::{clean_title, SubjectLookup};

use super::events::{DocumentAssigned, ItemFailed, OrganizeEvents, ProgressUpdated};
use super::state::{ItemFailure, OrganizeReport, PipelineState, RunPhase};
use super::OrganizeOptions;

/// A document waiting in the run queue, with what has been learned about it so far.
#[derive(Debug, Clone)]
pub(super) struct QueueItem {
    document: Document,
    consecutive_quota_retries: u32,
    probed: bool,
    probe: Option<ProbeResult>,
    subject_tags: Option<Vec<String>>,
}

impl QueueItem {
    fn new(document: Document) -> Self {
        QueueItem {
            document,
            consecutive_quota_retries: 0,
            probed: false,
            probe: None,
            subject_tags: None,
        }
    }

    fn title(&self) -> Option<&str> {
        self.probe
            .as_ref()
            .and_then(|p| p.title.as_deref())
            .or(self.document.cached_title.as_deref())
    }

    fn author(&self) -> Option<&str> {
        self.probe
            .as_ref()
            .and_then(|p| p.author.as_deref())
            .or(self.document.cached_author.as_deref())
    }
}

/// How a single item left the classification tiers.
enum Step {
    Decided(Decision),
    /// Quota hit below the retry ceiling: put the item back and cool down.
    Requeue { retry_after: Option<Duration> },
    Cancelled,
}

enum Decision {
    Classified(ClassificationResult),
    Fallback(ClassificationResult),
    /// Nothing matched and no classifier was available. The document stays where it is.
    Unmatched,
    /// Already filed and `skip_assigned` is on.
    Skipped,
}

pub(super) struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub folders: Arc<dyn FolderStore>,
    pub heuristics: Arc<LocalHeuristicClassifier>,
    pub probe: Option<MetadataProbe>,
    pub classifier: Option<Arc<dyn ExternalClassifier>>,
    pub subjects: Option<Arc<dyn SubjectLookup>>,
    pub events: Arc<OrganizeEvents>,
}

/// The state of one organize run. Lives inside the spawned run task.
pub(super) struct Run {
    deps: Collaborators,
    options: OrganizeOptions,
    cancel: CancellationToken,
    progress: watch::Sender<PipelineState>,
    state: PipelineState,
    report: OrganizeReport,
    queue: VecDeque<QueueItem>,
    prefetched: HashMap<DocumentId, JoinHandle<Result<ProbeResult, ExtractionError>>>,
}

impl Run {
    pub(super) fn new(
        deps: Collaborators,
        options: OrganizeOptions,
        documents: Vec<Document>,
        cancel: CancellationToken,
        progress: watch::Sender<PipelineState>,
    ) -> Self {
        let total = documents.len();
        Run {
            deps,
            options,
            cancel,
            progress,
            state: PipelineState::new(total),
            report: OrganizeReport {
                total,
                ..Default::default()
            },
            queue: documents.into_iter().map(QueueItem::new).collect(),
            prefetched: HashMap::new(),
        }
    }

    #[instrument(name = "organize_run", skip(self))]
    pub(super) async fn execute(mut self) -> OrganizeReport {
        info!(total = self.state.total_count, "Organize run started");
        self.state.phase = RunPhase::Running;
        self.set_status("Loading folders");

        let mut registry = match FolderRegistry::seeded(self.deps.folders.clone()).await {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "Could not seed folder cache, starting empty");
                FolderRegistry::new(self.deps.folders.clone())
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(mut item) = self.queue.pop_front() else {
                break;
            };

            self.state.current_document = Some(item.document.filename.clone());
            self.set_status(format!("Classifying {}", item.document.filename));
            self.schedule_prefetch();

            match self.classify_item(&mut item, &registry).await {
                Step::Decided(decision) => {
                    self.apply(&item, decision, &mut registry).await;
                    self.state.processed_count += 1;
                    self.report.processed += 1;
                    self.publish();
                }
                Step::Requeue { retry_after } => {
                    let filename = item.document.filename.clone();
                    self.queue.push_front(item);
                    if !self.cool_down(&filename, retry_after).await {
                        break;
                    }
                }
                Step::Cancelled => {
                    debug!(document = %item.document.id, "Cancelled while classifying");
                    break;
                }
            }
        }

        for (_, handle) in self.prefetched.drain() {
            handle.abort();
        }

        self.state.current_document = None;
        if self.cancel.is_cancelled() && self.state.processed_count < self.state.total_count {
            self.state.phase = RunPhase::Cancelled;
            self.state.cancelled = true;
            self.report.cancelled = true;
            info!(
                processed = self.state.processed_count,
                total = self.state.total_count,
                "Organize run cancelled"
            );
            self.set_status("Cancelled");
        } else {
            self.state.phase = RunPhase::Completed;
            info!(
                processed = self.report.processed,
                assigned = self.report.assigned,
                unsorted = self.report.unsorted,
                failures = self.report.failures.len(),
                "Organize run completed"
            );
            self.set_status(format!(
                "Organized {} of {} documents",
                self.state.processed_count, self.state.total_count
            ));
        }
        self.report
    }

    /// Runs the item through the configured tiers until one decides.
    async fn classify_item(&mut self, item: &mut QueueItem, registry: &FolderRegistry) -> Step {
        if self.options.skip_assigned && !item.document.is_uncategorized() {
            trace!(document = %item.document.id, "Already filed, skipping");
            return Step::Decided(Decision::Skipped);
        }

        let tiers = self.options.tiers.clone();
        let mut last_tier = tiers.first().copied().unwrap_or(Tier::Local);
        let mut attempted_ai = false;

        for tier in tiers {
            last_tier = tier;
            match tier {
                Tier::Local => {
                    if let Some(result) = self
                        .deps
                        .heuristics
                        .classify_result(&item.document.filename, Tier::Local)
                    {
                        debug!(document = %item.document.id, category = %result.category, "Local tier match");
                        return Step::Decided(Decision::Classified(result));
                    }
                }
                Tier::Metadata => {
                    if !item.probed && !self.probe_item(item).await {
                        return Step::Cancelled;
                    }
                    if let Some(title) = item.title() {
                        if let Some(result) = self.deps.heuristics.classify_result(title, Tier::Metadata) {
                            debug!(document = %item.document.id, category = %result.category, "Metadata tier match");
                            return Step::Decided(Decision::Classified(result));
                        }
                    }
                }
                Tier::Ai => {
                    let Some(classifier) = self.deps.classifier.clone() else {
                        continue;
                    };
                    attempted_ai = true;
                    if item.subject_tags.is_none() && !self.lookup_subjects(item).await {
                        return Step::Cancelled;
                    }
                    let request = self.build_request(item, registry);

                    self.report.ai_calls += 1;
                    let outcome = match self.call_classifier(classifier.as_ref(), &request).await {
                        Some(outcome) => outcome,
                        None => return Step::Cancelled,
                    };
                    match outcome {
                        ClassifyOutcome::Classified(result) => {
                            item.consecutive_quota_retries = 0;
                            if result.category.trim().is_empty() || result.confidence < self.options.min_confidence {
                                debug!(
                                    document = %item.document.id,
                                    category = %result.category,
                                    confidence = result.confidence,
                                    "AI result below confidence threshold"
                                );
                                return Step::Decided(self.fallback(Tier::Ai, "low confidence"));
                            }
                            debug!(document = %item.document.id, category = %result.category, "AI tier match");
                            return Step::Decided(Decision::Classified(result));
                        }
                        ClassifyOutcome::QuotaExceeded { retry_after } => {
                            item.consecutive_quota_retries += 1;
                            if item.consecutive_quota_retries < self.options.quota_retry_limit {
                                warn!(
                                    document = %item.document.id,
                                    attempt = item.consecutive_quota_retries,
                                    "Classifier quota exceeded, item re-queued"
                                );
                                return Step::Requeue { retry_after };
                            }
                            warn!(
                                document = %item.document.id,
                                attempts = item.consecutive_quota_retries,
                                "Classifier quota still exceeded, giving up on item"
                            );
                            return Step::Decided(self.fallback(Tier::Ai, "quota retries exhausted"));
                        }
                        ClassifyOutcome::Failed(e) => {
                            warn!(document = %item.document.id, error = %e, "Classification failed");
                            return Step::Decided(self.fallback(Tier::Ai, &e.to_string()));
                        }
                    }
                }
            }
        }

        if attempted_ai {
            Step::Decided(self.fallback(last_tier, "no tier matched"))
        } else {
            trace!(document = %item.document.id, "No tier matched and no classifier configured");
            Step::Decided(Decision::Unmatched)
        }
    }

    fn fallback(&self, tier: Tier, reason: &str) -> Decision {
        Decision::Fallback(ClassificationResult::new(
            self.options.fallback_category.clone(),
            0.0,
            reason,
            tier,
        ))
    }

    fn build_request(&self, item: &QueueItem, registry: &FolderRegistry) -> ClassificationRequest {
        let mut request = ClassificationRequest::new(item.document.filename.clone())
            .with_title(item.title().map(str::to_string))
            .with_author(item.author().map(str::to_string))
            .with_subject_tags(
                item.subject_tags.clone().unwrap_or_default(),
                self.options.max_subject_tags,
            )
            .with_known_folders(registry.known_names());
        if let Some(probe) = &item.probe {
            request = request.with_snippet(&probe.snippet, self.options.max_snippet_chars);
        }
        request
    }

    /// Probes the item, consuming a prefetched result if there is one. Returns `false` if the
    /// run was cancelled while waiting.
    async fn probe_item(&mut self, item: &mut QueueItem) -> bool {
        let Some(probe) = self.deps.probe.clone() else {
            item.probed = true;
            return true;
        };
        let cancel = self.cancel.clone();

        let result = match self.prefetched.remove(&item.document.id) {
            Some(mut handle) => {
                trace!(document = %item.document.id, "Using prefetched probe");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        handle.abort();
                        return false;
                    }
                    joined = &mut handle => joined.unwrap_or_else(|e| Err(ExtractionError::Internal(e.to_string()))),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    result = probe.probe(&item.document) => result,
                }
            }
        };

        item.probed = true;
        match result {
            Ok(probe) => item.probe = Some(probe),
            Err(e) => {
                debug!(document = %item.document.id, error = %e, "Metadata probe failed, continuing without it");
            }
        }
        true
    }

    /// Fetches subject tags for the item. Lookup failures count as "no tags". Returns `false`
    /// if the run was cancelled while waiting.
    async fn lookup_subjects(&mut self, item: &mut QueueItem) -> bool {
        let Some(lookup) = self.deps.subjects.clone() else {
            item.subject_tags = Some(Vec::new());
            return true;
        };
        let Some(title) = clean_title(item.title().unwrap_or(&item.document.filename)) else {
            item.subject_tags = Some(Vec::new());
            return true;
        };

        let timeout = self.options.lookup_timeout();
        let cancel = self.cancel.clone();
        let tags = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = tokio::time::timeout(timeout, lookup.subjects(&title)) => match result {
                Ok(Ok(tags)) => tags,
                Ok(Err(e)) => {
                    debug!(title = %title, error = %e, "Subject lookup failed");
                    Vec::new()
                }
                Err(_) => {
                    debug!(title = %title, "Subject lookup timed out");
                    Vec::new()
                }
            },
        };
        item.subject_tags = Some(tags);
        true
    }

    /// Calls the classifier raced against the classify timeout and cancellation. `None` means
    /// cancelled.
    async fn call_classifier(
        &self,
        classifier: &dyn ExternalClassifier,
        request: &ClassificationRequest,
    ) -> Option<ClassifyOutcome> {
        let timeout = self.options.classify_timeout();
        trace!(classifier = classifier.name(), filename = %request.filename, "Calling classifier");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, classifier.classify(request)) => Some(match result {
                Ok(result) => ClassifyOutcome::from(result),
                Err(_) => ClassifyOutcome::Failed(ClassifyError::Timeout(timeout)),
            }),
        }
    }

    /// Pauses the run for the cooldown. Returns `false` if cancelled during the wait.
    async fn cool_down(&mut self, filename: &str, retry_after: Option<Duration>) -> bool {
        let wait = self.options.cooldown_for(retry_after);
        self.report.quota_pauses += 1;
        self.state.phase = RunPhase::Paused;
        self.set_status(format!(
            "Request quota reached, retrying {} in {}s",
            filename,
            wait.as_secs()
        ));
        warn!(wait_secs = wait.as_secs(), "Pausing queue for quota cooldown");

        let cancel = self.cancel.clone();
        let resumed = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => !cancel.is_cancelled(),
        };
        if resumed {
            self.state.phase = RunPhase::Running;
            self.set_status(format!("Resuming with {}", filename));
        }
        resumed
    }

    /// Starts probes for upcoming items that will need one.
    fn schedule_prefetch(&mut self) {
        let Some(probe) = &self.deps.probe else {
            return;
        };
        if !self.options.tiers.contains(&Tier::Metadata) {
            return;
        }
        let window = self.options.extraction_concurrency.saturating_sub(1);
        let check_local = self.options.tiers.contains(&Tier::Local);

        for item in self.queue.iter().take(window) {
            if self.prefetched.len() >= window {
                break;
            }
            let document = &item.document;
            if item.probed || self.prefetched.contains_key(&document.id) {
                continue;
            }
            if self.options.skip_assigned && !document.is_uncategorized() {
                continue;
            }
            if check_local && self.deps.heuristics.classify(&document.filename).is_some() {
                continue;
            }
            trace!(document = %document.id, "Prefetching probe");
            let probe = probe.clone();
            let document = document.clone();
            let id = document.id.clone();
            self.prefetched
                .insert(id, tokio::spawn(async move { probe.probe(&document).await }));
        }
    }

    /// Resolves the decision to a folder and writes it if it differs from the current one.
    async fn apply(&mut self, item: &QueueItem, decision: Decision, registry: &mut FolderRegistry) {
        let document = &item.document;
        let result = match decision {
            Decision::Skipped => {
                self.report.skipped += 1;
                return;
            }
            Decision::Unmatched => {
                self.report.unmatched += 1;
                return;
            }
            Decision::Fallback(result) => {
                self.report.unsorted += 1;
                result
            }
            Decision::Classified(result) => result,
        };

        let target = match registry.resolve(&result.category).await {
            Ok(id) => id,
            Err(e) => {
                self.record_failure(document, format!("Could not resolve folder '{}': {}", result.category, e));
                return;
            }
        };
        if target == document.folder_id {
            trace!(document = %document.id, folder = %target, "Already in target folder");
            self.report.unchanged += 1;
            return;
        }

        match self.deps.documents.set_folder(&document.id, &target).await {
            Ok(()) => {
                self.report.assigned += 1;
                debug!(document = %document.id, folder = %target, tier = %result.tier, "Folder assigned");
                self.deps.events.document_assigned.dispatch(&DocumentAssigned {
                    document_id: document.id.clone(),
                    filename: document.filename.clone(),
                    folder_id: target,
                    category: result.category,
                    tier: result.tier,
                });
            }
            Err(e) => {
                self.record_failure(document, format!("Could not save folder assignment: {}", e));
            }
        }
    }

    fn record_failure(&mut self, document: &Document, message: String) {
        error!(document = %document.id, error = %message, "Failed to file document");
        let failure = ItemFailure {
            document_id: document.id.clone(),
            filename: document.filename.clone(),
            message,
        };
        self.deps.events.item_failed.dispatch(&ItemFailed(failure.clone()));
        self.report.failures.push(failure);
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.state.status_message = message.into();
        self.publish();
    }

    fn publish(&self) {
        self.progress.send_replace(self.state.clone());
        self.deps.events.progress.dispatch(&ProgressUpdated(self.state.clone()));
    }
}
