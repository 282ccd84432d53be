use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;

use zenreader_core::classify::{
    ClassificationRequest, ClassificationResult, ClassifyError, ExternalClassifier, Tier,
};
use zenreader_core::event::Listener;
use zenreader_core::library::{
    self, Document, DocumentId, DocumentStore, Folder, FolderId, FolderStore, MemoryLibrary,
};
use zenreader_core::organize::{OrganizeError, OrganizeOptions, Organizer, RunPhase};
use zenreader_core::probe::{ExtractedText, ExtractionError, TextExtractor};
use zenreader_core::subjects::{LookupError, SubjectLookup};

// Helper to initialize tracing subscriber
fn setup_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// --- Test collaborators ---

/// Wraps a `MemoryLibrary` and counts writes, optionally failing writes for one document.
struct CountingLibrary {
    inner: MemoryLibrary,
    set_folder_calls: AtomicUsize,
    create_calls: AtomicUsize,
    fail_writes_for: Option<DocumentId>,
}

impl CountingLibrary {
    fn new(documents: Vec<Document>) -> Arc<Self> {
        Arc::new(CountingLibrary {
            inner: MemoryLibrary::with_documents(documents),
            set_folder_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            fail_writes_for: None,
        })
    }

    fn failing_for(documents: Vec<Document>, id: &str) -> Arc<Self> {
        Arc::new(CountingLibrary {
            inner: MemoryLibrary::with_documents(documents),
            set_folder_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            fail_writes_for: Some(DocumentId::new(id)),
        })
    }

    fn writes(&self) -> usize {
        self.set_folder_calls.load(Ordering::SeqCst)
    }

    fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    async fn folder_name_of(&self, id: &str) -> Option<String> {
        let doc = self.inner.document(&DocumentId::new(id)).await?;
        if doc.is_uncategorized() {
            return Some(library::UNCATEGORIZED.to_string());
        }
        FolderStore::list_all(&self.inner)
            .await
            .ok()?
            .into_iter()
            .find(|f| f.id == doc.folder_id)
            .map(|f| f.display_name)
    }

    fn organizer(self: &Arc<Self>) -> Organizer {
        setup_tracing();
        Organizer::new(self.clone(), self.clone())
    }
}

#[async_trait]
impl DocumentStore for CountingLibrary {
    async fn list_all(&self) -> library::Result<Vec<Document>> {
        DocumentStore::list_all(&self.inner).await
    }

    async fn set_folder(&self, document: &DocumentId, folder: &FolderId) -> library::Result<()> {
        self.set_folder_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes_for.as_ref() == Some(document) {
            return Err(library::Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.set_folder(document, folder).await
    }

    async fn read_content(&self, document: &DocumentId) -> library::Result<Vec<u8>> {
        self.inner.read_content(document).await
    }
}

#[async_trait]
impl FolderStore for CountingLibrary {
    async fn list_all(&self) -> library::Result<Vec<Folder>> {
        FolderStore::list_all(&self.inner).await
    }

    async fn create(&self, name: &str) -> library::Result<Folder> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        FolderStore::create(&self.inner, name).await
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Category(&'static str, f32),
    Quota,
    /// Quota exceeded with a retry hint from the provider.
    QuotaFor(Duration),
    Fail,
    Hang,
}

/// Replies per filename from a script; the last scripted reply repeats.
struct ScriptedClassifier {
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
    default: Reply,
    requests: Mutex<Vec<ClassificationRequest>>,
}

impl ScriptedClassifier {
    fn new(default: Reply) -> Self {
        ScriptedClassifier {
            script: Mutex::new(HashMap::new()),
            default,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn on(self, filename: &str, replies: Vec<Reply>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(filename.to_string(), replies.into_iter().collect());
        self
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn called_with(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.filename.clone()).collect()
    }

    fn next_reply(&self, filename: &str) -> Reply {
        let mut script = self.script.lock().unwrap();
        match script.get_mut(filename) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap(),
            Some(replies) => replies.front().cloned().unwrap_or_else(|| self.default.clone()),
            None => self.default.clone(),
        }
    }
}

#[async_trait]
impl ExternalClassifier for ScriptedClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ClassificationResult, ClassifyError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_reply(&request.filename) {
            Reply::Category(category, confidence) => {
                Ok(ClassificationResult::new(category, confidence, "scripted", Tier::Ai))
            }
            Reply::Quota => Err(ClassifyError::Api {
                status: Some(429),
                message: "RESOURCE_EXHAUSTED".into(),
            }),
            Reply::QuotaFor(hint) => Err(ClassifyError::QuotaExceeded {
                message: "rate limited".into(),
                retry_after: Some(hint),
            }),
            Reply::Fail => Err(ClassifyError::InvalidResponse("not json".into())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

struct TitleExtractor(Option<&'static str>);

#[async_trait]
impl TextExtractor for TitleExtractor {
    async fn extract_first_page(&self, _bytes: Vec<u8>) -> Result<ExtractedText, ExtractionError> {
        Ok(ExtractedText {
            text: "Page one text".into(),
            title: self.0.map(String::from),
            author: None,
        })
    }
}

struct BrokenExtractor;

#[async_trait]
impl TextExtractor for BrokenExtractor {
    async fn extract_first_page(&self, _bytes: Vec<u8>) -> Result<ExtractedText, ExtractionError> {
        Err(ExtractionError::Malformed("bad xref table".into()))
    }
}

/// Sleeps before answering and records how many extractions overlap.
#[derive(Default)]
struct SlowExtractor {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
    finished: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextExtractor for SlowExtractor {
    async fn extract_first_page(&self, _bytes: Vec<u8>) -> Result<ExtractedText, ExtractionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(ExtractedText::default())
    }
}

struct FixedSubjects(Vec<&'static str>);

#[async_trait]
impl SubjectLookup for FixedSubjects {
    async fn subjects(&self, _title: &str) -> Result<Vec<String>, LookupError> {
        Ok(self.0.iter().map(|s| s.to_string()).collect())
    }
}

fn doc(name: &str) -> Document {
    Document::new(name, name, 100)
}

fn fast_options() -> OrganizeOptions {
    OrganizeOptions {
        cooldown_secs: 60,
        ..Default::default()
    }
}

// --- Scenarios ---

#[tokio::test]
async fn local_tier_files_known_names_without_ai() {
    let library = CountingLibrary::new(vec![doc("invoice_march.pdf"), doc("dragon_saga_vol3.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Wrong", 1.0)));
    let organizer = library.organizer().with_classifier(classifier.clone());

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(library.folder_name_of("invoice_march.pdf").await.as_deref(), Some("Finance"));
    assert_eq!(library.folder_name_of("dragon_saga_vol3.pdf").await.as_deref(), Some("Comics"));
    assert_eq!(classifier.calls(), 0);
    assert_eq!(report.ai_calls, 0);
    assert_eq!(report.processed, 2);
    assert_eq!(report.assigned, 2);
}

#[tokio::test]
async fn ai_tier_creates_folder_and_second_run_is_free() {
    let library = CountingLibrary::new(vec![doc("untitled_scan.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Personal", 0.6)));
    let organizer = library.organizer().with_classifier(classifier.clone());

    let docs = DocumentStore::list_all(library.as_ref()).await.unwrap();
    organizer.organize(docs).await.unwrap();
    assert_eq!(library.folder_name_of("untitled_scan.pdf").await.as_deref(), Some("Personal"));
    assert_eq!(classifier.calls(), 1);
    assert_eq!(library.creates(), 1);
    assert_eq!(library.writes(), 1);

    let docs = DocumentStore::list_all(library.as_ref()).await.unwrap();
    let report = organizer.organize(docs).await.unwrap();
    assert_eq!(classifier.calls(), 1, "second run must not call the classifier");
    assert_eq!(library.writes(), 1, "second run must not write");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 1);
}

#[tokio::test(start_paused = true)]
async fn quota_hits_pause_and_retry_same_item_first() {
    let library = CountingLibrary::new(vec![doc("x.pdf"), doc("y.pdf")]);
    let classifier = Arc::new(
        ScriptedClassifier::new(Reply::Category("History", 0.9)).on(
            "x.pdf",
            vec![Reply::Quota, Reply::Quota, Reply::Category("Science", 0.9)],
        ),
    );
    let organizer = library
        .organizer()
        .with_classifier(classifier.clone())
        .with_options(fast_options());

    let started = Instant::now();
    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(library.folder_name_of("x.pdf").await.as_deref(), Some("Science"));
    assert_eq!(library.folder_name_of("y.pdf").await.as_deref(), Some("History"));
    assert_eq!(classifier.called_with(), vec!["x.pdf", "x.pdf", "x.pdf", "y.pdf"]);
    assert_eq!(report.quota_pauses, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.unsorted, 0);
    assert!(elapsed >= Duration::from_secs(120), "two cooldowns expected, got {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(121));
}

#[tokio::test(start_paused = true)]
async fn endless_quota_gives_up_after_retry_limit() {
    let library = CountingLibrary::new(vec![doc("stuck.pdf"), doc("next.pdf")]);
    let classifier = Arc::new(
        ScriptedClassifier::new(Reply::Category("Poetry", 0.8)).on("stuck.pdf", vec![Reply::Quota]),
    );
    let organizer = library
        .organizer()
        .with_classifier(classifier.clone())
        .with_options(fast_options());

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(library.folder_name_of("stuck.pdf").await.as_deref(), Some("Unsorted"));
    assert_eq!(library.folder_name_of("next.pdf").await.as_deref(), Some("Poetry"));
    assert_eq!(classifier.called_with(), vec!["stuck.pdf", "stuck.pdf", "stuck.pdf", "next.pdf"]);
    assert_eq!(report.quota_pauses, 2);
    assert_eq!(report.unsorted, 1);
    assert_eq!(report.processed, 2);
}

#[tokio::test]
async fn classifier_errors_and_low_confidence_park_in_unsorted() {
    let library = CountingLibrary::new(vec![doc("a.pdf"), doc("b.pdf"), doc("c.pdf")]);
    let classifier = Arc::new(
        ScriptedClassifier::new(Reply::Category("Art", 0.9))
            .on("a.pdf", vec![Reply::Fail])
            .on("b.pdf", vec![Reply::Category("Maybe", 0.1)]),
    );
    let organizer = library.organizer().with_classifier(classifier.clone());

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(library.folder_name_of("a.pdf").await.as_deref(), Some("Unsorted"));
    assert_eq!(library.folder_name_of("b.pdf").await.as_deref(), Some("Unsorted"));
    assert_eq!(library.folder_name_of("c.pdf").await.as_deref(), Some("Art"));
    assert_eq!(report.unsorted, 2);
    // Both fallbacks share one folder.
    assert_eq!(library.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn hanging_classifier_times_out_to_unsorted() {
    let library = CountingLibrary::new(vec![doc("slow.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Hang));
    let organizer = library.organizer().with_classifier(classifier).with_options(OrganizeOptions {
        classify_timeout_secs: 5,
        ..Default::default()
    });

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(library.folder_name_of("slow.pdf").await.as_deref(), Some("Unsorted"));
    assert_eq!(report.processed, 1);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn unchanged_decisions_are_not_written_again() {
    let library = CountingLibrary::new(vec![doc("invoice_1.pdf"), doc("receipt_2.pdf"), doc("manga_3.pdf")]);
    let organizer = library.organizer().with_options(OrganizeOptions {
        skip_assigned: false,
        ..Default::default()
    });

    organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(library.writes(), 3);

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(library.writes(), 3);
    assert_eq!(report.unchanged, 3);
    assert_eq!(report.assigned, 0);
}

#[tokio::test]
async fn every_document_ends_with_a_folder() {
    let names = ["tax_2023.pdf", "???.pdf", "contract.pdf", "random.pdf", "lecture_01.pdf"];
    let library = CountingLibrary::new(names.iter().map(|n| doc(n)).collect());
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Fail));
    let organizer = library.organizer().with_classifier(classifier);

    let handle = organizer
        .start(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .unwrap();
    let mut seen = Vec::new();
    let mut updates = handle.updates();
    while let Some(state) = updates.next().await {
        seen.push(state.processed_count);
        if state.phase.is_finished() {
            break;
        }
    }
    let final_state = handle.state();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.processed, names.len());
    assert_eq!(final_state.processed_count, final_state.total_count);
    assert_eq!(final_state.phase, RunPhase::Completed);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {:?}", seen);
    for doc in DocumentStore::list_all(library.as_ref()).await.unwrap() {
        assert!(!doc.is_uncategorized(), "{} was left unfiled", doc.filename);
    }
}

#[tokio::test]
async fn categories_with_same_leaf_share_one_folder() {
    let library = CountingLibrary::new(vec![doc("one.pdf"), doc("two.pdf"), doc("three.pdf")]);
    let classifier = Arc::new(
        ScriptedClassifier::new(Reply::Category("CODING", 0.9))
            .on("one.pdf", vec![Reply::Category("Technical/Coding", 0.9)])
            .on("two.pdf", vec![Reply::Category("coding", 0.9)]),
    );
    let organizer = library.organizer().with_classifier(classifier);

    organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    let docs = DocumentStore::list_all(library.as_ref()).await.unwrap();
    assert!(docs.windows(2).all(|w| w[0].folder_id == w[1].folder_id));
    assert_eq!(library.creates(), 1);
    assert_eq!(library.folder_name_of("one.pdf").await.as_deref(), Some("Coding"));
}

#[tokio::test]
async fn existing_folder_is_reused_regardless_of_case() {
    let library = CountingLibrary::new(vec![doc("essay.pdf")]);
    let existing = FolderStore::create(&library.inner, "Personal").await.unwrap();
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("personal", 0.9)));
    let organizer = library.organizer().with_classifier(classifier);

    organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    let doc = library.inner.document(&DocumentId::new("essay.pdf")).await.unwrap();
    assert_eq!(doc.folder_id, existing.id);
    assert_eq!(library.creates(), 0);
}

#[tokio::test]
async fn cancel_mid_run_keeps_earlier_assignments() {
    let library = CountingLibrary::new(vec![doc("invoice_a.pdf"), doc("mystery.pdf"), doc("bill_c.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Hang));
    let organizer = library.organizer().with_classifier(classifier).with_options(OrganizeOptions {
        classify_timeout_secs: 3600,
        ..Default::default()
    });

    let handle = organizer
        .start(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .unwrap();
    let mut updates = handle.updates();
    while let Some(state) = updates.next().await {
        if state.current_document.as_deref() == Some("mystery.pdf") {
            handle.cancel();
            break;
        }
    }
    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancellation must not wait for the classifier")
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.processed, 1);
    assert_eq!(library.folder_name_of("invoice_a.pdf").await.as_deref(), Some("Finance"));
    assert_eq!(library.folder_name_of("mystery.pdf").await.as_deref(), Some("uncategorized"));
    assert_eq!(library.folder_name_of("bill_c.pdf").await.as_deref(), Some("uncategorized"));

    let pending = organizer.pending_documents().await.unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn cancel_during_cooldown_stops_promptly() {
    let library = CountingLibrary::new(vec![doc("q.pdf"), doc("r.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Quota));
    let organizer = library.organizer().with_classifier(classifier.clone()).with_options(OrganizeOptions {
        cooldown_secs: 3600,
        ..Default::default()
    });

    let handle = organizer
        .start(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .unwrap();
    let mut updates = handle.updates();
    while let Some(state) = updates.next().await {
        if state.phase == RunPhase::Paused {
            handle.cancel();
            break;
        }
    }
    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancellation must interrupt the cooldown")
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.processed, 0);
    assert_eq!(report.quota_pauses, 1);
    assert_eq!(classifier.calls(), 1);
    assert_eq!(library.writes(), 0);
}

#[tokio::test]
async fn second_run_is_refused_while_first_is_active() {
    let library = CountingLibrary::new(vec![doc("hang.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Hang));
    let organizer = library.organizer().with_classifier(classifier).with_options(OrganizeOptions {
        classify_timeout_secs: 3600,
        ..Default::default()
    });
    let docs = DocumentStore::list_all(library.as_ref()).await.unwrap();

    let first = organizer.start(docs.clone()).unwrap();
    assert!(organizer.is_running());
    assert!(matches!(organizer.start(docs.clone()), Err(OrganizeError::AlreadyRunning)));

    first.cancel();
    first.wait().await.unwrap();
    assert!(!organizer.is_running());

    let again = organizer.start(docs).unwrap();
    again.cancel();
    again.wait().await.unwrap();
}

#[tokio::test]
async fn persistence_failure_is_reported_and_run_continues() {
    let library = CountingLibrary::failing_for(
        vec![doc("invoice_1.pdf"), doc("invoice_2.pdf"), doc("invoice_3.pdf")],
        "invoice_2.pdf",
    );
    let organizer = library.organizer();
    let failed = Arc::new(Mutex::new(Vec::new()));
    let sink = failed.clone();
    let _listener = Listener::new(&organizer.events().item_failed, move |event| {
        sink.lock().unwrap().push(event.0.document_id.clone());
    });

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.assigned, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].document_id, DocumentId::new("invoice_2.pdf"));
    assert_eq!(*failed.lock().unwrap(), vec![DocumentId::new("invoice_2.pdf")]);
    assert_eq!(library.folder_name_of("invoice_3.pdf").await.as_deref(), Some("Finance"));
}

#[tokio::test]
async fn empty_batch_completes_immediately() {
    let library = CountingLibrary::new(Vec::new());
    let organizer = library.organizer();
    let handle = organizer.start(Vec::new()).unwrap();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.processed, 0);
    assert!(!report.cancelled);
}

// --- Metadata and subject tiers ---

#[tokio::test]
async fn probed_title_is_matched_before_ai() {
    let library = CountingLibrary::new(vec![doc("scan_001.pdf")]);
    library.inner.set_content(&DocumentId::new("scan_001.pdf"), b"%PDF".to_vec()).await;
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Wrong", 1.0)));
    let organizer = library
        .organizer()
        .with_text_extractor(Arc::new(TitleExtractor(Some("Monthly Bank Statement"))))
        .with_classifier(classifier.clone());

    let assigned = Arc::new(Mutex::new(Vec::new()));
    let sink = assigned.clone();
    let _listener = Listener::new(&organizer.events().document_assigned, move |event| {
        sink.lock().unwrap().push(event.tier);
    });

    organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(library.folder_name_of("scan_001.pdf").await.as_deref(), Some("Finance"));
    assert_eq!(classifier.calls(), 0);
    assert_eq!(*assigned.lock().unwrap(), vec![Tier::Metadata]);
}

#[tokio::test]
async fn probe_failure_falls_through_to_ai_with_filename_only() {
    let library = CountingLibrary::new(vec![doc("scan_002.pdf")]);
    library.inner.set_content(&DocumentId::new("scan_002.pdf"), b"garbage".to_vec()).await;
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Letters", 0.7)));
    let organizer = library
        .organizer()
        .with_text_extractor(Arc::new(BrokenExtractor))
        .with_classifier(classifier.clone());

    organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(library.folder_name_of("scan_002.pdf").await.as_deref(), Some("Letters"));
    let requests = classifier.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].filename, "scan_002.pdf");
    assert_eq!(requests[0].snippet, None);
}

#[tokio::test]
async fn ai_request_carries_snippet_tags_and_known_folders() {
    let library = CountingLibrary::new(vec![doc("the_silent_sea.pdf")]);
    library.inner.set_content(&DocumentId::new("the_silent_sea.pdf"), b"%PDF".to_vec()).await;
    FolderStore::create(&library.inner, "Fiction").await.unwrap();
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Fiction", 0.9)));
    let organizer = library
        .organizer()
        .with_text_extractor(Arc::new(TitleExtractor(None)))
        .with_subject_lookup(Arc::new(FixedSubjects(vec!["Sea stories", "Fiction", "", "A", "B", "C", "D"])))
        .with_classifier(classifier.clone());

    organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    let requests = classifier.requests.lock().unwrap();
    let request = &requests[0];
    assert_eq!(request.snippet.as_deref(), Some("Page one text"));
    assert_eq!(request.subject_tags, vec!["Sea stories", "Fiction", "A", "B", "C"]);
    assert_eq!(request.known_folders, vec!["Fiction".to_string()]);
    assert_eq!(library.creates(), 0);
}

#[tokio::test]
async fn without_classifier_unmatched_documents_stay_pending() {
    let library = CountingLibrary::new(vec![doc("invoice_9.pdf"), doc("whatever.pdf")]);
    let organizer = library.organizer();

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.unmatched, 1);
    let pending = organizer.pending_documents().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].filename, "whatever.pdf");
}

// --- Cooldown hints, tier order, prefetch ---

#[tokio::test(start_paused = true)]
async fn retry_hint_longer_than_cooldown_is_honoured() {
    let library = CountingLibrary::new(vec![doc("x.pdf")]);
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Science", 0.9)).on(
        "x.pdf",
        vec![Reply::QuotaFor(Duration::from_secs(90)), Reply::Category("Science", 0.9)],
    ));
    let organizer = library
        .organizer()
        .with_classifier(classifier.clone())
        .with_options(fast_options());

    let started = Instant::now();
    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(library.folder_name_of("x.pdf").await.as_deref(), Some("Science"));
    assert_eq!(report.quota_pauses, 1);
    assert!(elapsed >= Duration::from_secs(90), "hint ignored, waited {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(91));
}

#[tokio::test(start_paused = true)]
async fn huge_retry_hint_is_capped() {
    let library = CountingLibrary::new(vec![doc("x.pdf")]);
    let month = Duration::from_secs(30 * 24 * 3600);
    let classifier = Arc::new(
        ScriptedClassifier::new(Reply::Category("Science", 0.9)).on("x.pdf", vec![Reply::QuotaFor(month)]),
    );
    let options = OrganizeOptions {
        cooldown_secs: 60,
        max_cooldown_secs: 300,
        quota_retry_limit: 3,
        ..Default::default()
    };
    let organizer = library
        .organizer()
        .with_classifier(classifier.clone())
        .with_options(options);

    let started = Instant::now();
    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(classifier.calls(), 3);
    assert_eq!(report.quota_pauses, 2);
    assert_eq!(report.unsorted, 1);
    assert!(elapsed >= Duration::from_secs(600), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(601), "waited {:?}", elapsed);
}

#[tokio::test]
async fn tier_order_is_configurable() {
    let library = CountingLibrary::new(vec![doc("invoice_march.pdf")]);
    library
        .inner
        .set_content(&DocumentId::new("invoice_march.pdf"), b"%PDF".to_vec())
        .await;
    let extractor = Arc::new(SlowExtractor::default());
    let classifier = Arc::new(ScriptedClassifier::new(Reply::Category("Receipts", 0.9)));
    let organizer = library
        .organizer()
        .with_text_extractor(extractor.clone())
        .with_classifier(classifier.clone())
        .with_options(OrganizeOptions {
            tiers: vec![Tier::Ai, Tier::Local],
            ..Default::default()
        });

    let report = organizer
        .organize(DocumentStore::list_all(library.as_ref()).await.unwrap())
        .await
        .unwrap();

    // The AI tier runs first and decides, although the filename would match a local rule.
    assert_eq!(library.folder_name_of("invoice_march.pdf").await.as_deref(), Some("Receipts"));
    assert_eq!(classifier.calls(), 1);
    assert_eq!(report.ai_calls, 1);
    // Metadata is not in the tier list, so nothing is extracted.
    assert_eq!(extractor.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn prefetch_stays_within_extraction_concurrency() {
    let docs: Vec<Document> = (0..10).map(|i| doc(&format!("scan_{:03}.pdf", i))).collect();
    let library = CountingLibrary::new(docs.clone());
    for d in &docs {
        library.inner.set_content(&d.id, b"%PDF".to_vec()).await;
    }
    let extractor = Arc::new(SlowExtractor::default());
    let organizer = library
        .organizer()
        .with_text_extractor(extractor.clone())
        .with_options(OrganizeOptions {
            extraction_concurrency: 3,
            ..Default::default()
        });

    let started = Instant::now();
    let report = organizer.organize(docs).await.unwrap();

    assert_eq!(report.processed, 10);
    assert_eq!(report.unmatched, 10);
    assert_eq!(extractor.finished.load(Ordering::SeqCst), 10);
    let max = extractor.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "{} extractions overlapped", max);
    assert!(max >= 2, "upcoming items were not prefetched");
    // Ten sequential 10s extractions would take 100s.
    assert!(started.elapsed() < Duration::from_secs(100), "took {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_aborts_outstanding_prefetches() {
    let docs: Vec<Document> = (0..10).map(|i| doc(&format!("scan_{:03}.pdf", i))).collect();
    let library = CountingLibrary::new(docs.clone());
    for d in &docs {
        library.inner.set_content(&d.id, b"%PDF".to_vec()).await;
    }
    let extractor = Arc::new(SlowExtractor::default());
    let organizer = library
        .organizer()
        .with_text_extractor(extractor.clone())
        .with_options(OrganizeOptions {
            extraction_concurrency: 3,
            ..Default::default()
        });

    let handle = organizer.start(docs).unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    handle.cancel();
    let report = handle.wait().await.unwrap();
    assert!(report.cancelled);
    let finished_at_cancel = extractor.finished.load(Ordering::SeqCst);

    // Aborted extractions must not run to completion later.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(extractor.finished.load(Ordering::SeqCst), finished_at_cancel);
    assert_eq!(extractor.in_flight.load(Ordering::SeqCst), 0);
    assert!(extractor.started.load(Ordering::SeqCst) < 10);
}
