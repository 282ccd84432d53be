use serde::Serialize;

use crate::library::DocumentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    /// Waiting out a quota cooldown.
    Paused,
    Completed,
    Cancelled,
}

impl RunPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Cancelled)
    }
}

/// Progress of one organize run. Observers only ever receive copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub phase: RunPhase,
    pub total_count: usize,
    /// Never decreases during a run. Equals `total_count` once a run completes.
    pub processed_count: usize,
    pub status_message: String,
    pub current_document: Option<String>,
    pub cancelled: bool,
}

impl PipelineState {
    pub fn new(total_count: usize) -> Self {
        PipelineState {
            phase: RunPhase::Idle,
            total_count,
            processed_count: 0,
            status_message: String::new(),
            current_document: None,
            cancelled: false,
        }
    }

    /// Fraction of documents processed, in `[0, 1]`. An empty run counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total_count == 0 {
            1.0
        } else {
            self.processed_count as f64 / self.total_count as f64
        }
    }
}

/// A document whose decision could not be written back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub document_id: DocumentId,
    pub filename: String,
    pub message: String,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeReport {
    pub total: usize,
    pub processed: usize,
    /// Folder assignments written.
    pub assigned: usize,
    /// Decisions that matched the document's current folder.
    pub unchanged: usize,
    /// Documents parked in the fallback category.
    pub unsorted: usize,
    /// Documents no tier could decide and that were left where they were.
    pub unmatched: usize,
    /// Documents skipped because they were already filed.
    pub skipped: usize,
    pub ai_calls: usize,
    pub quota_pauses: usize,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}
