use crate::classify::Tier;
use crate::event::{define_event_listeners, Event};
use crate::library::{DocumentId, FolderId};

use super::state::{ItemFailure, PipelineState};

#[derive(Debug, Clone)]
pub struct ProgressUpdated(pub PipelineState);

impl Event for ProgressUpdated {}

#[derive(Debug, Clone)]
pub struct DocumentAssigned {
    pub document_id: DocumentId,
    pub filename: String,
    pub folder_id: FolderId,
    pub category: String,
    pub tier: Tier,
}

impl Event for DocumentAssigned {}

#[derive(Debug, Clone)]
pub struct ItemFailed(pub ItemFailure);

impl Event for ItemFailed {}

define_event_listeners!(
    /// Listener lists for everything an organize run reports.
    OrganizeEvents {
        progress: ProgressUpdated,
        document_assigned: DocumentAssigned,
        item_failed: ItemFailed,
    }
);
