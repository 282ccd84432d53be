use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// A destructive or expensive action that needs the user's go-ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Re-classify every document, including ones already filed.
    ReorganizeAll { document_count: usize },
    /// Move every document back to the default folder.
    ResetAssignments { document_count: usize },
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::ReorganizeAll { document_count } => write!(
                f,
                "Re-scan and reorganize all {} documents? Existing assignments may change.",
                document_count
            ),
            Intent::ResetAssignments { document_count } => write!(
                f,
                "Move all {} documents back to Uncategorized?",
                document_count
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("Confirmation canceled by user")]
    Canceled,

    #[error("IO error during confirmation")]
    Io(#[from] std::io::Error),

    #[error("Async task failed")]
    Async(#[from] tokio::task::JoinError),

    #[error("Confirmation not supported in this environment")]
    NotSupported,
}

/// Asks whoever is driving the library whether an [`Intent`] may proceed.
///
/// The organizer never calls this itself; callers confirm before starting a run.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, intent: &Intent) -> Result<bool, ConfirmError>;
}

/// Accepts everything. Used for non-interactive invocations.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _intent: &Intent) -> Result<bool, ConfirmError> {
        Ok(true)
    }
}
