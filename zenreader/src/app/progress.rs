use console::{Term, style};
use futures::stream::{BoxStream, StreamExt};

use zenreader_core::event::Listener;
use zenreader_core::organize::{DocumentAssigned, ItemFailed, OrganizeEvents, PipelineState, RunPhase};

/// Listener registrations for the duration of a run.
pub struct RunListeners {
    _assigned: Listener<DocumentAssigned>,
    _failed: Listener<ItemFailed>,
}

/// Renders organize progress on stderr: one status line that is rewritten in place, plus a
/// permanent line per filed document.
#[derive(Debug, Clone)]
pub struct ProgressRenderer {
    term: Option<Term>,
}

impl ProgressRenderer {
    pub fn stderr() -> Self {
        ProgressRenderer {
            term: Some(Term::stderr()),
        }
    }

    /// Renders nothing. For `--quiet` runs and tests.
    pub fn hidden() -> Self {
        ProgressRenderer { term: None }
    }

    pub fn listen(&self, events: &OrganizeEvents) -> Option<RunListeners> {
        let term = self.term.clone()?;
        let failed_term = term.clone();
        Some(RunListeners {
            _assigned: Listener::new(&events.document_assigned, move |event: &DocumentAssigned| {
                let _ = term.clear_line();
                let _ = term.write_line(&format!(
                    "  {} {} {} ({})",
                    style(&event.filename).bold(),
                    style("→").dim(),
                    style(&event.category).green(),
                    event.tier
                ));
            }),
            _failed: Listener::new(&events.item_failed, move |event: &ItemFailed| {
                let _ = failed_term.clear_line();
                let _ = failed_term.write_line(&format!(
                    "  {} {}: {}",
                    style("failed").red().bold(),
                    event.0.filename,
                    event.0.message
                ));
            }),
        })
    }

    /// Draws every progress snapshot until the stream ends.
    pub async fn follow(&self, mut updates: BoxStream<'static, PipelineState>) {
        while let Some(state) = updates.next().await {
            let Some(term) = &self.term else { continue };
            let _ = term.clear_line();
            let _ = term.write_str(&status_line(&state));
            if state.phase.is_finished() {
                let _ = term.clear_line();
            }
        }
    }
}

fn status_line(state: &PipelineState) -> String {
    let counter = format!("[{}/{}]", state.processed_count, state.total_count);
    let message = match state.phase {
        RunPhase::Paused => style(&state.status_message).yellow().to_string(),
        _ => state.status_message.clone(),
    };
    format!("{} {:>3.0}% {}", style(counter).cyan(), state.fraction() * 100.0, message)
}
