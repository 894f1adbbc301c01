use std::sync::Arc;

use super::sequencer::Settlement;
use crate::api::types::EmailSummary;
use crate::api::TransportError;

/// Ordered inbox summaries. Refreshes swap in a whole new snapshot, so a
/// reader holding an older `Arc` keeps iterating a complete list.
#[derive(Debug, Default)]
pub struct InboxIndex {
    emails: Arc<Vec<EmailSummary>>,
    generation: u64,
    pending: bool,
    error: Option<String>,
}

impl InboxIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Arc<Vec<EmailSummary>> {
        Arc::clone(&self.emails)
    }

    /// Issue side of a refresh; returns the generation the response must echo.
    pub fn begin_refresh(&mut self) -> u64 {
        self.generation += 1;
        self.pending = true;
        self.generation
    }

    /// Apply a refresh result. Only the newest refresh counts; on failure the
    /// previous list stays and the error flag is raised.
    pub fn apply(
        &mut self,
        generation: u64,
        result: Result<Vec<EmailSummary>, TransportError>,
    ) -> Settlement {
        if generation != self.generation || !self.pending {
            log::debug!(
                "[Inbox] discarding refresh #{} (latest #{})",
                generation,
                self.generation
            );
            return Settlement::Discarded;
        }
        self.pending = false;
        match result {
            Ok(emails) => {
                log::info!("[Inbox] loaded {} email(s)", emails.len());
                self.emails = Arc::new(emails);
                self.error = None;
                Settlement::Applied
            }
            Err(e) => {
                log::warn!("[Inbox] refresh failed: {}", e);
                self.error = Some(e.to_string());
                Settlement::Failed
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
