//! # View-status tracker
//!
//! Sends the read receipt for the open ticket. Remote view changes arrive
//! through the ticket board's `apply_view_update`; this side only writes.

use std::sync::Arc;

use shared::models::TicketId;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::TicketApi;

/// Debounced, fire-and-forget `POST tickets/{id}/view`.
pub struct ViewTracker {
    api: Arc<dyn TicketApi>,
    last_marked: Option<(TicketId, usize)>,
}

impl ViewTracker {
    /// Tracker that has not marked anything yet.
    #[must_use]
    pub fn new(api: Arc<dyn TicketApi>) -> Self {
        Self {
            api,
            last_marked: None,
        }
    }

    /// Mark `ticket_id` viewed for a thread of `message_count` messages.
    ///
    /// Returns `None` when the pair is unchanged since the previous call.
    /// Otherwise the receipt runs on its own task; failures are logged and
    /// never reach the caller.
    pub fn mark_viewed(&mut self, ticket_id: TicketId, message_count: usize) -> Option<JoinHandle<()>> {
        let pair = (ticket_id, message_count);
        if self.last_marked == Some(pair) {
            return None;
        }
        self.last_marked = Some(pair);

        let api = Arc::clone(&self.api);
        Some(tokio::spawn(async move {
            match api.mark_viewed(ticket_id).await {
                Ok(()) => debug!(ticket_id, message_count, "ticket marked viewed"),
                Err(err) => warn!(ticket_id, error = %err, "view receipt failed"),
            }
        }))
    }

    /// Forget the last receipt so the next call always fires.
    pub fn reset(&mut self) {
        self.last_marked = None;
    }
}

impl std::fmt::Debug for ViewTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewTracker")
            .field("last_marked", &self.last_marked)
            .finish_non_exhaustive()
    }
}
