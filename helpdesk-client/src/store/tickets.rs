use shared::models::{Ticket, TicketId, TicketPage, TicketQuery, ViewUpdate, Viewer};
use tracing::debug;

use crate::{api::TicketApi, error::FetchError};

/// The window of tickets a list screen shows, plus its pagination data.
#[derive(Debug, Clone)]
pub struct TicketBoard {
    viewer: Viewer,
    query: TicketQuery,
    page: TicketPage,
}

impl TicketBoard {
    /// Empty board for `viewer`, to be filled by the first fetch.
    #[must_use]
    pub fn new(viewer: Viewer, query: TicketQuery) -> Self {
        Self {
            viewer,
            query,
            page: TicketPage::default(),
        }
    }

    /// Whose perspective the unread flags are read from.
    #[must_use]
    pub const fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Filter and window the current content was fetched with.
    #[must_use]
    pub const fn query(&self) -> &TicketQuery {
        &self.query
    }

    /// The current page, including its paging metadata.
    #[must_use]
    pub const fn page(&self) -> &TicketPage {
        &self.page
    }

    /// Tickets in display order.
    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        &self.page.content
    }

    /// Look up a ticket on the current page.
    #[must_use]
    pub fn get(&self, ticket_id: TicketId) -> Option<&Ticket> {
        self.page.content.iter().find(|ticket| ticket.id == ticket_id)
    }

    fn position(&self, ticket_id: TicketId) -> Option<usize> {
        self.page
            .content
            .iter()
            .position(|ticket| ticket.id == ticket_id)
    }

    /// Fetch `query` and adopt the result. On failure the board keeps what
    /// it showed before.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the read.
    pub async fn load_page(
        &mut self,
        api: &dyn TicketApi,
        query: TicketQuery,
    ) -> Result<&TicketPage, FetchError> {
        let page = api.fetch_tickets(&query).await?;
        self.apply_page(query, page);
        Ok(&self.page)
    }

    /// Replace the window with a fetched page.
    pub fn apply_page(&mut self, query: TicketQuery, mut page: TicketPage) {
        let mut seen = Vec::with_capacity(page.content.len());
        page.content.retain(|ticket| {
            if seen.contains(&ticket.id) {
                false
            } else {
                seen.push(ticket.id);
                true
            }
        });
        debug!(
            page = page.number,
            total_pages = page.total_pages,
            tickets = page.content.len(),
            "ticket page loaded"
        );
        self.query = query;
        self.page = page;
    }

    /// React to a freshly created ticket.
    ///
    /// A ticket already on the board is replaced in place. A new one is
    /// prepended only on the first newest-first page and only if the active
    /// filter admits it; the window is then cut back to the page size.
    pub fn apply_new_ticket(&mut self, ticket: Ticket) -> bool {
        if let Some(index) = self.position(ticket.id) {
            if self.page.content[index] == ticket {
                return false;
            }
            self.page.content[index] = ticket;
            return true;
        }
        if !self.query.is_live_head() {
            debug!(ticket_id = ticket.id, "new ticket outside the live head, not shown");
            return false;
        }
        if !self.query.admits(&ticket, &self.viewer) {
            debug!(ticket_id = ticket.id, "new ticket excluded by the active filter");
            return false;
        }
        self.page.content.insert(0, ticket);
        self.page.total_elements += 1;
        let limit = usize::try_from(self.query.size).unwrap_or(usize::MAX);
        self.page.content.truncate(limit);
        true
    }

    /// Overwrite both view flags of a ticket on the board.
    pub fn apply_view_update(&mut self, update: &ViewUpdate) -> bool {
        let Some(index) = self.position(update.ticket_id) else {
            return false;
        };
        let ticket = &mut self.page.content[index];
        let changed = ticket.viewed_by_user != update.viewed_by_user
            || ticket.viewed_by_admin != update.viewed_by_admin;
        ticket.viewed_by_user = update.viewed_by_user;
        ticket.viewed_by_admin = update.viewed_by_admin;
        changed
    }

    /// Swap in an updated ticket without moving it.
    pub fn apply_status_update(&mut self, updated: Ticket) -> bool {
        match self.position(updated.id) {
            Some(index) if self.page.content[index] != updated => {
                self.page.content[index] = updated;
                true
            }
            _ => false,
        }
    }

    /// Tickets on the board the viewer has not opened yet.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.page
            .content
            .iter()
            .filter(|ticket| self.viewer.is_unread(ticket))
            .count()
    }
}
