use shared::models::{Message, MessageDraft, MessageId, Ticket, TicketId, Timestamp};
use tracing::debug;

use crate::{
    api::{HistoryFilter, TicketApi},
    error::{FetchError, SendError},
};

/// The message thread of one open ticket.
///
/// Messages are kept in arrival order with at most one entry per id; a
/// repeated id replaces the earlier entry where it stands. Display order is
/// derived on demand by [`MessageThread::ordered`].
#[derive(Debug, Clone)]
pub struct MessageThread {
    ticket_id: TicketId,
    ticket: Option<Ticket>,
    messages: Vec<Message>,
    closed: bool,
}

impl MessageThread {
    /// Empty, open thread for `ticket_id`.
    #[must_use]
    pub const fn new(ticket_id: TicketId) -> Self {
        Self {
            ticket_id,
            ticket: None,
            messages: Vec::new(),
            closed: false,
        }
    }

    /// Ticket the thread belongs to.
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        self.ticket_id
    }

    /// The ticket itself, once fetched.
    #[must_use]
    pub const fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    /// Attach the fetched ticket. Its id must match the thread.
    pub fn set_ticket(&mut self, ticket: Ticket) {
        debug_assert_eq!(ticket.id, self.ticket_id);
        self.ticket = Some(ticket);
    }

    /// Messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True before any message arrived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True when `message_id` is already in the thread.
    #[must_use]
    pub fn contains(&self, message_id: MessageId) -> bool {
        self.messages.iter().any(|message| message.id == message_id)
    }

    /// Fetch the history and replace the thread with it.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the read; the thread is left as it was.
    pub async fn load_history(
        &mut self,
        api: &dyn TicketApi,
        filter: &HistoryFilter,
    ) -> Result<(), FetchError> {
        let messages = api.fetch_messages(self.ticket_id, filter).await?;
        self.apply_history(messages);
        Ok(())
    }

    /// Replace the whole set with a fetched history.
    pub fn apply_history(&mut self, history: Vec<Message>) {
        self.messages.clear();
        for message in history {
            self.upsert(message);
        }
        debug!(
            ticket_id = self.ticket_id,
            messages = self.messages.len(),
            "message history loaded"
        );
    }

    /// Merge a pushed or echoed message. Ignored once the thread is closed.
    pub fn apply_incoming(&mut self, message: Message) -> bool {
        if self.closed {
            debug!(
                ticket_id = self.ticket_id,
                message_id = message.id,
                "thread closed, dropping message"
            );
            return false;
        }
        self.upsert(message)
    }

    fn upsert(&mut self, message: Message) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|existing| existing.id == message.id)
        {
            Some(existing) if *existing == message => false,
            Some(existing) => {
                *existing = message;
                true
            }
            None => {
                self.messages.push(message);
                true
            }
        }
    }

    /// Post `draft` and merge the created message. The draft is only
    /// borrowed, so a failed send leaves it with the caller.
    ///
    /// # Errors
    ///
    /// Returns the [`SendError`] of the write. Nothing is retried.
    pub async fn send(
        &mut self,
        api: &dyn TicketApi,
        draft: &MessageDraft,
    ) -> Result<Message, SendError> {
        if draft.is_empty() {
            return Err(SendError::EmptyDraft);
        }
        let message = api.send_message(self.ticket_id, draft).await?;
        self.apply_incoming(message.clone());
        Ok(message)
    }

    /// Messages by creation time, ties broken by id. A missing timestamp
    /// counts as now.
    #[must_use]
    pub fn ordered(&self) -> Vec<&Message> {
        let now = Timestamp::now();
        let mut ordered: Vec<&Message> = self.messages.iter().collect();
        ordered.sort_by_key(|message| (message.created_or(now), message.id));
        ordered
    }

    /// Stop accepting pushed messages.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// True once [`Self::close`] was called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_implementations::MockTicketApi;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn at(seconds: i64) -> Timestamp {
        Timestamp(Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap())
    }

    fn message(id: MessageId, seconds: i64, body: &str) -> Message {
        Message {
            id,
            body: body.to_string(),
            attachments: Vec::new(),
            sender_id: 5,
            created_at: Some(at(seconds)),
            share: None,
        }
    }

    fn ordered_ids(thread: &MessageThread) -> Vec<MessageId> {
        thread.ordered().iter().map(|message| message.id).collect()
    }

    #[test]
    fn history_is_ordered_by_timestamp_not_arrival() {
        let mut thread = MessageThread::new(3);
        thread.apply_history(vec![message(1, 10, "later"), message(2, 5, "earlier")]);
        assert_eq!(ordered_ids(&thread), vec![2, 1]);
    }

    #[test]
    fn equal_timestamps_fall_back_to_id() {
        let mut thread = MessageThread::new(3);
        thread.apply_incoming(message(9, 0, "b"));
        thread.apply_incoming(message(4, 0, "a"));
        assert_eq!(ordered_ids(&thread), vec![4, 9]);
    }

    #[test]
    fn repeated_ids_collapse_to_the_last_copy() {
        let mut thread = MessageThread::new(3);
        thread.apply_incoming(message(1, 0, "first"));
        for copy in ["v1", "v2", "v3"] {
            thread.apply_incoming(message(7, 1, copy));
        }
        thread.apply_incoming(message(2, 2, "second"));

        assert_eq!(thread.len(), 3);
        let ids: Vec<_> = thread.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 7, 2]);
        assert_eq!(thread.messages()[1].body, "v3");
    }

    #[test]
    fn reapplying_the_same_message_is_a_no_op() {
        let mut thread = MessageThread::new(3);
        assert!(thread.apply_incoming(message(1, 0, "hi")));
        assert!(!thread.apply_incoming(message(1, 0, "hi")));
        assert_eq!(thread.len(), 1);
    }

    #[test]
    fn history_reload_replaces_the_set() {
        let mut thread = MessageThread::new(3);
        thread.apply_incoming(message(50, 0, "pushed"));
        thread.apply_history(vec![message(1, 0, "a"), message(2, 1, "b")]);
        assert!(!thread.contains(50));
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn closed_thread_ignores_pushes() {
        let mut thread = MessageThread::new(3);
        thread.close();
        assert!(!thread.apply_incoming(message(1, 0, "late")));
        assert!(thread.is_empty());
    }

    #[test]
    fn missing_timestamp_sorts_last() {
        let mut thread = MessageThread::new(3);
        let mut undated = message(1, 0, "undated");
        undated.created_at = None;
        thread.apply_incoming(undated);
        thread.apply_incoming(message(2, 0, "dated"));
        assert_eq!(ordered_ids(&thread), vec![2, 1]);
    }

    #[tokio::test]
    async fn send_then_echo_yields_one_message() {
        let api = MockTicketApi::with_page(Default::default());
        let mut thread = MessageThread::new(3);

        let sent = thread
            .send(&api, &MessageDraft::text("Tried restarting"))
            .await
            .unwrap();
        thread.apply_incoming(sent.clone());

        assert_eq!(thread.len(), 1);
        assert_eq!(thread.messages()[0], sent);
    }

    #[tokio::test]
    async fn echo_then_send_yields_one_message() {
        let api = MockTicketApi::with_page(Default::default());
        let mut thread = MessageThread::new(3);
        let expected_id = api.next_message_id.load(Ordering::SeqCst);
        let mut echo = message(expected_id, 0, "Tried restarting");
        echo.sender_id = 1;

        thread.apply_incoming(echo);
        let sent = thread
            .send(&api, &MessageDraft::text("Tried restarting"))
            .await
            .unwrap();

        assert_eq!(sent.id, expected_id);
        assert_eq!(thread.len(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_thread_and_draft_alone() {
        let api = MockTicketApi::with_page(Default::default());
        api.fail_writes.store(true, Ordering::SeqCst);
        let mut thread = MessageThread::new(3);
        let draft = MessageDraft::text("Still broken");

        let result = thread.send(&api, &draft).await;

        assert!(matches!(result, Err(SendError::Api(_))));
        assert!(thread.is_empty());
        assert_eq!(draft.body, "Still broken");
    }

    #[tokio::test]
    async fn blank_draft_is_rejected_locally() {
        let api = MockTicketApi::with_page(Default::default());
        let mut thread = MessageThread::new(3);
        let result = thread.send(&api, &MessageDraft::text("  ")).await;
        assert!(matches!(result, Err(SendError::EmptyDraft)));
        assert!(api.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_history_failure_keeps_messages() {
        let api = MockTicketApi::with_page(Default::default());
        let mut thread = MessageThread::new(3);
        thread.apply_incoming(message(1, 0, "kept"));
        api.fail_reads.store(true, Ordering::SeqCst);

        assert!(
            thread
                .load_history(&api, &HistoryFilter::default())
                .await
                .is_err()
        );
        assert_eq!(thread.len(), 1);
    }
}
