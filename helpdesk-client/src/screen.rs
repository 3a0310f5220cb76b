//! # Screen drivers
//!
//! A screen owns one store, one push session and one cancellation token.
//! Push handlers only decode and forward; every store mutation happens in
//! the screen through `&mut self`, so events queue behind an in-flight
//! fetch instead of interleaving with it.

use std::{sync::Arc, time::Duration};

use shared::models::{
    Message, MessageDraft, Ticket, TicketId, TicketQuery, TicketStatus, ViewStatusBlob,
    ViewUpdate, Viewer,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::{HistoryFilter, TicketApi},
    error::{FetchError, SendError},
    presenter::{self, DayGroup},
    push::{ConnectionState, Connector, PushSession, Subscription, Topic},
    store::{MessageThread, TicketBoard},
    view_status::ViewTracker,
};

/// A push event, decoded and addressed to a screen.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
    /// A ticket was opened and pushed to the board topic.
    TicketCreated(Ticket),
    /// A ticket's status or viewed flags changed.
    ViewUpdated(ViewUpdate),
    /// A new message was pushed for the open ticket.
    MessageArrived(Message),
    /// Opaque view-status payload, logged only.
    ViewStatus(ViewStatusBlob),
}

fn forward<T, F>(
    topic: Topic,
    events: &mpsc::UnboundedSender<ScreenEvent>,
    wrap: F,
) -> Subscription
where
    T: serde::de::DeserializeOwned + 'static,
    F: Fn(T) -> ScreenEvent + Send + Sync + 'static,
{
    let events = events.clone();
    Subscription::json(topic, move |payload: T| {
        if events.send(wrap(payload)).is_err() {
            debug!(topic = %topic, "screen gone, push event discarded");
        }
    })
}

/// Run `fetch` unless `cancel` fires first.
async fn guarded<T, E, Fut>(cancel: &CancellationToken, fetch: Fut, cancelled: E) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        () = cancel.cancelled() => Err(cancelled),
        result = fetch => {
            if cancel.is_cancelled() {
                Err(cancelled)
            } else {
                result
            }
        }
    }
}

/// The ticket collection page.
pub struct TicketListScreen {
    api: Arc<dyn TicketApi>,
    board: TicketBoard,
    events: mpsc::UnboundedReceiver<ScreenEvent>,
    session: Option<PushSession>,
    cancel: CancellationToken,
}

impl TicketListScreen {
    /// Create the screen and start its push session on the new-ticket and
    /// view-update topics. Nothing is fetched until [`Self::load`].
    #[must_use]
    pub fn open(
        api: Arc<dyn TicketApi>,
        connector: Arc<dyn Connector>,
        viewer: Viewer,
        query: TicketQuery,
        reconnect_delay: Duration,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let subscriptions = vec![
            forward(Topic::NewTickets, &tx, ScreenEvent::TicketCreated),
            forward(Topic::ViewUpdates, &tx, ScreenEvent::ViewUpdated),
        ];
        let session = PushSession::open(connector, subscriptions, reconnect_delay);
        Self {
            api,
            board: TicketBoard::new(viewer, query),
            events,
            session: Some(session),
            cancel: CancellationToken::new(),
        }
    }

    /// Tickets currently shown.
    #[must_use]
    pub const fn board(&self) -> &TicketBoard {
        &self.board
    }

    /// Token that navigates away from the screen when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for the push session's connection state.
    #[must_use]
    pub fn connection(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.session.as_ref().map(PushSession::watch_state)
    }

    /// Fetch `query` into the board.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when the screen was closed mid-flight,
    /// otherwise the read error. The board is untouched in both cases.
    pub async fn load(&mut self, query: TicketQuery) -> Result<(), FetchError> {
        let page = guarded(
            &self.cancel,
            self.api.fetch_tickets(&query),
            FetchError::Cancelled,
        )
        .await?;
        self.board.apply_page(query, page);
        Ok(())
    }

    /// Re-fetch the current window.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub async fn reload(&mut self) -> Result<(), FetchError> {
        let query = self.board.query().clone();
        self.load(query).await
    }

    /// Wait for the next push event. `None` once the screen is closed.
    pub async fn next_event(&mut self) -> Option<ScreenEvent> {
        tokio::select! {
            () = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Merge one event into the board; `true` when the view changed.
    pub fn apply(&mut self, event: ScreenEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match event {
            ScreenEvent::TicketCreated(ticket) => self.board.apply_new_ticket(ticket),
            ScreenEvent::ViewUpdated(update) => self.board.apply_view_update(&update),
            ScreenEvent::MessageArrived(_) | ScreenEvent::ViewStatus(_) => false,
        }
    }

    /// Apply every queued event without waiting. Returns how many changed
    /// the view.
    pub fn drain(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(event) = self.events.try_recv() {
            if self.apply(event) {
                changed += 1;
            }
        }
        changed
    }

    /// Persist a new status for a ticket on the board.
    ///
    /// # Errors
    ///
    /// Returns the [`SendError`] of the write; the board keeps the old status.
    pub async fn set_status(
        &mut self,
        ticket_id: TicketId,
        status: TicketStatus,
    ) -> Result<bool, SendError> {
        let Some(mut ticket) = self.board.get(ticket_id).cloned() else {
            return Ok(false);
        };
        ticket.status = status;
        let updated = guarded(
            &self.cancel,
            self.api.update_ticket(&ticket),
            SendError::Cancelled,
        )
        .await?;
        Ok(self.board.apply_status_update(updated))
    }

    /// Leave the screen: pending fetches are abandoned and the push session
    /// is torn down.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        info!("ticket list closed");
    }
}

impl Drop for TicketListScreen {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One ticket's thread.
pub struct TicketDetailScreen {
    api: Arc<dyn TicketApi>,
    viewer: Viewer,
    thread: MessageThread,
    tracker: ViewTracker,
    receipts: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedReceiver<ScreenEvent>,
    session: Option<PushSession>,
    cancel: CancellationToken,
}

impl TicketDetailScreen {
    /// Create the screen and subscribe to the ticket's message and
    /// view-status topics.
    #[must_use]
    pub fn open(
        api: Arc<dyn TicketApi>,
        connector: Arc<dyn Connector>,
        viewer: Viewer,
        ticket_id: TicketId,
        reconnect_delay: Duration,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let subscriptions = vec![
            forward(
                Topic::TicketMessages(ticket_id),
                &tx,
                ScreenEvent::MessageArrived,
            ),
            forward(
                Topic::TicketViewStatus(ticket_id),
                &tx,
                ScreenEvent::ViewStatus,
            ),
        ];
        let session = PushSession::open(connector, subscriptions, reconnect_delay);
        Self {
            tracker: ViewTracker::new(Arc::clone(&api)),
            api,
            viewer,
            thread: MessageThread::new(ticket_id),
            receipts: Vec::new(),
            events,
            session: Some(session),
            cancel: CancellationToken::new(),
        }
    }

    /// Messages currently shown.
    #[must_use]
    pub const fn thread(&self) -> &MessageThread {
        &self.thread
    }

    /// Who is looking at the thread.
    #[must_use]
    pub const fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Token that navigates away from the screen when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receiver for the push session's connection state.
    #[must_use]
    pub fn connection(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.session.as_ref().map(PushSession::watch_state)
    }

    /// Fetch the ticket and its history, then mark it viewed.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] when the screen was closed mid-flight,
    /// otherwise the first read error. The thread is untouched in both
    /// cases.
    pub async fn load(&mut self, filter: &HistoryFilter) -> Result<(), FetchError> {
        let ticket_id = self.thread.ticket_id();
        let ticket = guarded(
            &self.cancel,
            self.api.get_ticket(ticket_id),
            FetchError::Cancelled,
        )
        .await?;
        let history = guarded(
            &self.cancel,
            self.api.fetch_messages(ticket_id, filter),
            FetchError::Cancelled,
        )
        .await?;
        self.thread.set_ticket(ticket);
        self.thread.apply_history(history);
        self.mark_viewed();
        Ok(())
    }

    /// Wait for the next push event. `None` once the screen is closed.
    pub async fn next_event(&mut self) -> Option<ScreenEvent> {
        tokio::select! {
            () = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Merge one event into the thread; `true` when the view changed.
    pub fn apply(&mut self, event: ScreenEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match event {
            ScreenEvent::MessageArrived(message) => {
                let changed = self.thread.apply_incoming(message);
                if changed {
                    self.mark_viewed();
                }
                changed
            }
            ScreenEvent::ViewStatus(status) => {
                debug!(ticket_id = self.thread.ticket_id(), %status, "view status");
                false
            }
            ScreenEvent::TicketCreated(_) | ScreenEvent::ViewUpdated(_) => false,
        }
    }

    /// Apply every queued event without waiting.
    pub fn drain(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(event) = self.events.try_recv() {
            if self.apply(event) {
                changed += 1;
            }
        }
        changed
    }

    /// Post `draft`. The created message is merged like a pushed one, so a
    /// later echo of it changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the [`SendError`] of the write; the draft stays with the
    /// caller.
    pub async fn send(&mut self, draft: &MessageDraft) -> Result<Message, SendError> {
        if draft.is_empty() {
            return Err(SendError::EmptyDraft);
        }
        let message = guarded(
            &self.cancel,
            self.api.send_message(self.thread.ticket_id(), draft),
            SendError::Cancelled,
        )
        .await?;
        if self.thread.apply_incoming(message.clone()) {
            self.mark_viewed();
        }
        Ok(message)
    }

    /// Persist a new status for the open ticket.
    ///
    /// # Errors
    ///
    /// Returns the [`SendError`] of the write.
    pub async fn set_status(&mut self, status: TicketStatus) -> Result<Option<&Ticket>, SendError> {
        let Some(mut ticket) = self.thread.ticket().cloned() else {
            return Ok(None);
        };
        ticket.status = status;
        let updated = guarded(
            &self.cancel,
            self.api.update_ticket(&ticket),
            SendError::Cancelled,
        )
        .await?;
        self.thread.set_ticket(updated);
        Ok(self.thread.ticket())
    }

    /// Day buckets of the thread, ready to render.
    #[must_use]
    pub fn groups(&self) -> Vec<DayGroup<'_>> {
        presenter::group(self.thread.messages())
    }

    fn mark_viewed(&mut self) {
        self.receipts.retain(|receipt| !receipt.is_finished());
        if let Some(receipt) = self
            .tracker
            .mark_viewed(self.thread.ticket_id(), self.thread.len())
        {
            self.receipts.push(receipt);
        }
    }

    /// Wait for outstanding read receipts to finish.
    pub async fn settle_receipts(&mut self) {
        let ticket_id = self.thread.ticket_id();
        for receipt in self.receipts.drain(..) {
            if let Err(err) = receipt.await {
                warn!(ticket_id, error = %err, "read receipt task failed");
            }
        }
    }

    /// Leave the screen: pending fetches are abandoned, later pushes are
    /// ignored and the push session is torn down.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.thread.close();
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        info!(ticket_id = self.thread.ticket_id(), "ticket detail closed");
    }
}

impl Drop for TicketDetailScreen {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::test_implementations::MockTicketApi, push::memory::MemoryBroker};
    use chrono::{TimeZone, Utc};
    use shared::models::{Role, TicketPage, Timestamp};
    use std::sync::atomic::Ordering;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);
    const DELAY: Duration = Duration::from_millis(20);

    fn ticket(id: TicketId, status: TicketStatus) -> Ticket {
        Ticket {
            id,
            header: format!("Ticket {id}"),
            status,
            created_at: Timestamp(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
            user_id: 5,
            admin_id: Some(9),
            viewed_by_user: false,
            viewed_by_admin: false,
        }
    }

    fn page(content: Vec<Ticket>) -> TicketPage {
        TicketPage {
            total_elements: content.len() as u64,
            content,
            total_pages: 1,
            number: 0,
            size: 5,
        }
    }

    async fn connected(connection: Option<watch::Receiver<ConnectionState>>) {
        let mut state = connection.expect("session open");
        timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();
    }

    fn message(id: i64, body: &str) -> Message {
        Message {
            id,
            body: body.to_string(),
            attachments: Vec::new(),
            sender_id: 5,
            created_at: Some(Timestamp::now()),
            share: None,
        }
    }

    #[tokio::test]
    async fn pushed_ticket_reaches_the_board() {
        let api = Arc::new(MockTicketApi::with_page(page(vec![ticket(1, TicketStatus::Active)])));
        let broker = MemoryBroker::new();
        let mut screen = TicketListScreen::open(
            api,
            Arc::new(broker.clone()),
            Viewer::new(Role::Admin, 9),
            TicketQuery::with_size(5),
            DELAY,
        );
        screen.load(TicketQuery::with_size(5)).await.unwrap();
        connected(screen.connection()).await;

        let fresh = ticket(2, TicketStatus::Pending);
        assert!(broker.publish(
            "/topic/tickets/new",
            &serde_json::to_string(&fresh).unwrap()
        ));
        let event = timeout(WAIT, screen.next_event()).await.unwrap().unwrap();
        assert!(screen.apply(event));

        let ids: Vec<_> = screen.board().tickets().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1]);
        screen.close().await;
        assert_eq!(broker.disconnects(), 1);
    }

    #[tokio::test]
    async fn view_update_event_flips_flags() {
        let api = Arc::new(MockTicketApi::with_page(page(vec![ticket(1, TicketStatus::Active)])));
        let broker = MemoryBroker::new();
        let mut screen = TicketListScreen::open(
            api,
            Arc::new(broker.clone()),
            Viewer::new(Role::User, 5),
            TicketQuery::with_size(5),
            DELAY,
        );
        screen.load(TicketQuery::with_size(5)).await.unwrap();
        connected(screen.connection()).await;

        broker.publish(
            "/topic/tickets/view-update",
            r#"{"ticketId":1,"viewedByUser":true,"viewedByAdmin":true}"#,
        );
        let event = timeout(WAIT, screen.next_event()).await.unwrap().unwrap();
        assert!(screen.apply(event));
        assert_eq!(screen.board().unread_count(), 0);
        screen.close().await;
    }

    #[tokio::test]
    async fn cancelled_fetch_leaves_the_board_alone() {
        let api = Arc::new(MockTicketApi::with_page(page(vec![ticket(1, TicketStatus::Active)])));
        let mut screen = TicketListScreen::open(
            api.clone(),
            Arc::new(MemoryBroker::new()),
            Viewer::new(Role::Admin, 9),
            TicketQuery::with_size(5),
            DELAY,
        );
        let gate = api.gate_reads();
        let token = screen.cancellation_token();

        let (result, ()) = tokio::join!(screen.load(TicketQuery::with_size(5)), async {
            token.cancel();
            gate.notify_one();
        });

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(screen.board().tickets().is_empty());
        assert!(screen.next_event().await.is_none());
    }

    #[tokio::test]
    async fn failed_reload_keeps_stale_tickets() {
        let api = Arc::new(MockTicketApi::with_page(page(vec![ticket(1, TicketStatus::Active)])));
        let mut screen = TicketListScreen::open(
            api.clone(),
            Arc::new(MemoryBroker::new()),
            Viewer::new(Role::Admin, 9),
            TicketQuery::with_size(5),
            DELAY,
        );
        screen.load(TicketQuery::with_size(5)).await.unwrap();
        api.fail_reads.store(true, Ordering::SeqCst);

        assert!(matches!(screen.reload().await, Err(FetchError::Api(_))));
        assert_eq!(screen.board().tickets().len(), 1);
        screen.close().await;
    }

    #[tokio::test]
    async fn status_change_is_applied_in_place() {
        let api = Arc::new(MockTicketApi::with_page(page(vec![
            ticket(2, TicketStatus::Active),
            ticket(1, TicketStatus::Active),
        ])));
        let mut screen = TicketListScreen::open(
            api,
            Arc::new(MemoryBroker::new()),
            Viewer::new(Role::Admin, 9),
            TicketQuery::with_size(5),
            DELAY,
        );
        screen.load(TicketQuery::with_size(5)).await.unwrap();

        assert!(screen.set_status(1, TicketStatus::Completed).await.unwrap());
        let tickets = screen.board().tickets();
        assert_eq!(tickets[1].id, 1);
        assert_eq!(tickets[1].status, TicketStatus::Completed);
        screen.close().await;
    }

    #[tokio::test]
    async fn detail_load_marks_viewed_once_per_count() {
        let api = Arc::new(MockTicketApi::default());
        api.insert_ticket(ticket(4, TicketStatus::Active));
        api.set_history(4, vec![message(1, "hello"), message(2, "again")]);
        let mut screen = TicketDetailScreen::open(
            api.clone(),
            Arc::new(MemoryBroker::new()),
            Viewer::new(Role::User, 5),
            4,
            DELAY,
        );

        screen.load(&HistoryFilter::default()).await.unwrap();
        screen.settle_receipts().await;
        screen.load(&HistoryFilter::default()).await.unwrap();
        screen.settle_receipts().await;

        assert_eq!(screen.thread().len(), 2);
        assert_eq!(api.view_calls(), vec![4]);
        screen.close().await;
    }

    #[tokio::test]
    async fn pushed_message_and_send_echo_converge() {
        let api = Arc::new(MockTicketApi::with_page(TicketPage::default()));
        api.insert_ticket(ticket(4, TicketStatus::Active));
        let broker = MemoryBroker::new();
        let mut screen = TicketDetailScreen::open(
            api.clone(),
            Arc::new(broker.clone()),
            Viewer::new(Role::User, 5),
            4,
            DELAY,
        );
        screen.load(&HistoryFilter::default()).await.unwrap();
        connected(screen.connection()).await;

        let sent = screen.send(&MessageDraft::text("It works now")).await.unwrap();
        broker.publish("/topic/tickets/4", &serde_json::to_string(&sent).unwrap());
        let event = timeout(WAIT, screen.next_event()).await.unwrap().unwrap();
        screen.apply(event);

        assert_eq!(screen.thread().len(), 1);
        assert_eq!(screen.thread().messages()[0].id, sent.id);
        screen.settle_receipts().await;
        assert_eq!(api.view_calls(), vec![4, 4]);

        broker.publish(
            "/topic/tickets/4",
            &serde_json::to_string(&message(77, "admin reply")).unwrap(),
        );
        let event = timeout(WAIT, screen.next_event()).await.unwrap().unwrap();
        assert!(screen.apply(event));
        assert_eq!(screen.groups().iter().map(|g| g.messages.len()).sum::<usize>(), 2);
        screen.close().await;
    }

    #[tokio::test]
    async fn view_status_blob_is_only_logged() {
        let api = Arc::new(MockTicketApi::default());
        api.insert_ticket(ticket(4, TicketStatus::Active));
        let broker = MemoryBroker::new();
        let mut screen = TicketDetailScreen::open(
            api,
            Arc::new(broker.clone()),
            Viewer::new(Role::Admin, 9),
            4,
            DELAY,
        );
        connected(screen.connection()).await;

        broker.publish("/topic/tickets/view-status/4", r#"{"viewedByAdmin":true}"#);
        let event = timeout(WAIT, screen.next_event()).await.unwrap().unwrap();
        assert!(matches!(event, ScreenEvent::ViewStatus(_)));
        assert!(!screen.apply(event));

        broker.publish("/topic/tickets/view-status/4", r#"{"viewedByUser":true}"#);
        timeout(WAIT, async {
            while screen.events.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(screen.drain(), 0);
        assert!(screen.thread().is_empty());
        screen.close().await;
    }

    #[tokio::test]
    async fn panicked_receipt_does_not_block_settling() {
        let api = Arc::new(MockTicketApi::default());
        api.insert_ticket(ticket(4, TicketStatus::Active));
        let mut screen = TicketDetailScreen::open(
            api,
            Arc::new(MemoryBroker::new()),
            Viewer::new(Role::User, 5),
            4,
            DELAY,
        );
        screen
            .receipts
            .push(tokio::spawn(async { panic!("receipt task blew up") }));
        screen.receipts.push(tokio::spawn(async {}));

        timeout(WAIT, screen.settle_receipts()).await.unwrap();
        assert!(screen.receipts.is_empty());
        screen.close().await;
    }

    #[tokio::test]
    async fn failed_send_is_surfaced_and_thread_unchanged() {
        let api = Arc::new(MockTicketApi::default());
        api.insert_ticket(ticket(4, TicketStatus::Active));
        let mut screen = TicketDetailScreen::open(
            api.clone(),
            Arc::new(MemoryBroker::new()),
            Viewer::new(Role::User, 5),
            4,
            DELAY,
        );
        screen.load(&HistoryFilter::default()).await.unwrap();
        api.fail_writes.store(true, Ordering::SeqCst);

        let draft = MessageDraft::text("retry me");
        assert!(screen.send(&draft).await.is_err());
        assert!(screen.thread().is_empty());
        screen.close().await;
    }
}
