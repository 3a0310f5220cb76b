//! # Push channel
//!
//! One long-lived broker session per screen. The session subscribes every
//! registered topic on each (re)connect, routes incoming messages to their
//! handlers and retries forever with a fixed delay until it is closed or
//! dropped. Nothing is replayed across reconnects.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use shared::models::TicketId;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Broker destinations the backend publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every newly created ticket.
    NewTickets,
    /// View flag changes for any ticket.
    ViewUpdates,
    /// Messages posted to one ticket.
    TicketMessages(TicketId),
    /// Backend-defined view status blob for one ticket.
    TicketViewStatus(TicketId),
}

impl Topic {
    /// Broker destination path of the topic.
    #[must_use]
    pub fn destination(self) -> String {
        match self {
            Self::NewTickets => "/topic/tickets/new".to_string(),
            Self::ViewUpdates => "/topic/tickets/view-update".to_string(),
            Self::TicketMessages(id) => format!("/topic/tickets/{id}"),
            Self::TicketViewStatus(id) => format!("/topic/tickets/view-status/{id}"),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

type Handler = Arc<dyn Fn(&str) + Send + Sync>;

/// A topic paired with the reaction to run for each payload on it.
#[derive(Clone)]
pub struct Subscription {
    topic: Topic,
    destination: String,
    handler: Handler,
}

impl Subscription {
    /// Raw handler receiving the payload text.
    pub fn raw<F>(topic: Topic, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            topic,
            destination: topic.destination(),
            handler: Arc::new(handler),
        }
    }

    /// Handler receiving the payload decoded as `T`. Payloads that do not
    /// decode are logged and skipped.
    pub fn json<T, F>(topic: Topic, handler: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::raw(topic, move |payload| match serde_json::from_str::<T>(payload) {
            Ok(event) => handler(event),
            Err(err) => warn!(topic = %topic, error = %err, "dropping undecodable push payload"),
        })
    }

    /// Topic this subscription listens on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Connectivity of a [`PushSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet started.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done and every topic subscribed.
    Connected,
    /// Waiting out the reconnect delay after a failure.
    Retrying,
    /// Closed by its owner. Terminal.
    TornDown,
}

/// A payload delivered on one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Subscription id echoed by the broker, if any.
    pub subscription: Option<String>,
    /// Topic the payload was published to.
    pub destination: String,
    /// Raw payload text.
    pub body: String,
}

/// Opens broker connections. Implemented by the STOMP transport and by the
/// in-memory broker used in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection and complete the broker handshake.
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>, TransportError>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}

/// One established broker connection.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Subscribe `destination` under the client-chosen `id`.
    async fn subscribe(&mut self, id: &str, destination: &str) -> Result<(), TransportError>;

    /// Wait for the next payload. Any error ends the connection.
    async fn next_message(&mut self) -> Result<BrokerMessage, TransportError>;

    /// Release `subscription_ids` and disconnect. Best effort.
    async fn close(&mut self, subscription_ids: &[String]);
}

/// Handle to a running push session.
///
/// Dropping the handle cancels the session; [`PushSession::close`] does the
/// same and also waits for the broker goodbye to finish.
pub struct PushSession {
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl PushSession {
    /// Spawn the session task. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn open(
        connector: Arc<dyn Connector>,
        subscriptions: Vec<Subscription>,
        reconnect_delay: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let worker = SessionWorker {
            connector,
            subscriptions,
            reconnect_delay,
            cancel: cancel.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(worker.run());
        Self {
            cancel,
            state,
            task: Some(task),
        }
    }

    /// Latest published connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Tear the session down and wait until the broker has been told.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "push session task ended abnormally");
        }
    }
}

impl Drop for PushSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for PushSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum SessionEnd {
    Cancelled,
    Dropped(TransportError),
}

struct SessionWorker {
    connector: Arc<dyn Connector>,
    subscriptions: Vec<Subscription>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl SessionWorker {
    async fn run(self) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.state.send_replace(ConnectionState::Connecting);
            debug!(target_url = %self.connector.describe(), attempt, "connecting push session");

            match self.connect_and_listen().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Dropped(err) => {
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                        "push session dropped, reconnecting"
                    );
                }
            }

            self.state.send_replace(ConnectionState::Retrying);
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(self.reconnect_delay) => {}
            }
        }
        self.state.send_replace(ConnectionState::TornDown);
        info!(target_url = %self.connector.describe(), "push session closed");
    }

    async fn connect_and_listen(&self) -> SessionEnd {
        let connected = tokio::select! {
            () = self.cancel.cancelled() => return SessionEnd::Cancelled,
            connected = self.connector.connect() => connected,
        };
        let mut connection = match connected {
            Ok(connection) => connection,
            Err(err) => return SessionEnd::Dropped(err),
        };

        let mut ids = Vec::with_capacity(self.subscriptions.len());
        for (index, subscription) in self.subscriptions.iter().enumerate() {
            let id = format!("sub-{index}");
            if let Err(err) = connection.subscribe(&id, &subscription.destination).await {
                return SessionEnd::Dropped(err);
            }
            debug!(topic = %subscription.topic, subscription = %id, "subscribed");
            ids.push(id);
        }

        self.state.send_replace(ConnectionState::Connected);
        info!(
            target_url = %self.connector.describe(),
            topics = ids.len(),
            "push session connected"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    connection.close(&ids).await;
                    return SessionEnd::Cancelled;
                }
                message = connection.next_message() => match message {
                    Ok(message) => self.dispatch(&ids, &message),
                    Err(err) => return SessionEnd::Dropped(err),
                },
            }
        }
    }

    fn dispatch(&self, ids: &[String], message: &BrokerMessage) {
        let index = message
            .subscription
            .as_deref()
            .and_then(|id| ids.iter().position(|known| known == id))
            .or_else(|| {
                self.subscriptions
                    .iter()
                    .position(|subscription| subscription.destination == message.destination)
            });
        match index.and_then(|index| self.subscriptions.get(index)) {
            Some(subscription) => (subscription.handler)(&message.body),
            None => debug!(destination = %message.destination, "no handler for push message"),
        }
    }
}
