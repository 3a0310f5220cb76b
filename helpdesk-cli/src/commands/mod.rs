pub mod completion;
pub mod config;
pub mod session;
pub mod thread;
pub mod tickets;
pub mod users;

use client::ConnectionState;
use tokio::sync::watch;

/// Wait for the next push-session state change. Pends forever once the
/// session is gone so it can sit in a `select!` next to other sources.
pub(crate) async fn next_state(
    connection: &mut Option<watch::Receiver<ConnectionState>>,
) -> ConnectionState {
    if let Some(receiver) = connection.as_mut() {
        if receiver.changed().await.is_ok() {
            return *receiver.borrow_and_update();
        }
        *connection = None;
    }
    std::future::pending().await
}

pub(crate) fn describe_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting to live updates",
        ConnectionState::Connected => "live updates on",
        ConnectionState::Retrying => "live updates lost, retrying",
        ConnectionState::TornDown => "live updates off",
    }
}
