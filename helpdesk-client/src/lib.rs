#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # HelpDesk sync engine
//!
//! Reconciles paginated ticket snapshots fetched over HTTP with the live
//! event stream a STOMP broker pushes, producing one de-duplicated and
//! ordered view per screen.

pub mod api;
pub mod error;
pub mod presenter;
pub mod push;
pub mod screen;
pub mod stomp;
pub mod store;
pub mod view_status;

pub use api::{HelpDeskClient, HistoryFilter, TicketApi};
pub use error::{ApiError, FetchError, SendError, TransportError};
pub use push::{ConnectionState, PushSession, Subscription, Topic};
pub use screen::{ScreenEvent, TicketDetailScreen, TicketListScreen};
pub use store::{MessageThread, TicketBoard};
pub use view_status::ViewTracker;
