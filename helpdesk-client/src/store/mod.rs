//! # Reconciliation stores
//!
//! Each store merges one fetched snapshot with the push events that arrive
//! after it. Stores are plain owned state; the screen that owns a store is
//! its only writer.

/// Message thread of one ticket.
pub mod messages;
/// Ticket board of the list screen.
pub mod tickets;

pub use messages::MessageThread;
pub use tickets::TicketBoard;
