//! Wire models exchanged with the ticket backend.

/// Backend error bodies.
pub mod errors;
/// Push payloads that are not tickets or messages.
pub mod events;
/// Thread messages, drafts and uploads.
pub mod message;
/// Paginated collections.
pub mod page;
/// Tickets and ticket queries.
pub mod ticket;
/// Lenient instant codec.
pub mod timestamp;
/// Accounts, roles and the session viewer.
pub mod user;

pub use errors::ErrorResponse;
pub use events::{ViewStatusBlob, ViewUpdate};
pub use message::{AttachmentUpload, Message, MessageDraft, MessageId};
pub use page::Page;
pub use ticket::{NewTicket, SortOrder, Ticket, TicketId, TicketPage, TicketQuery, TicketStatus};
pub use timestamp::Timestamp;
pub use user::{
    CreateUserRequest, LoginRequest, Profile, ProfileUpdate, Role, UserId, UserPage, UserQuery,
    UserSummary, Viewer,
};
