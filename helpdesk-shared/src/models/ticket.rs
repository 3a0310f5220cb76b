use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::{AttachmentUpload, Page, Role, Timestamp, UserId, Viewer};

/// Server-assigned ticket identifier.
pub type TicketId = i64;

/// Lifecycle status of a ticket.
///
/// The backend is not consistent about casing (`"Active"` comes back from
/// some update paths), so every variant accepts its capitalised spellings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Opened, nobody picked it up yet.
    #[serde(alias = "Pending", alias = "PENDING")]
    Pending,
    /// Being worked on.
    #[serde(alias = "Active", alias = "ACTIVE")]
    Active,
    /// Resolved.
    #[serde(alias = "Completed", alias = "COMPLETED")]
    Completed,
    /// Needs attention first.
    #[serde(alias = "Urgent", alias = "URGENT")]
    Urgent,
}

impl TicketStatus {
    /// Every status, in menu order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Active, Self::Completed, Self::Urgent];

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Urgent => "urgent",
        }
    }
}

impl Display for TicketStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!("unknown ticket status `{value}` (expected pending, active, completed or urgent)")
            })
    }
}

/// A support request thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Ticket identifier.
    pub id: TicketId,
    /// Short subject line.
    pub header: String,
    /// Lifecycle status.
    pub status: TicketStatus,
    /// When the ticket was opened.
    pub created_at: Timestamp,
    /// Account that opened the ticket.
    pub user_id: UserId,
    /// Unset until an administrator picks the ticket up.
    #[serde(default)]
    pub admin_id: Option<UserId>,
    /// The owner saw the latest message.
    #[serde(default)]
    pub viewed_by_user: bool,
    /// The assigned administrator saw the latest message.
    #[serde(default)]
    pub viewed_by_admin: bool,
}

impl Ticket {
    /// The view flag owned by `role`.
    #[must_use]
    pub const fn viewed_by(&self, role: Role) -> bool {
        match role {
            Role::User => self.viewed_by_user,
            Role::Admin => self.viewed_by_admin,
        }
    }

    /// Set the view flag owned by `role`.
    pub const fn set_viewed_by(&mut self, role: Role, viewed: bool) {
        match role {
            Role::User => self.viewed_by_user = viewed,
            Role::Admin => self.viewed_by_admin = viewed,
        }
    }
}

/// One page of the ticket collection.
pub type TicketPage = Page<Ticket>;

/// Creation-date order of a ticket listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

impl SortOrder {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "oldest" => Ok(Self::Asc),
            "desc" | "latest" => Ok(Self::Desc),
            other => Err(format!("unknown sort order `{other}` (expected asc or desc)")),
        }
    }
}

/// Filter, sort and window for a ticket collection read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketQuery {
    /// Zero-based page number.
    pub page: u32,
    /// Tickets per page.
    pub size: u32,
    /// Only tickets in this status.
    pub status: Option<TicketStatus>,
    /// Substring the header must contain.
    pub header: Option<String>,
    /// Creation-date order.
    pub sort_by_date: SortOrder,
    /// Restrict to tickets the session has not seen yet.
    pub unread_only: bool,
}

impl Default for TicketQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: 10,
            status: None,
            header: None,
            sort_by_date: SortOrder::Desc,
            unread_only: false,
        }
    }
}

impl TicketQuery {
    /// Default query with a page of `size` tickets.
    #[must_use]
    pub fn with_size(size: u32) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Query-string pairs in the shape the collection endpoint expects.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("page", self.page.to_string()),
            ("size", self.size.to_string()),
            ("sortByDate", self.sort_by_date.as_str().to_string()),
        ];
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(header) = self.header.as_deref().filter(|h| !h.trim().is_empty()) {
            pairs.push(("header", header.to_string()));
        }
        if self.unread_only {
            pairs.push(("unread", "true".to_string()));
        }
        pairs
    }

    /// Whether this window is the head of a newest-first listing, the only
    /// place a freshly created ticket can be placed without a refetch.
    #[must_use]
    pub const fn is_live_head(&self) -> bool {
        self.page == 0 && matches!(self.sort_by_date, SortOrder::Desc)
    }

    /// Client-side evaluation of the active filter for `ticket`.
    #[must_use]
    pub fn admits(&self, ticket: &Ticket, viewer: &Viewer) -> bool {
        if self.status.is_some_and(|status| status != ticket.status) {
            return false;
        }
        if let Some(needle) = self.header.as_deref().map(str::trim).filter(|h| !h.is_empty())
            && !ticket
                .header
                .to_lowercase()
                .contains(&needle.to_lowercase())
        {
            return false;
        }
        !self.unread_only || viewer.is_unread(ticket)
    }
}

/// Opening message of a new ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTicket {
    pub header: String,
    pub message: String,
    pub share: bool,
    pub files: Vec<AttachmentUpload>,
}
