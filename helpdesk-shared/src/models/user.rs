use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::{Message, Page, Ticket};

/// Server-assigned identifier of a user or administrator account.
pub type UserId = i64;

/// The two kinds of session the desk knows about.
///
/// Every place that depends on "who is looking" (message ownership, which
/// view flag a session writes, which affordances it gets) matches on this
/// exhaustively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    /// End user who opens tickets.
    #[serde(rename = "ROLE_USER", alias = "USER", alias = "user")]
    User,
    /// Support staff answering tickets.
    #[serde(rename = "ROLE_ADMIN", alias = "ADMIN", alias = "admin")]
    Admin,
}

impl Role {
    /// Role name as the backend spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "ROLE_USER",
            Self::Admin => "ROLE_ADMIN",
        }
    }

    /// Whether sessions of this role may mirror replies to the external channel.
    #[must_use]
    pub const fn can_share(self) -> bool {
        match self {
            Self::User => false,
            Self::Admin => true,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Admin => "admin",
        })
    }
}

impl TryFrom<&str> for Role {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ROLE_USER" | "USER" => Ok(Self::User),
            "ROLE_ADMIN" | "ADMIN" => Ok(Self::Admin),
            _ => Err("invalid role"),
        }
    }
}

/// Read-only identity of the current session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewer {
    /// Kind of session.
    pub role: Role,
    /// Account behind the session.
    pub user_id: UserId,
}

impl Viewer {
    /// Identity for `user_id` acting as `role`.
    #[must_use]
    pub const fn new(role: Role, user_id: UserId) -> Self {
        Self { role, user_id }
    }

    /// A ticket is unread for this session when the flag it owns is unset.
    #[must_use]
    pub const fn is_unread(&self, ticket: &Ticket) -> bool {
        !ticket.viewed_by(self.role)
    }

    /// Whether `message` was written by this session's side of `ticket`.
    #[must_use]
    pub fn owns_message(&self, ticket: &Ticket, message: &Message) -> bool {
        match self.role {
            Role::User => message.sender_id == ticket.user_id,
            Role::Admin => ticket.admin_id == Some(message.sender_id),
        }
    }
}

/// Account profile returned by login and profile updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Account identifier.
    pub id: UserId,
    /// Login e-mail.
    pub email: String,
    /// Given name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Account role.
    pub role: Role,
}

impl Profile {
    /// Identity this profile acts as.
    #[must_use]
    pub const fn viewer(&self) -> Viewer {
        Viewer::new(self.role, self.id)
    }

    /// Full name, falling back to the e-mail.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(name), None) | (None, Some(name)) => name.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

/// Credentials for the login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Login e-mail.
    pub email: String,
    /// Plain-text password, sent over the session transport only.
    pub password: String,
    /// Ask for a long-lived session cookie.
    pub remember_me: bool,
}

/// Partial profile update; the role is never sent from the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New e-mail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// New given name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// New family name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// New password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// New account created by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    /// Login e-mail.
    pub email: String,
    /// Initial password.
    pub password: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Account role.
    pub role: Role,
}

/// One row of the user listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// Account identifier.
    pub id: UserId,
    /// Login e-mail.
    pub email: String,
    /// Given name, if set.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name, if set.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Account role.
    pub role: Role,
}

/// One page of the user listing.
pub type UserPage = Page<UserSummary>;

/// Paging and sorting for the administrator's user listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    /// Zero-based page number.
    pub page: u32,
    /// Accounts per page.
    pub size: u32,
    /// Field to sort by.
    pub sort_by: String,
    /// `asc` or `desc`.
    pub sort_dir: String,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: 10,
            sort_by: "id".to_string(),
            sort_dir: "asc".to_string(),
        }
    }
}

impl UserQuery {
    /// Query-string pairs for the listing endpoint.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("page", self.page.to_string()),
            ("size", self.size.to_string()),
            ("sortBy", self.sort_by.clone()),
            ("sortDir", self.sort_dir.clone()),
        ]
    }
}
