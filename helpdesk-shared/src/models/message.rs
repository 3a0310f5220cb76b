use serde::{Deserialize, Deserializer, Serialize};

use super::{Timestamp, UserId};

/// Server-assigned message identifier, unique within its ticket.
pub type MessageId = i64;

/// One immutable entry of a ticket thread.
///
/// The owning ticket id is not part of the payload; whoever fetched or
/// subscribed to the thread knows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Message text, possibly empty when only files were sent.
    #[serde(rename = "message")]
    pub body: String,
    /// Attachment URLs in upload order.
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Account that wrote the message.
    pub sender_id: UserId,
    /// Creation time, when the payload carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Whether the message was mirrored to the external chat channel.
    #[serde(
        default,
        deserialize_with = "lenient_flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub share: Option<bool>,
}

impl Message {
    /// Creation time, or `fallback` when the payload carried none.
    #[must_use]
    pub fn created_or(&self, fallback: Timestamp) -> Timestamp {
        self.created_at.unwrap_or(fallback)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Text(String),
}

/// Accepts `true`, `"true"`, `"TRUE"` and friends; the share flag travels
/// as a multipart string field and comes back either way.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FlagRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(FlagRepr::Bool(flag)) => Ok(Some(flag)),
        Some(FlagRepr::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            "" => Ok(None),
            other => Err(serde::de::Error::custom(format!(
                "invalid share flag `{other}`"
            ))),
        },
    }
}

/// A file to upload alongside a message or a new ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    /// Name shown to the other side.
    pub file_name: String,
    /// MIME type; guessed from the name when absent.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Unsent message as composed by the session.
///
/// Sending borrows the draft so the caller still has it when the send fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    /// Message text.
    pub body: String,
    /// Files to upload with the message.
    pub attachments: Vec<AttachmentUpload>,
    /// Mirror the reply to the external chat channel.
    pub share: bool,
}

impl MessageDraft {
    /// Draft carrying only text.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Nothing worth sending: blank text and no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.attachments.is_empty()
    }
}
