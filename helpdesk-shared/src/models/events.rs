use serde::{Deserialize, Serialize};

use super::TicketId;

/// Broadcast after any session marks a ticket as viewed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewUpdate {
    /// Ticket whose flags changed.
    pub ticket_id: TicketId,
    /// New owner flag.
    pub viewed_by_user: bool,
    /// New administrator flag.
    pub viewed_by_admin: bool,
}

/// Per-ticket view-status payload. Its shape is owned by the backend and it
/// is only logged on the client.
pub type ViewStatusBlob = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_view_update() {
        let update: ViewUpdate = serde_json::from_str(
            r#"{"ticketId":9,"viewedByUser":false,"viewedByAdmin":true}"#,
        )
        .unwrap();
        assert_eq!(
            update,
            ViewUpdate {
                ticket_id: 9,
                viewed_by_user: false,
                viewed_by_admin: true,
            }
        );
    }
}
