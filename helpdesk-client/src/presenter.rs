//! # Day grouping presenter
//!
//! Pure projections of a message thread into what a thread view renders:
//! calendar-day buckets with labels, per-message time labels, the side a
//! bubble sits on and attachment display names.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate};
use shared::models::{Message, Ticket, Viewer};

/// Messages of one local calendar day, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup<'a> {
    pub date: NaiveDate,
    pub label: String,
    pub messages: Vec<&'a Message>,
}

/// Which side of the conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Mine,
    Theirs,
}

/// Group `messages` by local day against the current clock.
#[must_use]
pub fn group(messages: &[Message]) -> Vec<DayGroup<'_>> {
    group_at(messages, Local::now())
}

/// Group `messages` by local day, with `now` standing in for both the
/// reference day and any missing creation time.
#[must_use]
pub fn group_at(messages: &[Message], now: DateTime<Local>) -> Vec<DayGroup<'_>> {
    let today = now.date_naive();
    let mut days: BTreeMap<NaiveDate, Vec<(DateTime<Local>, &Message)>> = BTreeMap::new();
    for message in messages {
        let at = message.created_at.map_or(now, |created| created.local());
        days.entry(at.date_naive()).or_default().push((at, message));
    }

    days.into_iter()
        .map(|(date, mut entries)| {
            entries.sort_by_key(|(at, message)| (*at, message.id));
            DayGroup {
                date,
                label: day_label(date, today),
                messages: entries.into_iter().map(|(_, message)| message).collect(),
            }
        })
        .collect()
}

/// `Today`, `Yesterday`, otherwise e.g. `Monday, Oct 13`.
#[must_use]
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%A, %b %-d").to_string()
    }
}

/// Local `HH:MM` of a message.
#[must_use]
pub fn time_label(message: &Message, now: DateTime<Local>) -> String {
    message
        .created_at
        .map_or(now, |created| created.local())
        .format("%H:%M")
        .to_string()
}

/// Which side of the conversation `message` is drawn on for `viewer`.
#[must_use]
pub fn side(viewer: &Viewer, ticket: &Ticket, message: &Message) -> Side {
    if viewer.owns_message(ticket, message) {
        Side::Mine
    } else {
        Side::Theirs
    }
}

/// Display name of an attachment: the last path segment of its URL.
#[must_use]
pub fn attachment_name(reference: &str) -> &str {
    let path = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference)
        .trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path)
}
