//! Date labels for rendering a message log.
//!
//! Messages are grouped under `Today` / `Yesterday` / `DD/MM/YYYY` labels
//! computed in the viewer's local time. "Today" is passed in explicitly so
//! the functions stay pure and testable.

use chat_types::Message;
use chrono::{Duration, FixedOffset, NaiveDate};

/// The label for a message dated `date`, given the viewer's `today`.
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".into()
    } else if date == today - Duration::days(1) {
        "Yesterday".into()
    } else {
        date.format("%d/%m/%Y").to_string()
    }
}

/// Pair each message with the date label to show above it.
///
/// A label appears only where it differs from the previous message's
/// label, so consecutive same-day messages share one header.
pub fn labeled<'a>(
    messages: &'a [Message],
    offset: FixedOffset,
    today: NaiveDate,
) -> Vec<(Option<String>, &'a Message)> {
    let mut previous: Option<String> = None;
    messages
        .iter()
        .map(|message| {
            let local_date = message.created_at.with_timezone(&offset).date_naive();
            let label = date_label(local_date, today);
            let show = previous.as_deref() != Some(label.as_str());
            previous = Some(label.clone());
            (show.then_some(label), message)
        })
        .collect()
}
