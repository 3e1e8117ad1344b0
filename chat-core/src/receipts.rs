//! Read-receipt merging.
//!
//! A `messages_read` echo names a conversation and a reader, nothing more.
//! The merge folds the reader into the conversation's summary and, when
//! that conversation's log is currently open, into every loaded message.
//! Both insertions are idempotent, so replaying the echo is harmless.

use chat_types::{ConversationId, UserId};

use crate::log::MessageLog;
use crate::summary::{SummaryStore, SummaryUpdate};

/// Fold a read-receipt echo into the summary store and the open log.
///
/// Pass `None` for `open_log` when no conversation is open; a log for a
/// different conversation is left untouched. Returns `true` when the
/// summary store changed.
pub fn merge_read_receipt(
    summaries: &mut SummaryStore,
    open_log: Option<&mut MessageLog>,
    conversation: &ConversationId,
    reader: &UserId,
) -> bool {
    let changed = summaries.upsert(
        conversation,
        SummaryUpdate {
            read_by: Some(reader.clone()),
            ..Default::default()
        },
    );

    if let Some(log) = open_log {
        if log.conversation() == conversation {
            log.mark_all_read_by(reader);
        }
    }

    changed
}
