//! Bounded conversation history.

use crate::provider::Message;

/// Bound `messages` to at most `max` entries, keeping the most recent ones.
///
/// A system message at index 0 is always kept and counts toward `max`, so
/// only the most recent `max - 1` of the remainder survive alongside it.
/// With `max <= 1` and a leading system message, only that message remains.
pub fn trim_history(mut messages: Vec<Message>, max: usize) -> Vec<Message> {
    if messages.len() <= max {
        return messages;
    }

    let pinned = usize::from(messages.first().is_some_and(Message::is_system));
    let keep = max.saturating_sub(pinned);
    let drop_end = messages.len() - keep;
    if drop_end > pinned {
        messages.drain(pinned..drop_end);
    }
    messages
}
