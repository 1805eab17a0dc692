//! Turn pairing and memory ordering rules shared by every store.
//!
//! A turn may arrive as one message per side. When the newest stored entry is
//! still inside the pairing window, holds exactly one side, and the incoming
//! entry carries only the other side, the two are merged into one entry.
//! Pairing by timestamp proximity is a heuristic; an explicit turn id would be
//! stricter.

use chrono::Duration;
use std::cmp::Ordering;

use crate::records::{ChatEntry, MemoryEntry};

/// Default pairing window (five minutes).
pub const DEFAULT_PAIRING_WINDOW_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Incoming side was merged into the previous entry.
    Paired,
    /// Incoming entry was stored as a new entry.
    Appended,
}

/// Merge `incoming` into `last` if the pairing rule allows it. Returns whether it merged.
pub fn try_pair(last: &mut ChatEntry, incoming: &ChatEntry, window: Duration) -> bool {
    if last.user_id != incoming.user_id || last.character_id != incoming.character_id {
        return false;
    }

    let elapsed = incoming.timestamp.signed_duration_since(last.timestamp);
    if elapsed < Duration::zero() || elapsed > window {
        return false;
    }

    match (
        &last.user_input,
        &last.character_response,
        &incoming.user_input,
        &incoming.character_response,
    ) {
        (Some(_), None, None, Some(response)) => {
            last.character_response = Some(response.clone());
            last.emotion = incoming.emotion;
            true
        }
        (None, Some(_), Some(input), None) => {
            last.user_input = Some(input.clone());
            true
        }
        _ => false,
    }
}

/// Append to an in-order history, pairing with the newest entry when allowed.
pub fn append_paired(
    history: &mut Vec<ChatEntry>,
    incoming: ChatEntry,
    window: Duration,
) -> AppendOutcome {
    if let Some(last) = history.last_mut() {
        if try_pair(last, &incoming, window) {
            return AppendOutcome::Paired;
        }
    }
    history.push(incoming);
    AppendOutcome::Appended
}

/// Order used for memory recall: importance first, then newest first.
pub fn memory_rank(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    b.importance_score
        .cmp(&a.importance_score)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

pub fn rank_memories(memories: &mut [MemoryEntry]) {
    memories.sort_by(memory_rank);
}
