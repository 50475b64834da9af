//! Immutable mailbox snapshots.

use std::collections::{BTreeSet, HashMap};

use imapd_types::flag::Flag;

/// A point-in-time view of a mailbox, captured by the backend.
///
/// Sequence numbers are derived, not stored: the sequence number of a UID
/// is its 1-based position in `uids`, which is kept in ascending UID order.
/// Snapshots are never mutated after capture; the selected-mailbox view
/// diffs pairs of them to produce untagged updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxSnapshot {
    pub uid_validity: u32,
    pub next_uid: u32,
    pub read_only: bool,
    /// Ascending.
    pub uids: Vec<u32>,
    /// Persistent flags per UID.
    pub flags: HashMap<u32, BTreeSet<Flag>>,
    /// UIDs whose `\Recent` this session owns.
    pub recent: BTreeSet<u32>,
    /// Flags the client may change permanently.
    pub permanent_flags: Vec<Flag>,
}

impl MailboxSnapshot {
    pub fn exists(&self) -> u32 {
        self.uids.len() as u32
    }

    pub fn recent_count(&self) -> u32 {
        self.recent.len() as u32
    }

    pub fn max_uid(&self) -> u32 {
        self.uids.last().copied().unwrap_or(0)
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.uids.binary_search(&uid).is_ok()
    }

    /// 1-based sequence number of `uid`.
    pub fn seq_of_uid(&self, uid: u32) -> Option<u32> {
        self.uids
            .binary_search(&uid)
            .ok()
            .map(|index| index as u32 + 1)
    }

    pub fn uid_of_seq(&self, seq: u32) -> Option<u32> {
        if seq == 0 {
            return None;
        }

        self.uids.get(seq as usize - 1).copied()
    }

    pub fn flags_of(&self, uid: u32) -> BTreeSet<Flag> {
        self.flags.get(&uid).cloned().unwrap_or_default()
    }

    /// Sequence number of the first message without `\Seen`.
    pub fn first_unseen_seq(&self) -> Option<u32> {
        self.uids
            .iter()
            .position(|uid| !self.flags_of(*uid).contains(&Flag::Seen))
            .map(|index| index as u32 + 1)
    }

    /// Number of messages without `\Seen` (the `STATUS (UNSEEN)` figure,
    /// which is a count, unlike the `[UNSEEN ...]` response code).
    pub fn unseen_count(&self) -> u32 {
        self.uids
            .iter()
            .filter(|uid| !self.flags_of(**uid).contains(&Flag::Seen))
            .count() as u32
    }
}
