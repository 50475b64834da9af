//! The selected-mailbox view: what one connection believes about the
//! mailbox it has open, and the diff engine that turns backend changes
//! into untagged updates.
//!
//! The view holds two snapshots: `snapshot_prev` is everything the client
//! has been told, `snapshot_cur` the latest state from the backend.
//! [`SelectedMailbox::fork`] computes the update batch between the two and
//! advances `snapshot_prev`; calling it twice without an intervening
//! [`SelectedMailbox::update`] therefore yields nothing the second time.

use std::collections::{BTreeSet, HashMap};

use imapd_types::{
    core::NonEmptyVec,
    fetch::FetchAttributeValue,
    flag::{Flag, FlagFetch},
    mailbox::Mailbox,
    response::{Data, Response},
};
use thiserror::Error;
use tokio::sync::watch;

use crate::snapshot::MailboxSnapshot;

#[derive(Debug, Error)]
pub enum ViewError {
    /// UID assignments were discontinued under us; the selection is void
    /// and the connection must force-close the mailbox.
    #[error("UID validity changed from {previous} to {current}")]
    UidValidityChanged { previous: u32, current: u32 },
}

pub struct SelectedMailbox {
    mailbox: Mailbox,
    read_only: bool,
    /// The state the client knows about.
    snapshot_prev: MailboxSnapshot,
    /// The latest backend state.
    snapshot_cur: MailboxSnapshot,
    /// Session-only flag overlay per UID (besides `\Recent`, which the
    /// snapshot carries).
    session_flags: HashMap<u32, BTreeSet<Flag>>,
    /// Expunged UIDs whose `EXPUNGE` must not be reported in the next diff.
    hidden: BTreeSet<u32>,
    /// Highest UID ever observed by this connection.
    max_uid_seen: u32,
    /// RECENT count last reported to the client.
    reported_recent: u32,
    events: watch::Receiver<u64>,
}

impl SelectedMailbox {
    pub fn new(
        mailbox: Mailbox,
        read_only: bool,
        snapshot: MailboxSnapshot,
        events: watch::Receiver<u64>,
    ) -> Self {
        let max_uid_seen = snapshot.max_uid();
        let reported_recent = snapshot.recent_count();

        Self {
            mailbox,
            read_only,
            snapshot_prev: snapshot.clone(),
            snapshot_cur: snapshot,
            session_flags: HashMap::new(),
            hidden: BTreeSet::new(),
            max_uid_seen,
            reported_recent,
            events,
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// The snapshot the client has been told about; sequence-number
    /// arguments from the client resolve against this one.
    pub fn known(&self) -> &MailboxSnapshot {
        &self.snapshot_prev
    }

    /// The latest backend snapshot; UID arguments resolve against this one.
    pub fn current(&self) -> &MailboxSnapshot {
        &self.snapshot_cur
    }

    /// Waits until the backend signals a change (at-least-once semantics).
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.events.changed().await
    }

    /// Non-blocking check for a pending change notification; marks the
    /// current value as seen.
    pub fn has_pending_events(&mut self) -> bool {
        if self.events.has_changed().unwrap_or(false) {
            self.events.borrow_and_update();
            true
        } else {
            false
        }
    }

    /// Installs a fresh backend snapshot for the next diff.
    pub fn update(&mut self, snapshot: MailboxSnapshot) {
        self.max_uid_seen = self.max_uid_seen.max(snapshot.max_uid());
        self.snapshot_cur = snapshot;
    }

    /// Suppresses the `EXPUNGE` report for `uid` in the next diff.
    pub fn hide(&mut self, uid: u32) {
        self.hidden.insert(uid);
    }

    /// Suppresses every currently-expunged-but-unreported UID (the RFC
    /// 2180 window around commands that must not see EXPUNGE responses).
    pub fn hide_expunged(&mut self) {
        for uid in &self.snapshot_prev.uids {
            if !self.snapshot_cur.contains(*uid) {
                self.hidden.insert(*uid);
            }
        }
    }

    /// Marks the client as up-to-date on the flags of `uid` without
    /// emitting anything (`STORE .SILENT`).
    pub fn assimilate_flags(&mut self, uid: u32) {
        if let Some(flags) = self.snapshot_cur.flags.get(&uid) {
            self.snapshot_prev.flags.insert(uid, flags.clone());
        }
    }

    /// Combined flag view for FETCH output: persistent flags, the session
    /// overlay, and `\Recent` ownership.
    pub fn fetch_flags(&self, uid: u32) -> Vec<FlagFetch> {
        let mut flags: Vec<FlagFetch> = self
            .combined_flags(&self.snapshot_cur, uid)
            .into_iter()
            .map(FlagFetch::Flag)
            .collect();

        if self.snapshot_cur.recent.contains(&uid) {
            flags.push(FlagFetch::Recent);
        }

        flags
    }

    fn combined_flags(&self, snapshot: &MailboxSnapshot, uid: u32) -> BTreeSet<Flag> {
        let mut flags = snapshot.flags_of(uid);

        if let Some(session) = self.session_flags.get(&uid) {
            flags.extend(session.iter().cloned());
        }

        flags
    }

    /// Adds session-only flags for `uid` (flags stored against a read-only
    /// selection live only as long as this view).
    pub fn add_session_flags(&mut self, uid: u32, flags: impl IntoIterator<Item = Flag>) {
        self.session_flags.entry(uid).or_default().extend(flags);
    }

    /// Computes the untagged updates between what the client knows and the
    /// current snapshot, then advances the known state.
    ///
    /// Expunges are reported in descending sequence order so every number
    /// is valid at the moment it is emitted. When `uid_context` is set
    /// (UID commands), flag updates carry the UID as well.
    pub fn fork(&mut self, uid_context: bool) -> Result<Vec<Response>, ViewError> {
        if self.snapshot_cur.uid_validity != self.snapshot_prev.uid_validity {
            return Err(ViewError::UidValidityChanged {
                previous: self.snapshot_prev.uid_validity,
                current: self.snapshot_cur.uid_validity,
            });
        }

        let mut updates = Vec::new();

        // Expunges, descending. Suppressed UIDs stay in the client's model.
        let mut suppressed: Vec<u32> = Vec::new();
        let mut expunged_seqs: Vec<u32> = Vec::new();
        for (index, uid) in self.snapshot_prev.uids.iter().enumerate() {
            if !self.snapshot_cur.contains(*uid) {
                if self.hidden.contains(uid) {
                    suppressed.push(*uid);
                } else {
                    expunged_seqs.push(index as u32 + 1);
                }
            }
        }
        for seq in expunged_seqs.iter().rev() {
            updates.push(Response::Data(Data::Expunge(*seq)));
        }

        // The model the client holds after this batch: the current state
        // plus anything whose expunge was suppressed.
        let mut next_prev = self.snapshot_cur.clone();
        for uid in &suppressed {
            let position = next_prev.uids.partition_point(|known| known < uid);
            next_prev.uids.insert(position, *uid);
            next_prev
                .flags
                .insert(*uid, self.snapshot_prev.flags_of(*uid));
        }

        // New messages (or a count shift the expunges alone don't explain).
        let reported_count = self.snapshot_prev.exists() - expunged_seqs.len() as u32;
        if next_prev.exists() != reported_count {
            updates.push(Response::Data(Data::Exists(next_prev.exists())));
        }

        let recent_now = next_prev.recent_count();
        if recent_now != self.reported_recent {
            updates.push(Response::Data(Data::Recent(recent_now)));
            self.reported_recent = recent_now;
        }

        // Flag changes on messages present in both snapshots.
        for (index, uid) in next_prev.uids.iter().enumerate() {
            if !self.snapshot_prev.contains(*uid) {
                continue;
            }

            let before = self.combined_flags(&self.snapshot_prev, *uid);
            let after = self.combined_flags(&next_prev, *uid);
            if before != after {
                let mut attributes = Vec::new();
                if uid_context {
                    attributes.push(FetchAttributeValue::Uid(*uid));
                }

                let mut flags: Vec<FlagFetch> =
                    after.into_iter().map(FlagFetch::Flag).collect();
                if next_prev.recent.contains(uid) {
                    flags.push(FlagFetch::Recent);
                }
                attributes.push(FetchAttributeValue::Flags(flags));

                updates.push(Response::Data(Data::Fetch {
                    seq: index as u32 + 1,
                    // Always at least the FLAGS item.
                    attributes: NonEmptyVec::try_from(attributes).unwrap(),
                }));
            }
        }

        self.snapshot_prev = next_prev;
        self.hidden.clear();

        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn snapshot(uids: &[u32], deleted: &[u32]) -> MailboxSnapshot {
        let mut flags = HashMap::new();
        for uid in deleted {
            flags.insert(*uid, BTreeSet::from([Flag::Deleted]));
        }

        MailboxSnapshot {
            uid_validity: 4097774359,
            next_uid: uids.iter().max().copied().unwrap_or(0) + 1,
            read_only: false,
            uids: uids.to_vec(),
            flags,
            recent: BTreeSet::new(),
            permanent_flags: vec![],
        }
    }

    fn view(snapshot: MailboxSnapshot) -> SelectedMailbox {
        let (_tx, rx) = watch::channel(0);
        SelectedMailbox::new(Mailbox::Inbox, false, snapshot, rx)
    }

    fn expunge_seqs(updates: &[Response]) -> Vec<u32> {
        updates
            .iter()
            .filter_map(|response| match response {
                Response::Data(Data::Expunge(seq)) => Some(*seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn idempotent_without_changes() {
        let mut view = view(snapshot(&[10, 11, 12], &[]));

        assert!(view.fork(false).unwrap().is_empty());
        assert!(view.fork(false).unwrap().is_empty());
    }

    #[test]
    fn expunges_are_reported_in_descending_sequence_order() {
        // UIDs 10..=13; 10, 12, and 13 get expunged. Their sequence
        // numbers in the known snapshot are 1, 3, 4, reported 4, 3, 1.
        let mut view = view(snapshot(&[10, 11, 12, 13], &[]));
        view.update(snapshot(&[11], &[]));

        let updates = view.fork(false).unwrap();
        assert_eq!(expunge_seqs(&updates), vec![4, 3, 1]);

        // The count shrank exactly by the reported expunges, so no EXISTS.
        assert!(!updates
            .iter()
            .any(|response| matches!(response, Response::Data(Data::Exists(_)))));

        // Afterwards the known state is the current state.
        assert_eq!(view.known().uids, vec![11]);
        assert!(view.fork(false).unwrap().is_empty());
    }

    #[test]
    fn new_messages_produce_exists() {
        let mut view = view(snapshot(&[10], &[]));

        let mut next = snapshot(&[10, 11, 12], &[]);
        next.recent = BTreeSet::from([11, 12]);
        view.update(next);

        let updates = view.fork(false).unwrap();
        assert!(updates
            .iter()
            .any(|response| matches!(response, Response::Data(Data::Exists(3)))));
        assert!(updates
            .iter()
            .any(|response| matches!(response, Response::Data(Data::Recent(2)))));
    }

    #[test]
    fn flag_changes_produce_fetch_with_uid_in_uid_context() {
        let mut view = view(snapshot(&[10, 11], &[]));
        view.update(snapshot(&[10, 11], &[11]));

        let updates = view.fork(true).unwrap();
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            Response::Data(Data::Fetch { seq, attributes }) => {
                assert_eq!(*seq, 2);
                assert!(matches!(
                    attributes.as_slice()[0],
                    FetchAttributeValue::Uid(11)
                ));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn hidden_uids_are_not_reported_and_stay_in_the_model() {
        let mut view = view(snapshot(&[10, 11, 12], &[]));
        view.update(snapshot(&[10, 12], &[]));
        view.hide(11);

        let updates = view.fork(false).unwrap();
        assert!(expunge_seqs(&updates).is_empty());
        // No EXISTS either: as far as the client knows, nothing moved.
        assert!(updates.is_empty());
        assert_eq!(view.known().uids, vec![10, 11, 12]);

        // The suppression lasts one diff; the next fork reports it.
        let updates = view.fork(false).unwrap();
        assert_eq!(expunge_seqs(&updates), vec![2]);
        assert_eq!(view.known().uids, vec![10, 12]);
    }

    #[test]
    fn uid_validity_change_invalidates_the_view() {
        let mut view = view(snapshot(&[10], &[]));

        let mut next = snapshot(&[1], &[]);
        next.uid_validity = 1;
        view.update(next);

        assert!(matches!(
            view.fork(false),
            Err(ViewError::UidValidityChanged { .. })
        ));
    }

    #[test]
    fn silent_store_assimilation_suppresses_the_fetch() {
        let mut view = view(snapshot(&[10, 11], &[]));
        view.update(snapshot(&[10, 11], &[11]));
        view.assimilate_flags(11);

        assert!(view.fork(false).unwrap().is_empty());
    }
}
