//! The bundled in-memory backend.
//!
//! Exists so the engine can be exercised end-to-end (and ships the demo
//! data set the integration tests talk to). State is a tree of users →
//! mailboxes → messages behind an async `RwLock`; every mutation bumps a
//! per-mailbox `watch` channel, which is the change signal selected views
//! and `IDLE` wait on.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use imapd_types::{
    command::AppendMessage,
    datetime::DateTime,
    fetch::{FetchAttribute, FetchAttributeValue},
    flag::{Flag, FlagNameAttribute, StoreType},
    mailbox::Mailbox,
    search::SearchKey,
    status::{StatusAttribute, StatusAttributeValue},
};
use log::debug;
use tokio::sync::{watch, RwLock};

use crate::{
    backend::message::{nstring_bytes, SearchContext, StoredMessage},
    error::ServerError,
    session::{
        AppendResult, ConnectionInfo, CopyResult, Credentials, ListEntry, LoginProtocol,
        SelectedData, Session,
    },
    snapshot::MailboxSnapshot,
};

const DELIMITER: char = '/';

/// The flags every mailbox advertises as permanent.
fn default_flags() -> Vec<Flag> {
    vec![
        Flag::Answered,
        Flag::Deleted,
        Flag::Draft,
        Flag::Flagged,
        Flag::Seen,
    ]
}

struct MailboxState {
    uid_validity: u32,
    next_uid: u32,
    messages: Vec<StoredMessage>,
    /// Messages no session has been notified about yet.
    unclaimed_recent: BTreeSet<u32>,
    /// `\Recent` ownership: UID → session id.
    recent_claims: HashMap<u32, u64>,
    changes: watch::Sender<u64>,
    change_counter: u64,
}

impl MailboxState {
    fn new(uid_validity: u32) -> Self {
        let (changes, _) = watch::channel(0);

        Self {
            uid_validity,
            next_uid: 1,
            messages: Vec::new(),
            unclaimed_recent: BTreeSet::new(),
            recent_claims: HashMap::new(),
            changes,
            change_counter: 0,
        }
    }

    fn notify(&mut self) {
        self.change_counter += 1;
        // Receivers may all be gone; that's fine.
        let _ = self.changes.send(self.change_counter);
    }

    fn message(&self, uid: u32) -> Option<&StoredMessage> {
        self.messages.iter().find(|message| message.uid == uid)
    }

    fn message_mut(&mut self, uid: u32) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|message| message.uid == uid)
    }

    /// `\Recent` as one particular session sees it: its own claims plus
    /// whatever is still unclaimed.
    fn recent_for(&self, session: u64) -> BTreeSet<u32> {
        let mut recent: BTreeSet<u32> = self
            .recent_claims
            .iter()
            .filter(|(_, claimant)| **claimant == session)
            .map(|(uid, _)| *uid)
            .collect();
        recent.extend(self.unclaimed_recent.iter().copied());
        recent
    }

    /// Hands the unclaimed `\Recent` messages to `session`.
    fn claim_recent(&mut self, session: u64) {
        for uid in std::mem::take(&mut self.unclaimed_recent) {
            self.recent_claims.insert(uid, session);
        }
    }

    /// Recent ownership ends with the owning session's selection.
    fn release_recent(&mut self, session: u64) {
        self.recent_claims.retain(|_, claimant| *claimant != session);
    }

    fn snapshot(&self, session: u64, read_only: bool) -> MailboxSnapshot {
        MailboxSnapshot {
            uid_validity: self.uid_validity,
            next_uid: self.next_uid,
            read_only,
            uids: self.messages.iter().map(|message| message.uid).collect(),
            flags: self
                .messages
                .iter()
                .map(|message| (message.uid, message.flags.clone()))
                .collect(),
            recent: self.recent_for(session),
            permanent_flags: default_flags(),
        }
    }

    fn append_message(
        &mut self,
        raw: Vec<u8>,
        flags: BTreeSet<Flag>,
        internal_date: DateTime,
    ) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;

        self.messages.push(StoredMessage {
            uid,
            internal_date,
            flags,
            raw,
        });
        self.unclaimed_recent.insert(uid);

        uid
    }
}

struct UserData {
    password: String,
    mailboxes: BTreeMap<String, MailboxState>,
    subscriptions: BTreeSet<String>,
}

struct Inner {
    users: RwLock<HashMap<String, UserData>>,
    next_session_id: AtomicU64,
    next_uid_validity: AtomicU32,
}

/// An in-memory mail store shared by all sessions of all users.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                users: RwLock::new(HashMap::new()),
                next_session_id: AtomicU64::new(1),
                // An arbitrary epoch; bumped for every created mailbox so
                // UIDs are never valid across delete/recreate.
                next_uid_validity: AtomicU32::new(0xF445_0000),
            }),
        }
    }

    /// The canonical demo data set used by the integration tests: user
    /// `demouser`/`demopass` with an INBOX of four messages (UIDs
    /// 101..=104, the first three `\Seen`, the last still fresh),
    /// UIDVALIDITY 4097774359 and UIDNEXT 105, plus empty `Sent` and
    /// `Trash` mailboxes.
    pub async fn with_demo_user() -> Self {
        let backend = Self::new();

        backend
            .add_user("demouser", "demopass")
            .await
            .expect("fresh backend has no demo user yet");

        {
            let mut users = backend.inner.users.write().await;
            let user = users.get_mut("demouser").expect("just created");

            let mut inbox = MailboxState::new(4_097_774_359);
            inbox.next_uid = 101;

            let date = |day, hour| {
                let inner = Utc
                    .with_ymd_and_hms(2023, 7, day, hour, 30, 0)
                    .unwrap()
                    .fixed_offset();
                DateTime::try_from(inner).expect("valid demo date")
            };

            for (index, (from, subject, body)) in [
                ("alice@example.org", "meeting notes", "See attached notes.\r\n"),
                ("bob@example.net", "lunch?", "Free at noon?\r\n"),
                ("carol@example.com", "re: lunch?", "Noon works.\r\n"),
                ("dave@example.org", "weekend plans", "Hiking on Saturday?\r\n"),
            ]
            .into_iter()
            .enumerate()
            {
                let raw = format!(
                    "From: {from}\r\nTo: demouser@example.org\r\nSubject: {subject}\r\n\
Date: Sat, {day:02} Jul 2023 10:00:00 +0000\r\nMessage-ID: <demo-{index}@example.org>\r\n\
Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{body}",
                    day = index + 10,
                );

                let uid = inbox.append_message(
                    raw.into_bytes(),
                    BTreeSet::new(),
                    date((index + 10) as u32, 9),
                );

                // The first three are old news.
                if index < 3 {
                    inbox
                        .message_mut(uid)
                        .expect("just appended")
                        .flags
                        .insert(Flag::Seen);
                    inbox.unclaimed_recent.remove(&uid);
                }
            }

            user.mailboxes.insert("INBOX".into(), inbox);
            user.mailboxes
                .insert("Sent".into(), MailboxState::new(backend.fresh_validity()));
            user.mailboxes
                .insert("Trash".into(), MailboxState::new(backend.fresh_validity()));
            user.subscriptions.insert("INBOX".into());
        }

        backend
    }

    pub async fn add_user(&self, name: &str, password: &str) -> Result<(), ServerError> {
        let mut users = self.inner.users.write().await;

        if users.contains_key(name) {
            return Err(ServerError::MailboxConflict(name.to_owned()));
        }

        let mut mailboxes = BTreeMap::new();
        mailboxes.insert("INBOX".to_owned(), MailboxState::new(self.fresh_validity()));

        users.insert(
            name.to_owned(),
            UserData {
                password: password.to_owned(),
                mailboxes,
                subscriptions: BTreeSet::new(),
            },
        );

        Ok(())
    }

    fn fresh_validity(&self) -> u32 {
        self.inner.next_uid_validity.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoginProtocol for MemoryBackend {
    async fn login(
        &self,
        credentials: Credentials,
        _info: &ConnectionInfo,
    ) -> Result<Box<dyn Session>, ServerError> {
        let users = self.inner.users.read().await;

        let Some(user) = users.get(&credentials.authcid) else {
            return Err(ServerError::InvalidAuth);
        };

        if user.password != *credentials.secret.declassify() {
            return Err(ServerError::InvalidAuth);
        }

        if credentials
            .authzid
            .as_ref()
            .is_some_and(|authzid| *authzid != credentials.authcid)
        {
            return Err(ServerError::AuthorizationFailed);
        }

        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        debug!("session {id} opened for {}", credentials.authcid);

        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            user: credentials.authcid,
            id,
            selections: HashMap::new(),
        }))
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    user: String,
    id: u64,
    /// Currently selected mailboxes and whether they are read-only.
    selections: HashMap<String, bool>,
}

impl MemorySession {
    async fn with_user<R>(
        &self,
        f: impl FnOnce(&UserData) -> Result<R, ServerError>,
    ) -> Result<R, ServerError> {
        let users = self.inner.users.read().await;
        let user = users
            .get(&self.user)
            .ok_or_else(|| ServerError::CloseConnection("User vanished.".into()))?;
        f(user)
    }

    async fn with_user_mut<R>(
        &self,
        f: impl FnOnce(&mut UserData) -> Result<R, ServerError>,
    ) -> Result<R, ServerError> {
        let mut users = self.inner.users.write().await;
        let user = users
            .get_mut(&self.user)
            .ok_or_else(|| ServerError::CloseConnection("User vanished.".into()))?;
        f(user)
    }

    fn read_only(&self, mailbox: &Mailbox) -> bool {
        self.selections
            .get(mailbox.as_str())
            .copied()
            .unwrap_or(true)
    }
}

fn mailbox_of<'a>(
    user: &'a UserData,
    mailbox: &Mailbox,
) -> Result<&'a MailboxState, ServerError> {
    user.mailboxes
        .get(mailbox.as_str())
        .ok_or_else(|| ServerError::MailboxNotFound(mailbox.as_str().to_owned()))
}

fn mailbox_of_mut<'a>(
    user: &'a mut UserData,
    mailbox: &Mailbox,
) -> Result<&'a mut MailboxState, ServerError> {
    user.mailboxes
        .get_mut(mailbox.as_str())
        .ok_or_else(|| ServerError::MailboxNotFound(mailbox.as_str().to_owned()))
}

/// `LIST` wildcard matching: `*` crosses the hierarchy delimiter, `%`
/// does not.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn matches(pattern: &[char], name: &[char]) -> bool {
        match pattern.split_first() {
            None => name.is_empty(),
            Some(('*', rest)) => {
                (0..=name.len()).any(|skip| matches(rest, &name[skip..]))
            }
            Some(('%', rest)) => (0..=name.len())
                .take_while(|skip| !name[..*skip].contains(&DELIMITER))
                .any(|skip| matches(rest, &name[skip..])),
            Some((expected, rest)) => match name.split_first() {
                Some((actual, name_rest)) if actual == expected => matches(rest, name_rest),
                _ => false,
            },
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    matches(&pattern, &name)
}

#[async_trait]
impl Session for MemorySession {
    async fn list(
        &mut self,
        reference: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> Result<Vec<ListEntry>, ServerError> {
        let combined = format!("{reference}{pattern}");

        self.with_user(|user| {
            let mut entries = Vec::new();

            for name in user.mailboxes.keys() {
                if subscribed_only && !user.subscriptions.contains(name) {
                    continue;
                }

                if !wildcard_match(&combined, name) {
                    continue;
                }

                let has_children = user
                    .mailboxes
                    .keys()
                    .any(|other| other.starts_with(&format!("{name}{DELIMITER}")));

                let attributes = if has_children {
                    vec![FlagNameAttribute::Extension(
                        imapd_types::core::Atom::try_from("HasChildren")
                            .expect("valid atom"),
                    )]
                } else {
                    vec![]
                };

                entries.push(ListEntry {
                    mailbox: Mailbox::try_from(name.as_str())
                        .map_err(|error| ServerError::Internal(error.into()))?,
                    delimiter: Some(DELIMITER),
                    attributes,
                });
            }

            Ok(entries)
        })
        .await
    }

    async fn create(&mut self, mailbox: &Mailbox) -> Result<(), ServerError> {
        let validity = self.fresh_validity();

        self.with_user_mut(|user| {
            if user.mailboxes.contains_key(mailbox.as_str()) {
                return Err(ServerError::MailboxConflict(mailbox.as_str().to_owned()));
            }

            user.mailboxes
                .insert(mailbox.as_str().to_owned(), MailboxState::new(validity));
            Ok(())
        })
        .await
    }

    async fn delete(&mut self, mailbox: &Mailbox) -> Result<(), ServerError> {
        if matches!(mailbox, Mailbox::Inbox) {
            return Err(ServerError::MailboxReadOnly("INBOX".into()));
        }

        self.with_user_mut(|user| {
            if !user.mailboxes.contains_key(mailbox.as_str()) {
                return Err(ServerError::MailboxNotFound(mailbox.as_str().to_owned()));
            }

            let prefix = format!("{}{DELIMITER}", mailbox.as_str());
            if user.mailboxes.keys().any(|name| name.starts_with(&prefix)) {
                return Err(ServerError::MailboxHasChildren(
                    mailbox.as_str().to_owned(),
                ));
            }

            user.mailboxes.remove(mailbox.as_str());
            user.subscriptions.remove(mailbox.as_str());
            Ok(())
        })
        .await
    }

    async fn rename(&mut self, from: &Mailbox, to: &Mailbox) -> Result<(), ServerError> {
        let validity = self.fresh_validity();

        self.with_user_mut(|user| {
            if user.mailboxes.contains_key(to.as_str()) {
                return Err(ServerError::MailboxConflict(to.as_str().to_owned()));
            }

            match from {
                // Renaming INBOX moves its messages and leaves an empty
                // INBOX behind (RFC 3501, section 6.3.5).
                Mailbox::Inbox => {
                    let inbox = mailbox_of_mut(user, from)?;
                    let mut moved = MailboxState::new(validity);
                    let messages = std::mem::take(&mut inbox.messages);
                    inbox.unclaimed_recent.clear();
                    inbox.recent_claims.clear();
                    inbox.notify();

                    for message in messages {
                        let uid = moved.next_uid;
                        moved.next_uid += 1;
                        moved.messages.push(StoredMessage { uid, ..message });
                    }

                    user.mailboxes.insert(to.as_str().to_owned(), moved);
                }
                Mailbox::Other(_) => {
                    let Some(state) = user.mailboxes.remove(from.as_str()) else {
                        return Err(ServerError::MailboxNotFound(from.as_str().to_owned()));
                    };
                    user.mailboxes.insert(to.as_str().to_owned(), state);
                }
            }

            Ok(())
        })
        .await
    }

    async fn subscribe(&mut self, mailbox: &Mailbox) -> Result<(), ServerError> {
        self.with_user_mut(|user| {
            mailbox_of(user, mailbox)?;
            user.subscriptions.insert(mailbox.as_str().to_owned());
            Ok(())
        })
        .await
    }

    async fn unsubscribe(&mut self, mailbox: &Mailbox) -> Result<(), ServerError> {
        self.with_user_mut(|user| {
            user.subscriptions.remove(mailbox.as_str());
            Ok(())
        })
        .await
    }

    async fn status(
        &mut self,
        mailbox: &Mailbox,
        attributes: &[StatusAttribute],
    ) -> Result<Vec<StatusAttributeValue>, ServerError> {
        self.with_user(|user| {
            let state = mailbox_of(user, mailbox)?;

            let unseen = state
                .messages
                .iter()
                .filter(|message| !message.flags.contains(&Flag::Seen))
                .count() as u32;
            let recent = (state.unclaimed_recent.len() + state.recent_claims.len()) as u32;

            Ok(attributes
                .iter()
                .map(|attribute| match attribute {
                    StatusAttribute::Messages => {
                        StatusAttributeValue::Messages(state.messages.len() as u32)
                    }
                    StatusAttribute::Recent => StatusAttributeValue::Recent(recent),
                    StatusAttribute::UidNext => StatusAttributeValue::UidNext(state.next_uid),
                    StatusAttribute::UidValidity => {
                        StatusAttributeValue::UidValidity(state.uid_validity)
                    }
                    StatusAttribute::Unseen => StatusAttributeValue::Unseen(unseen),
                })
                .collect())
        })
        .await
    }

    async fn select(
        &mut self,
        mailbox: &Mailbox,
        read_only: bool,
    ) -> Result<SelectedData, ServerError> {
        let id = self.id;

        let selected = self
            .with_user_mut(|user| {
                let state = mailbox_of_mut(user, mailbox)?;

                if !read_only {
                    state.claim_recent(id);
                }

                Ok(SelectedData {
                    snapshot: state.snapshot(id, read_only),
                    events: state.changes.subscribe(),
                })
            })
            .await?;

        self.selections
            .insert(mailbox.as_str().to_owned(), read_only);

        Ok(selected)
    }

    async fn snapshot(&mut self, mailbox: &Mailbox) -> Result<MailboxSnapshot, ServerError> {
        let id = self.id;
        let read_only = self.read_only(mailbox);

        self.with_user_mut(|user| {
            let state = mailbox_of_mut(user, mailbox)?;

            if !read_only {
                state.claim_recent(id);
            }

            Ok(state.snapshot(id, read_only))
        })
        .await
    }

    async fn close(&mut self, mailbox: &Mailbox, expunge: bool) -> Result<(), ServerError> {
        let id = self.id;

        self.with_user_mut(|user| {
            let state = mailbox_of_mut(user, mailbox)?;

            if expunge {
                state
                    .messages
                    .retain(|message| !message.flags.contains(&Flag::Deleted));
            }

            state.release_recent(id);
            state.notify();
            Ok(())
        })
        .await?;

        self.selections.remove(mailbox.as_str());
        Ok(())
    }

    async fn check(&mut self, _mailbox: &Mailbox) -> Result<(), ServerError> {
        Ok(())
    }

    async fn append(
        &mut self,
        mailbox: &Mailbox,
        messages: &[AppendMessage],
    ) -> Result<AppendResult, ServerError> {
        self.with_user_mut(|user| {
            let state = mailbox_of_mut(user, mailbox)?;

            let mut uids = Vec::with_capacity(messages.len());
            for message in messages {
                let internal_date = match message.date {
                    Some(date) => date,
                    None => DateTime::try_from(Utc::now().fixed_offset())
                        .map_err(|error| ServerError::Internal(error.into()))?,
                };

                let flags: BTreeSet<Flag> = message.flags.iter().cloned().collect();
                uids.push(state.append_message(
                    message.message.data().to_vec(),
                    flags,
                    internal_date,
                ));
            }

            state.notify();

            Ok(AppendResult {
                uid_validity: state.uid_validity,
                uids,
            })
        })
        .await
    }

    async fn expunge(
        &mut self,
        mailbox: &Mailbox,
        uids: Option<&[u32]>,
    ) -> Result<Vec<u32>, ServerError> {
        if self.read_only(mailbox) {
            return Err(ServerError::MailboxReadOnly(mailbox.as_str().to_owned()));
        }

        self.with_user_mut(|user| {
            let state = mailbox_of_mut(user, mailbox)?;

            let expunged: Vec<u32> = state
                .messages
                .iter()
                .filter(|message| {
                    message.flags.contains(&Flag::Deleted)
                        && uids.map_or(true, |uids| uids.contains(&message.uid))
                })
                .map(|message| message.uid)
                .collect();

            state
                .messages
                .retain(|message| !expunged.contains(&message.uid));
            for uid in &expunged {
                state.unclaimed_recent.remove(uid);
                state.recent_claims.remove(uid);
            }

            if !expunged.is_empty() {
                state.notify();
            }

            Ok(expunged)
        })
        .await
    }

    async fn search(
        &mut self,
        mailbox: &Mailbox,
        criteria: &SearchKey,
    ) -> Result<Vec<u32>, ServerError> {
        let id = self.id;

        self.with_user(|user| {
            let state = mailbox_of(user, mailbox)?;
            let recent = state.recent_for(id);

            let largest_seq = state.messages.len() as u32;
            let largest_uid = state
                .messages
                .last()
                .map(|message| message.uid)
                .unwrap_or(0);

            Ok(state
                .messages
                .iter()
                .enumerate()
                .filter(|(index, message)| {
                    let ctx = SearchContext {
                        seq: *index as u32 + 1,
                        recent: recent.contains(&message.uid),
                        largest_seq,
                        largest_uid,
                    };
                    message.matches(criteria, &ctx)
                })
                .map(|(_, message)| message.uid)
                .collect())
        })
        .await
    }

    async fn fetch(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        attributes: &[FetchAttribute],
    ) -> Result<Vec<(u32, Vec<FetchAttributeValue>)>, ServerError> {
        let id = self.id;
        let read_only = self.read_only(mailbox);

        self.with_user_mut(|user| {
            let state = mailbox_of_mut(user, mailbox)?;
            let recent = state.recent_for(id);

            let mut results = Vec::with_capacity(uids.len());
            let mut seen_changed = false;

            for &uid in uids {
                let Some(message) = state.message(uid) else {
                    continue;
                };

                let mut values = Vec::with_capacity(attributes.len());
                let mut implied_seen = false;

                for attribute in attributes {
                    match attribute {
                        FetchAttribute::Uid => values.push(FetchAttributeValue::Uid(uid)),
                        FetchAttribute::Flags => {
                            let mut flags: Vec<imapd_types::flag::FlagFetch> = message
                                .flags
                                .iter()
                                .cloned()
                                .map(imapd_types::flag::FlagFetch::Flag)
                                .collect();
                            if recent.contains(&uid) {
                                flags.push(imapd_types::flag::FlagFetch::Recent);
                            }
                            values.push(FetchAttributeValue::Flags(flags));
                        }
                        FetchAttribute::InternalDate => {
                            values.push(FetchAttributeValue::InternalDate(message.internal_date));
                        }
                        FetchAttribute::Rfc822Size => {
                            values.push(FetchAttributeValue::Rfc822Size(message.size()));
                        }
                        FetchAttribute::Envelope => {
                            values.push(FetchAttributeValue::Envelope(message.envelope()));
                        }
                        FetchAttribute::Body => {
                            values.push(FetchAttributeValue::Body(message.body_structure()));
                        }
                        FetchAttribute::BodyStructure => {
                            values
                                .push(FetchAttributeValue::BodyStructure(message.body_structure()));
                        }
                        FetchAttribute::Rfc822 => {
                            implied_seen = true;
                            values
                                .push(FetchAttributeValue::Rfc822(nstring_bytes(message.raw.clone())));
                        }
                        FetchAttribute::Rfc822Header => {
                            values.push(FetchAttributeValue::Rfc822Header(nstring_bytes(
                                message.header_bytes().to_vec(),
                            )));
                        }
                        FetchAttribute::Rfc822Text => {
                            implied_seen = true;
                            values.push(FetchAttributeValue::Rfc822Text(nstring_bytes(
                                message.body_bytes().to_vec(),
                            )));
                        }
                        FetchAttribute::BodyExt {
                            section,
                            partial,
                            peek,
                        } => {
                            if !peek {
                                implied_seen = true;
                            }

                            let data = message
                                .section_bytes(section.as_ref())
                                .map(|bytes| apply_partial(bytes, *partial));

                            values.push(FetchAttributeValue::BodyExt {
                                section: section.clone(),
                                origin: partial.map(|(offset, _)| offset),
                                data: match data {
                                    Some(bytes) => nstring_bytes(bytes),
                                    None => imapd_types::core::NString::NIL,
                                },
                            });
                        }
                        FetchAttribute::Binary {
                            part,
                            partial,
                            peek,
                        } => {
                            if !peek {
                                implied_seen = true;
                            }

                            let data = message
                                .binary_bytes(part)
                                .map(|bytes| apply_partial(bytes, *partial));

                            values.push(FetchAttributeValue::Binary {
                                part: part.clone(),
                                origin: partial.map(|(offset, _)| offset),
                                data,
                            });
                        }
                        FetchAttribute::BinarySize { part } => {
                            let size = message
                                .binary_bytes(part)
                                .map(|bytes| bytes.len() as u32)
                                .unwrap_or(0);
                            values.push(FetchAttributeValue::BinarySize {
                                part: part.clone(),
                                size,
                            });
                        }
                    }
                }

                if implied_seen && !read_only {
                    let message = state.message_mut(uid).expect("present above");
                    if message.flags.insert(Flag::Seen) {
                        seen_changed = true;
                    }
                }

                results.push((uid, values));
            }

            if seen_changed {
                state.notify();
            }

            Ok(results)
        })
        .await
    }

    async fn store(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        kind: StoreType,
        flags: &[Flag],
    ) -> Result<Vec<(u32, BTreeSet<Flag>)>, ServerError> {
        if self.read_only(mailbox) {
            return Err(ServerError::MailboxReadOnly(mailbox.as_str().to_owned()));
        }

        self.with_user_mut(|user| {
            let state = mailbox_of_mut(user, mailbox)?;

            let mut results = Vec::with_capacity(uids.len());
            let mut changed = false;

            for &uid in uids {
                let Some(message) = state.message_mut(uid) else {
                    continue;
                };

                let before = message.flags.clone();
                match kind {
                    StoreType::Replace => {
                        message.flags = flags.iter().cloned().collect();
                    }
                    StoreType::Add => {
                        message.flags.extend(flags.iter().cloned());
                    }
                    StoreType::Remove => {
                        for flag in flags {
                            message.flags.remove(flag);
                        }
                    }
                }

                changed |= before != message.flags;
                results.push((uid, message.flags.clone()));
            }

            if changed {
                state.notify();
            }

            Ok(results)
        })
        .await
    }

    async fn copy(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        destination: &Mailbox,
    ) -> Result<CopyResult, ServerError> {
        self.with_user_mut(|user| {
            if !user.mailboxes.contains_key(destination.as_str()) {
                return Err(ServerError::MailboxNotFound(
                    destination.as_str().to_owned(),
                ));
            }

            let source: Vec<StoredMessage> = {
                let state = mailbox_of(user, mailbox)?;
                uids.iter()
                    .filter_map(|uid| state.message(*uid).cloned())
                    .collect()
            };

            let target = mailbox_of_mut(user, destination)?;
            let mut source_uids = Vec::with_capacity(source.len());
            let mut destination_uids = Vec::with_capacity(source.len());

            for message in source {
                source_uids.push(message.uid);
                let uid = target.append_message(
                    message.raw,
                    message.flags,
                    message.internal_date,
                );
                destination_uids.push(uid);
            }

            let uid_validity = target.uid_validity;
            if !destination_uids.is_empty() {
                target.notify();
            }

            Ok(CopyResult {
                uid_validity,
                source_uids,
                destination_uids,
            })
        })
        .await
    }

    async fn logout(&mut self) -> Result<(), ServerError> {
        let id = self.id;
        let selections: Vec<String> = self.selections.keys().cloned().collect();

        self.with_user_mut(|user| {
            for name in selections {
                if let Some(state) = user.mailboxes.get_mut(&name) {
                    state.release_recent(id);
                    state.notify();
                }
            }
            Ok(())
        })
        .await?;

        self.selections.clear();
        Ok(())
    }
}

impl MemorySession {
    fn fresh_validity(&self) -> u32 {
        self.inner.next_uid_validity.fetch_add(1, Ordering::Relaxed)
    }
}

/// `<offset.length>` slicing for BODY/BINARY partial fetches.
fn apply_partial(bytes: Vec<u8>, partial: Option<(u32, u32)>) -> Vec<u8> {
    match partial {
        None => bytes,
        Some((offset, length)) => bytes
            .into_iter()
            .skip(offset as usize)
            .take(length as usize)
            .collect(),
    }
}
