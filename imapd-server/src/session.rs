//! The backend contract.
//!
//! The state machine is polymorphic over these traits: a
//! [`LoginProtocol`] turns credentials into a [`Session`], and the session
//! executes the structured operations the parser produced. Results are
//! plain data; all wire formatting stays in the engine.
//!
//! Mailbox change notification is a [`tokio::sync::watch`] channel carrying
//! a change counter. Delivery is at-least-once; the diff engine tolerates
//! duplicate wake-ups because identical snapshots diff to nothing.

use std::{collections::BTreeSet, net::SocketAddr};

use async_trait::async_trait;
use imapd_types::{
    command::AppendMessage,
    fetch::{FetchAttribute, FetchAttributeValue},
    flag::{Flag, FlagNameAttribute, StoreType},
    mailbox::Mailbox,
    search::SearchKey,
    secret::Secret,
    status::{StatusAttribute, StatusAttributeValue},
};
use tokio::sync::watch;

use crate::{error::ServerError, snapshot::MailboxSnapshot};

/// Who is connecting, as far as the transport knows.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub peer: Option<SocketAddr>,
    pub tls: bool,
}

/// Credentials presented via `LOGIN` or `AUTHENTICATE`.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Authentication identity.
    pub authcid: String,
    pub secret: Secret<String>,
    /// Authorization identity, when a mechanism distinguishes it.
    pub authzid: Option<String>,
}

impl Credentials {
    pub fn new(authcid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            authcid: authcid.into(),
            secret: Secret::new(secret.into()),
            authzid: None,
        }
    }
}

/// Turns credentials into a live session, or refuses them.
#[async_trait]
pub trait LoginProtocol: Send + Sync {
    async fn login(
        &self,
        credentials: Credentials,
        info: &ConnectionInfo,
    ) -> Result<Box<dyn Session>, ServerError>;
}

/// One entry of a `LIST`/`LSUB` result.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub mailbox: Mailbox,
    pub delimiter: Option<char>,
    pub attributes: Vec<FlagNameAttribute>,
}

/// Result of selecting a mailbox: the initial snapshot plus the change
/// signal the view awaits between commands and during IDLE.
pub struct SelectedData {
    pub snapshot: MailboxSnapshot,
    pub events: watch::Receiver<u64>,
}

/// Result of a (MULTI)APPEND, for the `APPENDUID` response code.
#[derive(Debug, Clone)]
pub struct AppendResult {
    pub uid_validity: u32,
    pub uids: Vec<u32>,
}

/// Result of a COPY, for the `COPYUID` response code.
#[derive(Debug, Clone)]
pub struct CopyResult {
    pub uid_validity: u32,
    pub source_uids: Vec<u32>,
    pub destination_uids: Vec<u32>,
}

/// The per-user backend session the state machine drives.
///
/// All mailbox arguments are canonical Unicode names. UID arguments always
/// refer to the selected snapshot the engine holds; translating sequence
/// numbers happens in the engine, never here.
#[async_trait]
pub trait Session: Send {
    // --- mailbox management ---

    async fn list(
        &mut self,
        reference: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> Result<Vec<ListEntry>, ServerError>;

    async fn create(&mut self, mailbox: &Mailbox) -> Result<(), ServerError>;

    async fn delete(&mut self, mailbox: &Mailbox) -> Result<(), ServerError>;

    async fn rename(&mut self, from: &Mailbox, to: &Mailbox) -> Result<(), ServerError>;

    async fn subscribe(&mut self, mailbox: &Mailbox) -> Result<(), ServerError>;

    async fn unsubscribe(&mut self, mailbox: &Mailbox) -> Result<(), ServerError>;

    async fn status(
        &mut self,
        mailbox: &Mailbox,
        attributes: &[StatusAttribute],
    ) -> Result<Vec<StatusAttributeValue>, ServerError>;

    // --- selection and snapshots ---

    /// Opens the mailbox. A read-write select claims `\Recent` ownership of
    /// so-far-unseen arrivals; `EXAMINE` observes without claiming.
    async fn select(
        &mut self,
        mailbox: &Mailbox,
        read_only: bool,
    ) -> Result<SelectedData, ServerError>;

    /// A fresh snapshot of the selected mailbox, claiming `\Recent` for
    /// newly arrived messages when the selection is read-write.
    async fn snapshot(&mut self, mailbox: &Mailbox) -> Result<MailboxSnapshot, ServerError>;

    /// Deselects. `expunge` applies the silent `CLOSE` expunge.
    async fn close(&mut self, mailbox: &Mailbox, expunge: bool) -> Result<(), ServerError>;

    /// A hint to flush; in-process backends usually have nothing to do.
    async fn check(&mut self, mailbox: &Mailbox) -> Result<(), ServerError>;

    // --- messages ---

    async fn append(
        &mut self,
        mailbox: &Mailbox,
        messages: &[AppendMessage],
    ) -> Result<AppendResult, ServerError>;

    /// Expunges `\Deleted` messages, optionally restricted to `uids`
    /// (`UID EXPUNGE`). Returns the UIDs actually removed.
    async fn expunge(
        &mut self,
        mailbox: &Mailbox,
        uids: Option<&[u32]>,
    ) -> Result<Vec<u32>, ServerError>;

    /// Evaluates the search criteria; returns matching UIDs in ascending
    /// order.
    async fn search(
        &mut self,
        mailbox: &Mailbox,
        criteria: &SearchKey,
    ) -> Result<Vec<u32>, ServerError>;

    /// Fetches the requested attributes for each UID, in UID order.
    /// A non-peek body fetch implies setting `\Seen`.
    async fn fetch(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        attributes: &[FetchAttribute],
    ) -> Result<Vec<(u32, Vec<FetchAttributeValue>)>, ServerError>;

    /// Applies a flag mutation; returns the resulting persistent flag sets.
    async fn store(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        kind: StoreType,
        flags: &[Flag],
    ) -> Result<Vec<(u32, BTreeSet<Flag>)>, ServerError>;

    async fn copy(
        &mut self,
        mailbox: &Mailbox,
        uids: &[u32],
        destination: &Mailbox,
    ) -> Result<CopyResult, ServerError>;

    /// Called on LOGOUT or when the connection dies.
    async fn logout(&mut self) -> Result<(), ServerError>;
}
