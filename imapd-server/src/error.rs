//! The error taxonomy of the backend contract.
//!
//! Every variant maps deterministically to one IMAP completion shape; the
//! connection layer owns that mapping so backends never format protocol
//! text themselves.

use imapd_types::response::Code;
use thiserror::Error;

/// What a [`crate::session::Session`] operation can fail with.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad credentials or a disabled mechanism. `NO [AUTHENTICATIONFAILED]`.
    #[error("Invalid authentication credentials")]
    InvalidAuth,

    /// Valid credentials, but the identity may not act as the requested
    /// user. `NO [AUTHORIZATIONFAILED]`.
    #[error("Not authorized")]
    AuthorizationFailed,

    /// The mailbox does not exist. `NO [TRYCREATE]` on APPEND/COPY,
    /// `NO [NONEXISTENT]` elsewhere.
    #[error("Mailbox {0:?} not found")]
    MailboxNotFound(String),

    /// Name collision on CREATE/RENAME. `NO [ALREADYEXISTS]`.
    #[error("Mailbox {0:?} already exists")]
    MailboxConflict(String),

    /// DELETE refused because inferior mailboxes exist. `NO`.
    #[error("Mailbox {0:?} has inferior mailboxes")]
    MailboxHasChildren(String),

    /// Write operation against a read-only selection. `NO [READ-ONLY]`.
    #[error("Mailbox {0:?} is read-only")]
    MailboxReadOnly(String),

    /// APPEND failed; the embedded code (e.g. `OVERQUOTA`, `LIMIT`)
    /// travels into the NO response.
    #[error("Append failed")]
    AppendFailure(Option<Code>),

    /// SEARCH refused, typically an unsupported charset.
    /// `NO [BADCHARSET (...)]`.
    #[error("Search not possible")]
    SearchNotAllowed(Option<Code>),

    /// The connection must go down. Untagged BYE, then close.
    #[error("Connection closed: {0}")]
    CloseConnection(String),

    /// Anything else inside the backend; logged, answered with a plain NO,
    /// and the connection continues.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
