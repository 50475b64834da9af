//! Client commands.

use crate::{
    auth::AuthMechanism,
    core::{AString, Atom, Charset, Literal, NonEmptyVec, Tag},
    datetime::DateTime,
    fetch::MacroOrFetchAttributes,
    flag::{Flag, StoreResponse, StoreType},
    mailbox::{ListMailbox, Mailbox},
    search::SearchKey,
    secret::Secret,
    sequence::SequenceSet,
    status::StatusAttribute,
};

/// A complete client command: tag plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub tag: Tag,
    pub body: CommandBody,
}

impl Command {
    pub fn new(tag: Tag, body: CommandBody) -> Self {
        Self { tag, body }
    }
}

/// One message of a (MULTI)APPEND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendMessage {
    pub flags: Vec<Flag>,
    pub date: Option<DateTime>,
    pub message: Literal,
}

/// The tagged union of all understood commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    // Any state.
    Capability,
    Noop,
    Logout,

    // Not authenticated.
    StartTls,
    Authenticate {
        mechanism: AuthMechanism,
        /// SASL-IR initial response, already base64-decoded.
        initial_response: Option<Secret<Vec<u8>>>,
    },
    Login {
        username: AString,
        password: Secret<AString>,
    },

    // Authenticated.
    Select {
        mailbox: Mailbox,
    },
    Examine {
        mailbox: Mailbox,
    },
    Create {
        mailbox: Mailbox,
    },
    Delete {
        mailbox: Mailbox,
    },
    Rename {
        from: Mailbox,
        to: Mailbox,
    },
    Subscribe {
        mailbox: Mailbox,
    },
    Unsubscribe {
        mailbox: Mailbox,
    },
    List {
        reference: ListMailbox,
        pattern: ListMailbox,
    },
    Lsub {
        reference: ListMailbox,
        pattern: ListMailbox,
    },
    Status {
        mailbox: Mailbox,
        attributes: Vec<StatusAttribute>,
    },
    Append {
        mailbox: Mailbox,
        /// More than one entry means MULTIAPPEND (RFC 3502).
        messages: NonEmptyVec<AppendMessage>,
    },
    Enable {
        extensions: NonEmptyVec<Atom>,
    },

    // Selected.
    Check,
    Close,
    Unselect,
    Expunge,
    /// `UID EXPUNGE` (RFC 4315).
    ExpungeUid {
        sequence_set: SequenceSet,
    },
    Search {
        charset: Option<Charset>,
        criteria: SearchKey,
        uid: bool,
    },
    Fetch {
        sequence_set: SequenceSet,
        attributes: MacroOrFetchAttributes,
        uid: bool,
    },
    Store {
        sequence_set: SequenceSet,
        kind: StoreType,
        response: StoreResponse,
        flags: Vec<Flag>,
        uid: bool,
    },
    Copy {
        sequence_set: SequenceSet,
        mailbox: Mailbox,
        uid: bool,
    },
    Idle,
}

impl CommandBody {
    /// The wire name, for logging and error texts.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::StartTls => "STARTTLS",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Login { .. } => "LOGIN",
            Self::Select { .. } => "SELECT",
            Self::Examine { .. } => "EXAMINE",
            Self::Create { .. } => "CREATE",
            Self::Delete { .. } => "DELETE",
            Self::Rename { .. } => "RENAME",
            Self::Subscribe { .. } => "SUBSCRIBE",
            Self::Unsubscribe { .. } => "UNSUBSCRIBE",
            Self::List { .. } => "LIST",
            Self::Lsub { .. } => "LSUB",
            Self::Status { .. } => "STATUS",
            Self::Append { .. } => "APPEND",
            Self::Enable { .. } => "ENABLE",
            Self::Check => "CHECK",
            Self::Close => "CLOSE",
            Self::Unselect => "UNSELECT",
            Self::Expunge => "EXPUNGE",
            Self::ExpungeUid { .. } => "UID EXPUNGE",
            Self::Search { uid, .. } => {
                if *uid {
                    "UID SEARCH"
                } else {
                    "SEARCH"
                }
            }
            Self::Fetch { uid, .. } => {
                if *uid {
                    "UID FETCH"
                } else {
                    "FETCH"
                }
            }
            Self::Store { uid, .. } => {
                if *uid {
                    "UID STORE"
                } else {
                    "STORE"
                }
            }
            Self::Copy { uid, .. } => {
                if *uid {
                    "UID COPY"
                } else {
                    "COPY"
                }
            }
            Self::Idle => "IDLE",
        }
    }
}
