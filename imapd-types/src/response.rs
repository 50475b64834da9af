//! Server responses.

use std::fmt;

use crate::{
    auth::AuthMechanism,
    core::{Atom, Charset, NonEmptyVec, QuotedChar, Tag, Text, TextError},
    fetch::FetchAttributeValue,
    flag::{Flag, FlagNameAttribute, FlagPerm},
    mailbox::Mailbox,
    sequence::SequenceSet,
    status::StatusAttributeValue,
};

/// The first line the server sends after accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub kind: GreetingKind,
    pub code: Option<Code>,
    pub text: Text,
}

impl Greeting {
    pub fn ok(code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self {
            kind: GreetingKind::Ok,
            code,
            text: Text::try_from(text)?,
        })
    }

    pub fn preauth(code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self {
            kind: GreetingKind::PreAuth,
            code,
            text: Text::try_from(text)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreetingKind {
    /// Connection starts in the not-authenticated state.
    Ok,
    /// The transport already authenticated the user.
    PreAuth,
    /// The server refuses the connection.
    Bye,
}

impl fmt::Display for GreetingKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::PreAuth => "PREAUTH",
            Self::Bye => "BYE",
        })
    }
}

/// Any response after the greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status(Status),
    Data(Data),
    Continue(Continue),
}

/// OK / NO / BAD / BYE, tagged or untagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok {
        tag: Option<Tag>,
        code: Option<Code>,
        text: Text,
    },
    No {
        tag: Option<Tag>,
        code: Option<Code>,
        text: Text,
    },
    Bad {
        tag: Option<Tag>,
        code: Option<Code>,
        text: Text,
    },
    /// Always untagged; announces an imminent connection close.
    Bye { code: Option<Code>, text: Text },
}

impl Status {
    pub fn ok(tag: Option<Tag>, code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self::Ok {
            tag,
            code,
            text: Text::try_from(text)?,
        })
    }

    pub fn no(tag: Option<Tag>, code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self::No {
            tag,
            code,
            text: Text::try_from(text)?,
        })
    }

    pub fn bad(tag: Option<Tag>, code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self::Bad {
            tag,
            code,
            text: Text::try_from(text)?,
        })
    }

    pub fn bye(code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self::Bye {
            code,
            text: Text::try_from(text)?,
        })
    }

    /// The tag, if this is a tagged completion.
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Self::Ok { tag, .. } | Self::No { tag, .. } | Self::Bad { tag, .. } => tag.as_ref(),
            Self::Bye { .. } => None,
        }
    }
}

/// Untagged data responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    Capability(NonEmptyVec<Capability>),
    List {
        items: Vec<FlagNameAttribute>,
        delimiter: Option<QuotedChar>,
        mailbox: Mailbox,
    },
    Lsub {
        items: Vec<FlagNameAttribute>,
        delimiter: Option<QuotedChar>,
        mailbox: Mailbox,
    },
    Status {
        mailbox: Mailbox,
        items: Vec<StatusAttributeValue>,
    },
    Search(Vec<u32>),
    Flags(Vec<Flag>),
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    Fetch {
        seq: u32,
        attributes: NonEmptyVec<FetchAttributeValue>,
    },
    /// `* ENABLED ...` (RFC 5161).
    Enabled { extensions: Vec<Atom> },
}

/// `+ ...`, i.e., a continuation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continue {
    /// Human-readable invitation, e.g., `+ Ready for literal data`.
    Basic { code: Option<Code>, text: Text },
    /// A base64 server challenge during `AUTHENTICATE`; may be empty.
    Base64(Vec<u8>),
}

impl Continue {
    pub fn basic(code: Option<Code>, text: &str) -> Result<Self, TextError> {
        Ok(Self::Basic {
            code,
            text: Text::try_from(text)?,
        })
    }
}

/// A machine-readable response code, the `[...]` part of a status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    Alert,
    BadCharset { allowed: Vec<Charset> },
    Capability(NonEmptyVec<Capability>),
    Parse,
    PermanentFlags(Vec<FlagPerm>),
    ReadOnly,
    ReadWrite,
    TryCreate,
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),

    // RFC 4315 (UIDPLUS).
    AppendUid {
        uid_validity: u32,
        uids: SequenceSet,
    },
    CopyUid {
        uid_validity: u32,
        source: SequenceSet,
        destination: SequenceSet,
    },
    UidNotSticky,

    // RFC 5530 and friends.
    AlreadyExists,
    AuthenticationFailed,
    AuthorizationFailed,
    Cannot,
    ClientBug,
    ExpungeIssued,
    Limit,
    Nonexistent,
    OverQuota,
    /// The command needs a TLS-protected connection first.
    PrivacyRequired,
    ServerBug,
    /// RFC 7888: a (non-synchronizing) literal exceeded the server limit.
    TooBig,

    /// Fallback for anything else.
    Other(CodeOther),
}

/// An unrecognized or implementation-defined response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeOther(pub String);

/// An advertised capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Imap4Rev1,
    Auth(AuthMechanism),
    LoginDisabled,
    StartTls,
    Idle,
    /// RFC 7888 `LITERAL+`.
    LiteralPlus,
    MultiAppend,
    UidPlus,
    Binary,
    Enable,
    Unselect,
    /// RFC 7889; `None` means the limit is not announced.
    AppendLimit(Option<u32>),
    Other(Atom),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Imap4Rev1 => f.write_str("IMAP4rev1"),
            Self::Auth(mechanism) => write!(f, "AUTH={mechanism}"),
            Self::LoginDisabled => f.write_str("LOGINDISABLED"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Idle => f.write_str("IDLE"),
            Self::LiteralPlus => f.write_str("LITERAL+"),
            Self::MultiAppend => f.write_str("MULTIAPPEND"),
            Self::UidPlus => f.write_str("UIDPLUS"),
            Self::Binary => f.write_str("BINARY"),
            Self::Enable => f.write_str("ENABLE"),
            Self::Unselect => f.write_str("UNSELECT"),
            Self::AppendLimit(None) => f.write_str("APPENDLIMIT"),
            Self::AppendLimit(Some(limit)) => write!(f, "APPENDLIMIT={limit}"),
            Self::Other(atom) => write!(f, "{atom}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_wire_names() {
        assert_eq!(Capability::Imap4Rev1.to_string(), "IMAP4rev1");
        assert_eq!(
            Capability::Auth(AuthMechanism::Plain).to_string(),
            "AUTH=PLAIN"
        );
        assert_eq!(Capability::AppendLimit(Some(1024)).to_string(), "APPENDLIMIT=1024");
        assert_eq!(Capability::LiteralPlus.to_string(), "LITERAL+");
    }

    #[test]
    fn status_helpers_carry_tags() {
        let tag = Tag::try_from("a1").unwrap();
        let status = Status::ok(Some(tag.clone()), None, "done").unwrap();
        assert_eq!(status.tag(), Some(&tag));

        let bye = Status::bye(None, "off").unwrap();
        assert_eq!(bye.tag(), None);
    }
}
