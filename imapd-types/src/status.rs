//! `STATUS` attributes.

use std::fmt;

/// What the client asked `STATUS` to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusAttribute {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl fmt::Display for StatusAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
        })
    }
}

/// One reported attribute in the `STATUS` data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusAttributeValue {
    Messages(u32),
    Recent(u32),
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
}

impl fmt::Display for StatusAttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Messages(n) => write!(f, "MESSAGES {n}"),
            Self::Recent(n) => write!(f, "RECENT {n}"),
            Self::UidNext(n) => write!(f, "UIDNEXT {n}"),
            Self::UidValidity(n) => write!(f, "UIDVALIDITY {n}"),
            Self::Unseen(n) => write!(f, "UNSEEN {n}"),
        }
    }
}
