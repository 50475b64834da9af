//! Flag-related types.

use std::fmt;

use crate::core::Atom;

/// A message flag.
///
/// System flags are pre-defined by RFC 3501 and written `\Name`; their case
/// is not significant on the wire and they canonicalize to the spelling
/// below. Flags starting with `\` that are not system flags are extension
/// flags. Keywords are server- or user-defined atoms without the backslash
/// and keep the case the client used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    /// `\Answered`
    Answered,
    /// `\Deleted` (subject to a later EXPUNGE)
    Deleted,
    /// `\Draft`
    Draft,
    /// `\Flagged`
    Flagged,
    /// `\Seen`
    Seen,
    /// A future expansion of a system flag, e.g., `\XCustom`.
    Extension(Atom),
    /// A keyword.
    Keyword(Atom),
}

impl Flag {
    /// Canonicalizes a `\`-prefixed flag name (without the backslash).
    pub fn system(atom: Atom) -> Self {
        match atom.as_ref().to_ascii_lowercase().as_str() {
            "answered" => Self::Answered,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            "flagged" => Self::Flagged,
            "seen" => Self::Seen,
            _ => Self::Extension(atom),
        }
    }

    pub fn keyword(atom: Atom) -> Self {
        Self::Keyword(atom)
    }
}

impl TryFrom<&str> for Flag {
    type Error = crate::core::AtomError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(if let Some(value) = value.strip_prefix('\\') {
            Self::system(Atom::try_from(value)?)
        } else {
            Self::keyword(Atom::try_from(value)?)
        })
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Flag::Answered => f.write_str("\\Answered"),
            Flag::Deleted => f.write_str("\\Deleted"),
            Flag::Draft => f.write_str("\\Draft"),
            Flag::Flagged => f.write_str("\\Flagged"),
            Flag::Seen => f.write_str("\\Seen"),
            Flag::Extension(atom) => write!(f, "\\{atom}"),
            Flag::Keyword(atom) => write!(f, "{atom}"),
        }
    }
}

/// A flag as it appears in `FETCH` data.
///
/// `\Recent` is valid here but can never be stored by the client; it exists
/// only for the first session notified about a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagFetch {
    Flag(Flag),
    /// `\Recent`
    Recent,
}

impl From<Flag> for FlagFetch {
    fn from(flag: Flag) -> Self {
        Self::Flag(flag)
    }
}

impl fmt::Display for FlagFetch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Flag(flag) => flag.fmt(f),
            Self::Recent => f.write_str("\\Recent"),
        }
    }
}

/// A flag as it appears in the `PERMANENTFLAGS` response code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagPerm {
    Flag(Flag),
    /// `\*`, i.e., the client may create new keywords.
    Asterisk,
}

impl fmt::Display for FlagPerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Flag(flag) => flag.fmt(f),
            Self::Asterisk => f.write_str("\\*"),
        }
    }
}

/// A mailbox name attribute in `LIST`/`LSUB` responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagNameAttribute {
    /// `\Noinferiors`
    Noinferiors,
    /// `\Noselect`
    Noselect,
    /// `\Marked`
    Marked,
    /// `\Unmarked`
    Unmarked,
    Extension(Atom),
}

impl fmt::Display for FlagNameAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Noinferiors => f.write_str("\\Noinferiors"),
            Self::Noselect => f.write_str("\\Noselect"),
            Self::Marked => f.write_str("\\Marked"),
            Self::Unmarked => f.write_str("\\Unmarked"),
            Self::Extension(atom) => write!(f, "\\{atom}"),
        }
    }
}

/// What a `STORE` command does with the given flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    /// `FLAGS`
    Replace,
    /// `+FLAGS`
    Add,
    /// `-FLAGS`
    Remove,
}

/// Whether `STORE` suppresses the untagged FETCH responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreResponse {
    Answer,
    /// `.SILENT`
    Silent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_flags_canonicalize_case() {
        for raw in ["\\seen", "\\SEEN", "\\Seen", "\\sEeN"] {
            assert_eq!(Flag::try_from(raw).unwrap(), Flag::Seen);
        }
        assert_eq!(Flag::Seen.to_string(), "\\Seen");
    }

    #[test]
    fn keywords_keep_case() {
        let flag = Flag::try_from("Forwarded").unwrap();
        assert_eq!(flag, Flag::Keyword(Atom::try_from("Forwarded").unwrap()));
        assert_eq!(flag.to_string(), "Forwarded");
    }

    #[test]
    fn unknown_backslash_flag_is_extension() {
        assert!(matches!(
            Flag::try_from("\\XNope").unwrap(),
            Flag::Extension(_)
        ));
    }
}
