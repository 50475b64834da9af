//! `AUTHENTICATE`-related types.

use std::fmt;

use crate::{core::Atom, secret::Secret};

/// A SASL mechanism name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// RFC 4616.
    Plain,
    /// The pre-SASL username/password exchange still used by some clients.
    Login,
    Other(Atom),
}

impl From<Atom> for AuthMechanism {
    fn from(atom: Atom) -> Self {
        match atom.as_ref().to_ascii_uppercase().as_str() {
            "PLAIN" => Self::Plain,
            "LOGIN" => Self::Login,
            _ => Self::Other(atom),
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("PLAIN"),
            Self::Login => f.write_str("LOGIN"),
            Self::Other(atom) => write!(f, "{}", atom.as_ref().to_ascii_uppercase()),
        }
    }
}

/// One client continuation line during `AUTHENTICATE`: either the decoded
/// base64 payload or the `*` cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticateData {
    Continue(Secret<Vec<u8>>),
    Cancel,
}
