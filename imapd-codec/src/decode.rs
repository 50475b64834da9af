//! Decoding of client messages.
//!
//! IMAP literals make it impossible to separate framing from parsing
//! completely: when the command parser runs into `{42}\r\n` at the end of
//! the buffered input, the server must send a continuation request before
//! the client will transmit the 42 octets. The parsers below therefore
//! distinguish three outcomes: success, "needs more input", and "found a
//! literal prefix" (which carries the tag so an oversized literal can be
//! rejected with a tagged NO).

use std::num::{ParseIntError, TryFromIntError};

use imapd_types::{
    auth::AuthenticateData,
    command::Command,
    core::{LiteralMode, Tag},
};
use nom::error::{ErrorKind, FromExternalError, ParseError};

use crate::{auth::authenticate_data, command::command, idle::idle_done};

/// An extended version of [`nom::IResult`].
pub(crate) type ImapResult<'a, O> = Result<(&'a [u8], O), nom::Err<ImapParseError<'a>>>;

/// An extended version of [`nom::error::Error`].
#[derive(Debug)]
pub(crate) struct ImapParseError<'a> {
    #[allow(unused)]
    pub input: &'a [u8],
    pub kind: ImapErrorKind,
}

/// An extended version of [`nom::error::ErrorKind`].
#[derive(Debug)]
pub(crate) enum ImapErrorKind {
    Literal {
        /// Filled in by the `command` parser; inner parsers don't know it.
        tag: Option<Tag>,
        length: u32,
        mode: LiteralMode,
    },
    BadNumber,
    BadBase64,
    BadDateTime,
    BadUtf7,
    LiteralContainsNull,
    RecursionLimitExceeded,
    Nom(ErrorKind),
}

impl<'a> ParseError<&'a [u8]> for ImapParseError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        Self {
            input,
            kind: ImapErrorKind::Nom(kind),
        }
    }

    fn append(input: &'a [u8], kind: ErrorKind, _: Self) -> Self {
        Self {
            input,
            kind: ImapErrorKind::Nom(kind),
        }
    }
}

impl<'a> FromExternalError<&'a [u8], ParseIntError> for ImapParseError<'a> {
    fn from_external_error(input: &'a [u8], _: ErrorKind, _: ParseIntError) -> Self {
        Self {
            input,
            kind: ImapErrorKind::BadNumber,
        }
    }
}

impl<'a> FromExternalError<&'a [u8], TryFromIntError> for ImapParseError<'a> {
    fn from_external_error(input: &'a [u8], _: ErrorKind, _: TryFromIntError) -> Self {
        Self {
            input,
            kind: ImapErrorKind::BadNumber,
        }
    }
}

impl<'a> FromExternalError<&'a [u8], std::str::Utf8Error> for ImapParseError<'a> {
    fn from_external_error(input: &'a [u8], _: ErrorKind, _: std::str::Utf8Error) -> Self {
        Self {
            input,
            kind: ImapErrorKind::BadUtf7,
        }
    }
}

impl<'a> FromExternalError<&'a [u8], base64::DecodeError> for ImapParseError<'a> {
    fn from_external_error(input: &'a [u8], _: ErrorKind, _: base64::DecodeError) -> Self {
        Self {
            input,
            kind: ImapErrorKind::BadBase64,
        }
    }
}

/// Implemented by unit structs that know how to decode one message kind.
pub trait Decoder {
    type Message;
    type Error;

    fn decode<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], Self::Message), Self::Error>;
}

/// Decodes a [`Command`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandCodec;

/// Decodes an [`AuthenticateData`] line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthenticateDataCodec;

/// Decodes the `DONE\r\n` that ends IDLE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleDoneCodec;

/// Error during command decoding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandDecodeError {
    /// More data is needed.
    Incomplete,

    /// More data is needed, and the server must act first.
    ///
    /// The decoder stopped at the beginning of literal data. For a sync
    /// literal the server must send a continuation request (or reject the
    /// command) before the client sends the remaining octets. A non-sync
    /// literal's octets follow unconditionally.
    LiteralFound {
        /// The tag of the command the literal belongs to, for rejections.
        tag: Tag,
        length: u32,
        mode: LiteralMode,
    },

    /// Decoding failed.
    Failed,
}

/// Error during authenticate-data or idle-done decoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineDecodeError {
    /// More data is needed.
    Incomplete,

    /// Decoding failed.
    Failed,
}

impl Decoder for CommandCodec {
    type Message = Command;
    type Error = CommandDecodeError;

    fn decode<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], Self::Message), Self::Error> {
        match command(input) {
            Ok((remaining, command)) => Ok((remaining, command)),
            Err(nom::Err::Incomplete(_)) => Err(CommandDecodeError::Incomplete),
            Err(nom::Err::Failure(error)) => match error.kind {
                ImapErrorKind::Literal {
                    tag: Some(tag),
                    length,
                    mode,
                } => Err(CommandDecodeError::LiteralFound { tag, length, mode }),
                _ => Err(CommandDecodeError::Failed),
            },
            Err(nom::Err::Error(_)) => Err(CommandDecodeError::Failed),
        }
    }
}

impl Decoder for AuthenticateDataCodec {
    type Message = AuthenticateData;
    type Error = LineDecodeError;

    fn decode<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], Self::Message), Self::Error> {
        match authenticate_data(input) {
            Ok((remaining, data)) => Ok((remaining, data)),
            Err(nom::Err::Incomplete(_)) => Err(LineDecodeError::Incomplete),
            Err(_) => Err(LineDecodeError::Failed),
        }
    }
}

impl Decoder for IdleDoneCodec {
    type Message = ();
    type Error = LineDecodeError;

    fn decode<'a>(&self, input: &'a [u8]) -> Result<(&'a [u8], Self::Message), Self::Error> {
        match idle_done(input) {
            Ok((remaining, ())) => Ok((remaining, ())),
            Err(nom::Err::Incomplete(_)) => Err(LineDecodeError::Incomplete),
            Err(_) => Err(LineDecodeError::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use imapd_types::command::CommandBody;

    use super::*;

    #[test]
    fn command_decode_distinguishes_incomplete_and_failed() {
        assert_eq!(
            CommandCodec.decode(b"a noop"),
            Err(CommandDecodeError::Incomplete)
        );
        assert_eq!(
            CommandCodec.decode(b"a nope\r\n"),
            Err(CommandDecodeError::Failed)
        );

        let (remaining, command) = CommandCodec.decode(b"a noop\r\nrest").unwrap();
        assert_eq!(remaining, b"rest");
        assert_eq!(command.body, CommandBody::Noop);
    }

    #[test]
    fn command_decode_reports_literal_with_tag() {
        match CommandCodec.decode(b"a login {5}\r\n") {
            Err(CommandDecodeError::LiteralFound { tag, length, mode }) => {
                assert_eq!(tag.as_ref(), "a");
                assert_eq!(length, 5);
                assert_eq!(mode, LiteralMode::Sync);
            }
            other => panic!("expected LiteralFound, got {other:?}"),
        }

        // With the literal data present, decoding goes through.
        assert!(CommandCodec.decode(b"a login {5}\r\nalice {3}\r\nxyz\r\n").is_ok());
    }

    #[test]
    fn bare_lf_is_rejected() {
        assert_eq!(
            CommandCodec.decode(b"a noop\n"),
            Err(CommandDecodeError::Failed)
        );
    }
}
