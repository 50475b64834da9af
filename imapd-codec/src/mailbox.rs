//! Parsers for mailbox names and `LIST` patterns.
//!
//! The wire form is modified UTF-7; decoding to Unicode happens here, so
//! everything above the codec works with readable names.

use std::str::from_utf8;

use imapd_types::{
    core::AString,
    mailbox::{utf7, ListMailbox, Mailbox},
    utils::indicators::is_list_char,
};
use nom::{
    branch::alt,
    bytes::streaming::take_while1,
    combinator::{map, map_res},
};

use crate::{
    core::{astring, string},
    decode::{ImapErrorKind, ImapParseError, ImapResult},
};

/// `mailbox = "INBOX" / astring`
///
/// INBOX matches case-insensitively; any other name is decoded from
/// modified UTF-7.
pub(crate) fn mailbox(input: &[u8]) -> ImapResult<Mailbox> {
    let (remaining, raw) = astring(input)?;

    Ok((remaining, decode_mailbox(&raw, input)?))
}

pub(crate) fn decode_mailbox<'a>(
    raw: &AString,
    input: &'a [u8],
) -> Result<Mailbox, nom::Err<ImapParseError<'a>>> {
    let fail = |kind| nom::Err::Failure(ImapParseError { input, kind });

    let wire = from_utf8(raw.as_bytes()).map_err(|_| fail(ImapErrorKind::BadUtf7))?;
    let name = utf7::decode(wire).map_err(|_| fail(ImapErrorKind::BadUtf7))?;

    Mailbox::try_from(name).map_err(|_| fail(ImapErrorKind::BadUtf7))
}

/// `list-mailbox = 1*list-char / string`
///
/// Like an astring, but additionally allows the `%` and `*` wildcards and
/// may be empty (as a quoted string).
pub(crate) fn list_mailbox(input: &[u8]) -> ImapResult<ListMailbox> {
    let (remaining, raw) = alt((
        map(take_while1(is_list_char), |bytes: &[u8]| {
            // `is_list_char` guarantees ASCII.
            from_utf8(bytes).unwrap().to_owned()
        }),
        map_res(string, |string| {
            String::from_utf8(string.into_bytes()).map_err(|error| error.utf8_error())
        }),
    ))(input)?;

    let decoded = utf7::decode(&raw).map_err(|_| {
        nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::BadUtf7,
        })
    })?;

    Ok((remaining, ListMailbox(decoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox() {
        let (_, mb) = mailbox(b"inBox ").unwrap();
        assert_eq!(mb, Mailbox::Inbox);

        let (_, mb) = mailbox(b"Archive/2023 ").unwrap();
        assert_eq!(mb.as_str(), "Archive/2023");

        // Quoted and encoded.
        let (_, mb) = mailbox(b"\"&U,BTFw-\" ").unwrap();
        assert_eq!(mb.as_str(), "\u{53f0}\u{5317}");

        // Literal form also works.
        let (_, mb) = mailbox(b"{5}\r\nSpam! ").unwrap();
        assert_eq!(mb.as_str(), "Spam!");
    }

    #[test]
    fn test_list_mailbox() {
        let (_, pattern) = list_mailbox(b"Archive/* ").unwrap();
        assert_eq!(pattern.as_str(), "Archive/*");

        let (_, pattern) = list_mailbox(b"% ").unwrap();
        assert_eq!(pattern.as_str(), "%");

        let (_, pattern) = list_mailbox(b"\"\" ").unwrap();
        assert_eq!(pattern.as_str(), "");
    }
}
