//! Parsers for the core ("string") types.

use std::str::from_utf8;

#[cfg(not(feature = "quirk_crlf_relaxed"))]
use abnf_core::streaming::crlf;
#[cfg(feature = "quirk_crlf_relaxed")]
use abnf_core::streaming::crlf_relaxed as crlf;
use abnf_core::{is_alpha, is_digit, streaming::dquote};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use imapd_types::{
    core::{
        AString, Atom, AtomExt, Charset, IString, Literal, LiteralMode, Quoted, Tag,
    },
    utils::{
        indicators::{
            is_astring_char, is_atom_char, is_quoted_specials, is_tag_char, is_text_char,
        },
        unescape_quoted,
    },
};
use nom::{
    branch::alt,
    bytes::streaming::{escaped, tag, take, take_while, take_while1},
    character::streaming::{char, digit1, one_of},
    combinator::{map, map_res, opt, recognize, verify},
    sequence::{delimited, terminated, tuple},
};

use crate::decode::{ImapErrorKind, ImapParseError, ImapResult};

// ----- number -----

/// `number = 1*DIGIT`
///
/// Unsigned 32-bit integer (0 <= n < 4,294,967,296)
pub(crate) fn number(input: &[u8]) -> ImapResult<u32> {
    map_res(
        // `1*DIGIT` is ASCII-only, so `unwrap` can't panic.
        map(digit1, |bytes| from_utf8(bytes).unwrap()),
        str::parse::<u32>,
    )(input)
}

/// `nz-number = digit-nz *DIGIT`
pub(crate) fn nz_number(input: &[u8]) -> ImapResult<u32> {
    verify(number, |number| *number != 0)(input)
}

// ----- string -----

/// `string = quoted / literal`
pub(crate) fn string(input: &[u8]) -> ImapResult<IString> {
    alt((map(quoted, IString::Quoted), map(literal, IString::Literal)))(input)
}

/// `quoted = DQUOTE *QUOTED-CHAR DQUOTE`
///
/// Only allocates anew when escaped characters need replacing.
pub(crate) fn quoted(input: &[u8]) -> ImapResult<Quoted> {
    let mut parser = tuple((
        dquote,
        map(
            escaped(
                take_while1(is_any_text_char_except_quoted_specials),
                '\\',
                one_of("\\\""),
            ),
            // The matched bytes are ASCII, so `unwrap` can't panic.
            |val| from_utf8(val).unwrap(),
        ),
        dquote,
    ));

    let (remaining, (_, quoted, _)) = parser(input)?;

    Ok((
        remaining,
        Quoted::unvalidated(unescape_quoted(quoted).into_owned()),
    ))
}

pub(crate) fn is_any_text_char_except_quoted_specials(byte: u8) -> bool {
    is_text_char(byte) && !is_quoted_specials(byte)
}

/// `literal = "{" number ["+"] "}" CRLF *CHAR8`
///
/// The `+` form is the non-synchronizing literal of RFC 7888.
pub(crate) fn literal(input: &[u8]) -> ImapResult<Literal> {
    let (remaining, (length, mode)) = terminated(
        delimited(
            tag(b"{"),
            tuple((
                number,
                map(opt(char('+')), |plus| {
                    plus.map(|_| LiteralMode::NonSync)
                        .unwrap_or(LiteralMode::Sync)
                }),
            )),
            tag(b"}"),
        ),
        crlf,
    )(input)?;

    // Nothing buffered after the prefix: the octets have not been received
    // (or, for the sync form, not even been sent). An upper layer, e.g. the
    // `command` parser, knows the tag and fills it in.
    if remaining.is_empty() {
        return Err(nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::Literal {
                tag: None,
                length,
                mode,
            },
        }));
    }

    let (remaining, data) = take(length)(remaining)?;

    match Literal::try_from(data) {
        Ok(mut literal) => {
            literal.set_mode(mode);

            Ok((remaining, literal))
        }
        Err(_) => Err(nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::LiteralContainsNull,
        })),
    }
}

// ----- astring ----- atom (roughly) or string

/// `astring = 1*ASTRING-CHAR / string`
pub(crate) fn astring(input: &[u8]) -> ImapResult<AString> {
    alt((
        map(take_while1(is_astring_char), |bytes: &[u8]| {
            // `is_astring_char` guarantees ASCII and `AtomExt` validity.
            AString::Atom(AtomExt::unvalidated(from_utf8(bytes).unwrap()))
        }),
        map(string, AString::String),
    ))(input)
}

/// `atom = 1*ATOM-CHAR`
pub(crate) fn atom(input: &[u8]) -> ImapResult<Atom> {
    let (remaining, parsed) = take_while1(is_atom_char)(input)?;

    // `is_atom_char` guarantees ASCII and `Atom` validity.
    Ok((remaining, Atom::unvalidated(from_utf8(parsed).unwrap())))
}

// ----- base64 -----

/// `base64 = *(4base64-char) [base64-terminal]`
pub(crate) fn base64(input: &[u8]) -> ImapResult<Vec<u8>> {
    map_res(
        recognize(tuple((
            take_while(is_base64_char),
            opt(alt((tag("=="), tag("=")))),
        ))),
        |bytes| BASE64.decode(bytes),
    )(input)
}

/// `base64-char = ALPHA / DIGIT / "+" / "/" ; case-sensitive`
pub(crate) fn is_base64_char(byte: u8) -> bool {
    is_alpha(byte) || is_digit(byte) || byte == b'+' || byte == b'/'
}

// ----- charset -----

/// `charset = atom / quoted`
pub(crate) fn charset(input: &[u8]) -> ImapResult<Charset> {
    alt((map(atom, Charset::Atom), map(quoted, Charset::Quoted)))(input)
}

// ----- tag -----

/// `tag = 1*<any ASTRING-CHAR except "+">`
pub(crate) fn tag_imap(input: &[u8]) -> ImapResult<Tag> {
    map(take_while1(is_tag_char), |bytes| {
        // `is_tag_char` guarantees ASCII.
        Tag::unvalidated(from_utf8(bytes).unwrap())
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom() {
        assert!(atom(b" ").is_err());
        assert!(atom(b"").is_err());

        let (rem, val) = atom(b"a(").unwrap();
        assert_eq!(val, Atom::try_from("a").unwrap());
        assert_eq!(rem, b"(");

        let (rem, val) = atom(b"xxx yyy").unwrap();
        assert_eq!(val, Atom::try_from("xxx").unwrap());
        assert_eq!(rem, b" yyy");
    }

    #[test]
    fn test_quoted() {
        let (rem, val) = quoted(br#""Hello"???"#).unwrap();
        assert_eq!(rem, b"???");
        assert_eq!(val, Quoted::try_from("Hello").unwrap());

        // Empty quoted string is legal.
        let (rem, val) = quoted(br#""" "#).unwrap();
        assert_eq!(rem, b" ");
        assert_eq!(val, Quoted::default());

        // Allowed escapes...
        assert!(quoted(br#""Hello \" "???"#).is_ok());
        assert!(quoted(br#""Hello \\ "???"#).is_ok());

        // ... and everything else is not.
        assert!(quoted(br#""Hello \a "???"#).is_err());

        let (_, val) = quoted(br#""Hello \"World\""???"#).unwrap();
        assert_eq!(val, Quoted::try_from(r#"Hello "World""#).unwrap());

        // Incomplete vs. error.
        assert!(matches!(quoted(br#"""#), Err(nom::Err::Incomplete(_))));
        assert!(matches!(quoted(br#""Hello "#), Err(nom::Err::Incomplete(_))));
        assert!(matches!(quoted(br#"\"#), Err(nom::Err::Error(_))));
    }

    #[test]
    fn test_number() {
        assert!(number(b"").is_err());
        assert!(number(b"?").is_err());

        assert_eq!(number(b"0?").unwrap().1, 0);
        assert_eq!(number(b"55?").unwrap().1, 55);
        // Does not fit 32 bits.
        assert!(number(b"4294967296?").is_err());
    }

    #[test]
    fn test_nz_number() {
        assert!(nz_number(b"0?").is_err());
        assert_eq!(nz_number(b"55?").unwrap().1, 55);
    }

    #[test]
    fn test_literal() {
        assert!(literal(b"{3}\r\n123").is_ok());
        assert!(literal(b"{3}\r\n1\x003").is_err());

        let (rem, val) = literal(b"{3}\r\n123xxx").unwrap();
        assert_eq!(rem, b"xxx");
        assert_eq!(val, Literal::try_from(b"123".as_slice()).unwrap());

        // Non-sync form.
        let (_, val) = literal(b"{3+}\r\n123xxx").unwrap();
        assert_eq!(val.mode(), LiteralMode::NonSync);

        // Prefix only: the continuation signal.
        assert!(matches!(
            literal(b"{3}\r\n"),
            Err(nom::Err::Failure(ImapParseError {
                kind: ImapErrorKind::Literal { length: 3, .. },
                ..
            }))
        ));
    }

    #[test]
    fn test_base64() {
        let (_, val) = base64(b"YWJj ").unwrap();
        assert_eq!(val, b"abc");

        let (_, val) = base64(b"YQ== ").unwrap();
        assert_eq!(val, b"a");
    }
}
