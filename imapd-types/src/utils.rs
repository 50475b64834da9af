//! Helpers shared by the type definitions and the codec.

use std::borrow::Cow;

/// Character classes of the IMAP formal syntax (RFC 3501, section 9).
pub mod indicators {
    /// `CHAR = %x01-7F`
    pub fn is_char(byte: u8) -> bool {
        matches!(byte, 0x01..=0x7f)
    }

    /// `CTL = %x00-1F / %x7F`
    pub fn is_ctl(byte: u8) -> bool {
        matches!(byte, 0x00..=0x1f | 0x7f)
    }

    /// `quoted-specials = DQUOTE / "\"`
    pub fn is_quoted_specials(byte: u8) -> bool {
        byte == b'"' || byte == b'\\'
    }

    /// `list-wildcards = "%" / "*"`
    pub fn is_list_wildcards(byte: u8) -> bool {
        byte == b'%' || byte == b'*'
    }

    /// `resp-specials = "]"`
    #[inline]
    pub fn is_resp_specials(byte: u8) -> bool {
        byte == b']'
    }

    /// `atom-specials = "(" / ")" / "{" / SP / CTL / list-wildcards / quoted-specials / resp-specials`
    pub fn is_atom_specials(byte: u8) -> bool {
        match byte {
            b'(' | b')' | b'{' | b' ' => true,
            c if is_ctl(c) => true,
            c if is_list_wildcards(c) => true,
            c if is_quoted_specials(c) => true,
            c if is_resp_specials(c) => true,
            _ => false,
        }
    }

    /// `ATOM-CHAR = <any CHAR except atom-specials>`
    pub fn is_atom_char(byte: u8) -> bool {
        is_char(byte) && !is_atom_specials(byte)
    }

    /// `ASTRING-CHAR = ATOM-CHAR / resp-specials`
    pub fn is_astring_char(byte: u8) -> bool {
        is_atom_char(byte) || is_resp_specials(byte)
    }

    /// `list-char = ATOM-CHAR / list-wildcards / resp-specials`
    pub fn is_list_char(byte: u8) -> bool {
        is_atom_char(byte) || is_list_wildcards(byte) || is_resp_specials(byte)
    }

    /// `CHAR8 = %x01-ff`
    #[inline]
    pub fn is_char8(byte: u8) -> bool {
        byte != 0
    }

    /// `TEXT-CHAR = <any CHAR except CR and LF>`
    pub fn is_text_char(byte: u8) -> bool {
        matches!(byte, 0x01..=0x09 | 0x0b..=0x0c | 0x0e..=0x7f)
    }

    /// `tag = 1*<any ASTRING-CHAR except "+">`
    pub fn is_tag_char(byte: u8) -> bool {
        is_astring_char(byte) && byte != b'+'
    }
}

/// Escapes `"` and `\` for use inside a quoted string.
///
/// Only allocates when an escape is actually required.
pub fn escape_quoted(unescaped: &str) -> Cow<str> {
    let mut escaped = Cow::Borrowed(unescaped);

    if escaped.contains('\\') {
        escaped = Cow::Owned(escaped.replace('\\', "\\\\"));
    }

    if escaped.contains('"') {
        escaped = Cow::Owned(escaped.replace('"', "\\\""));
    }

    escaped
}

/// Reverses [`escape_quoted`].
pub fn unescape_quoted(escaped: &str) -> Cow<str> {
    let mut unescaped = Cow::Borrowed(escaped);

    if unescaped.contains("\\\\") {
        unescaped = Cow::Owned(unescaped.replace("\\\\", "\\"));
    }

    if unescaped.contains("\\\"") {
        unescaped = Cow::Owned(unescaped.replace("\\\"", "\""));
    }

    unescaped
}
