//! Mailbox names.
//!
//! Internally a mailbox name is Unicode. On the wire it is transported in
//! IMAP's modified UTF-7 (RFC 3501, section 5.1.3): printable ASCII except
//! `&` stays as-is, `&` becomes `&-`, and everything else is carried as
//! base64-encoded UTF-16BE in `&...-` sections, with `,` standing in for
//! `/` in the base64 alphabet. The codec converts at the boundary; nothing
//! above it ever sees the encoded form.
//!
//! The special name `INBOX` is case-insensitive and canonicalized to
//! uppercase.

use std::fmt;

use thiserror::Error;

/// A mailbox name, decoded and canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mailbox {
    Inbox,
    Other(MailboxOther),
}

impl Mailbox {
    /// The canonical Unicode name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "INBOX",
            Self::Other(other) => other.as_ref(),
        }
    }
}

impl TryFrom<&str> for Mailbox {
    type Error = MailboxError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("INBOX") {
            return Ok(Self::Inbox);
        }

        Ok(Self::Other(MailboxOther::try_from(value)?))
    }
}

impl TryFrom<String> for Mailbox {
    type Error = MailboxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any mailbox name that is not `INBOX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailboxOther(String);

impl MailboxOther {
    pub fn verify(value: &str) -> Result<(), MailboxError> {
        if value.is_empty() {
            return Err(MailboxError::Empty);
        }

        if value.chars().any(|c| matches!(c, '\0' | '\r' | '\n')) {
            return Err(MailboxError::CharNotAllowed);
        }

        Ok(())
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for MailboxOther {
    type Error = MailboxError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        if value.eq_ignore_ascii_case("INBOX") {
            return Err(MailboxError::IsInbox);
        }

        Ok(Self(value.to_owned()))
    }
}

impl AsRef<str> for MailboxOther {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum MailboxError {
    #[error("Mailbox names must not be empty")]
    Empty,
    #[error("Mailbox names must not contain NUL, CR, or LF")]
    CharNotAllowed,
    #[error("`INBOX` must use the Mailbox::Inbox variant")]
    IsInbox,
}

/// A `LIST`/`LSUB` pattern.
///
/// Unlike [`Mailbox`] this may be empty (to query the hierarchy delimiter)
/// and may contain the `%` and `*` wildcards. It is kept decoded, like
/// mailbox names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ListMailbox(pub String);

impl ListMailbox {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ListMailbox {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Modified UTF-7 (the `&...-` encoding of non-ASCII mailbox names).
pub mod utf7 {
    use base64::{
        alphabet,
        engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
        Engine,
    };
    use thiserror::Error;

    // RFC 3501 base64 variant: `,` instead of `/`, never padded.
    const MUTF7: GeneralPurpose = GeneralPurpose::new(
        &alphabet::IMAP_MUTF7,
        GeneralPurposeConfig::new()
            .with_encode_padding(false)
            .with_decode_padding_mode(DecodePaddingMode::RequireNone),
    );

    #[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
    pub enum Utf7Error {
        #[error("Unterminated `&` section")]
        Unterminated,
        #[error("Invalid base64 in `&...-` section")]
        BadBase64,
        #[error("Encoded section is not UTF-16BE")]
        BadUtf16,
    }

    /// Decodes a wire-form mailbox name to Unicode.
    pub fn decode(input: &str) -> Result<String, Utf7Error> {
        let mut output = String::with_capacity(input.len());
        let mut chars = input.char_indices();

        while let Some((start, c)) = chars.next() {
            if c != '&' {
                output.push(c);
                continue;
            }

            let rest = &input[start + 1..];
            let end = rest.find('-').ok_or(Utf7Error::Unterminated)?;
            let section = &rest[..end];

            if section.is_empty() {
                // `&-` is the escape for a literal ampersand.
                output.push('&');
            } else {
                let bytes = MUTF7
                    .decode(section)
                    .map_err(|_| Utf7Error::BadBase64)?;

                if bytes.len() % 2 != 0 {
                    return Err(Utf7Error::BadUtf16);
                }

                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();

                output.push_str(&String::from_utf16(&units).map_err(|_| Utf7Error::BadUtf16)?);
            }

            // Skip the consumed section including the trailing `-`.
            for _ in 0..=end {
                chars.next();
            }
        }

        Ok(output)
    }

    /// Encodes a Unicode mailbox name into its wire form.
    pub fn encode(input: &str) -> String {
        let mut output = String::with_capacity(input.len());
        let mut pending: Vec<u16> = Vec::new();

        let mut flush = |output: &mut String, pending: &mut Vec<u16>| {
            if !pending.is_empty() {
                let bytes: Vec<u8> = pending
                    .iter()
                    .flat_map(|unit| unit.to_be_bytes())
                    .collect();
                output.push('&');
                output.push_str(&MUTF7.encode(bytes));
                output.push('-');
                pending.clear();
            }
        };

        for c in input.chars() {
            match c {
                '&' => {
                    flush(&mut output, &mut pending);
                    output.push_str("&-");
                }
                ' '..='~' => {
                    flush(&mut output, &mut pending);
                    output.push(c);
                }
                _ => {
                    let mut units = [0u16; 2];
                    pending.extend_from_slice(c.encode_utf16(&mut units));
                }
            }
        }

        flush(&mut output, &mut pending);
        output
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ascii_passes_through() {
            assert_eq!(decode("INBOX/Sent").unwrap(), "INBOX/Sent");
            assert_eq!(encode("INBOX/Sent"), "INBOX/Sent");
        }

        #[test]
        fn ampersand_escape() {
            assert_eq!(decode("&-").unwrap(), "&");
            assert_eq!(encode("Tom & Jerry"), "Tom &- Jerry");
            assert_eq!(decode("Tom &- Jerry").unwrap(), "Tom & Jerry");
        }

        #[test]
        fn rfc_3501_example() {
            // The mixed Chinese/Japanese example from RFC 3501 and RFC 2152.
            assert_eq!(
                decode("~peter/mail/&U,BTFw-/&ZeVnLIqe-").unwrap(),
                "~peter/mail/台北/日本語"
            );
            assert_eq!(encode("~peter/mail/台北/日本語"), "~peter/mail/&U,BTFw-/&ZeVnLIqe-");
        }

        #[test]
        fn surrogate_pairs_survive() {
            let name = "emoji-😀-box";
            assert_eq!(decode(&encode(name)).unwrap(), name);
        }

        #[test]
        fn malformed_sections_fail() {
            assert!(decode("&Jjo").is_err());
            assert!(decode("&:!-").is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_is_case_insensitive() {
        for raw in ["INBOX", "inbox", "InBoX"] {
            assert_eq!(Mailbox::try_from(raw).unwrap(), Mailbox::Inbox);
        }

        assert_eq!(Mailbox::try_from("INBOX/child").unwrap().as_str(), "INBOX/child");
    }

    #[test]
    fn other_names_keep_case() {
        let mailbox = Mailbox::try_from("Archive/2023").unwrap();
        assert_eq!(mailbox.as_str(), "Archive/2023");
    }
}
