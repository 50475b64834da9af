//! Stored messages and the header-derived structures FETCH and SEARCH
//! need.
//!
//! This is deliberately not a full MIME implementation: the engine treats
//! message bodies as opaque and only the bundled in-memory backend needs
//! enough header parsing for `ENVELOPE`, `BODYSTRUCTURE` of simple
//! messages, section extraction, and the header-matching search keys.

use std::collections::BTreeSet;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime as ChronoDateTime, FixedOffset};
use imapd_types::{
    body::{BasicFields, Body, BodyStructure, SpecificFields},
    core::{IString, NString},
    datetime::DateTime,
    envelope::{Address, Envelope},
    fetch::{Part, Section},
    flag::Flag,
    search::SearchKey,
};

/// One message in an in-memory mailbox.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub uid: u32,
    pub internal_date: DateTime,
    pub flags: BTreeSet<Flag>,
    pub raw: Vec<u8>,
}

impl StoredMessage {
    pub fn size(&self) -> u32 {
        self.raw.len() as u32
    }

    /// The header block, including the blank separator line.
    pub fn header_bytes(&self) -> &[u8] {
        &self.raw[..self.body_offset()]
    }

    /// Everything after the blank line.
    pub fn body_bytes(&self) -> &[u8] {
        &self.raw[self.body_offset()..]
    }

    fn body_offset(&self) -> usize {
        find_subslice(&self.raw, b"\r\n\r\n")
            .map(|index| index + 4)
            .unwrap_or(self.raw.len())
    }

    /// Unfolded `(name, value)` pairs in order of appearance.
    pub fn headers(&self) -> Vec<(String, String)> {
        let header_block = match find_subslice(&self.raw, b"\r\n\r\n") {
            Some(index) => &self.raw[..index],
            None => &self.raw[..],
        };

        let text = String::from_utf8_lossy(header_block);
        let mut headers: Vec<(String, String)> = Vec::new();

        for line in text.split("\r\n") {
            if line.starts_with(' ') || line.starts_with('\t') {
                // Folded continuation of the previous field.
                if let Some((_, value)) = headers.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_owned(), value.trim().to_owned()));
            }
        }

        headers
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .into_iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// The `Date:` header, when parseable.
    pub fn sent_date(&self) -> Option<ChronoDateTime<FixedOffset>> {
        let value = self.header("Date")?;
        ChronoDateTime::parse_from_rfc2822(&value).ok()
    }

    // ----- ENVELOPE -----

    pub fn envelope(&self) -> Envelope {
        Envelope {
            date: nstring_opt(self.header("Date")),
            subject: nstring_opt(self.header("Subject")),
            from: self.address_header("From"),
            sender: self.address_header("Sender"),
            reply_to: self.address_header("Reply-To"),
            to: self.address_header("To"),
            cc: self.address_header("Cc"),
            bcc: self.address_header("Bcc"),
            in_reply_to: nstring_opt(self.header("In-Reply-To")),
            message_id: nstring_opt(self.header("Message-ID")),
        }
    }

    fn address_header(&self, name: &str) -> Vec<Address> {
        self.header(name)
            .map(|value| parse_addresses(&value))
            .unwrap_or_default()
    }

    // ----- BODYSTRUCTURE -----

    /// A single-part structure derived from `Content-Type`. Multipart
    /// messages are described as their outer entity; the bundled backend
    /// does not recurse into parts.
    pub fn body_structure(&self) -> BodyStructure {
        let content_type = self
            .header("Content-Type")
            .unwrap_or_else(|| "text/plain; charset=us-ascii".to_owned());

        let (media, params) = match content_type.split_once(';') {
            Some((media, params)) => (media.trim(), params),
            None => (content_type.trim(), ""),
        };

        let (main_type, subtype) = match media.split_once('/') {
            Some((main_type, subtype)) => (main_type.trim(), subtype.trim()),
            None => ("text", "plain"),
        };

        let parameter_list: Vec<(IString, IString)> = params
            .split(';')
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                let key = key.trim().to_ascii_uppercase();
                let value = value.trim().trim_matches('"');
                Some((istring(&key), istring(value)))
            })
            .collect();

        let encoding = self
            .header("Content-Transfer-Encoding")
            .map(|value| value.to_ascii_uppercase())
            .unwrap_or_else(|| "7BIT".to_owned());

        let basic = BasicFields {
            parameter_list,
            id: nstring_opt(self.header("Content-ID")),
            description: nstring_opt(self.header("Content-Description")),
            content_transfer_encoding: istring(&encoding),
            size: self.body_bytes().len() as u32,
        };

        let specific = if main_type.eq_ignore_ascii_case("text") {
            SpecificFields::Text {
                subtype: istring(&subtype.to_ascii_uppercase()),
                number_of_lines: count_lines(self.body_bytes()),
            }
        } else {
            SpecificFields::Basic {
                r#type: istring(&main_type.to_ascii_uppercase()),
                subtype: istring(&subtype.to_ascii_uppercase()),
            }
        };

        BodyStructure::Single(Body { basic, specific })
    }

    // ----- BODY[section] -----

    /// Resolves a section specifier to bytes; `None` when the section does
    /// not exist in this message.
    pub fn section_bytes(&self, section: Option<&Section>) -> Option<Vec<u8>> {
        match section {
            None => Some(self.raw.clone()),
            Some(Section::Header(None)) => Some(self.header_bytes().to_vec()),
            Some(Section::Text(None)) => Some(self.body_bytes().to_vec()),
            Some(Section::HeaderFields(None, fields)) => {
                Some(self.filtered_headers(fields.as_slice(), false))
            }
            Some(Section::HeaderFieldsNot(None, fields)) => {
                Some(self.filtered_headers(fields.as_slice(), true))
            }
            // Part 1 of a non-multipart message is the message body
            // (RFC 3501, section 6.4.5).
            Some(Section::Part(part)) if is_part_one(part) => Some(self.body_bytes().to_vec()),
            Some(Section::Text(Some(part))) if is_part_one(part) => {
                Some(self.body_bytes().to_vec())
            }
            Some(Section::Header(Some(part))) if is_part_one(part) => {
                Some(self.header_bytes().to_vec())
            }
            Some(Section::Mime(part)) if is_part_one(part) => {
                Some(self.filtered_prefix_headers("Content-"))
            }
            // Anything deeper does not exist in a single-part message.
            _ => None,
        }
    }

    fn filtered_headers(&self, fields: &[imapd_types::core::AString], negate: bool) -> Vec<u8> {
        let wanted: Vec<String> = fields
            .iter()
            .map(|field| String::from_utf8_lossy(field.as_bytes()).to_ascii_lowercase())
            .collect();

        let mut output = String::new();
        for (name, value) in self.headers() {
            let listed = wanted.contains(&name.to_ascii_lowercase());
            if listed != negate {
                output.push_str(&format!("{name}: {value}\r\n"));
            }
        }
        output.push_str("\r\n");
        output.into_bytes()
    }

    fn filtered_prefix_headers(&self, prefix: &str) -> Vec<u8> {
        let mut output = String::new();
        for (name, value) in self.headers() {
            if name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(prefix) {
                output.push_str(&format!("{name}: {value}\r\n"));
            }
        }
        output.push_str("\r\n");
        output.into_bytes()
    }

    /// Decoded body content for `BINARY` (RFC 3516); identity encodings
    /// pass through, base64 is decoded, anything else is `None`.
    pub fn binary_bytes(&self, part: &[u32]) -> Option<Vec<u8>> {
        if !(part.is_empty() || part == [1]) {
            return None;
        }

        let encoding = self
            .header("Content-Transfer-Encoding")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| "7bit".to_owned());

        match encoding.as_str() {
            "7bit" | "8bit" | "binary" => Some(self.body_bytes().to_vec()),
            "base64" => {
                let compact: Vec<u8> = self
                    .body_bytes()
                    .iter()
                    .copied()
                    .filter(|byte| !byte.is_ascii_whitespace())
                    .collect();
                BASE64.decode(compact).ok()
            }
            _ => None,
        }
    }

    // ----- SEARCH -----

    /// Evaluates a search key against this message.
    ///
    /// `seq` is the backend-side sequence number, `recent` whether the
    /// asking session sees `\Recent`, and the `largest_*` values resolve
    /// `*` in sets.
    pub fn matches(&self, key: &SearchKey, ctx: &SearchContext) -> bool {
        match key {
            SearchKey::All => true,
            SearchKey::And(keys) => keys.iter().all(|key| self.matches(key, ctx)),
            SearchKey::Or(left, right) => self.matches(left, ctx) || self.matches(right, ctx),
            SearchKey::Not(inner) => !self.matches(inner, ctx),

            SearchKey::Answered => self.flags.contains(&Flag::Answered),
            SearchKey::Deleted => self.flags.contains(&Flag::Deleted),
            SearchKey::Draft => self.flags.contains(&Flag::Draft),
            SearchKey::Flagged => self.flags.contains(&Flag::Flagged),
            SearchKey::Seen => self.flags.contains(&Flag::Seen),
            SearchKey::Unanswered => !self.flags.contains(&Flag::Answered),
            SearchKey::Undeleted => !self.flags.contains(&Flag::Deleted),
            SearchKey::Undraft => !self.flags.contains(&Flag::Draft),
            SearchKey::Unflagged => !self.flags.contains(&Flag::Flagged),
            SearchKey::Unseen => !self.flags.contains(&Flag::Seen),
            SearchKey::Keyword(atom) => self.flags.contains(&Flag::Keyword(atom.clone())),
            SearchKey::Unkeyword(atom) => !self.flags.contains(&Flag::Keyword(atom.clone())),

            SearchKey::Recent => ctx.recent,
            SearchKey::Old => !ctx.recent,
            SearchKey::New => ctx.recent && !self.flags.contains(&Flag::Seen),

            SearchKey::Larger(size) => self.size() > *size,
            SearchKey::Smaller(size) => self.size() < *size,

            SearchKey::Before(date) => self.internal_date.inner().date_naive() < *date.inner(),
            SearchKey::On(date) => self.internal_date.inner().date_naive() == *date.inner(),
            SearchKey::Since(date) => self.internal_date.inner().date_naive() >= *date.inner(),
            SearchKey::SentBefore(date) => self
                .sent_date()
                .is_some_and(|sent| sent.date_naive() < *date.inner()),
            SearchKey::SentOn(date) => self
                .sent_date()
                .is_some_and(|sent| sent.date_naive() == *date.inner()),
            SearchKey::SentSince(date) => self
                .sent_date()
                .is_some_and(|sent| sent.date_naive() >= *date.inner()),

            SearchKey::Bcc(needle) => self.header_contains("Bcc", needle.as_bytes()),
            SearchKey::Cc(needle) => self.header_contains("Cc", needle.as_bytes()),
            SearchKey::From(needle) => self.header_contains("From", needle.as_bytes()),
            SearchKey::To(needle) => self.header_contains("To", needle.as_bytes()),
            SearchKey::Subject(needle) => self.header_contains("Subject", needle.as_bytes()),
            SearchKey::Header(name, needle) => {
                let name = String::from_utf8_lossy(name.as_bytes()).to_string();
                match self.header(&name) {
                    Some(value) => contains_ignore_case(value.as_bytes(), needle.as_bytes()),
                    None => false,
                }
            }
            SearchKey::Body(needle) => contains_ignore_case(self.body_bytes(), needle.as_bytes()),
            SearchKey::Text(needle) => contains_ignore_case(&self.raw, needle.as_bytes()),

            SearchKey::Uid(set) => set.contains(self.uid, ctx.largest_uid),
            SearchKey::SequenceSet(set) => set.contains(ctx.seq, ctx.largest_seq),
        }
    }

    fn header_contains(&self, name: &str, needle: &[u8]) -> bool {
        match self.header(name) {
            Some(value) => contains_ignore_case(value.as_bytes(), needle),
            None => false,
        }
    }
}

/// Search evaluation context from the surrounding mailbox.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext {
    pub seq: u32,
    pub recent: bool,
    pub largest_seq: u32,
    pub largest_uid: u32,
}

fn is_part_one(part: &Part) -> bool {
    part.0.as_slice() == [1]
}

fn count_lines(bytes: &[u8]) -> u32 {
    bytes.iter().filter(|byte| **byte == b'\n').count() as u32
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }

    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

pub(crate) fn istring(value: &str) -> IString {
    IString::try_from(value).unwrap_or_else(|_| {
        // Fall back to a literal when quoting is impossible.
        IString::Literal(
            imapd_types::core::Literal::try_from(value.as_bytes())
                .unwrap_or_else(|_| imapd_types::core::Literal::try_from("").unwrap()),
        )
    })
}

pub(crate) fn nstring_opt(value: Option<String>) -> NString {
    match value {
        Some(value) => nstring_bytes(value.into_bytes()),
        None => NString::NIL,
    }
}

pub(crate) fn nstring_bytes(bytes: Vec<u8>) -> NString {
    match IString::try_from(bytes.as_slice()) {
        Ok(string) => NString(Some(string)),
        // NUL bytes can't travel in a string; report NIL.
        Err(_) => NString::NIL,
    }
}

/// Pragmatic RFC 5322 address-list parsing: display-name plus angle-addr,
/// or a bare addr-spec, comma-separated.
fn parse_addresses(value: &str) -> Vec<Address> {
    value
        .split(',')
        .filter_map(|chunk| {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return None;
            }

            let (name, addr) = match (chunk.find('<'), chunk.find('>')) {
                (Some(open), Some(close)) if open < close => {
                    let name = chunk[..open].trim().trim_matches('"').trim();
                    let addr = &chunk[open + 1..close];
                    (
                        if name.is_empty() { None } else { Some(name) },
                        addr.trim(),
                    )
                }
                _ => (None, chunk),
            };

            let (mailbox, host) = addr.split_once('@')?;

            Some(Address {
                name: nstring_opt(name.map(str::to_owned)),
                adl: NString::NIL,
                mailbox: nstring_opt(Some(mailbox.to_owned())),
                host: nstring_opt(Some(host.to_owned())),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn message(raw: &[u8]) -> StoredMessage {
        let date = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 7, 15, 12, 0, 0)
            .unwrap();

        StoredMessage {
            uid: 101,
            internal_date: DateTime::try_from(date).unwrap(),
            flags: BTreeSet::new(),
            raw: raw.to_vec(),
        }
    }

    const SAMPLE: &[u8] = b"From: Alice Example <alice@example.org>\r\n\
To: bob@example.net, Carol <carol@example.net>\r\n\
Subject: lunch\r\n\
Date: Sat, 15 Jul 2023 11:00:00 +0000\r\n\
Message-ID: <m1@example.org>\r\n\
Content-Type: text/plain; charset=\"UTF-8\"\r\n\
\r\n\
Are you free at noon?\r\n";

    #[test]
    fn splits_header_and_body() {
        let message = message(SAMPLE);
        assert!(message.header_bytes().ends_with(b"\r\n\r\n"));
        assert_eq!(message.body_bytes(), b"Are you free at noon?\r\n");
    }

    #[test]
    fn folded_headers_unfold() {
        let message = message(
            b"Subject: a very\r\n long subject\r\nFrom: a@b.c\r\n\r\nbody\r\n",
        );
        assert_eq!(message.header("subject").unwrap(), "a very long subject");
    }

    #[test]
    fn envelope_addresses() {
        let envelope = message(SAMPLE).envelope();

        assert_eq!(envelope.from.len(), 1);
        assert_eq!(
            envelope.from[0].mailbox,
            NString::try_from("alice").unwrap()
        );
        assert_eq!(
            envelope.from[0].host,
            NString::try_from("example.org").unwrap()
        );
        assert_eq!(envelope.to.len(), 2);
        assert_eq!(envelope.to[1].name, NString::try_from("Carol").unwrap());
        assert_eq!(envelope.subject, NString::try_from("lunch").unwrap());
        assert_eq!(envelope.bcc, Vec::new());
    }

    #[test]
    fn body_structure_of_text_plain() {
        match message(SAMPLE).body_structure() {
            BodyStructure::Single(body) => {
                match body.specific {
                    SpecificFields::Text {
                        subtype,
                        number_of_lines,
                    } => {
                        assert_eq!(subtype.as_bytes(), b"PLAIN");
                        assert_eq!(number_of_lines, 1);
                    }
                    other => panic!("unexpected: {other:?}"),
                }
                assert_eq!(body.basic.size, 23);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn header_fields_section() {
        let message = message(SAMPLE);
        let fields = vec![imapd_types::core::AString::try_from("Subject").unwrap()];
        let bytes = message
            .section_bytes(Some(&Section::HeaderFields(
                None,
                fields.try_into().unwrap(),
            )))
            .unwrap();

        assert_eq!(bytes, b"Subject: lunch\r\n\r\n");
    }

    #[test]
    fn search_keys() {
        let mut message = message(SAMPLE);
        message.flags.insert(Flag::Seen);

        let ctx = SearchContext {
            seq: 1,
            recent: false,
            largest_seq: 1,
            largest_uid: 101,
        };

        assert!(message.matches(&SearchKey::Seen, &ctx));
        assert!(!message.matches(&SearchKey::Unseen, &ctx));
        assert!(message.matches(
            &SearchKey::From(imapd_types::core::AString::try_from("ALICE").unwrap()),
            &ctx
        ));
        assert!(message.matches(
            &SearchKey::Text(imapd_types::core::AString::try_from("noon").unwrap()),
            &ctx
        ));
        assert!(message.matches(&SearchKey::Smaller(10_000), &ctx));
        assert!(!message.matches(&SearchKey::Larger(10_000), &ctx));
        assert!(message.matches(&SearchKey::Uid("101".parse().unwrap()), &ctx));

        // Internal date is 15-Jul-2023.
        let on = imapd_types::datetime::NaiveDate::try_from(
            chrono::NaiveDate::from_ymd_opt(2023, 7, 15).unwrap(),
        )
        .unwrap();
        assert!(message.matches(&SearchKey::On(on), &ctx));
    }
}
