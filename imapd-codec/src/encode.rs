//! Serialization of server messages.
//!
//! Everything the server emits is written through the [`Encode`] trait into
//! any `io::Write`. Responses are CRLF-terminated lines; literals inside
//! data responses are sent in the synchronizing form (the receiving side of
//! a literal never waits for permission when the sender is the server).

use std::io::Write;

use imapd_types::{
    body::{BasicFields, BodyStructure, SpecificFields},
    core::{AString, IString, NString},
    envelope::{Address, Envelope},
    fetch::{FetchAttributeValue, Section},
    mailbox::{utf7, Mailbox},
    response::{Code, Continue, Data, Greeting, GreetingKind, Response, Status},
    utils::escape_quoted,
};

/// Serialization into an [`std::io::Write`].
pub trait Encode {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()>;

    /// Convenience for tests and logging.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        // Writing into a Vec cannot fail.
        self.encode(&mut buffer).unwrap();
        buffer
    }
}

impl Encode for Greeting {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        write!(writer, "* {} ", self.kind)?;

        if let Some(code) = &self.code {
            write!(writer, "[")?;
            code.encode(writer)?;
            write!(writer, "] ")?;
        }

        write!(writer, "{}\r\n", self.text.inner())
    }
}

impl Encode for Response {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Status(status) => status.encode(writer),
            Self::Data(data) => data.encode(writer),
            Self::Continue(cont) => cont.encode(writer),
        }
    }
}

impl Encode for Status {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        fn status_line(
            writer: &mut impl Write,
            tag: Option<&imapd_types::core::Tag>,
            name: &str,
            code: Option<&Code>,
            text: &imapd_types::core::Text,
        ) -> std::io::Result<()> {
            match tag {
                Some(tag) => write!(writer, "{tag} {name} ")?,
                None => write!(writer, "* {name} ")?,
            }

            if let Some(code) = code {
                write!(writer, "[")?;
                code.encode(writer)?;
                write!(writer, "] ")?;
            }

            write!(writer, "{}\r\n", text.inner())
        }

        match self {
            Self::Ok { tag, code, text } => {
                status_line(writer, tag.as_ref(), "OK", code.as_ref(), text)
            }
            Self::No { tag, code, text } => {
                status_line(writer, tag.as_ref(), "NO", code.as_ref(), text)
            }
            Self::Bad { tag, code, text } => {
                status_line(writer, tag.as_ref(), "BAD", code.as_ref(), text)
            }
            Self::Bye { code, text } => status_line(writer, None, "BYE", code.as_ref(), text),
        }
    }
}

impl Encode for Continue {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Basic { code, text } => {
                write!(writer, "+ ")?;

                if let Some(code) = code {
                    write!(writer, "[")?;
                    code.encode(writer)?;
                    write!(writer, "] ")?;
                }

                write!(writer, "{}\r\n", text.inner())
            }
            Self::Base64(data) => {
                use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

                write!(writer, "+ {}\r\n", BASE64.encode(data))
            }
        }
    }
}

impl Encode for Code {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Alert => write!(writer, "ALERT"),
            Self::BadCharset { allowed } => {
                write!(writer, "BADCHARSET")?;
                if !allowed.is_empty() {
                    write!(writer, " (")?;
                    for (i, charset) in allowed.iter().enumerate() {
                        if i > 0 {
                            write!(writer, " ")?;
                        }
                        match charset {
                            imapd_types::core::Charset::Atom(atom) => write!(writer, "{atom}")?,
                            imapd_types::core::Charset::Quoted(quoted) => {
                                write!(writer, "\"{}\"", escape_quoted(quoted.inner()))?
                            }
                        }
                    }
                    write!(writer, ")")?;
                }
                Ok(())
            }
            Self::Capability(capabilities) => {
                write!(writer, "CAPABILITY")?;
                for capability in capabilities.iter() {
                    write!(writer, " {capability}")?;
                }
                Ok(())
            }
            Self::Parse => write!(writer, "PARSE"),
            Self::PermanentFlags(flags) => {
                write!(writer, "PERMANENTFLAGS (")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        write!(writer, " ")?;
                    }
                    write!(writer, "{flag}")?;
                }
                write!(writer, ")")
            }
            Self::ReadOnly => write!(writer, "READ-ONLY"),
            Self::ReadWrite => write!(writer, "READ-WRITE"),
            Self::TryCreate => write!(writer, "TRYCREATE"),
            Self::UidNext(uid) => write!(writer, "UIDNEXT {uid}"),
            Self::UidValidity(validity) => write!(writer, "UIDVALIDITY {validity}"),
            Self::Unseen(seq) => write!(writer, "UNSEEN {seq}"),
            Self::AppendUid { uid_validity, uids } => {
                write!(writer, "APPENDUID {uid_validity} {uids}")
            }
            Self::CopyUid {
                uid_validity,
                source,
                destination,
            } => write!(writer, "COPYUID {uid_validity} {source} {destination}"),
            Self::UidNotSticky => write!(writer, "UIDNOTSTICKY"),
            Self::AlreadyExists => write!(writer, "ALREADYEXISTS"),
            Self::AuthenticationFailed => write!(writer, "AUTHENTICATIONFAILED"),
            Self::AuthorizationFailed => write!(writer, "AUTHORIZATIONFAILED"),
            Self::Cannot => write!(writer, "CANNOT"),
            Self::ClientBug => write!(writer, "CLIENTBUG"),
            Self::ExpungeIssued => write!(writer, "EXPUNGEISSUED"),
            Self::Limit => write!(writer, "LIMIT"),
            Self::Nonexistent => write!(writer, "NONEXISTENT"),
            Self::OverQuota => write!(writer, "OVERQUOTA"),
            Self::PrivacyRequired => write!(writer, "PRIVACYREQUIRED"),
            Self::ServerBug => write!(writer, "SERVERBUG"),
            Self::TooBig => write!(writer, "TOOBIG"),
            Self::Other(other) => write!(writer, "{}", other.0),
        }
    }
}

impl Encode for Data {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Capability(capabilities) => {
                write!(writer, "* CAPABILITY")?;
                for capability in capabilities.iter() {
                    write!(writer, " {capability}")?;
                }
                write!(writer, "\r\n")
            }
            Self::List {
                items,
                delimiter,
                mailbox,
            }
            | Self::Lsub {
                items,
                delimiter,
                mailbox,
            } => {
                let name = match self {
                    Self::List { .. } => "LIST",
                    _ => "LSUB",
                };

                write!(writer, "* {name} (")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(writer, " ")?;
                    }
                    write!(writer, "{item}")?;
                }
                write!(writer, ") ")?;

                match delimiter {
                    Some(delimiter) => {
                        write!(
                            writer,
                            "\"{}\"",
                            escape_quoted(&delimiter.inner().to_string())
                        )?;
                    }
                    None => write!(writer, "NIL")?,
                }
                write!(writer, " ")?;
                encode_mailbox(writer, mailbox)?;
                write!(writer, "\r\n")
            }
            Self::Status { mailbox, items } => {
                write!(writer, "* STATUS ")?;
                encode_mailbox(writer, mailbox)?;
                write!(writer, " (")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(writer, " ")?;
                    }
                    write!(writer, "{item}")?;
                }
                write!(writer, ")\r\n")
            }
            Self::Search(seqs) => {
                write!(writer, "* SEARCH")?;
                for seq in seqs {
                    write!(writer, " {seq}")?;
                }
                write!(writer, "\r\n")
            }
            Self::Flags(flags) => {
                write!(writer, "* FLAGS (")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        write!(writer, " ")?;
                    }
                    write!(writer, "{flag}")?;
                }
                write!(writer, ")\r\n")
            }
            Self::Exists(count) => write!(writer, "* {count} EXISTS\r\n"),
            Self::Recent(count) => write!(writer, "* {count} RECENT\r\n"),
            Self::Expunge(seq) => write!(writer, "* {seq} EXPUNGE\r\n"),
            Self::Fetch { seq, attributes } => {
                write!(writer, "* {seq} FETCH (")?;
                for (i, attribute) in attributes.iter().enumerate() {
                    if i > 0 {
                        write!(writer, " ")?;
                    }
                    attribute.encode(writer)?;
                }
                write!(writer, ")\r\n")
            }
            Self::Enabled { extensions } => {
                write!(writer, "* ENABLED")?;
                for extension in extensions {
                    write!(writer, " {extension}")?;
                }
                write!(writer, "\r\n")
            }
        }
    }
}

impl Encode for FetchAttributeValue {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Body(structure) => {
                write!(writer, "BODY ")?;
                structure.encode(writer)
            }
            Self::BodyExt {
                section,
                origin,
                data,
            } => {
                write!(writer, "BODY[")?;
                if let Some(section) = section {
                    encode_section(writer, section)?;
                }
                write!(writer, "]")?;
                if let Some(origin) = origin {
                    write!(writer, "<{origin}>")?;
                }
                write!(writer, " ")?;
                encode_nstring(writer, data)
            }
            Self::BodyStructure(structure) => {
                write!(writer, "BODYSTRUCTURE ")?;
                structure.encode(writer)
            }
            Self::Binary { part, origin, data } => {
                write!(writer, "BINARY[")?;
                encode_part_numbers(writer, part)?;
                write!(writer, "]")?;
                if let Some(origin) = origin {
                    write!(writer, "<{origin}>")?;
                }
                match data {
                    // literal8 (RFC 3516); unlike a plain literal it may
                    // contain NUL bytes.
                    Some(data) => {
                        write!(writer, " ~{{{}}}\r\n", data.len())?;
                        writer.write_all(data)
                    }
                    None => write!(writer, " NIL"),
                }
            }
            Self::BinarySize { part, size } => {
                write!(writer, "BINARY.SIZE[")?;
                encode_part_numbers(writer, part)?;
                write!(writer, "] {size}")
            }
            Self::Envelope(envelope) => {
                write!(writer, "ENVELOPE ")?;
                envelope.encode(writer)
            }
            Self::Flags(flags) => {
                write!(writer, "FLAGS (")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        write!(writer, " ")?;
                    }
                    write!(writer, "{flag}")?;
                }
                write!(writer, ")")
            }
            Self::InternalDate(datetime) => write!(writer, "INTERNALDATE {datetime}"),
            Self::Rfc822(data) => {
                write!(writer, "RFC822 ")?;
                encode_nstring(writer, data)
            }
            Self::Rfc822Header(data) => {
                write!(writer, "RFC822.HEADER ")?;
                encode_nstring(writer, data)
            }
            Self::Rfc822Size(size) => write!(writer, "RFC822.SIZE {size}"),
            Self::Rfc822Text(data) => {
                write!(writer, "RFC822.TEXT ")?;
                encode_nstring(writer, data)
            }
            Self::Uid(uid) => write!(writer, "UID {uid}"),
        }
    }
}

fn encode_part_numbers(writer: &mut impl Write, part: &[u32]) -> std::io::Result<()> {
    for (i, number) in part.iter().enumerate() {
        if i > 0 {
            write!(writer, ".")?;
        }
        write!(writer, "{number}")?;
    }
    Ok(())
}

fn encode_section(writer: &mut impl Write, section: &Section) -> std::io::Result<()> {
    fn prefix(writer: &mut impl Write, part: &Option<imapd_types::fetch::Part>) -> std::io::Result<()> {
        if let Some(part) = part {
            encode_part_numbers(writer, part.0.as_slice())?;
            write!(writer, ".")?;
        }
        Ok(())
    }

    match section {
        Section::Part(part) => encode_part_numbers(writer, part.0.as_slice()),
        Section::Header(part) => {
            prefix(writer, part)?;
            write!(writer, "HEADER")
        }
        Section::HeaderFields(part, fields) => {
            prefix(writer, part)?;
            write!(writer, "HEADER.FIELDS (")?;
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    write!(writer, " ")?;
                }
                encode_astring(writer, field)?;
            }
            write!(writer, ")")
        }
        Section::HeaderFieldsNot(part, fields) => {
            prefix(writer, part)?;
            write!(writer, "HEADER.FIELDS.NOT (")?;
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    write!(writer, " ")?;
                }
                encode_astring(writer, field)?;
            }
            write!(writer, ")")
        }
        Section::Text(part) => {
            prefix(writer, part)?;
            write!(writer, "TEXT")
        }
        Section::Mime(part) => {
            encode_part_numbers(writer, part.0.as_slice())?;
            write!(writer, ".MIME")
        }
    }
}

impl Encode for Envelope {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        write!(writer, "(")?;
        encode_nstring(writer, &self.date)?;
        write!(writer, " ")?;
        encode_nstring(writer, &self.subject)?;
        for addresses in [
            &self.from,
            &self.sender,
            &self.reply_to,
            &self.to,
            &self.cc,
            &self.bcc,
        ] {
            write!(writer, " ")?;
            encode_address_list(writer, addresses)?;
        }
        write!(writer, " ")?;
        encode_nstring(writer, &self.in_reply_to)?;
        write!(writer, " ")?;
        encode_nstring(writer, &self.message_id)?;
        write!(writer, ")")
    }
}

fn encode_address_list(writer: &mut impl Write, addresses: &[Address]) -> std::io::Result<()> {
    if addresses.is_empty() {
        return write!(writer, "NIL");
    }

    write!(writer, "(")?;
    for address in addresses {
        write!(writer, "(")?;
        encode_nstring(writer, &address.name)?;
        write!(writer, " ")?;
        encode_nstring(writer, &address.adl)?;
        write!(writer, " ")?;
        encode_nstring(writer, &address.mailbox)?;
        write!(writer, " ")?;
        encode_nstring(writer, &address.host)?;
        write!(writer, ")")?;
    }
    write!(writer, ")")
}

impl Encode for BodyStructure {
    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Single(body) => {
                write!(writer, "(")?;
                match &body.specific {
                    SpecificFields::Basic { r#type, subtype } => {
                        encode_istring(writer, r#type)?;
                        write!(writer, " ")?;
                        encode_istring(writer, subtype)?;
                        write!(writer, " ")?;
                        encode_basic_fields(writer, &body.basic)?;
                    }
                    SpecificFields::Message {
                        envelope,
                        body_structure,
                        number_of_lines,
                    } => {
                        write!(writer, "\"MESSAGE\" \"RFC822\" ")?;
                        encode_basic_fields(writer, &body.basic)?;
                        write!(writer, " ")?;
                        envelope.encode(writer)?;
                        write!(writer, " ")?;
                        body_structure.encode(writer)?;
                        write!(writer, " {number_of_lines}")?;
                    }
                    SpecificFields::Text {
                        subtype,
                        number_of_lines,
                    } => {
                        write!(writer, "\"TEXT\" ")?;
                        encode_istring(writer, subtype)?;
                        write!(writer, " ")?;
                        encode_basic_fields(writer, &body.basic)?;
                        write!(writer, " {number_of_lines}")?;
                    }
                }
                write!(writer, ")")
            }
            Self::Multi { bodies, subtype } => {
                write!(writer, "(")?;
                for body in bodies.iter() {
                    body.encode(writer)?;
                }
                write!(writer, " ")?;
                encode_istring(writer, subtype)?;
                write!(writer, ")")
            }
        }
    }
}

fn encode_basic_fields(writer: &mut impl Write, fields: &BasicFields) -> std::io::Result<()> {
    if fields.parameter_list.is_empty() {
        write!(writer, "NIL")?;
    } else {
        write!(writer, "(")?;
        for (i, (key, value)) in fields.parameter_list.iter().enumerate() {
            if i > 0 {
                write!(writer, " ")?;
            }
            encode_istring(writer, key)?;
            write!(writer, " ")?;
            encode_istring(writer, value)?;
        }
        write!(writer, ")")?;
    }

    write!(writer, " ")?;
    encode_nstring(writer, &fields.id)?;
    write!(writer, " ")?;
    encode_nstring(writer, &fields.description)?;
    write!(writer, " ")?;
    encode_istring(writer, &fields.content_transfer_encoding)?;
    write!(writer, " {}", fields.size)
}

/// Mailbox names are re-encoded to modified UTF-7 and then written as the
/// shortest legal astring form.
pub(crate) fn encode_mailbox(writer: &mut impl Write, mailbox: &Mailbox) -> std::io::Result<()> {
    match mailbox {
        Mailbox::Inbox => write!(writer, "INBOX"),
        Mailbox::Other(other) => {
            let encoded = utf7::encode(other.as_ref());
            match AString::try_from(encoded) {
                Ok(astring) => encode_astring(writer, &astring),
                // Encoded forms are ASCII without CR/LF, so this is
                // unreachable; fall back to a literal regardless.
                Err(_) => unreachable!("modified UTF-7 output is always an astring"),
            }
        }
    }
}

pub(crate) fn encode_astring(writer: &mut impl Write, astring: &AString) -> std::io::Result<()> {
    match astring {
        AString::Atom(atom) => write!(writer, "{}", atom.inner()),
        AString::String(string) => encode_istring(writer, string),
    }
}

pub(crate) fn encode_istring(writer: &mut impl Write, string: &IString) -> std::io::Result<()> {
    match string {
        IString::Quoted(quoted) => write!(writer, "\"{}\"", escape_quoted(quoted.inner())),
        IString::Literal(literal) => {
            write!(writer, "{{{}}}\r\n", literal.data().len())?;
            writer.write_all(literal.data())
        }
    }
}

pub(crate) fn encode_nstring(writer: &mut impl Write, nstring: &NString) -> std::io::Result<()> {
    match &nstring.0 {
        Some(string) => encode_istring(writer, string),
        None => write!(writer, "NIL"),
    }
}

#[cfg(test)]
mod tests {
    use imapd_types::{
        core::{NonEmptyVec, Tag, Text},
        flag::{Flag, FlagFetch},
        response::Capability,
    };

    use super::*;

    #[test]
    fn tagged_and_untagged_status() {
        let status = Status::ok(Some(Tag::try_from("a1").unwrap()), None, "done").unwrap();
        assert_eq!(status.encode_to_vec(), b"a1 OK done\r\n");

        let status = Status::no(None, Some(Code::Alert), "shutting down soon").unwrap();
        assert_eq!(status.encode_to_vec(), b"* NO [ALERT] shutting down soon\r\n");
    }

    #[test]
    fn greeting_with_capability_code() {
        let greeting = Greeting {
            kind: GreetingKind::Ok,
            code: Some(Code::Capability(NonEmptyVec::try_from(vec![
                Capability::Imap4Rev1,
                Capability::StartTls,
            ]).unwrap())),
            text: Text::try_from("Server ready").unwrap(),
        };

        assert_eq!(
            greeting.encode_to_vec(),
            b"* OK [CAPABILITY IMAP4rev1 STARTTLS] Server ready\r\n"
        );
    }

    #[test]
    fn select_style_responses() {
        assert_eq!(Data::Exists(4).encode_to_vec(), b"* 4 EXISTS\r\n");
        assert_eq!(Data::Recent(1).encode_to_vec(), b"* 1 RECENT\r\n");
        assert_eq!(
            Data::Flags(vec![Flag::Answered, Flag::Seen]).encode_to_vec(),
            b"* FLAGS (\\Answered \\Seen)\r\n"
        );

        let status = Status::Ok {
            tag: None,
            code: Some(Code::UidValidity(4097774359)),
            text: Text::try_from("UIDs valid").unwrap(),
        };
        assert_eq!(
            status.encode_to_vec(),
            b"* OK [UIDVALIDITY 4097774359] UIDs valid\r\n"
        );
    }

    #[test]
    fn fetch_with_flags_and_uid() {
        let data = Data::Fetch {
            seq: 2,
            attributes: NonEmptyVec::try_from(vec![
                FetchAttributeValue::Uid(102),
                FetchAttributeValue::Flags(vec![FlagFetch::Flag(Flag::Seen), FlagFetch::Recent]),
            ])
            .unwrap(),
        };

        assert_eq!(
            data.encode_to_vec(),
            b"* 2 FETCH (UID 102 FLAGS (\\Seen \\Recent))\r\n"
        );
    }

    #[test]
    fn fetch_body_emits_literal() {
        let data = Data::Fetch {
            seq: 1,
            attributes: NonEmptyVec::from(FetchAttributeValue::BodyExt {
                section: None,
                origin: None,
                data: NString::try_from("From: a@b\r\n\r\nhi\r\n").unwrap(),
            }),
        };

        assert_eq!(
            data.encode_to_vec(),
            b"* 1 FETCH (BODY[] {17}\r\nFrom: a@b\r\n\r\nhi\r\n)\r\n"
        );
    }

    #[test]
    fn search_response() {
        assert_eq!(
            Data::Search(vec![2, 84, 882]).encode_to_vec(),
            b"* SEARCH 2 84 882\r\n"
        );
        assert_eq!(Data::Search(vec![]).encode_to_vec(), b"* SEARCH\r\n");
    }

    #[test]
    fn list_with_encoded_mailbox() {
        let data = Data::List {
            items: vec![],
            delimiter: Some(imapd_types::core::QuotedChar::try_from('/').unwrap()),
            mailbox: Mailbox::try_from("Entw\u{fc}rfe").unwrap(),
        };

        assert_eq!(
            data.encode_to_vec(),
            b"* LIST () \"/\" Entw&APw-rfe\r\n".to_vec()
        );
    }

    #[test]
    fn appenduid_code() {
        let code = Code::AppendUid {
            uid_validity: 4097774359,
            uids: "105".parse().unwrap(),
        };
        let mut buffer = Vec::new();
        code.encode(&mut buffer).unwrap();
        assert_eq!(buffer, b"APPENDUID 4097774359 105");
    }
}
