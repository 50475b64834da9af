//! Parse every client line of a realistic session trace (adapted from the
//! RFC 3501 examples) and serialize the matching server lines, comparing
//! bytes exactly.

use imapd_codec::{CommandCodec, Decoder, Encode};
use imapd_types::{
    core::{NonEmptyVec, Tag, Text},
    fetch::FetchAttributeValue,
    flag::{Flag, FlagFetch},
    response::{Capability, Code, Data, Status},
};

#[test]
fn client_lines_of_rfc_trace_parse() {
    let lines: &[&[u8]] = &[
        b"a001 CAPABILITY\r\n",
        b"a002 login mrc secret\r\n",
        b"a003 select INBOX\r\n",
        b"a004 fetch 12 full\r\n",
        b"a005 fetch 12 (body[header])\r\n",
        b"a006 store 12 +FLAGS \\Deleted\r\n",
        b"a007 expunge\r\n",
        b"a008 uid search deleted since 1-Feb-1994\r\n",
        b"a009 uid copy 2:4 MEETING\r\n",
        b"a010 idle\r\n",
        b"a011 check\r\n",
        b"a012 status blurdybloop (uidnext messages)\r\n",
        b"a013 logout\r\n",
    ];

    for line in lines {
        let (remaining, command) = CommandCodec
            .decode(line)
            .unwrap_or_else(|error| panic!("{:?} failed: {error:?}", String::from_utf8_lossy(line)));
        assert!(remaining.is_empty());
        assert_eq!(command.tag.as_ref().as_bytes(), &line[..4]);
    }
}

#[test]
fn commands_spanning_multiple_literals_parse_once_complete() {
    // 42 octets of message data, then the CRLF that ends the command line.
    let bytes: &[u8] =
        b"A284 APPEND Drafts (\\Seen \\Draft) {42}\r\nFrom: demo <demo@example.org>\r\n\r\nHi there!\r\n";

    let (remaining, command) = CommandCodec.decode(bytes).unwrap();
    assert!(remaining.is_empty());
    assert_eq!(command.tag, Tag::try_from("A284").unwrap());
}

#[test]
fn server_lines_serialize_byte_exact() {
    let cases: Vec<(Vec<u8>, &[u8])> = vec![
        (
            Data::Capability(
                NonEmptyVec::try_from(vec![
                    Capability::Imap4Rev1,
                    Capability::StartTls,
                    Capability::Idle,
                    Capability::LiteralPlus,
                ])
                .unwrap(),
            )
            .encode_to_vec(),
            b"* CAPABILITY IMAP4rev1 STARTTLS IDLE LITERAL+\r\n",
        ),
        (
            Data::Exists(172).encode_to_vec(),
            b"* 172 EXISTS\r\n",
        ),
        (
            Status::Ok {
                tag: None,
                code: Some(Code::Unseen(12)),
                text: Text::try_from("Message 12 is first unseen").unwrap(),
            }
            .encode_to_vec(),
            b"* OK [UNSEEN 12] Message 12 is first unseen\r\n",
        ),
        (
            Status::Ok {
                tag: Some(Tag::try_from("a003").unwrap()),
                code: Some(Code::ReadWrite),
                text: Text::try_from("SELECT completed").unwrap(),
            }
            .encode_to_vec(),
            b"a003 OK [READ-WRITE] SELECT completed\r\n",
        ),
        (
            Data::Fetch {
                seq: 12,
                attributes: NonEmptyVec::from(FetchAttributeValue::Flags(vec![
                    FlagFetch::Flag(Flag::Seen),
                    FlagFetch::Flag(Flag::Deleted),
                ])),
            }
            .encode_to_vec(),
            b"* 12 FETCH (FLAGS (\\Seen \\Deleted))\r\n",
        ),
        (
            Status::bye(None, "IMAP4rev1 Server logging out").unwrap().encode_to_vec(),
            b"* BYE IMAP4rev1 Server logging out\r\n",
        ),
    ];

    for (serialized, expected) in cases {
        assert_eq!(
            serialized,
            expected,
            "got {:?}",
            String::from_utf8_lossy(&serialized)
        );
    }
}
