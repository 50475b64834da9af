//! The command parser.
//!
//! One command per CRLF-terminated line, with literals carrying their own
//! length prefix. When a literal prefix ends the buffered input, the error
//! path attaches the command tag so the caller can either send a
//! continuation request or reject the command.

#[cfg(not(feature = "quirk_crlf_relaxed"))]
use abnf_core::streaming::crlf;
#[cfg(feature = "quirk_crlf_relaxed")]
use abnf_core::streaming::crlf_relaxed as crlf;
use abnf_core::streaming::sp;
use imapd_types::{
    auth::AuthMechanism,
    command::{AppendMessage, Command, CommandBody},
    core::NonEmptyVec,
    flag::{StoreResponse, StoreType},
    secret::Secret,
};
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case},
    combinator::{map, opt, value},
    multi::{many1, separated_list1},
    sequence::{preceded, separated_pair, terminated, tuple},
};

use crate::{
    core::{astring, atom, base64, charset, literal},
    datetime::date_time,
    decode::{ImapErrorKind, ImapParseError, ImapResult},
    fetch::fetch_attributes,
    flag::{flag, flag_list},
    mailbox::{list_mailbox, mailbox},
    search::search_criteria,
    sequence::sequence_set,
    status::status_att,
};

/// `command = tag SP (command-any / command-auth / command-nonauth /
///                    command-select) CRLF`
pub(crate) fn command(input: &[u8]) -> ImapResult<Command> {
    let (remaining, (tag, _)) = tuple((crate::core::tag_imap, sp))(input)?;

    let body_parser = alt((command_any, command_nonauth, command_auth, command_select));

    match terminated(body_parser, crlf)(remaining) {
        Ok((remaining, body)) => Ok((remaining, Command::new(tag, body))),
        // A literal prefix was found mid-parse; attach the tag so the
        // caller can answer (or reject) the continuation.
        Err(nom::Err::Failure(ImapParseError {
            input: error_input,
            kind: ImapErrorKind::Literal {
                tag: None,
                length,
                mode,
            },
        })) => Err(nom::Err::Failure(ImapParseError {
            input: error_input,
            kind: ImapErrorKind::Literal {
                tag: Some(tag),
                length,
                mode,
            },
        })),
        Err(error) => Err(error),
    }
}

/// `command-any = "CAPABILITY" / "LOGOUT" / "NOOP"`
///
/// Valid in all states.
fn command_any(input: &[u8]) -> ImapResult<CommandBody> {
    alt((
        value(CommandBody::Capability, tag_no_case(b"CAPABILITY")),
        value(CommandBody::Logout, tag_no_case(b"LOGOUT")),
        value(CommandBody::Noop, tag_no_case(b"NOOP")),
    ))(input)
}

/// `command-nonauth = login / authenticate / "STARTTLS"`
///
/// Valid only when not yet authenticated.
fn command_nonauth(input: &[u8]) -> ImapResult<CommandBody> {
    alt((
        login,
        authenticate,
        value(CommandBody::StartTls, tag_no_case(b"STARTTLS")),
    ))(input)
}

/// `login = "LOGIN" SP userid SP password`
fn login(input: &[u8]) -> ImapResult<CommandBody> {
    map(
        preceded(
            tuple((tag_no_case(b"LOGIN"), sp)),
            separated_pair(astring, sp, astring),
        ),
        |(username, password)| CommandBody::Login {
            username,
            password: Secret::new(password),
        },
    )(input)
}

/// `authenticate = "AUTHENTICATE" SP auth-type [SP (base64 / "=")]`
///
/// The optional argument is the SASL initial response (RFC 4959); a lone
/// `=` means "present but empty".
fn authenticate(input: &[u8]) -> ImapResult<CommandBody> {
    map(
        tuple((
            tag_no_case(b"AUTHENTICATE"),
            sp,
            map(atom, AuthMechanism::from),
            opt(preceded(
                sp,
                alt((value(Vec::new(), tag(b"=")), base64)),
            )),
        )),
        |(_, _, mechanism, initial_response)| CommandBody::Authenticate {
            mechanism,
            initial_response: initial_response.map(Secret::new),
        },
    )(input)
}

/// ```abnf
/// command-auth = append / create / delete / examine / list / lsub /
///                rename / select / status / subscribe / unsubscribe /
///                idle /   ; RFC 2177
///                enable   ; RFC 5161
/// ```
///
/// Valid in the authenticated and selected states.
fn command_auth(input: &[u8]) -> ImapResult<CommandBody> {
    alt((
        append,
        map(
            preceded(tuple((tag_no_case(b"CREATE"), sp)), mailbox),
            |mailbox| CommandBody::Create { mailbox },
        ),
        map(
            preceded(tuple((tag_no_case(b"DELETE"), sp)), mailbox),
            |mailbox| CommandBody::Delete { mailbox },
        ),
        map(
            preceded(tuple((tag_no_case(b"EXAMINE"), sp)), mailbox),
            |mailbox| CommandBody::Examine { mailbox },
        ),
        map(
            preceded(
                tuple((tag_no_case(b"LIST"), sp)),
                separated_pair(list_mailbox, sp, list_mailbox),
            ),
            |(reference, pattern)| CommandBody::List { reference, pattern },
        ),
        map(
            preceded(
                tuple((tag_no_case(b"LSUB"), sp)),
                separated_pair(list_mailbox, sp, list_mailbox),
            ),
            |(reference, pattern)| CommandBody::Lsub { reference, pattern },
        ),
        map(
            preceded(
                tuple((tag_no_case(b"RENAME"), sp)),
                separated_pair(mailbox, sp, mailbox),
            ),
            |(from, to)| CommandBody::Rename { from, to },
        ),
        map(
            preceded(tuple((tag_no_case(b"SELECT"), sp)), mailbox),
            |mailbox| CommandBody::Select { mailbox },
        ),
        status,
        map(
            preceded(tuple((tag_no_case(b"SUBSCRIBE"), sp)), mailbox),
            |mailbox| CommandBody::Subscribe { mailbox },
        ),
        map(
            preceded(tuple((tag_no_case(b"UNSUBSCRIBE"), sp)), mailbox),
            |mailbox| CommandBody::Unsubscribe { mailbox },
        ),
        value(CommandBody::Idle, tag_no_case(b"IDLE")),
        enable,
    ))(input)
}

/// `append = "APPEND" SP mailbox 1*append-message` (RFC 3502)
///
/// `append-message = [SP flag-list] [SP date-time] SP literal`
fn append(input: &[u8]) -> ImapResult<CommandBody> {
    map(
        tuple((
            tag_no_case(b"APPEND"),
            sp,
            mailbox,
            many1(append_message),
        )),
        |(_, _, mailbox, messages)| CommandBody::Append {
            mailbox,
            // `many1` guarantees at least one element.
            messages: NonEmptyVec::try_from(messages).unwrap(),
        },
    )(input)
}

fn append_message(input: &[u8]) -> ImapResult<AppendMessage> {
    map(
        tuple((
            opt(preceded(sp, flag_list)),
            opt(preceded(sp, date_time)),
            preceded(sp, literal),
        )),
        |(flags, date, message)| AppendMessage {
            flags: flags.unwrap_or_default(),
            date,
            message,
        },
    )(input)
}

/// `status = "STATUS" SP mailbox SP "(" status-att *(SP status-att) ")"`
fn status(input: &[u8]) -> ImapResult<CommandBody> {
    map(
        tuple((
            tag_no_case(b"STATUS"),
            sp,
            mailbox,
            sp,
            tag(b"("),
            separated_list1(sp, status_att),
            tag(b")"),
        )),
        |(_, _, mailbox, _, _, attributes, _)| CommandBody::Status {
            mailbox,
            attributes,
        },
    )(input)
}

/// `enable = "ENABLE" 1*(SP capability)` (RFC 5161)
fn enable(input: &[u8]) -> ImapResult<CommandBody> {
    map(
        preceded(tag_no_case(b"ENABLE"), many1(preceded(sp, atom))),
        |extensions| CommandBody::Enable {
            // `many1` guarantees at least one element.
            extensions: NonEmptyVec::try_from(extensions).unwrap(),
        },
    )(input)
}

/// ```abnf
/// command-select = "CHECK" / "CLOSE" / "EXPUNGE" /
///                  "UNSELECT" /  ; RFC 3691
///                  copy / fetch / store / uid / search
/// ```
///
/// Valid only in the selected state.
fn command_select(input: &[u8]) -> ImapResult<CommandBody> {
    alt((
        value(CommandBody::Check, tag_no_case(b"CHECK")),
        value(CommandBody::Close, tag_no_case(b"CLOSE")),
        value(CommandBody::Expunge, tag_no_case(b"EXPUNGE")),
        value(CommandBody::Unselect, tag_no_case(b"UNSELECT")),
        copy(false),
        fetch(false),
        store(false),
        uid,
        search(false),
    ))(input)
}

/// `copy = "COPY" SP sequence-set SP mailbox`
fn copy(uid: bool) -> impl Fn(&[u8]) -> ImapResult<CommandBody> {
    move |input| {
        map(
            preceded(
                tuple((tag_no_case(b"COPY"), sp)),
                separated_pair(sequence_set, sp, mailbox),
            ),
            |(sequence_set, mailbox)| CommandBody::Copy {
                sequence_set,
                mailbox,
                uid,
            },
        )(input)
    }
}

/// `fetch = "FETCH" SP sequence-set SP ("ALL" / "FULL" / "FAST" /
///          fetch-att / "(" fetch-att *(SP fetch-att) ")")`
fn fetch(uid: bool) -> impl Fn(&[u8]) -> ImapResult<CommandBody> {
    move |input| {
        map(
            preceded(
                tuple((tag_no_case(b"FETCH"), sp)),
                separated_pair(sequence_set, sp, fetch_attributes),
            ),
            |(sequence_set, attributes)| CommandBody::Fetch {
                sequence_set,
                attributes,
                uid,
            },
        )(input)
    }
}

/// `store = "STORE" SP sequence-set SP store-att-flags`
///
/// `store-att-flags = (["+" / "-"] "FLAGS" [".SILENT"]) SP
///                    (flag-list / (flag *(SP flag)))`
fn store(uid: bool) -> impl Fn(&[u8]) -> ImapResult<CommandBody> {
    move |input| {
        map(
            tuple((
                tag_no_case(b"STORE"),
                sp,
                sequence_set,
                sp,
                opt(alt((
                    value(StoreType::Add, tag(b"+")),
                    value(StoreType::Remove, tag(b"-")),
                ))),
                tag_no_case(b"FLAGS"),
                map(opt(tag_no_case(b".SILENT")), |silent| {
                    if silent.is_some() {
                        StoreResponse::Silent
                    } else {
                        StoreResponse::Answer
                    }
                }),
                sp,
                alt((flag_list, separated_list1(sp, flag))),
            )),
            |(_, _, sequence_set, _, kind, _, response, _, flags)| CommandBody::Store {
                sequence_set,
                kind: kind.unwrap_or(StoreType::Replace),
                response,
                flags,
                uid,
            },
        )(input)
    }
}

/// `uid = "UID" SP (copy / fetch / search / store / uid-expunge)`
///
/// `uid-expunge` is RFC 4315.
fn uid(input: &[u8]) -> ImapResult<CommandBody> {
    preceded(
        tuple((tag_no_case(b"UID"), sp)),
        alt((
            copy(true),
            fetch(true),
            store(true),
            search(true),
            map(
                preceded(tuple((tag_no_case(b"EXPUNGE"), sp)), sequence_set),
                |sequence_set| CommandBody::ExpungeUid { sequence_set },
            ),
        )),
    )(input)
}

/// `search = "SEARCH" [SP "CHARSET" SP charset] 1*(SP search-key)`
fn search(uid: bool) -> impl Fn(&[u8]) -> ImapResult<CommandBody> {
    move |input| {
        map(
            tuple((
                tag_no_case(b"SEARCH"),
                opt(preceded(
                    sp,
                    preceded(tuple((tag_no_case(b"CHARSET"), sp)), charset),
                )),
                sp,
                search_criteria,
            )),
            |(_, charset, _, criteria)| CommandBody::Search {
                charset,
                criteria,
                uid,
            },
        )(input)
    }
}

#[cfg(test)]
mod tests {
    use imapd_types::{
        core::{AString, IString},
        fetch::{FetchAttribute, MacroOrFetchAttributes},
        flag::Flag,
        mailbox::Mailbox,
        search::SearchKey,
    };

    use super::*;

    fn parse(input: &[u8]) -> Command {
        let (rem, command) = command(input).unwrap();
        assert!(rem.is_empty());
        command
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse(b"a CAPABILITY\r\n").body, CommandBody::Capability);
        assert_eq!(parse(b"a2 noop\r\n").body, CommandBody::Noop);
        assert_eq!(parse(b"A003 LOGOUT\r\n").body, CommandBody::Logout);
        assert_eq!(parse(b"x CHECK\r\n").body, CommandBody::Check);
        assert_eq!(parse(b"x UNSELECT\r\n").body, CommandBody::Unselect);
    }

    #[test]
    fn login_variants() {
        let parsed = parse(b"a login demouser demopass\r\n");
        match parsed.body {
            CommandBody::Login { username, password } => {
                assert_eq!(username, AString::try_from("demouser").unwrap());
                assert_eq!(
                    *password.declassify(),
                    AString::try_from("demopass").unwrap()
                );
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Quoted and literal forms.
        assert!(command(b"a login \"demo user\" {4}\r\npass\r\n").is_ok());
    }

    #[test]
    fn authenticate_with_initial_response() {
        let command = parse(b"b AUTHENTICATE PLAIN AGRlbW91c2VyAGRlbW9wYXNz\r\n");
        match command.body {
            CommandBody::Authenticate {
                mechanism,
                initial_response: Some(response),
            } => {
                assert_eq!(mechanism, AuthMechanism::Plain);
                assert_eq!(
                    response.declassify().as_slice(),
                    b"\x00demouser\x00demopass"
                );
            }
            other => panic!("unexpected: {other:?}"),
        }

        let command = parse(b"b AUTHENTICATE LOGIN\r\n");
        assert!(matches!(
            command.body,
            CommandBody::Authenticate {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            }
        ));
    }

    #[test]
    fn select_and_friends() {
        assert_eq!(
            parse(b"c SELECT inbox\r\n").body,
            CommandBody::Select {
                mailbox: Mailbox::Inbox
            }
        );
        assert_eq!(
            parse(b"c EXAMINE Archive\r\n").body,
            CommandBody::Examine {
                mailbox: Mailbox::try_from("Archive").unwrap()
            }
        );
        assert!(matches!(
            parse(b"c RENAME foo bar\r\n").body,
            CommandBody::Rename { .. }
        ));
    }

    #[test]
    fn list_allows_empty_reference() {
        let command = parse(b"d LIST \"\" *\r\n");
        match command.body {
            CommandBody::List { reference, pattern } => {
                assert_eq!(reference.as_str(), "");
                assert_eq!(pattern.as_str(), "*");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_attributes() {
        let command = parse(b"e STATUS INBOX (MESSAGES UNSEEN)\r\n");
        match command.body {
            CommandBody::Status { attributes, .. } => assert_eq!(attributes.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn append_with_flags_and_multiappend() {
        let command = parse(b"f APPEND INBOX (\\Flagged) {3}\r\nabc\r\n");
        match command.body {
            CommandBody::Append { messages, .. } => {
                assert_eq!(messages.len(), 1);
                let message = &messages.as_slice()[0];
                assert_eq!(message.flags, vec![Flag::Flagged]);
                assert_eq!(message.message.data(), b"abc");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let command = parse(b"f APPEND INBOX {1}\r\na (\\Seen) {1}\r\nb\r\n");
        match command.body {
            CommandBody::Append { messages, .. } => assert_eq!(messages.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn store_spellings() {
        let command = parse(b"g STORE 1:4 +FLAGS.SILENT (\\Deleted)\r\n");
        match command.body {
            CommandBody::Store {
                kind,
                response,
                flags,
                uid,
                ..
            } => {
                assert_eq!(kind, StoreType::Add);
                assert_eq!(response, StoreResponse::Silent);
                assert_eq!(flags, vec![Flag::Deleted]);
                assert!(!uid);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Unparenthesized flags are equally valid.
        assert!(matches!(
            parse(b"g STORE 2 FLAGS \\Seen \\Draft\r\n").body,
            CommandBody::Store { .. }
        ));
    }

    #[test]
    fn uid_prefixed_commands() {
        assert!(matches!(
            parse(b"h UID FETCH 1:* (UID)\r\n").body,
            CommandBody::Fetch { uid: true, .. }
        ));
        assert!(matches!(
            parse(b"h UID STORE 1 +FLAGS (\\Deleted)\r\n").body,
            CommandBody::Store { uid: true, .. }
        ));
        assert!(matches!(
            parse(b"h UID COPY 1 Trash\r\n").body,
            CommandBody::Copy { uid: true, .. }
        ));
        assert!(matches!(
            parse(b"h UID SEARCH UNSEEN\r\n").body,
            CommandBody::Search { uid: true, .. }
        ));
        assert!(matches!(
            parse(b"h UID EXPUNGE 1:*\r\n").body,
            CommandBody::ExpungeUid { .. }
        ));
    }

    #[test]
    fn fetch_with_paren_list() {
        let command = parse(b"i FETCH 1 (FLAGS BODY.PEEK[HEADER])\r\n");
        match command.body {
            CommandBody::Fetch { attributes, .. } => match attributes {
                MacroOrFetchAttributes::FetchAttributes(attributes) => {
                    assert_eq!(attributes[0], FetchAttribute::Flags);
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn search_with_charset() {
        let command = parse(b"j SEARCH CHARSET UTF-8 TEXT {3}\r\nfoo\r\n");
        match command.body {
            CommandBody::Search {
                charset: Some(charset),
                criteria,
                uid: false,
            } => {
                assert_eq!(charset.as_str(), "UTF-8");
                assert!(matches!(criteria, SearchKey::Text(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_command_fails() {
        assert!(command(b"k FROBNICATE\r\n").is_err());
    }

    #[test]
    fn missing_crlf_is_incomplete() {
        assert!(matches!(
            command(b"l NOOP"),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn literal_mailbox_name() {
        let command = parse(b"m SELECT {12}\r\nfunny\xc2\xa0stuff\r\n");
        match command.body {
            CommandBody::Select { mailbox } => {
                assert!(matches!(mailbox, Mailbox::Other(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }

        // A literal username stays in literal form.
        let command = parse(b"n LOGIN {5}\r\nalice secret\r\n");
        match command.body {
            CommandBody::Login { username, .. } => match username {
                AString::String(IString::Literal(literal)) => {
                    assert_eq!(literal.data(), b"alice")
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
