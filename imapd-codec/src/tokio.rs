//! A [`tokio_util::codec`] codec driving the parsers over a TCP stream.
//!
//! The codec owns the continuation-request dance: when a command line ends
//! in a literal prefix, decoding yields an [`Action`] telling the caller to
//! either acknowledge the literal (send `+ ...`) or reject it, and framing
//! switches to collecting exactly that many octets before parsing resumes.
//!
//! `AUTHENTICATE` and `IDLE` accept different inputs than the command loop;
//! [`ImapServerCodec::set_mode`] switches the expected message kind.

use std::io::{Error as IoError, Write};

use bytes::{Buf, BufMut, BytesMut};
use imapd_types::{
    auth::AuthenticateData,
    command::Command,
    core::{LiteralMode, Tag},
    response::{Greeting, Response},
};
use log::warn;
use thiserror::Error;
use tokio_util::codec::{Decoder as TokioDecoder, Encoder as TokioEncoder};

use crate::{
    decode::{
        AuthenticateDataCodec, CommandCodec, CommandDecodeError, Decoder, IdleDoneCodec,
        LineDecodeError,
    },
    encode::Encode,
};

/// What the connection loop is currently expecting from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecMode {
    #[default]
    Command,
    /// Continuation lines of an `AUTHENTICATE` exchange.
    AuthenticateData,
    /// Only `DONE\r\n` ends an `IDLE`.
    IdleDone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FramingState {
    /// Collect lines until one parses (or fails to).
    ReadLine { to_consume_acc: usize },
    /// A literal was announced; collect exactly `length` more octets.
    ReadLiteral { to_consume_acc: usize, length: u32 },
    /// An oversized non-synchronizing literal is on the wire regardless;
    /// drain it, then report the rejection.
    DiscardLiteral {
        remaining: u32,
        length: u32,
        tag: Option<Tag>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapServerCodec {
    state: FramingState,
    mode: CodecMode,
    max_literal_size: usize,
}

impl ImapServerCodec {
    pub fn new(max_literal_size: usize) -> Self {
        Self {
            state: FramingState::ReadLine { to_consume_acc: 0 },
            mode: CodecMode::Command,
            max_literal_size,
        }
    }

    pub fn set_mode(&mut self, mode: CodecMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> CodecMode {
        self.mode
    }
}

#[derive(Debug, Error)]
pub enum ImapServerCodecError {
    #[error(transparent)]
    Io(#[from] IoError),
}

/// A successfully framed client message, or a request for server action.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Command(Command),
    AuthenticateData(AuthenticateData),
    IdleDone,
    /// The line did not parse in the current mode. The tag is recovered
    /// from the line prefix when possible so the `BAD` can be tagged.
    ParsingFailed { tag: Option<Tag> },
    ActionRequired(Action),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Send a continuation request; the client is waiting for it before it
    /// transmits `length` literal octets.
    SendLiteralAck(u32),
    /// The literal exceeds the configured maximum; answer `tag` with a
    /// `NO [TOOBIG]`-style rejection.
    SendLiteralReject { tag: Option<Tag>, length: u32 },
}

/// Scans `src` (skipping `skip` already-checked bytes) for a LF.
///
/// Returns `Some(Ok(n))` when a CRLF-terminated chunk of `n` bytes (from
/// `skip`, inclusive of the CRLF) is available, `Some(Err(n))` when the
/// line ends in a bare LF (which is a framing violation; `n` bytes up to
/// and including the LF should be discarded), and `None` when no full line
/// is buffered yet.
fn find_crlf_inclusive(skip: usize, src: &BytesMut) -> Option<Result<usize, usize>> {
    src.iter()
        .skip(skip)
        .position(|byte| *byte == b'\n')
        .map(|position| {
            if position >= 1 && src[skip + position - 1] == b'\r' {
                Ok(position + 1)
            } else {
                Err(position + 1)
            }
        })
}

/// Best-effort recovery of the tag from an unparseable line.
fn salvage_tag(line: &[u8]) -> Option<Tag> {
    let prefix = line.split(|byte| *byte == b' ').next()?;
    Tag::try_from(std::str::from_utf8(prefix).ok()?).ok()
}

impl TokioDecoder for ImapServerCodec {
    type Item = Event;
    type Error = ImapServerCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                FramingState::ReadLine {
                    ref mut to_consume_acc,
                } => {
                    match find_crlf_inclusive(*to_consume_acc, src) {
                        None => return Ok(None),
                        // Bare LF: discard and report.
                        Some(Err(to_discard)) => {
                            let tag = salvage_tag(&src[..*to_consume_acc + to_discard]);
                            src.advance(*to_consume_acc + to_discard);
                            self.state = FramingState::ReadLine { to_consume_acc: 0 };

                            return Ok(Some(Event::ParsingFailed { tag }));
                        }
                        Some(Ok(to_consume)) => {
                            *to_consume_acc += to_consume;
                            let line = &src[..*to_consume_acc];

                            match self.mode {
                                CodecMode::Command => match CommandCodec
                                    .decode(line)
                                    .map(|(_rem, command)| command)
                                {
                                    Ok(command) => {
                                        src.advance(*to_consume_acc);
                                        self.state =
                                            FramingState::ReadLine { to_consume_acc: 0 };

                                        return Ok(Some(Event::Command(command)));
                                    }
                                    // A line always parses completely or
                                    // ends in a literal; it can't be
                                    // incomplete once CRLF was seen.
                                    Err(CommandDecodeError::Incomplete) => unreachable!(),
                                    Err(CommandDecodeError::LiteralFound {
                                        tag,
                                        length,
                                        mode,
                                    }) => {
                                        if length as usize <= self.max_literal_size {
                                            src.reserve(length as usize);

                                            let to_consume_acc = *to_consume_acc;
                                            self.state = FramingState::ReadLiteral {
                                                to_consume_acc,
                                                length,
                                            };

                                            match mode {
                                                LiteralMode::Sync => {
                                                    return Ok(Some(Event::ActionRequired(
                                                        Action::SendLiteralAck(length),
                                                    )));
                                                }
                                                // The octets follow either
                                                // way; keep framing.
                                                LiteralMode::NonSync => continue,
                                            }
                                        } else {
                                            warn!(
                                                "literal of {length} bytes exceeds the limit of {}",
                                                self.max_literal_size
                                            );
                                            let to_discard = *to_consume_acc;
                                            src.advance(to_discard);

                                            match mode {
                                                LiteralMode::Sync => {
                                                    // Rejecting the
                                                    // continuation stops the
                                                    // client from sending.
                                                    self.state = FramingState::ReadLine {
                                                        to_consume_acc: 0,
                                                    };

                                                    return Ok(Some(Event::ActionRequired(
                                                        Action::SendLiteralReject {
                                                            tag: Some(tag),
                                                            length,
                                                        },
                                                    )));
                                                }
                                                LiteralMode::NonSync => {
                                                    // The octets are coming
                                                    // regardless; drain them
                                                    // first.
                                                    self.state =
                                                        FramingState::DiscardLiteral {
                                                            remaining: length,
                                                            length,
                                                            tag: Some(tag),
                                                        };
                                                    continue;
                                                }
                                            }
                                        }
                                    }
                                    Err(CommandDecodeError::Failed) => {
                                        warn!("unparseable command line ({} bytes)", line.len());
                                        let tag = salvage_tag(line);
                                        src.advance(*to_consume_acc);
                                        self.state =
                                            FramingState::ReadLine { to_consume_acc: 0 };

                                        return Ok(Some(Event::ParsingFailed { tag }));
                                    }
                                },
                                CodecMode::AuthenticateData => {
                                    let result =
                                        AuthenticateDataCodec.decode(line).map(|(_rem, data)| data);
                                    src.advance(*to_consume_acc);
                                    self.state = FramingState::ReadLine { to_consume_acc: 0 };

                                    return Ok(Some(match result {
                                        Ok(data) => Event::AuthenticateData(data),
                                        Err(LineDecodeError::Incomplete) => unreachable!(),
                                        Err(LineDecodeError::Failed) => {
                                            Event::ParsingFailed { tag: None }
                                        }
                                    }));
                                }
                                CodecMode::IdleDone => {
                                    let result = IdleDoneCodec.decode(line).map(|(_rem, ())| ());
                                    src.advance(*to_consume_acc);
                                    self.state = FramingState::ReadLine { to_consume_acc: 0 };

                                    return Ok(Some(match result {
                                        Ok(()) => Event::IdleDone,
                                        Err(LineDecodeError::Incomplete) => unreachable!(),
                                        Err(LineDecodeError::Failed) => {
                                            Event::ParsingFailed { tag: None }
                                        }
                                    }));
                                }
                            }
                        }
                    }
                }
                FramingState::ReadLiteral {
                    to_consume_acc,
                    length,
                } => {
                    if to_consume_acc + length as usize <= src.len() {
                        self.state = FramingState::ReadLine {
                            to_consume_acc: to_consume_acc + length as usize,
                        };
                    } else {
                        return Ok(None);
                    }
                }
                FramingState::DiscardLiteral {
                    ref mut remaining,
                    length,
                    ref tag,
                } => {
                    let available = src.len().min(*remaining as usize);
                    src.advance(available);
                    *remaining -= available as u32;

                    if *remaining == 0 {
                        let tag = tag.clone();
                        self.state = FramingState::ReadLine { to_consume_acc: 0 };

                        return Ok(Some(Event::ActionRequired(Action::SendLiteralReject {
                            tag,
                            length,
                        })));
                    }

                    return Ok(None);
                }
            }
        }
    }
}

impl TokioEncoder<&Greeting> for ImapServerCodec {
    type Error = IoError;

    fn encode(&mut self, item: &Greeting, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut writer = dst.writer();
        item.encode(&mut writer)?;
        writer.flush()
    }
}

impl TokioEncoder<&Response> for ImapServerCodec {
    type Error = IoError;

    fn encode(&mut self, item: &Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut writer = dst.writer();
        item.encode(&mut writer)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use imapd_types::command::CommandBody;

    use super::*;

    fn feed(codec: &mut ImapServerCodec, buffer: &mut BytesMut, bytes: &[u8]) -> Vec<Event> {
        buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(event) = codec.decode(buffer).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn plain_command_roundtrip() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();

        assert!(feed(&mut codec, &mut buffer, b"a noo").is_empty());
        let events = feed(&mut codec, &mut buffer, b"p\r\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Command(command) if command.body == CommandBody::Noop));
    }

    #[test]
    fn sync_literal_requests_continuation() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();

        let events = feed(&mut codec, &mut buffer, b"a login {5}\r\n");
        assert_eq!(
            events,
            vec![Event::ActionRequired(Action::SendLiteralAck(5))]
        );

        let events = feed(&mut codec, &mut buffer, b"alice demopass\r\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Command(command) if matches!(command.body, CommandBody::Login { .. })));
    }

    #[test]
    fn non_sync_literal_needs_no_ack() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();

        let events = feed(&mut codec, &mut buffer, b"a login {5+}\r\nalice demopass\r\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Command(_)));
    }

    #[test]
    fn oversized_sync_literal_is_rejected_with_tag() {
        let mut codec = ImapServerCodec::new(16);
        let mut buffer = BytesMut::new();

        let events = feed(&mut codec, &mut buffer, b"a append INBOX {999}\r\n");
        match &events[..] {
            [Event::ActionRequired(Action::SendLiteralReject { tag: Some(tag), length })] => {
                assert_eq!(tag.as_ref(), "a");
                assert_eq!(*length, 999);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // The line was discarded; the next command parses normally.
        let events = feed(&mut codec, &mut buffer, b"b noop\r\n");
        assert!(matches!(&events[0], Event::Command(_)));
    }

    #[test]
    fn unparseable_line_salvages_tag() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();

        let events = feed(&mut codec, &mut buffer, b"tag9 FROBNICATE\r\n");
        match &events[..] {
            [Event::ParsingFailed { tag: Some(tag) }] => assert_eq!(tag.as_ref(), "tag9"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bare_lf_is_a_framing_violation() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();

        let events = feed(&mut codec, &mut buffer, b"a noop\n");
        assert!(matches!(&events[0], Event::ParsingFailed { .. }));
    }

    #[test]
    fn idle_mode_only_accepts_done() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();
        codec.set_mode(CodecMode::IdleDone);

        let events = feed(&mut codec, &mut buffer, b"DONE\r\n");
        assert_eq!(events, vec![Event::IdleDone]);

        codec.set_mode(CodecMode::IdleDone);
        let events = feed(&mut codec, &mut buffer, b"a noop\r\n");
        assert!(matches!(&events[0], Event::ParsingFailed { .. }));
    }

    #[test]
    fn authenticate_data_mode() {
        let mut codec = ImapServerCodec::new(1024);
        let mut buffer = BytesMut::new();
        codec.set_mode(CodecMode::AuthenticateData);

        let events = feed(&mut codec, &mut buffer, b"AGRlbW91c2VyAGRlbW9wYXNz\r\n");
        match &events[..] {
            [Event::AuthenticateData(AuthenticateData::Continue(secret))] => {
                assert_eq!(secret.declassify().as_slice(), b"\x00demouser\x00demopass");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
