//! # imapd-codec
//!
//! The wire codec of the server: nom-based streaming parsers for client
//! commands and serializers for server responses, over the types from
//! `imapd-types`.
//!
//! Three layers:
//!
//! * [`decode`] / [`encode`]: pure parse/serialize, no I/O. Parsers never
//!   consume partial values; "needs more input" and "found a literal
//!   prefix" are distinct from "syntax error".
//! * [`tokio`]: a [`tokio_util::codec`] codec that frames lines and
//!   literals on a live connection and drives the continuation-request
//!   handshake.
//!
//! The parser modules mirror the grammar sections of RFC 3501 plus the
//! extensions the server implements (RFC 2177 IDLE, RFC 3502 MULTIAPPEND,
//! RFC 3516 BINARY, RFC 4315 UIDPLUS, RFC 5161 ENABLE, RFC 7888 LITERAL+).

mod auth;
mod command;
mod core;
mod datetime;
mod fetch;
mod flag;
mod idle;
mod mailbox;
mod search;
mod sequence;
mod status;

pub mod decode;
pub mod encode;
pub mod tokio;

pub use decode::{
    AuthenticateDataCodec, CommandCodec, CommandDecodeError, Decoder, IdleDoneCodec,
    LineDecodeError,
};
pub use encode::Encode;
