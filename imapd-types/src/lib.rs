//! # imapd-types
//!
//! Data structures for an IMAP4rev1 server.
//!
//! Every type validates on construction, so a value that exists can always
//! be serialized to valid protocol; the sibling `imapd-codec` crate holds
//! the parsers and serializers, and `imapd-server` the protocol engine.
//!
//! The split mirrors the protocol itself: [`command`] is what clients send,
//! [`response`] what the server sends, and the remaining modules hold the
//! typed primitives both sides are built from.

pub mod auth;
pub mod body;
pub mod command;
pub mod core;
pub mod datetime;
pub mod envelope;
pub mod fetch;
pub mod flag;
pub mod mailbox;
pub mod response;
pub mod search;
pub mod secret;
pub mod sequence;
pub mod status;
pub mod utils;
