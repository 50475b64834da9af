//! The `ENVELOPE` structure.

use crate::core::NString;

/// Parsed-out header summary reported by `FETCH (ENVELOPE)`.
///
/// Every field is `NIL`-able; address lists are empty when the header is
/// absent. The server derives this from the message headers once, at
/// append time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Envelope {
    pub date: NString,
    pub subject: NString,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: NString,
    pub message_id: NString,
}

/// An electronic mail address.
///
/// `("name" "adl" "mailbox" "host")` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address {
    /// Display name.
    pub name: NString,
    /// At-domain-list (source route, practically always `NIL`).
    pub adl: NString,
    /// Local part.
    pub mailbox: NString,
    /// Domain.
    pub host: NString,
}
