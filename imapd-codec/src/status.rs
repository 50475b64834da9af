//! Parser for `STATUS` attributes.

use imapd_types::status::StatusAttribute;
use nom::{branch::alt, bytes::streaming::tag_no_case, combinator::value};

use crate::decode::ImapResult;

/// `status-att = "MESSAGES" / "RECENT" / "UIDNEXT" / "UIDVALIDITY" / "UNSEEN"`
pub(crate) fn status_att(input: &[u8]) -> ImapResult<StatusAttribute> {
    alt((
        value(StatusAttribute::Messages, tag_no_case(b"MESSAGES")),
        value(StatusAttribute::Recent, tag_no_case(b"RECENT")),
        value(StatusAttribute::UidNext, tag_no_case(b"UIDNEXT")),
        value(StatusAttribute::UidValidity, tag_no_case(b"UIDVALIDITY")),
        value(StatusAttribute::Unseen, tag_no_case(b"UNSEEN")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_att() {
        let (_, att) = status_att(b"uidnext ").unwrap();
        assert_eq!(att, StatusAttribute::UidNext);

        assert!(status_att(b"nope ").is_err());
    }
}
