//! Parser for the line that terminates `IDLE` (RFC 2177).

#[cfg(not(feature = "quirk_crlf_relaxed"))]
use abnf_core::streaming::crlf;
#[cfg(feature = "quirk_crlf_relaxed")]
use abnf_core::streaming::crlf_relaxed as crlf;
use nom::{bytes::streaming::tag_no_case, combinator::value, sequence::terminated};

use crate::decode::ImapResult;

/// `idle-done = "DONE" CRLF`
///
/// While idling this is the only input the server accepts; anything else
/// ends the connection.
pub(crate) fn idle_done(input: &[u8]) -> ImapResult<()> {
    value((), terminated(tag_no_case(b"DONE"), crlf))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_done() {
        assert!(idle_done(b"DONE\r\n").is_ok());
        assert!(idle_done(b"done\r\n").is_ok());
        assert!(matches!(idle_done(b"DON"), Err(nom::Err::Incomplete(_))));
        assert!(idle_done(b"NOPE\r\n").is_err());
        assert!(idle_done(b"DONE \r\n").is_err());
    }
}
