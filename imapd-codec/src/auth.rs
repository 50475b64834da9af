//! Parser for `AUTHENTICATE` continuation lines.

#[cfg(not(feature = "quirk_crlf_relaxed"))]
use abnf_core::streaming::crlf;
#[cfg(feature = "quirk_crlf_relaxed")]
use abnf_core::streaming::crlf_relaxed as crlf;
use imapd_types::{auth::AuthenticateData, secret::Secret};
use nom::{
    branch::alt,
    bytes::streaming::tag,
    combinator::map,
    sequence::terminated,
};

use crate::{core::base64, decode::ImapResult};

/// `authenticate-data = base64 CRLF / "*" CRLF`
///
/// The `*` line cancels the exchange (RFC 3501, section 6.2.2).
pub(crate) fn authenticate_data(input: &[u8]) -> ImapResult<AuthenticateData> {
    terminated(
        alt((
            map(tag(b"*"), |_| AuthenticateData::Cancel),
            map(base64, |data| AuthenticateData::Continue(Secret::new(data))),
        )),
        crlf,
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_data() {
        let (_, data) = authenticate_data(b"YWJj\r\n").unwrap();
        assert_eq!(
            data,
            AuthenticateData::Continue(Secret::new(b"abc".to_vec()))
        );

        let (_, data) = authenticate_data(b"*\r\n").unwrap();
        assert_eq!(data, AuthenticateData::Cancel);

        // An empty response line is valid base64 (zero bytes).
        let (_, data) = authenticate_data(b"\r\n").unwrap();
        assert_eq!(data, AuthenticateData::Continue(Secret::new(Vec::new())));

        assert!(authenticate_data(b"not base64!\r\n").is_err());
    }
}
