//! Parsers for flags.

use imapd_types::flag::Flag;
use nom::{
    bytes::streaming::tag,
    combinator::map,
    multi::separated_list0,
    sequence::{delimited, preceded},
};

use abnf_core::streaming::sp;

use crate::{core::atom, decode::ImapResult};

/// `flag = "\Answered" / "\Flagged" / "\Deleted" / "\Seen" / "\Draft" /
///         flag-keyword / flag-extension`
///
/// System flags match case-insensitively and canonicalize; keywords keep
/// their case. `\Recent` is not accepted here: clients cannot send it.
pub(crate) fn flag(input: &[u8]) -> ImapResult<Flag> {
    nom::branch::alt((
        map(preceded(tag(b"\\"), atom), Flag::system),
        map(atom, Flag::keyword),
    ))(input)
}

/// `flag-list = "(" [flag *(SP flag)] ")"`
pub(crate) fn flag_list(input: &[u8]) -> ImapResult<Vec<Flag>> {
    delimited(tag(b"("), separated_list0(sp, flag), tag(b")"))(input)
}

#[cfg(test)]
mod tests {
    use imapd_types::core::Atom;

    use super::*;

    #[test]
    fn test_flag() {
        let (_, f) = flag(b"\\seen ").unwrap();
        assert_eq!(f, Flag::Seen);

        let (_, f) = flag(b"Forwarded ").unwrap();
        assert_eq!(f, Flag::Keyword(Atom::try_from("Forwarded").unwrap()));

        let (_, f) = flag(b"\\XNope ").unwrap();
        assert_eq!(f, Flag::Extension(Atom::try_from("XNope").unwrap()));
    }

    #[test]
    fn test_flag_list() {
        let (_, flags) = flag_list(b"(\\Flagged \\Deleted) ").unwrap();
        assert_eq!(flags, vec![Flag::Flagged, Flag::Deleted]);

        let (_, flags) = flag_list(b"() ").unwrap();
        assert!(flags.is_empty());
    }
}
