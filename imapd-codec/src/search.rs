//! Parser for `SEARCH` criteria.

use abnf_core::streaming::sp;
use imapd_types::{
    core::NonEmptyVec,
    search::SearchKey,
};
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case},
    combinator::{map, value},
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair, tuple},
};

use crate::{
    core::{astring, atom, number},
    datetime::date,
    decode::{ImapErrorKind, ImapParseError, ImapResult},
    fetch::header_fld_name,
    sequence::sequence_set,
};

/// The maximum nesting depth of `OR`/`NOT`/parenthesized key lists.
///
/// The grammar is recursive; a hostile client must not be able to grow the
/// stack without bound.
const SEARCH_RECURSION_LIMIT: usize = 9;

/// `1*(SP search-key)`: the criteria part of a SEARCH command, folded into
/// a single key (an implicit AND when there is more than one).
pub(crate) fn search_criteria(input: &[u8]) -> ImapResult<SearchKey> {
    map(
        separated_list1(sp, search_key(SEARCH_RECURSION_LIMIT)),
        fold_criteria,
    )(input)
}

fn fold_criteria(mut criteria: Vec<SearchKey>) -> SearchKey {
    if criteria.len() == 1 {
        criteria.remove(0)
    } else {
        // `separated_list1` guarantees at least one element.
        SearchKey::And(NonEmptyVec::try_from(criteria).unwrap())
    }
}

/// `search-key = <all alternatives from RFC 3501>`
///
/// The returned parser carries the remaining nesting allowance so deeply
/// nested `OR`/`NOT`/`(...)` cannot overflow the stack.
pub(crate) fn search_key(
    remaining_recursion: usize,
) -> impl Fn(&[u8]) -> ImapResult<SearchKey> {
    move |input: &[u8]| search_key_limited(input, remaining_recursion)
}

fn search_key_limited(input: &[u8], remaining_recursion: usize) -> ImapResult<SearchKey> {
    if remaining_recursion == 0 {
        return Err(nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::RecursionLimitExceeded,
        }));
    }

    let next = move |input| search_key_limited(input, remaining_recursion - 1);

    alt((
        // Longest names first where one is a prefix of another.
        alt((
            value(SearchKey::Unanswered, tag_no_case(b"UNANSWERED")),
            value(SearchKey::Undeleted, tag_no_case(b"UNDELETED")),
            value(SearchKey::Undraft, tag_no_case(b"UNDRAFT")),
            value(SearchKey::Unflagged, tag_no_case(b"UNFLAGGED")),
            map(
                preceded(tuple((tag_no_case(b"UNKEYWORD"), sp)), atom),
                SearchKey::Unkeyword,
            ),
            value(SearchKey::Unseen, tag_no_case(b"UNSEEN")),
            value(SearchKey::Answered, tag_no_case(b"ANSWERED")),
            value(SearchKey::Deleted, tag_no_case(b"DELETED")),
            value(SearchKey::Draft, tag_no_case(b"DRAFT")),
            value(SearchKey::Flagged, tag_no_case(b"FLAGGED")),
            map(
                preceded(tuple((tag_no_case(b"KEYWORD"), sp)), atom),
                SearchKey::Keyword,
            ),
            value(SearchKey::Recent, tag_no_case(b"RECENT")),
            value(SearchKey::Seen, tag_no_case(b"SEEN")),
            value(SearchKey::New, tag_no_case(b"NEW")),
            value(SearchKey::Old, tag_no_case(b"OLD")),
            value(SearchKey::All, tag_no_case(b"ALL")),
        )),
        alt((
            map(
                preceded(tuple((tag_no_case(b"SENTBEFORE"), sp)), date),
                SearchKey::SentBefore,
            ),
            map(
                preceded(tuple((tag_no_case(b"SENTSINCE"), sp)), date),
                SearchKey::SentSince,
            ),
            map(
                preceded(tuple((tag_no_case(b"SENTON"), sp)), date),
                SearchKey::SentOn,
            ),
            map(
                preceded(tuple((tag_no_case(b"BEFORE"), sp)), date),
                SearchKey::Before,
            ),
            map(
                preceded(tuple((tag_no_case(b"SINCE"), sp)), date),
                SearchKey::Since,
            ),
            map(preceded(tuple((tag_no_case(b"ON"), sp)), date), SearchKey::On),
            map(
                preceded(tuple((tag_no_case(b"LARGER"), sp)), number),
                SearchKey::Larger,
            ),
            map(
                preceded(tuple((tag_no_case(b"SMALLER"), sp)), number),
                SearchKey::Smaller,
            ),
        )),
        alt((
            map(
                preceded(tuple((tag_no_case(b"BCC"), sp)), astring),
                SearchKey::Bcc,
            ),
            map(
                preceded(tuple((tag_no_case(b"BODY"), sp)), astring),
                SearchKey::Body,
            ),
            map(
                preceded(tuple((tag_no_case(b"CC"), sp)), astring),
                SearchKey::Cc,
            ),
            map(
                preceded(tuple((tag_no_case(b"FROM"), sp)), astring),
                SearchKey::From,
            ),
            map(
                preceded(
                    tuple((tag_no_case(b"HEADER"), sp)),
                    separated_pair(header_fld_name, sp, astring),
                ),
                |(name, value)| SearchKey::Header(name, value),
            ),
            map(
                preceded(tuple((tag_no_case(b"SUBJECT"), sp)), astring),
                SearchKey::Subject,
            ),
            map(
                preceded(tuple((tag_no_case(b"TEXT"), sp)), astring),
                SearchKey::Text,
            ),
            map(
                preceded(tuple((tag_no_case(b"TO"), sp)), astring),
                SearchKey::To,
            ),
        )),
        alt((
            map(
                preceded(tuple((tag_no_case(b"UID"), sp)), sequence_set),
                SearchKey::Uid,
            ),
            map(
                preceded(
                    tuple((tag_no_case(b"OR"), sp)),
                    separated_pair(next, sp, next),
                ),
                |(left, right)| SearchKey::Or(Box::new(left), Box::new(right)),
            ),
            map(preceded(tuple((tag_no_case(b"NOT"), sp)), next), |key| {
                SearchKey::Not(Box::new(key))
            }),
            map(sequence_set, SearchKey::SequenceSet),
            map(
                delimited(tag(b"("), separated_list1(sp, next), tag(b")")),
                fold_criteria,
            ),
        )),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key() {
        let (_, key) = search_criteria(b"UNSEEN\r\n").unwrap();
        assert_eq!(key, SearchKey::Unseen);
    }

    #[test]
    fn implicit_and() {
        let (_, key) = search_criteria(b"FLAGGED SINCE 1-Feb-1994 NOT FROM \"Smith\"\r\n").unwrap();
        match key {
            SearchKey::And(keys) => {
                assert_eq!(keys.len(), 3);
                assert_eq!(keys.as_slice()[0], SearchKey::Flagged);
                assert!(matches!(keys.as_slice()[2], SearchKey::Not(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn or_nests() {
        let (_, key) = search_criteria(b"OR UNSEEN (DELETED DRAFT)\r\n").unwrap();
        match key {
            SearchKey::Or(left, right) => {
                assert_eq!(*left, SearchKey::Unseen);
                assert!(matches!(*right, SearchKey::And(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn recursion_is_bounded() {
        let mut evil = b"NOT ".repeat(50);
        evil.extend_from_slice(b"UNSEEN\r\n");
        assert!(search_criteria(&evil).is_err());
    }

    #[test]
    fn sequence_and_uid_keys() {
        let (_, key) = search_criteria(b"UID 4:7,9 2:4\r\n").unwrap();
        match key {
            SearchKey::And(keys) => {
                assert!(matches!(keys.as_slice()[0], SearchKey::Uid(_)));
                assert!(matches!(keys.as_slice()[1], SearchKey::SequenceSet(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
