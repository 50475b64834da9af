//! Parser for sequence sets.

use imapd_types::{
    core::NonEmptyVec,
    sequence::{SeqOrUid, Sequence, SequenceSet},
};
use nom::{
    branch::alt,
    bytes::streaming::tag,
    combinator::{map, value},
    multi::separated_list1,
    sequence::separated_pair,
};

use crate::{core::nz_number, decode::ImapResult};

/// `seq-number = nz-number / "*"`
fn seq_or_uid(input: &[u8]) -> ImapResult<SeqOrUid> {
    alt((
        value(SeqOrUid::Asterisk, tag(b"*")),
        map(nz_number, |number| {
            // `nz_number` guarantees non-zero.
            SeqOrUid::Value(number.try_into().unwrap())
        }),
    ))(input)
}

/// `seq-range = seq-number ":" seq-number`
fn seq_range(input: &[u8]) -> ImapResult<Sequence> {
    map(
        separated_pair(seq_or_uid, tag(b":"), seq_or_uid),
        |(start, end)| Sequence::Range(start, end),
    )(input)
}

/// `sequence-set = (seq-number / seq-range) *("," sequence-set)`
pub(crate) fn sequence_set(input: &[u8]) -> ImapResult<SequenceSet> {
    map(
        separated_list1(
            tag(b","),
            alt((seq_range, map(seq_or_uid, Sequence::Single))),
        ),
        |sequences| {
            // `separated_list1` guarantees at least one element.
            SequenceSet(NonEmptyVec::try_from(sequences).unwrap())
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_set() {
        let (rem, set) = sequence_set(b"1:*,5,9:12 ").unwrap();
        assert_eq!(rem, b" ");
        assert_eq!(set.to_string(), "1:*,5,9:12");

        // `0` is not a sequence number.
        assert!(sequence_set(b"0 ").is_err());
    }
}
