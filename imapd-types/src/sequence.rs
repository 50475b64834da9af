//! Sequence sets, i.e., the `3:5,7,9:*` message addressing syntax.

use std::{fmt, num::NonZeroU32, str::FromStr};

use thiserror::Error;

use crate::core::NonEmptyVec;

/// A single element of a sequence: a number or `*`.
///
/// `*` denotes the largest sequence number (or UID) in the mailbox; which of
/// the two depends on the command that carries the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqOrUid {
    Value(NonZeroU32),
    Asterisk,
}

impl SeqOrUid {
    /// Resolves `*` against the largest value currently in the mailbox.
    pub fn expand(&self, largest: u32) -> u32 {
        match self {
            Self::Value(value) => value.get(),
            Self::Asterisk => largest,
        }
    }
}

impl From<NonZeroU32> for SeqOrUid {
    fn from(value: NonZeroU32) -> Self {
        Self::Value(value)
    }
}

impl FromStr for SeqOrUid {
    type Err = SequenceSetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "*" {
            return Ok(Self::Asterisk);
        }

        // Leading zeros are not part of the grammar.
        if value.starts_with('0') {
            return Err(SequenceSetError::Invalid);
        }

        value
            .parse::<NonZeroU32>()
            .map(Self::Value)
            .map_err(|_| SequenceSetError::Invalid)
    }
}

impl fmt::Display for SeqOrUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Asterisk => f.write_str("*"),
        }
    }
}

/// `seq-range / seq-number`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    Single(SeqOrUid),
    Range(SeqOrUid, SeqOrUid),
}

impl FromStr for Sequence {
    type Err = SequenceSetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(':') {
            None => Ok(Self::Single(value.parse()?)),
            Some((start, end)) => Ok(Self::Range(start.parse()?, end.parse()?)),
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Single(value) => value.fmt(f),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
        }
    }
}

/// A non-empty, comma-separated set of sequences.
///
/// The set is kept in the order and spelling the client used; expansion
/// happens against a concrete mailbox size via [`SequenceSet::iter`] or
/// [`SequenceSet::contains`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceSet(pub NonEmptyVec<Sequence>);

impl SequenceSet {
    /// Whether `value` is addressed by this set, given the largest value in
    /// the mailbox.
    ///
    /// Ranges match in either spelling (`2:4` and `4:2` are the same set),
    /// and `*` resolves to `largest`. In an empty mailbox (`largest == 0`)
    /// nothing matches.
    pub fn contains(&self, value: u32, largest: u32) -> bool {
        if largest == 0 {
            return false;
        }

        self.0.iter().any(|sequence| match sequence {
            Sequence::Single(single) => single.expand(largest) == value,
            Sequence::Range(from, to) => {
                let (from, to) = (from.expand(largest), to.expand(largest));
                let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
                (lo..=hi).contains(&value)
            }
        })
    }

    /// All addressed values in ascending order, capped at `largest`,
    /// without duplicates.
    pub fn iter(&self, largest: u32) -> impl Iterator<Item = u32> + '_ {
        let mut values: Vec<u32> = Vec::new();

        if largest > 0 {
            for sequence in self.0.iter() {
                match sequence {
                    Sequence::Single(single) => {
                        let value = single.expand(largest);
                        if value <= largest {
                            values.push(value);
                        }
                    }
                    Sequence::Range(from, to) => {
                        let (from, to) = (from.expand(largest), to.expand(largest));
                        let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
                        values.extend(lo..=hi.min(largest));
                    }
                }
            }
        }

        values.sort_unstable();
        values.dedup();
        values.into_iter()
    }
}

impl From<Sequence> for SequenceSet {
    fn from(value: Sequence) -> Self {
        Self(NonEmptyVec::from(value))
    }
}

impl TryFrom<Vec<Sequence>> for SequenceSet {
    type Error = SequenceSetError;

    fn try_from(value: Vec<Sequence>) -> Result<Self, Self::Error> {
        Ok(Self(
            NonEmptyVec::try_from(value).map_err(|_| SequenceSetError::Empty)?,
        ))
    }
}

impl FromStr for SequenceSet {
    type Err = SequenceSetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let sequences = value
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<Sequence>, _>>()?;

        Self::try_from(sequences)
    }
}

impl TryFrom<&str> for SequenceSet {
    type Error = SequenceSetError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, sequence) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            sequence.fmt(f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum SequenceSetError {
    #[error("Sequence sets must not be empty")]
    Empty,
    #[error("Invalid sequence set")]
    Invalid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        for raw in ["1", "1:*", "1,2,3", "5:7,10,12:*", "*"] {
            let set: SequenceSet = raw.parse().unwrap();
            assert_eq!(set.to_string(), raw);
        }

        for bad in ["", "0", "01", "1:", ":2", "1,,2", "a", "1:2:3"] {
            assert!(bad.parse::<SequenceSet>().is_err(), "{bad:?} must fail");
        }
    }

    #[test]
    fn expansion_caps_at_largest() {
        let set: SequenceSet = "2:4,9,12:*".parse().unwrap();

        assert_eq!(set.iter(10).collect::<Vec<_>>(), vec![2, 3, 4, 9]);
        assert_eq!(set.iter(3).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(set.iter(0).count(), 0);
    }

    #[test]
    fn asterisk_matches_largest_even_when_range_is_backwards() {
        // RFC 3501: "a non-empty mailbox always has a message sequence
        // number range of 1:*"; 20:* with 15 messages equals 15:20 capped.
        let set: SequenceSet = "20:*".parse().unwrap();

        assert!(set.contains(15, 15));
        assert!(set.contains(18, 15));
        assert_eq!(set.iter(15).collect::<Vec<_>>(), vec![15]);
    }

    #[test]
    fn duplicates_collapse() {
        let set: SequenceSet = "1,1,1:2".parse().unwrap();
        assert_eq!(set.iter(5).collect::<Vec<_>>(), vec![1, 2]);
    }
}
