//! `SEARCH` criteria.

use crate::{
    core::{AString, Atom, NonEmptyVec},
    datetime::NaiveDate,
    sequence::SequenceSet,
};

/// A search key.
///
/// Multiple keys on one command line form an implicit AND; `OR` and `NOT`
/// nest explicitly. Dates compare against the internal date unless the
/// `SENT*` forms are used, which consult the Date: header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchKey {
    /// Implicit AND, also produced by a parenthesized key list.
    And(NonEmptyVec<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    Not(Box<SearchKey>),

    All,
    Answered,
    Bcc(AString),
    Before(NaiveDate),
    Body(AString),
    Cc(AString),
    Deleted,
    Draft,
    Flagged,
    From(AString),
    Header(AString, AString),
    Keyword(Atom),
    Larger(u32),
    New,
    Old,
    On(NaiveDate),
    Recent,
    Seen,
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    SequenceSet(SequenceSet),
    Since(NaiveDate),
    Smaller(u32),
    Subject(AString),
    Text(AString),
    To(AString),
    Uid(SequenceSet),
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unkeyword(Atom),
    Unseen,
}
