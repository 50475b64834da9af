//! Fetch attributes: what `FETCH` can ask for and what it returns.

use crate::{
    body::BodyStructure,
    core::{AString, NString, NonEmptyVec},
    datetime::DateTime,
    envelope::Envelope,
    flag::FlagFetch,
};

/// A part specifier, e.g., the `4.1.2` in `BODY[4.1.2]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Part(pub NonEmptyVec<u32>);

/// A section specifier inside `BODY[...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Section {
    Part(Part),
    /// `[HEADER]` or `[p.HEADER]`
    Header(Option<Part>),
    /// `[HEADER.FIELDS (...)]`
    HeaderFields(Option<Part>, NonEmptyVec<AString>),
    /// `[HEADER.FIELDS.NOT (...)]`
    HeaderFieldsNot(Option<Part>, NonEmptyVec<AString>),
    /// `[TEXT]` or `[p.TEXT]`
    Text(Option<Part>),
    /// `[p.MIME]`
    Mime(Part),
}

/// A single requested item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchAttribute {
    /// `BODY` (the non-extensible body structure)
    Body,
    /// `BODY[section]<partial>` or `BODY.PEEK[section]<partial>`
    BodyExt {
        section: Option<Section>,
        /// `<offset.length>`
        partial: Option<(u32, u32)>,
        peek: bool,
    },
    /// `BODYSTRUCTURE`
    BodyStructure,
    /// `BINARY[part]<partial>` or `BINARY.PEEK[part]<partial>` (RFC 3516)
    Binary {
        part: Vec<u32>,
        partial: Option<(u32, u32)>,
        peek: bool,
    },
    /// `BINARY.SIZE[part]` (RFC 3516)
    BinarySize { part: Vec<u32> },
    Envelope,
    Flags,
    InternalDate,
    Rfc822,
    Rfc822Header,
    Rfc822Size,
    Rfc822Text,
    Uid,
}

/// `ALL`/`FAST`/`FULL` shorthand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Macro {
    All,
    Fast,
    Full,
}

impl Macro {
    pub fn expand(&self) -> Vec<FetchAttribute> {
        use FetchAttribute::*;

        match self {
            Self::Fast => vec![Flags, InternalDate, Rfc822Size],
            Self::All => vec![Flags, InternalDate, Rfc822Size, Envelope],
            Self::Full => vec![Flags, InternalDate, Rfc822Size, Envelope, Body],
        }
    }
}

/// The parsed item list of a `FETCH` command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MacroOrFetchAttributes {
    Macro(Macro),
    FetchAttributes(Vec<FetchAttribute>),
}

impl MacroOrFetchAttributes {
    pub fn expand(&self) -> Vec<FetchAttribute> {
        match self {
            Self::Macro(m) => m.expand(),
            Self::FetchAttributes(attributes) => attributes.clone(),
        }
    }
}

/// A returned item in an untagged `FETCH` response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchAttributeValue {
    Body(BodyStructure),
    BodyExt {
        section: Option<Section>,
        origin: Option<u32>,
        data: NString,
    },
    BodyStructure(BodyStructure),
    /// Decoded part content; emitted as a literal8 (RFC 3516).
    Binary {
        part: Vec<u32>,
        origin: Option<u32>,
        data: Option<Vec<u8>>,
    },
    BinarySize {
        part: Vec<u32>,
        size: u32,
    },
    Envelope(Envelope),
    Flags(Vec<FlagFetch>),
    InternalDate(DateTime),
    Rfc822(NString),
    Rfc822Header(NString),
    Rfc822Size(u32),
    Rfc822Text(NString),
    Uid(u32),
}

impl FetchAttributeValue {
    /// A stable identity used for merging FETCH responses: two values with
    /// the same key describe the same attribute and the later one wins.
    pub fn merge_key(&self) -> FetchAttributeKey {
        match self {
            Self::Body(_) => FetchAttributeKey::Body,
            Self::BodyExt {
                section, origin, ..
            } => FetchAttributeKey::BodyExt {
                section: format!("{section:?}"),
                origin: *origin,
            },
            Self::BodyStructure(_) => FetchAttributeKey::BodyStructure,
            Self::Binary { part, origin, .. } => FetchAttributeKey::Binary {
                part: part.clone(),
                origin: *origin,
            },
            Self::BinarySize { part, .. } => FetchAttributeKey::BinarySize { part: part.clone() },
            Self::Envelope(_) => FetchAttributeKey::Envelope,
            Self::Flags(_) => FetchAttributeKey::Flags,
            Self::InternalDate(_) => FetchAttributeKey::InternalDate,
            Self::Rfc822(_) => FetchAttributeKey::Rfc822,
            Self::Rfc822Header(_) => FetchAttributeKey::Rfc822Header,
            Self::Rfc822Size(_) => FetchAttributeKey::Rfc822Size,
            Self::Rfc822Text(_) => FetchAttributeKey::Rfc822Text,
            Self::Uid(_) => FetchAttributeKey::Uid,
        }
    }
}

/// See [`FetchAttributeValue::merge_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchAttributeKey {
    Body,
    BodyExt {
        section: String,
        origin: Option<u32>,
    },
    BodyStructure,
    Binary {
        part: Vec<u32>,
        origin: Option<u32>,
    },
    BinarySize {
        part: Vec<u32>,
    },
    Envelope,
    Flags,
    InternalDate,
    Rfc822,
    Rfc822Header,
    Rfc822Size,
    Rfc822Text,
    Uid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_expand_in_rfc_order() {
        assert_eq!(
            Macro::Fast.expand(),
            vec![
                FetchAttribute::Flags,
                FetchAttribute::InternalDate,
                FetchAttribute::Rfc822Size
            ]
        );
        assert_eq!(Macro::Full.expand().len(), 5);
    }
}
