//! The `BODY`/`BODYSTRUCTURE` tree.

use crate::{
    core::{IString, NString, NonEmptyVec},
    envelope::Envelope,
};

/// Fields shared by all single-part bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasicFields {
    /// List of attribute/value pairs, e.g., `("CHARSET" "UTF-8")`.
    pub parameter_list: Vec<(IString, IString)>,
    /// Content-ID.
    pub id: NString,
    /// Content-Description.
    pub description: NString,
    /// Content-Transfer-Encoding.
    pub content_transfer_encoding: IString,
    /// Size in octets.
    pub size: u32,
}

/// The media-type-specific tail of a single-part body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpecificFields {
    /// Neither `TEXT/*` nor `MESSAGE/RFC822`.
    Basic {
        r#type: IString,
        subtype: IString,
    },
    /// `MESSAGE/RFC822`: carries the embedded message's envelope and
    /// structure.
    Message {
        envelope: Box<Envelope>,
        body_structure: Box<BodyStructure>,
        number_of_lines: u32,
    },
    /// `TEXT/*`.
    Text {
        subtype: IString,
        number_of_lines: u32,
    },
}

/// A single-part body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Body {
    pub basic: BasicFields,
    pub specific: SpecificFields,
}

/// The whole (possibly nested) structure.
///
/// Extension data (body MD5, disposition, language, location) is not
/// carried; `BODYSTRUCTURE` serializes the non-extensible form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BodyStructure {
    Single(Body),
    Multi {
        bodies: NonEmptyVec<BodyStructure>,
        subtype: IString,
    },
}
