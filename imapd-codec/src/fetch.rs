//! Parsers for `FETCH` items and section specifiers.

use abnf_core::streaming::sp;
use imapd_types::{
    core::{AString, NonEmptyVec},
    fetch::{FetchAttribute, Macro, MacroOrFetchAttributes, Part, Section},
};
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case},
    combinator::{map, opt, value},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, preceded, tuple},
};

use crate::{
    core::{astring, number, nz_number},
    decode::ImapResult,
};

/// The item list of a `FETCH`: a macro, a single item, or a parenthesized
/// item list.
pub(crate) fn fetch_attributes(input: &[u8]) -> ImapResult<MacroOrFetchAttributes> {
    alt((
        map(fetch_macro, MacroOrFetchAttributes::Macro),
        map(
            delimited(tag(b"("), separated_list0(sp, fetch_att), tag(b")")),
            MacroOrFetchAttributes::FetchAttributes,
        ),
        map(fetch_att, |attribute| {
            MacroOrFetchAttributes::FetchAttributes(vec![attribute])
        }),
    ))(input)
}

fn fetch_macro(input: &[u8]) -> ImapResult<Macro> {
    alt((
        value(Macro::All, tag_no_case(b"ALL")),
        value(Macro::Full, tag_no_case(b"FULL")),
        value(Macro::Fast, tag_no_case(b"FAST")),
    ))(input)
}

/// `fetch-att = "ENVELOPE" / "FLAGS" / "INTERNALDATE" /
///              "RFC822" [".HEADER" / ".SIZE" / ".TEXT"] /
///              "BODY" ["STRUCTURE"] / "UID" /
///              "BODY" section ["<" number "." nz-number ">"] /
///              "BODY.PEEK" section ["<" number "." nz-number ">"] /
///              "BINARY" [".PEEK"] section-binary [partial] /
///              "BINARY.SIZE" section-binary`
pub(crate) fn fetch_att(input: &[u8]) -> ImapResult<FetchAttribute> {
    alt((
        value(FetchAttribute::Envelope, tag_no_case(b"ENVELOPE")),
        value(FetchAttribute::Flags, tag_no_case(b"FLAGS")),
        value(FetchAttribute::InternalDate, tag_no_case(b"INTERNALDATE")),
        value(FetchAttribute::BodyStructure, tag_no_case(b"BODYSTRUCTURE")),
        value(FetchAttribute::Rfc822Header, tag_no_case(b"RFC822.HEADER")),
        value(FetchAttribute::Rfc822Size, tag_no_case(b"RFC822.SIZE")),
        value(FetchAttribute::Rfc822Text, tag_no_case(b"RFC822.TEXT")),
        value(FetchAttribute::Rfc822, tag_no_case(b"RFC822")),
        value(FetchAttribute::Uid, tag_no_case(b"UID")),
        map(
            tuple((tag_no_case(b"BODY.PEEK"), section, opt(partial))),
            |(_, section, partial)| FetchAttribute::BodyExt {
                section,
                partial,
                peek: true,
            },
        ),
        map(
            tuple((tag_no_case(b"BODY"), section, opt(partial))),
            |(_, section, partial)| FetchAttribute::BodyExt {
                section,
                partial,
                peek: false,
            },
        ),
        map(
            preceded(tag_no_case(b"BINARY.SIZE"), section_binary),
            |part| FetchAttribute::BinarySize { part },
        ),
        map(
            tuple((tag_no_case(b"BINARY.PEEK"), section_binary, opt(partial))),
            |(_, part, partial)| FetchAttribute::Binary {
                part,
                partial,
                peek: true,
            },
        ),
        map(
            tuple((tag_no_case(b"BINARY"), section_binary, opt(partial))),
            |(_, part, partial)| FetchAttribute::Binary {
                part,
                partial,
                peek: false,
            },
        ),
        value(FetchAttribute::Body, tag_no_case(b"BODY")),
    ))(input)
}

/// `partial = "<" number "." nz-number ">"`
fn partial(input: &[u8]) -> ImapResult<(u32, u32)> {
    delimited(
        tag(b"<"),
        map(tuple((number, tag(b"."), nz_number)), |(offset, _, len)| {
            (offset, len)
        }),
        tag(b">"),
    )(input)
}

/// `section = "[" [section-spec] "]"`
fn section(input: &[u8]) -> ImapResult<Option<Section>> {
    delimited(tag(b"["), opt(section_spec), tag(b"]"))(input)
}

/// `section-spec = section-msgtext / (section-part ["." section-text])`
fn section_spec(input: &[u8]) -> ImapResult<Section> {
    alt((
        map(section_msgtext, |msgtext| msgtext(None)),
        map(
            tuple((section_part, opt(preceded(tag(b"."), section_text)))),
            |(part, text)| match text {
                Some(SectionText::MsgText(msgtext)) => msgtext(Some(part)),
                Some(SectionText::Mime) => Section::Mime(part),
                None => Section::Part(part),
            },
        ),
    ))(input)
}

/// What a `section-msgtext` becomes once we know which part (if any) it is
/// scoped to.
type MsgText = Box<dyn FnOnce(Option<Part>) -> Section>;

enum SectionText {
    MsgText(MsgText),
    Mime,
}

/// `section-msgtext = "HEADER.FIELDS" [".NOT"] SP header-list / "HEADER" / "TEXT"`
fn section_msgtext(input: &[u8]) -> ImapResult<MsgText> {
    alt((
        map(
            preceded(tuple((tag_no_case(b"HEADER.FIELDS.NOT"), sp)), header_list),
            |fields| -> MsgText { Box::new(move |part| Section::HeaderFieldsNot(part, fields)) },
        ),
        map(
            preceded(tuple((tag_no_case(b"HEADER.FIELDS"), sp)), header_list),
            |fields| -> MsgText { Box::new(move |part| Section::HeaderFields(part, fields)) },
        ),
        map(tag_no_case(b"HEADER"), |_| -> MsgText {
            Box::new(Section::Header)
        }),
        map(tag_no_case(b"TEXT"), |_| -> MsgText {
            Box::new(Section::Text)
        }),
    ))(input)
}

/// `section-part = nz-number *("." nz-number)`
fn section_part(input: &[u8]) -> ImapResult<Part> {
    map(separated_list1(tag(b"."), nz_number), |numbers| {
        // `separated_list1` guarantees at least one element.
        Part(NonEmptyVec::try_from(numbers).unwrap())
    })(input)
}

/// `section-text = section-msgtext / "MIME"`
fn section_text(input: &[u8]) -> ImapResult<SectionText> {
    alt((
        map(tag_no_case(b"MIME"), |_| SectionText::Mime),
        map(section_msgtext, SectionText::MsgText),
    ))(input)
}

/// `header-list = "(" header-fld-name *(SP header-fld-name) ")"`
fn header_list(input: &[u8]) -> ImapResult<NonEmptyVec<AString>> {
    map(
        delimited(tag(b"("), separated_list1(sp, header_fld_name), tag(b")")),
        |names| NonEmptyVec::try_from(names).unwrap(),
    )(input)
}

/// `header-fld-name = astring`
pub(crate) fn header_fld_name(input: &[u8]) -> ImapResult<AString> {
    astring(input)
}

/// `section-binary = "[" [section-part] "]"` (RFC 3516)
fn section_binary(input: &[u8]) -> ImapResult<Vec<u32>> {
    delimited(
        tag(b"["),
        map(opt(section_part), |part| {
            part.map(|part| part.0.into_inner()).unwrap_or_default()
        }),
        tag(b"]"),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_att_simple() {
        let (_, att) = fetch_att(b"envelope ").unwrap();
        assert_eq!(att, FetchAttribute::Envelope);

        let (_, att) = fetch_att(b"RFC822.SIZE ").unwrap();
        assert_eq!(att, FetchAttribute::Rfc822Size);

        // Bare BODY is the structure request, not a section fetch.
        let (_, att) = fetch_att(b"BODY ").unwrap();
        assert_eq!(att, FetchAttribute::Body);
    }

    #[test]
    fn test_fetch_att_sections() {
        let (_, att) = fetch_att(b"BODY[] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: None,
                partial: None,
                peek: false
            }
        );

        let (_, att) = fetch_att(b"BODY.PEEK[HEADER]<0.100> ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::BodyExt {
                section: Some(Section::Header(None)),
                partial: Some((0, 100)),
                peek: true
            }
        );

        let (_, att) = fetch_att(b"BODY[4.1.TEXT] ").unwrap();
        match att {
            FetchAttribute::BodyExt {
                section: Some(Section::Text(Some(part))),
                ..
            } => assert_eq!(part.0.as_slice(), &[4, 1]),
            other => panic!("unexpected: {other:?}"),
        }

        let (_, att) = fetch_att(b"BODY[HEADER.FIELDS (From To)] ").unwrap();
        match att {
            FetchAttribute::BodyExt {
                section: Some(Section::HeaderFields(None, fields)),
                ..
            } => assert_eq!(fields.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_fetch_att_binary() {
        let (_, att) = fetch_att(b"BINARY[1.2] ").unwrap();
        assert_eq!(
            att,
            FetchAttribute::Binary {
                part: vec![1, 2],
                partial: None,
                peek: false
            }
        );

        let (_, att) = fetch_att(b"BINARY.SIZE[2] ").unwrap();
        assert_eq!(att, FetchAttribute::BinarySize { part: vec![2] });
    }

    #[test]
    fn test_fetch_attributes() {
        let (_, attributes) = fetch_attributes(b"FULL ").unwrap();
        assert_eq!(attributes, MacroOrFetchAttributes::Macro(Macro::Full));

        let (_, attributes) = fetch_attributes(b"(UID FLAGS) ").unwrap();
        assert_eq!(
            attributes,
            MacroOrFetchAttributes::FetchAttributes(vec![
                FetchAttribute::Uid,
                FetchAttribute::Flags
            ])
        );
    }
}
