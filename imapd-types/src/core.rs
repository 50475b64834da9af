//! Core data types.
//!
//! The "string types" of the IMAP grammar. All of them validate on
//! construction, so a value that exists is always serializable:
//!
//! ```text
//!        ┌───────┐ ┌─────────────────┐
//!        │AString│ │     NString     │
//!        └──┬─┬──┘ │(Option<IString>)│
//!           │ │    └─────┬───────────┘
//!           │ └──────┐   │
//! ┌────┐ ┌──▼────┐ ┌─▼───▼─┐
//! │Atom│ │AtomExt│ │IString│
//! └────┘ └───────┘ └┬─────┬┘
//!                   │     │
//!             ┌─────▼─┐ ┌─▼────┐
//!             │Literal│ │Quoted│
//!             └───────┘ └──────┘
//! ```
//!
//! Unlike a client codec, a server keeps parsed values across await points
//! and continuation reads, so everything here owns its storage.

use std::{fmt, str::from_utf8};

use thiserror::Error;

use crate::utils::indicators::{
    is_astring_char, is_atom_char, is_char8, is_tag_char, is_text_char,
};

macro_rules! impl_unvalidated {
    ($target:ty) => {
        #[cfg(feature = "unvalidated")]
        impl $target {
            /// Constructs the value without validation.
            ///
            /// The caller must have established the grammar invariant, e.g.,
            /// through a parser that only accepts allowed bytes.
            pub fn unvalidated<I: Into<String>>(inner: I) -> Self {
                let inner = inner.into();

                #[cfg(debug_assertions)]
                Self::verify(&inner).unwrap();

                Self(inner)
            }
        }
    };
}

/// An atom.
///
/// `atom = 1*ATOM-CHAR`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom(pub(crate) String);

impl Atom {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), AtomError> {
        let value = value.as_ref();

        if value.is_empty() {
            return Err(AtomError::Empty);
        }

        if let Some(position) = value.iter().position(|b| !is_atom_char(*b)) {
            return Err(AtomError::ByteNotAllowed {
                found: value[position],
                position,
            });
        }

        Ok(())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl_unvalidated!(Atom);

impl TryFrom<&str> for Atom {
    type Error = AtomError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Atom {
    type Error = AtomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl TryFrom<&[u8]> for Atom {
    type Error = AtomError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        // Verified atom chars are ASCII.
        Ok(Self(from_utf8(value).unwrap().to_owned()))
    }
}

impl AsRef<str> for Atom {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum AtomError {
    #[error("Must not be empty")]
    Empty,
    #[error("Invalid byte b'\\x{found:02x}' at index {position}")]
    ByteNotAllowed { found: u8, position: usize },
}

/// An extended atom, i.e., an atom that also allows `]`.
///
/// `ASTRING-CHAR = ATOM-CHAR / resp-specials`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomExt(pub(crate) String);

impl AtomExt {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), AtomError> {
        let value = value.as_ref();

        if value.is_empty() {
            return Err(AtomError::Empty);
        }

        if let Some(position) = value.iter().position(|b| !is_astring_char(*b)) {
            return Err(AtomError::ByteNotAllowed {
                found: value[position],
                position,
            });
        }

        Ok(())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl_unvalidated!(AtomExt);

impl TryFrom<&str> for AtomExt {
    type Error = AtomError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for AtomExt {
    type Error = AtomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl From<Atom> for AtomExt {
    fn from(value: Atom) -> Self {
        Self(value.0)
    }
}

impl AsRef<str> for AtomExt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Literal transmission mode, i.e., sync or non-sync (RFC 7888).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LiteralMode {
    /// `{n}`: the client waits for a continuation request before sending data.
    #[default]
    Sync,
    /// `{n+}`: the data follows immediately.
    NonSync,
}

/// A literal, i.e., a length-prefixed chunk of arbitrary octets.
///
/// `literal = "{" number ["+"] "}" CRLF *CHAR8`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal {
    pub(crate) data: Vec<u8>,
    pub(crate) mode: LiteralMode,
}

impl Literal {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), LiteralError> {
        let value = value.as_ref();

        if let Some(position) = value.iter().position(|b| !is_char8(*b)) {
            return Err(LiteralError::ByteNotAllowed {
                found: value[position],
                position,
            });
        }

        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mode(&self) -> LiteralMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LiteralMode) {
        self.mode = mode;
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[cfg(feature = "unvalidated")]
    pub fn unvalidated<D: Into<Vec<u8>>>(data: D) -> Self {
        let data = data.into();

        #[cfg(debug_assertions)]
        Self::verify(&data).unwrap();

        Self {
            data,
            mode: LiteralMode::Sync,
        }
    }
}

impl TryFrom<&[u8]> for Literal {
    type Error = LiteralError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self {
            data: value.to_owned(),
            mode: LiteralMode::Sync,
        })
    }
}

impl TryFrom<Vec<u8>> for Literal {
    type Error = LiteralError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self {
            data: value,
            mode: LiteralMode::Sync,
        })
    }
}

impl TryFrom<&str> for Literal {
    type Error = LiteralError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.as_bytes())
    }
}

impl AsRef<[u8]> for Literal {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum LiteralError {
    #[error("Invalid byte b'\\x{found:02x}' at index {position}")]
    ByteNotAllowed { found: u8, position: usize },
}

/// A quoted string.
///
/// `quoted = DQUOTE *QUOTED-CHAR DQUOTE`
///
/// The inner value is unescaped; escaping happens during serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Quoted(pub(crate) String);

impl Quoted {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), QuotedError> {
        let value = value.as_ref();

        if let Some(position) = value.iter().position(|b| !is_text_char(*b)) {
            return Err(QuotedError::ByteNotAllowed {
                found: value[position],
                position,
            });
        }

        Ok(())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl_unvalidated!(Quoted);

impl TryFrom<&str> for Quoted {
    type Error = QuotedError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Quoted {
    type Error = QuotedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl AsRef<str> for Quoted {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum QuotedError {
    #[error("Invalid byte b'\\x{found:02x}' at index {position}")]
    ByteNotAllowed { found: u8, position: usize },
}

/// Either a literal or a quoted string.
///
/// `string = quoted / literal`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IString {
    Literal(Literal),
    Quoted(Quoted),
}

impl IString {
    /// The contained octets, regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Literal(literal) => literal.as_ref(),
            Self::Quoted(quoted) => quoted.as_ref().as_bytes(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Literal(literal) => literal.into_data(),
            Self::Quoted(quoted) => quoted.into_inner().into_bytes(),
        }
    }
}

impl TryFrom<&str> for IString {
    type Error = LiteralError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if let Ok(quoted) = Quoted::try_from(value) {
            return Ok(Self::Quoted(quoted));
        }

        Ok(Self::Literal(Literal::try_from(value)?))
    }
}

impl TryFrom<String> for IString {
    type Error = LiteralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Quoted::verify(&value).is_ok() {
            return Ok(Self::Quoted(Quoted(value)));
        }

        Ok(Self::Literal(Literal::try_from(value.into_bytes())?))
    }
}

impl TryFrom<&[u8]> for IString {
    type Error = LiteralError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if let Ok(value) = from_utf8(value) {
            if Quoted::verify(value).is_ok() {
                return Ok(Self::Quoted(Quoted(value.to_owned())));
            }
        }

        Ok(Self::Literal(Literal::try_from(value)?))
    }
}

impl From<Literal> for IString {
    fn from(value: Literal) -> Self {
        Self::Literal(value)
    }
}

impl From<Quoted> for IString {
    fn from(value: Quoted) -> Self {
        Self::Quoted(value)
    }
}

/// Either `NIL` or a string.
///
/// `nstring = string / nil`
///
/// Note: `NIL` is distinct from the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NString(pub Option<IString>);

impl NString {
    pub const NIL: Self = Self(None);

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_ref().map(IString::as_bytes)
    }
}

impl From<IString> for NString {
    fn from(value: IString) -> Self {
        Self(Some(value))
    }
}

impl TryFrom<&str> for NString {
    type Error = LiteralError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Self(Some(IString::try_from(value)?)))
    }
}

/// Either an (extended) atom or a string.
///
/// `astring = 1*ASTRING-CHAR / string`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AString {
    Atom(AtomExt),
    String(IString),
}

impl AString {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Atom(atom) => atom.as_ref().as_bytes(),
            Self::String(string) => string.as_bytes(),
        }
    }
}

impl TryFrom<&str> for AString {
    type Error = LiteralError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if let Ok(atom) = AtomExt::try_from(value) {
            return Ok(Self::Atom(atom));
        }

        Ok(Self::String(IString::try_from(value)?))
    }
}

impl TryFrom<String> for AString {
    type Error = LiteralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if AtomExt::verify(&value).is_ok() {
            return Ok(Self::Atom(AtomExt(value)));
        }

        Ok(Self::String(IString::try_from(value)?))
    }
}

impl From<AtomExt> for AString {
    fn from(value: AtomExt) -> Self {
        Self::Atom(value)
    }
}

impl From<IString> for AString {
    fn from(value: IString) -> Self {
        Self::String(value)
    }
}

/// A command tag, chosen by the client and unique among commands in flight.
///
/// `tag = 1*<any ASTRING-CHAR except "+">`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(pub(crate) String);

impl Tag {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), AtomError> {
        let value = value.as_ref();

        if value.is_empty() {
            return Err(AtomError::Empty);
        }

        if let Some(position) = value.iter().position(|b| !is_tag_char(*b)) {
            return Err(AtomError::ByteNotAllowed {
                found: value[position],
                position,
            });
        }

        Ok(())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl_unvalidated!(Tag);

impl TryFrom<&str> for Tag {
    type Error = AtomError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Tag {
    type Error = AtomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable text in status responses.
///
/// `text = 1*TEXT-CHAR`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Text(pub(crate) String);

impl Text {
    pub fn verify(value: impl AsRef<[u8]>) -> Result<(), TextError> {
        let value = value.as_ref();

        if value.is_empty() {
            return Err(TextError::Empty);
        }

        if let Some(position) = value.iter().position(|b| !is_text_char(*b)) {
            return Err(TextError::ByteNotAllowed {
                found: value[position],
                position,
            });
        }

        Ok(())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl_unvalidated!(Text);

impl TryFrom<&str> for Text {
    type Error = TextError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Text {
    type Error = TextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl AsRef<str> for Text {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum TextError {
    #[error("Must not be empty")]
    Empty,
    #[error("Invalid byte b'\\x{found:02x}' at index {position}")]
    ByteNotAllowed { found: u8, position: usize },
}

/// A charset name in `SEARCH`.
///
/// `charset = atom / quoted`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Charset {
    Atom(Atom),
    Quoted(Quoted),
}

impl Charset {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Atom(atom) => atom.as_ref(),
            Self::Quoted(quoted) => quoted.as_ref(),
        }
    }
}

impl TryFrom<&str> for Charset {
    type Error = QuotedError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if let Ok(atom) = Atom::try_from(value) {
            return Ok(Self::Atom(atom));
        }

        Ok(Self::Quoted(Quoted::try_from(value)?))
    }
}

/// A single quoted character, e.g., the hierarchy delimiter in `LIST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotedChar(char);

impl QuotedChar {
    pub fn verify(value: char) -> Result<(), QuotedError> {
        if value.is_ascii() && is_text_char(value as u8) {
            Ok(())
        } else {
            Err(QuotedError::ByteNotAllowed {
                found: value as u8,
                position: 0,
            })
        }
    }

    pub fn inner(&self) -> char {
        self.0
    }

    #[cfg(feature = "unvalidated")]
    pub fn unvalidated(inner: char) -> Self {
        #[cfg(debug_assertions)]
        Self::verify(inner).unwrap();

        Self(inner)
    }
}

impl TryFrom<char> for QuotedChar {
    type Error = QuotedError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        Self::verify(value)?;

        Ok(Self(value))
    }
}

/// A `Vec` that is guaranteed to contain at least one element.
///
/// Some grammar productions, e.g., the capability list or a sequence set,
/// must not be empty; this type makes that unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyVec<T>(pub(crate) Vec<T>);

impl<T> NonEmptyVec<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn push(&mut self, value: T) {
        self.0.push(value);
    }
}

impl<T> From<T> for NonEmptyVec<T> {
    fn from(value: T) -> Self {
        Self(vec![value])
    }
}

impl<T> TryFrom<Vec<T>> for NonEmptyVec<T> {
    type Error = NonEmptyVecError;

    fn try_from(value: Vec<T>) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(NonEmptyVecError::Empty);
        }

        Ok(Self(value))
    }
}

impl<T> IntoIterator for NonEmptyVec<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a NonEmptyVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T> AsRef<[T]> for NonEmptyVec<T> {
    fn as_ref(&self) -> &[T] {
        &self.0
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum NonEmptyVecError {
    #[error("Must not be empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_rejects_specials() {
        assert!(Atom::try_from("ok-atom").is_ok());
        assert_eq!(Atom::try_from(""), Err(AtomError::Empty));

        for bad in ["with space", "par(en", "br{ace", "star*", "percent%", "quo\"te"] {
            assert!(Atom::try_from(bad).is_err(), "{bad:?} must be rejected");
        }

        // `]` is fine for AtomExt, not for Atom.
        assert!(Atom::try_from("x]").is_err());
        assert!(AtomExt::try_from("x]").is_ok());
    }

    #[test]
    fn tag_excludes_plus() {
        assert!(Tag::try_from("A142").is_ok());
        assert!(Tag::try_from("a+b").is_err());
        assert!(Tag::try_from("").is_err());
    }

    #[test]
    fn istring_prefers_quoted() {
        assert!(matches!(
            IString::try_from("hello").unwrap(),
            IString::Quoted(_)
        ));
        // CR/LF force the literal form.
        assert!(matches!(
            IString::try_from("a\r\nb").unwrap(),
            IString::Literal(_)
        ));
    }

    #[test]
    fn literal_rejects_nul() {
        assert!(Literal::try_from(b"a\x00b".as_slice()).is_err());
        assert!(Literal::try_from(b"\r\n".as_slice()).is_ok());
    }

    #[test]
    fn nil_is_not_empty_string() {
        assert_ne!(NString::NIL, NString::try_from("").unwrap());
    }
}
