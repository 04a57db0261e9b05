//! Distinguished Name Parser
//!
//! Recursive-descent parser for the RFC 1779 textual form of X.500 names:
//!
//! ```text
//! name           ::= name-component (spaced-separator name)?
//! name-component ::= attribute (optional-space "+" optional-space name-component)?
//! attribute      ::= string | key optional-space "=" optional-space string
//! key            ::= 1*keychar | ("OID." | "oid.") oid
//! oid            ::= digitstring ("." digitstring)*
//! string         ::= *(stringchar | pair)
//!                  | '"' *(stringchar | special | pair) '"'
//!                  | "#" 1*hexdigit
//! special        ::= "," | "=" | <newline> | "+" | "<" | ">" | "#" | ";"
//! pair           ::= "\" (special | "\" | '"')
//! separator      ::= "," | ";"
//! ```
//!
//! Values are kept exactly as written: quoted values keep their quotes, escaped
//! pairs keep their backslash and hex values keep the leading `#`. Unquoted
//! values lose their trailing spaces.
//!
//! # Example
//! ```
//! use pki_ca_core::distinguished_name::parse_distinguished_name;
//!
//! let dn = parse_distinguished_name("CN=GOPKI , O=Cryptable + OU=PKI , C=BE").unwrap();
//! assert_eq!(dn.len(), 3);
//! assert_eq!(dn.rdns()[1].attributes()[1].value, "PKI");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

const SPECIALS: &[u8] = b",=\n+<>#;";

/// One `key=value` pair of a distinguished name
///
/// `key` is empty when the value was supplied on its own (`"Test"` instead of
/// `"CN=Test"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// An attribute without a key
    pub fn bare(value: impl Into<String>) -> Self {
        Self::new(String::new(), value)
    }

    pub fn is_bare(&self) -> bool {
        self.key.is_empty()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bare() {
            f.write_str(&self.value)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

/// One RDN group: the attributes joined by `+` in the source text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    attributes: Vec<Attribute>,
}

impl RelativeDistinguishedName {
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl From<Vec<Attribute>> for RelativeDistinguishedName {
    fn from(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }
}

impl<'a> IntoIterator for &'a RelativeDistinguishedName {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

impl fmt::Display for RelativeDistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attribute) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{}", attribute)?;
        }
        Ok(())
    }
}

/// A parsed distinguished name: RDN groups in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    rdns: Vec<RelativeDistinguishedName>,
}

impl DistinguishedName {
    pub fn rdns(&self) -> &[RelativeDistinguishedName] {
        &self.rdns
    }

    /// All attributes of all groups, left to right
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.rdns.iter().flat_map(|rdn| rdn.iter())
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }
}

impl From<Vec<RelativeDistinguishedName>> for DistinguishedName {
    fn from(rdns: Vec<RelativeDistinguishedName>) -> Self {
        Self { rdns }
    }
}

impl FromStr for DistinguishedName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_distinguished_name(s)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

/// Parse a complete distinguished name
///
/// A separator at the very end of the input is ignored, so `"CN=a, "` is the
/// same name as `"CN=a"`.
pub fn parse_distinguished_name(data: &str) -> Result<DistinguishedName, ParseError> {
    Scanner::new(data).name()
}

/// Scan one `string` production, returning the value and the bytes consumed
///
/// Trailing spaces of an unquoted value are neither part of the value nor of
/// the width.
pub fn scan_string(data: &str) -> Result<(&str, usize), ParseError> {
    let mut scanner = Scanner::new(data);
    let value = scanner.string()?;
    Ok((value, scanner.pos))
}

/// Scan a dotted object identifier such as `1.2.840.113549`
pub fn scan_oid(data: &str) -> Result<(&str, usize), ParseError> {
    let mut scanner = Scanner::new(data);
    let oid = scanner.oid()?;
    Ok((oid, scanner.pos))
}

/// Scan an attribute key, including the `OID.<oid>` form
pub fn scan_key(data: &str) -> Result<(&str, usize), ParseError> {
    let mut scanner = Scanner::new(data);
    let key = scanner.key()?;
    Ok((key, scanner.pos))
}

pub fn scan_attribute(data: &str) -> Result<(Attribute, usize), ParseError> {
    let mut scanner = Scanner::new(data);
    let attribute = scanner.attribute()?;
    Ok((attribute, scanner.pos))
}

pub fn scan_name_component(data: &str) -> Result<(RelativeDistinguishedName, usize), ParseError> {
    let mut scanner = Scanner::new(data);
    let rdn = scanner.name_component()?;
    Ok((rdn, scanner.pos))
}

/// Width of `optional-space separator optional-space` at the start of `data`
pub fn spaced_separator(data: &str) -> Result<usize, ParseError> {
    let mut scanner = Scanner::new(data);
    scanner.spaced_separator()?;
    Ok(scanner.pos)
}

/// Number of leading spaces
pub fn optional_spaces(data: &str) -> usize {
    Scanner::new(data).optional_spaces()
}

fn is_special(c: u8) -> bool {
    SPECIALS.contains(&c)
}

fn is_string_char(c: u8) -> bool {
    !(c == b'\\' || c == b'"' || is_special(c))
}

fn is_key_char(c: u8) -> bool {
    c.is_ascii_alphanumeric()
}

fn is_separator(c: u8) -> bool {
    c == b',' || c == b';'
}

fn is_pair(data: &[u8]) -> bool {
    matches!(data, [b'\\', next, ..] if is_special(*next) || *next == b'\\' || *next == b'"')
}

// Every delimiter in the grammar is ASCII, so `pos` only ever stops on a char
// boundary and slicing `input` is safe.
struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.input.as_bytes()[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn advance_while(&mut self, pred: impl Fn(u8) -> bool) -> usize {
        let count = self.rest().iter().take_while(|&&c| pred(c)).count();
        self.pos += count;
        count
    }

    fn optional_spaces(&mut self) -> usize {
        self.advance_while(|c| c == b' ')
    }

    fn digit_string(&mut self) -> &'a str {
        let start = self.pos;
        self.advance_while(|c| c.is_ascii_digit());
        &self.input[start..self.pos]
    }

    fn string(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        match self.peek() {
            Some(b'"') => {
                self.pos += 1;
                loop {
                    match self.peek() {
                        Some(b'"') => {
                            self.pos += 1;
                            return Ok(&self.input[start..self.pos]);
                        }
                        Some(b'\\') if is_pair(self.rest()) => self.pos += 2,
                        Some(b'\\') | None => {
                            return Err(ParseError::UnterminatedQuotedValue { offset: start })
                        }
                        Some(_) => self.pos += 1,
                    }
                }
            }
            Some(b'#') => {
                self.pos += 1;
                if self.advance_while(|c| c.is_ascii_hexdigit()) == 0 {
                    return Err(ParseError::MissingHexValue { offset: start });
                }
                Ok(&self.input[start..self.pos])
            }
            _ => {
                loop {
                    let rest = self.rest();
                    if is_pair(rest) {
                        self.pos += 2;
                    } else if rest.first().is_some_and(|&c| is_string_char(c)) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let value = self.input[start..self.pos].trim_end_matches(' ');
                self.pos = start + value.len();
                Ok(value)
            }
        }
    }

    fn oid(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        if self.digit_string().is_empty() {
            return Err(ParseError::EmptyOid { offset: start });
        }
        while self.peek() == Some(b'.') {
            let dot = self.pos;
            self.pos += 1;
            if self.digit_string().is_empty() {
                return Err(ParseError::MissingOidArc { offset: dot });
            }
        }
        Ok(&self.input[start..self.pos])
    }

    fn key(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        if self.advance_while(is_key_char) == 0 {
            return Err(ParseError::InvalidKey { offset: start });
        }
        let key = &self.input[start..self.pos];
        if (key == "OID" || key == "oid") && self.peek() == Some(b'.') {
            self.pos += 1;
            self.oid()
                .map_err(|_| ParseError::InvalidOidKey { offset: start })?;
        }
        Ok(&self.input[start..self.pos])
    }

    fn attribute(&mut self) -> Result<Attribute, ParseError> {
        let key = self.key()?;
        self.optional_spaces();
        if self.at_end() {
            return Ok(Attribute::bare(key));
        }
        if self.peek() != Some(b'=') {
            return Err(ParseError::MissingEqualsSign { offset: self.pos });
        }
        self.pos += 1;
        self.optional_spaces();
        let value = self.string()?;
        Ok(Attribute::new(key, value))
    }

    fn name_component(&mut self) -> Result<RelativeDistinguishedName, ParseError> {
        let mut attributes = vec![self.attribute()?];
        loop {
            self.optional_spaces();
            if self.peek() != Some(b'+') {
                break;
            }
            self.pos += 1;
            self.optional_spaces();
            if self.at_end() {
                return Err(ParseError::MissingAttribute { offset: self.pos });
            }
            attributes.push(self.attribute()?);
        }
        Ok(RelativeDistinguishedName { attributes })
    }

    fn spaced_separator(&mut self) -> Result<(), ParseError> {
        self.optional_spaces();
        match self.peek() {
            Some(c) if is_separator(c) => self.pos += 1,
            _ => return Err(ParseError::MissingSeparator { offset: self.pos }),
        }
        self.optional_spaces();
        Ok(())
    }

    fn name(&mut self) -> Result<DistinguishedName, ParseError> {
        let mut rdns = vec![self.name_component()?];
        while !self.at_end() {
            self.spaced_separator()?;
            if self.at_end() {
                break;
            }
            rdns.push(self.name_component()?);
        }
        Ok(DistinguishedName { rdns })
    }
}
