//! Text attribute groups forming the diagnostic/control surface.
//!
//! Every device exposes its knobs as named attributes grouped under a group
//! name, in the style of sysfs: values are read as text and written as text.
//! Hosts decide how the groups are reached (the Linux daemon serves them over
//! a unix socket).

use crate::error::{Error, Result};

/// Access mode of a single attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrMode {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl AttrMode {
    pub fn readable(self) -> bool {
        !matches!(self, AttrMode::WriteOnly)
    }

    pub fn writable(self) -> bool {
        !matches!(self, AttrMode::ReadOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub name: &'static str,
    pub mode: AttrMode,
}

impl Attribute {
    pub const fn new(name: &'static str, mode: AttrMode) -> Self {
        Self { name, mode }
    }
}

/// A named set of text attributes.
///
/// Implementors provide [`show`](Self::show) and [`store`](Self::store);
/// callers go through [`read`](Self::read) and [`write`](Self::write), which
/// resolve the attribute and enforce its access mode first.
pub trait AttributeGroup: Send + Sync {
    /// Name of the group, e.g. `dsa` or `hwmon`
    fn name(&self) -> &'static str;

    /// All attributes of the group
    fn attributes(&self) -> &'static [Attribute];

    /// Produce the text of a readable attribute
    fn show(&self, attribute: &Attribute) -> Result<String>;

    /// Consume the text written to a writable attribute. Returns the number of
    /// bytes consumed, which is always the full input on success.
    fn store(&self, attribute: &Attribute, input: &str) -> Result<usize>;

    fn attribute(&self, name: &str) -> Result<&'static Attribute> {
        self.attributes()
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::NotFound(format!("attribute {}/{name}", self.name())))
    }

    fn read(&self, name: &str) -> Result<String> {
        let attribute = self.attribute(name)?;
        if !attribute.mode.readable() {
            return Err(Error::PermissionDenied);
        }
        self.show(attribute)
    }

    fn write(&self, name: &str, input: &str) -> Result<usize> {
        let attribute = self.attribute(name)?;
        if !attribute.mode.writable() {
            return Err(Error::PermissionDenied);
        }
        self.store(attribute, input)
    }
}

/// Strip the terminator (newline and/or NUL) a writer leaves behind
pub(crate) fn trim_terminator(input: &str) -> &str {
    input.trim_end_matches(|c| c == '\n' || c == '\0')
}

/// Split `input` into exactly `count` tokens separated by `separator`
pub(crate) fn tokens<'a>(input: &'a str, separator: char, count: usize) -> Result<Vec<&'a str>> {
    let tokens: Vec<&str> = trim_terminator(input).split(separator).collect();
    if tokens.len() != count || tokens.iter().any(|t| t.is_empty()) {
        return Err(Error::invalid(format!(
            "expected {count} '{separator}' separated fields, got {input:?}"
        )));
    }
    Ok(tokens)
}

fn strip_hex_prefix(token: &str) -> &str {
    token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token)
}

pub(crate) fn parse_hex_u8(token: &str) -> Result<u8> {
    u8::from_str_radix(strip_hex_prefix(token), 16)
        .map_err(|_| Error::invalid(format!("{token:?} is not an 8 bit hex value")))
}

pub(crate) fn parse_hex_u16(token: &str) -> Result<u16> {
    u16::from_str_radix(strip_hex_prefix(token), 16)
        .map_err(|_| Error::invalid(format!("{token:?} is not a 16 bit hex value")))
}

pub(crate) fn parse_hex_u64(token: &str) -> Result<u64> {
    u64::from_str_radix(strip_hex_prefix(token), 16)
        .map_err(|_| Error::invalid(format!("{token:?} is not a 64 bit hex value")))
}

pub(crate) fn parse_decimal<T: core::str::FromStr>(token: &str) -> Result<T> {
    trim_terminator(token)
        .parse()
        .map_err(|_| Error::invalid(format!("{token:?} is not a decimal value")))
}
