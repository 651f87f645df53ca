//! Resource identifiers and keys.
//!
//! A resource type or name is either a numeric identifier or a case-insensitive string.
//! The resource API passes both through the same pointer-sized argument, telling them apart by the
//! integer-resource marker: values whose upper bits are zero are numeric identifiers.
//! String names of the form `#123` are numeric identifiers as well.

use std::{
    cmp::Ordering,
    convert::Infallible,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use crate::{
    constants::*,
    errors::{ReadError, ResourceError},
    util::*,
};


/// Returns whether a raw resource argument is an integer resource identifier rather than a string pointer.
pub const fn is_int_resource(value: usize) -> bool { value >> 16 == 0 }

/// Resource type or name identifier.
///
/// A `Named` identifier of the form `#123` is the numeric identifier it encodes: it compares, hashes and
/// encodes as `Numeric(123)`. [`Identifier::from_name`] and the `From` conversions decode it up front.
#[derive(Debug, Clone)]
pub enum Identifier {
    Numeric(u32),
    Named(String),
}
impl Identifier {
    /// Returns whether the identifier is numeric.
    pub fn is_numeric(&self) -> bool { self.as_numeric().is_some() }

    /// Returns the numeric value of the identifier, or `None` for named identifiers.
    pub fn as_numeric(&self) -> Option<u32> {
        match self {
            Self::Numeric(id) => Some(*id),
            Self::Named(name) => numeric_name(name),
        }
    }

    /// Returns the name of the identifier, or `None` for numeric identifiers.
    pub fn as_named(&self) -> Option<&str> {
        match self {
            Self::Named(name) if numeric_name(name).is_none() => Some(name),
            _ => None,
        }
    }

    /// Decode a raw resource argument that passed the integer-resource check.
    ///
    /// # Returns
    /// Returns `None` if the value is not an integer resource identifier.
    pub fn from_int_resource(value: usize) -> Option<Self> {
        is_int_resource(value).then_some(Self::Numeric(value as u32))
    }

    /// Decode a name string, treating `#` followed by decimal digits as the numeric identifier it encodes.
    pub fn from_name<S: AsRef<str>>(name: S) -> Self {
        let name = name.as_ref();
        match numeric_name(name) {
            Some(id) => Self::Numeric(id),
            None => Self::Named(name.to_string()),
        }
    }

    /// Returns the identifier with `#123` names decoded.
    pub fn normalized(self) -> Self {
        match self.as_numeric() {
            Some(id) => Self::Numeric(id),
            None => self,
        }
    }

    /// Returns whether the identifier can be stored in a resource directory entry.
    /// Numeric identifiers are limited to 16 bits.
    pub fn is_valid_id(&self) -> bool { self.as_numeric().map_or(true, |id| id <= 0xffff) }

    /// Decode a resource directory string: a 16 bit character count followed by UTF-16LE characters.
    pub fn from_directory_string(data: &[u8]) -> Result<Self, ReadError> {
        let length = read::<u16>(data)? as u64;
        let characters = slice_at(data, 2, length * 2)?;
        let name = char::decode_utf16(
            characters.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])),
        )
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>();
        Ok(Self::from_name(name))
    }

    /// Encode the identifier as a resource directory string.
    ///
    /// # Returns
    /// Returns `None` for numeric identifiers, which are stored inline in the directory entry.
    pub fn to_directory_string(&self) -> Option<Vec<u8>> {
        let name = self.as_named()?;
        let characters = name.encode_utf16().collect::<Vec<_>>();
        let mut data = Vec::with_capacity(characters.len() * 2 + 2);
        data.extend_from_slice(&(characters.len() as u16).to_le_bytes());
        data.extend(characters.iter().flat_map(|c| c.to_le_bytes()));
        Some(data)
    }

    /// Returns the size of the encoded directory string, or 0 for numeric identifiers.
    pub(crate) fn directory_string_size(&self) -> u32 {
        match self.as_named() {
            Some(name) => 2 + name.encode_utf16().count() as u32 * 2,
            None => 0,
        }
    }

    fn folded(name: &str) -> impl Iterator<Item = char> + '_ {
        name.chars().flat_map(char::to_uppercase)
    }
}

fn numeric_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('#')?;
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u16>().ok().map(u32::from)
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}
impl Eq for Identifier {}
impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.as_numeric() {
            Some(id) => {
                state.write_u8(0);
                id.hash(state);
            }
            None => {
                state.write_u8(1);
                Self::folded(self.as_named().unwrap_or_default()).for_each(|c| c.hash(state));
            }
        }
    }
}
impl Ord for Identifier {
    // named entries precede numeric entries, matching the resource directory ordering
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_numeric(), other.as_numeric()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => {
                Self::folded(self.as_named().unwrap_or_default())
                    .cmp(Self::folded(other.as_named().unwrap_or_default()))
            }
        }
    }
}
impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_numeric() {
            Some(id) => write!(f, "#{}", id),
            None => f.write_str(self.as_named().unwrap_or_default()),
        }
    }
}
impl From<u16> for Identifier {
    fn from(id: u16) -> Self { Self::Numeric(id as u32) }
}
impl From<u32> for Identifier {
    fn from(id: u32) -> Self { Self::Numeric(id) }
}
impl From<&str> for Identifier {
    fn from(name: &str) -> Self { Self::from_name(name) }
}
impl From<String> for Identifier {
    fn from(name: String) -> Self { Self::from_name(name) }
}
impl FromStr for Identifier {
    type Err = Infallible;

    fn from_str(name: &str) -> Result<Self, Self::Err> { Ok(Self::from_name(name)) }
}


/// Key of a single resource: type, name and language.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub kind:     Identifier,
    pub name:     Identifier,
    pub language: LANGID,
}
impl ResourceKey {
    pub fn new<K: Into<Identifier>, N: Into<Identifier>>(kind: K, name: N, language: LANGID) -> Self {
        Self {
            kind: kind.into().normalized(),
            name: name.into().normalized(),
            language,
        }
    }

    /// Returns an error if the type or name cannot be stored in a resource directory.
    pub fn check(&self) -> Result<(), ResourceError> {
        if self.kind.is_valid_id() && self.name.is_valid_id() {
            Ok(())
        } else {
            Err(ResourceError::InvalidIdentifier(self.clone()))
        }
    }
}
impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind.as_numeric(), self.kind.as_named()) {
            (Some(id), _) => match resource_type_name(id) {
                Some(name) => write!(f, "({}", name)?,
                None => write!(f, "({}", id)?,
            },
            (None, name) => write!(f, "({:?}", name.unwrap_or_default())?,
        }
        match (self.name.as_numeric(), self.name.as_named()) {
            (Some(id), _) => write!(f, ", {}", id)?,
            (None, name) => write!(f, ", {:?}", name.unwrap_or_default())?,
        }
        write!(f, ", {})", self.language)
    }
}
