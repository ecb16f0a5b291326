//! The ordered key-value enumeration carried by `message` commands.

use std::fmt;

use super::upcode;
use super::{Error, Result};

/// An insertion-ordered list of `key=value` pairs.
///
/// Yate dispatches message parameters in the order they were attached,
/// so unlike a map this container never reorders its entries. Keys are
/// not required to be unique on the wire; [`KeyValueList::set`] replaces
/// the first occurrence while [`KeyValueList::push`] always appends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyValueList(Vec<(String, String)>);

impl KeyValueList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the list holds no pairs at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of pairs in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Append a pair, keeping any existing pair with the same key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Replace the value of the first pair with this `key`,
    /// or append a new pair if the key is not present yet.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();

        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value.into(),
            None => self.0.push((key, value.into())),
        }
    }

    /// Iterate over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse the wire form, `k1=v1:k2=v2:…`, where a segment without `=`
    /// stands for a key with an empty value.
    pub(super) fn parse(field: &str) -> Result<Self> {
        if field.is_empty() {
            return Ok(Self::new());
        }

        let mut pairs = Vec::new();
        for segment in field.split(':') {
            let (key, value) = match segment.split_once('=') {
                Some((key, value)) => (key, value),
                None => (segment, ""),
            };

            if key.is_empty() {
                return Err(Error::EmptyKey);
            }

            pairs.push((
                upcode::decode(key)?.into_owned(),
                upcode::decode(value)?.into_owned(),
            ));
        }

        Ok(Self(pairs))
    }
}

impl fmt::Display for KeyValueList {
    // An empty value renders as a lone key, without the `=` separator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, (key, value)) in self.0.iter().enumerate() {
            if n > 0 {
                f.write_str(":")?;
            }

            f.write_str(&upcode::encode_param(key))?;
            if !value.is_empty() {
                f.write_str("=")?;
                f.write_str(&upcode::encode_param(value))?;
            }
        }

        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValueList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
