//! String interning for identifier names and string values.
//!
//! Every identifier and string value in a session is interned exactly once, so
//! the machine can compare strings by id and keep `Value` a small `Copy` type.
//! Because the interner deduplicates, two interned strings are equal iff their
//! [`StringId`]s are equal, which is what gives string `===` its cheap
//! implementation.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for an interned string.
///
/// Look the string up with [`Interner::resolve`] to get the text back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StringId(u32);

impl StringId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("interner exceeds u32 capacity"))
    }

    /// Returns the raw index into the interner's string table.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Append-only string table with deduplication.
///
/// The lookup map is rebuilt from the string table on deserialization, so
/// snapshots only carry the table itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interner {
    strings: Vec<String>,
    #[serde(skip)]
    map: AHashMap<String, StringId>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the id of the existing entry when the text
    /// has been seen before.
    pub fn intern(&mut self, text: &str) -> StringId {
        if self.map.is_empty() && !self.strings.is_empty() {
            self.rebuild_map();
        }
        if let Some(&id) = self.map.get(text) {
            return id;
        }
        let id = StringId::new(self.strings.len());
        self.strings.push(text.to_owned());
        self.map.insert(text.to_owned(), id);
        id
    }

    /// Returns the text for an interned id.
    ///
    /// # Panics
    /// Panics if `id` was produced by a different interner.
    #[must_use]
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    fn rebuild_map(&mut self) {
        self.map = self
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), StringId::new(i)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("head");
        let b = interner.intern("tail");
        let c = interner.intern("head");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "head");
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn map_survives_serde_round_trip() {
        let mut interner = Interner::new();
        let a = interner.intern("x");
        let bytes = postcard::to_allocvec(&interner).unwrap();
        let mut restored: Interner = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(restored.resolve(a), "x");
        // interning after restore must still deduplicate
        assert_eq!(restored.intern("x"), a);
    }
}
