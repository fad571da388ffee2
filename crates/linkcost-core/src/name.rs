//! Hierarchical neighbor names.
//!
//! A [`NeighborName`] is an opaque slash-separated hierarchical name
//! (`/nd/edu/router-a`). Equality and hashing are structural over the
//! component sequence; ordering is lexicographic, which keeps map iteration
//! and status reports deterministic.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An opaque hierarchical router name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeighborName {
    components: Vec<String>,
}

impl Serialize for NeighborName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NeighborName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        Ok(NeighborName::new(&uri))
    }
}

impl NeighborName {
    /// Parse from a URI-style string. Empty components are dropped, so
    /// `"/a//b/"` and `"/a/b"` are the same name.
    pub fn new(uri: &str) -> Self {
        NeighborName {
            components: uri
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Return a new name with `component` appended.
    pub fn append(&self, component: &str) -> Self {
        let mut components = self.components.clone();
        components.push(component.to_string());
        NeighborName { components }
    }

    /// Whether `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &NeighborName) -> bool {
        other.components.len() >= self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// Component at `index`, if present.
    pub fn component(&self, index: usize) -> Option<&str> {
        self.components.get(index).map(String::as_str)
    }
}

impl fmt::Display for NeighborName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

impl From<&str> for NeighborName {
    fn from(uri: &str) -> Self {
        NeighborName::new(uri)
    }
}
