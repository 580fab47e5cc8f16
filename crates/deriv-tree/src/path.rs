//! Paths for addressing nodes inside a derivative tree
//!
//! Provides [`Key`] and [`TreePath`] for hierarchical addressing of named and
//! indexed derivatives.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A single step inside a derivative tree
///
/// Named keys address mapping entries, indices address list elements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Mapping entry
    Name(String),
    /// List element
    Index(usize),
}

impl Key {
    /// Name of the key, if it is a named key
    #[inline]
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Index(_) => None,
        }
    }

    /// Index of the key, if it is an index
    #[inline]
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Name(_) => None,
            Self::Index(index) => Some(*index),
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Location of one node inside a derivative tree
///
/// The empty path addresses the root. Every key-like call site argument is
/// normalized into this one type: a bare name is a one-element path.
///
/// # Examples
/// - `["thumb"]` → `thumb`
/// - `["gallery", 0, "small"]` → `gallery.0.small`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TreePath(Vec<Key>);

impl TreePath {
    /// Create new path from keys
    #[inline]
    #[must_use]
    pub fn new(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    /// Normalize any sequence of key-like values into a path
    #[must_use]
    pub fn normalize<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Create path from a single key
    #[inline]
    #[must_use]
    pub fn single(key: impl Into<Key>) -> Self {
        Self(vec![key.into()])
    }

    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path keys
    #[inline]
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Get number of keys
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get parent path (if not root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.split_last().map(|(_, parent)| parent)
    }

    /// Split into last key and parent path (if not root)
    #[must_use]
    pub fn split_last(&self) -> Option<(&Key, Self)> {
        self.0
            .split_last()
            .map(|(last, rest)| (last, Self(rest.to_vec())))
    }

    /// Get first key (if not root)
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&Key> {
        self.0.first()
    }

    /// Get last key (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }

    /// Append a key, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, key: impl Into<Key>) -> Self {
        let mut new = self.clone();
        new.0.push(key.into());
        new
    }

    /// Append a key in place
    #[inline]
    pub fn push(&mut self, key: impl Into<Key>) {
        self.0.push(key.into());
    }

    /// Remove the last key in place
    #[inline]
    pub fn pop(&mut self) -> Option<Key> {
        self.0.pop()
    }

    /// Check if this path is a prefix of another
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Iterator over keys from root to leaf
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }

    /// Join keys with custom separator
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl Display for TreePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join("."))
    }
}

impl FromStr for TreePath {
    type Err = PathError;

    /// Parse a dotted path; all-digit segments become indices
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }

        let keys = s
            .split('.')
            .map(|seg| {
                if seg.is_empty() {
                    Err(PathError::EmptySegment)
                } else if seg.bytes().all(|b| b.is_ascii_digit()) {
                    seg.parse::<usize>()
                        .map(Key::Index)
                        .map_err(|_| PathError::InvalidSegment(seg.to_string()))
                } else if seg.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-') {
                    Err(PathError::InvalidSegment(seg.to_string()))
                } else {
                    Ok(Key::Name(seg.to_string()))
                }
            })
            .collect::<Result<_, _>>()?;

        Ok(Self(keys))
    }
}

impl From<Key> for TreePath {
    fn from(key: Key) -> Self {
        Self::single(key)
    }
}

impl From<&str> for TreePath {
    fn from(name: &str) -> Self {
        Self::single(name)
    }
}

impl From<String> for TreePath {
    fn from(name: String) -> Self {
        Self::single(name)
    }
}

impl From<usize> for TreePath {
    fn from(index: usize) -> Self {
        Self::single(index)
    }
}

impl From<&TreePath> for TreePath {
    fn from(path: &TreePath) -> Self {
        path.clone()
    }
}

impl<K: Into<Key>> From<Vec<K>> for TreePath {
    fn from(keys: Vec<K>) -> Self {
        Self::normalize(keys)
    }
}

impl<K: Into<Key>, const N: usize> From<[K; N]> for TreePath {
    fn from(keys: [K; N]) -> Self {
        Self::normalize(keys)
    }
}

/// Errors related to tree paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Empty segment in a dotted path
    #[error("path contains empty segment")]
    EmptySegment,

    /// Invalid segment characters
    #[error("invalid segment: {0} (must be alphanumeric, '-' or '_')")]
    InvalidSegment(String),

    /// Navigation continued past a leaf artifact
    #[error("path '{path}' descends through a leaf at '{leaf}'")]
    ThroughLeaf { path: String, leaf: String },

    /// Operation requires a non-root path
    #[error("operation requires a non-empty path")]
    Empty,
}
