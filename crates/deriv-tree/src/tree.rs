//! Nested derivative trees
//!
//! A [`Tree`] is a mapping of names to subtrees, an ordered list of
//! subtrees, or a leaf. Mapping order is insertion order.

use crate::path::{Key, PathError, TreePath};
use indexmap::IndexMap;
use serde_json::Value;

/// Arbitrarily nested collection of leaves
///
/// # Type Parameters
/// - `L`: leaf type ([`Artifact`](crate::Artifact) once resolved,
///   [`RawArtifact`](crate::RawArtifact) before upload, plain values while
///   (de)serializing)
#[derive(Debug, Clone, PartialEq)]
pub enum Tree<L> {
    /// Single leaf value
    Leaf(L),
    /// Named subtrees
    Map(IndexMap<String, Tree<L>>),
    /// Indexed subtrees
    List(Vec<Tree<L>>),
}

impl<L> Default for Tree<L> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<L> Tree<L> {
    /// Empty mapping, the "no derivatives" state
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::Map(IndexMap::new())
    }

    /// Build a mapping from name/subtree pairs
    #[must_use]
    pub fn map_of<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Tree<L>)>,
        K: Into<String>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list of leaves
    #[must_use]
    pub fn list_of(leaves: impl IntoIterator<Item = L>) -> Self {
        Self::List(leaves.into_iter().map(Tree::Leaf).collect())
    }

    /// Check for an empty mapping or list
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Leaf(_) => false,
            Self::Map(entries) => entries.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Short description of the node kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::Map(_) => "map",
            Self::List(_) => "list",
        }
    }

    /// Leaf value, if this node is a leaf
    #[inline]
    #[must_use]
    pub fn as_leaf(&self) -> Option<&L> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Consume into the leaf value, if this node is a leaf
    #[inline]
    #[must_use]
    pub fn into_leaf(self) -> Option<L> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Mapping entries, if this node is a mapping
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, Tree<L>>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Consume into mapping entries, if this node is a mapping
    #[inline]
    #[must_use]
    pub fn into_map(self) -> Option<IndexMap<String, Tree<L>>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// List items, if this node is a list
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Tree<L>]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Resolve the node at `path`
    ///
    /// Returns `Ok(None)` when a segment does not exist (including a name
    /// used on a list or an index used on a mapping).
    ///
    /// # Errors
    /// `PathError::ThroughLeaf` if keys remain after reaching a leaf
    pub fn get(&self, path: &TreePath) -> Result<Option<&Tree<L>>, PathError> {
        let mut node = self;
        for (depth, key) in path.iter().enumerate() {
            let next = match (node, key) {
                (Self::Map(entries), Key::Name(name)) => entries.get(name),
                (Self::List(items), Key::Index(index)) => items.get(*index),
                (Self::Leaf(_), _) => {
                    return Err(PathError::ThroughLeaf {
                        path: path.to_string(),
                        leaf: TreePath::new(path.keys()[..depth].to_vec()).to_string(),
                    })
                }
                _ => None,
            };
            match next {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Resolve the leaf at `path`
    ///
    /// # Errors
    /// `PathError::ThroughLeaf` if keys remain after reaching a leaf
    pub fn get_leaf(&self, path: &TreePath) -> Result<Option<&L>, PathError> {
        Ok(self.get(path)?.and_then(Tree::as_leaf))
    }

    fn get_mut(&mut self, path: &TreePath) -> Result<Option<&mut Tree<L>>, PathError> {
        let mut node = self;
        for (depth, key) in path.iter().enumerate() {
            let next = match (node, key) {
                (Self::Map(entries), Key::Name(name)) => entries.get_mut(name),
                (Self::List(items), Key::Index(index)) => items.get_mut(*index),
                (Self::Leaf(_), _) => {
                    return Err(PathError::ThroughLeaf {
                        path: path.to_string(),
                        leaf: TreePath::new(path.keys()[..depth].to_vec()).to_string(),
                    })
                }
                _ => None,
            };
            match next {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Detach and return the node at `path`
    ///
    /// Named entries are removed preserving the order of the remaining
    /// entries; list elements shift down.
    ///
    /// # Errors
    /// - `PathError::Empty` for the root path
    /// - `PathError::ThroughLeaf` if the parent path crosses a leaf
    pub fn remove(&mut self, path: &TreePath) -> Result<Option<Tree<L>>, PathError> {
        let (last, parent_path) = path.split_last().ok_or(PathError::Empty)?;
        let Some(parent) = self.get_mut(&parent_path)? else {
            return Ok(None);
        };

        let removed = match (parent, last) {
            (Self::Map(entries), Key::Name(name)) => entries.shift_remove(name),
            (Self::List(items), Key::Index(index)) if *index < items.len() => {
                Some(items.remove(*index))
            }
            (Self::Leaf(_), _) => {
                return Err(PathError::ThroughLeaf {
                    path: path.to_string(),
                    leaf: parent_path.to_string(),
                })
            }
            _ => None,
        };
        Ok(removed)
    }

    /// Shallow top-level merge
    ///
    /// Entries of `other` overwrite same-named entries of `self`; entries
    /// absent from `other` are kept. A non-mapping `self` is replaced.
    #[must_use]
    pub fn merged(self, other: IndexMap<String, Tree<L>>) -> Self {
        match self {
            Self::Map(mut entries) => {
                entries.extend(other);
                Self::Map(entries)
            }
            _ => Self::Map(other),
        }
    }

    /// Number of leaves in the tree
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }
}

impl<L> FromIterator<(String, Tree<L>)> for Tree<L> {
    fn from_iter<I: IntoIterator<Item = (String, Tree<L>)>>(iter: I) -> Self {
        Self::Map(iter.into_iter().collect())
    }
}

impl From<Value> for Tree<Value> {
    /// Structural conversion: objects become mappings, arrays become lists,
    /// everything else is a leaf
    fn from(value: Value) -> Self {
        match value {
            Value::Object(object) => Self::Map(
                object
                    .into_iter()
                    .map(|(k, v)| (k, Tree::from(v)))
                    .collect(),
            ),
            Value::Array(items) => Self::List(items.into_iter().map(Tree::from).collect()),
            scalar => Self::Leaf(scalar),
        }
    }
}

impl From<Tree<Value>> for Value {
    fn from(tree: Tree<Value>) -> Self {
        match tree {
            Tree::Leaf(value) => value,
            Tree::Map(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
            Tree::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}
