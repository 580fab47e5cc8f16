//! Recursive tree mapping
//!
//! One traversal serves every tree-wide operation: loading persisted data,
//! uploading raw derivatives, promoting, deleting and serializing. Call
//! sites differ only in the leaf predicate and the transform they supply.
//!
//! Mapping keys are visited in stored order, lists in index order.

use crate::path::{Key, TreePath};
use crate::tree::Tree;
use indexmap::IndexMap;
use std::convert::Infallible;

impl<L> Tree<L> {
    /// Map nodes into a structurally identical tree
    ///
    /// A node is handed to `transform` when `is_leaf` accepts it or when it
    /// is a leaf; otherwise mapping entries and list items are descended
    /// into with their key appended to the path. `prefix` is the path of
    /// `self` inside a larger tree.
    ///
    /// # Errors
    /// Returns the first error produced by `transform`; later nodes are not
    /// visited.
    pub fn map_nodes<M, E, P, F>(self, prefix: &TreePath, is_leaf: P, mut transform: F) -> Result<Tree<M>, E>
    where
        P: Fn(&Tree<L>) -> bool,
        F: FnMut(&TreePath, Tree<L>) -> Result<M, E>,
    {
        let mut path = prefix.clone();
        map_node(self, &mut path, &is_leaf, &mut transform)
    }

    /// Map every leaf value, keeping the shape
    ///
    /// # Errors
    /// Returns the first error produced by `f`
    pub fn try_map<M, E, F>(self, prefix: &TreePath, mut f: F) -> Result<Tree<M>, E>
    where
        F: FnMut(&TreePath, L) -> Result<M, E>,
    {
        self.map_nodes(prefix, |_| false, |path, node| match node {
            Tree::Leaf(leaf) => f(path, leaf),
            _ => unreachable!("branches are always descended into"),
        })
    }

    /// Infallible variant of [`try_map`](Self::try_map) rooted at the empty path
    #[must_use]
    pub fn map<M, F>(self, mut f: F) -> Tree<M>
    where
        F: FnMut(&TreePath, L) -> M,
    {
        match self.try_map(&TreePath::root(), |path, leaf| Ok::<_, Infallible>(f(path, leaf))) {
            Ok(tree) => tree,
            Err(never) => match never {},
        }
    }

    /// Borrowed view with the same shape
    #[must_use]
    pub fn borrowed(&self) -> Tree<&L> {
        match self {
            Self::Leaf(leaf) => Tree::Leaf(leaf),
            Self::Map(entries) => Tree::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.borrowed()))
                    .collect(),
            ),
            Self::List(items) => Tree::List(items.iter().map(Tree::borrowed).collect()),
        }
    }

    /// Lazy iterator over `(path, leaf)` pairs
    ///
    /// Nothing is allocated beyond the traversal stack.
    #[must_use]
    pub fn leaves(&self) -> Leaves<'_, L> {
        Leaves {
            stack: vec![(TreePath::root(), self)],
        }
    }
}

fn map_node<L, M, E, P, F>(node: Tree<L>, path: &mut TreePath, is_leaf: &P, transform: &mut F) -> Result<Tree<M>, E>
where
    P: Fn(&Tree<L>) -> bool,
    F: FnMut(&TreePath, Tree<L>) -> Result<M, E>,
{
    if is_leaf(&node) {
        return transform(path, node).map(Tree::Leaf);
    }

    match node {
        Tree::Map(entries) => {
            let mut mapped = IndexMap::with_capacity(entries.len());
            for (name, child) in entries {
                path.push(Key::Name(name.clone()));
                let result = map_node(child, path, is_leaf, transform);
                path.pop();
                mapped.insert(name, result?);
            }
            Ok(Tree::Map(mapped))
        }
        Tree::List(items) => {
            let mut mapped = Vec::with_capacity(items.len());
            for (index, child) in items.into_iter().enumerate() {
                path.push(Key::Index(index));
                let result = map_node(child, path, is_leaf, transform);
                path.pop();
                mapped.push(result?);
            }
            Ok(Tree::List(mapped))
        }
        leaf @ Tree::Leaf(_) => transform(path, leaf).map(Tree::Leaf),
    }
}

/// Depth-first leaf iterator returned by [`Tree::leaves`]
#[derive(Debug)]
pub struct Leaves<'a, L> {
    stack: Vec<(TreePath, &'a Tree<L>)>,
}

impl<'a, L> Iterator for Leaves<'a, L> {
    type Item = (TreePath, &'a L);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, node)) = self.stack.pop() {
            match node {
                Tree::Leaf(leaf) => return Some((path, leaf)),
                Tree::Map(entries) => {
                    for (name, child) in entries.iter().rev() {
                        self.stack.push((path.child(name.as_str()), child));
                    }
                }
                Tree::List(items) => {
                    for (index, child) in items.iter().enumerate().rev() {
                        self.stack.push((path.child(index), child));
                    }
                }
            }
        }
        None
    }
}
