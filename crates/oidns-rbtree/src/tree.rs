//! The tree itself: lookup, insertion and removal with rebalancing.
//!
//! # Invariants
//!
//! - The root is black.
//! - A red node never has a red child.
//! - Every path from a node down to a missing child crosses the same number
//!   of black nodes.
//! - Keys are strictly increasing in order; no key appears twice.
//! - `children[s]` of `p` is `c` exactly when `c`'s link records parent `p`
//!   and side `s`.

use std::cmp::Ordering;
use std::fmt;

use slab::Slab;

use crate::error::DuplicateKey;
use crate::link::{Color, Link, Side};

/// Stable handle to a node. Valid until that node is removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) children: [Option<usize>; 2],
    pub(crate) link: Link,
}

/// An ordered map kept balanced by red-black rules.
pub struct RbTree<K, V> {
    pub(crate) nodes: Slab<Node<K, V>>,
    pub(crate) root: Option<usize>,
}

impl<K, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self {
            nodes: Slab::new(),
            root: None,
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for RbTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> RbTree<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(capacity),
            root: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    pub fn key_at(&self, handle: NodeHandle) -> Option<&K> {
        self.nodes.get(handle.0).map(|n| &n.key)
    }

    pub fn value_at(&self, handle: NodeHandle) -> Option<&V> {
        self.nodes.get(handle.0).map(|n| &n.value)
    }

    pub fn value_at_mut(&mut self, handle: NodeHandle) -> Option<&mut V> {
        self.nodes.get_mut(handle.0).map(|n| &mut n.value)
    }

    /// The smallest entry.
    pub fn first(&self) -> Option<(&K, &V)> {
        let n = self.extreme(self.root?, Side::Left);
        Some((&self.nodes[n].key, &self.nodes[n].value))
    }

    /// The largest entry.
    pub fn last(&self) -> Option<(&K, &V)> {
        let n = self.extreme(self.root?, Side::Right);
        Some((&self.nodes[n].key, &self.nodes[n].value))
    }

    /// In-order iteration.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            tree: self,
            next: self.root.map(|r| self.extreme(r, Side::Left)),
            remaining: self.len(),
        }
    }

    // ---------------------------------------------------------------
    // Link plumbing
    // ---------------------------------------------------------------

    pub(crate) fn child(&self, n: usize, side: Side) -> Option<usize> {
        self.nodes[n].children[side.index()]
    }

    pub(crate) fn is_red(&self, n: Option<usize>) -> bool {
        n.is_some_and(|n| self.nodes[n].link.is_red())
    }

    fn set_color(&mut self, n: usize, color: Color) {
        self.nodes[n].link.color = color;
    }

    /// Walk to the leftmost (or rightmost) node below `n`.
    pub(crate) fn extreme(&self, mut n: usize, side: Side) -> usize {
        while let Some(c) = self.child(n, side) {
            n = c;
        }
        n
    }

    /// In-order successor of `n`.
    pub(crate) fn successor(&self, n: usize) -> Option<usize> {
        if let Some(r) = self.child(n, Side::Right) {
            return Some(self.extreme(r, Side::Left));
        }
        let mut cur = n;
        loop {
            let link = self.nodes[cur].link;
            let parent = link.parent?;
            if link.side == Side::Left {
                return Some(parent);
            }
            cur = parent;
        }
    }

    /// Hang `child` (or nothing) in `parent`'s `side` slot.
    fn set_child(&mut self, parent: usize, side: Side, child: Option<usize>) {
        self.nodes[parent].children[side.index()] = child;
        if let Some(c) = child {
            let link = &mut self.nodes[c].link;
            link.parent = Some(parent);
            link.side = side;
        }
    }

    /// Make whatever slot currently holds `old` hold `new` instead.
    fn replace_in_parent(&mut self, old: usize, new: Option<usize>) {
        let Link { parent, side, .. } = self.nodes[old].link;
        match parent {
            None => self.root = new,
            Some(p) => self.nodes[p].children[side.index()] = new,
        }
        if let Some(n) = new {
            let link = &mut self.nodes[n].link;
            link.parent = parent;
            link.side = side;
        }
    }

    /// Rotate `n` down toward `dir`; its child on the opposite side takes
    /// its place.
    fn rotate(&mut self, n: usize, dir: Side) {
        let pivot = self
            .child(n, dir.opposite())
            .expect("rotation pivot must exist");
        let inner = self.child(pivot, dir);
        self.replace_in_parent(n, Some(pivot));
        self.set_child(n, dir.opposite(), inner);
        self.set_child(pivot, dir, Some(n));
    }

    // ---------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------

    /// Remove the node behind `handle`, returning its entry.
    ///
    /// Returns `None` if the handle is stale.
    pub fn remove_at(&mut self, handle: NodeHandle) -> Option<(K, V)> {
        let z = handle.0;
        if !self.nodes.contains(z) {
            return None;
        }

        // Position (parent, side) that lost one black node, if any.
        let mut deficit: Option<(Option<usize>, Side)> = None;

        match (self.child(z, Side::Left), self.child(z, Side::Right)) {
            (None, None) => {
                let Link {
                    parent,
                    side,
                    color,
                } = self.nodes[z].link;
                self.replace_in_parent(z, None);
                if color == Color::Black {
                    deficit = Some((parent, side));
                }
            }
            (Some(c), None) | (None, Some(c)) => {
                let Link {
                    parent,
                    side,
                    color,
                } = self.nodes[z].link;
                self.replace_in_parent(z, Some(c));
                if color == Color::Black {
                    if self.nodes[c].link.is_red() {
                        self.set_color(c, Color::Black);
                    } else {
                        deficit = Some((parent, side));
                    }
                }
            }
            (Some(left), Some(right)) => {
                let s = self.extreme(right, Side::Left);
                let s_color = self.nodes[s].link.color;
                let s_right = self.child(s, Side::Right);

                let hole = if s == right {
                    self.replace_in_parent(z, Some(s));
                    self.set_child(s, Side::Left, Some(left));
                    (Some(s), Side::Right)
                } else {
                    let s_parent = self.nodes[s].link.parent;
                    self.replace_in_parent(s, s_right);
                    self.replace_in_parent(z, Some(s));
                    self.set_child(s, Side::Left, Some(left));
                    self.set_child(s, Side::Right, Some(right));
                    (s_parent, Side::Left)
                };
                let z_color = self.nodes[z].link.color;
                self.set_color(s, z_color);

                if s_color == Color::Black {
                    match s_right {
                        Some(x) if self.nodes[x].link.is_red() => self.set_color(x, Color::Black),
                        _ => deficit = Some(hole),
                    }
                }
            }
        }

        let node = self.nodes.remove(z);
        if let Some((Some(parent), side)) = deficit {
            self.delete_fixup(parent, side);
        }
        Some((node.key, node.value))
    }

    /// Restore equal black height after the subtree at `parent.children[side]`
    /// lost one black node.
    fn delete_fixup(&mut self, mut parent: usize, mut side: Side) {
        loop {
            let mut sibling = self
                .child(parent, side.opposite())
                .expect("doubly-black position must have a sibling");

            if self.nodes[sibling].link.is_red() {
                self.set_color(sibling, Color::Black);
                self.set_color(parent, Color::Red);
                self.rotate(parent, side);
                sibling = self
                    .child(parent, side.opposite())
                    .expect("rotation leaves a sibling in place");
            }

            let near = self.child(sibling, side);
            let far = self.child(sibling, side.opposite());

            if !self.is_red(near) && !self.is_red(far) {
                self.set_color(sibling, Color::Red);
                if self.nodes[parent].link.is_red() {
                    self.set_color(parent, Color::Black);
                    return;
                }
                let link = self.nodes[parent].link;
                match link.parent {
                    None => return,
                    Some(grandparent) => {
                        side = link.side;
                        parent = grandparent;
                        continue;
                    }
                }
            }

            if !self.is_red(far) {
                // Near child is red: turn it into the far case.
                let near = near.expect("near child is red");
                self.set_color(near, Color::Black);
                self.set_color(sibling, Color::Red);
                self.rotate(sibling, side.opposite());
                sibling = near;
            }

            let parent_color = self.nodes[parent].link.color;
            self.set_color(sibling, parent_color);
            self.set_color(parent, Color::Black);
            if let Some(far) = self.child(sibling, side.opposite()) {
                self.set_color(far, Color::Black);
            }
            self.rotate(parent, side);
            return;
        }
    }

    // ---------------------------------------------------------------
    // Insertion fixup
    // ---------------------------------------------------------------

    /// `n` was just linked as a red leaf; restore the red-black rules.
    fn insert_fixup(&mut self, mut n: usize) {
        loop {
            let Some(parent) = self.nodes[n].link.parent else {
                self.set_color(n, Color::Black);
                return;
            };
            if !self.nodes[parent].link.is_red() {
                return;
            }
            let Some(grandparent) = self.nodes[parent].link.parent else {
                // Red root: recolor and stop.
                self.set_color(parent, Color::Black);
                return;
            };

            let parent_side = self.nodes[parent].link.side;
            let uncle = self.child(grandparent, parent_side.opposite());
            if let Some(uncle) = uncle.filter(|&u| self.nodes[u].link.is_red()) {
                self.set_color(parent, Color::Black);
                self.set_color(uncle, Color::Black);
                self.set_color(grandparent, Color::Red);
                n = grandparent;
                continue;
            }

            let mut top = parent;
            if self.nodes[n].link.side != parent_side {
                // Inner child: rotate it to the outside first.
                self.rotate(parent, parent_side);
                top = n;
            }
            self.rotate(grandparent, parent_side.opposite());
            self.set_color(top, Color::Black);
            self.set_color(grandparent, Color::Red);
            return;
        }
    }
}

impl<K: Ord, V> RbTree<K, V> {
    /// Handle of the node holding `key`.
    pub fn find(&self, key: &K) -> Option<NodeHandle> {
        let mut cur = self.root;
        while let Some(n) = cur {
            cur = match key.cmp(&self.nodes[n].key) {
                Ordering::Less => self.child(n, Side::Left),
                Ordering::Greater => self.child(n, Side::Right),
                Ordering::Equal => return Some(NodeHandle(n)),
            };
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find(key).map(|h| &self.nodes[h.0].value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let h = self.find(key)?;
        Some(&mut self.nodes[h.0].value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Insert a new entry.
    ///
    /// An existing key is left untouched and the rejected pair is returned
    /// in the error.
    pub fn insert(&mut self, key: K, value: V) -> Result<NodeHandle, DuplicateKey<K, V>> {
        let mut parent = None;
        let mut side = Side::Left;
        let mut cur = self.root;
        while let Some(n) = cur {
            side = match key.cmp(&self.nodes[n].key) {
                Ordering::Less => Side::Left,
                Ordering::Greater => Side::Right,
                Ordering::Equal => {
                    return Err(DuplicateKey {
                        key,
                        value,
                        existing: NodeHandle(n),
                    })
                }
            };
            parent = Some(n);
            cur = self.child(n, side);
        }

        let n = self.nodes.insert(Node {
            key,
            value,
            children: [None, None],
            link: Link::red_leaf(parent, side),
        });
        match parent {
            None => self.root = Some(n),
            Some(p) => self.nodes[p].children[side.index()] = Some(n),
        }
        self.insert_fixup(n);
        Ok(NodeHandle(n))
    }

    /// Remove the entry for `key`.
    pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
        let h = self.find(key)?;
        self.remove_at(h)
    }
}

/// In-order iterator over a tree.
pub struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    next: Option<usize>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.next?;
        self.next = self.tree.successor(n);
        self.remaining -= 1;
        let node = &self.tree.nodes[n];
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> IntoIterator for &'a RbTree<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
