use crate::error::TreeError;
use crate::link::Side;
use crate::tree::{NodeHandle, RbTree};

impl<K: Ord, V> RbTree<K, V> {
    /// Check every structural invariant.
    ///
    /// Returns the black height of the tree (missing children count as one
    /// black node, so an empty tree has height 1), or the first violation
    /// found.
    pub fn validate(&self) -> Result<usize, TreeError> {
        let Some(root) = self.root else {
            if self.nodes.is_empty() {
                return Ok(1);
            }
            return Err(TreeError::CountMismatch {
                reachable: 0,
                stored: self.nodes.len(),
            });
        };
        if self.nodes[root].link.parent.is_some() {
            return Err(TreeError::BrokenLink(NodeHandle(root)));
        }
        if self.nodes[root].link.is_red() {
            return Err(TreeError::RedRoot(NodeHandle(root)));
        }

        let mut reachable = 0;
        let height = self.check_subtree(root, &mut reachable)?;
        if reachable != self.nodes.len() {
            return Err(TreeError::CountMismatch {
                reachable,
                stored: self.nodes.len(),
            });
        }

        let mut prev: Option<&K> = None;
        let mut n = Some(self.extreme(root, Side::Left));
        while let Some(cur) = n {
            let key = &self.nodes[cur].key;
            if prev.is_some_and(|p| p >= key) {
                return Err(TreeError::OutOfOrder(NodeHandle(cur)));
            }
            prev = Some(key);
            n = self.successor(cur);
        }
        Ok(height)
    }

    fn check_subtree(&self, n: usize, reachable: &mut usize) -> Result<usize, TreeError> {
        *reachable += 1;
        let mut heights = [1usize; 2];
        for side in [Side::Left, Side::Right] {
            let Some(c) = self.child(n, side) else {
                continue;
            };
            let link = self.nodes[c].link;
            if link.parent != Some(n) || link.side != side {
                return Err(TreeError::BrokenLink(NodeHandle(c)));
            }
            if self.nodes[n].link.is_red() && link.is_red() {
                return Err(TreeError::RedRed {
                    parent: NodeHandle(n),
                    child: NodeHandle(c),
                });
            }
            heights[side as usize] = self.check_subtree(c, reachable)?;
        }
        let [left, right] = heights;
        if left != right {
            return Err(TreeError::BlackHeight {
                node: NodeHandle(n),
                left,
                right,
            });
        }
        Ok(left + usize::from(!self.nodes[n].link.is_red()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use crate::link::Color;

    use super::*;

    #[derive(Clone, Debug)]
    enum Op {
        Insert(u16),
        Remove(u16),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u16..512).prop_map(Op::Insert),
            2 => (0u16..512).prop_map(Op::Remove),
        ]
    }

    // -----------------------------------------------------------------------
    // Detection
    // -----------------------------------------------------------------------

    #[test]
    fn detects_red_root() {
        let mut tree = RbTree::new();
        tree.insert(1u32, ()).unwrap();
        let root = tree.root.unwrap();
        tree.nodes[root].link.color = Color::Red;
        assert_eq!(tree.validate(), Err(TreeError::RedRoot(NodeHandle(root))));
    }

    #[test]
    fn detects_unequal_black_height() {
        let mut tree = RbTree::new();
        for k in [2u32, 1, 3] {
            tree.insert(k, ()).unwrap();
        }
        let left = tree.find(&1).unwrap();
        tree.nodes[left.0].link.color = Color::Black;
        assert!(matches!(
            tree.validate(),
            Err(TreeError::BlackHeight { left: 2, right: 1, .. })
        ));
    }

    #[test]
    fn detects_red_red() {
        let mut tree = RbTree::new();
        for k in [2u32, 1, 3, 4] {
            tree.insert(k, ()).unwrap();
        }
        // 3 was recolored black when 4 arrived; make it red again under a red 4.
        let three = tree.find(&3).unwrap();
        tree.nodes[three.0].link.color = Color::Red;
        let one = tree.find(&1).unwrap();
        tree.nodes[one.0].link.color = Color::Red;
        assert!(matches!(tree.validate(), Err(TreeError::RedRed { .. })));
    }

    #[test]
    fn detects_broken_link() {
        let mut tree = RbTree::new();
        for k in [2u32, 1, 3] {
            tree.insert(k, ()).unwrap();
        }
        let right = tree.find(&3).unwrap();
        tree.nodes[right.0].link.side = Side::Left;
        assert_eq!(tree.validate(), Err(TreeError::BrokenLink(right)));
    }

    #[test]
    fn detects_out_of_order_keys() {
        let mut tree = RbTree::new();
        for k in [2u32, 1, 3] {
            tree.insert(k, ()).unwrap();
        }
        let right = tree.find(&3).unwrap();
        tree.nodes[right.0].key = 0;
        assert_eq!(tree.validate(), Err(TreeError::OutOfOrder(right)));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn invariants_hold_after_every_operation(ops in prop::collection::vec(arb_op(), 1..400)) {
            let mut tree = RbTree::new();
            let mut model = BTreeMap::new();
            for op in ops {
                match op {
                    Op::Insert(k) => {
                        let ours = tree.insert(k, u32::from(k) * 3).is_ok();
                        let theirs = !model.contains_key(&k);
                        if theirs {
                            model.insert(k, u32::from(k) * 3);
                        }
                        prop_assert_eq!(ours, theirs);
                    }
                    Op::Remove(k) => {
                        prop_assert_eq!(tree.remove(&k), model.remove(&k).map(|v| (k, v)));
                    }
                }
                prop_assert!(tree.validate().is_ok(), "{:?}", tree.validate());
                prop_assert_eq!(tree.len(), model.len());
            }
            let ours: Vec<(u16, u32)> = tree.iter().map(|(k, v)| (*k, *v)).collect();
            let theirs: Vec<(u16, u32)> = model.into_iter().collect();
            prop_assert_eq!(ours, theirs);
        }
    }
}
