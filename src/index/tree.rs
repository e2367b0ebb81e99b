//! # Node Arena and Balanced Tree
//!
//! Index nodes live in an arena owned by the row store, identified by
//! dense `NodeId` handles. A node id stays attached to its row for the
//! node's whole lifetime: rotations relink child and parent edges but
//! never move a node, so the per-row back-pointer `row.nodes[i]` survives
//! rebalancing.
//!
//! The tree is a height-balanced AVL with parent links. Parent links make
//! two things cheap that this engine needs constantly: deleting a node
//! given only its id (the row carries it), and in-order cursor iteration
//! without a heap-allocated stack.
//!
//! The arena is shared by every index of the table; each index hangs its
//! own root off the store's accessor slot and the trees interleave freely
//! in the same slot space.

use std::cmp::Ordering;

/// Handle to a node in the arena. Dense, reused after free.
pub type NodeId = u32;

#[derive(Debug, Clone)]
pub struct AvlNode {
    pub row_pos: i64,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    height: u16,
}

#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<AvlNode>>,
    free: Vec<NodeId>,
    live: usize,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn node(&self, id: NodeId) -> &AvlNode {
        self.slots[id as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("internal invariant: stale node id {}", id))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut AvlNode {
        self.slots[id as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("internal invariant: stale node id {}", id))
    }

    pub fn row_pos(&self, id: NodeId) -> i64 {
        self.node(id).row_pos
    }

    pub fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    pub fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    fn alloc(&mut self, row_pos: i64) -> NodeId {
        let node = AvlNode {
            row_pos,
            parent: None,
            left: None,
            right: None,
            height: 1,
        };

        self.live += 1;

        match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                (self.slots.len() - 1) as NodeId
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.slots[id as usize] = None;
        self.free.push(id);
        self.live -= 1;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }

    fn height_of(&self, id: Option<NodeId>) -> u16 {
        id.map(|n| self.node(n).height).unwrap_or(0)
    }

    fn update_height(&mut self, id: NodeId) {
        let h = 1 + self
            .height_of(self.node(id).left)
            .max(self.height_of(self.node(id).right));
        self.node_mut(id).height = h;
    }

    fn balance(&self, id: NodeId) -> i32 {
        self.height_of(self.node(id).left) as i32 - self.height_of(self.node(id).right) as i32
    }

    /// Points `parent`'s edge at `new_child` instead of `old_child`; the
    /// root slot takes the edge when there is no parent.
    fn replace_child(
        &mut self,
        parent: Option<NodeId>,
        old_child: NodeId,
        new_child: Option<NodeId>,
        root: &mut Option<NodeId>,
    ) {
        match parent {
            None => *root = new_child,
            Some(p) => {
                let node = self.node_mut(p);
                if node.left == Some(old_child) {
                    node.left = new_child;
                } else {
                    node.right = new_child;
                }
            }
        }

        if let Some(c) = new_child {
            self.node_mut(c).parent = parent;
        }
    }

    fn rotate_left(&mut self, x: NodeId, root: &mut Option<NodeId>) -> NodeId {
        let y = self.node(x).right.unwrap_or_else(|| panic!("internal invariant: rotate_left without right child"));
        let y_left = self.node(y).left;

        self.node_mut(x).right = y_left;
        if let Some(c) = y_left {
            self.node_mut(c).parent = Some(x);
        }

        let parent = self.node(x).parent;
        self.replace_child(parent, x, Some(y), root);

        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);

        self.update_height(x);
        self.update_height(y);

        y
    }

    fn rotate_right(&mut self, x: NodeId, root: &mut Option<NodeId>) -> NodeId {
        let y = self.node(x).left.unwrap_or_else(|| panic!("internal invariant: rotate_right without left child"));
        let y_right = self.node(y).right;

        self.node_mut(x).left = y_right;
        if let Some(c) = y_right {
            self.node_mut(c).parent = Some(x);
        }

        let parent = self.node(x).parent;
        self.replace_child(parent, x, Some(y), root);

        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);

        self.update_height(x);
        self.update_height(y);

        y
    }

    fn rebalance_up(&mut self, start: Option<NodeId>, root: &mut Option<NodeId>) {
        let mut current = start;

        while let Some(n) = current {
            self.update_height(n);

            let bf = self.balance(n);
            let subtree = if bf > 1 {
                let left = self.node(n).left.unwrap_or_else(|| panic!("internal invariant: positive balance without left child"));
                if self.balance(left) < 0 {
                    self.rotate_left(left, root);
                }
                self.rotate_right(n, root)
            } else if bf < -1 {
                let right = self.node(n).right.unwrap_or_else(|| panic!("internal invariant: negative balance without right child"));
                if self.balance(right) > 0 {
                    self.rotate_right(right, root);
                }
                self.rotate_left(n, root)
            } else {
                n
            };

            current = self.node(subtree).parent;
        }
    }

    /// Inserts a node for `row_pos`, positioned by `compare` (search key
    /// of the new row vs an existing node's row). Returns the new node.
    /// `compare` must never return `Equal`; callers break ties on row
    /// position beforehand.
    pub fn insert<F>(
        &mut self,
        root: &mut Option<NodeId>,
        row_pos: i64,
        mut compare: F,
    ) -> NodeId
    where
        F: FnMut(i64) -> Ordering,
    {
        let Some(mut current) = *root else {
            let id = self.alloc(row_pos);
            *root = Some(id);
            return id;
        };

        loop {
            let go_left = match compare(self.node(current).row_pos) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => {
                    panic!("internal invariant: duplicate key reached tree attach")
                }
            };

            let child = if go_left {
                self.node(current).left
            } else {
                self.node(current).right
            };

            match child {
                Some(c) => current = c,
                None => {
                    let id = self.alloc(row_pos);
                    self.node_mut(id).parent = Some(current);
                    if go_left {
                        self.node_mut(current).left = Some(id);
                    } else {
                        self.node_mut(current).right = Some(id);
                    }

                    self.rebalance_up(Some(current), root);

                    return id;
                }
            }
        }
    }

    /// Unlinks and frees the node. Rebalances from the lowest structurally
    /// changed position.
    pub fn remove(&mut self, id: NodeId, root: &mut Option<NodeId>) {
        let left = self.node(id).left;
        let right = self.node(id).right;
        let parent = self.node(id).parent;

        let rebalance_from = match (left, right) {
            (None, _) => {
                self.replace_child(parent, id, right, root);
                parent
            }
            (_, None) => {
                self.replace_child(parent, id, left, root);
                parent
            }
            (Some(left), Some(right)) => {
                let successor = self.subtree_min(right);
                let successor_parent = self.node(successor).parent;

                let from = if successor_parent == Some(id) {
                    Some(successor)
                } else {
                    let successor_right = self.node(successor).right;
                    self.replace_child(successor_parent, successor, successor_right, root);

                    self.node_mut(successor).right = Some(right);
                    self.node_mut(right).parent = Some(successor);

                    successor_parent
                };

                self.replace_child(parent, id, Some(successor), root);
                self.node_mut(successor).left = Some(left);
                self.node_mut(left).parent = Some(successor);

                from
            }
        };

        self.release(id);
        self.rebalance_up(rebalance_from, root);
    }

    fn subtree_min(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    pub fn first(&self, root: Option<NodeId>) -> Option<NodeId> {
        root.map(|r| self.subtree_min(r))
    }

    pub fn last(&self, root: Option<NodeId>) -> Option<NodeId> {
        let mut id = root?;
        while let Some(right) = self.node(id).right {
            id = right;
        }
        Some(id)
    }

    /// In-order successor via parent links.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.node(id).right {
            return Some(self.subtree_min(right));
        }

        let mut child = id;
        let mut parent = self.node(id).parent;

        while let Some(p) = parent {
            if self.node(p).left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.node(p).parent;
        }

        None
    }

    /// Leftmost node for which `compare` (search key vs node) says
    /// `Equal`, with `Less`/`Greater` steering the descent.
    pub fn find_first_equal<F>(&self, root: Option<NodeId>, mut compare: F) -> Option<NodeId>
    where
        F: FnMut(i64) -> Ordering,
    {
        let mut candidate = None;
        let mut current = root;

        while let Some(n) = current {
            match compare(self.node(n).row_pos) {
                Ordering::Less => current = self.node(n).left,
                Ordering::Greater => current = self.node(n).right,
                Ordering::Equal => {
                    candidate = Some(n);
                    current = self.node(n).left;
                }
            }
        }

        candidate
    }

    /// Leftmost node whose key is greater than or equal to the search key.
    pub fn find_first_greater_equal<F>(
        &self,
        root: Option<NodeId>,
        mut compare: F,
    ) -> Option<NodeId>
    where
        F: FnMut(i64) -> Ordering,
    {
        let mut candidate = None;
        let mut current = root;

        while let Some(n) = current {
            match compare(self.node(n).row_pos) {
                Ordering::Greater => current = self.node(n).right,
                _ => {
                    candidate = Some(n);
                    current = self.node(n).left;
                }
            }
        }

        candidate
    }

    #[cfg(test)]
    fn check_invariants(&self, root: Option<NodeId>) {
        fn walk(arena: &NodeArena, id: Option<NodeId>, parent: Option<NodeId>) -> u16 {
            let Some(n) = id else { return 0 };
            assert_eq!(arena.node(n).parent, parent, "parent link broken at {}", n);

            let lh = walk(arena, arena.node(n).left, Some(n));
            let rh = walk(arena, arena.node(n).right, Some(n));

            assert!(
                (lh as i32 - rh as i32).abs() <= 1,
                "balance violated at {}",
                n
            );
            assert_eq!(arena.node(n).height, 1 + lh.max(rh), "height stale at {}", n);

            1 + lh.max(rh)
        }

        walk(self, root, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_value(arena: &mut NodeArena, root: &mut Option<NodeId>, value: i64) -> NodeId {
        arena.insert(root, value, |other| match value.cmp(&other) {
            Ordering::Equal => panic!("duplicate value in test"),
            order => order,
        })
    }

    fn in_order(arena: &NodeArena, root: Option<NodeId>) -> Vec<i64> {
        let mut out = Vec::new();
        let mut cursor = arena.first(root);
        while let Some(n) = cursor {
            out.push(arena.row_pos(n));
            cursor = arena.next(n);
        }
        out
    }

    #[test]
    fn ascending_insert_stays_balanced() {
        let mut arena = NodeArena::new();
        let mut root = None;

        for v in 0..128 {
            insert_value(&mut arena, &mut root, v);
            arena.check_invariants(root);
        }

        assert_eq!(in_order(&arena, root), (0..128).collect::<Vec<_>>());
    }

    #[test]
    fn descending_insert_stays_balanced() {
        let mut arena = NodeArena::new();
        let mut root = None;

        for v in (0..128).rev() {
            insert_value(&mut arena, &mut root, v);
            arena.check_invariants(root);
        }

        assert_eq!(in_order(&arena, root), (0..128).collect::<Vec<_>>());
    }

    #[test]
    fn scrambled_insert_and_delete_preserve_order() {
        let mut arena = NodeArena::new();
        let mut root = None;
        let mut ids = Vec::new();

        // linear congruential scramble of 0..256
        let mut v: i64 = 1;
        let mut values = Vec::new();
        for _ in 0..256 {
            v = (v * 137 + 31) % 509;
            if !values.contains(&v) {
                values.push(v);
            }
        }

        for &value in &values {
            ids.push((value, insert_value(&mut arena, &mut root, value)));
            arena.check_invariants(root);
        }

        let mut sorted = values.clone();
        sorted.sort_unstable();
        assert_eq!(in_order(&arena, root), sorted);

        // delete every third node by handle
        let mut remaining: Vec<i64> = Vec::new();
        for (i, (value, id)) in ids.iter().enumerate() {
            if i % 3 == 0 {
                arena.remove(*id, &mut root);
                arena.check_invariants(root);
            } else {
                remaining.push(*value);
            }
        }

        remaining.sort_unstable();
        assert_eq!(in_order(&arena, root), remaining);
    }

    #[test]
    fn delete_root_with_two_children() {
        let mut arena = NodeArena::new();
        let mut root = None;

        let ids: Vec<NodeId> = [50, 30, 70, 20, 40, 60, 80]
            .iter()
            .map(|&v| insert_value(&mut arena, &mut root, v))
            .collect();

        arena.remove(ids[0], &mut root);
        arena.check_invariants(root);

        assert_eq!(in_order(&arena, root), vec![20, 30, 40, 60, 70, 80]);
    }

    #[test]
    fn delete_to_empty_reuses_slots() {
        let mut arena = NodeArena::new();
        let mut root = None;

        let ids: Vec<NodeId> = (0..16)
            .map(|v| insert_value(&mut arena, &mut root, v))
            .collect();

        for id in ids {
            arena.remove(id, &mut root);
        }

        assert!(root.is_none());
        assert!(arena.is_empty());

        let id = insert_value(&mut arena, &mut root, 99);
        assert!((id as usize) < 16, "freed slots should be reused");
    }

    #[test]
    fn find_first_equal_lands_on_leftmost() {
        let mut arena = NodeArena::new();
        let mut root = None;

        // keys are value / 10, so 20..30 share key 2
        for v in [5, 12, 21, 24, 27, 33, 41] {
            arena.insert(&mut root, v, |other| {
                (v / 10).cmp(&(other / 10)).then(v.cmp(&other))
            });
        }

        let found = arena.find_first_equal(root, |pos| 2.cmp(&(pos / 10)));
        assert_eq!(arena.row_pos(found.unwrap()), 21);

        let missing = arena.find_first_equal(root, |pos| 7.cmp(&(pos / 10)));
        assert!(missing.is_none());
    }

    #[test]
    fn find_first_greater_equal_rounds_up() {
        let mut arena = NodeArena::new();
        let mut root = None;

        for v in [10, 20, 30, 40] {
            insert_value(&mut arena, &mut root, v);
        }

        let found = arena.find_first_greater_equal(root, |pos| 25.cmp(&pos));
        assert_eq!(arena.row_pos(found.unwrap()), 30);

        let past_end = arena.find_first_greater_equal(root, |pos| 45.cmp(&pos));
        assert!(past_end.is_none());
    }
}
