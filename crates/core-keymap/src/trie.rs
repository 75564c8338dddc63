//! Key Chunk Trie (SPEC_FULL §3, §4.B): an arena of [`Chunk`]s addressed by
//! [`ChunkId`], replacing `engine/keys.c`'s hand-linked `key_chunk_t` tree
//! with index-based ownership while keeping the same sorted-sibling-list and
//! deferred-free shape.

use crate::chunk::{Chunk, ChunkAction, ChunkConfig, ChunkFlags, ChunkId, ChunkKind, FollowedBy};
use crate::error::{KeymapError, Result};

/// Owns every chunk reachable from any root handed out by [`Trie::new_root`].
/// A single arena is shared across every mode and tree kind (builtin/user/
/// selector) so root handles are cheap, freely comparable `ChunkId`s.
#[derive(Debug, Default)]
pub struct Trie<H> {
    nodes: Vec<Chunk<H>>,
}

impl<H> Trie<H> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn new_root(&mut self) -> ChunkId {
        let id = ChunkId(self.nodes.len() as u32);
        self.nodes.push(Chunk::new_root());
        id
    }

    pub fn get(&self, id: ChunkId) -> &Chunk<H> {
        &self.nodes[id.0 as usize]
    }

    fn get_mut(&mut self, id: ChunkId) -> &mut Chunk<H> {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn find_child(&self, parent: ChunkId, value: char) -> Option<ChunkId> {
        let mut cur = self.get(parent).child;
        while let Some(id) = cur {
            let node = self.get(id);
            if node.value == value {
                return Some(id);
            }
            if node.value > value {
                return None;
            }
            cur = node.next;
        }
        None
    }

    /// Find or create the child of `parent` keyed by `value`, keeping the
    /// sibling list sorted by `value` ascending.
    fn child_or_insert(&mut self, parent: ChunkId, value: char) -> ChunkId {
        if let Some(existing) = self.find_child(parent, value) {
            return existing;
        }
        let new_id = ChunkId(self.nodes.len() as u32);
        self.nodes.push(Chunk::new_waypoint(value, parent));

        // Find insertion point among sorted siblings.
        let mut prev: Option<ChunkId> = None;
        let mut cur = self.get(parent).child;
        while let Some(id) = cur {
            if self.get(id).value > value {
                break;
            }
            prev = Some(id);
            cur = self.get(id).next;
        }

        self.get_mut(new_id).prev = prev;
        self.get_mut(new_id).next = cur;
        match prev {
            Some(p) => self.get_mut(p).next = Some(new_id),
            None => self.get_mut(parent).child = Some(new_id),
        }
        if let Some(next) = cur {
            self.get_mut(next).prev = Some(new_id);
        }
        new_id
    }

    /// Walk (creating intermediate wait points as needed) from `root` along
    /// `sequence`, install a terminal at the end, and return its id.
    ///
    /// Overwrites an existing terminal's configuration in place (freeing its
    /// previous RHS, if any) rather than erroring — this matches `keys.c`'s
    /// `add_cmd` semantics, where re-registering a sequence replaces it.
    pub fn add(
        &mut self,
        root: ChunkId,
        sequence: &[char],
        kind: ChunkKind,
        followed_by: FollowedBy,
        flags: ChunkFlags,
        config: ChunkConfig<H>,
    ) -> Result<ChunkId> {
        if sequence.is_empty() {
            return Err(KeymapError::EmptySequence);
        }
        let mut cur = root;
        for &ch in sequence {
            cur = self.child_or_insert(cur, ch);
        }
        let was_terminal = self.get(cur).is_terminal();
        {
            let node = self.get_mut(cur);
            node.kind = kind;
            node.followed_by = followed_by;
            node.flags = flags;
            node.config = Some(config);
        }
        if !was_terminal {
            self.bump_children_count(cur, 1);
        }
        Ok(cur)
    }

    fn bump_children_count(&mut self, mut node: ChunkId, delta: i32) {
        loop {
            let n = self.get_mut(node);
            n.children_count = (n.children_count as i32 + delta).max(0) as u32;
            match self.get(node).parent {
                Some(p) => node = p,
                None => break,
            }
        }
    }

    pub fn find(&self, root: ChunkId, sequence: &[char]) -> Option<ChunkId> {
        let mut cur = root;
        for &ch in sequence {
            cur = self.find_child(cur, ch)?;
        }
        Some(cur)
    }

    /// Remove the mapping terminating at `sequence`. If the node is currently
    /// active (`enters > 0`), the removal is deferred: the node is marked
    /// `deleted` and only unlinked once the last activation exits via
    /// [`crate::engine::EnterGuard`].
    pub fn remove(&mut self, root: ChunkId, sequence: &[char]) -> Result<()> {
        let id = self
            .find(root, sequence)
            .filter(|id| self.get(*id).is_terminal())
            .ok_or_else(|| KeymapError::NotFound(sequence.to_vec()))?;

        self.get_mut(id).config = None;
        self.get_mut(id).kind = ChunkKind::WaitPoint;
        self.bump_children_count(id, -1);

        if self.get(id).enters > 0 {
            self.get_mut(id).deleted = true;
            return Ok(());
        }
        self.unlink_if_empty(id);
        Ok(())
    }

    /// Physically unlinks `node` and walks up, removing now-empty
    /// intermediate wait points, stopping at the first ancestor that still
    /// has children or is itself a root (`parent.is_none()`... actually a
    /// root has `parent: None` and is never unlinked).
    pub(crate) fn unlink_if_empty(&mut self, node: ChunkId) {
        let mut cur = node;
        loop {
            let n = self.get(cur);
            if n.is_terminal() || n.child.is_some() || n.parent.is_none() || n.enters > 0 {
                break;
            }
            let parent = n.parent.unwrap();
            let prev = n.prev;
            let next = n.next;
            if let Some(p) = prev {
                self.get_mut(p).next = next;
            } else {
                self.get_mut(parent).child = next;
            }
            if let Some(nx) = next {
                self.get_mut(nx).prev = prev;
            }
            cur = parent;
        }
    }

    /// Increment the re-entrancy counter of `node`. Paired with
    /// [`Trie::leave`]; see `engine.rs` for why this is a pair of plain
    /// methods rather than an RAII guard spanning a recursive call.
    pub(crate) fn enter(&mut self, node: ChunkId) {
        self.get_mut(node).enters += 1;
    }

    /// Decrement the re-entrancy counter of `node`, performing the deferred
    /// unlink if it was marked `deleted` while active and this was the last
    /// activation.
    pub(crate) fn leave(&mut self, node: ChunkId) {
        let n = self.get_mut(node);
        n.enters = n.enters.saturating_sub(1);
        if n.enters == 0 && n.deleted {
            self.unlink_if_empty(node);
        }
    }

    /// Whether any direct child of `node` is NIM-eligible. Used by the walk
    /// to decide whether an unmatched digit at this position should be
    /// parsed as an in-sequence count rather than rejected (SPEC_FULL §4.C
    /// "NIM": the scan order over already-visited siblings at this depth is
    /// what matters, not the current node's own kind).
    pub(crate) fn has_nim_child(&self, node: ChunkId) -> bool {
        let mut cur = self.get(node).child;
        while let Some(id) = cur {
            if self.get(id).is_nim() {
                return true;
            }
            cur = self.get(id).next;
        }
        false
    }

    pub fn exists(&self, root: ChunkId, sequence: &[char]) -> bool {
        self.find(root, sequence)
            .is_some_and(|id| self.get(id).is_terminal())
    }

    /// Depth-first enumeration of every terminal reachable from `root`,
    /// calling `cb(lhs, chunk)` with the accumulated key sequence.
    pub fn traverse(&self, root: ChunkId, cb: &mut dyn FnMut(&[char], &Chunk<H>)) {
        let mut prefix = Vec::new();
        self.traverse_inner(root, &mut prefix, cb);
    }

    fn traverse_inner(
        &self,
        node: ChunkId,
        prefix: &mut Vec<char>,
        cb: &mut dyn FnMut(&[char], &Chunk<H>),
    ) {
        let mut cur = self.get(node).child;
        while let Some(id) = cur {
            let n = self.get(id);
            prefix.push(n.value);
            if n.is_terminal() {
                cb(prefix, n);
            }
            if n.child.is_some() {
                self.traverse_inner(id, prefix, cb);
            }
            prefix.pop();
            cur = n.next;
        }
    }
}

impl<H: Clone> Trie<H> {
    /// Config accessor for places (engine composition) that need an owned
    /// clone of a terminal's action without borrowing the arena across calls.
    pub fn action_of(&self, node: ChunkId) -> Option<ChunkAction<H>> {
        self.get(node).config.as_ref().map(|c| c.action.clone())
    }
}

impl<H> Clone for ChunkAction<H>
where
    H: Clone,
{
    fn clone(&self) -> Self {
        match self {
            ChunkAction::Handler(h) => ChunkAction::Handler(h.clone()),
            ChunkAction::Rhs(v) => ChunkAction::Rhs(v.clone()),
        }
    }
}
