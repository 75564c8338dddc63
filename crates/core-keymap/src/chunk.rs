//! Arena-backed key chunk: the Rust realization of vifm's `key_chunk_t`
//! (`engine/keys.c`), minus the hand-managed pointers.

/// Handle into a [`crate::trie::Trie`]'s arena. Stable for the lifetime of the
/// node (indices of removed nodes are never reused within the same arena,
/// trading a little memory for never needing generation counters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Intermediate node; no action of its own, just a waypoint to children.
    WaitPoint,
    /// Leaf with a native handler payload.
    Builtin,
    /// A builtin that may be followed by a decimal count embedded mid-sequence
    /// ("number in the middle").
    Nim,
    /// Leaf holding a right-hand-side sequence to be re-fed into the engine.
    UserMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowedBy {
    None,
    /// Exactly one more arbitrary character is consumed (e.g. `f<x>`).
    Multikey,
    /// A full sub-sequence from the mode's selector tree follows (e.g. `d<motion>`).
    Selector,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChunkFlags: u8 {
        /// User-installed but treated as a builtin for remap purposes.
        const FOREIGN  = 0b0000_0001;
        /// Don't recurse into user mappings while executing this node's RHS.
        const NO_REMAP = 0b0000_0010;
        /// Suppress UI updates while this node's RHS runs.
        const SILENT   = 0b0000_0100;
        /// Force an indefinite wait instead of a short one on ambiguous prefixes.
        const WAIT     = 0b0000_1000;
    }
}

/// Payload carried by a terminal (`Builtin`/`Nim`/`UserMapping`) chunk.
#[derive(Debug, Clone)]
pub enum ChunkAction<H> {
    Handler(H),
    /// Right-hand side of a user mapping, in already-encoded `char`s.
    Rhs(Vec<char>),
}

#[derive(Debug, Clone)]
pub struct ChunkConfig<H> {
    pub action: ChunkAction<H>,
    pub description: Option<String>,
    /// Omit this node from suggestion enumeration even though it's a valid leaf.
    pub skip_suggestion: bool,
}

/// One node of a key chunk trie.
#[derive(Debug, Clone)]
pub struct Chunk<H> {
    pub value: char,
    pub kind: ChunkKind,
    pub followed_by: FollowedBy,
    pub flags: ChunkFlags,
    pub config: Option<ChunkConfig<H>>,
    pub parent: Option<ChunkId>,
    pub child: Option<ChunkId>,
    pub prev: Option<ChunkId>,
    pub next: Option<ChunkId>,
    /// Count of reachable terminal descendants, maintained incrementally.
    pub children_count: u32,
    /// Re-entrancy counter; the node cannot be physically freed while this is
    /// nonzero even if it has been logically removed (`deleted`).
    pub enters: u32,
    pub deleted: bool,
}

impl<H> Chunk<H> {
    pub(crate) fn new_root() -> Self {
        Self {
            value: '\0',
            kind: ChunkKind::WaitPoint,
            followed_by: FollowedBy::None,
            flags: ChunkFlags::empty(),
            config: None,
            parent: None,
            child: None,
            prev: None,
            next: None,
            children_count: 0,
            enters: 0,
            deleted: false,
        }
    }

    pub(crate) fn new_waypoint(value: char, parent: ChunkId) -> Self {
        Self {
            value,
            parent: Some(parent),
            ..Self::new_root()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.config.is_some()
    }

    pub fn is_nim(&self) -> bool {
        matches!(self.kind, ChunkKind::Nim)
    }
}
