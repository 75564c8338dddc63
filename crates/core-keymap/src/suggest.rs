//! Suggestion Engine (SPEC_FULL §4.D): enumerates completions for a partial
//! key sequence. The actual trie walk and fold decision live on
//! `Engine::suggest` (folding is judged per child against that child's own
//! subtree size, which needs the trie in hand); this module just holds the
//! output shape.

/// One candidate completion, or a folded summary of several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    Entry {
        lhs: Vec<char>,
        description: Option<String>,
        is_selector: bool,
    },
    /// An intermediate branch whose own subtree is wider than
    /// `fold_threshold`, collapsed into one summary row instead of listing
    /// every descendant (SPEC_FULL §4.D).
    Folded { prefix: Vec<char>, count: usize },
}
