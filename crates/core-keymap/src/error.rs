use thiserror::Error;

/// Failures surfaced by trie mutation and mode registry operations.
///
/// Resolution itself never returns an error: an unrecognized or partial
/// sequence is communicated through [`crate::engine::Dispatch`], not `Result`.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KeymapError {
    #[error("mode {0} is out of range")]
    UnknownMode(usize),
    #[error("mapping for {0:?} already exists")]
    DuplicateMapping(Vec<char>),
    #[error("no mapping found for {0:?}")]
    NotFound(Vec<char>),
    #[error("trie arena capacity exceeded")]
    CapacityExceeded,
    #[error("empty key sequence")]
    EmptySequence,
}

pub type Result<T> = std::result::Result<T, KeymapError>;
