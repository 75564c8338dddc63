//! Mode Registry: which mode is currently active, and what it's declared to consume.

use crate::error::{KeymapError, Result};

bitflags::bitflags! {
    /// Per-mode flags consulted by the Key Engine (see `engine::Engine::execute`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModeFlags: u8 {
        /// Leading decimal digits at the start of a sequence parse as a count.
        const USES_COUNT = 0b0000_0001;
        /// A leading `"x` parses as a register selector.
        const USES_REGS  = 0b0000_0010;
        /// The mode consumes raw input directly; a short wait is promoted to an
        /// indefinite wait rather than firing on timeout.
        const USES_INPUT = 0b0000_0100;
    }
}

/// A mode is either `Primary` (replaces both the current and "last primary"
/// cursor) or `Secondary` (replaces only the current mode, e.g. a transient
/// overlay entered from a primary mode and expected to return to it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Primary,
    Secondary,
}

/// Tracks the active mode id and the last primary mode, against a fixed table
/// of per-mode flags established at construction.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    flags: Vec<ModeFlags>,
    current: usize,
    primary: usize,
}

impl ModeRegistry {
    pub fn new(flags: Vec<ModeFlags>) -> Self {
        assert!(!flags.is_empty(), "at least one mode must be registered");
        Self {
            flags,
            current: 0,
            primary: 0,
        }
    }

    pub fn num_modes(&self) -> usize {
        self.flags.len()
    }

    pub fn flags(&self, mode: usize) -> Result<ModeFlags> {
        self.flags
            .get(mode)
            .copied()
            .ok_or(KeymapError::UnknownMode(mode))
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn is(&self, mode: usize) -> bool {
        self.current == mode
    }

    pub fn primary(&self) -> usize {
        self.primary
    }

    pub fn primary_is(&self, mode: usize) -> bool {
        self.primary == mode
    }

    pub fn set(&mut self, mode: usize, kind: ModeKind) -> Result<()> {
        if mode >= self.flags.len() {
            return Err(KeymapError::UnknownMode(mode));
        }
        self.current = mode;
        if matches!(kind, ModeKind::Primary) {
            self.primary = mode;
        }
        tracing::debug!(target: "keymap.mode", mode, ?kind, "mode changed");
        Ok(())
    }
}
