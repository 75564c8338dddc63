//! The engine-facing half of the External Collaborators contract
//! (SPEC_FULL §4.F). The loop-facing half (`Ui`, `ModeHooks`, `Ipc`,
//! `BackgroundJobs`, `InputSource`) lives in `core-runtime`, since those are
//! consulted by the Event Loop, not the Key Engine itself.

/// Named-register storage. The engine only ever carries a register name
/// (`KeyInfo::register`) through resolution; reading/writing the register's
/// contents is entirely this trait's responsibility.
pub trait Registers {
    fn get(&self, name: char) -> Option<&str>;
    fn set(&mut self, name: char, contents: String);
    /// The register implicitly selected when no `"x` prefix was given.
    fn unnamed(&self) -> char {
        '"'
    }
}

/// Per-mode fallback for characters the trie cannot interpret
/// (`Dispatch::Unknown`). Optional: a mode with no default handler simply
/// drops the character.
pub trait DefaultHandler {
    /// Returns `true` if the character was consumed/handled.
    fn handle(&mut self, mode: usize, ch: char) -> bool;
}

/// A `DefaultHandler` that never consumes input, for modes with none.
pub struct NoopDefaultHandler;

impl DefaultHandler for NoopDefaultHandler {
    fn handle(&mut self, _mode: usize, _ch: char) -> bool {
        false
    }
}

#[derive(Default)]
pub struct InMemoryRegisters {
    slots: std::collections::HashMap<char, String>,
}

impl Registers for InMemoryRegisters {
    fn get(&self, name: char) -> Option<&str> {
        self.slots.get(&name).map(String::as_str)
    }

    fn set(&mut self, name: char, contents: String) {
        self.slots.insert(name, contents);
    }
}
