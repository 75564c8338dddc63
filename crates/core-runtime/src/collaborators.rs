//! The loop-facing half of the External Collaborators contract (SPEC_FULL
//! §4.F). The engine-facing half (`Registers`, `DefaultHandler`) lives in
//! `core_keymap::collaborators`, since the Key Engine consults those
//! directly; these traits are only ever consulted by [`crate::EventLoop`].

use core_keymap::{KeyInfo, Suggestion};

/// Screen/status-line presentation. `redraw` receives the pending input
/// buffer (already PUA-decoded to a display string by the caller) so the
/// UI can show it the way vi shows a partially typed command.
pub trait Ui {
    fn redraw(&mut self, pending: &str, last_action: Option<&str>);
    fn set_silent(&mut self, silent: bool);
    fn refresh_cursor(&mut self, mode: usize);
    fn show_suggestions(&mut self, items: &[Suggestion]);
    fn clear_suggestions(&mut self);
}

/// Per-mode lifecycle callbacks, run once per loop iteration around
/// dispatch (SPEC_FULL §4.E step 1/7).
pub trait ModeHooks {
    fn pre(&mut self, mode: usize) {
        let _ = mode;
    }
    fn periodic(&mut self, mode: usize) {
        let _ = mode;
    }
    fn post(&mut self, mode: usize) {
        let _ = mode;
    }
}

/// Non-blocking check for externally injected commands (e.g. a scripting
/// front-end). A returned string is fed into the engine as if typed.
pub trait Ipc {
    fn check(&mut self) -> Option<String> {
        None
    }
}

/// Non-blocking check for background work that may need a redraw.
pub trait BackgroundJobs {
    fn check(&mut self) -> bool {
        false
    }
}

/// External process control, consulted on `Ctrl-Z` (SPEC_FULL §4.E step 5).
/// The Event Loop itself never touches terminal/signal state; it just
/// delegates the stop request and keeps running once the collaborator
/// returns (e.g. after `SIGCONT`).
pub trait ProcessControl {
    fn suspend(&mut self) {}
}

/// What happened after a successfully dispatched action, reported back to
/// the Event Loop so it knows whether to keep running and which mode to
/// resolve the next keypress against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub quit: bool,
    pub switch_mode: Option<usize>,
}

impl ActionOutcome {
    pub fn continue_running() -> Self {
        Self::default()
    }

    pub fn quit() -> Self {
        Self {
            quit: true,
            switch_mode: None,
        }
    }

    /// Continue running, but resolve subsequent keypresses against `mode`
    /// (e.g. `:` entering Command mode, `Esc` leaving it).
    pub fn switch_mode(mode: usize) -> Self {
        Self {
            quit: false,
            switch_mode: Some(mode),
        }
    }
}

/// Carries out a dispatched action. `H` is the same caller-defined payload
/// type the `Engine<H>` was built with; this is the seam between syntax
/// resolution (the engine) and semantic execution (this trait),
/// per SPEC_FULL's framing of the Key Engine's purpose.
pub trait ActionHandler<H> {
    fn handle(&mut self, mode: usize, action: H, selector: Option<H>, key_info: &KeyInfo)
    -> ActionOutcome;

    /// Invoked when the trie has no entry for the current prefix and no
    /// default handler consumed it either. The default no-op drops the
    /// character, matching vi's behavior for unmapped keys in most modes.
    fn handle_unknown(&mut self, mode: usize, buffer: &[char]) {
        let _ = (mode, buffer);
    }
}

/// A `ModeHooks`/`Ipc`/`BackgroundJobs` that does nothing, for demo/test
/// wiring that doesn't need any of these collaborators.
#[derive(Default)]
pub struct NoopCollaborators;

impl ModeHooks for NoopCollaborators {}
impl Ipc for NoopCollaborators {}
impl BackgroundJobs for NoopCollaborators {}
impl ProcessControl for NoopCollaborators {}
