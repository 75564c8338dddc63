//! The Event Loop and its External Collaborator traits (SPEC_FULL §4.E,
//! §4.F): the piece that turns a stream of terminal/IPC/background events
//! into serialized calls into a `core_keymap::Engine`, grounded on the
//! teacher's `ox-bin::EditorRuntime` dispatch loop.

pub mod collaborators;
pub mod event_loop;

pub use collaborators::{
    ActionHandler, ActionOutcome, BackgroundJobs, Ipc, ModeHooks, NoopCollaborators,
    ProcessControl, Ui,
};
pub use event_loop::EventLoop;
