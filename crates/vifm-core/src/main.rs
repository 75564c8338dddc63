//! vifm-core entrypoint.
//!
//! Wires the async input/tick event sources, Config-driven mode flags, and
//! a demonstration Normal/Command key-dispatch table into a
//! `core_runtime::EventLoop`. The Key Engine itself (syntax resolution) and
//! the Event Loop (scheduling) are both generic over what actions mean;
//! this binary is where that meaning finally gets attached.

use anyhow::Result;
use clap::Parser;
use core_config::load_from;
use core_events::{EVENT_CHANNEL_CAP, Event, EventSourceRegistry, TickEventSource};
use core_keymap::{
    ChunkFlags, Engine, FollowedBy, InMemoryRegisters, KeyInfo, ModeFlags, Registers, Suggestion,
    key,
};
use core_runtime::{ActionHandler, ActionOutcome, EventLoop, NoopCollaborators, Ui};
use core_terminal::{CrosstermBackend, TerminalBackend};
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

const NORMAL: usize = 0;
const COMMAND: usize = 1;
const UI_REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// Demonstration action payload the Key Engine is generic over (`H` in
/// `core_keymap::Engine<H>`): syntax resolution lives entirely in
/// `core-keymap`, these are just the caller-defined semantics it resolves
/// sequences *to*.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    MoveLeft,
    MoveDown,
    MoveUp,
    MoveRight,
    WordForward,
    WordBack,
    LineStart,
    LineEnd,
    Delete,
    Yank,
    Change,
    DeleteLine,
    YankLine,
    ChangeLine,
    GotoTop,
    GotoLine,
    PasteAfter,
    PasteBefore,
    Undo,
    EnterCommand,
    CommandExecute,
    CommandCancel,
}

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "vifm-core", version, about = "Modal key-dispatch input engine")]
struct Args {
    /// Optional configuration file path (overrides discovery of `vifm-core.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

struct AppStartup {
    backend: CrosstermBackend,
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self {
            backend: CrosstermBackend::new(),
            log_guard: None,
        }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("vifm-core.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "vifm-core.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => self.log_guard = Some(guard),
            Err(_err) => {
                // Global tracing subscriber already installed (e.g. under a
                // harness); drop the guard so the writer shuts down cleanly.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Builds the two-mode Normal/Command table this binary demonstrates:
/// motions that double as selectors, operators awaiting a selector,
/// linewise doubling (`dd`/`yy`/`cc`), a NIM `g`-prefix (`gg`, `g<N>j`),
/// paste/undo, the register prefix (`"a`, config-enabled on Normal), and
/// one user mapping (`jk`) exiting Command mode the way it exits Insert
/// mode in vi.
fn build_engine() -> Engine<Action> {
    let mut engine = Engine::new(vec![
        ModeFlags::USES_COUNT | ModeFlags::USES_REGS,
        ModeFlags::USES_INPUT,
    ]);

    let motions: &[(char, Action)] = &[
        ('h', Action::MoveLeft),
        ('j', Action::MoveDown),
        ('k', Action::MoveUp),
        ('l', Action::MoveRight),
        ('w', Action::WordForward),
        ('b', Action::WordBack),
        ('0', Action::LineStart),
        ('$', Action::LineEnd),
    ];
    for (ch, action) in motions {
        engine
            .add_builtin(NORMAL, &[*ch], FollowedBy::None, ChunkFlags::empty(), action.clone(), None)
            .expect("motion registration");
        engine
            .add_selector(NORMAL, &[*ch], action.clone(), None)
            .expect("motion selector registration");
    }

    let operators: &[(char, Action, Action)] = &[
        ('d', Action::Delete, Action::DeleteLine),
        ('y', Action::Yank, Action::YankLine),
        ('c', Action::Change, Action::ChangeLine),
    ];
    for (ch, op, doubled) in operators {
        engine
            .add_builtin(
                NORMAL,
                &[*ch],
                FollowedBy::Selector,
                ChunkFlags::empty(),
                op.clone(),
                Some("operator over selector"),
            )
            .expect("operator registration");
        engine
            .add_builtin(
                NORMAL,
                &[*ch, *ch],
                FollowedBy::None,
                ChunkFlags::empty(),
                doubled.clone(),
                Some("linewise"),
            )
            .expect("linewise doubling registration");
    }

    engine
        .add_builtin(
            NORMAL,
            &['g', 'g'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::GotoTop,
            Some("go to top"),
        )
        .expect("gg registration");
    engine
        .add_selector(NORMAL, &['g', 'g'], Action::GotoTop, None)
        .expect("gg selector registration");
    engine
        .add_nim_builtin(
            NORMAL,
            &['g', 'j'],
            ChunkFlags::empty(),
            Action::GotoLine,
            Some("go to line N"),
        )
        .expect("g<N>j registration");

    engine
        .add_builtin(NORMAL, &['p'], FollowedBy::None, ChunkFlags::empty(), Action::PasteAfter, Some("paste after"))
        .expect("p registration");
    engine
        .add_builtin(NORMAL, &['P'], FollowedBy::None, ChunkFlags::empty(), Action::PasteBefore, Some("paste before"))
        .expect("P registration");
    engine
        .add_builtin(NORMAL, &['u'], FollowedBy::None, ChunkFlags::empty(), Action::Undo, Some("undo"))
        .expect("u registration");
    engine
        .add_builtin(
            NORMAL,
            &[':'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::EnterCommand,
            Some("enter command-line mode"),
        )
        .expect(": registration");

    engine
        .add_builtin(COMMAND, &[key::ESC], FollowedBy::None, ChunkFlags::empty(), Action::CommandCancel, None)
        .expect("command esc registration");
    engine
        .add_builtin(
            COMMAND,
            &[key::encode(&core_events::KeyToken::Named(core_events::NamedKey::Enter), core_events::ModMask::empty())],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::CommandExecute,
            None,
        )
        .expect("command enter registration");
    engine
        .add_user(COMMAND, &['j', 'k'], vec![key::ESC], ChunkFlags::empty())
        .expect("jk mapping registration");

    engine
}

/// Carries out the demonstration actions: logs what happened, and threads
/// register reads/writes through `Registers` so `"ayy` / `"ap` round-trip
/// (SPEC_FULL §4.F).
struct DemoHandler {
    registers: InMemoryRegisters,
    command_buffer: String,
}

impl DemoHandler {
    fn new() -> Self {
        Self {
            registers: InMemoryRegisters::default(),
            command_buffer: String::new(),
        }
    }

    fn register_of(&self, key_info: &KeyInfo) -> char {
        key_info.register.unwrap_or_else(|| self.registers.unnamed())
    }
}

impl ActionHandler<Action> for DemoHandler {
    fn handle(&mut self, _mode: usize, action: Action, selector: Option<Action>, key_info: &KeyInfo) -> ActionOutcome {
        match &action {
            Action::MoveLeft
            | Action::MoveDown
            | Action::MoveUp
            | Action::MoveRight
            | Action::WordForward
            | Action::WordBack
            | Action::LineStart
            | Action::LineEnd => {
                debug!(target: "demo.motion", ?action, count = ?key_info.count, "motion");
                ActionOutcome::continue_running()
            }
            Action::Delete | Action::DeleteLine => {
                let reg = self.register_of(key_info);
                self.registers.set(reg, format!("{action:?} selector={selector:?}"));
                info!(target: "demo.edit", register = reg, count = ?key_info.count, "delete");
                ActionOutcome::continue_running()
            }
            Action::Yank | Action::YankLine => {
                let reg = self.register_of(key_info);
                self.registers.set(reg, format!("{action:?} selector={selector:?}"));
                info!(target: "demo.edit", register = reg, count = ?key_info.count, "yank");
                ActionOutcome::continue_running()
            }
            Action::Change | Action::ChangeLine => {
                let reg = self.register_of(key_info);
                self.registers.set(reg, format!("{action:?} selector={selector:?}"));
                info!(target: "demo.edit", register = reg, count = ?key_info.count, "change");
                ActionOutcome::continue_running()
            }
            Action::GotoTop | Action::GotoLine => {
                info!(target: "demo.motion", ?action, count = ?key_info.count, "goto");
                ActionOutcome::continue_running()
            }
            Action::PasteAfter | Action::PasteBefore => {
                let reg = self.register_of(key_info);
                let contents = self.registers.get(reg).unwrap_or("").to_string();
                info!(target: "demo.edit", register = reg, %contents, "paste");
                ActionOutcome::continue_running()
            }
            Action::Undo => {
                info!(target: "demo.edit", "undo");
                ActionOutcome::continue_running()
            }
            Action::EnterCommand => {
                self.command_buffer.clear();
                ActionOutcome::switch_mode(COMMAND)
            }
            Action::CommandExecute => {
                info!(target: "demo.command", command = %self.command_buffer, "execute");
                self.command_buffer.clear();
                ActionOutcome::switch_mode(NORMAL)
            }
            Action::CommandCancel => {
                self.command_buffer.clear();
                ActionOutcome::switch_mode(NORMAL)
            }
        }
    }

    fn handle_unknown(&mut self, mode: usize, buffer: &[char]) {
        if mode != COMMAND {
            return;
        }
        for &ch in buffer {
            if let key::DecodedKey::Plain(c) = key::decode(ch) {
                self.command_buffer.push(c);
            }
        }
    }
}

/// Status-line UI: renders the pending buffer and the last dispatched
/// action's count to row 0 of the terminal.
struct StatusLineUi {
    mode_name: &'static str,
}

impl StatusLineUi {
    fn new() -> Self {
        Self { mode_name: "NORMAL" }
    }
}

impl Ui for StatusLineUi {
    fn redraw(&mut self, pending: &str, last_action: Option<&str>) {
        use crossterm::QueueableCommand;
        use crossterm::cursor::MoveTo;
        use crossterm::style::Print;
        use crossterm::terminal::{Clear, ClearType};

        let last = last_action.unwrap_or("-");
        let line = format!("-- {} -- pending={pending:?} last_count={last}", self.mode_name);
        let mut out = stdout();
        let _ = out.queue(MoveTo(0, 0));
        let _ = out.queue(Clear(ClearType::CurrentLine));
        let _ = out.queue(Print(line));
        let _ = out.flush();
    }

    fn set_silent(&mut self, _silent: bool) {}

    fn refresh_cursor(&mut self, mode: usize) {
        self.mode_name = if mode == COMMAND { "COMMAND" } else { "NORMAL" };
    }

    fn show_suggestions(&mut self, items: &[Suggestion]) {
        debug!(target: "demo.suggest", count = items.len(), "suggestions");
    }

    fn clear_suggestions(&mut self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging()?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let args = Args::parse();
    let config = load_from(args.config)?;

    startup.backend.set_title("vifm-core")?;
    let _guard = startup.backend.enter_guard()?;

    let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);

    let (_input_task, _input_shutdown) = core_input::spawn_async_input(tx.clone());

    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(Duration::from_millis(250)));
    let _event_source_handles = registry.spawn_all(&tx);

    {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(UI_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                if tx.send(Event::RenderRequested).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let engine = build_engine();
    let event_loop = EventLoop::new(
        engine,
        NORMAL,
        config,
        rx,
        Box::new(StatusLineUi::new()),
        Box::new(NoopCollaborators),
        Box::new(NoopCollaborators),
        Box::new(NoopCollaborators),
        Box::new(NoopCollaborators),
        Box::new(DemoHandler::new()),
    );

    event_loop.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::Config;
    use core_events::{CommandEvent, KeyEventExt, KeyToken};
    use core_keymap::Dispatch;

    fn feed(engine: &mut Engine<Action>, mode: usize, s: &str) -> Dispatch<Action> {
        let buf: Vec<char> = s.chars().collect();
        engine.execute(mode, &buf)
    }

    #[test]
    fn gg_goes_to_top() {
        let mut engine = build_engine();
        match feed(&mut engine, NORMAL, "gg") {
            Dispatch::Ok(d) => assert_eq!(d.action, Action::GotoTop),
            other => panic!("expected GotoTop, got {other:?}"),
        }
    }

    #[test]
    fn delete_with_word_selector() {
        let mut engine = build_engine();
        match feed(&mut engine, NORMAL, "dw") {
            Dispatch::Ok(d) => {
                assert_eq!(d.action, Action::Delete);
                assert_eq!(d.selector, Some(Action::WordForward));
            }
            other => panic!("expected Delete+WordForward selector, got {other:?}"),
        }
    }

    #[test]
    fn count_and_nim_multiply_on_goto_line() {
        let mut engine = build_engine();
        match feed(&mut engine, NORMAL, "3g5j") {
            Dispatch::Ok(d) => {
                assert_eq!(d.action, Action::GotoLine);
                assert_eq!(d.key_info.count, Some(15));
            }
            other => panic!("expected GotoLine count=15, got {other:?}"),
        }
    }

    #[test]
    fn register_and_count_on_linewise_delete() {
        let mut engine = build_engine();
        match feed(&mut engine, NORMAL, "\"a2dd") {
            Dispatch::Ok(d) => {
                assert_eq!(d.action, Action::DeleteLine);
                assert_eq!(d.key_info.register, Some('a'));
                assert_eq!(d.key_info.count, Some(2));
            }
            other => panic!("expected DeleteLine register=a count=2, got {other:?}"),
        }
    }

    #[test]
    fn suggestions_past_the_g_prefix_stay_unfolded() {
        let engine = build_engine();
        // "g" has two continuations (`gg`, `g<N>j`), but both are leaf
        // commands with no children of their own, so even a fold threshold
        // of 1 must list them separately rather than folding the prefix.
        let items = engine.suggest(NORMAL, &['g'], 1, false);
        assert!(
            !items.iter().any(|s| matches!(s, core_keymap::Suggestion::Folded { .. })),
            "leaf continuations of g must never fold, got {items:?}"
        );
        assert_eq!(
            items
                .iter()
                .filter(|s| matches!(s, core_keymap::Suggestion::Entry { .. }))
                .count(),
            2,
            "expected gg and g<N>j as two separate entries, got {items:?}"
        );
    }

    #[test]
    fn yank_then_paste_round_trips_through_registers() {
        let mut handler = DemoHandler::new();
        let key_info = KeyInfo {
            count: None,
            register: Some('a'),
            multi: None,
        };
        handler.handle(NORMAL, Action::YankLine, None, &key_info);
        handler.handle(NORMAL, Action::PasteAfter, None, &key_info);
        assert_eq!(handler.registers.get('a'), Some("YankLine selector=None"));
    }

    #[tokio::test]
    async fn colon_then_jk_returns_to_normal_mode() {
        let (tx, rx) = mpsc::channel(32);
        let event_loop = EventLoop::new(
            build_engine(),
            NORMAL,
            Config::default(),
            rx,
            Box::new(StatusLineUiStub),
            Box::new(NoopCollaborators),
            Box::new(NoopCollaborators),
            Box::new(NoopCollaborators),
            Box::new(NoopCollaborators),
            Box::new(DemoHandler::new()),
        );

        for ch in [':', 'j', 'k'] {
            tx.send(Event::Input(core_events::InputEvent::KeyPress(KeyEventExt::new(KeyToken::Char(ch)))))
                .await
                .unwrap();
        }
        tx.send(Event::Command(CommandEvent::Quit)).await.unwrap();

        let event_loop = event_loop.run().await.unwrap();
        assert_eq!(event_loop.mode(), NORMAL);
    }

    /// A `Ui` that does nothing, for tests that only care about dispatch
    /// outcomes, not terminal output.
    struct StatusLineUiStub;

    impl Ui for StatusLineUiStub {
        fn redraw(&mut self, _pending: &str, _last_action: Option<&str>) {}
        fn set_silent(&mut self, _silent: bool) {}
        fn refresh_cursor(&mut self, _mode: usize) {}
        fn show_suggestions(&mut self, _items: &[Suggestion]) {}
        fn clear_suggestions(&mut self) {}
    }
}
