//! Key Engine (SPEC_FULL §4.C): resolves a buffered stream of encoded `char`s
//! against a mode's trees, expanding user mappings and selectors, and reports
//! either a decisive dispatch or a wait signal back to the Event Loop.
//!
//! The engine is deliberately generic over the builtin payload type `H`: it
//! knows nothing about what a "delete" or "goto top" *does*, only how to
//! recognize and compose key sequences into `H` values and hand them back.
//! Executing the resulting action is the caller's responsibility (mirroring
//! how `core-keymap::resolve` and `dispatcher::dispatch` stay separate
//! concerns in the teacher's crate split).

use crate::chunk::{ChunkAction, ChunkConfig, ChunkFlags, ChunkId, ChunkKind, FollowedBy};
use crate::error::Result;
use crate::key::ESC;
use crate::mode::{ModeFlags, ModeRegistry};
use crate::trie::Trie;

/// `NO_COUNT_GIVEN` from SPEC_FULL §3 is represented as `Option::None`
/// throughout this crate; no sentinel integer is needed in Rust.
pub type Count = Option<u32>;

fn combine_count(outer: Count, inner: Count) -> Count {
    match (outer, inner) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(a.saturating_mul(b)),
    }
}

/// Per-dispatch metadata handed back alongside the resolved action(s).
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyInfo {
    pub count: Count,
    pub register: Option<char>,
    pub multi: Option<char>,
}

/// Flags describing the circumstances of a particular resolution pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeysInfo {
    pub selector: bool,
    pub after_wait: bool,
    /// True only while literally replaying a user mapping's RHS.
    pub mapped: bool,
    /// True for the trailing, post-RHS suffix of a mapping's synthetic
    /// buffer (kept distinct from `mapped` per SPEC_FULL §9.1 Open Question 1).
    pub mapped_suffix: bool,
    pub recursive: bool,
}

/// A fully resolved dispatch: the builtin (or mapping-expanded) action, plus
/// an optional selector action when the node was `followed_by = Selector`.
#[derive(Debug, Clone)]
pub struct Dispatched<H> {
    pub action: H,
    pub selector: Option<H>,
    pub key_info: KeyInfo,
    pub keys_info: KeysInfo,
    /// Number of characters of the input buffer this dispatch consumed.
    pub consumed: usize,
    /// True if this dispatch passed through a `silent` user mapping
    /// (`ChunkFlags::SILENT`): the Event Loop should suppress UI updates
    /// for the duration of the handler call (SPEC_FULL §4.C step 7).
    pub silent: bool,
}

/// Result of a single `execute*` call.
#[derive(Debug, Clone)]
pub enum Dispatch<H> {
    Ok(Dispatched<H>),
    /// The prefix cannot be interpreted by either tree.
    Unknown,
    /// No action yet; wait indefinitely for more input.
    Wait,
    /// At least one continuation exists; wait briefly, then re-call as
    /// `execute_timed_out` if nothing more arrives.
    WaitShort,
    /// Register selection was cancelled (`Esc`/`Ctrl-C` in register position).
    /// Treated as a successful no-op dispatch; the buffer should still be
    /// cleared up to `consumed`.
    Cancelled { consumed: usize },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Tree {
    Builtin,
    User,
    Selector,
}

enum WalkOutcome {
    Matched {
        node: ChunkId,
        end: usize,
        nim_count: Count,
    },
    /// Buffer exhausted at a genuine `WaitPoint` (no handler registered at
    /// this prefix yet). Carries the node so the caller can check whether
    /// waiting here should be indefinite (`needs_waiting`).
    NeedMore {
        node: ChunkId,
    },
    NoMatch,
}

/// Owns every mode's trees plus the process-wide (per-`Engine`-instance, see
/// SPEC_FULL §3.1) counters. One instance per application; never a process
/// global.
pub struct Engine<H> {
    trie: Trie<H>,
    builtin_roots: Vec<ChunkId>,
    user_roots: Vec<ChunkId>,
    selector_roots: Vec<ChunkId>,
    modes: ModeRegistry,
    counter: u64,
    enters_counter: u32,
    enter_seq: u64,
    mapping_state: u64,
    mapping_enter_seq: u64,
}

impl<H: Clone> Engine<H> {
    pub fn new(mode_flags: Vec<ModeFlags>) -> Self {
        let n = mode_flags.len();
        let mut trie = Trie::new();
        let builtin_roots = (0..n).map(|_| trie.new_root()).collect();
        let user_roots = (0..n).map(|_| trie.new_root()).collect();
        let selector_roots = (0..n).map(|_| trie.new_root()).collect();
        Self {
            trie,
            builtin_roots,
            user_roots,
            selector_roots,
            modes: ModeRegistry::new(mode_flags),
            counter: 0,
            enters_counter: 0,
            enter_seq: 0,
            mapping_state: 0,
            mapping_enter_seq: 0,
        }
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.modes
    }

    pub fn modes_mut(&mut self) -> &mut ModeRegistry {
        &mut self.modes
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn mapping_state(&self) -> u64 {
        self.mapping_state
    }

    fn root(&self, mode: usize, tree: Tree) -> ChunkId {
        match tree {
            Tree::Builtin => self.builtin_roots[mode],
            Tree::User => self.user_roots[mode],
            Tree::Selector => self.selector_roots[mode],
        }
    }

    // -- registration ----------------------------------------------------

    pub fn add_builtin(
        &mut self,
        mode: usize,
        sequence: &[char],
        followed_by: FollowedBy,
        flags: ChunkFlags,
        action: H,
        description: Option<&str>,
    ) -> Result<()> {
        self.modes.flags(mode)?;
        self.trie.add(
            self.root(mode, Tree::Builtin),
            sequence,
            ChunkKind::Builtin,
            followed_by,
            flags,
            ChunkConfig {
                action: ChunkAction::Handler(action),
                description: description.map(str::to_string),
                skip_suggestion: false,
            },
        )?;
        Ok(())
    }

    /// Registers a builtin eligible for "number in the middle" interpretation:
    /// a digit appearing where no literal child matches is parsed as a count
    /// fragment rather than rejected (SPEC_FULL §4.C "NIM").
    pub fn add_nim_builtin(
        &mut self,
        mode: usize,
        sequence: &[char],
        flags: ChunkFlags,
        action: H,
        description: Option<&str>,
    ) -> Result<()> {
        self.modes.flags(mode)?;
        self.trie.add(
            self.root(mode, Tree::Builtin),
            sequence,
            ChunkKind::Nim,
            FollowedBy::None,
            flags,
            ChunkConfig {
                action: ChunkAction::Handler(action),
                description: description.map(str::to_string),
                skip_suggestion: false,
            },
        )?;
        Ok(())
    }

    pub fn add_selector(
        &mut self,
        mode: usize,
        sequence: &[char],
        action: H,
        description: Option<&str>,
    ) -> Result<()> {
        self.modes.flags(mode)?;
        self.trie.add(
            self.root(mode, Tree::Selector),
            sequence,
            ChunkKind::Builtin,
            FollowedBy::None,
            ChunkFlags::empty(),
            ChunkConfig {
                action: ChunkAction::Handler(action),
                description: description.map(str::to_string),
                skip_suggestion: false,
            },
        )?;
        Ok(())
    }

    pub fn add_user(
        &mut self,
        mode: usize,
        lhs: &[char],
        rhs: Vec<char>,
        flags: ChunkFlags,
    ) -> Result<()> {
        self.modes.flags(mode)?;
        self.trie.add(
            self.root(mode, Tree::User),
            lhs,
            ChunkKind::UserMapping,
            FollowedBy::None,
            flags,
            ChunkConfig {
                action: ChunkAction::Rhs(rhs),
                description: None,
                skip_suggestion: false,
            },
        )?;
        Ok(())
    }

    /// A user-installed binding that should nonetheless be treated as a
    /// builtin for remap purposes (`FOREIGN`), optionally targeting the
    /// selector tree.
    pub fn add_foreign(
        &mut self,
        mode: usize,
        lhs: &[char],
        action: H,
        is_selector: bool,
    ) -> Result<()> {
        self.modes.flags(mode)?;
        let tree = if is_selector { Tree::Selector } else { Tree::Builtin };
        self.trie.add(
            self.root(mode, tree),
            lhs,
            ChunkKind::Builtin,
            FollowedBy::None,
            ChunkFlags::FOREIGN,
            ChunkConfig {
                action: ChunkAction::Handler(action),
                description: None,
                skip_suggestion: false,
            },
        )?;
        Ok(())
    }

    pub fn remove_user(&mut self, mode: usize, lhs: &[char]) -> Result<()> {
        self.modes.flags(mode)?;
        self.trie.remove(self.root(mode, Tree::User), lhs)
    }

    pub fn clear_user(&mut self, mode: usize) -> Result<()> {
        self.modes.flags(mode)?;
        let mut terminals = Vec::new();
        self.trie
            .traverse(self.root(mode, Tree::User), &mut |lhs, _| {
                terminals.push(lhs.to_vec())
            });
        for lhs in terminals {
            self.trie.remove(self.root(mode, Tree::User), &lhs)?;
        }
        Ok(())
    }

    pub fn exists(&self, mode: usize, lhs: &[char]) -> bool {
        self.trie.exists(self.root(mode, Tree::User), lhs)
            || self.trie.exists(self.root(mode, Tree::Builtin), lhs)
    }

    // -- resolution --------------------------------------------------------

    pub fn execute(&mut self, mode: usize, buffer: &[char]) -> Dispatch<H> {
        self.execute_dispatch(mode, buffer, false, false)
    }

    pub fn execute_no_remap(&mut self, mode: usize, buffer: &[char]) -> Dispatch<H> {
        self.execute_dispatch(mode, buffer, true, false)
    }

    pub fn execute_timed_out(&mut self, mode: usize, buffer: &[char]) -> Dispatch<H> {
        self.execute_dispatch(mode, buffer, false, true)
    }

    pub fn execute_timed_out_no_remap(&mut self, mode: usize, buffer: &[char]) -> Dispatch<H> {
        self.execute_dispatch(mode, buffer, true, true)
    }

    fn execute_dispatch(
        &mut self,
        mode: usize,
        buffer: &[char],
        no_remap: bool,
        after_wait: bool,
    ) -> Dispatch<H> {
        let recursive = self.enters_counter > 0;
        if recursive {
            // nested top-level entry: new enter_seq but counter accounting is
            // intentionally skipped (SPEC_FULL §9.1 Open Question 2).
            self.enter_seq += 1;
        }
        self.enters_counter += 1;
        let keys_info = KeysInfo {
            selector: false,
            after_wait,
            mapped: false,
            mapped_suffix: false,
            recursive,
        };
        let result = self.execute_toplevel(mode, buffer, no_remap, keys_info);
        self.enters_counter -= 1;
        result
    }

    fn execute_toplevel(
        &mut self,
        mode: usize,
        buffer: &[char],
        no_remap: bool,
        keys_info: KeysInfo,
    ) -> Dispatch<H> {
        if buffer.is_empty() {
            return Dispatch::Unknown;
        }
        let flags = match self.modes.flags(mode) {
            Ok(f) => f,
            Err(_) => return Dispatch::Unknown,
        };

        let mut i = 0usize;
        let mut register = None;
        if flags.contains(ModeFlags::USES_REGS) && buffer[i] == '"' {
            if i + 1 >= buffer.len() {
                return Dispatch::Wait;
            }
            let c = buffer[i + 1];
            if c == ESC || c == '\u{3}' {
                return Dispatch::Cancelled { consumed: i + 2 };
            }
            register = Some(c);
            i += 2;
        }

        let mut count: Count = None;
        if flags.contains(ModeFlags::USES_COUNT) {
            if let Some((val, end)) = parse_count(buffer, i) {
                count = Some(val);
                i = end;
            }
        }

        if i >= buffer.len() {
            return Dispatch::Wait;
        }

        if !no_remap {
            if let Some(d) =
                self.try_tree(mode, Tree::User, buffer, i, count, register, flags, keys_info)
            {
                return d;
            }
        }
        if let Some(d) =
            self.try_tree(mode, Tree::Builtin, buffer, i, count, register, flags, keys_info)
        {
            return d;
        }
        Dispatch::Unknown
    }

    #[allow(clippy::too_many_arguments)]
    fn try_tree(
        &mut self,
        mode: usize,
        tree: Tree,
        buffer: &[char],
        start: usize,
        count: Count,
        register: Option<char>,
        flags: ModeFlags,
        keys_info: KeysInfo,
    ) -> Option<Dispatch<H>> {
        let root = self.root(mode, tree);
        match walk(&self.trie, root, buffer, start) {
            WalkOutcome::NoMatch => None,
            WalkOutcome::NeedMore { node } => {
                if keys_info.after_wait {
                    // The short wait already elapsed with nothing more
                    // arriving: this tree has no terminal to offer at the
                    // current prefix, so give the other tree (or eventually
                    // `Unknown`) a chance instead of waiting forever.
                    None
                } else {
                    // A user mapping that's ambiguous only against its own
                    // identical builtin counterpart can resolve with a short
                    // wait even in a mode that doesn't consume raw input,
                    // unless some chunk under this prefix demands an
                    // indefinite wait regardless (`ChunkFlags::WAIT`).
                    let has_duplicate = tree == Tree::User
                        && self.contains_complete_chain(mode, Tree::Builtin, &buffer[start..]);
                    let with_input = flags.contains(ModeFlags::USES_INPUT);
                    if self.needs_waiting(node) {
                        Some(Dispatch::Wait)
                    } else if with_input || has_duplicate {
                        Some(Dispatch::WaitShort)
                    } else {
                        Some(Dispatch::Wait)
                    }
                }
            }
            WalkOutcome::Matched {
                node,
                end,
                nim_count,
            } => {
                let merged_count = combine_count(count, nim_count);
                Some(self.finalize(mode, tree, node, buffer, end, merged_count, register, flags, keys_info))
            }
        }
    }

    /// True if `node` or any of its descendants carries `ChunkFlags::WAIT`:
    /// a wait flag anywhere under an ambiguous prefix forces an indefinite
    /// wait there, even when the mode or a duplicate builtin would
    /// otherwise resolve it with a short one.
    fn needs_waiting(&self, node: ChunkId) -> bool {
        let n = self.trie.get(node);
        if n.flags.contains(ChunkFlags::WAIT) {
            return true;
        }
        let mut cur = n.child;
        while let Some(id) = cur {
            if self.needs_waiting(id) {
                return true;
            }
            cur = self.trie.get(id).next;
        }
        false
    }

    /// True if `chain` names a complete, non-waypoint, `FollowedBy::None`
    /// leaf in `tree` — i.e. the literal sequence a waiting user mapping is
    /// ambiguous against is itself a complete builtin command, not merely a
    /// prefix of a longer one.
    fn contains_complete_chain(&self, mode: usize, tree: Tree, chain: &[char]) -> bool {
        if chain.is_empty() {
            return false;
        }
        let root = self.root(mode, tree);
        let Some(node) = self.trie.find(root, chain) else {
            return false;
        };
        let n = self.trie.get(node);
        n.is_terminal() && n.followed_by == FollowedBy::None
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &mut self,
        mode: usize,
        tree: Tree,
        node: ChunkId,
        buffer: &[char],
        end: usize,
        count: Count,
        register: Option<char>,
        flags: ModeFlags,
        mut keys_info: KeysInfo,
    ) -> Dispatch<H> {
        let followed_by = self.trie.get(node).followed_by;
        let has_children = self.trie.get(node).child.is_some();

        // Ambiguous: this node is itself a complete command but longer
        // commands also start here, and we've run out of input to
        // disambiguate. A timed-out re-call (`after_wait`) means the short
        // wait already elapsed with nothing more arriving, so we stop
        // waiting and fire the shorter prefix instead.
        if end >= buffer.len() && has_children && !keys_info.after_wait {
            return Dispatch::WaitShort;
        }

        let mut multi = None;
        let mut end = end;
        let mut selector_action = None;

        match followed_by {
            FollowedBy::None => {}
            FollowedBy::Multikey => {
                if end >= buffer.len() {
                    return Dispatch::Wait;
                }
                multi = Some(buffer[end]);
                end += 1;
            }
            FollowedBy::Selector => {
                if end >= buffer.len() {
                    return Dispatch::Wait;
                }
                keys_info.selector = true;
                match self.resolve_selector(mode, buffer, end, flags) {
                    SelectorOutcome::Matched { action, new_end } => {
                        selector_action = Some(action);
                        end = new_end;
                    }
                    SelectorOutcome::Wait => return Dispatch::Wait,
                    SelectorOutcome::WaitShort => return Dispatch::WaitShort,
                    SelectorOutcome::NoMatch => return Dispatch::Unknown,
                }
            }
        }

        let key_info = KeyInfo {
            count,
            register,
            multi,
        };

        let action_payload = self.trie.action_of(node);
        match action_payload {
            Some(ChunkAction::Handler(h)) => {
                let consumed = end;
                if !keys_info.recursive && !keys_info.mapped {
                    self.counter += consumed as u64;
                }
                Dispatch::Ok(Dispatched {
                    action: h,
                    selector: selector_action,
                    key_info,
                    keys_info,
                    consumed,
                    silent: false,
                })
            }
            Some(ChunkAction::Rhs(rhs)) => {
                self.expand_mapping(mode, tree, node, &rhs, buffer, end, key_info, keys_info)
            }
            None => Dispatch::Unknown,
        }
    }

    /// Recursively re-enters the engine with `<register><count><rhs><remaining>`
    /// substituted for the matched user-mapping prefix (SPEC_FULL §4.C step 7).
    #[allow(clippy::too_many_arguments)]
    fn expand_mapping(
        &mut self,
        mode: usize,
        tree: Tree,
        node: ChunkId,
        rhs: &[char],
        buffer: &[char],
        consumed_prefix: usize,
        key_info: KeyInfo,
        keys_info: KeysInfo,
    ) -> Dispatch<H> {
        let no_remap = self.trie.get(node).flags.contains(ChunkFlags::NO_REMAP);
        let silent = self.trie.get(node).flags.contains(ChunkFlags::SILENT);

        let mut synthetic = Vec::with_capacity(rhs.len() + buffer.len() - consumed_prefix);
        if let Some(r) = key_info.register {
            synthetic.push('"');
            synthetic.push(r);
        }
        if let Some(c) = key_info.count {
            synthetic.extend(c.to_string().chars());
        }
        let rhs_len = rhs.len();
        synthetic.extend_from_slice(rhs);
        synthetic.extend_from_slice(&buffer[consumed_prefix..]);

        self.trie.enter(node);
        self.mapping_state += 1;
        self.mapping_enter_seq += 1;

        let mut inner_keys_info = keys_info;
        inner_keys_info.mapped = true;

        let sub_result = self.execute_toplevel(mode, &synthetic, no_remap, inner_keys_info);

        self.trie.leave(node);

        match sub_result {
            Dispatch::Ok(mut d) => {
                // Map the synthetic buffer's consumed count back onto the
                // caller's original buffer: everything up to `rhs_len` plus
                // whatever register/count prefix we re-synthesized is
                // considered part of this mapping; anything consumed beyond
                // that came from the trailing, real suffix.
                let prefix_len = synthetic.len() - rhs_len - (buffer.len() - consumed_prefix);
                let consumed_in_synthetic = d.consumed;
                let real_rhs_len = rhs_len;
                d.consumed = if consumed_in_synthetic <= prefix_len + real_rhs_len {
                    consumed_prefix
                } else {
                    consumed_prefix + (consumed_in_synthetic - prefix_len - real_rhs_len)
                };
                // A mapping nested inside a silent one stays silent even if
                // the inner mapping itself isn't flagged.
                d.silent |= silent;
                Dispatch::Ok(d)
            }
            other => other,
        }
    }

    /// Enumerate completions for `prefix` in `mode` (SPEC_FULL §4.D). Walks
    /// the user tree then the builtin tree from the node `prefix` resolves
    /// to, honoring `skip_suggestion` and folding subtrees wider than
    /// `fold_threshold`. `followed_by = Selector` nodes contribute one entry
    /// for the operator itself (the selector sub-tree is not expanded here;
    /// callers re-invoke `suggest` with the operator consumed to drill in).
    pub fn suggest(
        &self,
        mode: usize,
        prefix: &[char],
        fold_threshold: usize,
        user_only: bool,
    ) -> Vec<crate::suggest::Suggestion> {
        use crate::suggest::Suggestion;

        let mut out = Vec::new();
        let trees = if user_only {
            vec![Tree::User]
        } else {
            vec![Tree::User, Tree::Builtin]
        };
        for tree in trees {
            let root = self.root(mode, tree);
            let Some(start) = self.trie.find(root, prefix) else {
                continue;
            };
            let mut cur = self.trie.get(start).child;
            while let Some(id) = cur {
                let n = self.trie.get(id);
                if n.is_terminal() {
                    if let Some(cfg) = &n.config {
                        if !cfg.skip_suggestion {
                            let mut lhs = prefix.to_vec();
                            lhs.push(n.value);
                            out.push(Suggestion::Entry {
                                lhs,
                                description: cfg.description.clone(),
                                is_selector: n.followed_by == FollowedBy::Selector,
                            });
                        }
                    }
                } else if n.children_count > 0 {
                    // Fold per child, on that child's own subtree size — not
                    // on how many siblings happen to share this prefix. A
                    // wide intermediate branch collapses into one summary
                    // row; each sibling's own width is judged independently.
                    let mut lhs = prefix.to_vec();
                    lhs.push(n.value);
                    if n.children_count as usize > fold_threshold {
                        out.push(Suggestion::Folded {
                            prefix: lhs,
                            count: n.children_count as usize,
                        });
                    } else {
                        out.push(Suggestion::Entry {
                            lhs,
                            description: None,
                            is_selector: false,
                        });
                    }
                }
                cur = n.next;
            }
        }
        out
    }

    fn resolve_selector(
        &self,
        mode: usize,
        buffer: &[char],
        start: usize,
        flags: ModeFlags,
    ) -> SelectorOutcome<H> {
        let root = self.root(mode, Tree::Selector);
        let mut i = start;
        let mut count: Count = None;
        if flags.contains(ModeFlags::USES_COUNT) {
            if let Some((val, end)) = parse_count(buffer, i) {
                count = Some(val);
                i = end;
            }
        }
        if i >= buffer.len() {
            return SelectorOutcome::Wait;
        }
        match walk(&self.trie, root, buffer, i) {
            WalkOutcome::NoMatch => SelectorOutcome::NoMatch,
            WalkOutcome::NeedMore { .. } => SelectorOutcome::WaitShort,
            WalkOutcome::Matched {
                node,
                end,
                nim_count,
            } => {
                let has_children = self.trie.get(node).child.is_some();
                if end >= buffer.len() && has_children {
                    return SelectorOutcome::WaitShort;
                }
                let _ = combine_count(count, nim_count);
                match self.trie.action_of(node) {
                    Some(ChunkAction::Handler(h)) => SelectorOutcome::Matched { action: h, new_end: end },
                    _ => SelectorOutcome::NoMatch,
                }
            }
        }
    }
}

enum SelectorOutcome<H> {
    Matched { action: H, new_end: usize },
    Wait,
    WaitShort,
    NoMatch,
}

fn parse_count(buffer: &[char], start: usize) -> Option<(u32, usize)> {
    let first = buffer.get(start).and_then(|c| c.to_digit(10))?;
    if first == 0 {
        return None;
    }
    let mut val: u64 = first as u64;
    let mut i = start + 1;
    while let Some(d) = buffer.get(i).and_then(|c| c.to_digit(10)) {
        val = val.saturating_mul(10).saturating_add(d as u64);
        i += 1;
    }
    Some((val.min(u32::MAX as u64) as u32, i))
}

/// Walks `root` starting at `buffer[start..]`, parsing NIM digit runs inline
/// when a `Nim`-kind node (or a sibling already scanned this sweep) permits
/// it (SPEC_FULL §4.C "NIM").
fn walk<H>(trie: &Trie<H>, root: ChunkId, buffer: &[char], start: usize) -> WalkOutcome {
    let mut node = root;
    let mut i = start;
    let mut nim_count: Count = None;
    loop {
        if i >= buffer.len() {
            let n = trie.get(node);
            if n.is_terminal() {
                return WalkOutcome::Matched {
                    node,
                    end: i,
                    nim_count,
                };
            }
            return WalkOutcome::NeedMore { node };
        }
        let c = buffer[i];
        if let Some(child) = trie.find_child(node, c) {
            node = child;
            i += 1;
            continue;
        }
        if trie.has_nim_child(node) {
            if let Some((val, end)) = parse_count(buffer, i) {
                nim_count = Some(combine_count(nim_count, Some(val)).unwrap());
                i = end;
                continue;
            }
        }
        let n = trie.get(node);
        if n.is_terminal() {
            return WalkOutcome::Matched {
                node,
                end: i,
                nim_count,
            };
        }
        return WalkOutcome::NoMatch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkFlags, FollowedBy};
    use crate::mode::ModeFlags;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Action {
        GotoTop,
        GotoLine,
        Delete,
        Yank,
        LineDown,
        LineUp,
        WordForward,
        Esc,
    }

    const NORMAL: usize = 0;

    fn engine() -> Engine<Action> {
        let flags = vec![ModeFlags::USES_COUNT | ModeFlags::USES_REGS];
        let mut e = Engine::new(flags);
        e.add_builtin(
            NORMAL,
            &['g', 'g'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::GotoTop,
            Some("go to top"),
        )
        .unwrap();
        e.add_nim_builtin(
            NORMAL,
            &['g', 'j'],
            ChunkFlags::empty(),
            Action::GotoLine,
            Some("go to line N"),
        )
        .unwrap();
        e.add_builtin(
            NORMAL,
            &['d'],
            FollowedBy::Selector,
            ChunkFlags::empty(),
            Action::Delete,
            Some("delete over selector"),
        )
        .unwrap();
        e.add_builtin(
            NORMAL,
            &['y'],
            FollowedBy::Selector,
            ChunkFlags::empty(),
            Action::Yank,
            Some("yank over selector"),
        )
        .unwrap();
        e.add_builtin(
            NORMAL,
            &['j'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::LineDown,
            None,
        )
        .unwrap();
        e.add_selector(NORMAL, &['j'], Action::LineDown, None).unwrap();
        e.add_selector(NORMAL, &['g', 'g'], Action::GotoTop, None)
            .unwrap();
        e.add_selector(NORMAL, &['w'], Action::WordForward, None)
            .unwrap();
        e.add_builtin(
            NORMAL,
            &['g', 'k'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::LineUp,
            Some("go up"),
        )
        .unwrap();
        e
    }

    fn feed(e: &mut Engine<Action>, mode: usize, s: &str) -> Dispatch<Action> {
        let buf: Vec<char> = s.chars().collect();
        e.execute(mode, &buf)
    }

    #[test]
    fn s1_gg_goto_top() {
        let mut e = engine();
        match feed(&mut e, NORMAL, "gg") {
            Dispatch::Ok(d) => assert_eq!(d.action, Action::GotoTop),
            other => panic!("expected Ok(GotoTop), got {other:?}"),
        }
    }

    #[test]
    fn s2_d_gg_delete_with_selector() {
        let mut e = engine();
        match feed(&mut e, NORMAL, "dgg") {
            Dispatch::Ok(d) => {
                assert_eq!(d.action, Action::Delete);
                assert_eq!(d.selector, Some(Action::GotoTop));
            }
            other => panic!("expected Ok(Delete+selector), got {other:?}"),
        }
    }

    #[test]
    fn s4_count_and_nim_multiply() {
        let mut e = engine();
        match feed(&mut e, NORMAL, "3g5j") {
            Dispatch::Ok(d) => {
                assert_eq!(d.action, Action::GotoLine);
                assert_eq!(d.key_info.count, Some(15));
            }
            other => panic!("expected Ok(GotoLine, count=15), got {other:?}"),
        }
    }

    #[test]
    fn s5_register_and_count() {
        let mut e = engine();
        e.add_builtin(
            NORMAL,
            &['d', 'd'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::Delete,
            None,
        )
        .unwrap();
        match feed(&mut e, NORMAL, "\"a2dd") {
            Dispatch::Ok(d) => {
                assert_eq!(d.key_info.register, Some('a'));
                assert_eq!(d.key_info.count, Some(2));
                assert_eq!(d.consumed, 5);
            }
            other => panic!("expected Ok(register+count), got {other:?}"),
        }
    }

    #[test]
    fn partial_prefix_waits() {
        let mut e = engine();
        match feed(&mut e, NORMAL, "g") {
            Dispatch::WaitShort | Dispatch::Wait => {}
            other => panic!("expected a wait signal, got {other:?}"),
        }
    }

    #[test]
    fn unknown_sequence() {
        let mut e = engine();
        match feed(&mut e, NORMAL, "q") {
            Dispatch::Unknown => {}
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn user_mapping_expands_and_fires_builtin() {
        let mut e = engine();
        e.add_user(NORMAL, &['j', 'k'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        e.add_builtin(
            NORMAL,
            &[ESC],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::Esc,
            None,
        )
        .unwrap();
        match feed(&mut e, NORMAL, "jk") {
            Dispatch::Ok(d) => assert_eq!(d.action, Action::Esc),
            other => panic!("expected mapping to expand to Esc, got {other:?}"),
        }
    }

    #[test]
    fn silent_mapping_marks_the_dispatch_silent() {
        let mut e = engine();
        e.add_user(NORMAL, &['j', 'k'], vec![ESC], ChunkFlags::SILENT)
            .unwrap();
        e.add_builtin(
            NORMAL,
            &[ESC],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::Esc,
            None,
        )
        .unwrap();
        match feed(&mut e, NORMAL, "jk") {
            Dispatch::Ok(d) => assert!(d.silent, "expected silent mapping to mark the dispatch"),
            other => panic!("expected Ok(Esc), got {other:?}"),
        }

        match feed(&mut e, NORMAL, "gg") {
            Dispatch::Ok(d) => assert!(!d.silent, "plain builtin must not be silent"),
            other => panic!("expected Ok(GotoTop), got {other:?}"),
        }
    }

    #[test]
    fn uses_input_mode_resolves_ambiguous_user_prefix_as_wait_short() {
        // A mode that consumes raw input directly (e.g. Insert) resolves an
        // ambiguous user-mapping prefix with a short wait rather than an
        // indefinite one, even with no duplicate builtin underneath.
        const INSERT: usize = 1;
        let mut e = Engine::new(vec![
            ModeFlags::USES_COUNT | ModeFlags::USES_REGS,
            ModeFlags::USES_INPUT,
        ]);
        e.add_user(INSERT, &['j', 'k'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        let buf: Vec<char> = vec!['j'];
        match e.execute(INSERT, &buf) {
            Dispatch::WaitShort => {}
            other => panic!("expected WaitShort under USES_INPUT, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_builtin_resolves_ambiguous_user_prefix_as_wait_short() {
        // No USES_INPUT here, but the ambiguous literal prefix "j" is itself
        // a complete builtin command, so the short-wait exception applies.
        let mut e = engine();
        e.add_user(NORMAL, &['j', 'k'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        let buf: Vec<char> = vec!['j'];
        match e.execute(NORMAL, &buf) {
            Dispatch::WaitShort => {}
            other => panic!("expected WaitShort (duplicate builtin), got {other:?}"),
        }
    }

    #[test]
    fn wait_flag_forces_indefinite_wait_despite_duplicate_and_uses_input() {
        const INSERT: usize = 1;
        let mut e = Engine::new(vec![
            ModeFlags::USES_COUNT | ModeFlags::USES_REGS,
            ModeFlags::USES_INPUT,
        ]);
        e.add_builtin(
            INSERT,
            &['j'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::LineDown,
            None,
        )
        .unwrap();
        e.add_user(INSERT, &['j', 'k'], vec![ESC], ChunkFlags::WAIT)
            .unwrap();
        let buf: Vec<char> = vec!['j'];
        match e.execute(INSERT, &buf) {
            Dispatch::Wait => {}
            other => panic!("expected indefinite Wait, got {other:?}"),
        }
    }

    #[test]
    fn plain_ambiguous_user_prefix_without_exceptions_waits_indefinitely() {
        // No USES_INPUT and no duplicate builtin underneath: the ambiguous
        // prefix waits indefinitely, per the original Case B default.
        let mut e = engine();
        e.add_user(NORMAL, &['z', 'z'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        let buf: Vec<char> = vec!['z'];
        match e.execute(NORMAL, &buf) {
            Dispatch::Wait => {}
            other => panic!("expected indefinite Wait, got {other:?}"),
        }
    }

    #[test]
    fn no_remap_bypasses_user_mapping() {
        let mut e = engine();
        e.add_user(NORMAL, &['j', 'k'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        let buf: Vec<char> = "jk".chars().collect();
        match e.execute_no_remap(NORMAL, &buf) {
            Dispatch::Ok(d) => assert_eq!(d.action, Action::LineDown),
            other => panic!("expected builtin j to fire, got {other:?}"),
        }
    }

    #[test]
    fn register_cancel_on_escape() {
        let mut e = engine();
        let buf: Vec<char> = vec!['"', ESC];
        match e.execute(NORMAL, &buf) {
            Dispatch::Cancelled { consumed } => assert_eq!(consumed, 2),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    fn remove_user_mapping_is_reflected_immediately() {
        let mut e = engine();
        e.add_user(NORMAL, &['j', 'k'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        assert!(e.exists(NORMAL, &['j', 'k']));
        e.remove_user(NORMAL, &['j', 'k']).unwrap();
        assert!(!e.trie.exists(e.root(NORMAL, Tree::User), &['j', 'k']));
    }

    #[test]
    fn s3_short_wait_then_timeout_fires_user_mapping() {
        let mut e = engine();
        e.add_user(NORMAL, &['j', 'k'], vec![ESC], ChunkFlags::empty())
            .unwrap();
        e.add_builtin(
            NORMAL,
            &[ESC],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::Esc,
            None,
        )
        .unwrap();
        let buf: Vec<char> = "j".chars().collect();
        match e.execute(NORMAL, &buf) {
            Dispatch::WaitShort => {}
            other => panic!("expected WaitShort on ambiguous prefix, got {other:?}"),
        }
        match e.execute_timed_out(NORMAL, &buf) {
            Dispatch::Ok(d) => assert_eq!(d.action, Action::LineDown),
            other => panic!("expected builtin j to fire on timeout, got {other:?}"),
        }
    }

    #[test]
    fn counter_advances_by_consumed_chars() {
        let mut e = engine();
        let before = e.counter();
        let _ = feed(&mut e, NORMAL, "gg");
        assert_eq!(e.counter(), before + 2);
    }

    #[test]
    fn s6_suggest_lists_leaf_siblings_unfolded() {
        // `gg` and `gk` are leaf commands, `gj` is a nim-builtin leaf: all
        // three are terminal children of `g` with no children of their own,
        // so a low fold_threshold must not collapse them into one entry.
        let e = engine();
        let suggestions = e.suggest(NORMAL, &['g'], 1, false);
        let entries: Vec<_> = suggestions
            .iter()
            .filter(|s| matches!(s, crate::suggest::Suggestion::Entry { .. }))
            .collect();
        assert_eq!(
            entries.len(),
            3,
            "expected gg/gj/gk as three separate entries, got {suggestions:?}"
        );
        assert!(
            !suggestions
                .iter()
                .any(|s| matches!(s, crate::suggest::Suggestion::Folded { .. })),
            "leaf siblings must never fold, got {suggestions:?}"
        );
    }

    #[test]
    fn suggest_folds_a_wide_intermediate_subtree() {
        // `gs` itself has three children (gsa/gsb/gsc): its own subtree is
        // wider than the threshold, so it collapses into one Folded row
        // while its terminal sibling `gg` stays a plain entry.
        let mut e = engine();
        e.add_builtin(
            NORMAL,
            &['g', 's', 'a'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::WordForward,
            None,
        )
        .unwrap();
        e.add_builtin(
            NORMAL,
            &['g', 's', 'b'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::WordForward,
            None,
        )
        .unwrap();
        e.add_builtin(
            NORMAL,
            &['g', 's', 'c'],
            FollowedBy::None,
            ChunkFlags::empty(),
            Action::WordForward,
            None,
        )
        .unwrap();

        let suggestions = e.suggest(NORMAL, &['g'], 1, false);
        let folded = suggestions.iter().find(|s| {
            matches!(s, crate::suggest::Suggestion::Folded { prefix, .. } if prefix.as_slice() == ['g', 's'])
        });
        assert!(
            folded.is_some(),
            "expected gs to fold as a wide subtree, got {suggestions:?}"
        );
        if let Some(crate::suggest::Suggestion::Folded { count, .. }) = folded {
            assert_eq!(*count, 3);
        }
        assert!(
            suggestions.iter().any(
                |s| matches!(s, crate::suggest::Suggestion::Entry { lhs, .. } if lhs.as_slice() == ['g', 'g'])
            ),
            "expected gg to remain a plain entry, got {suggestions:?}"
        );
    }
}
