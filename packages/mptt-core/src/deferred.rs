//! Deferred-update scopes.
//!
//! Scope state lives in a thread-local map keyed by the concrete table, so two
//! threads never see each other's scopes and a proxy shares the state of its
//! owner. Entering a scope returns a guard; dropping the guard restores the
//! previous state on every exit path.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;

use crate::ids::TreeId;

/// Left-edge hints written while updates are off sort after every real left
/// value (or before it, when negated) until the next rebuild.
pub(crate) const PENDING_BASE: i64 = 1 << 40;

#[derive(Debug, Default)]
struct ScopeState {
    disabled: usize,
    delayed: usize,
    dirty: Option<BTreeSet<TreeId>>,
    hint_seq: i64,
}

impl ScopeState {
    fn is_idle(&self) -> bool {
        self.disabled == 0 && self.delayed == 0 && self.dirty.is_none()
    }
}

thread_local! {
    static SCOPES: RefCell<HashMap<String, ScopeState>> = RefCell::new(HashMap::new());
}

fn with_state<T>(table: &str, f: impl FnOnce(&mut ScopeState) -> T) -> T {
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        let state = scopes.entry(table.to_string()).or_default();
        let out = f(state);
        if state.is_idle() {
            scopes.remove(table);
        }
        out
    })
}

fn peek<T>(table: &str, f: impl FnOnce(&ScopeState) -> T, idle: T) -> T {
    SCOPES.with(|scopes| scopes.borrow().get(table).map_or(idle, f))
}

/// Whether structural fields are maintained for writes to `table` on this thread.
pub fn updates_enabled(table: &str) -> bool {
    peek(table, |s| s.disabled == 0, true)
}

/// Whether writes to `table` on this thread record their trees for a later rebuild.
pub fn is_tracking(table: &str) -> bool {
    peek(table, |s| s.dirty.is_some(), false)
}

pub(crate) fn track(table: &str, tree_id: TreeId) {
    with_state(table, |s| {
        if let Some(dirty) = s.dirty.as_mut() {
            dirty.insert(tree_id);
        }
    });
}

pub(crate) fn next_hint(table: &str) -> i64 {
    with_state(table, |s| {
        s.hint_seq += 1;
        s.hint_seq
    })
}

/// Guard of an updates-disabled scope. Nested scopes collapse into the outermost.
#[derive(Debug)]
#[must_use = "updates are re-enabled as soon as the guard is dropped"]
pub struct UpdatesDisabled {
    table: String,
    _thread_bound: PhantomData<*const ()>,
}

impl UpdatesDisabled {
    pub(crate) fn enter(table: &str) -> Self {
        with_state(table, |s| s.disabled += 1);
        Self {
            table: table.to_string(),
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for UpdatesDisabled {
    fn drop(&mut self) {
        with_state(&self.table, |s| s.disabled = s.disabled.saturating_sub(1));
    }
}

/// Guard of a delayed-rebuild scope.
///
/// Hand the outermost guard to
/// [`TreeManager::finish_delayed_updates`](crate::TreeManager::finish_delayed_updates)
/// to rebuild the trees touched inside the scope. Dropping it instead (for
/// example while an error propagates) discards the tracked trees.
#[derive(Debug)]
#[must_use = "dropping the guard discards the tracked trees"]
pub struct DelayedUpdates {
    outermost: bool,
    finished: bool,
    // Declared last so it is released after the tracking state is settled.
    disabled: UpdatesDisabled,
}

impl DelayedUpdates {
    pub(crate) fn enter(table: &str) -> Self {
        let outermost = with_state(table, |s| {
            s.delayed += 1;
            if s.dirty.is_none() {
                s.dirty = Some(BTreeSet::new());
                true
            } else {
                false
            }
        });
        Self {
            outermost,
            finished: false,
            disabled: UpdatesDisabled::enter(table),
        }
    }

    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Close the scope and return the trees to rebuild (empty unless outermost).
    pub(crate) fn into_dirty(mut self) -> Vec<TreeId> {
        self.finished = true;
        if !self.outermost {
            return Vec::new();
        }
        with_state(&self.disabled.table, |s| s.dirty.take())
            .map(|dirty| dirty.into_iter().collect())
            .unwrap_or_default()
    }
}

impl Drop for DelayedUpdates {
    fn drop(&mut self) {
        let table = self.disabled.table.clone();
        let outermost = self.outermost;
        let discarded = with_state(&table, |s| {
            s.delayed = s.delayed.saturating_sub(1);
            if outermost {
                s.dirty.take()
            } else {
                None
            }
        });
        if !self.finished {
            if let Some(dirty) = discarded.filter(|d| !d.is_empty()) {
                tracing::debug!(table = %table, trees = ?dirty, "discarding delayed tree updates");
            }
        }
    }
}
