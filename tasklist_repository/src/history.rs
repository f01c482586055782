use chrono::{DateTime, Duration, Utc};

use crate::mutation::{Mutation, Scope};

const COALESCE_WINDOW_MS: i64 = 500;

/// `{forward, inverse, scope, createdAt}` (§4.8). Bundled multi-write
/// changes (a cross-list move, a merge) still fit in one `Mutation` each —
/// `MoveTask`/`MergeTask`/`UnmergeTask` each describe every write they make
/// when replayed, so an entry never needs more than one mutation per side.
#[derive(Clone, Debug)]
pub struct UndoEntry {
    pub forward: Mutation,
    pub inverse: Mutation,
    pub scope: Scope,
    pub created_at: DateTime<Utc>,
}

struct CoalesceState {
    list_id: String,
    item_id: String,
    last_update_at: DateTime<Utc>,
}

/// A single global undo/redo stack pair. Consecutive `updateTask` actions on
/// the same `(listId, itemId)` within the coalescing window collapse into
/// one entry: a gap of 500 ms or more since the previous update in the
/// current group starts a new group, so the stored inverse is always the
/// first captured prior value of the *current* group rather than of the
/// whole typing session.
#[derive(Default)]
pub struct History {
    undo: Vec<UndoEntry>,
    redo: Vec<UndoEntry>,
    coalesce: Option<CoalesceState>,
}

impl History {
    pub fn record(&mut self, forward: Mutation, inverse: Mutation, now: DateTime<Utc>) {
        self.redo.clear();

        if let Some((list_id, item_id)) = forward.coalesce_key().map(|(l, i)| (l.to_string(), i.to_string())) {
            if let Some(state) = &self.coalesce {
                let gap = now - state.last_update_at;
                if state.list_id == list_id && state.item_id == item_id && gap < Duration::milliseconds(COALESCE_WINDOW_MS) {
                    if let Some(top) = self.undo.last_mut() {
                        top.forward = forward;
                        self.coalesce = Some(CoalesceState { list_id, item_id, last_update_at: now });
                        return;
                    }
                }
            }
            self.coalesce = Some(CoalesceState { list_id, item_id, last_update_at: now });
            let scope = forward.scope();
            self.undo.push(UndoEntry { forward, inverse, scope, created_at: now });
            return;
        }

        self.coalesce = None;
        let scope = forward.scope();
        self.undo.push(UndoEntry { forward, inverse, scope, created_at: now });
    }

    pub fn undo(&mut self) -> Option<UndoEntry> {
        self.coalesce = None;
        let entry = self.undo.pop()?;
        self.redo.push(UndoEntry {
            forward: entry.inverse.clone(),
            inverse: entry.forward.clone(),
            scope: entry.scope.clone(),
            created_at: entry.created_at,
        });
        Some(entry)
    }

    pub fn redo(&mut self) -> Option<UndoEntry> {
        self.coalesce = None;
        let entry = self.redo.pop()?;
        self.undo.push(UndoEntry {
            forward: entry.inverse.clone(),
            inverse: entry.forward.clone(),
            scope: entry.scope.clone(),
            created_at: entry.created_at,
        });
        Some(entry)
    }
}
