//! The vocabulary of reversible changes the repository can apply.
//!
//! A [`Mutation`] is replayed through the same CRDT-generate → persist →
//! outbox → publish pipeline whether it originates from a caller or from
//! `undo`/`redo` replaying a computed inverse — there is no separate
//! "inverse op" representation to keep in sync with the forward one.

#[derive(Clone, Debug)]
pub enum Mutation {
    CreateList {
        list_id: String,
        title: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    /// Tombstones the registry entry; the list's own CRDT and storage
    /// record are left untouched (removing a list never deletes its
    /// document, only hides it from the sidebar).
    RemoveList {
        list_id: String,
    },
    /// Resurrects a tombstoned registry entry at the given anchors, leaving
    /// its previously-set title untouched. Used only as `RemoveList`'s
    /// computed inverse.
    RestoreList {
        list_id: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    /// The list's own clock-only title (`TaskListCrdt::generate_rename`),
    /// mirrored best-effort into the registry's per-field title so the
    /// sidebar stays current.
    RenameList {
        list_id: String,
        title: String,
    },
    ReorderList {
        list_id: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    InsertTask {
        list_id: String,
        item_id: String,
        text: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    UpdateTask {
        list_id: String,
        item_id: String,
        text: Option<String>,
        note: Option<Option<String>>,
    },
    ToggleTask {
        list_id: String,
        item_id: String,
    },
    RemoveTask {
        list_id: String,
        item_id: String,
    },
    /// Resurrects a tombstoned task at the given anchors with an empty
    /// partial, so its pre-removal payload reappears untouched. Used as
    /// `RemoveTask`'s and `MoveTask`'s computed inverse.
    RestoreTask {
        list_id: String,
        item_id: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    MoveTaskWithinList {
        list_id: String,
        item_id: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    MoveTask {
        from_list: String,
        to_list: String,
        item_id: String,
        after_id: Option<String>,
        before_id: Option<String>,
    },
    MergeTask {
        list_id: String,
        survivor_id: String,
        absorbed_id: String,
    },
    /// `MergeTask`'s computed inverse: restore the survivor's pre-merge
    /// text and resurrect the absorbed task at its prior anchors.
    UnmergeTask {
        list_id: String,
        survivor_id: String,
        survivor_prior_text: String,
        absorbed_id: String,
        absorbed_after_id: Option<String>,
        absorbed_before_id: Option<String>,
    },
}

/// Which list(s) a mutation touches, for undo-coalescing keys and for
/// reporting cross-list moves as a single bundled change.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Registry,
    List(String),
    CrossList(String, String),
}

impl Mutation {
    pub fn scope(&self) -> Scope {
        match self {
            Mutation::CreateList { .. } | Mutation::RemoveList { .. } | Mutation::RestoreList { .. } | Mutation::RenameList { .. } | Mutation::ReorderList { .. } => {
                Scope::Registry
            }
            Mutation::InsertTask { list_id, .. }
            | Mutation::UpdateTask { list_id, .. }
            | Mutation::ToggleTask { list_id, .. }
            | Mutation::RemoveTask { list_id, .. }
            | Mutation::RestoreTask { list_id, .. }
            | Mutation::MoveTaskWithinList { list_id, .. }
            | Mutation::MergeTask { list_id, .. }
            | Mutation::UnmergeTask { list_id, .. } => Scope::List(list_id.clone()),
            Mutation::MoveTask { from_list, to_list, .. } => Scope::CrossList(from_list.clone(), to_list.clone()),
        }
    }

    /// The `(list_id, item_id)` key coalescing keys off, if this mutation is
    /// a plain field update on a task.
    pub fn coalesce_key(&self) -> Option<(&str, &str)> {
        match self {
            Mutation::UpdateTask { list_id, item_id, .. } => Some((list_id, item_id)),
            _ => None,
        }
    }
}
