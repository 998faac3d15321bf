//! The diff engine.
//!
//! [`diff`] compares two [`ModelTable`] snapshots and produces the
//! ordered list of [`Action`]s that turns the previous state into the
//! current one. The diff is a pure function of the structural values of
//! its inputs.

use std::collections::{HashMap, HashSet};

use crate::action::{Action, Changed};
use crate::table::{Column, Index, ModelTable};

/// Computes the schema change actions between two table snapshots.
///
/// `prev` is the last known state (`None` for a model that has never
/// been migrated), `curr` the desired state (`None` for a model that no
/// longer exists). A migration is needed iff the returned list is
/// non-empty.
#[must_use]
pub fn diff(prev: Option<&ModelTable>, curr: Option<&ModelTable>) -> Vec<Action> {
    // A previous snapshot without a table name carries no state worth
    // diffing against.
    let prev = prev.filter(|table| !table.table_name.is_empty());

    match (prev, curr) {
        (None, None) => Vec::new(),
        (None, Some(curr)) => vec![Action::CreateTable {
            table: Changed::added(curr.clone()),
        }],
        (Some(prev), None) => vec![Action::DropTable {
            table: Changed::removed(prev.clone()),
        }],
        (Some(prev), Some(curr)) => diff_tables(prev, curr),
    }
}

fn diff_tables(prev: &ModelTable, curr: &ModelTable) -> Vec<Action> {
    let mut actions = Vec::new();

    if prev.table_name != curr.table_name {
        actions.push(Action::RenameTable {
            table: Changed::altered(prev.clone(), curr.clone()),
        });
    }

    diff_columns(prev, curr, &mut actions);
    diff_indexes(prev, curr, &mut actions);

    actions
}

/// Partitions columns by model-side name into added, removed and
/// common; common columns that are structurally unequal become
/// `AlterField`. Additions and alterations come out in current column
/// order, removals in previous column order and last.
fn diff_columns(prev: &ModelTable, curr: &ModelTable, actions: &mut Vec<Action>) {
    let prev_by_name: HashMap<&str, &Column> = prev
        .columns
        .iter()
        .map(|column| (column.name.as_str(), column))
        .collect();
    let curr_names: HashSet<&str> = curr
        .columns
        .iter()
        .map(|column| column.name.as_str())
        .collect();

    for column in &curr.columns {
        match prev_by_name.get(column.name.as_str()) {
            None => actions.push(Action::AddField {
                field: Changed::added(column.clone()),
            }),
            Some(old) if *old != column => actions.push(Action::AlterField {
                field: Changed::altered((*old).clone(), column.clone()),
            }),
            Some(_) => {}
        }
    }

    for column in &prev.columns {
        if !curr_names.contains(column.name.as_str()) {
            actions.push(Action::RemoveField {
                field: Changed::removed(column.clone()),
            });
        }
    }
}

/// Diffs the name-keyed index sets, detecting renames: a dropped and an
/// added index that are equal apart from their names collapse into a
/// single `RenameIndex`.
fn diff_indexes(prev: &ModelTable, curr: &ModelTable, actions: &mut Vec<Action>) {
    let old_map: HashMap<&str, &Index> = prev
        .indexes
        .iter()
        .map(|index| (index.name.as_str(), index))
        .collect();
    let new_map: HashMap<&str, &Index> = curr
        .indexes
        .iter()
        .map(|index| (index.name.as_str(), index))
        .collect();

    let dropped: Vec<&Index> = prev
        .indexes
        .iter()
        .filter(|old| new_map.get(old.name.as_str()) != Some(old))
        .collect();
    let added: Vec<&Index> = curr
        .indexes
        .iter()
        .filter(|new| old_map.get(new.name.as_str()) != Some(new))
        .collect();

    let mut dropped_matched = vec![false; dropped.len()];
    let mut renames = Vec::new();
    let mut added_remaining = Vec::new();
    for new in added {
        let matched = dropped.iter().enumerate().find(|(i, old)| {
            !dropped_matched[*i] && old.name != new.name && old.same_shape(new)
        });
        if let Some((i, old)) = matched {
            dropped_matched[i] = true;
            renames.push((*old, new));
        } else {
            added_remaining.push(new);
        }
    }

    for (i, old) in dropped.iter().enumerate() {
        if !dropped_matched[i] {
            actions.push(Action::DropIndex {
                index: Changed::removed((*old).clone()),
            });
        }
    }
    for new in added_remaining {
        actions.push(Action::AddIndex {
            index: Changed::added(new.clone()),
        });
    }
    for (old, new) in renames {
        actions.push(Action::RenameIndex {
            index: Changed::altered(old.clone(), new.clone()),
        });
    }
}
