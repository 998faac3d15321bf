//! Observable stream of applied schema change actions.
//!
//! The engine reports every action it decides on during
//! make-migrations and every action it applies during migrate to an
//! [`ActionLog`]. The default sink writes a one-line human-readable
//! summary; running without any sink is fine.

use crate::action::{Action, Changed};

/// Whether an action was just planned or actually applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActionPhase {
    Planned,
    Applied,
}

/// One observed schema change action.
#[derive(Debug)]
pub struct ActionEvent<'a> {
    pub phase: ActionPhase,
    pub app_name: &'a str,
    pub model_name: &'a str,
    pub file_name: String,
    pub action: &'a Action,
}

impl ActionEvent<'_> {
    /// A one-line human-readable summary of the event.
    #[must_use]
    pub fn summary(&self) -> String {
        fn name<T>(changed: &Changed<T>, pick: impl Fn(&T) -> &str) -> String {
            match (&changed.old, &changed.new) {
                (Some(old), Some(new)) => format!("{} -> {}", pick(old), pick(new)),
                (_, Some(new)) => pick(new).to_string(),
                (Some(old), _) => pick(old).to_string(),
                (None, None) => String::new(),
            }
        }

        let what = match self.action {
            Action::CreateTable { table } => {
                format!("create table {}", name(table, |t| &t.table_name))
            }
            Action::DropTable { table } => {
                format!("drop table {}", name(table, |t| &t.table_name))
            }
            Action::RenameTable { table } => {
                format!("rename table {}", name(table, |t| &t.table_name))
            }
            Action::AddField { field } => {
                format!("add field {}", name(field, |c| &c.column))
            }
            Action::AlterField { field } => {
                format!("alter field {}", name(field, |c| &c.column))
            }
            Action::RemoveField { field } => {
                format!("remove field {}", name(field, |c| &c.column))
            }
            Action::AddIndex { index } => {
                format!("add index {}", name(index, |i| &i.name))
            }
            Action::DropIndex { index } => {
                format!("drop index {}", name(index, |i| &i.name))
            }
            Action::RenameIndex { index } => {
                format!("rename index {}", name(index, |i| &i.name))
            }
        };

        let phase = match self.phase {
            ActionPhase::Planned => "planned",
            ActionPhase::Applied => "applied",
        };
        format!(
            "{phase}: {what} ({}/{}/{})",
            self.app_name, self.model_name, self.file_name
        )
    }
}

/// A sink for observed actions.
pub trait ActionLog: Send + Sync {
    fn record(&self, event: &ActionEvent<'_>);
}

/// The default sink: one `tracing` info line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActionLog;

impl ActionLog for TracingActionLog {
    fn record(&self, event: &ActionEvent<'_>) {
        tracing::info!("{}", event.summary());
    }
}
