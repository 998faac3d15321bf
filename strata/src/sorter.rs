//! Determining the correct order of applying migrations.
//!
//! The sorter first orders migrations by `(app, model, order)` so that
//! ties are broken deterministically, then runs a depth-first
//! post-order traversal over the declared dependencies so that every
//! dependency is applied before its dependents. Each migration also
//! implicitly follows the preceding migration of its own model, so a
//! dependency can never pull a later migration of a model ahead of an
//! earlier one.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::migration::MigrationFile;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum MigrationSorterError {
    /// A migration depends on a migration that is neither in the set
    /// being sorted nor already applied.
    #[error("migration {dependent} depends on {dependency}, which cannot be found")]
    MissingDependency {
        dependent: String,
        dependency: String,
    },
    /// The dependency graph contains a cycle.
    #[error("cyclic dependency between migrations, detected at {key}")]
    CyclicDependency { key: String },
}

/// Sorts a set of migrations into a valid application order.
#[derive(Debug)]
pub struct MigrationSorter<'a> {
    migrations: &'a mut [MigrationFile],
}

const UNVISITED: u8 = 0;
const VISITING: u8 = 1;
const VISITED: u8 = 2;

impl<'a> MigrationSorter<'a> {
    #[must_use]
    pub fn new(migrations: &'a mut [MigrationFile]) -> Self {
        Self { migrations }
    }

    /// Sorts assuming every dependency is part of the set itself.
    pub fn sort(&mut self) -> Result<(), MigrationSorterError> {
        self.sort_with_applied(&HashSet::new())
    }

    /// Sorts the migrations topologically.
    ///
    /// `applied` holds the keys of migrations that are already applied;
    /// dependencies on those are considered satisfied and produce no
    /// edge. A dependency that is in neither set is an error.
    pub fn sort_with_applied(
        &mut self,
        applied: &HashSet<String>,
    ) -> Result<(), MigrationSorterError> {
        self.migrations.sort_by(|a, b| {
            (a.app_name.as_str(), a.model_name.as_str(), a.order)
                .cmp(&(b.app_name.as_str(), b.model_name.as_str(), b.order))
        });

        let keys: Vec<String> = self.migrations.iter().map(MigrationFile::key).collect();
        let index: HashMap<&str, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), i))
            .collect();

        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); self.migrations.len()];
        let mut last_of_model: HashMap<(&str, &str), usize> = HashMap::new();
        for (i, migration) in self.migrations.iter().enumerate() {
            let model_key = (migration.app_name.as_str(), migration.model_name.as_str());
            if let Some(&previous) = last_of_model.get(&model_key) {
                edges[i].push(previous);
            }
            last_of_model.insert(model_key, i);

            for dependency in &migration.dependencies {
                let dependency_key = dependency.to_string();
                match index.get(dependency_key.as_str()) {
                    Some(&j) => edges[i].push(j),
                    None if applied.contains(&dependency_key) => {}
                    None => {
                        return Err(MigrationSorterError::MissingDependency {
                            dependent: keys[i].clone(),
                            dependency: dependency_key,
                        })
                    }
                }
            }
        }

        let mut colors = vec![UNVISITED; self.migrations.len()];
        let mut order = Vec::with_capacity(self.migrations.len());
        for i in 0..self.migrations.len() {
            Self::visit(&edges, &keys, &mut colors, &mut order, i)?;
        }

        let rank: HashMap<String, usize> = order
            .into_iter()
            .enumerate()
            .map(|(rank, i)| (keys[i].clone(), rank))
            .collect();
        self.migrations.sort_by_key(|migration| {
            rank.get(&migration.key()).copied().unwrap_or(usize::MAX)
        });

        Ok(())
    }

    fn visit(
        edges: &[Vec<usize>],
        keys: &[String],
        colors: &mut [u8],
        order: &mut Vec<usize>,
        node: usize,
    ) -> Result<(), MigrationSorterError> {
        match colors[node] {
            VISITED => return Ok(()),
            // A back-edge to a node still on the stack closes a cycle.
            VISITING => {
                return Err(MigrationSorterError::CyclicDependency {
                    key: keys[node].clone(),
                })
            }
            _ => {}
        }

        colors[node] = VISITING;
        for &next in &edges[node] {
            Self::visit(edges, keys, colors, order, next)?;
        }
        colors[node] = VISITED;
        order.push(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Dependency;
    use crate::table::ModelTable;

    fn migration(app: &str, model: &str, order: u32, deps: Vec<Dependency>) -> MigrationFile {
        MigrationFile {
            app_name: app.to_string(),
            model_name: model.to_string(),
            name: "create_table".to_string(),
            order,
            table: ModelTable::new(model.to_lowercase(), format!("{app}.{model}")),
            actions: Vec::new(),
            dependencies: deps,
        }
    }

    fn keys(migrations: &[MigrationFile]) -> Vec<String> {
        migrations.iter().map(MigrationFile::key).collect()
    }

    #[test]
    fn independent_migrations_sort_by_app_model_order() {
        let mut migrations = vec![
            migration("b", "M", 1, vec![]),
            migration("a", "N", 2, vec![]),
            migration("a", "N", 1, vec![]),
        ];
        MigrationSorter::new(&mut migrations).sort().unwrap();
        assert_eq!(
            keys(&migrations),
            vec![
                "a:N:0001_create_table.mig",
                "a:N:0002_create_table.mig",
                "b:M:0001_create_table.mig"
            ]
        );
    }

    #[test]
    fn dependencies_come_first() {
        let mut migrations = vec![
            migration(
                "test_sql",
                "Todo",
                1,
                vec![Dependency::new("test_sql", "User", "0001_create_table.mig")],
            ),
            migration("test_sql", "User", 1, vec![]),
        ];
        MigrationSorter::new(&mut migrations).sort().unwrap();
        assert_eq!(
            keys(&migrations),
            vec![
                "test_sql:User:0001_create_table.mig",
                "test_sql:Todo:0001_create_table.mig"
            ]
        );
    }

    #[test]
    fn every_dependency_precedes_its_dependent() {
        let mut migrations = vec![
            migration(
                "a",
                "A",
                1,
                vec![Dependency::new("b", "B", "0001_create_table.mig")],
            ),
            migration(
                "b",
                "B",
                1,
                vec![Dependency::new("c", "C", "0001_create_table.mig")],
            ),
            migration("c", "C", 1, vec![]),
        ];
        MigrationSorter::new(&mut migrations).sort().unwrap();

        let order = keys(&migrations);
        for migration in &migrations {
            let position = order.iter().position(|k| *k == migration.key()).unwrap();
            for dependency in &migration.dependencies {
                let dep_position = order
                    .iter()
                    .position(|k| *k == dependency.to_string())
                    .unwrap();
                assert!(dep_position < position);
            }
        }
    }

    #[test]
    fn a_dependency_pulls_the_whole_model_history_forward() {
        // a:A depends on b:B's second migration; b:B's first one must
        // still be applied before it.
        let mut migrations = vec![
            migration(
                "a",
                "A",
                1,
                vec![Dependency::new("b", "B", "0002_create_table.mig")],
            ),
            migration("b", "B", 1, vec![]),
            migration("b", "B", 2, vec![]),
        ];
        MigrationSorter::new(&mut migrations).sort().unwrap();
        assert_eq!(
            keys(&migrations),
            vec![
                "b:B:0001_create_table.mig",
                "b:B:0002_create_table.mig",
                "a:A:0001_create_table.mig"
            ]
        );
    }

    #[test]
    fn applied_dependencies_are_satisfied() {
        let mut migrations = vec![migration(
            "test_sql",
            "Todo",
            1,
            vec![Dependency::new("test_sql", "User", "0001_create_table.mig")],
        )];
        let applied: HashSet<String> =
            std::iter::once("test_sql:User:0001_create_table.mig".to_string()).collect();
        MigrationSorter::new(&mut migrations)
            .sort_with_applied(&applied)
            .unwrap();
        assert_eq!(migrations.len(), 1);
    }

    #[test]
    fn missing_dependencies_are_an_error() {
        let mut migrations = vec![migration(
            "test_sql",
            "Todo",
            1,
            vec![Dependency::new("test_sql", "User", "0001_create_table.mig")],
        )];
        let err = MigrationSorter::new(&mut migrations).sort().unwrap_err();
        match err {
            MigrationSorterError::MissingDependency {
                dependent,
                dependency,
            } => {
                assert_eq!(dependent, "test_sql:Todo:0001_create_table.mig");
                assert_eq!(dependency, "test_sql:User:0001_create_table.mig");
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn cycles_are_an_error() {
        let mut migrations = vec![
            migration(
                "a",
                "A",
                1,
                vec![Dependency::new("b", "B", "0001_create_table.mig")],
            ),
            migration(
                "b",
                "B",
                1,
                vec![Dependency::new("a", "A", "0001_create_table.mig")],
            ),
        ];
        let err = MigrationSorter::new(&mut migrations).sort().unwrap_err();
        assert!(matches!(
            err,
            MigrationSorterError::CyclicDependency { .. }
        ));
    }
}
