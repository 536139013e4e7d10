//! Version migration chain (spec §4.7, §7): an ordered set of callbacks
//! each mapping data-at-version-N to data-at-version-N+1, applied until the
//! caller's `expected_version` is reached. Grounded on the original's
//! migration-table-by-source-version and resolved per DESIGN.md: a chain
//! "cycles" iff applying the registered migration for the current version
//! ever revisits a version already seen in this call.

use std::collections::HashMap;

use crate::error::{SaveError, SaveResult};
use crate::tree::DataNode;

/// A single version-to-version transform. Boxed so callers can register
/// closures as readily as free functions.
pub type MigrationFn = Box<dyn Fn(DataNode) -> SaveResult<DataNode> + Send + Sync>;

/// A registry of migrations keyed by source version, applied in sequence
/// until the target version is reached.
#[derive(Default)]
pub struct MigrationChain {
    steps: HashMap<i32, (i32, MigrationFn)>,
}

impl MigrationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration from `from_version` to `to_version`. Only one
    /// migration may be registered per source version.
    pub fn register(
        &mut self,
        from_version: i32,
        to_version: i32,
        migrate: impl Fn(DataNode) -> SaveResult<DataNode> + Send + Sync + 'static,
    ) {
        self.steps.insert(from_version, (to_version, Box::new(migrate)));
    }

    /// Apply registered migrations to `data`, starting at `current_version`,
    /// until `target_version` is reached. A no-op if `current_version`
    /// already equals `target_version`.
    pub fn apply(&self, mut data: DataNode, current_version: i32, target_version: i32) -> SaveResult<DataNode> {
        if current_version > target_version {
            return Err(SaveError::FutureMigrationVersion {
                target: target_version,
                current: current_version,
            });
        }

        let mut version = current_version;
        let mut seen = std::collections::HashSet::new();
        seen.insert(version);

        while version != target_version {
            let (next_version, migrate) = self
                .steps
                .get(&version)
                .ok_or(SaveError::NoMigrations(version))?;
            data = migrate(data).map_err(|_| SaveError::MigrationCallback(version))?;
            if !seen.insert(*next_version) {
                return Err(SaveError::CyclicalMigrations(*next_version));
            }
            version = *next_version;
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn table(pairs: &[(&str, DataNode)]) -> DataNode {
        DataNode::Table(pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect())
    }

    #[test]
    fn no_op_when_already_at_target_version() {
        let chain = MigrationChain::new();
        let data = table(&[("level", DataNode::Int(1))]);
        let result = chain.apply(data.clone(), 3, 3).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn applies_a_chain_of_two_migrations() {
        let mut chain = MigrationChain::new();
        chain.register(1, 2, |data| {
            let DataNode::Table(mut t) = data else { return Ok(data) };
            t.insert("added_in_v2".to_string(), DataNode::Bool(true));
            Ok(DataNode::Table(t))
        });
        chain.register(2, 3, |data| {
            let DataNode::Table(mut t) = data else { return Ok(data) };
            t.insert("added_in_v3".to_string(), DataNode::Int(7));
            Ok(DataNode::Table(t))
        });

        let data = table(&[("level", DataNode::Int(1))]);
        let migrated = chain.apply(data, 1, 3).unwrap();

        let expected = table(&[
            ("level", DataNode::Int(1)),
            ("added_in_v2", DataNode::Bool(true)),
            ("added_in_v3", DataNode::Int(7)),
        ]);
        assert_eq!(migrated, expected);
    }

    #[test]
    fn missing_migration_is_an_error() {
        let chain = MigrationChain::new();
        let err = chain.apply(DataNode::Null, 1, 2).unwrap_err();
        assert!(matches!(err, SaveError::NoMigrations(1)));
    }

    #[test]
    fn cyclical_chain_is_detected() {
        let mut chain = MigrationChain::new();
        chain.register(1, 2, Ok);
        chain.register(2, 1, Ok);
        let err = chain.apply(DataNode::Null, 1, 3).unwrap_err();
        assert!(matches!(err, SaveError::CyclicalMigrations(1)));
    }

    #[test]
    fn target_older_than_current_is_rejected() {
        let chain = MigrationChain::new();
        let err = chain.apply(DataNode::Null, 5, 2).unwrap_err();
        assert!(matches!(
            err,
            SaveError::FutureMigrationVersion { target: 2, current: 5 }
        ));
    }
}
