use tracing::{debug, error, warn};

use crate::{
    error::Result,
    storage::{
        Storage,
        snapshot::{SnapshotHandle, SnapshotProvider},
        validate_name,
    },
};

/// All-or-nothing scope of one statement batch.
///
/// Every database is snapshotted the first time a statement is about to mutate it. A
/// rollback restores all of them, undoing the statements that already succeeded; a commit
/// throws them away. Without a provider the batch has no rollback.
pub struct Batch<'a> {
    storage: &'a Storage,
    provider: Option<&'a dyn SnapshotProvider>,
    snapshots: Vec<SnapshotHandle>,
}

impl<'a> Batch<'a> {
    pub fn new(storage: &'a Storage, provider: Option<&'a dyn SnapshotProvider>) -> Self {
        Self { storage, provider, snapshots: Vec::new() }
    }

    /// Snapshots the database unless this batch already did
    pub fn touch(&mut self, database: &str) -> Result<()> {
        let Some(provider) = self.provider else {
            return Ok(());
        };
        if self.snapshots.iter().any(|h| h.database == database) {
            return Ok(());
        }
        validate_name("database", database)?;
        let handle = provider.snapshot(self.storage, database)?;
        debug!(database, id = handle.id, "snapshot taken");
        self.snapshots.push(handle);
        Ok(())
    }

    /// Databases snapshotted so far
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(|h| h.database.as_str())
    }

    /// Restores every snapshot, most recent first. All of them are attempted; the first
    /// failure is returned.
    pub fn rollback(self) -> Result<()> {
        let Some(provider) = self.provider else {
            return Ok(());
        };
        let mut outcome = Ok(());
        for handle in self.snapshots.iter().rev() {
            warn!(database = %handle.database, "rolling back");
            if let Err(err) = provider.restore(self.storage, handle) {
                error!(database = %handle.database, %err, "rollback failed");
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        for handle in &self.snapshots {
            provider.discard(handle)?;
        }
        outcome
    }

    pub fn commit(self) -> Result<()> {
        if let Some(provider) = self.provider {
            for handle in &self.snapshots {
                provider.discard(handle)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Batch;
    use crate::{
        config::Config,
        error::{Error, Result},
        sql::{parser::ast::{Column, Expression}, types::DataType},
        storage::{Storage, TableRef, memory::MemorySnapshotProvider},
    };

    fn setup(dir: &tempfile::TempDir) -> Result<(Storage, TableRef)> {
        let storage = Storage::open(&Config::new(dir.path()))?;
        storage.create_database("shop")?;
        let table = TableRef::new("shop", "public", "t");
        storage.create_table(&table, vec![Column::new("n", DataType::Integer)], vec![])?;
        Ok((storage, table))
    }

    fn insert(storage: &Storage, table: &TableRef, n: i64) -> Result<usize> {
        storage.insert(table, None, vec![vec![Expression::from(json!(n))]])
    }

    #[test]
    fn test_rollback_restores_every_touched_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (storage, table) = setup(&dir)?;
        let provider = MemorySnapshotProvider::new();

        let mut batch = Batch::new(&storage, Some(&provider));
        batch.touch("shop")?;
        insert(&storage, &table, 1)?;
        batch.touch("shop")?;
        insert(&storage, &table, 2)?;
        batch.touch("fresh")?;
        storage.create_database("fresh")?;
        assert_eq!(batch.touched().collect::<Vec<_>>(), vec!["shop", "fresh"]);
        assert_eq!(provider.len(), 2);

        batch.rollback()?;
        assert!(storage.scan(&table)?.1.is_empty());
        assert!(!storage.database_exists("fresh")?);
        assert!(provider.is_empty());
        Ok(())
    }

    #[test]
    fn test_commit_keeps_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (storage, table) = setup(&dir)?;
        let provider = MemorySnapshotProvider::new();

        let mut batch = Batch::new(&storage, Some(&provider));
        batch.touch("shop")?;
        insert(&storage, &table, 1)?;
        batch.commit()?;
        assert_eq!(storage.scan(&table)?.1.len(), 1);
        assert!(provider.is_empty());
        Ok(())
    }

    #[test]
    fn test_without_provider() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (storage, table) = setup(&dir)?;
        let mut batch = Batch::new(&storage, None);
        batch.touch("shop")?;
        insert(&storage, &table, 1)?;
        batch.rollback()?;
        assert_eq!(storage.scan(&table)?.1.len(), 1);

        let provider = MemorySnapshotProvider::new();
        let mut batch = Batch::new(&storage, Some(&provider));
        assert!(matches!(batch.touch("../escape"), Err(Error::Validation(_))));
        Ok(())
    }
}
