use std::{fs, path::PathBuf};

use tracing::info;

use crate::error::{Error, Result};

use super::{
    DEFAULT_SCHEMA, SCHEMA_LIST, SEQUENCE_LIST, SYSTEM_DATABASE, Storage, TABLE_LIST,
    listing::{add_to_listing, read_listing, remove_from_listing},
    sequence::SequenceList,
    validate_name, write_json,
};

impl Storage {
    pub fn schema_names(&self, database: &str) -> Result<Vec<String>> {
        self.require_database(database)?;
        let dir = self.database_dir(database);
        read_listing(&dir.join(SCHEMA_LIST), &dir)
    }

    pub fn schema_exists(&self, database: &str, schema: &str) -> Result<bool> {
        Ok(self.schema_names(database)?.iter().any(|s| s == schema))
    }

    /// Directory of an existing schema
    pub(crate) fn require_schema(&self, database: &str, schema: &str) -> Result<PathBuf> {
        if !self.schema_exists(database, schema)? {
            return Err(Error::NotFound(format!(
                "Schema '{}' does not exist in database '{}'",
                schema, database
            )));
        }
        Ok(self.schema_dir(database, schema))
    }

    pub fn create_schema(&self, database: &str, schema: &str) -> Result<()> {
        validate_name("schema", schema)?;
        if self.schema_exists(database, schema)? {
            return Err(Error::Conflict(format!(
                "Schema '{}' already exists in database '{}'",
                schema, database
            )));
        }
        let dir = self.schema_dir(database, schema);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(SEQUENCE_LIST), &SequenceList::default())?;
        write_json(&dir.join(TABLE_LIST), &Vec::<String>::new())?;
        add_to_listing(&self.database_dir(database).join(SCHEMA_LIST), schema)?;
        info!(database, schema, "created schema");
        Ok(())
    }

    pub fn drop_schema(&self, database: &str, schema: &str) -> Result<()> {
        if database == SYSTEM_DATABASE && schema == DEFAULT_SCHEMA {
            return Err(Error::Permission(format!(
                "Schema '{}.{}' cannot be dropped",
                database, schema
            )));
        }
        let dir = self.require_schema(database, schema)?;
        remove_from_listing(&self.database_dir(database).join(SCHEMA_LIST), schema)?;
        fs::remove_dir_all(dir)?;
        info!(database, schema, "dropped schema");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::Config,
        error::{Error, Result},
        storage::Storage,
    };

    #[test]
    fn test_schema_lifecycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;
        storage.create_database("shop")?;

        storage.create_schema("shop", "sales")?;
        assert!(matches!(storage.create_schema("shop", "sales"), Err(Error::Conflict(_))));
        assert_eq!(storage.schema_names("shop")?, vec!["public".to_string(), "sales".to_string()]);
        assert!(dir.path().join("shop/sales/seqlist.json").exists());
        assert!(dir.path().join("shop/sales/tablelist.json").exists());

        storage.drop_schema("shop", "sales")?;
        assert!(!storage.schema_exists("shop", "sales")?);
        assert!(matches!(storage.drop_schema("shop", "sales"), Err(Error::NotFound(_))));
        assert!(matches!(storage.schema_names("nowhere"), Err(Error::NotFound(_))));
        assert!(matches!(storage.drop_schema("jsdb", "public"), Err(Error::Permission(_))));
        Ok(())
    }
}
