use std::{fs, sync::atomic::Ordering};

use tracing::{info, warn};

use crate::error::{Error, Result};

use super::{
    DB_LIST, DEFAULT_SCHEMA, REGISTRY_TABLE, SCHEMA_LIST, SYSTEM_DATABASE, Storage, TableRef,
    USERS_TABLE,
    listing::{add_to_listing, read_listing, remove_from_listing},
    registry, user, validate_name, write_json,
};

impl Storage {
    /// Lists databases. A read that finds the system database or one of its tables
    /// missing provisions what is absent.
    pub fn database_names(&self) -> Result<Vec<String>> {
        let file = self.root.join(DB_LIST);
        let names = read_listing(&file, &self.root)?;
        if self.system_intact(&names) || self.provisioning.swap(true, Ordering::SeqCst) {
            return Ok(names);
        }
        let provisioned = self.provision_system(&names);
        self.provisioning.store(false, Ordering::SeqCst);
        provisioned?;
        read_listing(&file, &self.root)
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.database_names()?.iter().any(|n| n == name))
    }

    pub(crate) fn require_database(&self, name: &str) -> Result<()> {
        if !self.database_exists(name)? {
            return Err(Error::NotFound(format!("Database '{}' does not exist", name)));
        }
        Ok(())
    }

    /// Creates a database together with its `public` schema
    pub fn create_database(&self, name: &str) -> Result<()> {
        validate_name("database", name)?;
        if self.database_exists(name)? {
            return Err(Error::Conflict(format!("Database '{}' already exists", name)));
        }
        let dir = self.database_dir(name);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(SCHEMA_LIST), &Vec::<String>::new())?;
        add_to_listing(&self.root.join(DB_LIST), name)?;
        self.create_schema(name, DEFAULT_SCHEMA)?;
        info!(database = name, "created database");
        Ok(())
    }

    pub fn drop_database(&self, name: &str) -> Result<()> {
        if name == SYSTEM_DATABASE {
            return Err(Error::Permission(format!(
                "The system database '{}' cannot be dropped",
                name
            )));
        }
        self.require_database(name)?;
        remove_from_listing(&self.root.join(DB_LIST), name)?;
        fs::remove_dir_all(self.database_dir(name))?;
        info!(database = name, "dropped database");
        Ok(())
    }

    fn system_intact(&self, names: &[String]) -> bool {
        names.iter().any(|n| n == SYSTEM_DATABASE)
            && self.table_dir(&system_table(USERS_TABLE)).is_dir()
            && self.table_dir(&system_table(REGISTRY_TABLE)).is_dir()
    }

    /// Creates whatever part of the system database is missing. A new registry table is
    /// seeded with the default entries.
    fn provision_system(&self, names: &[String]) -> Result<()> {
        if !names.iter().any(|n| n == SYSTEM_DATABASE) {
            info!("provisioning system database");
            self.create_database(SYSTEM_DATABASE)?;
        } else if !self.schema_exists(SYSTEM_DATABASE, DEFAULT_SCHEMA)? {
            warn!("recreating system schema");
            self.create_schema(SYSTEM_DATABASE, DEFAULT_SCHEMA)?;
        }
        let users = system_table(USERS_TABLE);
        if !self.table_dir(&users).is_dir() {
            warn!(table = %users, "provisioning system table");
            self.replace_table(&users, user::users_columns())?;
        }
        let registry = system_table(REGISTRY_TABLE);
        if !self.table_dir(&registry).is_dir() {
            warn!(table = %registry, "provisioning system table");
            self.replace_table(&registry, registry::registry_columns())?;
            for (name, entry_type, value) in &self.seed {
                self.create_entry(name, *entry_type, value.clone())?;
            }
        }
        Ok(())
    }
}

fn system_table(name: &str) -> TableRef {
    TableRef::new(SYSTEM_DATABASE, DEFAULT_SCHEMA, name)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        config::Config,
        error::{Error, Result},
        storage::{DEFAULT_SCHEMA, Storage, SYSTEM_DATABASE, TableRef, USERS_TABLE, read_json},
    };

    #[test]
    fn test_system_database_self_provisions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;

        assert_eq!(storage.database_names()?, vec![SYSTEM_DATABASE.to_string()]);
        assert_eq!(
            storage.table_names(SYSTEM_DATABASE, DEFAULT_SCHEMA)?,
            vec!["users".to_string(), "registry".to_string()]
        );
        assert!(storage.read_entry("jsdb.server.port").is_ok());
        assert!(storage.table_exists(&TableRef::new(SYSTEM_DATABASE, DEFAULT_SCHEMA, USERS_TABLE))?);
        assert!(storage.sequence_names(SYSTEM_DATABASE, DEFAULT_SCHEMA)?.contains(&"users_id_seq".to_string()));

        // A second read does not provision again
        assert_eq!(storage.entries()?.len(), Config::new(dir.path()).default_entries().len());
        Ok(())
    }

    #[test]
    fn test_create_drop_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;

        storage.create_database("shop")?;
        assert!(matches!(storage.create_database("shop"), Err(Error::Conflict(_))));
        assert_eq!(storage.schema_names("shop")?, vec![DEFAULT_SCHEMA.to_string()]);
        let listed: Vec<String> = read_json(&dir.path().join("dblist.json"))?;
        assert_eq!(listed, vec!["jsdb".to_string(), "shop".to_string()]);

        storage.drop_database("shop")?;
        assert!(!dir.path().join("shop").exists());
        assert!(matches!(storage.drop_database("shop"), Err(Error::NotFound(_))));
        assert!(matches!(storage.drop_database(SYSTEM_DATABASE), Err(Error::Permission(_))));
        Ok(())
    }

    #[test]
    fn test_listing_heals_from_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;
        storage.create_database("shop")?;

        // A database directory removed behind the engine's back is pruned
        fs::remove_dir_all(dir.path().join("shop"))?;
        assert!(!storage.database_exists("shop")?);
        let listed: Vec<String> = read_json(&dir.path().join("dblist.json"))?;
        assert_eq!(listed, vec!["jsdb".to_string()]);
        Ok(())
    }

    #[test]
    fn test_missing_system_table_is_provisioned() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;
        storage.create_user("bob", "x".to_string(), Default::default(), true)?;
        assert!(storage.find_user("bob")?.is_some());

        fs::remove_dir_all(dir.path().join(SYSTEM_DATABASE).join(DEFAULT_SCHEMA).join(USERS_TABLE))?;
        fs::remove_dir_all(dir.path().join(SYSTEM_DATABASE).join(DEFAULT_SCHEMA).join("registry"))?;
        assert_eq!(storage.database_names()?, vec![SYSTEM_DATABASE.to_string()]);
        assert!(storage.table_exists(&TableRef::new(SYSTEM_DATABASE, DEFAULT_SCHEMA, USERS_TABLE))?);
        assert!(storage.find_user("bob")?.is_none());
        assert!(storage.read_entry("jsdb.server.port").is_ok());

        // Users get ids from a fresh sequence
        storage.create_user("carol", "x".to_string(), Default::default(), true)?;
        assert!(storage.find_user("carol")?.is_some());
        Ok(())
    }
}
