//! File-backed storage engine.
//!
//! Every database is a directory under the storage root, every schema a directory inside
//! its database and every table a directory inside its schema. Each level keeps a JSON
//! listing of its children which is reconciled against the filesystem whenever it is read.
//!
//! ```text
//! <root>/dblist.json
//! <root>/<db>/schlist.json
//! <root>/<db>/<schema>/seqlist.json
//! <root>/<db>/<schema>/tablelist.json
//! <root>/<db>/<schema>/<table>/tablestruct.json
//! <root>/<db>/<schema>/<table>/tabledata.json
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::{Error, Result},
    sql::types::DataType,
};

pub mod database;
pub mod listing;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod sequence;
pub mod snapshot;
pub mod table;
pub mod user;

pub use table::TableRef;

/// Reserved system database
pub const SYSTEM_DATABASE: &str = "jsdb";
/// Schema created with every database
pub const DEFAULT_SCHEMA: &str = "public";
pub const USERS_TABLE: &str = "users";
pub const REGISTRY_TABLE: &str = "registry";

const DB_LIST: &str = "dblist.json";
const SCHEMA_LIST: &str = "schlist.json";
const SEQUENCE_LIST: &str = "seqlist.json";
const TABLE_LIST: &str = "tablelist.json";
const TABLE_STRUCT: &str = "tablestruct.json";
const TABLE_DATA: &str = "tabledata.json";

/// Handle on a storage root
pub struct Storage {
    root: PathBuf,
    /// Registry entries written when the system database is provisioned
    seed: Vec<(String, DataType, Value)>,
    /// Set while the system database is being provisioned
    provisioning: AtomicBool,
}

impl Storage {
    /// Opens (creating if needed) the storage root named by the configuration
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        info!(root = %config.root.display(), "opened storage");
        Ok(Self {
            root: config.root.clone(),
            seed: config.default_entries(),
            provisioning: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }

    pub(crate) fn schema_dir(&self, database: &str, schema: &str) -> PathBuf {
        self.root.join(database).join(schema)
    }

    pub(crate) fn table_dir(&self, table: &TableRef) -> PathBuf {
        self.schema_dir(&table.database, &table.schema).join(&table.name)
    }
}

/// Reads and decodes a JSON file
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encodes and rewrites a whole JSON file
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    debug!(path = %path.display(), "writing");
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

/// Names of databases, schemas, tables and sequences become path segments, so they are
/// restricted to word characters.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '$'));
    if !valid {
        return Err(Error::Validation(format!("Invalid {} name '{}'", kind, name)));
    }
    Ok(())
}
