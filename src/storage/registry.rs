//! Typed key/value entries kept in `jsdb.public.registry`.

use serde_json::{Value, json};
use tracing::info;

use crate::{
    error::{Error, Result},
    sql::{
        expression::Predicate,
        parser::ast::{Column, Expression, Window},
        types::{DataType, Row},
    },
};

use super::{DEFAULT_SCHEMA, REGISTRY_TABLE, SYSTEM_DATABASE, Storage, TableRef};

/// Prefix of system-owned entries
pub const SYSTEM_PREFIX: &str = "jsdb.";

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub entry_type: DataType,
    pub value: Value,
}

impl Entry {
    /// Strings are stored raw, other types as JSON text
    fn encode(&self) -> Result<String> {
        Ok(match &self.value {
            Value::String(s) if self.entry_type == DataType::String => s.clone(),
            value => serde_json::to_string(value)?,
        })
    }

    fn from_row(row: &Row) -> Result<Self> {
        let (Some(Value::String(name)), Some(Value::String(tag)), Some(Value::String(raw))) =
            (row.first(), row.get(1), row.get(2))
        else {
            return Err(Error::Internal(format!("malformed registry row {:?}", row)));
        };
        let entry_type = DataType::from_name(tag)
            .ok_or_else(|| Error::Internal(format!("registry entry '{}' has unknown type '{}'", name, tag)))?;
        let value = match entry_type {
            DataType::String => Value::String(raw.clone()),
            _ => serde_json::from_str(raw)?,
        };
        Ok(Self { name: name.clone(), entry_type, value })
    }

    pub fn is_system(&self) -> bool {
        self.name.starts_with(SYSTEM_PREFIX)
    }

    /// `{entryName, type, value}` as reported to clients
    pub fn to_json(&self) -> Value {
        json!({"entryName": self.name, "type": self.entry_type, "value": self.value})
    }
}

/// Column layout of the registry table
pub(crate) fn registry_columns() -> Vec<Column> {
    let mut name = Column::new("entryName", DataType::String);
    name.primary_key = true;
    let mut entry_type = Column::new("type", DataType::String);
    entry_type.not_null = true;
    let value = Column::new("value", DataType::String);
    vec![name, entry_type, value]
}

fn registry() -> TableRef {
    TableRef::new(SYSTEM_DATABASE, DEFAULT_SCHEMA, REGISTRY_TABLE)
}

fn check_type(name: &str, entry_type: DataType, value: &Value) -> Result<()> {
    if !entry_type.matches(value) {
        return Err(Error::Constraint(format!(
            "Entry '{}' expects {}, got {}",
            name, entry_type, value
        )));
    }
    Ok(())
}

impl Storage {
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let (_, rows) = self.scan(&registry())?;
        rows.iter().map(Entry::from_row).collect()
    }

    pub fn find_entry(&self, name: &str) -> Result<Option<Entry>> {
        Ok(self.entries()?.into_iter().find(|e| e.name == name))
    }

    pub fn read_entry(&self, name: &str) -> Result<Entry> {
        self.find_entry(name)?
            .ok_or_else(|| Error::NotFound(format!("Entry '{}' does not exist", name)))
    }

    pub fn create_entry(&self, name: &str, entry_type: DataType, value: Value) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!("Invalid entry name '{}'", name)));
        }
        if self.find_entry(name)?.is_some() {
            return Err(Error::Conflict(format!("Entry '{}' already exists", name)));
        }
        check_type(name, entry_type, &value)?;
        let entry = Entry { name: name.to_string(), entry_type, value };
        let row = vec![
            Expression::from(Value::from(name)),
            Expression::from(Value::from(entry_type.as_str())),
            Expression::from(Value::from(entry.encode()?)),
        ];
        self.insert(&registry(), None, vec![row])?;
        info!(entry = name, "created registry entry");
        Ok(())
    }

    /// Replaces an entry's value, keeping its declared type
    pub fn update_entry(&self, name: &str, value: Value) -> Result<Entry> {
        let mut entry = self.read_entry(name)?;
        check_type(name, entry.entry_type, &value)?;
        entry.value = value;
        let assignments = vec![("value".to_string(), Expression::from(Value::from(entry.encode()?)))];
        self.update(
            &registry(),
            &assignments,
            Some(&Predicate::equals("entryName", Value::from(name))),
            Window::default(),
        )?;
        Ok(entry)
    }

    pub fn drop_entry(&self, name: &str) -> Result<()> {
        if name.starts_with(SYSTEM_PREFIX) {
            return Err(Error::Permission(format!("System entry '{}' cannot be dropped", name)));
        }
        let filter = Predicate::equals("entryName", Value::from(name));
        if self.delete(&registry(), Some(&filter), Window::default())? == 0 {
            return Err(Error::NotFound(format!("Entry '{}' does not exist", name)));
        }
        info!(entry = name, "dropped registry entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{
        config::Config,
        error::{Error, Result},
        sql::types::DataType,
        storage::{Storage, read_json},
    };

    #[test]
    fn test_entry_lifecycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;

        storage.create_entry("app.limits", DataType::Object, json!({"max": 5}))?;
        storage.create_entry("app.name", DataType::String, json!("shop"))?;
        assert!(matches!(
            storage.create_entry("app.name", DataType::String, json!("x")),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            storage.create_entry("app.port", DataType::Number, json!("80")),
            Err(Error::Constraint(_))
        ));

        assert_eq!(storage.read_entry("app.limits")?.value, json!({"max": 5}));
        assert_eq!(storage.update_entry("app.limits", json!({"max": 9}))?.value, json!({"max": 9}));
        assert!(matches!(storage.update_entry("app.limits", json!(1)), Err(Error::Constraint(_))));

        // Non-string values are stored as JSON text, strings raw
        let rows: Vec<Vec<serde_json::Value>> = read_json(&dir.path().join("jsdb/public/registry/tabledata.json"))?;
        assert!(rows.contains(&vec![json!("app.limits"), json!("object"), json!(r#"{"max":9}"#)]));
        assert!(rows.contains(&vec![json!("app.name"), json!("string"), json!("shop")]));

        storage.drop_entry("app.name")?;
        assert!(matches!(storage.read_entry("app.name"), Err(Error::NotFound(_))));
        assert!(matches!(storage.drop_entry("app.name"), Err(Error::NotFound(_))));
        assert!(matches!(storage.drop_entry("jsdb.server.port"), Err(Error::Permission(_))));
        assert_eq!(storage.read_entry("jsdb.server.port")?.value, json!(2345));
        Ok(())
    }
}
