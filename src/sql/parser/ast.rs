use std::{collections::BTreeMap, fmt::Display};

use serde_json::Value;

use crate::sql::{expression::Predicate, types::DataType};

/// Abstract Syntax Tree (AST) node definitions for statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// USE <db>
    Use { database: String },
    /// SET SEARCH_PATH TO <schema>
    SetSearchPath { schema: String },
    Select(Select),
    /// INSERT INTO <table> [(<cols>)] VALUES (<values>)[, (<values>)]
    Insert {
        table: ObjectName,
        columns: Option<Vec<String>>,
        values: Vec<Vec<Expression>>,
    },
    Update {
        table: ObjectName,
        assignments: Vec<(String, Expression)>,
        filter: Option<Predicate>,
        window: Window,
    },
    Delete {
        table: ObjectName,
        filter: Option<Predicate>,
        window: Window,
    },
    Create(CreateObject),
    Drop {
        kind: ObjectKind,
        name: ObjectName,
        if_exists: bool,
    },
    Alter(AlterObject),
    Show(ShowTarget),
    /// DESCRIBE TABLE <name>
    Describe { table: ObjectName },
    Read(ReadTarget),
    /// RELOAD CONFIG
    ReloadConfig,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// None means `*`
    pub columns: Option<Vec<String>>,
    pub from: ObjectName,
    pub filter: Option<Predicate>,
    /// Parsed but never applied; rows are not grouped
    pub group_by: Vec<String>,
    pub order_by: Vec<(String, OrderDirection)>,
    pub window: Window,
    /// Trailing CSV pseudo-keyword
    pub csv: bool,
}

/// LIMIT / OFFSET bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Possibly qualified object name: `name`, `schema.name` or `db.schema.name`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectName {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self { database: None, schema: None, name: name.into() }
    }

    /// Splits a dotted identifier into its parts
    pub fn parse(dotted: &str) -> Option<Self> {
        let parts: Vec<&str> = dotted.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        let owned = |s: &str| Some(s.to_string());
        Some(match parts.as_slice() {
            [name] => Self::new(*name),
            [schema, name] => Self { database: None, schema: owned(schema), name: name.to_string() },
            [database, schema, name] => Self {
                database: owned(database),
                schema: owned(schema),
                name: name.to_string(),
            },
            _ => return None,
        })
    }
}

impl Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(db) = &self.database {
            write!(f, "{}.", db)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        f.write_str(&self.name)
    }
}

/// Kinds of named objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Database,
    Schema,
    Sequence,
    Table,
    User,
    Entry,
}

impl ObjectKind {
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word.to_uppercase().as_ref() {
            "DATABASE" => ObjectKind::Database,
            "SCHEMA" => ObjectKind::Schema,
            "SEQUENCE" => ObjectKind::Sequence,
            "TABLE" => ObjectKind::Table,
            "USER" => ObjectKind::User,
            "ENTRY" => ObjectKind::Entry,
            _ => return None,
        })
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ObjectKind::Database => "Database",
            ObjectKind::Schema => "Schema",
            ObjectKind::Sequence => "Sequence",
            ObjectKind::Table => "Table",
            ObjectKind::User => "User",
            ObjectKind::Entry => "Entry",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateObject {
    Database {
        name: String,
    },
    Schema {
        name: ObjectName,
    },
    Sequence {
        name: ObjectName,
        start: i64,
        increment: i64,
    },
    Table {
        name: ObjectName,
        columns: Vec<Column>,
        /// Table-level `PRIMARY KEY (a, b)` clause
        primary_key: Vec<String>,
    },
    User {
        name: String,
        options: UserOptions,
    },
    Entry {
        name: String,
        entry_type: DataType,
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterObject {
    Sequence {
        name: ObjectName,
        increment: Option<i64>,
        restart: Option<i64>,
    },
    User {
        name: String,
        options: UserOptions,
    },
    Entry {
        name: String,
        value: Value,
    },
}

/// User attributes given to CREATE USER / ALTER USER
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserOptions {
    pub password: Option<String>,
    pub privileges: Option<BTreeMap<String, u8>>,
    pub valid: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShowTarget {
    Databases,
    Schemas { database: Option<String> },
    /// SHOW SEQUENCES [FROM db[.schema]]
    Sequences { database: Option<String>, schema: Option<String> },
    /// SHOW TABLES [FROM db[.schema]]
    Tables { database: Option<String>, schema: Option<String> },
    Users,
    Registry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadTarget {
    Entry(String),
    Sequence(ObjectName),
}

/// Sort direction (ascending or descending)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Column definition for CREATE TABLE statements
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub default: Option<Expression>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub enum_values: Option<Vec<String>>,
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            not_null: false,
            unique: false,
            primary_key: false,
            default: None,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            enum_values: None,
            auto_increment: false,
        }
    }
}

/// A value written by INSERT or UPDATE
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// DEFAULT sentinel: use the column's declared default
    Default,
    /// Constant value (MD5(...) is folded into a string constant at parse time)
    Consts(Value),
    /// NEXTVAL(<seq>), resolved when the row is written
    NextVal(String),
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Self::Consts(value)
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectName;

    #[test]
    fn test_object_name() {
        assert_eq!(ObjectName::parse("t"), Some(ObjectName::new("t")));
        let qualified = ObjectName::parse("db.s.t").unwrap();
        assert_eq!(qualified.database.as_deref(), Some("db"));
        assert_eq!(qualified.schema.as_deref(), Some("s"));
        assert_eq!(qualified.to_string(), "db.s.t");
        assert_eq!(ObjectName::parse("a..b"), None);
        assert_eq!(ObjectName::parse("a.b.c.d"), None);
    }
}
