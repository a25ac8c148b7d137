use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    auth::PasswordDigest,
    config::Config,
    error::{Error, Result},
    sql::{
        engine::{ConnectionContext, transaction::Batch},
        executor::{
            mutation::{Delete, Insert, Update},
            query::{Describe, Order, Project, Read, Scan, Show},
            schema::{
                AlterSequence, CreateDatabase, CreateSchema, CreateSequence, CreateTable, DropObject,
                SetSearchPath, Use,
            },
            system::{AlterEntry, AlterUser, CreateEntry, CreateUser, ReloadConfig},
        },
        parser::ast::{AlterObject, CreateObject, ObjectKind, ObjectName, Statement},
        privilege::{Action, Privileges},
        types::Row,
    },
    storage::{DEFAULT_SCHEMA, Storage, SYSTEM_DATABASE, TableRef, user::User},
};

mod mutation;
mod query;
mod schema;
mod system;

pub(crate) use system::apply_registry;

/// Statement executor
pub trait Executor {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet>;
}

/// Builds the executor for a parsed statement
impl dyn Executor {
    pub fn build(statement: Statement) -> Box<dyn Executor> {
        match statement {
            Statement::Use { database } => Use::new(database),
            Statement::SetSearchPath { schema } => SetSearchPath::new(schema),
            Statement::Select(select) => {
                let mut node: Box<dyn Executor> = Scan::new(select.from, select.filter, select.window);
                if !select.order_by.is_empty() {
                    node = Order::new(node, select.order_by);
                }
                Project::new(node, select.columns, select.csv)
            }
            Statement::Insert { table, columns, values } => Insert::new(table, columns, values),
            Statement::Update { table, assignments, filter, window } => {
                Update::new(table, assignments, filter, window)
            }
            Statement::Delete { table, filter, window } => Delete::new(table, filter, window),
            Statement::Create(object) => match object {
                CreateObject::Database { name } => CreateDatabase::new(name),
                CreateObject::Schema { name } => CreateSchema::new(name),
                CreateObject::Sequence { name, start, increment } => {
                    CreateSequence::new(name, start, increment)
                }
                CreateObject::Table { name, columns, primary_key } => {
                    CreateTable::new(name, columns, primary_key)
                }
                CreateObject::User { name, options } => CreateUser::new(name, options),
                CreateObject::Entry { name, entry_type, value } => {
                    CreateEntry::new(name, entry_type, value)
                }
            },
            Statement::Drop { kind, name, if_exists } => DropObject::new(kind, name, if_exists),
            Statement::Alter(object) => match object {
                AlterObject::Sequence { name, increment, restart } => {
                    AlterSequence::new(name, increment, restart)
                }
                AlterObject::User { name, options } => AlterUser::new(name, options),
                AlterObject::Entry { name, value } => AlterEntry::new(name, value),
            },
            Statement::Show(target) => Show::new(target),
            Statement::Describe { table } => Describe::new(table),
            Statement::Read(target) => Read::new(target),
            Statement::ReloadConfig => ReloadConfig::new(),
        }
    }
}

/// Everything a statement executes against: storage, live configuration, the acting user,
/// the connection's current database and schema, and the batch snapshotting mutations.
pub struct Context<'a> {
    pub storage: &'a Storage,
    pub config: &'a RwLock<Config>,
    pub digest: &'a dyn PasswordDigest,
    pub user: &'a User,
    pub connection: &'a mut ConnectionContext,
    pub batch: Batch<'a>,
}

impl Context<'_> {
    pub fn privileges(&self, database: &str) -> Privileges {
        Privileges::resolve(&self.user.privileges, database)
    }

    pub fn authorize(&self, action: Action, database: &str) -> Result<()> {
        self.privileges(database).require(action, database)
    }

    pub fn require_root(&self) -> Result<()> {
        if !self.privileges(SYSTEM_DATABASE).root {
            return Err(Error::Permission(format!(
                "User '{}' is not a root user",
                self.user.username
            )));
        }
        Ok(())
    }

    /// Authorizes a mutation of the database and snapshots it before anything changes
    pub fn prepare_write(&mut self, action: Action, database: &str) -> Result<()> {
        self.authorize(action, database)?;
        self.batch.touch(database)
    }

    /// Resolves a table or sequence name against the connection's database and schema
    pub fn qualify(&self, name: &ObjectName) -> TableRef {
        TableRef::new(
            name.database.clone().unwrap_or_else(|| self.connection.database.clone()),
            name.schema.clone().unwrap_or_else(|| self.connection.schema.clone()),
            name.name.clone(),
        )
    }

    /// Database a schema name lives in
    pub fn schema_database(&self, name: &ObjectName) -> String {
        name.database.clone().unwrap_or_else(|| self.connection.database.clone())
    }

    /// Database and schema named by `FROM db[.schema]`, falling back to the connection's.
    /// A database without a schema means its `public` schema.
    pub fn listing_scope(&self, database: Option<&str>, schema: Option<&str>) -> (String, String) {
        match (database, schema) {
            (Some(db), Some(schema)) => (db.to_string(), schema.to_string()),
            (Some(db), None) => (db.to_string(), DEFAULT_SCHEMA.to_string()),
            _ => (self.connection.database.clone(), self.connection.schema.clone()),
        }
    }
}

/// Outcome of one statement
#[derive(Debug, PartialEq)]
pub enum ResultSet {
    Use { database: String },
    SetSearchPath { schema: String },
    Scan { columns: Vec<String>, rows: Vec<Row> },
    Csv { text: String },
    Insert { count: usize },
    Update { count: usize },
    Delete { count: usize },
    Create { kind: ObjectKind, name: String },
    Drop { kind: ObjectKind, name: String, existed: bool },
    Alter { kind: ObjectKind, name: String, state: Value },
    Show { items: Value },
    Describe { structure: Value },
    Read { item: Value },
    ReloadConfig { config: Value },
}

impl ResultSet {
    /// Splits the outcome into the message and data reported to the client
    pub fn into_output(self) -> (Option<String>, Option<Value>) {
        match self {
            ResultSet::Use { database } => (Some(format!("Using database '{}'", database)), None),
            ResultSet::SetSearchPath { schema } => {
                (Some(format!("Search path set to '{}'", schema)), None)
            }
            ResultSet::Scan { columns, rows } => {
                let rows = rows
                    .into_iter()
                    .map(|row| Value::Object(columns.iter().cloned().zip(row).collect()))
                    .collect();
                (None, Some(Value::Array(rows)))
            }
            ResultSet::Csv { text } => (None, Some(Value::String(text))),
            ResultSet::Insert { count } => (Some(format!("{} row(s) inserted", count)), None),
            ResultSet::Update { count } => (Some(format!("{} row(s) updated", count)), None),
            ResultSet::Delete { count } => (Some(format!("{} row(s) deleted", count)), None),
            ResultSet::Create { kind, name } => (Some(format!("{} '{}' created", kind, name)), None),
            ResultSet::Drop { kind, name, existed: true } => {
                (Some(format!("{} '{}' dropped", kind, name)), None)
            }
            ResultSet::Drop { kind, name, existed: false } => {
                (Some(format!("{} '{}' does not exist, skipped", kind, name)), None)
            }
            ResultSet::Alter { kind, name, state } => {
                (Some(format!("{} '{}' altered", kind, name)), Some(state))
            }
            ResultSet::Show { items } => (None, Some(items)),
            ResultSet::Describe { structure } => (None, Some(structure)),
            ResultSet::Read { item } => (None, Some(item)),
            ResultSet::ReloadConfig { config } => {
                (Some("Configuration reloaded".to_string()), Some(config))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ResultSet;
    use crate::sql::parser::ast::ObjectKind;

    #[test]
    fn test_into_output() {
        let scan = ResultSet::Scan {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec![json!(1), json!("a")], vec![json!(2), json!(null)]],
        };
        assert_eq!(
            scan.into_output(),
            (None, Some(json!([{"id": 1, "name": "a"}, {"id": 2, "name": null}])))
        );

        let drop = ResultSet::Drop { kind: ObjectKind::Table, name: "t".to_string(), existed: false };
        assert_eq!(drop.into_output().0.as_deref(), Some("Table 't' does not exist, skipped"));
        assert_eq!(
            ResultSet::Insert { count: 2 }.into_output(),
            (Some("2 row(s) inserted".to_string()), None)
        );
    }
}
