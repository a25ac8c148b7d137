use crate::{
    error::{Error, Result},
    sql::{
        executor::{Context, Executor, ResultSet, system},
        parser::ast::{Column, ObjectKind, ObjectName},
        privilege::Action,
    },
    storage::{DEFAULT_SCHEMA, sequence::Sequence},
};

/// USE <db>: switches the connection to the database and its `public` schema
pub struct Use {
    database: String,
}

impl Use {
    pub fn new(database: String) -> Box<Self> {
        Box::new(Self { database })
    }
}

impl Executor for Use {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        ctx.authorize(Action::Read, &self.database)?;
        ctx.storage.require_database(&self.database)?;
        ctx.connection.database = self.database.clone();
        ctx.connection.schema = DEFAULT_SCHEMA.to_string();
        Ok(ResultSet::Use { database: self.database })
    }
}

/// SET SEARCH_PATH TO <schema>
pub struct SetSearchPath {
    schema: String,
}

impl SetSearchPath {
    pub fn new(schema: String) -> Box<Self> {
        Box::new(Self { schema })
    }
}

impl Executor for SetSearchPath {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let database = ctx.connection.database.clone();
        ctx.authorize(Action::Read, &database)?;
        ctx.storage.require_schema(&database, &self.schema)?;
        ctx.connection.schema = self.schema.clone();
        Ok(ResultSet::SetSearchPath { schema: self.schema })
    }
}

pub struct CreateDatabase {
    name: String,
}

impl CreateDatabase {
    pub fn new(name: String) -> Box<Self> {
        Box::new(Self { name })
    }
}

impl Executor for CreateDatabase {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        ctx.prepare_write(Action::Create, &self.name)?;
        ctx.storage.create_database(&self.name)?;
        Ok(ResultSet::Create { kind: ObjectKind::Database, name: self.name })
    }
}

pub struct CreateSchema {
    name: ObjectName,
}

impl CreateSchema {
    pub fn new(name: ObjectName) -> Box<Self> {
        Box::new(Self { name })
    }
}

impl Executor for CreateSchema {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let database = ctx.schema_database(&self.name);
        ctx.prepare_write(Action::Create, &database)?;
        ctx.storage.create_schema(&database, &self.name.name)?;
        Ok(ResultSet::Create { kind: ObjectKind::Schema, name: self.name.to_string() })
    }
}

pub struct CreateSequence {
    name: ObjectName,
    start: i64,
    increment: i64,
}

impl CreateSequence {
    pub fn new(name: ObjectName, start: i64, increment: i64) -> Box<Self> {
        Box::new(Self { name, start, increment })
    }
}

impl Executor for CreateSequence {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let seq = ctx.qualify(&self.name);
        ctx.prepare_write(Action::Create, &seq.database)?;
        let sequence = Sequence::new(self.start, self.increment)?;
        ctx.storage.create_sequence(&seq.database, &seq.schema, &seq.name, sequence)?;
        Ok(ResultSet::Create { kind: ObjectKind::Sequence, name: self.name.to_string() })
    }
}

/// CREATE TABLE executor
pub struct CreateTable {
    name: ObjectName,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl CreateTable {
    pub fn new(name: ObjectName, columns: Vec<Column>, primary_key: Vec<String>) -> Box<Self> {
        Box::new(Self { name, columns, primary_key })
    }
}

impl Executor for CreateTable {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let table = ctx.qualify(&self.name);
        ctx.prepare_write(Action::Create, &table.database)?;
        ctx.storage.create_table(&table, self.columns, self.primary_key)?;
        Ok(ResultSet::Create { kind: ObjectKind::Table, name: self.name.to_string() })
    }
}

/// DROP <kind> [IF EXISTS] <name>
pub struct DropObject {
    kind: ObjectKind,
    name: ObjectName,
    if_exists: bool,
}

impl DropObject {
    pub fn new(kind: ObjectKind, name: ObjectName, if_exists: bool) -> Box<Self> {
        Box::new(Self { kind, name, if_exists })
    }

    fn drop_object(&self, ctx: &mut Context) -> Result<()> {
        match self.kind {
            ObjectKind::Database => {
                ctx.prepare_write(Action::Delete, &self.name.name)?;
                ctx.storage.drop_database(&self.name.name)
            }
            ObjectKind::Schema => {
                let database = ctx.schema_database(&self.name);
                ctx.prepare_write(Action::Delete, &database)?;
                ctx.storage.drop_schema(&database, &self.name.name)
            }
            ObjectKind::Sequence => {
                let seq = ctx.qualify(&self.name);
                ctx.prepare_write(Action::Delete, &seq.database)?;
                ctx.storage.drop_sequence(&seq.database, &seq.schema, &seq.name)
            }
            ObjectKind::Table => {
                let table = ctx.qualify(&self.name);
                ctx.prepare_write(Action::Delete, &table.database)?;
                ctx.storage.drop_table(&table)
            }
            ObjectKind::User => system::drop_user(ctx, &self.name.name),
            ObjectKind::Entry => system::drop_entry(ctx, &self.name.name),
        }
    }
}

impl Executor for DropObject {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let existed = match self.drop_object(ctx) {
            Ok(()) => true,
            Err(Error::NotFound(_)) if self.if_exists => false,
            Err(err) => return Err(err),
        };
        Ok(ResultSet::Drop { kind: self.kind, name: self.name.to_string(), existed })
    }
}

/// ALTER SEQUENCE <name> [INCREMENT BY n] [RESTART WITH n]
pub struct AlterSequence {
    name: ObjectName,
    increment: Option<i64>,
    restart: Option<i64>,
}

impl AlterSequence {
    pub fn new(name: ObjectName, increment: Option<i64>, restart: Option<i64>) -> Box<Self> {
        Box::new(Self { name, increment, restart })
    }
}

impl Executor for AlterSequence {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let seq = ctx.qualify(&self.name);
        ctx.prepare_write(Action::Update, &seq.database)?;
        let altered =
            ctx.storage.alter_sequence(&seq.database, &seq.schema, &seq.name, self.increment, self.restart)?;
        Ok(ResultSet::Alter {
            kind: ObjectKind::Sequence,
            name: self.name.to_string(),
            state: serde_json::to_value(altered)?,
        })
    }
}
