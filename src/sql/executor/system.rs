//! Users, registry entries and configuration reload, all stored in the system database.

use serde_json::{Value, json};
use tracing::info;

use crate::{
    config::Config,
    error::{Error, Result},
    sql::{
        executor::{Context, Executor, ResultSet},
        parser::ast::{ObjectKind, UserOptions},
        privilege::Action,
        types::DataType,
    },
    storage::{Storage, SYSTEM_DATABASE, registry::SYSTEM_PREFIX},
};

/// Overlays the registry's entries onto a configuration
pub(crate) fn apply_registry(storage: &Storage, config: &mut Config) -> Result<()> {
    let entries = storage.entries()?;
    config.apply_entries(entries.iter().map(|e| (e.name.as_str(), &e.value)));
    Ok(())
}

/// With a restricted registry only root users touch `jsdb.*` entries
fn guard_entry(ctx: &Context, name: &str) -> Result<()> {
    if name.starts_with(SYSTEM_PREFIX) && ctx.config.read().registry.restricted {
        ctx.require_root()?;
    }
    Ok(())
}

pub(super) fn drop_user(ctx: &mut Context, name: &str) -> Result<()> {
    ctx.prepare_write(Action::Delete, SYSTEM_DATABASE)?;
    ctx.storage.drop_user(name)
}

pub(super) fn drop_entry(ctx: &mut Context, name: &str) -> Result<()> {
    guard_entry(ctx, name)?;
    ctx.prepare_write(Action::Delete, SYSTEM_DATABASE)?;
    ctx.storage.drop_entry(name)
}

/// CREATE USER <name>(PASSWORD <p>, PRIVILEGES <json>, VALID <bool>)
pub struct CreateUser {
    name: String,
    options: UserOptions,
}

impl CreateUser {
    pub fn new(name: String, options: UserOptions) -> Box<Self> {
        Box::new(Self { name, options })
    }
}

impl Executor for CreateUser {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let Self { name, options } = *self;
        ctx.prepare_write(Action::Create, SYSTEM_DATABASE)?;
        let password = options
            .password
            .as_deref()
            .ok_or_else(|| Error::Validation(format!("User '{}' needs a password", name)))?;
        ctx.storage.create_user(
            &name,
            ctx.digest.digest(password),
            options.privileges.unwrap_or_default(),
            options.valid.unwrap_or(true),
        )?;
        Ok(ResultSet::Create { kind: ObjectKind::User, name })
    }
}

/// ALTER USER <name> SET ...
pub struct AlterUser {
    name: String,
    options: UserOptions,
}

impl AlterUser {
    pub fn new(name: String, options: UserOptions) -> Box<Self> {
        Box::new(Self { name, options })
    }
}

impl Executor for AlterUser {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let Self { name, options } = *self;
        ctx.prepare_write(Action::Update, SYSTEM_DATABASE)?;
        let password = options.password.as_deref().map(|p| ctx.digest.digest(p));
        ctx.storage.alter_user(&name, password, options.privileges, options.valid)?;
        let state = match ctx.storage.find_user(&name)? {
            Some(user) => user.to_json(),
            None => Value::Null,
        };
        Ok(ResultSet::Alter { kind: ObjectKind::User, name, state })
    }
}

/// CREATE ENTRY <name>(TYPE <t>, VALUE <v>)
pub struct CreateEntry {
    name: String,
    entry_type: DataType,
    value: Value,
}

impl CreateEntry {
    pub fn new(name: String, entry_type: DataType, value: Value) -> Box<Self> {
        Box::new(Self { name, entry_type, value })
    }
}

impl Executor for CreateEntry {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        guard_entry(ctx, &self.name)?;
        ctx.prepare_write(Action::Create, SYSTEM_DATABASE)?;
        ctx.storage.create_entry(&self.name, self.entry_type, self.value)?;
        Ok(ResultSet::Create { kind: ObjectKind::Entry, name: self.name })
    }
}

/// ALTER ENTRY <name> SET VALUE = <v>
pub struct AlterEntry {
    name: String,
    value: Value,
}

impl AlterEntry {
    pub fn new(name: String, value: Value) -> Box<Self> {
        Box::new(Self { name, value })
    }
}

impl Executor for AlterEntry {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        guard_entry(ctx, &self.name)?;
        ctx.prepare_write(Action::Update, SYSTEM_DATABASE)?;
        let entry = ctx.storage.update_entry(&self.name, self.value)?;
        Ok(ResultSet::Alter { kind: ObjectKind::Entry, name: self.name, state: entry.to_json() })
    }
}

/// RELOAD CONFIG: re-reads the `jsdb.*` entries into the live configuration
pub struct ReloadConfig;

impl ReloadConfig {
    pub fn new() -> Box<Self> {
        Box::new(Self)
    }
}

impl Executor for ReloadConfig {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        ctx.require_root()?;
        let mut config = ctx.config.read().clone();
        apply_registry(ctx.storage, &mut config)?;
        let reported = json!({
            "authentication": config.authentication,
            "performance": config.performance,
            "snapshots": config.snapshots,
            "defaultDatabase": config.default_database,
            "server": config.server,
            "log": config.log,
            "registry": config.registry,
        });
        *ctx.config.write() = config;
        info!("reloaded configuration from registry");
        Ok(ResultSet::ReloadConfig { config: reported })
    }
}
