use std::{collections::BTreeMap, sync::Arc, time::Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    auth::{PasswordDigest, Sha256Digest},
    config::Config,
    error::{Error, Result},
    sql::{
        executor::{Context, Executor, ResultSet, apply_registry},
        parser::{Parser, lexer::split_statements},
        privilege::{ALL, WILDCARD},
    },
    storage::{
        Storage,
        memory::MemorySnapshotProvider,
        registry::Entry,
        snapshot::{FileSnapshotProvider, SnapshotProvider},
        user::User,
    },
};

use self::transaction::Batch;

pub mod transaction;

/// Name of the user created when the users table is empty
pub const ROOT_USER: &str = "root";

/// Pseudo-statement that switches off batch timing
const NOPERF: &str = "NOPERF";
const NOTIME: &str = "NOTIME";

/// Where a connection currently is and who it acts as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub database: String,
    pub schema: String,
    pub username: String,
}

/// Outcome of one statement of a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementResult {
    /// Position of the statement in the batch
    pub command: usize,
    pub sql: String,
    /// 0 success, 1 runtime error, 2 parse error or unrecognized command
    pub code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Result object returned for a whole batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    /// Milliseconds, or `"NOTIME"` when timing is off
    pub time: Value,
    pub results: Vec<StatementResult>,
}

impl BatchResult {
    /// The statement that stopped the batch, if any
    pub fn failure(&self) -> Option<&StatementResult> {
        self.results.iter().find(|r| r.code != 0)
    }
}

struct Inner {
    storage: Storage,
    config: RwLock<Config>,
    digest: Box<dyn PasswordDigest>,
    snapshots: Box<dyn SnapshotProvider>,
    /// Held for a whole batch, so batches never interleave
    lock: Mutex<()>,
}

/// The database engine: storage, live configuration and the batch lock, shared by every
/// session.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, Box::new(Sha256Digest))
    }

    /// Opens the storage root, provisions the system database and overlays its registry on
    /// the configuration. A `root` user is created when there are no users at all.
    pub fn open_with(mut config: Config, digest: Box<dyn PasswordDigest>) -> Result<Self> {
        let storage = Storage::open(&config)?;
        let databases = storage.database_names()?;
        apply_registry(&storage, &mut config)?;

        if storage.users()?.is_empty() {
            let privileges = BTreeMap::from([(WILDCARD.to_string(), ALL)]);
            storage.create_user(ROOT_USER, digest.digest(&config.root_password), privileges, true)?;
            info!(username = ROOT_USER, "created bootstrap user");
        }

        let snapshots: Box<dyn SnapshotProvider> = match &config.snapshot_dir {
            Some(dir) => Box::new(FileSnapshotProvider::new(dir)?),
            None => Box::new(MemorySnapshotProvider::new()),
        };
        info!(root = %config.root.display(), databases = databases.len(), "opened engine");

        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                config: RwLock::new(config),
                digest,
                snapshots,
                lock: Mutex::new(()),
            }),
        })
    }

    /// Current configuration
    pub fn config(&self) -> Config {
        self.inner.config.read().clone()
    }

    /// Checks credentials. With authentication off everyone is the bootstrap root identity.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let _guard = self.inner.lock.lock();
        let user = self.identify(username)?;
        if self.inner.config.read().authentication && !self.inner.digest.verify(password, &user.password) {
            return Err(Error::Permission("Invalid username or password".to_string()));
        }
        Ok(user)
    }

    /// Resolves the acting user of a batch. Callers hold the batch lock.
    fn identify(&self, username: &str) -> Result<User> {
        if !self.inner.config.read().authentication {
            return Ok(User::bootstrap());
        }
        let user = self
            .inner
            .storage
            .find_user(username)?
            .ok_or_else(|| Error::Permission("Invalid username or password".to_string()))?;
        if !user.valid {
            return Err(Error::Permission(format!("User '{}' is disabled", username)));
        }
        Ok(user)
    }

    /// Authenticates and opens a session on the default database and schema
    pub fn session(&self, username: &str, password: &str) -> Result<Session> {
        self.authenticate(username, password)?;
        let config = self.inner.config.read();
        Ok(Session {
            engine: self.clone(),
            context: ConnectionContext {
                database: config.default_database.clone(),
                schema: config.default_schema.clone(),
                username: username.to_string(),
            },
        })
    }

    /// Runs a `;`-separated batch. The first failing statement stops the batch and rolls
    /// back every database the batch touched.
    pub fn execute(&self, text: &str, connection: &mut ConnectionContext) -> Result<BatchResult> {
        let _guard = self.inner.lock.lock();
        let config = self.config();
        let user = self.identify(&connection.username)?;
        let storage = &self.inner.storage;
        let provider = config.snapshots.then_some(self.inner.snapshots.as_ref());
        // A rolled back batch also leaves the connection where it started
        let entry_context = provider.is_some().then(|| connection.clone());

        let mut ctx = Context {
            storage,
            config: &self.inner.config,
            digest: self.inner.digest.as_ref(),
            user: &user,
            connection,
            batch: Batch::new(storage, provider),
        };

        let started = Instant::now();
        let mut timed = config.performance;
        let mut results = Vec::new();
        for (command, sql) in split_statements(text).into_iter().enumerate() {
            if sql.eq_ignore_ascii_case(NOPERF) {
                timed = false;
                continue;
            }
            debug!(command, %sql, username = %user.username, "executing");
            let result = match execute_statement(&sql, &mut ctx) {
                Ok(outcome) => {
                    let (message, data) = outcome.into_output();
                    StatementResult { command, sql, code: 0, message, data }
                }
                Err(err) => {
                    warn!(command, %err, "statement failed");
                    StatementResult { command, sql, code: err.code(), message: Some(err.to_string()), data: None }
                }
            };
            let failed = result.code != 0;
            results.push(result);
            if failed {
                break;
            }
        }

        let Context { batch, .. } = ctx;
        if results.iter().any(|r| r.code != 0) {
            batch.rollback()?;
            if let Some(saved) = entry_context {
                *connection = saved;
            }
        } else {
            batch.commit()?;
        }

        let time = if timed {
            Value::from(started.elapsed().as_secs_f64() * 1000.0)
        } else {
            Value::from(NOTIME)
        };
        Ok(BatchResult { time, results })
    }

    pub fn read_entry(&self, name: &str) -> Result<Entry> {
        let _guard = self.inner.lock.lock();
        self.inner.storage.read_entry(name)
    }

    pub fn update_entry(&self, name: &str, value: Value) -> Result<Entry> {
        let _guard = self.inner.lock.lock();
        self.inner.storage.update_entry(name, value)
    }

    /// Re-reads the `jsdb.*` registry entries into the live configuration
    pub fn reload_config(&self) -> Result<Config> {
        let _guard = self.inner.lock.lock();
        let mut config = self.config();
        apply_registry(&self.inner.storage, &mut config)?;
        *self.inner.config.write() = config.clone();
        info!("reloaded configuration from registry");
        Ok(config)
    }
}

fn execute_statement(sql: &str, ctx: &mut Context) -> Result<ResultSet> {
    let statement = Parser::new(sql)?.parse()?;
    <dyn Executor>::build(statement).execute(ctx)
}

/// A connection's session: the engine plus where the connection currently is
pub struct Session {
    engine: Engine,
    context: ConnectionContext,
}

impl Session {
    /// Executes a batch of statements
    pub fn execute(&mut self, text: &str) -> Result<BatchResult> {
        self.engine.execute(text, &mut self.context)
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{BatchResult, Engine, Session};
    use crate::{
        config::{Config, ENTRY_SERVER_PORT},
        error::{Error, Result},
    };

    fn open(dir: &tempfile::TempDir) -> Result<Engine> {
        Engine::open(Config::new(dir.path().join("data")))
    }

    /// Root session in a fresh `shop` database
    fn shop(engine: &Engine) -> Result<Session> {
        let mut s = engine.session("root", "root")?;
        ok(s.execute("create database shop; use shop")?);
        Ok(s)
    }

    fn ok(result: BatchResult) -> BatchResult {
        assert_eq!(result.failure(), None, "{:?}", result);
        result
    }

    fn data(result: &BatchResult) -> Value {
        result.results.last().and_then(|r| r.data.clone()).unwrap_or(Value::Null)
    }

    #[test]
    fn test_auto_increment_scenario() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;

        ok(s.execute("create table t (id INTEGER PRIMARY KEY AUTO INCREMENT)")?);
        ok(s.execute("insert into t values (DEFAULT); insert into t values (DEFAULT)")?);
        assert_eq!(data(&ok(s.execute("select * from t")?)), json!([{"id": 1}, {"id": 2}]));
        assert_eq!(data(&ok(s.execute("select * from t where `id` = 1")?)), json!([{"id": 1}]));

        let updated = ok(s.execute("update t set id = DEFAULT where true")?);
        assert_eq!(updated.results[0].message.as_deref(), Some("2 row(s) updated"));
        assert_eq!(data(&ok(s.execute("select id from t")?)), json!([{"id": 3}, {"id": 4}]));

        let deleted = ok(s.execute("delete from t where `id` > 2")?);
        assert_eq!(deleted.results[0].message.as_deref(), Some("2 row(s) deleted"));
        assert_eq!(data(&ok(s.execute("select * from t")?)), json!([]));
        assert_eq!(
            data(&ok(s.execute("read sequence t_id_seq")?)),
            json!({"start": 5, "inc": 1})
        );
        Ok(())
    }

    #[test]
    fn test_batch_rollback() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;
        ok(s.execute("create table t (n INTEGER)")?);

        let result = s.execute(
            "create table u (n INTEGER); insert into t values (1); insert into t values ('x'); insert into t values (3)",
        )?;
        assert_eq!(result.results.len(), 3);
        let failure = result.failure().unwrap();
        assert_eq!((failure.command, failure.code), (2, 1));
        assert!(failure.message.is_some() && failure.data.is_none());

        assert_eq!(data(&ok(s.execute("select * from t")?)), json!([]));
        assert_eq!(data(&ok(s.execute("show tables")?)), json!(["t"]));
        Ok(())
    }

    #[test]
    fn test_rollback_covers_every_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;

        let result = s.execute("create database archive; create table archive.public.t (n INTEGER); frobnicate")?;
        assert_eq!(result.failure().map(|f| f.code), Some(2));
        assert_eq!(data(&ok(s.execute("show databases")?)), json!(["jsdb", "shop"]));

        ok(s.execute("create database archive")?);
        let result = s.execute("drop database shop; frobnicate")?;
        assert_eq!(result.failure().map(|f| f.command), Some(1));
        assert_eq!(data(&ok(s.execute("show databases")?)), json!(["jsdb", "shop", "archive"]));
        Ok(())
    }

    #[test]
    fn test_file_snapshots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = Config::new(dir.path().join("data"));
        config.snapshot_dir = Some(dir.path().join("snapshots"));
        let engine = Engine::open(config)?;
        let mut s = shop(&engine)?;

        let result = s.execute("create table t (n INTEGER); insert into t values (NULL, 1)")?;
        assert_eq!(result.failure().map(|f| f.code), Some(1));
        assert_eq!(data(&ok(s.execute("show tables")?)), json!([]));
        assert_eq!(std::fs::read_dir(dir.path().join("snapshots"))?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_snapshots_disabled() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = Config::new(dir.path().join("data"));
        config.snapshots = false;
        let engine = Engine::open(config)?;
        let mut s = shop(&engine)?;

        s.execute("create table t (n INTEGER); insert into t values ('x')")?;
        assert_eq!(data(&ok(s.execute("show tables")?)), json!(["t"]));
        Ok(())
    }

    #[test]
    fn test_privileges() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut root = shop(&engine)?;
        ok(root.execute(
            r#"create table t (n INTEGER); insert into t values (1);
               create user reader(password 'pw', privileges '{"*": 4}');
               create user clerk(password 'pw', privileges '{"shop": 12}');
               create user ghost(password 'pw', valid false)"#,
        )?);

        let mut reader = engine.session("reader", "pw")?;
        ok(reader.execute("use shop")?);
        let denied = reader.execute("insert into t values (2)")?;
        let failure = denied.failure().unwrap();
        assert_eq!(failure.code, 1);
        assert_eq!(failure.message.as_deref(), Some("Missing create privilege on database 'shop'"));
        assert_eq!(data(&ok(reader.execute("select * from t")?)), json!([{"n": 1}]));

        let mut clerk = engine.session("clerk", "pw")?;
        ok(clerk.execute("use shop; insert into t values (2)")?);
        assert!(clerk.execute("delete from t")?.failure().is_some());
        assert_eq!(data(&ok(clerk.execute("show databases")?)), json!(["shop"]));
        assert!(clerk.execute("show users")?.failure().is_some());
        assert!(clerk.execute("reload config")?.failure().is_some());

        assert!(matches!(engine.session("reader", "wrong"), Err(Error::Permission(_))));
        assert!(matches!(engine.session("nobody", "pw"), Err(Error::Permission(_))));
        assert!(matches!(engine.session("ghost", "pw"), Err(Error::Permission(_))));
        Ok(())
    }

    #[test]
    fn test_registry_restriction() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut root = engine.session("root", "root")?;
        ok(root.execute(r#"create user admin(password 'pw', privileges '{"jsdb": 15}')"#)?);

        let mut admin = engine.session("admin", "pw")?;
        ok(admin.execute("create entry app.name(type 'string', value 'shop')")?);
        let denied = admin.execute("alter entry jsdb.server.port set value = 1")?;
        assert!(denied.failure().unwrap().message.as_deref().unwrap().contains("not a root user"));

        let result = ok(root.execute("alter entry jsdb.server.port set value = 9000; read entry app.name")?);
        assert_eq!(data(&result), json!({"entryName": "app.name", "type": "string", "value": "shop"}));
        assert!(root.execute("drop entry jsdb.server.port")?.failure().is_some());
        Ok(())
    }

    #[test]
    fn test_order_by() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;
        ok(s.execute("create table t (id INTEGER, tag STRING); insert into t values (2, 'b'), (1, 'b'), (3, 'a')")?);

        assert_eq!(
            data(&ok(s.execute("select id from t order by id asc")?)),
            json!([{"id": 1}, {"id": 2}, {"id": 3}])
        );
        assert_eq!(
            data(&ok(s.execute("select id from t order by id desc")?)),
            json!([{"id": 3}, {"id": 2}, {"id": 1}])
        );
        assert_eq!(
            data(&ok(s.execute("select id from t order by tag desc, id")?)),
            json!([{"id": 1}, {"id": 2}, {"id": 3}])
        );
        assert_eq!(
            data(&ok(s.execute("select * from t order by id limit 2 csv")?)),
            json!("id,tag\n1,b\n2,b")
        );
        assert_eq!(s.execute("select * from t order by nope")?.failure().map(|f| f.code), Some(1));
        Ok(())
    }

    #[test]
    fn test_duplicate_creates_conflict() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;
        let statements = [
            "create database other",
            "create schema sales",
            "create sequence s",
            "create table t (n INTEGER)",
            "create user bob(password 'pw')",
            "create entry app.x(type 'number', value 1)",
        ];
        for sql in statements {
            ok(s.execute(sql)?);
            let again = s.execute(sql)?;
            let failure = again.failure().unwrap();
            assert_eq!(failure.code, 1);
            assert!(failure.message.as_deref().unwrap().contains("already exists"), "{}", sql);
        }
        ok(s.execute("drop table if exists missing; drop table t; drop sequence if exists s")?);
        assert_eq!(s.execute("drop table t")?.failure().map(|f| f.code), Some(1));
        Ok(())
    }

    #[test]
    fn test_restart_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (structure, rows) = {
            let engine = open(&dir)?;
            let mut s = shop(&engine)?;
            ok(s.execute(
                r#"create table t (id INTEGER PRIMARY KEY AUTO INCREMENT, doc OBJECT, tags ARRAY);
                   insert into t (doc, tags) values ('{"a": 1}', '[1, 2]'), (NULL, NULL)"#,
            )?);
            (data(&ok(s.execute("describe table t")?)), data(&ok(s.execute("select * from t")?)))
        };
        assert_eq!(rows, json!([{"id": 1, "doc": {"a": 1}, "tags": [1, 2]}, {"id": 2, "doc": null, "tags": null}]));

        let engine = open(&dir)?;
        let mut s = engine.session("root", "root")?;
        ok(s.execute("use shop")?);
        assert_eq!(data(&ok(s.execute("describe table t")?)), structure);
        assert_eq!(data(&ok(s.execute("select * from t")?)), rows);
        ok(s.execute("insert into t (doc) values (NULL)")?);
        assert_eq!(data(&ok(s.execute("select id from t where `id` = 3")?)), json!([{"id": 3}]));
        Ok(())
    }

    #[test]
    fn test_session_context() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;
        assert_eq!((s.context().database.as_str(), s.context().schema.as_str()), ("shop", "public"));

        ok(s.execute("create schema sales; set search_path to sales; create table t (n INTEGER)")?);
        assert_eq!(s.context().schema, "sales");
        ok(s.execute("use shop; insert into sales.t values (1)")?);
        assert_eq!(data(&ok(s.execute("select * from shop.sales.t")?)), json!([{"n": 1}]));
        assert_eq!(data(&ok(s.execute("show tables from shop.sales")?)), json!(["t"]));
        assert!(s.execute("use nowhere")?.failure().is_some());
        assert_eq!(s.context().database, "shop");
        Ok(())
    }

    #[test]
    fn test_rollback_restores_connection() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;

        let result = s.execute(
            "create database scratch; use scratch; create schema work; set search_path to work; frobnicate",
        )?;
        assert_eq!(result.failure().map(|f| f.code), Some(2));
        assert_eq!((s.context().database.as_str(), s.context().schema.as_str()), ("shop", "public"));
        assert_eq!(data(&ok(s.execute("show databases")?)), json!(["jsdb", "shop"]));
        ok(s.execute("create table t (n INTEGER)")?);
        Ok(())
    }

    #[test]
    fn test_exhausted_sequence_fails_batch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = shop(&engine)?;
        ok(s.execute("create table t (n INTEGER); create sequence s")?);
        ok(s.execute("alter sequence s restart with 9223372036854775806")?);

        let result = s.execute(
            "insert into t values (1); insert into t values (NEXTVAL(s)); insert into t values (NEXTVAL(s))",
        )?;
        let failure = result.failure().unwrap();
        assert_eq!((failure.command, failure.code), (2, 1));
        assert_eq!(failure.message.as_deref(), Some("Sequence 's' is exhausted"));

        assert_eq!(data(&ok(s.execute("select * from t")?)), json!([]));
        assert_eq!(
            data(&ok(s.execute("read sequence s")?)),
            json!({"start": 9223372036854775806_i64, "inc": 1})
        );
        Ok(())
    }

    #[test]
    fn test_timing_and_codes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        let mut s = engine.session("root", "root")?;

        let timed = ok(s.execute("show databases")?);
        assert!(timed.time.is_number());
        let untimed = ok(s.execute("NOPERF; show databases")?);
        assert_eq!(untimed.time, json!("NOTIME"));
        assert_eq!(untimed.results.len(), 1);
        assert_eq!(untimed.results[0].command, 1);

        let result = s.execute("frobnicate the table; show databases")?;
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].code, 2);
        assert_eq!(s.execute("select * from")?.results[0].code, 2);

        let encoded = serde_json::to_value(&result)?;
        assert!(encoded["results"][0].get("data").is_none());
        assert_eq!(encoded["results"][0]["sql"], json!("frobnicate the table"));
        Ok(())
    }

    #[test]
    fn test_authentication_disabled() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = Config::new(dir.path().join("data"));
        config.authentication = false;
        let engine = Engine::open(config)?;

        let mut s = engine.session("anyone", "")?;
        ok(s.execute("create database shop; show databases")?);
        Ok(())
    }

    #[test]
    fn test_entries_and_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = open(&dir)?;
        assert_eq!(engine.read_entry(ENTRY_SERVER_PORT)?.value, json!(2345));

        engine.update_entry(ENTRY_SERVER_PORT, json!(9000))?;
        assert_eq!(engine.config().server.port, 2345);
        assert_eq!(engine.reload_config()?.server.port, 9000);
        assert_eq!(engine.config().server.port, 9000);

        let mut s = engine.session("root", "root")?;
        ok(s.execute("alter entry jsdb.server.port set value = 9100; reload config")?);
        assert_eq!(engine.config().server.port, 9100);
        assert!(matches!(engine.update_entry(ENTRY_SERVER_PORT, json!("x")), Err(Error::Constraint(_))));
        Ok(())
    }
}
