//! Users kept in `jsdb.public.users`.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::info;

use crate::{
    error::{Error, Result},
    sql::{
        expression::Predicate,
        parser::ast::{Column, Expression, Window},
        privilege::{ALL, WILDCARD},
        types::{DataType, Row},
    },
};

use super::{DEFAULT_SCHEMA, Storage, SYSTEM_DATABASE, TableRef, USERS_TABLE};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Password digest
    pub password: String,
    pub valid: bool,
    /// Database name (or `*`) to 4-bit create/read/update/delete mask
    pub privileges: BTreeMap<String, u8>,
}

impl User {
    /// Identity used when authentication is disabled: not stored, root on everything
    pub fn bootstrap() -> Self {
        Self {
            id: 0,
            username: "root".to_string(),
            password: String::new(),
            valid: true,
            privileges: BTreeMap::from([(WILDCARD.to_string(), ALL)]),
        }
    }

    fn from_row(row: &Row) -> Result<Self> {
        let malformed = || Error::Internal(format!("malformed user row {:?}", row));
        let [id, username, password, valid, privileges] = row.as_slice() else {
            return Err(malformed());
        };
        Ok(Self {
            id: id.as_i64().ok_or_else(malformed)?,
            username: username.as_str().ok_or_else(malformed)?.to_string(),
            password: password.as_str().ok_or_else(malformed)?.to_string(),
            valid: valid.as_bool().unwrap_or(true),
            privileges: match privileges {
                Value::Null => BTreeMap::new(),
                value => serde_json::from_value(value.clone())?,
            },
        })
    }

    /// User as reported to clients, without the password digest
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "valid": self.valid,
            "privileges": self.privileges,
        })
    }
}

/// Column layout of the users table
pub(crate) fn users_columns() -> Vec<Column> {
    let mut id = Column::new("id", DataType::Integer);
    id.primary_key = true;
    id.auto_increment = true;
    let mut username = Column::new("username", DataType::String);
    username.not_null = true;
    username.unique = true;
    let mut password = Column::new("password", DataType::String);
    password.not_null = true;
    let mut valid = Column::new("valid", DataType::Boolean);
    valid.default = Some(Expression::from(Value::Bool(true)));
    let mut privileges = Column::new("privileges", DataType::Object);
    privileges.default = Some(Expression::from(json!({})));
    vec![id, username, password, valid, privileges]
}

fn users() -> TableRef {
    TableRef::new(SYSTEM_DATABASE, DEFAULT_SCHEMA, USERS_TABLE)
}

fn by_name(username: &str) -> Predicate {
    Predicate::equals("username", Value::from(username))
}

impl Storage {
    pub fn users(&self) -> Result<Vec<User>> {
        let (_, rows) = self.scan(&users())?;
        rows.iter().map(User::from_row).collect()
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users()?.into_iter().find(|u| u.username == username))
    }

    /// Stores a new user; `password` is already digested
    pub fn create_user(
        &self,
        username: &str,
        password: String,
        privileges: BTreeMap<String, u8>,
        valid: bool,
    ) -> Result<()> {
        if username.is_empty() {
            return Err(Error::Validation("Username cannot be empty".to_string()));
        }
        if self.find_user(username)?.is_some() {
            return Err(Error::Conflict(format!("User '{}' already exists", username)));
        }
        let columns = ["username", "password", "valid", "privileges"].map(String::from);
        let row = vec![
            Expression::from(Value::from(username)),
            Expression::from(Value::from(password)),
            Expression::from(Value::Bool(valid)),
            Expression::from(serde_json::to_value(&privileges)?),
        ];
        self.insert(&users(), Some(columns.as_slice()), vec![row])?;
        info!(username, "created user");
        Ok(())
    }

    /// Changes the given attributes of an existing user
    pub fn alter_user(
        &self,
        username: &str,
        password: Option<String>,
        privileges: Option<BTreeMap<String, u8>>,
        valid: Option<bool>,
    ) -> Result<()> {
        let mut assignments = Vec::new();
        if let Some(password) = password {
            assignments.push(("password".to_string(), Expression::from(Value::from(password))));
        }
        if let Some(privileges) = privileges {
            assignments.push(("privileges".to_string(), Expression::from(serde_json::to_value(&privileges)?)));
        }
        if let Some(valid) = valid {
            assignments.push(("valid".to_string(), Expression::from(Value::Bool(valid))));
        }
        if self.find_user(username)?.is_none() {
            return Err(Error::NotFound(format!("User '{}' does not exist", username)));
        }
        self.update(&users(), &assignments, Some(&by_name(username)), Window::default())?;
        info!(username, "altered user");
        Ok(())
    }

    pub fn drop_user(&self, username: &str) -> Result<()> {
        if self.delete(&users(), Some(&by_name(username)), Window::default())? == 0 {
            return Err(Error::NotFound(format!("User '{}' does not exist", username)));
        }
        info!(username, "dropped user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        config::Config,
        error::{Error, Result},
        storage::{Storage, user::User},
    };

    #[test]
    fn test_user_lifecycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::open(&Config::new(dir.path()))?;
        let grants = BTreeMap::from([("shop".to_string(), 0b0100)]);

        storage.create_user("bob", "digest".to_string(), grants.clone(), true)?;
        storage.create_user("eve", "digest".to_string(), BTreeMap::new(), false)?;
        assert!(matches!(
            storage.create_user("bob", "x".to_string(), BTreeMap::new(), true),
            Err(Error::Conflict(_))
        ));

        let bob = storage.find_user("bob")?.unwrap();
        assert_eq!(bob.id, 1);
        assert_eq!(bob.privileges, grants);
        assert_eq!(storage.find_user("eve")?.unwrap().id, 2);
        assert!(bob.to_json().get("password").is_none());

        storage.alter_user("bob", None, Some(BTreeMap::new()), Some(false))?;
        let bob = storage.find_user("bob")?.unwrap();
        assert!(!bob.valid && bob.privileges.is_empty());
        assert_eq!(bob.password, "digest");
        assert!(matches!(storage.alter_user("zed", None, None, Some(true)), Err(Error::NotFound(_))));

        storage.drop_user("bob")?;
        assert!(storage.find_user("bob")?.is_none());
        assert!(matches!(storage.drop_user("bob"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_bootstrap_is_root() {
        let root = User::bootstrap();
        assert_eq!(root.privileges.get("*"), Some(&15));
    }
}
