//! Privilege guard: effective rights of a user against one database.

use std::{collections::BTreeMap, fmt::Display};

use crate::error::{Error, Result};

/// Key granting rights on every database, and root status with them
pub const WILDCARD: &str = "*";

const CREATE: u8 = 0b1000;
const READ: u8 = 0b0100;
const UPDATE: u8 = 0b0010;
const DELETE: u8 = 0b0001;

/// All four rights
pub const ALL: u8 = CREATE | READ | UPDATE | DELETE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// Effective rights on a single database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Privileges {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
    pub root: bool,
}

impl Privileges {
    /// Decodes a 4-bit mask, create being the high bit and delete the low bit
    pub fn from_bits(bits: u8, root: bool) -> Self {
        Self {
            create: bits & CREATE != 0,
            read: bits & READ != 0,
            update: bits & UPDATE != 0,
            delete: bits & DELETE != 0,
            root,
        }
    }

    /// The wildcard entry wins over a named one; neither means no rights at all
    pub fn resolve(grants: &BTreeMap<String, u8>, database: &str) -> Self {
        if let Some(bits) = grants.get(WILDCARD) {
            return Self::from_bits(*bits, true);
        }
        match grants.get(database) {
            Some(bits) => Self::from_bits(*bits, false),
            None => Self::default(),
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Create => self.create,
            Action::Read => self.read,
            Action::Update => self.update,
            Action::Delete => self.delete,
        }
    }

    pub fn require(&self, action: Action, database: &str) -> Result<()> {
        if !self.allows(action) {
            return Err(Error::Permission(format!(
                "Missing {} privilege on database '{}'",
                action, database
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Action, Privileges};
    use crate::error::Error;

    fn grants(entries: &[(&str, u8)]) -> BTreeMap<String, u8> {
        entries.iter().map(|(db, bits)| (db.to_string(), *bits)).collect()
    }

    #[test]
    fn test_bit_order() {
        let p = Privileges::from_bits(0b1010, false);
        assert!(p.create && !p.read && p.update && !p.delete);
        assert_eq!(Privileges::from_bits(0b0100, false).read, true);
        assert_eq!(Privileges::from_bits(0b0001, false).delete, true);
    }

    #[test]
    fn test_resolve() {
        let wildcard = Privileges::resolve(&grants(&[("*", 4), ("shop", 15)]), "shop");
        assert!(wildcard.root && wildcard.read && !wildcard.create);

        let named = Privileges::resolve(&grants(&[("shop", 15)]), "shop");
        assert!(!named.root && named.create && named.delete);

        let none = Privileges::resolve(&grants(&[("shop", 15)]), "other");
        assert_eq!(none, Privileges::default());
    }

    #[test]
    fn test_require() {
        let reader = Privileges::resolve(&grants(&[("*", 0b0100)]), "shop");
        assert!(reader.require(Action::Read, "shop").is_ok());
        assert!(matches!(reader.require(Action::Create, "shop"), Err(Error::Permission(_))));
    }
}
