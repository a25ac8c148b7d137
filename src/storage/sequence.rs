use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::{SEQUENCE_LIST, Storage, listing::load_or_repair, validate_name, write_json};

/// Counter state: the next value handed out and the step between values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub start: i64,
    pub inc: i64,
}

impl Default for Sequence {
    fn default() -> Self {
        Self { start: 1, inc: 1 }
    }
}

impl Sequence {
    pub fn new(start: i64, inc: i64) -> Result<Self> {
        if inc == 0 {
            return Err(Error::Validation("Sequence increment cannot be zero".to_string()));
        }
        Ok(Self { start, inc })
    }

    /// Returns the current value and advances by the increment. Fails without advancing
    /// once the next value would leave the i64 range.
    pub fn increment(&mut self, name: &str) -> Result<i64> {
        let value = self.start;
        self.start = value
            .checked_add(self.inc)
            .ok_or_else(|| Error::Validation(format!("Sequence '{}' is exhausted", name)))?;
        Ok(value)
    }
}

/// Contents of `seqlist.json`
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SequenceList {
    #[serde(default)]
    pub sequences: BTreeMap<String, Sequence>,
}

impl Storage {
    fn load_sequences(&self, database: &str, schema: &str) -> Result<(std::path::PathBuf, SequenceList)> {
        let file = self.require_schema(database, schema)?.join(SEQUENCE_LIST);
        let list = load_or_repair(&file)?;
        Ok((file, list))
    }

    pub fn sequence_names(&self, database: &str, schema: &str) -> Result<Vec<String>> {
        let (_, list) = self.load_sequences(database, schema)?;
        Ok(list.sequences.into_keys().collect())
    }

    pub fn read_sequence(&self, database: &str, schema: &str, name: &str) -> Result<Sequence> {
        let (_, list) = self.load_sequences(database, schema)?;
        list.sequences.get(name).copied().ok_or_else(|| not_found(name))
    }

    pub fn create_sequence(&self, database: &str, schema: &str, name: &str, sequence: Sequence) -> Result<()> {
        validate_name("sequence", name)?;
        let (file, mut list) = self.load_sequences(database, schema)?;
        if list.sequences.contains_key(name) {
            return Err(Error::Conflict(format!("Sequence '{}' already exists", name)));
        }
        list.sequences.insert(name.to_string(), sequence);
        write_json(&file, &list)?;
        info!(database, schema, sequence = name, "created sequence");
        Ok(())
    }

    /// Applies `INCREMENT BY` and/or `RESTART WITH`, returning the new state
    pub fn alter_sequence(
        &self,
        database: &str,
        schema: &str,
        name: &str,
        increment: Option<i64>,
        restart: Option<i64>,
    ) -> Result<Sequence> {
        let (file, mut list) = self.load_sequences(database, schema)?;
        let sequence = list.sequences.get_mut(name).ok_or_else(|| not_found(name))?;
        let altered = Sequence::new(restart.unwrap_or(sequence.start), increment.unwrap_or(sequence.inc))?;
        *sequence = altered;
        write_json(&file, &list)?;
        Ok(altered)
    }

    pub fn drop_sequence(&self, database: &str, schema: &str, name: &str) -> Result<()> {
        let (file, mut list) = self.load_sequences(database, schema)?;
        if list.sequences.remove(name).is_none() {
            return Err(not_found(name));
        }
        write_json(&file, &list)?;
        info!(database, schema, sequence = name, "dropped sequence");
        Ok(())
    }

    /// Hands out the next value, persisting the advanced state. Callers hold the engine
    /// lock, which makes the read-modify-write atomic.
    pub fn next_value(&self, database: &str, schema: &str, name: &str) -> Result<i64> {
        let (file, mut list) = self.load_sequences(database, schema)?;
        let value = list.sequences.get_mut(name).ok_or_else(|| not_found(name))?.increment(name)?;
        write_json(&file, &list)?;
        debug!(database, schema, sequence = name, value, "advanced sequence");
        Ok(value)
    }
}

fn not_found(name: &str) -> Error {
    Error::NotFound(format!("Sequence '{}' does not exist", name))
}
