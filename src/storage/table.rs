//! Tables: definitions in `tablestruct.json`, rows in `tabledata.json`.
//!
//! Every write goes through the same pipeline. Values are padded or reordered to the
//! column order, `DEFAULT` and `NEXTVAL` are resolved, object/array text is decoded, and
//! the column constraints are checked. A row that fails any step aborts the whole write
//! before anything reaches disk.

use std::{collections::HashMap, fmt::Display, fs};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    sql::{
        expression::{Predicate, RowView},
        parser::ast::{Column, Expression, ObjectName, Window},
        types::{self, DataType, Row, loose_eq},
    },
};

use super::{
    DEFAULT_SCHEMA, REGISTRY_TABLE, SYSTEM_DATABASE, Storage, TABLE_DATA, TABLE_LIST, TABLE_STRUCT,
    USERS_TABLE,
    listing::{add_to_listing, read_listing, remove_from_listing},
    read_json,
    sequence::Sequence,
    validate_name, write_json,
};

/// Fully qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub database: String,
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self { database: database.into(), schema: schema.into(), name: name.into() }
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// Persisted column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Key of the definition in the `columns` map
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: DataType,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub unique: bool,
    /// Literal default, or a `nextval(<seq>)` marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub auto_increment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    #[serde(default)]
    pub primary_key: Vec<String>,
}

/// Contents of `tablestruct.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStruct {
    #[serde(with = "ordered_columns")]
    pub columns: Vec<ColumnDef>,
    #[serde(rename = "__metadata", default)]
    pub metadata: TableMetadata,
}

impl TableStruct {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Materializes a positional row as `{column: value}`
    pub fn view(&self, row: &Row) -> RowView {
        self.columns.iter().map(|c| c.name.clone()).zip(row.iter().cloned()).collect()
    }

    /// Names of the sequences backing auto-increment columns
    pub fn owned_sequences(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter_map(|c| c.default.as_ref()?.as_str().and_then(sequence_marker))
            .map(str::to_string)
            .collect()
    }
}

/// The columns map keeps definition order on disk
mod ordered_columns {
    use std::fmt;

    use serde::{
        Deserializer, Serializer,
        de::{MapAccess, Visitor},
    };

    use super::ColumnDef;

    pub fn serialize<S: Serializer>(columns: &[ColumnDef], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(columns.iter().map(|c| (&c.name, c)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ColumnDef>, D::Error> {
        struct ColumnsVisitor;

        impl<'de> Visitor<'de> for ColumnsVisitor {
            type Value = Vec<ColumnDef>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut columns = Vec::new();
                while let Some((name, mut column)) = map.next_entry::<String, ColumnDef>()? {
                    column.name = name;
                    columns.push(column);
                }
                Ok(columns)
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}

/// Extracts the sequence name from a `nextval(<seq>)` default marker
pub fn sequence_marker(default: &str) -> Option<&str> {
    default.strip_prefix("nextval(")?.strip_suffix(')')
}

fn sequence_name(table: &str, column: &str) -> String {
    format!("{}_{}_seq", table, column)
}

/// Turns parsed column definitions into the stored structure, applying the creation-time
/// rules: primary keys are not-null and unique, enums bound the integer range, and
/// auto-increment columns default to a sequence named `<table>_<column>_seq`. The
/// sequences to create are returned alongside.
pub fn resolve_columns(
    table: &str,
    columns: Vec<Column>,
    primary_key: Vec<String>,
) -> Result<(TableStruct, Vec<String>)> {
    if columns.is_empty() {
        return Err(Error::Validation(format!("Table '{}' must have at least one column", table)));
    }

    let mut keys: Vec<String> = columns.iter().filter(|c| c.primary_key).map(|c| c.name.clone()).collect();
    for key in primary_key {
        if !columns.iter().any(|c| c.name == key) {
            return Err(Error::NotFound(format!("Primary key column '{}' does not exist", key)));
        }
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let mut defs: Vec<ColumnDef> = Vec::with_capacity(columns.len());
    let mut sequences = Vec::new();
    for column in columns {
        validate_name("column", &column.name)?;
        if defs.iter().any(|d| d.name == column.name) {
            return Err(Error::Validation(format!("Duplicate column '{}'", column.name)));
        }
        let is_key = keys.contains(&column.name);
        let mut def = ColumnDef {
            datatype: column.datatype,
            not_null: column.not_null || is_key,
            unique: column.unique || is_key,
            default: match column.default {
                None | Some(Expression::Default) => None,
                Some(Expression::Consts(Value::Null)) => None,
                Some(Expression::Consts(value)) => Some(value),
                Some(Expression::NextVal(seq)) => Some(Value::String(format!("nextval({})", seq))),
            },
            min_length: column.min_length,
            max_length: column.max_length,
            min_value: column.min_value,
            max_value: column.max_value,
            enum_values: None,
            auto_increment: column.auto_increment,
            name: column.name,
        };

        if let Some(labels) = column.enum_values {
            if def.datatype != DataType::Integer {
                return Err(Error::Validation(format!(
                    "ENUM is only valid on integer columns, '{}' is {}",
                    def.name, def.datatype
                )));
            }
            if labels.is_empty() {
                return Err(Error::Validation(format!("ENUM on '{}' needs at least one label", def.name)));
            }
            def.min_value = Some(0.0);
            def.max_value = Some((labels.len() - 1) as f64);
            def.enum_values = Some(labels);
        }

        if def.auto_increment {
            if def.datatype != DataType::Integer {
                return Err(Error::Validation(format!(
                    "AUTO INCREMENT is only valid on integer columns, '{}' is {}",
                    def.name, def.datatype
                )));
            }
            let seq = sequence_name(table, &def.name);
            def.default = Some(Value::String(format!("nextval({})", seq)));
            sequences.push(seq);
        }
        defs.push(def);
    }

    Ok((TableStruct { columns: defs, metadata: TableMetadata { primary_key: keys } }, sequences))
}

/// Fills omitted trailing columns with `DEFAULT`
fn pad_row(def: &TableStruct, mut values: Vec<Expression>) -> Result<Vec<Expression>> {
    if values.len() > def.columns.len() {
        return Err(Error::Validation(format!(
            "Table has {} columns but {} values were supplied",
            def.columns.len(),
            values.len()
        )));
    }
    values.resize(def.columns.len(), Expression::Default);
    Ok(values)
}

/// Places values given for named columns into column order, `DEFAULT` elsewhere
fn make_row(def: &TableStruct, columns: &[String], values: Vec<Expression>) -> Result<Vec<Expression>> {
    if columns.len() != values.len() {
        return Err(Error::Validation(format!(
            "{} columns were named but {} values were supplied",
            columns.len(),
            values.len()
        )));
    }
    let mut inputs = HashMap::new();
    for (name, value) in columns.iter().zip(values) {
        if def.column_index(name).is_none() {
            return Err(Error::NotFound(format!("Column '{}' does not exist", name)));
        }
        if inputs.insert(name.as_str(), value).is_some() {
            return Err(Error::Validation(format!("Column '{}' is given more than once", name)));
        }
    }
    Ok(def
        .columns
        .iter()
        .map(|c| inputs.remove(c.name.as_str()).unwrap_or(Expression::Default))
        .collect())
}

/// Decodes document text and enum labels into stored form
fn coerce(column: &ColumnDef, value: Value) -> Result<Value> {
    match value {
        Value::String(text) if column.datatype.is_document() => serde_json::from_str(&text)
            .map_err(|_| Error::Constraint(format!("Value for column '{}' is not valid JSON", column.name))),
        Value::String(text) if column.enum_values.is_some() => {
            let labels = column.enum_values.as_deref().unwrap_or_default();
            match labels.iter().position(|l| *l == text) {
                Some(index) => Ok(Value::from(index)),
                None => Err(Error::Constraint(format!(
                    "'{}' is not a valid value for enum column '{}'",
                    text, column.name
                ))),
            }
        }
        value => Ok(value),
    }
}

/// Enforces notNull, type, length and range, normalizing whole floats in integer columns
fn check(column: &ColumnDef, value: Value) -> Result<Value> {
    if value.is_null() {
        if column.not_null {
            return Err(Error::Constraint(format!("Column '{}' cannot be null", column.name)));
        }
        return Ok(value);
    }
    if !column.datatype.matches(&value) {
        return Err(Error::Constraint(format!(
            "Column '{}' expects {}, got {}",
            column.name, column.datatype, value
        )));
    }
    let value = match (&column.datatype, &value) {
        (DataType::Integer, Value::Number(n)) => types::as_integer(n).map(Value::from).ok_or_else(|| {
            Error::Constraint(format!("Column '{}' expects {}, got {}", column.name, column.datatype, n))
        })?,
        _ => value,
    };

    if let Value::String(text) = &value {
        let length = text.chars().count();
        if column.max_length.is_some_and(|max| length > max) {
            return Err(Error::Constraint(format!(
                "Value for column '{}' is longer than {} characters",
                column.name,
                column.max_length.unwrap_or_default()
            )));
        }
        if column.min_length.is_some_and(|min| length < min) {
            return Err(Error::Constraint(format!(
                "Value for column '{}' is shorter than {} characters",
                column.name,
                column.min_length.unwrap_or_default()
            )));
        }
    }
    if let Some(number) = value.as_f64() {
        let below = column.min_value.is_some_and(|min| number < min);
        let above = column.max_value.is_some_and(|max| number > max);
        if below || above {
            return Err(Error::Constraint(match column.enum_values {
                Some(_) => format!("{} is not a valid value for enum column '{}'", value, column.name),
                None => format!("Value {} for column '{}' is out of range", value, column.name),
            }));
        }
    }
    Ok(value)
}

/// Unique columns reject a non-null value equal to one in any other row
fn check_unique(def: &TableStruct, rows: &[Row], skip: Option<usize>, row: &Row) -> Result<()> {
    for (i, column) in def.columns.iter().enumerate() {
        if !column.unique || row[i].is_null() {
            continue;
        }
        let duplicate = rows
            .iter()
            .enumerate()
            .any(|(j, other)| Some(j) != skip && loose_eq(&other[i], &row[i]));
        if duplicate {
            return Err(Error::Conflict(format!(
                "Duplicate value {} for unique column '{}'",
                row[i], column.name
            )));
        }
    }
    Ok(())
}

fn matches(filter: Option<&Predicate>, def: &TableStruct, row: &Row) -> Result<bool> {
    match filter {
        Some(predicate) => predicate.evaluate(&def.view(row)),
        None => Ok(true),
    }
}

fn protected(table: &TableRef) -> bool {
    table.database == SYSTEM_DATABASE
        && table.schema == DEFAULT_SCHEMA
        && (table.name == USERS_TABLE || table.name == REGISTRY_TABLE)
}

impl Storage {
    pub fn table_names(&self, database: &str, schema: &str) -> Result<Vec<String>> {
        let dir = self.require_schema(database, schema)?;
        read_listing(&dir.join(TABLE_LIST), &dir)
    }

    pub fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.table_names(&table.database, &table.schema)?.contains(&table.name))
    }

    fn require_table(&self, table: &TableRef) -> Result<()> {
        if !self.table_exists(table)? {
            return Err(Error::NotFound(format!("Table '{}' does not exist", table.name)));
        }
        Ok(())
    }

    pub fn create_table(&self, table: &TableRef, columns: Vec<Column>, primary_key: Vec<String>) -> Result<()> {
        validate_name("table", &table.name)?;
        if self.table_exists(table)? {
            return Err(Error::Conflict(format!("Table '{}' already exists", table.name)));
        }
        let (def, sequences) = resolve_columns(&table.name, columns, primary_key)?;
        let existing = self.sequence_names(&table.database, &table.schema)?;
        if let Some(seq) = sequences.iter().find(|s| existing.contains(s)) {
            return Err(Error::Conflict(format!("Sequence '{}' already exists", seq)));
        }

        let dir = self.table_dir(table);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(TABLE_STRUCT), &def)?;
        write_json(&dir.join(TABLE_DATA), &Vec::<Row>::new())?;
        for seq in &sequences {
            self.create_sequence(&table.database, &table.schema, seq, Sequence::default())?;
        }
        add_to_listing(&self.schema_dir(&table.database, &table.schema).join(TABLE_LIST), &table.name)?;
        info!(table = %table, "created table");
        Ok(())
    }

    /// Creates a table whose directory is gone, first discarding the sequences it left behind
    pub(crate) fn replace_table(&self, table: &TableRef, columns: Vec<Column>) -> Result<()> {
        let (_, sequences) = resolve_columns(&table.name, columns.clone(), vec![])?;
        for seq in &sequences {
            match self.drop_sequence(&table.database, &table.schema, seq) {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.create_table(table, columns, vec![])
    }

    /// Drops a table and the sequences behind its auto-increment columns
    pub fn drop_table(&self, table: &TableRef) -> Result<()> {
        if protected(table) {
            return Err(Error::Permission(format!("System table '{}' cannot be dropped", table.name)));
        }
        let def = self.read_struct(table)?;
        for seq in def.owned_sequences() {
            match self.drop_sequence(&table.database, &table.schema, &seq) {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        remove_from_listing(&self.schema_dir(&table.database, &table.schema).join(TABLE_LIST), &table.name)?;
        fs::remove_dir_all(self.table_dir(table))?;
        info!(table = %table, "dropped table");
        Ok(())
    }

    pub fn read_struct(&self, table: &TableRef) -> Result<TableStruct> {
        self.require_table(table)?;
        read_json(&self.table_dir(table).join(TABLE_STRUCT))
    }

    /// Reads the definition and every row
    pub fn scan(&self, table: &TableRef) -> Result<(TableStruct, Vec<Row>)> {
        let def = self.read_struct(table)?;
        let rows: Vec<Row> = read_json(&self.table_dir(table).join(TABLE_DATA))?;
        if let Some(row) = rows.iter().find(|r| r.len() != def.columns.len()) {
            return Err(Error::Internal(format!(
                "Table '{}' holds a row of {} values for {} columns",
                table, row.len(), def.columns.len()
            )));
        }
        Ok((def, rows))
    }

    fn write_rows(&self, table: &TableRef, rows: &[Row]) -> Result<()> {
        write_json(&self.table_dir(table).join(TABLE_DATA), rows)
    }

    /// Inserts value tuples, either positional (padded with `DEFAULT`) or for the named
    /// columns. Returns the number of rows written.
    pub fn insert(&self, table: &TableRef, columns: Option<&[String]>, values: Vec<Vec<Expression>>) -> Result<usize> {
        let (def, mut rows) = self.scan(table)?;
        let mut count = 0;
        for exprs in values {
            let exprs = match columns {
                None => pad_row(&def, exprs)?,
                Some(names) => make_row(&def, names, exprs)?,
            };
            let mut row = Vec::with_capacity(def.columns.len());
            for (column, expr) in def.columns.iter().zip(exprs) {
                row.push(self.resolve_value(table, column, expr)?);
            }
            check_unique(&def, &rows, None, &row)?;
            debug!(table = %table, ?row, "insert row");
            rows.push(row);
            count += 1;
        }
        self.write_rows(table, &rows)?;
        Ok(count)
    }

    /// Updates matching rows in place. The first `window.offset` matches are skipped and at
    /// most `window.limit` rows change.
    pub fn update(
        &self,
        table: &TableRef,
        assignments: &[(String, Expression)],
        filter: Option<&Predicate>,
        window: Window,
    ) -> Result<usize> {
        let (def, mut rows) = self.scan(table)?;
        let targets = assignments
            .iter()
            .map(|(name, expr)| match def.column_index(name) {
                Some(index) => Ok((index, expr)),
                None => Err(Error::NotFound(format!("Column '{}' does not exist", name))),
            })
            .collect::<Result<Vec<_>>>()?;

        let (mut matched, mut count) = (0, 0);
        for i in 0..rows.len() {
            if window.limit.is_some_and(|limit| count >= limit) {
                break;
            }
            if !matches(filter, &def, &rows[i])? {
                continue;
            }
            matched += 1;
            if matched <= window.offset {
                continue;
            }
            let mut row = rows[i].clone();
            for (index, expr) in &targets {
                row[*index] = self.resolve_value(table, &def.columns[*index], (*expr).clone())?;
            }
            check_unique(&def, &rows, Some(i), &row)?;
            rows[i] = row;
            count += 1;
        }
        if count > 0 {
            self.write_rows(table, &rows)?;
        }
        Ok(count)
    }

    /// Deletes matching rows with the same windowing as [`Storage::update`]
    pub fn delete(&self, table: &TableRef, filter: Option<&Predicate>, window: Window) -> Result<usize> {
        let (def, rows) = self.scan(table)?;
        let (mut matched, mut count) = (0, 0);
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let exhausted = window.limit.is_some_and(|limit| count >= limit);
            if !exhausted && matches(filter, &def, &row)? {
                matched += 1;
                if matched > window.offset {
                    count += 1;
                    continue;
                }
            }
            kept.push(row);
        }
        if count > 0 {
            self.write_rows(table, &kept)?;
        }
        Ok(count)
    }

    /// Resolves a written expression to the value stored in the column
    fn resolve_value(&self, table: &TableRef, column: &ColumnDef, expr: Expression) -> Result<Value> {
        let value = match expr {
            Expression::Default => match column.default.as_ref() {
                None => Value::Null,
                Some(default) => match default.as_str().and_then(sequence_marker) {
                    Some(seq) => Value::from(self.next_value_for(table, seq)?),
                    None => default.clone(),
                },
            },
            Expression::NextVal(seq) => Value::from(self.next_value_for(table, &seq)?),
            Expression::Consts(value) => value,
        };
        check(column, coerce(column, value)?)
    }

    /// Advances a sequence named relative to the table's schema
    fn next_value_for(&self, table: &TableRef, seq: &str) -> Result<i64> {
        let name = ObjectName::parse(seq)
            .ok_or_else(|| Error::Validation(format!("Invalid sequence name '{}'", seq)))?;
        self.next_value(
            name.database.as_deref().unwrap_or(&table.database),
            name.schema.as_deref().unwrap_or(&table.schema),
            &name.name,
        )
    }
}
