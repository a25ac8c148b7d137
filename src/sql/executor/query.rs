use std::cmp::Ordering;

use serde_json::Value;

use crate::{
    error::{Error, Result},
    sql::{
        executor::{Context, ResultSet},
        expression::Predicate,
        parser::ast::{ObjectName, OrderDirection, ReadTarget, ShowTarget, Window},
        privilege::Action,
        types::{Row, compare, to_text},
    },
    storage::SYSTEM_DATABASE,
};

use super::Executor;

/// Table scan (SELECT). The window slices the stored rows before the filter runs.
pub struct Scan {
    table: ObjectName,
    filter: Option<Predicate>,
    window: Window,
}

impl Scan {
    pub fn new(table: ObjectName, filter: Option<Predicate>, window: Window) -> Box<Self> {
        Box::new(Self { table, filter, window })
    }
}

impl Executor for Scan {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let table = ctx.qualify(&self.table);
        ctx.authorize(Action::Read, &table.database)?;
        let (def, rows) = ctx.storage.scan(&table)?;

        let mut matched = Vec::new();
        let window = rows
            .into_iter()
            .skip(self.window.offset)
            .take(self.window.limit.unwrap_or(usize::MAX));
        for row in window {
            let keep = match &self.filter {
                Some(filter) => filter.evaluate(&def.view(&row))?,
                None => true,
            };
            if keep {
                matched.push(row);
            }
        }
        Ok(ResultSet::Scan { columns: def.column_names(), rows: matched })
    }
}

/// ORDER BY: sorts rows by the given columns
pub struct Order {
    source: Box<dyn Executor>,
    order_by: Vec<(String, OrderDirection)>,
}

impl Order {
    pub fn new(source: Box<dyn Executor>, order_by: Vec<(String, OrderDirection)>) -> Box<Self> {
        Box::new(Self { source, order_by })
    }
}

impl Executor for Order {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        match self.source.execute(ctx)? {
            ResultSet::Scan { columns, mut rows } => {
                let keys = self
                    .order_by
                    .iter()
                    .map(|(name, direction)| match columns.iter().position(|c| c == name) {
                        Some(index) => Ok((index, *direction)),
                        None => Err(Error::NotFound(format!("Column '{}' does not exist", name))),
                    })
                    .collect::<Result<Vec<_>>>()?;

                // Ties cascade to the next key; DESC reverses only its own key
                rows.sort_by(|a, b| {
                    for (index, direction) in &keys {
                        match compare(&a[*index], &b[*index]) {
                            Some(Ordering::Equal) | None => {}
                            Some(o) if *direction == OrderDirection::Asc => return o,
                            Some(o) => return o.reverse(),
                        }
                    }
                    Ordering::Equal
                });
                Ok(ResultSet::Scan { columns, rows })
            }
            _ => Err(Error::Internal("Unexpected result set".into())),
        }
    }
}

/// Projection of the requested columns, optionally rendered as CSV
pub struct Project {
    source: Box<dyn Executor>,
    columns: Option<Vec<String>>,
    csv: bool,
}

impl Project {
    pub fn new(source: Box<dyn Executor>, columns: Option<Vec<String>>, csv: bool) -> Box<Self> {
        Box::new(Self { source, columns, csv })
    }
}

impl Executor for Project {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let ResultSet::Scan { columns, rows } = self.source.execute(ctx)? else {
            return Err(Error::Internal("Unexpected result set".into()));
        };
        let (columns, rows) = match self.columns {
            None => (columns, rows),
            Some(names) => {
                let indexes = names
                    .iter()
                    .map(|name| {
                        columns
                            .iter()
                            .position(|c| c == name)
                            .ok_or_else(|| Error::NotFound(format!("Column '{}' does not exist", name)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let rows = rows
                    .into_iter()
                    .map(|row| indexes.iter().map(|i| row[*i].clone()).collect())
                    .collect();
                (names, rows)
            }
        };
        if self.csv {
            return Ok(ResultSet::Csv { text: render_csv(&columns, &rows) });
        }
        Ok(ResultSet::Scan { columns, rows })
    }
}

/// Header line plus one line per row; NULL is an empty field
fn render_csv(columns: &[String], rows: &[Row]) -> String {
    let field = |text: &str| {
        if text.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", text.replace('"', "\"\""))
        } else {
            text.to_string()
        }
    };
    let mut lines = vec![columns.iter().map(|c| field(c.as_str())).collect::<Vec<_>>().join(",")];
    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::Null => String::new(),
                v => field(&to_text(v)),
            })
            .collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}

/// DESCRIBE TABLE: the table's column definitions and metadata
pub struct Describe {
    table: ObjectName,
}

impl Describe {
    pub fn new(table: ObjectName) -> Box<Self> {
        Box::new(Self { table })
    }
}

impl Executor for Describe {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let table = ctx.qualify(&self.table);
        ctx.authorize(Action::Read, &table.database)?;
        let def = ctx.storage.read_struct(&table)?;
        Ok(ResultSet::Describe { structure: serde_json::to_value(&def)? })
    }
}

pub struct Show {
    target: ShowTarget,
}

impl Show {
    pub fn new(target: ShowTarget) -> Box<Self> {
        Box::new(Self { target })
    }
}

impl Executor for Show {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let items = match self.target {
            // Only the databases the user may read
            ShowTarget::Databases => {
                let names: Vec<String> = ctx
                    .storage
                    .database_names()?
                    .into_iter()
                    .filter(|db| ctx.privileges(db).read)
                    .collect();
                Value::from(names)
            }
            ShowTarget::Schemas { database } => {
                let database = database.unwrap_or_else(|| ctx.connection.database.clone());
                ctx.authorize(Action::Read, &database)?;
                Value::from(ctx.storage.schema_names(&database)?)
            }
            ShowTarget::Sequences { database, schema } => {
                let (database, schema) = ctx.listing_scope(database.as_deref(), schema.as_deref());
                ctx.authorize(Action::Read, &database)?;
                Value::from(ctx.storage.sequence_names(&database, &schema)?)
            }
            ShowTarget::Tables { database, schema } => {
                let (database, schema) = ctx.listing_scope(database.as_deref(), schema.as_deref());
                ctx.authorize(Action::Read, &database)?;
                Value::from(ctx.storage.table_names(&database, &schema)?)
            }
            ShowTarget::Users => {
                ctx.authorize(Action::Read, SYSTEM_DATABASE)?;
                Value::Array(ctx.storage.users()?.iter().map(|u| u.to_json()).collect())
            }
            ShowTarget::Registry => {
                ctx.authorize(Action::Read, SYSTEM_DATABASE)?;
                Value::Array(ctx.storage.entries()?.iter().map(|e| e.to_json()).collect())
            }
        };
        Ok(ResultSet::Show { items })
    }
}

/// READ ENTRY / READ SEQUENCE
pub struct Read {
    target: ReadTarget,
}

impl Read {
    pub fn new(target: ReadTarget) -> Box<Self> {
        Box::new(Self { target })
    }
}

impl Executor for Read {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let item = match self.target {
            ReadTarget::Entry(name) => {
                ctx.authorize(Action::Read, SYSTEM_DATABASE)?;
                ctx.storage.read_entry(&name)?.to_json()
            }
            ReadTarget::Sequence(name) => {
                let seq = ctx.qualify(&name);
                ctx.authorize(Action::Read, &seq.database)?;
                serde_json::to_value(ctx.storage.read_sequence(&seq.database, &seq.schema, &seq.name)?)?
            }
        };
        Ok(ResultSet::Read { item })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::render_csv;

    #[test]
    fn test_render_csv() {
        let columns = vec!["id".to_string(), "note".to_string()];
        let rows = vec![
            vec![json!(1), json!("plain")],
            vec![json!(2), json!("a, \"quoted\" one")],
            vec![json!(3), json!(null)],
        ];
        assert_eq!(
            render_csv(&columns, &rows),
            "id,note\n1,plain\n2,\"a, \"\"quoted\"\" one\"\n3,"
        );
    }
}
