use crate::{
    error::Result,
    sql::{
        executor::{Context, ResultSet},
        expression::Predicate,
        parser::ast::{Expression, ObjectName, Window},
        privilege::Action,
    },
};

use super::Executor;

/// Snapshots the databases of qualified `NEXTVAL(db.schema.seq)` calls, which advance
/// sequences outside the written table's database
fn touch_sequences<'e>(ctx: &mut Context, exprs: impl IntoIterator<Item = &'e Expression>) -> Result<()> {
    for expr in exprs {
        if let Expression::NextVal(seq) = expr {
            if let Some(database) = ObjectName::parse(seq).and_then(|name| name.database) {
                ctx.prepare_write(Action::Update, &database)?;
            }
        }
    }
    Ok(())
}

/// INSERT executor
pub struct Insert {
    table: ObjectName,
    columns: Option<Vec<String>>,
    values: Vec<Vec<Expression>>,
}

impl Insert {
    pub fn new(table: ObjectName, columns: Option<Vec<String>>, values: Vec<Vec<Expression>>) -> Box<Self> {
        Box::new(Self { table, columns, values })
    }
}

impl Executor for Insert {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let table = ctx.qualify(&self.table);
        ctx.prepare_write(Action::Create, &table.database)?;
        touch_sequences(ctx, self.values.iter().flatten())?;
        let count = ctx.storage.insert(&table, self.columns.as_deref(), self.values)?;
        Ok(ResultSet::Insert { count })
    }
}

/// UPDATE executor
pub struct Update {
    table: ObjectName,
    assignments: Vec<(String, Expression)>,
    filter: Option<Predicate>,
    window: Window,
}

impl Update {
    pub fn new(
        table: ObjectName,
        assignments: Vec<(String, Expression)>,
        filter: Option<Predicate>,
        window: Window,
    ) -> Box<Self> {
        Box::new(Self { table, assignments, filter, window })
    }
}

impl Executor for Update {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let table = ctx.qualify(&self.table);
        ctx.prepare_write(Action::Update, &table.database)?;
        touch_sequences(ctx, self.assignments.iter().map(|(_, expr)| expr))?;
        let count = ctx.storage.update(&table, &self.assignments, self.filter.as_ref(), self.window)?;
        Ok(ResultSet::Update { count })
    }
}

/// DELETE executor
pub struct Delete {
    table: ObjectName,
    filter: Option<Predicate>,
    window: Window,
}

impl Delete {
    pub fn new(table: ObjectName, filter: Option<Predicate>, window: Window) -> Box<Self> {
        Box::new(Self { table, filter, window })
    }
}

impl Executor for Delete {
    fn execute(self: Box<Self>, ctx: &mut Context) -> Result<ResultSet> {
        let table = ctx.qualify(&self.table);
        ctx.prepare_write(Action::Delete, &table.database)?;
        let count = ctx.storage.delete(&table, self.filter.as_ref(), self.window)?;
        Ok(ResultSet::Delete { count })
    }
}
