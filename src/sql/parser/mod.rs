use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    auth,
    error::{Error, Result},
    sql::{expression::Predicate, types},
};
use ast::{
    AlterObject, Column, CreateObject, Expression, ObjectKind, ObjectName, OrderDirection,
    ReadTarget, Select, ShowTarget, Statement, UserOptions, Window,
};
use lexer::{Token, TokenKind, tokenize};

use super::types::DataType;

pub mod ast;
pub mod lexer;

/// Words that end a WHERE span
const CLAUSE_STOPS: &[&str] = &["GROUP", "ORDER", "LIMIT", "OFFSET", "UNION", "CSV"];

const JOIN_WORDS: &[&str] = &["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS"];

/// Command parser - walks a token list positionally and produces one [`Statement`]
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Tokenizes the input; lexical errors surface here, before any parsing
    pub fn new(input: &str) -> Result<Self> {
        Ok(Parser { tokens: tokenize(input)?, pos: 0 })
    }

    /// Parses the statement, rejecting trailing tokens
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;
        if let Some(token) = self.peek() {
            return Err(Error::Parse(format!("Unexpected token {}", token)));
        }
        Ok(stmt)
    }

    /// Dispatches on the command verb
    fn parse_statement(&mut self) -> Result<Statement> {
        let verb = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(Error::Parse("Empty statement".to_string())),
        };
        if verb.kind != TokenKind::Command {
            return Err(unrecognized(&[&verb]));
        }
        match verb.value.as_str() {
            "USE" => self.parse_use(),
            "SET" => self.parse_set(),
            "SELECT" => self.parse_select(),
            "INSERT" => self.parse_insert(),
            "UPDATE" => self.parse_update(),
            "DELETE" => self.parse_delete(),
            "CREATE" => self.parse_create(),
            "DROP" => self.parse_drop(),
            "ALTER" => self.parse_alter(),
            "SHOW" => self.parse_show(),
            "DESCRIBE" => self.parse_describe(),
            "READ" => self.parse_read(),
            "RELOAD" => self.parse_reload(),
            _ => Err(unrecognized(&[&verb])),
        }
    }

    fn parse_use(&mut self) -> Result<Statement> {
        self.next_expect_word("USE")?;
        Ok(Statement::Use { database: self.next_ident()? })
    }

    fn parse_set(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        if !self.next_if_word("SEARCH_PATH") {
            return Err(self.unrecognized_after(&verb));
        }
        if !self.next_if_word("TO") {
            self.next_expect_symbol("=")?;
        }
        Ok(Statement::SetSearchPath { schema: self.next_ident()? })
    }

    /// Parses SELECT <cols|*> FROM <table> [WHERE] [GROUP BY] [ORDER BY] [LIMIT] [CSV]
    fn parse_select(&mut self) -> Result<Statement> {
        self.next_expect_word("SELECT")?;

        let columns = if self.next_if_symbol("*") {
            None
        } else {
            let mut cols = Vec::new();
            loop {
                let token = self.next()?;
                if token.kind == TokenKind::Function {
                    return Err(Error::Parse(format!(
                        "Aggregate function {} is not supported",
                        token.value
                    )));
                }
                if !token.is_word() {
                    return Err(Error::Parse(format!("Expected column name, got {}", token)));
                }
                cols.push(token.value);
                if !self.next_if_symbol(",") {
                    break;
                }
            }
            Some(cols)
        };

        self.next_expect_word("FROM")?;
        let from = self.next_name()?;
        if let Some(token) = self.peek() {
            if JOIN_WORDS.iter().any(|w| token.is(w)) || token.kind == TokenKind::Separator {
                return Err(Error::Parse("Joins are not supported".to_string()));
            }
        }

        let filter = self.parse_where()?;

        let mut group_by = Vec::new();
        if self.next_if_word("GROUP") {
            self.next_expect_word("BY")?;
            loop {
                group_by.push(self.next_ident()?);
                if !self.next_if_symbol(",") {
                    break;
                }
            }
        }

        let mut order_by = Vec::new();
        if self.next_if_word("ORDER") {
            self.next_expect_word("BY")?;
            loop {
                let col = self.next_ident()?;
                let direction = if self.next_if_word("DESC") {
                    OrderDirection::Desc
                } else {
                    self.next_if_word("ASC");
                    OrderDirection::Asc
                };
                order_by.push((col, direction));
                if !self.next_if_symbol(",") {
                    break;
                }
            }
        }

        let window = self.parse_window()?;
        let csv = self.next_if_word("CSV");
        if self.peek().is_some_and(|t| t.is("UNION")) {
            return Err(Error::Parse("UNION is not supported".to_string()));
        }

        Ok(Statement::Select(Select {
            columns,
            from,
            filter,
            group_by,
            order_by,
            window,
            csv,
        }))
    }

    /// Parses INSERT INTO <table> [(<cols>)] VALUES (<values>)[, (<values>)]
    fn parse_insert(&mut self) -> Result<Statement> {
        self.next_expect_word("INSERT")?;
        self.next_expect_word("INTO")?;
        let table = self.next_name()?;

        let columns = if self.next_if_symbol("(") {
            let mut cols = Vec::new();
            loop {
                cols.push(self.next_ident()?);
                if self.next_if_symbol(")") {
                    break;
                }
                self.next_expect_symbol(",")?;
            }
            Some(cols)
        } else {
            None
        };

        self.next_expect_word("VALUES")?;
        let mut values = Vec::new();
        loop {
            self.next_expect_symbol("(")?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_value()?);
                if self.next_if_symbol(")") {
                    break;
                }
                self.next_expect_symbol(",")?;
            }
            values.push(row);
            if !self.next_if_symbol(",") {
                break;
            }
        }
        Ok(Statement::Insert { table, columns, values })
    }

    /// Parses UPDATE <table> SET <col>=<value>, ... [WHERE] [LIMIT n [OFFSET m]]
    fn parse_update(&mut self) -> Result<Statement> {
        self.next_expect_word("UPDATE")?;
        let table = self.next_name()?;
        self.next_expect_word("SET")?;

        let mut assignments: Vec<(String, Expression)> = Vec::new();
        loop {
            let col = self.next_ident()?;
            self.next_expect_symbol("=")?;
            let value = self.parse_value()?;
            if assignments.iter().any(|(c, _)| *c == col) {
                return Err(Error::Parse(format!("Duplicate column {} for update", col)));
            }
            assignments.push((col, value));
            if !self.next_if_symbol(",") {
                break;
            }
        }
        Ok(Statement::Update {
            table,
            assignments,
            filter: self.parse_where()?,
            window: self.parse_window()?,
        })
    }

    /// Parses DELETE FROM <table> [WHERE] [LIMIT n [OFFSET m]]
    fn parse_delete(&mut self) -> Result<Statement> {
        self.next_expect_word("DELETE")?;
        self.next_expect_word("FROM")?;
        let table = self.next_name()?;
        Ok(Statement::Delete {
            table,
            filter: self.parse_where()?,
            window: self.parse_window()?,
        })
    }

    fn parse_create(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        let kind = self.next_object_kind(&verb)?;
        let object = match kind {
            ObjectKind::Database => CreateObject::Database { name: self.next_ident()? },
            ObjectKind::Schema => CreateObject::Schema { name: self.next_schema_name()? },
            ObjectKind::Sequence => {
                let name = self.next_name()?;
                let (mut start, mut increment) = (1, 1);
                loop {
                    if self.next_if_word("START") {
                        self.next_if_word("WITH");
                        start = self.next_integer()?;
                    } else if self.next_if_word("INCREMENT") {
                        self.next_if_word("BY");
                        increment = self.next_integer()?;
                    } else {
                        break;
                    }
                }
                CreateObject::Sequence { name, start, increment }
            }
            ObjectKind::Table => {
                let name = self.next_name()?;
                let (columns, primary_key) = self.parse_table_columns()?;
                CreateObject::Table { name, columns, primary_key }
            }
            ObjectKind::User => {
                let name = self.next_ident()?;
                self.next_expect_symbol("(")?;
                let options = self.parse_user_options(")")?;
                self.next_expect_symbol(")")?;
                if options.password.is_none() {
                    return Err(Error::Parse("CREATE USER requires PASSWORD".to_string()));
                }
                CreateObject::User { name, options }
            }
            ObjectKind::Entry => {
                let name = self.next_ident()?;
                self.next_expect_symbol("(")?;
                let (mut entry_type, mut value) = (None, None);
                loop {
                    let key = self.next()?;
                    self.next_if_symbol("=");
                    if key.is("TYPE") {
                        let token = self.next()?;
                        entry_type = Some(DataType::from_name(&token.value).ok_or_else(|| {
                            Error::Validation(format!("Unknown entry type '{}'", token.value))
                        })?);
                    } else if key.is("VALUE") {
                        value = Some(self.parse_literal()?);
                    } else {
                        return Err(Error::Parse(format!("Unexpected entry option {}", key)));
                    }
                    if !self.next_if_symbol(",") {
                        break;
                    }
                }
                self.next_expect_symbol(")")?;
                CreateObject::Entry {
                    name,
                    entry_type: entry_type
                        .ok_or_else(|| Error::Parse("CREATE ENTRY requires TYPE".to_string()))?,
                    value: value
                        .ok_or_else(|| Error::Parse("CREATE ENTRY requires VALUE".to_string()))?,
                }
            }
        };
        Ok(Statement::Create(object))
    }

    /// Parses the parenthesized column list of CREATE TABLE
    fn parse_table_columns(&mut self) -> Result<(Vec<Column>, Vec<String>)> {
        self.next_expect_symbol("(")?;
        let mut columns = Vec::new();
        let mut primary_key = Vec::new();
        loop {
            if self.next_if_word("PRIMARY") {
                self.next_expect_word("KEY")?;
                self.next_expect_symbol("(")?;
                loop {
                    primary_key.push(self.next_ident()?);
                    if self.next_if_symbol(")") {
                        break;
                    }
                    self.next_expect_symbol(",")?;
                }
            } else {
                columns.push(self.parse_column()?);
            }
            if !self.next_if_symbol(",") {
                break;
            }
        }
        self.next_expect_symbol(")")?;
        Ok((columns, primary_key))
    }

    /// Parses a column definition in CREATE TABLE
    fn parse_column(&mut self) -> Result<Column> {
        let name = self.next_ident()?;
        let type_token = self.next()?;
        let datatype = Some(&type_token)
            .filter(|t| t.is_word())
            .and_then(|t| DataType::from_name(&t.value))
            .ok_or_else(|| Error::Parse(format!("Unknown column type {}", type_token)))?;
        let mut column = Column::new(name, datatype);

        // VARCHAR(n)
        if self.next_if_symbol("(") {
            let length = self.next_usize()?;
            self.next_expect_symbol(")")?;
            if datatype == DataType::String {
                column.max_length = Some(length);
            }
        }

        // Parse column constraints until the next ',' or ')'
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Separator || (token.kind == TokenKind::Token && token.value == ")") {
                break;
            }
            let token = self.next()?;
            if matches!(token.kind, TokenKind::String | TokenKind::Number) {
                return Err(Error::Parse(format!("Unexpected token {} in column definition", token)));
            }
            match token.value.to_uppercase().as_ref() {
                "PRIMARY" => {
                    self.next_expect_word("KEY")?;
                    column.primary_key = true;
                }
                "NOT" => {
                    self.next_expect_word("NULL")?;
                    column.not_null = true;
                }
                "NULL" => column.not_null = false,
                "UNIQUE" => column.unique = true,
                "DEFAULT" => column.default = Some(self.parse_value()?),
                "AUTO" => {
                    self.next_expect_word("INCREMENT")?;
                    column.auto_increment = true;
                }
                "AUTO_INCREMENT" | "AUTOINCREMENT" => column.auto_increment = true,
                "MINLENGTH" => column.min_length = Some(self.next_usize()?),
                "MAXLENGTH" => column.max_length = Some(self.next_usize()?),
                "MIN" | "MINVALUE" => column.min_value = Some(self.next_float()?),
                "MAX" | "MAXVALUE" => column.max_value = Some(self.next_float()?),
                "ENUM" => {
                    self.next_expect_symbol("(")?;
                    let mut labels = Vec::new();
                    loop {
                        let label = self.next()?;
                        if label.kind != TokenKind::String && !label.is_word() {
                            return Err(Error::Parse(format!("Unexpected enum label {}", label)));
                        }
                        labels.push(label.value);
                        if self.next_if_symbol(")") {
                            break;
                        }
                        self.next_expect_symbol(",")?;
                    }
                    column.enum_values = Some(labels);
                }
                _ => {
                    return Err(Error::Parse(format!(
                        "Unexpected token {} in column definition",
                        token
                    )));
                }
            }
        }
        Ok(column)
    }

    /// Parses `PASSWORD p, PRIVILEGES json, VALID bool` in any order, `=` optional
    fn parse_user_options(&mut self, terminator: &str) -> Result<UserOptions> {
        let mut options = UserOptions::default();
        loop {
            let key = self.next()?;
            self.next_if_symbol("=");
            if key.is("PASSWORD") {
                let token = self.next()?;
                if token.kind != TokenKind::String && !token.is_word() {
                    return Err(Error::Parse(format!("Expected password, got {}", token)));
                }
                options.password = Some(token.value);
            } else if key.is("PRIVILEGES") {
                let token = self.next()?;
                if token.kind != TokenKind::String {
                    return Err(Error::Parse(format!("Expected privileges object, got {}", token)));
                }
                options.privileges = Some(parse_privileges(&token.value)?);
            } else if key.is("VALID") {
                let token = self.next()?;
                if token.kind != TokenKind::Boolean {
                    return Err(Error::Parse(format!("Expected true or false, got {}", token)));
                }
                options.valid = Some(token.value == "true");
            } else {
                return Err(Error::Parse(format!("Unexpected user option {}", key)));
            }
            if !self.next_if_symbol(",") {
                break;
            }
        }
        if terminator == ")" && !self.peek().is_some_and(|t| t.value == ")") {
            return Err(Error::Parse("Expected ')' after user options".to_string()));
        }
        Ok(options)
    }

    /// Parses DROP <kind> [IF EXISTS] <name>
    fn parse_drop(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        let kind = self.next_object_kind(&verb)?;
        let if_exists = if self.next_if_word("IF") {
            self.next_expect_word("EXISTS")?;
            true
        } else {
            false
        };
        let name = match kind {
            ObjectKind::Schema => self.next_schema_name()?,
            ObjectKind::Table | ObjectKind::Sequence => self.next_name()?,
            _ => ObjectName::new(self.next_ident()?),
        };
        Ok(Statement::Drop { kind, name, if_exists })
    }

    fn parse_alter(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        let kind = self.next_object_kind(&verb)?;
        let object = match kind {
            ObjectKind::Sequence => {
                let name = self.next_name()?;
                let (mut increment, mut restart) = (None, None);
                loop {
                    if self.next_if_word("INCREMENT") {
                        self.next_if_word("BY");
                        increment = Some(self.next_integer()?);
                    } else if self.next_if_word("RESTART") {
                        self.next_if_word("WITH");
                        restart = Some(self.next_integer()?);
                    } else {
                        break;
                    }
                }
                if increment.is_none() && restart.is_none() {
                    return Err(Error::Parse(
                        "ALTER SEQUENCE requires INCREMENT BY or RESTART WITH".to_string(),
                    ));
                }
                AlterObject::Sequence { name, increment, restart }
            }
            ObjectKind::User => {
                let name = self.next_ident()?;
                self.next_expect_word("SET")?;
                AlterObject::User { name, options: self.parse_user_options("")? }
            }
            ObjectKind::Entry => {
                let name = self.next_ident()?;
                self.next_expect_word("SET")?;
                self.next_expect_word("VALUE")?;
                self.next_if_symbol("=");
                AlterObject::Entry { name, value: self.parse_literal()? }
            }
            _ => return Err(unrecognized(&[&verb, &self.tokens[self.pos - 1]])),
        };
        Ok(Statement::Alter(object))
    }

    fn parse_show(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        let target = self.next()?;
        let upper = target.value.to_uppercase();
        let show = match upper.as_str() {
            "DATABASES" => ShowTarget::Databases,
            "SCHEMAS" => ShowTarget::Schemas {
                database: if self.next_if_word("FROM") { Some(self.next_ident()?) } else { None },
            },
            "SEQUENCES" | "TABLES" => {
                let (database, schema) = if self.next_if_word("FROM") {
                    let from = self.next_ident()?;
                    match from.split_once('.') {
                        Some((db, schema)) => (Some(db.to_string()), Some(schema.to_string())),
                        None => (Some(from), None),
                    }
                } else {
                    (None, None)
                };
                if upper == "TABLES" {
                    ShowTarget::Tables { database, schema }
                } else {
                    ShowTarget::Sequences { database, schema }
                }
            }
            "USERS" => ShowTarget::Users,
            "REGISTRY" => ShowTarget::Registry,
            _ => return Err(unrecognized(&[&verb, &target])),
        };
        Ok(Statement::Show(show))
    }

    fn parse_describe(&mut self) -> Result<Statement> {
        self.next_expect_word("DESCRIBE")?;
        self.next_if_word("TABLE");
        Ok(Statement::Describe { table: self.next_name()? })
    }

    fn parse_read(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        let target = self.next()?;
        let read = if target.is("ENTRY") {
            ReadTarget::Entry(self.next_ident()?)
        } else if target.is("SEQUENCE") {
            ReadTarget::Sequence(self.next_name()?)
        } else {
            return Err(unrecognized(&[&verb, &target]));
        };
        Ok(Statement::Read(read))
    }

    fn parse_reload(&mut self) -> Result<Statement> {
        let verb = self.next()?;
        if !self.next_if_word("CONFIG") {
            return Err(self.unrecognized_after(&verb));
        }
        Ok(Statement::ReloadConfig)
    }

    /// Parses an INSERT/UPDATE value: constant, DEFAULT, NULL, MD5(...) or NEXTVAL(...)
    fn parse_value(&mut self) -> Result<Expression> {
        let token = self.next()?;
        Ok(match token.kind {
            TokenKind::Literal if token.is("DEFAULT") => Expression::Default,
            TokenKind::Function if token.is("MD5") => {
                self.next_expect_symbol("(")?;
                let input = self.next()?;
                if input.kind != TokenKind::String {
                    return Err(Error::Parse(format!("MD5 expects a string, got {}", input)));
                }
                self.next_expect_symbol(")")?;
                Expression::Consts(Value::String(auth::md5_hex(&input.value)))
            }
            TokenKind::Function if token.is("NEXTVAL") => {
                self.next_expect_symbol("(")?;
                let sequence = self.next()?;
                if sequence.kind != TokenKind::String && !sequence.is_word() {
                    return Err(Error::Parse(format!("NEXTVAL expects a sequence, got {}", sequence)));
                }
                self.next_expect_symbol(")")?;
                Expression::NextVal(sequence.value)
            }
            _ => {
                self.pos -= 1;
                Expression::Consts(self.parse_literal()?)
            }
        })
    }

    /// Parses a constant: number, string, boolean or NULL
    fn parse_literal(&mut self) -> Result<Value> {
        let token = self.next()?;
        Ok(match token.kind {
            TokenKind::Number => types::number(&token.value, false)?,
            TokenKind::Math if token.value == "-" => {
                let number = self.next()?;
                if number.kind != TokenKind::Number {
                    return Err(Error::Parse(format!("Expected number after '-', got {}", number)));
                }
                types::number(&number.value, true)?
            }
            TokenKind::String => Value::String(token.value),
            TokenKind::Boolean => Value::Bool(token.value == "true"),
            TokenKind::Literal if token.is("NULL") => Value::Null,
            _ => return Err(Error::Parse(format!("Unexpected value {}", token))),
        })
    }

    /// Collects the WHERE span and compiles it
    fn parse_where(&mut self) -> Result<Option<Predicate>> {
        if !self.next_if_word("WHERE") {
            return Ok(None);
        }
        let start = self.pos;
        let mut depth = 0i64;
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Token {
                depth += if token.value == "(" { 1 } else { -1 };
            } else if depth == 0 && CLAUSE_STOPS.iter().any(|w| token.is(w)) {
                break;
            }
            self.pos += 1;
        }
        Predicate::compile(&self.tokens[start..self.pos]).map(Some)
    }

    /// Parses LIMIT n [OFFSET m | , m] and a standalone OFFSET m
    fn parse_window(&mut self) -> Result<Window> {
        let mut window = Window::default();
        if self.next_if_word("LIMIT") {
            window.limit = Some(self.next_usize()?);
            if self.next_if_symbol(",") {
                window.offset = self.next_usize()?;
            }
        }
        if self.next_if_word("OFFSET") {
            window.offset = self.next_usize()?;
        }
        Ok(window)
    }

    /// Peeks at the next token
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Consumes and returns the next token
    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Error::Parse("Unexpected end of input".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    /// Consumes next token if it satisfies the predicate
    fn next_if<F: Fn(&Token) -> bool>(&mut self, predicate: F) -> Option<Token> {
        self.peek().filter(|t| predicate(t))?;
        self.next().ok()
    }

    fn next_if_word(&mut self, word: &str) -> bool {
        self.next_if(|t| t.is(word)).is_some()
    }

    /// Consumes a punctuation or operator token with the exact value
    fn next_if_symbol(&mut self, symbol: &str) -> bool {
        self.next_if(|t| {
            matches!(
                t.kind,
                TokenKind::Token | TokenKind::Separator | TokenKind::Operator | TokenKind::Math
            ) && t.value == symbol
        })
        .is_some()
    }

    fn next_expect_word(&mut self, word: &str) -> Result<()> {
        let token = self.next()?;
        if !token.is(word) {
            return Err(Error::Parse(format!("Expected {}, got {}", word, token)));
        }
        Ok(())
    }

    fn next_expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if !self.next_if_symbol(symbol) {
            return Err(match self.peek() {
                Some(token) => Error::Parse(format!("Expected '{}', got {}", symbol, token)),
                None => Error::Parse(format!("Expected '{}', got end of input", symbol)),
            });
        }
        Ok(())
    }

    /// Expects and consumes an identifier
    fn next_ident(&mut self) -> Result<String> {
        let token = self.next()?;
        if !token.is_word() {
            return Err(Error::Parse(format!("Expected identifier, got {}", token)));
        }
        Ok(token.value)
    }

    /// Expects a possibly qualified table or sequence name
    fn next_name(&mut self) -> Result<ObjectName> {
        let ident = self.next_ident()?;
        ObjectName::parse(&ident).ok_or_else(|| Error::Parse(format!("Invalid name {}", ident)))
    }

    /// Expects a schema name, optionally qualified as `db.schema`
    fn next_schema_name(&mut self) -> Result<ObjectName> {
        let ident = self.next_ident()?;
        match ident.split('.').collect::<Vec<_>>().as_slice() {
            [name] if !name.is_empty() => Ok(ObjectName::new(*name)),
            [db, name] if !db.is_empty() && !name.is_empty() => Ok(ObjectName {
                database: Some(db.to_string()),
                schema: None,
                name: name.to_string(),
            }),
            _ => Err(Error::Parse(format!("Invalid schema name {}", ident))),
        }
    }

    fn next_object_kind(&mut self, verb: &Token) -> Result<ObjectKind> {
        let token = self.next()?;
        Some(&token)
            .filter(|t| t.kind == TokenKind::Command)
            .and_then(|t| ObjectKind::from_word(&t.value))
            .ok_or_else(|| unrecognized(&[verb, &token]))
    }

    fn next_usize(&mut self) -> Result<usize> {
        let token = self.next()?;
        if token.kind != TokenKind::Number || token.value.contains('.') {
            return Err(Error::Parse(format!("Expected non-negative integer, got {}", token)));
        }
        Ok(token.value.parse()?)
    }

    fn next_integer(&mut self) -> Result<i64> {
        let negative = self.next_if_symbol("-");
        let token = self.next()?;
        if token.kind != TokenKind::Number || token.value.contains('.') {
            return Err(Error::Parse(format!("Expected integer, got {}", token)));
        }
        types::integer(&token.value, negative)
    }

    fn next_float(&mut self) -> Result<f64> {
        match self.parse_literal()? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| Error::Parse(format!("Invalid number {}", n))),
            other => Err(Error::Parse(format!("Expected number, got {}", other))),
        }
    }

    fn unrecognized_after(&self, verb: &Token) -> Error {
        match self.peek() {
            Some(token) => unrecognized(&[verb, token]),
            None => unrecognized(&[verb]),
        }
    }
}

fn unrecognized(tokens: &[&Token]) -> Error {
    let words: Vec<String> = tokens.iter().map(|t| t.value.to_uppercase()).collect();
    Error::Unrecognized(format!("Unrecognized command '{}'", words.join(" ")))
}

/// Parses a privilege object such as `{"*": 4, "shop": 15}`
fn parse_privileges(text: &str) -> Result<BTreeMap<String, u8>> {
    let raw: BTreeMap<String, Value> = serde_json::from_str(text)
        .map_err(|e| Error::Validation(format!("Invalid privileges object: {}", e)))?;
    raw.into_iter()
        .map(|(db, bits)| match bits.as_u64() {
            Some(b) if b <= 0b1111 => Ok((db, b as u8)),
            _ => Err(Error::Validation(format!(
                "Privileges for '{}' must be an integer between 0 and 15",
                db
            ))),
        })
        .collect()
}
