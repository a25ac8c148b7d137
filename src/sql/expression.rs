//! WHERE clause compilation and evaluation.
//!
//! A clause is compiled once from its token span into a [`Predicate`] tree and then
//! evaluated against each row's `{column: value}` view. Precedence from loosest to
//! tightest is `OR`, `AND`, `NOT`, comparison; parentheses group.

use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    sql::{
        parser::lexer::{Token, TokenKind},
        types::{self, compare, loose_eq, to_text, truthy},
    },
};

/// A materialized row: column name to cell value, in column order
pub type RowView = Map<String, Value>;

/// Comparison operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

impl Operand {
    fn resolve<'a>(&'a self, row: &'a RowView) -> Result<&'a Value> {
        match self {
            Operand::Literal(value) => Ok(value),
            Operand::Column(name) => row
                .get(name)
                .or_else(|| name.rsplit_once('.').and_then(|(_, column)| row.get(column)))
                .ok_or_else(|| Error::NotFound(format!("Column '{}' does not exist", name))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    Is,
    IsNot,
}

impl CompareOp {
    fn from_symbol(symbol: &str) -> Option<CompareOp> {
        Some(match symbol {
            "=" => CompareOp::Eq,
            "<>" => CompareOp::NotEq,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::LtEq,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::GtEq,
            "LIKE" => CompareOp::Like,
            "IS" => CompareOp::Is,
            _ => return None,
        })
    }

    fn apply(&self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering::*;

        let ordered = |accept: &[std::cmp::Ordering]| {
            !left.is_null()
                && !right.is_null()
                && compare(left, right).is_some_and(|o| accept.contains(&o))
        };
        match self {
            CompareOp::Eq => loose_eq(left, right),
            CompareOp::NotEq => !loose_eq(left, right),
            CompareOp::Lt => ordered(&[Less]),
            CompareOp::LtEq => ordered(&[Less, Equal]),
            CompareOp::Gt => ordered(&[Greater]),
            CompareOp::GtEq => ordered(&[Greater, Equal]),
            CompareOp::Like | CompareOp::NotLike => {
                if left.is_null() || right.is_null() {
                    return false;
                }
                let matched = like(&to_text(left), &to_text(right));
                if *self == CompareOp::Like { matched } else { !matched }
            }
            CompareOp::Is => loose_eq(left, right),
            CompareOp::IsNot => !loose_eq(left, right),
        }
    }
}

/// Compiled WHERE expression
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `WHERE true`
    Constant(bool),
    /// A bare operand, e.g. `WHERE active`
    Truthy(Operand),
    Comparison {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Compiles a WHERE token span
    pub fn compile(tokens: &[Token]) -> Result<Predicate> {
        if tokens.is_empty() {
            return Err(Error::Parse("Empty WHERE clause".to_string()));
        }
        let mut compiler = Compiler { tokens, pos: 0 };
        let predicate = compiler.parse_or()?;
        if let Some(token) = compiler.peek() {
            return Err(Error::Parse(format!("Unexpected token {} in WHERE clause", token)));
        }
        Ok(predicate)
    }

    /// `column = value`
    pub fn equals(column: impl Into<String>, value: Value) -> Predicate {
        Predicate::Comparison {
            left: Operand::Column(column.into()),
            op: CompareOp::Eq,
            right: Operand::Literal(value),
        }
    }

    /// Evaluates depth-first, short-circuiting AND/OR
    pub fn evaluate(&self, row: &RowView) -> Result<bool> {
        Ok(match self {
            Predicate::Constant(b) => *b,
            Predicate::Truthy(operand) => truthy(operand.resolve(row)?),
            Predicate::Comparison { left, op, right } => {
                op.apply(left.resolve(row)?, right.resolve(row)?)
            }
            Predicate::And(a, b) => a.evaluate(row)? && b.evaluate(row)?,
            Predicate::Or(a, b) => a.evaluate(row)? || b.evaluate(row)?,
            Predicate::Not(a) => !a.evaluate(row)?,
        })
    }
}

struct Compiler<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Compiler<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| Error::Parse("Unexpected end of WHERE clause".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn next_if_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is(word)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while self.next_if_word("OR") {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not()?;
        while self.next_if_word("AND") {
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Conditional && t.is("NOT")) {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Token && t.value == "(") {
            self.pos += 1;
            let inner = self.parse_or()?;
            match self.next()? {
                t if t.kind == TokenKind::Token && t.value == ")" => return Ok(inner),
                t => return Err(Error::Parse(format!("Expected ')', got {}", t))),
            }
        }

        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(t) if t.kind == TokenKind::Operator => {
                self.pos += 1;
                let op = CompareOp::from_symbol(&t.value)
                    .ok_or_else(|| Error::Parse(format!("Unknown operator {}", t)))?;
                if op == CompareOp::Is && self.next_if_word("NOT") {
                    CompareOp::IsNot
                } else {
                    op
                }
            }
            Some(t) if t.is("NOT") && self.tokens.get(self.pos + 1).is_some_and(|n| n.is("LIKE")) => {
                self.pos += 2;
                CompareOp::NotLike
            }
            _ => {
                return Ok(match left {
                    Operand::Literal(Value::Bool(b)) => Predicate::Constant(b),
                    operand => Predicate::Truthy(operand),
                });
            }
        };
        let right = self.parse_operand()?;
        Ok(Predicate::Comparison { left, op, right })
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        let token = self.next()?;
        Ok(match token.kind {
            TokenKind::String => Operand::Literal(Value::String(token.value.clone())),
            TokenKind::Number => Operand::Literal(types::number(&token.value, false)?),
            TokenKind::Boolean => Operand::Literal(Value::Bool(token.value == "true")),
            TokenKind::Math if token.value == "-" => match self.next()? {
                t if t.kind == TokenKind::Number => Operand::Literal(types::number(&t.value, true)?),
                t => return Err(Error::Parse(format!("Expected number after '-', got {}", t))),
            },
            TokenKind::Literal if token.is("NULL") => Operand::Literal(Value::Null),
            TokenKind::Literal => Operand::Column(token.value.clone()),
            _ => {
                return Err(Error::Parse(format!(
                    "Unexpected token {} in WHERE clause",
                    token
                )));
            }
        })
    }
}

/// SQL LIKE matching: `%` matches any run, `_` exactly one character
fn like(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut ti, mut pi) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] != '%' && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{Predicate, RowView, like};
    use crate::{
        error::{Error, Result},
        sql::parser::lexer::tokenize,
    };

    fn row(value: Value) -> RowView {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn eval(clause: &str, value: Value) -> Result<bool> {
        Predicate::compile(&tokenize(clause)?)?.evaluate(&row(value))
    }

    #[test]
    fn test_comparisons() -> Result<()> {
        let r = json!({"id": 3, "name": "alice", "score": 4.5, "active": true, "tag": null});
        assert!(eval("`id` = 3", r.clone())?);
        assert!(eval("id <> 2", r.clone())?);
        assert!(eval("score >= 4.5 and score < 5", r.clone())?);
        assert!(eval("name = 'alice'", r.clone())?);
        assert!(eval("name like 'al%'", r.clone())?);
        assert!(eval("name not like '_x%'", r.clone())?);
        assert!(eval("tag is null", r.clone())?);
        assert!(eval("name is not null", r.clone())?);
        assert!(eval("active", r.clone())?);
        assert!(eval("active = true", r.clone())?);
        assert!(eval("id > -1", r.clone())?);
        assert!(!eval("tag > 1", r.clone())?);
        Ok(())
    }

    #[test]
    fn test_precedence_and_grouping() -> Result<()> {
        let r = json!({"a": 1, "b": 2});
        // AND binds tighter than OR
        assert!(eval("a = 1 or a = 5 and b = 5", r.clone())?);
        assert!(!eval("(a = 1 or a = 5) and b = 5", r.clone())?);
        assert!(eval("not a = 2", r.clone())?);
        assert!(eval("not (a = 1 and b = 3)", r.clone())?);
        assert!(eval("true", r.clone())?);
        assert!(!eval("false or false", r.clone())?);
        Ok(())
    }

    #[test]
    fn test_short_circuit() -> Result<()> {
        let r = json!({"a": 1});
        assert!(!eval("false and missing = 1", r.clone())?);
        assert!(eval("a = 1 or missing = 1", r.clone())?);
        assert!(matches!(eval("missing = 1", r), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_compile_errors() -> Result<()> {
        assert!(matches!(Predicate::compile(&[]), Err(Error::Parse(_))));
        assert!(matches!(Predicate::compile(&tokenize("a = ")?), Err(Error::Parse(_))));
        assert!(matches!(Predicate::compile(&tokenize("a = 1 b")?), Err(Error::Parse(_))));
        assert!(matches!(Predicate::compile(&tokenize("(a = 1) or")?), Err(Error::Parse(_))));
        assert!(matches!(Predicate::compile(&tokenize("a, 1")?), Err(Error::Parse(_))));
        Ok(())
    }

    #[test]
    fn test_no_code_injection() -> Result<()> {
        // Arbitrary text only ever becomes operands, never code
        let r = json!({"a": 1});
        assert!(matches!(
            Predicate::compile(&tokenize("a = 1 + process.exit")?),
            Err(Error::Parse(_))
        ));
        assert!(!eval("a = 'constructor'", r)?);
        Ok(())
    }

    #[test]
    fn test_like() {
        assert!(like("hello", "h%o"));
        assert!(like("hello", "%"));
        assert!(like("hello", "h_llo"));
        assert!(like("", "%"));
        assert!(!like("hello", "h_o"));
        assert!(like("abcabc", "%bc"));
        assert!(!like("abc", "abcd"));
    }
}
