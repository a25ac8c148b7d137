//! Command lexer - tokenizes statement text into a stream of typed tokens

use std::{fmt::Display, iter::Peekable, str::Chars};

use serde::Serialize;

use crate::error::{Error, Result};

/// Token categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Command verb or clause keyword
    Command,
    /// Parenthesis
    Token,
    /// Comma
    Separator,
    /// Aggregate or scalar function name
    Function,
    /// Arithmetic symbol (also `*` in `SELECT *`)
    Math,
    /// Comparison operator
    Operator,
    /// ASC / DESC
    #[serde(rename = "sortmode")]
    SortMode,
    /// AND / OR / NOT
    Conditional,
    Boolean,
    Number,
    String,
    /// Bare word or backtick-quoted identifier
    Literal,
}

/// A single lexical token
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }

    /// Whether this is the given word, ignoring case. Quoted strings and numbers never match.
    pub fn is(&self, word: &str) -> bool {
        !matches!(self.kind, TokenKind::String | TokenKind::Number)
            && self.value.eq_ignore_ascii_case(word)
    }

    /// Whether this token can name a database object
    pub fn is_word(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Literal | TokenKind::Command | TokenKind::Function
        )
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TokenKind::String => write!(f, "'{}'", self.value),
            _ => f.write_str(&self.value),
        }
    }
}

const COMMANDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "READ", "CREATE", "ALTER", "DROP", "USE", "SET",
    "SHOW", "DESCRIBE", "RELOAD", "FROM", "INTO", "VALUES", "WHERE", "ORDER", "GROUP", "BY",
    "LIMIT", "OFFSET", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "UNION",
    "DATABASE", "SCHEMA", "SEQUENCE", "TABLE", "USER", "ENTRY", "REGISTRY",
];

const FUNCTIONS: &[&str] = &["AVG", "COUNT", "MIN", "MAX", "SUM", "MD5", "NEXTVAL"];

/// Classifies a bare word into its token kind
fn classify(word: String) -> Token {
    let upper = word.to_uppercase();
    match upper.as_str() {
        "AND" | "OR" | "NOT" => Token::new(TokenKind::Conditional, upper),
        "ASC" | "DESC" => Token::new(TokenKind::SortMode, upper),
        "TRUE" | "FALSE" => Token::new(TokenKind::Boolean, upper.to_lowercase()),
        "LIKE" | "IS" => Token::new(TokenKind::Operator, upper),
        u if COMMANDS.contains(&u) => Token::new(TokenKind::Command, upper),
        u if FUNCTIONS.contains(&u) => Token::new(TokenKind::Function, upper),
        _ => Token::new(TokenKind::Literal, word),
    }
}

/// Statement lexical analyzer (lexer/tokenizer)
pub struct Lexer<'a> {
    iter: Peekable<Chars<'a>>,
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.scan() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => self
                .iter
                .peek()
                .map(|c| Err(Error::Parse(format!("Unexpected character '{}'", c)))),
            Err(err) => Some(Err(err)),
        }
    }
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { iter: text.chars().peekable() }
    }

    /// Consumes the next character if it satisfies the predicate
    fn next_if<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<char> {
        self.iter.peek().filter(|&c| predicate(*c))?;
        self.iter.next()
    }

    /// Consumes consecutive characters while they satisfy the predicate
    fn next_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<String> {
        let mut value = String::new();
        while let Some(c) = self.next_if(&predicate) {
            value.push(c);
        }
        Some(value).filter(|v| !v.is_empty())
    }

    fn erase_whitespace(&mut self) {
        self.next_while(|c| c.is_whitespace());
    }

    /// Scans and returns the next token
    fn scan(&mut self) -> Result<Option<Token>> {
        self.erase_whitespace();
        match self.iter.peek() {
            Some('\'') => self.scan_quoted('\'', TokenKind::String).map(Some),
            Some('`') => self.scan_quoted('`', TokenKind::Literal).map(Some),
            Some('{') => self.scan_document().map(Some),
            Some(c) if c.is_ascii_digit() => Ok(self.scan_number()),
            Some(c) if c.is_alphabetic() || *c == '_' => Ok(self.scan_word()),
            Some(_) => Ok(self.scan_symbol()),
            None => Ok(None),
        }
    }

    /// Scans a quoted span; a doubled quote inside is an escaped quote
    fn scan_quoted(&mut self, quote: char, kind: TokenKind) -> Result<Token> {
        self.iter.next();
        let mut val = String::new();
        loop {
            match self.iter.next() {
                Some(c) if c == quote => {
                    if self.next_if(|c| c == quote).is_some() {
                        val.push(quote);
                    } else {
                        break;
                    }
                }
                Some(c) => val.push(c),
                None => {
                    return Err(Error::Parse(match kind {
                        TokenKind::Literal => "Unterminated backtick identifier".to_string(),
                        _ => "Unterminated string literal".to_string(),
                    }));
                }
            }
        }
        Ok(Token::new(kind, val))
    }

    /// Scans an inline JSON object `{...}` into a string token
    fn scan_document(&mut self) -> Result<Token> {
        let mut val = String::new();
        let mut depth = 0usize;
        let mut in_string = false;
        while let Some(c) = self.iter.next() {
            val.push(c);
            match c {
                '\\' if in_string => {
                    if let Some(escaped) = self.iter.next() {
                        val.push(escaped);
                    }
                }
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Token::new(TokenKind::String, val));
                    }
                }
                _ => {}
            }
        }
        Err(Error::Parse("Unterminated object literal".to_string()))
    }

    /// Scans a numeric literal matching `\d+(\.\d+)?`
    fn scan_number(&mut self) -> Option<Token> {
        let mut val = self.next_while(|c| c.is_ascii_digit())?;
        let mut ahead = self.iter.clone();
        if ahead.next() == Some('.') && ahead.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.iter.next();
            val.push('.');
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                val.push(c);
            }
        }
        Some(Token::new(TokenKind::Number, val))
    }

    /// Scans a bare word; dots are kept so `schema.table` stays one token
    fn scan_word(&mut self) -> Option<Token> {
        let val = self.next_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$'))?;
        Some(classify(val))
    }

    /// Scans a symbol token
    fn scan_symbol(&mut self) -> Option<Token> {
        let c = *self.iter.peek()?;
        let token = match c {
            '(' | ')' => Token::new(TokenKind::Token, c.to_string()),
            ',' => Token::new(TokenKind::Separator, ","),
            '*' | '+' | '-' | '/' | '%' => Token::new(TokenKind::Math, c.to_string()),
            '=' => {
                self.iter.next();
                self.next_if(|c| c == '=');
                return Some(Token::new(TokenKind::Operator, "="));
            }
            '<' => {
                self.iter.next();
                let op = match self.next_if(|c| c == '=' || c == '>') {
                    Some('=') => "<=",
                    Some(_) => "<>",
                    None => "<",
                };
                return Some(Token::new(TokenKind::Operator, op));
            }
            '>' => {
                self.iter.next();
                let op = if self.next_if(|c| c == '=').is_some() { ">=" } else { ">" };
                return Some(Token::new(TokenKind::Operator, op));
            }
            '!' => {
                let mut ahead = self.iter.clone();
                ahead.next();
                if ahead.peek() != Some(&'=') {
                    return None;
                }
                self.iter.next();
                self.iter.next();
                return Some(Token::new(TokenKind::Operator, "<>"));
            }
            _ => return None,
        };
        self.iter.next();
        Some(token)
    }
}

/// Tokenizes a single statement, rejecting unbalanced parentheses
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let tokens = Lexer::new(text).collect::<Result<Vec<_>>>()?;
    let mut depth = 0i64;
    for token in tokens.iter().filter(|t| t.kind == TokenKind::Token) {
        depth += if token.value == "(" { 1 } else { -1 };
        if depth < 0 {
            return Err(Error::Parse("Unbalanced parentheses: unexpected ')'".to_string()));
        }
    }
    if depth != 0 {
        return Err(Error::Parse("Unbalanced parentheses: missing ')'".to_string()));
    }
    Ok(tokens)
}

/// Splits a batch on top-level `;`, ignoring semicolons inside quotes, backticks and
/// brackets. Empty statements are dropped.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0i64;

    for c in text.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                '\'' | '`' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' | '{' | '[' => {
                    depth += 1;
                    current.push(c);
                }
                ')' | '}' | ']' => {
                    depth -= 1;
                    current.push(c);
                }
                ';' if depth <= 0 => {
                    statements.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    statements.push(current);

    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Token, TokenKind, split_statements, tokenize};
    use crate::error::{Error, Result};

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lexer_select() -> Result<()> {
        let tokens = tokenize("select id, `name` from public.t where id >= 2 and x <> 'a''b' order by id desc")?;
        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Command, "SELECT"),
                Token::new(TokenKind::Literal, "id"),
                Token::new(TokenKind::Separator, ","),
                Token::new(TokenKind::Literal, "name"),
                Token::new(TokenKind::Command, "FROM"),
                Token::new(TokenKind::Literal, "public.t"),
                Token::new(TokenKind::Command, "WHERE"),
                Token::new(TokenKind::Literal, "id"),
                Token::new(TokenKind::Operator, ">="),
                Token::new(TokenKind::Number, "2"),
                Token::new(TokenKind::Conditional, "AND"),
                Token::new(TokenKind::Literal, "x"),
                Token::new(TokenKind::Operator, "<>"),
                Token::new(TokenKind::String, "a'b"),
                Token::new(TokenKind::Command, "ORDER"),
                Token::new(TokenKind::Command, "BY"),
                Token::new(TokenKind::Literal, "id"),
                Token::new(TokenKind::SortMode, "DESC"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_kinds() -> Result<()> {
        let tokens = tokenize("INSERT INTO t VALUES (MD5('x'), 4.55, true, -1, * , LIKE, !=)")?;
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Command,
                TokenKind::Command,
                TokenKind::Literal,
                TokenKind::Command,
                TokenKind::Token,
                TokenKind::Function,
                TokenKind::Token,
                TokenKind::String,
                TokenKind::Token,
                TokenKind::Separator,
                TokenKind::Number,
                TokenKind::Separator,
                TokenKind::Boolean,
                TokenKind::Separator,
                TokenKind::Math,
                TokenKind::Number,
                TokenKind::Separator,
                TokenKind::Math,
                TokenKind::Separator,
                TokenKind::Operator,
                TokenKind::Separator,
                TokenKind::Operator,
                TokenKind::Token,
            ]
        );
        assert_eq!(tokens[10].value, "4.55");
        assert_eq!(tokens[21].value, "<>");
        Ok(())
    }

    #[test]
    fn test_lexer_document_literal() -> Result<()> {
        let tokens = tokenize(r#"create user bob(password 'x', privileges {"*": 4, "a}": 1})"#)?;
        let doc = tokens.iter().find(|t| t.value.starts_with('{')).unwrap();
        assert_eq!(doc.kind, TokenKind::String);
        assert_eq!(doc.value, r#"{"*": 4, "a}": 1}"#);
        Ok(())
    }

    #[test]
    fn test_lexer_unbalanced() {
        assert!(matches!(tokenize("select * from t where (a = 1"), Err(Error::Parse(_))));
        assert!(matches!(tokenize("select * from t)"), Err(Error::Parse(_))));
        assert!(matches!(tokenize("select 'abc"), Err(Error::Parse(_))));
        assert!(matches!(tokenize("select `abc"), Err(Error::Parse(_))));
        assert!(matches!(tokenize("select # from t"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_number_without_fraction() -> Result<()> {
        let tokens = tokenize("limit 10, 2.50")?;
        assert_eq!(tokens[1], Token::new(TokenKind::Number, "10"));
        assert_eq!(tokens[3], Token::new(TokenKind::Number, "2.50"));
        assert!(matches!(tokenize("limit 1."), Err(Error::Parse(_))));
        Ok(())
    }

    #[test]
    fn test_split_statements() {
        let parts = split_statements("select 1; insert into t values ('a;b'); ;  create user u({\"x\":1}) ;");
        assert_eq!(
            parts,
            vec![
                "select 1".to_string(),
                "insert into t values ('a;b')".to_string(),
                "create user u({\"x\":1})".to_string(),
            ]
        );
    }

    proptest! {
        #[test]
        fn tokenize_never_panics(input in "\\PC{0,64}") {
            let _ = tokenize(&input);
        }

        #[test]
        fn numbers_round_trip(int in 0u32..1_000_000, frac in proptest::option::of(0u32..1000)) {
            let text = match frac {
                Some(f) => format!("{}.{}", int, f),
                None => int.to_string(),
            };
            let tokens = tokenize(&text).unwrap();
            prop_assert_eq!(tokens, vec![Token::new(TokenKind::Number, text)]);
        }
    }
}
