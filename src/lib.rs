//! JSDB - an embedded, file-persisted JSON record database
//!
//! This crate provides:
//! - A SQL-like command language (lexer, parser, AST, WHERE evaluator)
//! - Privilege-gated executors over databases, schemas, tables, sequences, users and
//!   registry entries
//! - Batches that snapshot every database they touch and roll back on the first failure
//! - File-backed storage with self-healing JSON listings

pub mod auth;
pub mod config;
pub mod error;
pub mod sql;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use sql::engine::{BatchResult, ConnectionContext, Engine, Session, StatementResult};
