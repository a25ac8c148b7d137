//! Command processing module
//!
//! This module provides:
//! - `parser`: command lexer and parser
//! - `expression`: WHERE clause compilation and evaluation
//! - `types`: column data types and value comparison
//! - `privilege`: per-database create/read/update/delete rights
//! - `executor`: statement execution
//! - `engine`: engine, sessions and batch transactions

pub mod engine;
pub mod executor;
pub mod expression;
pub mod parser;
pub mod privilege;
pub mod types;
