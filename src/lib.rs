//! Laana - multilingual corpus search
//!
//! Builds lexical, regex, vector and hybrid queries once and renders them for
//! a search engine, a relational database or the local SQLite corpus, then
//! ranks the results deterministically. A resumable backfill pipeline fills in
//! missing embedding vectors, batch by batch, with per-entity error reporting.

pub mod backfill;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod cursor;
pub mod embedding;
pub mod error;
pub mod query;
pub mod retrieval;
pub mod storage;
pub mod vector;

pub use error::{LaanaError, Result};
