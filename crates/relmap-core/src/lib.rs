//! Core types and traits for relmap.
//!
//! This crate provides the foundations the query and relation layers build on:
//!
//! - `Value` and `Row` for parameters and result sets
//! - `Executor` trait for the caller's transaction-scoped query handle
//! - `Error` with configuration, not-found, query and shape variants
//! - `map_into` for copying fields between record shapes by normalized name
//! - `CacheInvalidator` for the external cache collaborator
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod cache;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod record;
pub mod row;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod value;

pub use cache::{CacheInvalidator, NoopInvalidator, pattern_matches, prefix_pattern};
pub use error::{
    ConfigError, Error, NotFoundError, QueryError, QueryErrorKind, Result, ShapeError,
    ShapeErrorKind, TypeError,
};
pub use executor::{Executor, fetch_count, missing_row};
pub use mapper::{MapReport, map_into, map_new, normalize_field_name};
pub use row::{ColumnInfo, FromRow, FromValue, Row};
pub use value::Value;
