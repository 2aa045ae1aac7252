//! Dynamic SQL construction, paging and keyword search for relmap.
//!
//! `relmap-query` is the **query construction layer**. Tables and columns are
//! runtime strings, so one listing or search routine serves every entity.
//!
//! # Role In The Architecture
//!
//! - **Expression DSL**: `Expr`, `OrderBy` and `Join` render PostgreSQL with
//!   `$n` placeholders and quoted identifiers.
//! - **Statements**: `SelectQuery` plus the INSERT/UPDATE/DELETE builders.
//! - **Listing**: `build_order`, `list` and `search` implement stable,
//!   clamped paging with a `has_more` window for search.
//!
//! Everything executes through the `Executor` trait from `relmap-core`.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod join;
pub mod order;
pub mod paging;
pub mod search;
pub mod select;

pub use builder::{DeleteStatement, InsertStatement, UpdateStatement};
pub use clause::{Limit, NullsOrder, Offset, OrderBy, OrderDirection, Where};
pub use expr::{BinaryOp, Expr, escape_like, placeholder, quote_ident, quote_qualified};
pub use join::{Join, JoinType};
pub use order::{DEFAULT_JSON_COLUMN, JSON_FIELD_PREFIX, build_order, sort_expr};
pub use paging::{Page, PageRequest, PageResult, PagingConfig, QueryDescriptor, list, list_with};
pub use search::{
    Combinator, PredicateBuilder, RelatedMatch, SearchRequest, SearchResult, SearchSpec,
    normalize_keyword, related_exists, search, search_with,
};
pub use select::SelectQuery;

use asupersync::{Cx, Outcome};
use relmap_core::{Error, Executor, Row, Value};

/// Raw SQL query execution.
///
/// For queries the builders cannot express.
pub async fn raw_query<E: Executor>(
    cx: &Cx,
    exec: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<Vec<Row>, Error> {
    tracing::trace!(sql = %sql, params = params.len(), "Executing raw query");
    exec.query(cx, sql, params).await
}

/// Raw SQL statement execution.
pub async fn raw_execute<E: Executor>(
    cx: &Cx,
    exec: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<u64, Error> {
    tracing::trace!(sql = %sql, params = params.len(), "Executing raw statement");
    exec.execute(cx, sql, params).await
}
