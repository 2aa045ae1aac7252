//! relmap - generic paging, keyword search and relation management over a
//! caller-owned SQL transaction.
//!
//! relmap lets one set of routines serve every entity of an application:
//!
//! - Field mapping between record shapes by normalized name
//! - Stable, clamped paging with a primary-key tie-breaker
//! - Diacritic-insensitive keyword search with a `has_more` window
//! - Declarative one-to-one, one-to-many and many-to-many relations
//! - Cache invalidation hooks after relation writes
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! async fn list_users(cx: &Cx, tx: &impl Executor) -> Outcome<PageResult<Row>, Error> {
//!     let descriptor = QueryDescriptor::new("users", "id", "name");
//!     let query = SelectQuery::from("users").filter(Expr::col("deleted_at").is_null());
//!     list(cx, tx, &query, &PageRequest::new(20, 0), &descriptor).await
//! }
//!
//! async fn assign_roles(
//!     cx: &Cx,
//!     tx: &impl Executor,
//!     engine: &RelationEngine,
//!     user: &User,
//!     request: &AssignRoles,
//!     view: &mut UserView,
//! ) -> Outcome<LinkSet, Error> {
//!     engine
//!         .upsert_many_to_many(cx, tx, "user.roles", user, request, view)
//!         .await
//! }
//! ```
//!
//! # Features
//!
//! - **Transaction-agnostic**: every statement runs on the `Executor` you pass in
//! - **Structured concurrency**: built on asupersync for cancel-correct operations
//! - **Plain SQL**: statements are built as strings plus parameters, so they
//!   can be asserted against literal SQL without a database

pub use relmap_core::{
    CacheInvalidator, ColumnInfo, ConfigError, Cx, Error, Executor, FromRow, FromValue,
    MapReport, NoopInvalidator, NotFoundError, Outcome, QueryError, QueryErrorKind, Result, Row,
    ShapeError, ShapeErrorKind, TypeError, Value, fetch_count, map_into, map_new, missing_row,
    normalize_field_name, pattern_matches, prefix_pattern,
};
pub use relmap_query::{
    BinaryOp, Combinator, DeleteStatement, Expr, InsertStatement, Join, JoinType, Limit,
    NullsOrder, Offset, OrderBy, OrderDirection, Page, PageRequest, PageResult, PagingConfig,
    PredicateBuilder, QueryDescriptor, RelatedMatch, SearchRequest, SearchResult, SearchSpec,
    SelectQuery, UpdateStatement, Where, build_order, escape_like, list, list_with,
    normalize_keyword, quote_ident, quote_qualified, raw_execute, raw_query, related_exists,
    search, search_with, sort_expr,
};
pub use relmap_relation::{
    LinkSet, LinkTable, ManyToManyConfig, OneToManyConfig, OneToOneConfig, RefFilter,
    RefSearchConfig, RelationEngine, RelationRegistry, ReturnProp, ReverseColumn, ScanKind,
    ScanPlan, UpsertReport,
};

/// Sub-crates, for items not re-exported at the top level.
pub use relmap_query as query;
pub use relmap_relation as relation;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheInvalidator, Cx, Error, Executor, Expr, FromRow, LinkSet, ManyToManyConfig,
        OneToManyConfig, OneToOneConfig, OrderDirection, Outcome, PageRequest, PageResult,
        PagingConfig, QueryDescriptor, RefFilter, RefSearchConfig, RelationEngine,
        RelationRegistry, ReturnProp, Row, SearchRequest, SearchResult, SearchSpec, SelectQuery,
        UpsertReport, Value, list, list_with, map_into, map_new, search, search_with,
    };
}
