//! The query-execution seam.
//!
//! Every engine in relmap talks to the database through an [`Executor`]
//! supplied by the caller. The executor is normally bound to an open
//! transaction: engines never begin, commit or roll back, so a failed
//! multi-statement operation is undone by the caller rolling back.
//!
//! All operations take a `Cx` so cancellation and budgets flow from the
//! caller's structured-concurrency scope.

use crate::error::{Error, QueryError, QueryErrorKind};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// A transaction-scoped handle capable of running SQL.
///
/// Statements use PostgreSQL `$n` placeholders.
///
/// # Example
///
/// ```rust,ignore
/// let rows = tx.query(&cx, "SELECT id FROM users WHERE name = $1", &["ann".into()]).await;
/// ```
pub trait Executor: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

/// Run a `SELECT COUNT(*) AS count ...` statement and read the count.
///
/// A statement that returns no row counts as zero.
pub async fn fetch_count<E: Executor>(
    cx: &Cx,
    exec: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<u64, Error> {
    tracing::trace!(sql = %sql, params = params.len(), "Executing count");
    match exec.query_one(cx, sql, params).await {
        Outcome::Ok(Some(row)) => match row.get_named::<i64>("count") {
            Ok(count) => Outcome::Ok(u64::try_from(count).unwrap_or(0)),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Ok(None) => Outcome::Ok(0),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Error for a statement that was expected to return a row but returned none.
pub fn missing_row(sql: &str, what: &str) -> Error {
    Error::Query(
        QueryError::new(QueryErrorKind::NotFound, format!("{what} returned no row")).with_sql(sql),
    )
}
