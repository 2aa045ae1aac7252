//! SELECT query builder over a runtime table name.
//!
//! Unlike a model-typed builder, `SelectQuery` carries the table as data so
//! the same paging and search code can serve any entity described by a
//! [`QueryDescriptor`](crate::QueryDescriptor).

use crate::clause::{Limit, Offset, OrderBy, Where};
use crate::expr::{Expr, quote_ident};
use crate::join::Join;
use asupersync::{Cx, Outcome};
use relmap_core::{Error, Executor, FromRow, Value, fetch_count};

/// A SELECT query builder.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: String,
    alias: Option<String>,
    /// Columns to select (empty = all)
    columns: Vec<Expr>,
    joins: Vec<Join>,
    where_clause: Option<Where>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
    distinct: bool,
}

impl SelectQuery {
    /// Create a new SELECT query over `table`.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    /// Alias the FROM table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The name columns of the FROM table are qualified with (alias or table).
    pub fn source_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Select specific columns of the FROM table.
    pub fn columns(mut self, cols: &[&str]) -> Self {
        let source = self.source_name().to_string();
        self.columns
            .extend(cols.iter().map(|c| Expr::qualified(source.clone(), *c)));
        self
    }

    /// Select an arbitrary expression.
    pub fn select_expr(mut self, expr: Expr) -> Self {
        self.columns.push(expr);
        self
    }

    /// Select a raw SQL fragment.
    pub fn select_raw(self, sql: impl Into<String>) -> Self {
        self.select_expr(Expr::raw(sql))
    }

    /// Add a WHERE condition (AND-ed with existing ones).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Add a JOIN clause.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add an ORDER BY term.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Append several ORDER BY terms in order.
    pub fn order_by_all(mut self, orders: impl IntoIterator<Item = OrderBy>) -> Self {
        self.order_by.extend(orders);
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    /// Make this a DISTINCT query.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// The same query without ORDER BY, LIMIT or OFFSET.
    pub fn unpaged(&self) -> Self {
        let mut query = self.clone();
        query.order_by.clear();
        query.limit = None;
        query.offset = None;
        query
    }

    /// Build the SQL query and parameters.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build_into(&mut params, 0);
        (sql, params)
    }

    /// Build the SQL, appending parameters to a shared list.
    ///
    /// Used for subqueries so their placeholders continue the outer numbering.
    pub fn build_into(&self, params: &mut Vec<Value>, offset: usize) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push_str(&quote_ident(self.source_name()));
            sql.push_str(".*");
        } else {
            let cols: Vec<_> = self
                .columns
                .iter()
                .map(|c| c.build(params, offset))
                .collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(&self.build_from(params, offset));

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_strs: Vec<_> = self
                .order_by
                .iter()
                .map(|o| o.build(params, offset))
                .collect();
            sql.push_str(&order_strs.join(", "));
        }

        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        sql
    }

    /// FROM, JOINs and WHERE (with leading space).
    fn build_from(&self, params: &mut Vec<Value>, offset: usize) -> String {
        let mut sql = String::from(" FROM ");
        sql.push_str(&quote_ident(&self.table));
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&quote_ident(alias));
        }

        for join in &self.joins {
            sql.push_str(&join.build(params, offset));
        }

        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(params, offset));
        }
        sql
    }

    /// Build a `SELECT COUNT(*) AS count` over the same rows.
    ///
    /// Ordering and paging are dropped. A DISTINCT query is counted through
    /// a derived table so duplicates collapse first.
    pub fn build_count(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        if self.distinct {
            let inner = self.unpaged().build_into(&mut params, 0);
            return (
                format!("SELECT COUNT(*) AS count FROM ({inner}) AS counted"),
                params,
            );
        }
        let from = self.build_from(&mut params, 0);
        (format!("SELECT COUNT(*) AS count{from}"), params)
    }

    /// Execute the query and decode every row.
    #[tracing::instrument(level = "debug", skip(self, cx, exec), fields(table = %self.table))]
    pub async fn all<D: FromRow, E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<Vec<D>, Error> {
        let (sql, params) = self.build();
        tracing::trace!(sql = %sql, params = params.len(), "Executing SELECT");

        match exec.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => {
                tracing::debug!(rows = rows.len(), "SELECT returned");
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows {
                    match D::from_row(row) {
                        Ok(item) => out.push(item),
                        Err(e) => return Outcome::Err(e),
                    }
                }
                Outcome::Ok(out)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Count the rows this query would return, ignoring paging.
    #[tracing::instrument(level = "debug", skip(self, cx, exec), fields(table = %self.table))]
    pub async fn count<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<u64, Error> {
        let (sql, params) = self.build_count();
        fetch_count(cx, exec, &sql, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_all_quotes_table() {
        let (sql, params) = SelectQuery::from("users").build();
        assert_eq!(sql, "SELECT \"users\".* FROM \"users\"");
        assert!(params.is_empty());
    }

    #[test]
    fn full_select() {
        let query = SelectQuery::from("orders")
            .alias("o")
            .columns(&["id", "total"])
            .join(Join::inner(
                "users",
                Expr::qualified("users", "id").eq(Expr::qualified("o", "user_id")),
            ))
            .filter(Expr::qualified("o", "status").eq("open"))
            .order_by(Expr::qualified("o", "id").desc())
            .limit(10)
            .offset(20);
        let (sql, params) = query.build();
        assert_eq!(
            sql,
            "SELECT \"o\".\"id\", \"o\".\"total\" FROM \"orders\" AS \"o\" INNER JOIN \"users\" ON \"users\".\"id\" = \"o\".\"user_id\" WHERE \"o\".\"status\" = $1 ORDER BY \"o\".\"id\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(params, vec![Value::Text("open".into())]);
    }

    #[test]
    fn count_drops_order_and_paging() {
        let query = SelectQuery::from("users")
            .filter(Expr::col("active").eq(true))
            .order_by(Expr::col("name").asc())
            .limit(5);
        let (sql, params) = query.build_count();
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS count FROM \"users\" WHERE \"active\" = $1"
        );
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn distinct_count_uses_derived_table() {
        let query = SelectQuery::from("tags").columns(&["label"]).distinct();
        let (sql, _) = query.build_count();
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS count FROM (SELECT DISTINCT \"tags\".\"label\" FROM \"tags\") AS counted"
        );
    }
}
