//! Statement builders for INSERT, UPDATE and DELETE over runtime table names.

use crate::clause::Where;
use crate::expr::{Expr, placeholder, quote_ident};
use asupersync::{Cx, Outcome};
use relmap_core::{Error, Executor, Result, Row, ShapeError, ShapeErrorKind, Value};

fn returning_sql(columns: &[String]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let cols: Vec<_> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(" RETURNING {}", cols.join(", "))
}

async fn run_fetch<E: Executor>(
    cx: &Cx,
    exec: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<Vec<Row>, Error> {
    tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
    exec.query(cx, sql, params).await
}

async fn run_execute<E: Executor>(
    cx: &Cx,
    exec: &E,
    sql: &str,
    params: &[Value],
) -> Outcome<u64, Error> {
    tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
    exec.execute(cx, sql, params).await
}

/// Multi-row INSERT builder.
///
/// All rows are written by one statement; with [`returning`](Self::returning)
/// the inserted rows come back in VALUES order.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    returning: Vec<String>,
}

impl InsertStatement {
    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Set the column list.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Append one row of values, in column order.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Append one row in place.
    pub fn push_row(&mut self, values: Vec<Value>) {
        self.rows.push(values);
    }

    /// Columns to return from each inserted row.
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build the INSERT SQL and parameters.
    ///
    /// Fails when there are no columns or rows, or a row's width differs
    /// from the column list.
    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        if self.columns.is_empty() || self.rows.is_empty() {
            return Err(Error::Shape(ShapeError::new(
                ShapeErrorKind::MissingField,
                format!("INSERT into '{}' needs columns and rows", self.table),
            )));
        }

        let width = self.columns.len();
        let mut params = Vec::with_capacity(width * self.rows.len());
        let mut tuples = Vec::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(Error::Shape(ShapeError::new(
                    ShapeErrorKind::LengthMismatch,
                    format!(
                        "row {} of INSERT into '{}' has {} values for {} columns",
                        i,
                        self.table,
                        row.len(),
                        width
                    ),
                )));
            }
            let placeholders: Vec<_> = row
                .iter()
                .map(|value| {
                    params.push(value.clone());
                    placeholder(params.len())
                })
                .collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let cols: Vec<_> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}{}",
            quote_ident(&self.table),
            cols.join(", "),
            tuples.join(", "),
            returning_sql(&self.returning)
        );
        Ok((sql, params))
    }

    /// Execute and return the RETURNING rows.
    pub async fn fetch<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<Vec<Row>, Error> {
        match self.build() {
            Ok((sql, params)) => run_fetch(cx, exec, &sql, &params).await,
            Err(e) => Outcome::Err(e),
        }
    }

    /// Execute and return the number of rows inserted.
    pub async fn execute<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<u64, Error> {
        match self.build() {
            Ok((sql, params)) => run_execute(cx, exec, &sql, &params).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

/// UPDATE builder.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    table: String,
    sets: Vec<(String, Expr)>,
    where_clause: Option<Where>,
    returning: Vec<String>,
}

impl UpdateStatement {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            where_clause: None,
            returning: Vec::new(),
        }
    }

    /// `SET column = value`, replacing an earlier assignment to the same column.
    pub fn set(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_expr(column, Expr::Literal(value.into()))
    }

    /// `SET column = <expr>`, replacing an earlier assignment to the same column.
    pub fn set_expr(mut self, column: impl Into<String>, expr: Expr) -> Self {
        self.push_set(column.into(), expr);
        self
    }

    /// Merge a batch of `(column, value)` assignments.
    pub fn set_all(mut self, assignments: impl IntoIterator<Item = (String, Value)>) -> Self {
        for (column, value) in assignments {
            self.push_set(column, Expr::Literal(value));
        }
        self
    }

    fn push_set(&mut self, column: String, expr: Expr) {
        match self.sets.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = expr,
            None => self.sets.push((column, expr)),
        }
    }

    /// Add a WHERE condition (AND-ed with existing ones).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Columns to return from each updated row.
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Columns assigned so far, in SET order.
    pub fn assigned_columns(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|(c, _)| c.as_str())
    }

    /// Build the UPDATE SQL and parameters.
    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        if self.sets.is_empty() {
            return Err(Error::Shape(ShapeError::new(
                ShapeErrorKind::MissingField,
                format!("UPDATE of '{}' has no SET assignments", self.table),
            )));
        }

        let mut params = Vec::new();
        let sets: Vec<_> = self
            .sets
            .iter()
            .map(|(column, expr)| format!("{} = {}", quote_ident(column), expr.build(&mut params, 0)))
            .collect();

        let mut sql = format!("UPDATE {} SET {}", quote_ident(&self.table), sets.join(", "));
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(&mut params, 0));
        }
        sql.push_str(&returning_sql(&self.returning));
        Ok((sql, params))
    }

    /// Execute and return the RETURNING rows.
    pub async fn fetch<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<Vec<Row>, Error> {
        match self.build() {
            Ok((sql, params)) => run_fetch(cx, exec, &sql, &params).await,
            Err(e) => Outcome::Err(e),
        }
    }

    /// Execute and return the number of rows updated.
    pub async fn execute<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<u64, Error> {
        match self.build() {
            Ok((sql, params)) => run_execute(cx, exec, &sql, &params).await,
            Err(e) => Outcome::Err(e),
        }
    }
}

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct DeleteStatement {
    table: String,
    where_clause: Option<Where>,
    returning: Vec<String>,
}

impl DeleteStatement {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
            returning: Vec::new(),
        }
    }

    /// Add a WHERE condition (AND-ed with existing ones).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(expr),
            None => Where::new(expr),
        });
        self
    }

    /// Columns to return from each deleted row.
    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Build the DELETE SQL and parameters.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote_ident(&self.table));
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.build(&mut params, 0));
        }
        sql.push_str(&returning_sql(&self.returning));
        (sql, params)
    }

    /// Execute and return the RETURNING rows.
    pub async fn fetch<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = self.build();
        run_fetch(cx, exec, &sql, &params).await
    }

    /// Execute and return the number of rows deleted.
    pub async fn execute<E: Executor>(&self, cx: &Cx, exec: &E) -> Outcome<u64, Error> {
        let (sql, params) = self.build();
        run_execute(cx, exec, &sql, &params).await
    }
}
