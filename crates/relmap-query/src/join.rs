//! JOIN clause types.

use crate::expr::{Expr, quote_ident};
use relmap_core::Value;

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub alias: Option<String>,
    pub on: Expr,
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Inner,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Left,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// LEFT JOIN `table` where `table.column = source.source_column`.
    ///
    /// The usual shape for pulling a looked-up name next to a foreign key,
    /// e.g. `Join::left_on("departments", "id", "employees", "department_id")`.
    pub fn left_on(
        table: impl Into<String>,
        column: &str,
        source: &str,
        source_column: &str,
    ) -> Self {
        let table = table.into();
        let on = Expr::qualified(table.as_str(), column)
            .eq(Expr::qualified(source, source_column));
        Self::left(table, on)
    }

    /// Set an alias for the joined table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name other clauses use to qualify the joined table's columns.
    pub fn name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Generate SQL (with a leading space) for this join.
    pub fn build(&self, params: &mut Vec<Value>, offset: usize) -> String {
        let mut sql = format!(" {} {}", self.join_type.as_str(), quote_ident(&self.table));
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&quote_ident(alias));
        }
        sql.push_str(" ON ");
        sql.push_str(&self.on.build(params, offset));
        sql
    }
}
