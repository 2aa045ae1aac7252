//! Dynamic ORDER BY construction from user-supplied sort fields.

use crate::clause::{OrderBy, OrderDirection};
use crate::expr::Expr;

/// Marker that turns a sort field into a JSON key lookup.
pub const JSON_FIELD_PREFIX: &str = "json:";

/// Column holding the JSON document when a `json:` field names no column.
pub const DEFAULT_JSON_COLUMN: &str = "data";

/// Resolve a sort field into an expression over `table`.
///
/// `json:<column>.<key>` and `json:<key>` become `"table"."column" ->> $n`
/// with the key bound; anything else is a quoted column reference.
pub fn sort_expr(table: &str, field: &str) -> Expr {
    match field.strip_prefix(JSON_FIELD_PREFIX) {
        Some(path) => {
            let (column, key) = match path.split_once('.') {
                Some((column, key)) if !column.is_empty() => (column, key),
                Some((_, key)) => (DEFAULT_JSON_COLUMN, key),
                None => (DEFAULT_JSON_COLUMN, path),
            };
            column_expr(table, column).json_text(key)
        }
        None => column_expr(table, field),
    }
}

fn column_expr(table: &str, column: &str) -> Expr {
    if table.is_empty() {
        Expr::col(column)
    } else {
        Expr::qualified(table, column)
    }
}

/// Build the ORDER BY terms for sorting `table` by `field`.
///
/// When `pk_field` is non-empty and differs from `field`, it is appended as
/// a tie-breaker in the same direction so pages are stable.
pub fn build_order(
    table: &str,
    field: &str,
    direction: OrderDirection,
    pk_field: &str,
) -> Vec<OrderBy> {
    let mut terms = vec![OrderBy::new(sort_expr(table, field), direction)];
    if !pk_field.is_empty() && pk_field != field {
        terms.push(OrderBy::new(column_expr(table, pk_field), direction));
    }
    terms
}
