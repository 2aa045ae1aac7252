//! One-to-one relations: a foreign key (and optional cached name) on the
//! main row, written as part of the main entity's own INSERT or UPDATE.

use crate::naming::check_ident;
use asupersync::{Cx, Outcome};
use relmap_core::{Error, Executor, Result, Value};
use relmap_query::{Expr, SelectQuery, UpdateStatement};

/// Declarative one-to-one relation.
#[derive(Debug, Clone)]
pub struct OneToOneConfig {
    /// Referenced table.
    pub ref_table: String,
    pub ref_key: String,
    /// Display-name column on the referenced table.
    pub ref_name_column: String,
    /// Foreign-key column on the main table.
    pub fk_column: String,
    /// Denormalized name column on the main table, if any.
    pub name_column: Option<String>,
}

impl OneToOneConfig {
    pub fn new(ref_table: impl Into<String>, fk_column: impl Into<String>) -> Self {
        Self {
            ref_table: ref_table.into(),
            ref_key: "id".to_string(),
            ref_name_column: "name".to_string(),
            fk_column: fk_column.into(),
            name_column: None,
        }
    }

    pub fn ref_key(mut self, column: impl Into<String>) -> Self {
        self.ref_key = column.into();
        self
    }

    pub fn ref_name_column(mut self, column: impl Into<String>) -> Self {
        self.ref_name_column = column.into();
        self
    }

    /// Keep the referenced row's name cached in `column` on the main row.
    pub fn name_column(mut self, column: impl Into<String>) -> Self {
        self.name_column = Some(column.into());
        self
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        check_ident(key, "referenced table", &self.ref_table)?;
        check_ident(key, "referenced key", &self.ref_key)?;
        check_ident(key, "referenced name column", &self.ref_name_column)?;
        check_ident(key, "foreign key column", &self.fk_column)?;
        if let Some(name) = &self.name_column {
            check_ident(key, "name column", name)?;
        }
        Ok(())
    }

    /// Column assignments to merge into the main entity's write.
    ///
    /// A missing `ref_id` clears the link; the name column, when declared,
    /// follows it (`''` without a name).
    pub fn assignments(&self, ref_id: Option<i64>, ref_name: Option<&str>) -> Vec<(String, Value)> {
        let mut out = vec![(
            self.fk_column.clone(),
            ref_id.map_or(Value::Null, Value::BigInt),
        )];
        if let Some(column) = &self.name_column {
            let name = match ref_id {
                Some(_) => ref_name.unwrap_or_default(),
                None => "",
            };
            out.push((column.clone(), Value::Text(name.to_string())));
        }
        out
    }

    /// Merge the assignments into an UPDATE of the main row.
    pub fn apply(
        &self,
        update: UpdateStatement,
        ref_id: Option<i64>,
        ref_name: Option<&str>,
    ) -> UpdateStatement {
        update.set_all(self.assignments(ref_id, ref_name))
    }

    /// Read the referenced row's display name.
    #[tracing::instrument(level = "debug", skip(self, cx, exec), fields(table = %self.ref_table))]
    pub async fn resolve_name<E: Executor>(
        &self,
        cx: &Cx,
        exec: &E,
        ref_id: i64,
    ) -> Outcome<Option<String>, Error> {
        let query = SelectQuery::from(self.ref_table.as_str())
            .select_expr(Expr::qualified(self.ref_table.as_str(), self.ref_name_column.as_str()))
            .filter(Expr::qualified(self.ref_table.as_str(), self.ref_key.as_str()).eq(ref_id));
        let (sql, params) = query.build();
        tracing::trace!(sql = %sql, "Resolving one-to-one name");

        match exec.query_one(cx, &sql, &params).await {
            Outcome::Ok(Some(row)) => Outcome::Ok(row.get(0).and_then(Value::as_str).map(str::to_string)),
            Outcome::Ok(None) => Outcome::Ok(None),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}
