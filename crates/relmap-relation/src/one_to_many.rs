//! One-to-many relations: child rows owned by a parent through a foreign key.
//!
//! An upsert writes every item of the parent's child list. Items without a
//! positive id are inserted together by a single multi-row
//! `INSERT ... RETURNING`; items with an id are updated one by one, scoped
//! to the parent. Returned rows are scanned back into their items, so new
//! items learn their ids and server-side defaults.

use crate::naming::check_ident;
use crate::scan::{ReturnProp, ScanPlan};
use asupersync::{Cx, Outcome};
use relmap_core::cache::invalidate;
use relmap_core::record::field_value;
use relmap_core::{
    CacheInvalidator, ConfigError, Error, Executor, Result, ShapeError, ShapeErrorKind, Value,
    missing_row, prefix_pattern,
};
use relmap_query::{Expr, InsertStatement, UpdateStatement, raw_query};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Reads the parent id from the payload.
pub type ParentIdFn<P> = Arc<dyn Fn(&P) -> Result<i64> + Send + Sync>;
/// Borrows the child list out of the payload.
pub type ItemsFn<P, I> = Arc<dyn Fn(&mut P) -> &mut Vec<I> + Send + Sync>;

/// Declarative one-to-many relation from payload `P` to child items `I`.
///
/// Column names double as the items' serialized field names.
pub struct OneToManyConfig<P, I> {
    pub table: String,
    pub fk_column: String,
    pub id_column: String,
    pub id_field: String,
    pub insert_columns: Vec<String>,
    /// Columns written by UPDATE; empty means the insert columns.
    pub update_columns: Vec<String>,
    pub returns: Vec<ReturnProp>,
    pub cache_prefix: Option<String>,
    parent_id: Option<ParentIdFn<P>>,
    items: Option<ItemsFn<P, I>>,
}

impl<P, I> Clone for OneToManyConfig<P, I> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            fk_column: self.fk_column.clone(),
            id_column: self.id_column.clone(),
            id_field: self.id_field.clone(),
            insert_columns: self.insert_columns.clone(),
            update_columns: self.update_columns.clone(),
            returns: self.returns.clone(),
            cache_prefix: self.cache_prefix.clone(),
            parent_id: self.parent_id.clone(),
            items: self.items.clone(),
        }
    }
}

impl<P, I> fmt::Debug for OneToManyConfig<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneToManyConfig")
            .field("table", &self.table)
            .field("fk_column", &self.fk_column)
            .field("id_column", &self.id_column)
            .field("insert_columns", &self.insert_columns)
            .field("update_columns", &self.update_columns)
            .field("returns", &self.returns)
            .field("cache_prefix", &self.cache_prefix)
            .finish_non_exhaustive()
    }
}

/// What an upsert wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
}

impl<P, I> OneToManyConfig<P, I> {
    pub fn new(table: impl Into<String>, fk_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fk_column: fk_column.into(),
            id_column: "id".to_string(),
            id_field: "id".to_string(),
            insert_columns: Vec::new(),
            update_columns: Vec::new(),
            returns: Vec::new(),
            cache_prefix: None,
            parent_id: None,
            items: None,
        }
    }

    pub fn parent_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&P) -> Result<i64> + Send + Sync + 'static,
    {
        self.parent_id = Some(Arc::new(f));
        self
    }

    pub fn items<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut P) -> &mut Vec<I> + Send + Sync + 'static,
    {
        self.items = Some(Arc::new(f));
        self
    }

    /// Primary-key column, and the item field it is stored in.
    pub fn id_column(mut self, column: impl Into<String>, field: impl Into<String>) -> Self {
        self.id_column = column.into();
        self.id_field = field.into();
        self
    }

    pub fn insert_columns<C, S>(mut self, columns: C) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn update_columns<C, S>(mut self, columns: C) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn returning(mut self, props: impl IntoIterator<Item = ReturnProp>) -> Self {
        self.returns = props.into_iter().collect();
        self
    }

    /// Invalidate `<prefix>:*` after each upsert.
    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = Some(prefix.into());
        self
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        check_ident(key, "table", &self.table)?;
        check_ident(key, "foreign key column", &self.fk_column)?;
        check_ident(key, "id column", &self.id_column)?;
        if self.parent_id.is_none() {
            return Err(Error::Config(ConfigError::for_key(
                key,
                "parent id accessor is required",
            )));
        }
        if self.items.is_none() {
            return Err(Error::Config(ConfigError::for_key(
                key,
                "items accessor is required",
            )));
        }
        if self.insert_columns.is_empty() {
            return Err(Error::Config(ConfigError::for_key(
                key,
                "at least one insert column is required",
            )));
        }
        for column in self.insert_columns.iter().chain(&self.update_columns) {
            check_ident(key, "column", column)?;
        }
        for prop in &self.returns {
            check_ident(key, "returned column", &prop.column)?;
        }
        Ok(())
    }

    fn written_on_update(&self) -> &[String] {
        if self.update_columns.is_empty() {
            &self.insert_columns
        } else {
            &self.update_columns
        }
    }

    /// The declared props, led by the id unless a prop already fills it.
    fn scan_props(&self) -> Vec<ReturnProp> {
        let mut props = Vec::with_capacity(self.returns.len() + 1);
        if !self.returns.iter().any(|p| p.field == self.id_field) {
            props.push(ReturnProp::int(self.id_column.as_str()).into_field(self.id_field.as_str()));
        }
        props.extend(self.returns.iter().cloned());
        props
    }
}

impl<P, I> OneToManyConfig<P, I>
where
    I: Serialize + DeserializeOwned,
{
    /// The item's id, or `None` for a new item (absent, null or not positive).
    #[allow(clippy::result_large_err)]
    fn existing_id(&self, item: &I) -> Result<Option<i64>> {
        match field_value(item, &self.id_field) {
            Ok(value) => Ok(value.as_i64().filter(|id| *id > 0)),
            Err(Error::Shape(ShapeError {
                kind: ShapeErrorKind::MissingField,
                ..
            })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::result_large_err)]
    fn values(&self, item: &I, columns: &[String]) -> Result<Vec<Value>> {
        columns.iter().map(|c| field_value(item, c)).collect()
    }

    #[allow(clippy::result_large_err)]
    fn insert_statement(&self, parent_id: i64, items: &[&I], plan: &ScanPlan) -> Result<InsertStatement> {
        let mut columns = vec![self.fk_column.clone()];
        columns.extend(
            self.insert_columns
                .iter()
                .filter(|c| **c != self.fk_column)
                .cloned(),
        );
        let mut insert = InsertStatement::into_table(self.table.as_str())
            .columns(columns.iter().map(String::as_str))
            .returning(plan.columns());
        for item in items {
            let mut row = vec![Value::BigInt(parent_id)];
            row.extend(self.values(item, &columns[1..])?);
            insert.push_row(row);
        }
        Ok(insert)
    }

    #[allow(clippy::result_large_err)]
    fn update_statement(
        &self,
        parent_id: i64,
        id: i64,
        item: &I,
        plan: &ScanPlan,
    ) -> Result<UpdateStatement> {
        let columns: Vec<String> = self
            .written_on_update()
            .iter()
            .filter(|c| **c != self.fk_column && **c != self.id_column)
            .cloned()
            .collect();
        let values = self.values(item, &columns)?;
        Ok(UpdateStatement::table(self.table.as_str())
            .set_all(columns.into_iter().zip(values))
            .filter(Expr::col(self.fk_column.as_str()).eq(parent_id))
            .filter(Expr::col(self.id_column.as_str()).eq(id))
            .returning(plan.columns()))
    }

    /// Insert or update every child item of `payload`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table))]
    pub async fn upsert<E: Executor>(
        &self,
        cx: &Cx,
        exec: &E,
        payload: &mut P,
        cache: &dyn CacheInvalidator,
    ) -> Outcome<UpsertReport, Error> {
        let (Some(parent_id_fn), Some(items_fn)) = (&self.parent_id, &self.items) else {
            return Outcome::Err(Error::Config(ConfigError::new(format!(
                "one-to-many relation on '{}' has no accessors",
                self.table
            ))));
        };
        let parent_id = match parent_id_fn(payload) {
            Ok(id) => id,
            Err(e) => return Outcome::Err(e),
        };
        let items = items_fn(payload);
        let mut report = UpsertReport::default();

        if let Some(first) = items.first() {
            let plan = match ScanPlan::compile(&self.scan_props(), first) {
                Ok(plan) => plan,
                Err(e) => return Outcome::Err(e),
            };

            let mut new_items = Vec::new();
            let mut existing = Vec::new();
            for (idx, item) in items.iter().enumerate() {
                match self.existing_id(item) {
                    Ok(Some(id)) => existing.push((idx, id)),
                    Ok(None) => new_items.push(idx),
                    Err(e) => return Outcome::Err(e),
                }
            }

            if !new_items.is_empty() {
                let refs: Vec<&I> = new_items.iter().map(|idx| &items[*idx]).collect();
                let insert = match self.insert_statement(parent_id, &refs, &plan) {
                    Ok(insert) => insert,
                    Err(e) => return Outcome::Err(e),
                };
                let rows = match insert.fetch(cx, exec).await {
                    Outcome::Ok(rows) => rows,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
                if rows.len() != new_items.len() {
                    return Outcome::Err(Error::shape(
                        ShapeErrorKind::LengthMismatch,
                        format!(
                            "INSERT into '{}' returned {} rows for {} items",
                            self.table,
                            rows.len(),
                            new_items.len()
                        ),
                    ));
                }
                for (idx, row) in new_items.iter().zip(&rows) {
                    if let Err(e) = plan.apply(row, &mut items[*idx]) {
                        return Outcome::Err(e);
                    }
                }
                report.inserted = new_items.len();
            }

            for (idx, id) in existing {
                let (sql, params) = match self
                    .update_statement(parent_id, id, &items[idx], &plan)
                    .and_then(|update| update.build())
                {
                    Ok(built) => built,
                    Err(e) => return Outcome::Err(e),
                };
                let row = match raw_query(cx, exec, &sql, &params).await {
                    Outcome::Ok(rows) => rows.into_iter().next(),
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
                let Some(row) = row else {
                    return Outcome::Err(missing_row(
                        &sql,
                        &format!("UPDATE of '{}' id {}", self.table, id),
                    ));
                };
                if let Err(e) = plan.apply(&row, &mut items[idx]) {
                    return Outcome::Err(e);
                }
                report.updated += 1;
            }
        }

        if let Some(prefix) = &self.cache_prefix {
            invalidate(cache, &[prefix_pattern(prefix)]);
        }

        tracing::debug!(
            parent_id,
            inserted = report.inserted,
            updated = report.updated,
            "Upserted one-to-many items"
        );
        Outcome::Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use relmap_core::Row;
    use relmap_core::testing::RecordingExecutor;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Line {
        id: Option<i64>,
        sku: String,
        qty: i64,
        created_at: Option<String>,
    }

    #[derive(Debug, Default)]
    struct Order {
        id: i64,
        lines: Vec<Line>,
    }

    fn config() -> OneToManyConfig<Order, Line> {
        OneToManyConfig::<Order, Line>::new("order_lines", "order_id")
            .parent_id(|o| Ok(o.id))
            .items(|o| &mut o.lines)
            .insert_columns(["sku", "qty"])
            .returning([ReturnProp::timestamp("created_at")])
            .cache_prefix("orders")
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn line(id: Option<i64>, sku: &str, qty: i64) -> Line {
        Line {
            id,
            sku: sku.to_string(),
            qty,
            created_at: None,
        }
    }

    #[test]
    fn new_items_share_one_insert() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.on_once(
            "INSERT INTO",
            vec![
                Row::from_pairs([("id", Value::BigInt(10)), ("created_at", Value::from("t1"))]),
                Row::from_pairs([("id", Value::BigInt(11)), ("created_at", Value::from("t2"))]),
            ],
        );
        let invalidated = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&invalidated);
        let cache = move |patterns: &[String]| sink.lock().unwrap().extend_from_slice(patterns);

        let mut order = Order {
            id: 3,
            lines: vec![line(None, "a", 1), line(Some(0), "b", 2)],
        };
        let report = rt.block_on(async {
            unwrap_outcome(config().upsert(&cx, &exec, &mut order, &cache).await)
        });

        assert_eq!(report, UpsertReport { inserted: 2, updated: 0 });
        assert_eq!(order.lines[0].id, Some(10));
        assert_eq!(order.lines[1].created_at.as_deref(), Some("t2"));
        let executed = exec.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(
            executed[0].0,
            "INSERT INTO \"order_lines\" (\"order_id\", \"sku\", \"qty\") VALUES ($1, $2, $3), ($4, $5, $6) RETURNING \"id\", \"created_at\""
        );
        assert_eq!(executed[0].1[0], Value::BigInt(3));
        assert_eq!(*invalidated.lock().unwrap(), vec!["orders:*".to_string()]);
    }

    #[test]
    fn existing_item_updates_in_place() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.on_once(
            "UPDATE",
            vec![Row::from_pairs([("id", Value::BigInt(7)), ("created_at", Value::from("t0"))])],
        );

        let mut order = Order {
            id: 3,
            lines: vec![line(Some(7), "a", 5)],
        };
        let report = rt.block_on(async {
            unwrap_outcome(config().upsert(&cx, &exec, &mut order, &relmap_core::NoopInvalidator).await)
        });

        assert_eq!(report, UpsertReport { inserted: 0, updated: 1 });
        let statements = exec.statements();
        assert_eq!(
            statements,
            vec![
                "UPDATE \"order_lines\" SET \"sku\" = $1, \"qty\" = $2 WHERE \"order_id\" = $3 AND \"id\" = $4 RETURNING \"id\", \"created_at\""
                    .to_string()
            ]
        );
    }

    #[test]
    fn update_without_returned_row_is_not_found() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        let mut order = Order {
            id: 3,
            lines: vec![line(Some(99), "gone", 1)],
        };
        let outcome = rt.block_on(async {
            config()
                .upsert(&cx, &exec, &mut order, &relmap_core::NoopInvalidator)
                .await
        });
        match outcome {
            Outcome::Err(Error::Query(q)) => {
                assert_eq!(q.kind, relmap_core::QueryErrorKind::NotFound);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_accessors_fail_validation() {
        let bare: OneToManyConfig<Order, Line> =
            OneToManyConfig::new("order_lines", "order_id").insert_columns(["sku"]);
        assert!(bare.validate("order.lines").unwrap_err().is_config_error());
        assert!(config().validate("order.lines").is_ok());
        let no_columns = config().insert_columns(Vec::<String>::new());
        assert!(no_columns.validate("order.lines").is_err());
    }
}
