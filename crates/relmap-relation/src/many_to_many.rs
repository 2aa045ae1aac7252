//! Many-to-many relations through a join table, with replace semantics.
//!
//! An upsert makes the join table hold exactly the requested referenced ids
//! for one main row:
//!
//! 1. resolve the main id and the requested ids (first occurrence wins, the
//!    exclude sentinel is dropped)
//! 2. delete every join row of the main row, returning the old ids
//! 3. insert one join row per requested id
//! 4. rebuild the main row's cached name column in request order
//! 5. optionally re-aggregate join-row columns onto the affected ref rows
//! 6. hand ids and names to the result setter, then invalidate caches
//!
//! Every step runs on the caller's executor. A failure returns before the
//! result setter runs, so rolling back the caller's transaction leaves
//! nothing half-applied.

use crate::naming::{check_ident, default_fk, default_join_table};
use asupersync::{Cx, Outcome};
use relmap_core::cache::invalidate;
use relmap_core::record::field_value;
use relmap_core::{CacheInvalidator, ConfigError, Error, Executor, Result, Row, Value};
use relmap_query::{
    DeleteStatement, Expr, InsertStatement, UpdateStatement, quote_ident, quote_qualified,
    raw_execute, raw_query,
};
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads the main id from the request.
pub type MainIdFn<R> = Arc<dyn Fn(&R) -> Result<i64> + Send + Sync>;
/// Reads the requested referenced ids from the request.
pub type RefIdsFn<R> = Arc<dyn Fn(&R) -> Result<Vec<i64>> + Send + Sync>;
/// Writes the resolved links into the caller's output.
pub type ResultSetter<O> = Arc<dyn Fn(&mut O, &LinkSet) + Send + Sync>;

/// The links a many-to-many upsert left in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    /// Linked ids in request order.
    pub ids: Vec<i64>,
    /// Names of the linked rows in request order. Ids without a matching
    /// ref row have no entry.
    pub names: Vec<String>,
    /// Previously linked ids that are no longer linked.
    pub removed: Vec<i64>,
}

/// A column on the referenced table aggregated from join-row values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseColumn {
    /// Column written on the referenced table.
    pub ref_column: String,
    /// Join-table column aggregated into it.
    pub join_column: String,
    pub delimiter: String,
}

impl ReverseColumn {
    pub fn new(ref_column: impl Into<String>, join_column: impl Into<String>) -> Self {
        Self {
            ref_column: ref_column.into(),
            join_column: join_column.into(),
            delimiter: ", ".to_string(),
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }
}

/// Declarative many-to-many relation.
///
/// `M` is the main entity (source of copied join columns), `R` the request
/// carrying the ids and `O` the output the result setter fills.
pub struct ManyToManyConfig<M, R, O> {
    pub main_table: String,
    pub main_key: String,
    pub ref_table: String,
    pub ref_key: String,
    pub ref_name_column: String,
    pub join_table: String,
    pub main_fk: String,
    pub ref_fk: String,
    /// Cached names column on the main table.
    pub name_column: Option<String>,
    pub delimiter: String,
    pub created_at_column: Option<String>,
    /// Sentinel id dropped from requests.
    pub exclude_id: Option<i64>,
    /// Join columns filled from `copy_main_fields` of the main entity.
    pub copy_join_columns: Vec<String>,
    pub copy_main_fields: Vec<String>,
    pub reverse: Vec<ReverseColumn>,
    pub cache_patterns: Vec<String>,
    main_id: Option<MainIdFn<R>>,
    ref_ids: Option<RefIdsFn<R>>,
    set_result: Option<ResultSetter<O>>,
    _main: PhantomData<fn(&M)>,
}

impl<M, R, O> Clone for ManyToManyConfig<M, R, O> {
    fn clone(&self) -> Self {
        Self {
            main_table: self.main_table.clone(),
            main_key: self.main_key.clone(),
            ref_table: self.ref_table.clone(),
            ref_key: self.ref_key.clone(),
            ref_name_column: self.ref_name_column.clone(),
            join_table: self.join_table.clone(),
            main_fk: self.main_fk.clone(),
            ref_fk: self.ref_fk.clone(),
            name_column: self.name_column.clone(),
            delimiter: self.delimiter.clone(),
            created_at_column: self.created_at_column.clone(),
            exclude_id: self.exclude_id,
            copy_join_columns: self.copy_join_columns.clone(),
            copy_main_fields: self.copy_main_fields.clone(),
            reverse: self.reverse.clone(),
            cache_patterns: self.cache_patterns.clone(),
            main_id: self.main_id.clone(),
            ref_ids: self.ref_ids.clone(),
            set_result: self.set_result.clone(),
            _main: PhantomData,
        }
    }
}

impl<M, R, O> fmt::Debug for ManyToManyConfig<M, R, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManyToManyConfig")
            .field("main_table", &self.main_table)
            .field("ref_table", &self.ref_table)
            .field("join_table", &self.join_table)
            .field("main_fk", &self.main_fk)
            .field("ref_fk", &self.ref_fk)
            .field("name_column", &self.name_column)
            .field("exclude_id", &self.exclude_id)
            .field("reverse", &self.reverse)
            .field("cache_patterns", &self.cache_patterns)
            .finish_non_exhaustive()
    }
}

impl<M, R, O> ManyToManyConfig<M, R, O> {
    /// Relation between `main_table` and `ref_table` through the default
    /// join table (`users` + `roles` gives `user_roles(user_id, role_id)`).
    pub fn new(main_table: impl Into<String>, ref_table: impl Into<String>) -> Self {
        let main_table = main_table.into();
        let ref_table = ref_table.into();
        Self {
            join_table: default_join_table(&main_table, &ref_table),
            main_fk: default_fk(&main_table),
            ref_fk: default_fk(&ref_table),
            main_table,
            main_key: "id".to_string(),
            ref_table,
            ref_key: "id".to_string(),
            ref_name_column: "name".to_string(),
            name_column: None,
            delimiter: ", ".to_string(),
            created_at_column: Some("created_at".to_string()),
            exclude_id: None,
            copy_join_columns: Vec::new(),
            copy_main_fields: Vec::new(),
            reverse: Vec::new(),
            cache_patterns: Vec::new(),
            main_id: None,
            ref_ids: None,
            set_result: None,
            _main: PhantomData,
        }
    }

    pub fn join_table(
        mut self,
        table: impl Into<String>,
        main_fk: impl Into<String>,
        ref_fk: impl Into<String>,
    ) -> Self {
        self.join_table = table.into();
        self.main_fk = main_fk.into();
        self.ref_fk = ref_fk.into();
        self
    }

    pub fn keys(mut self, main_key: impl Into<String>, ref_key: impl Into<String>) -> Self {
        self.main_key = main_key.into();
        self.ref_key = ref_key.into();
        self
    }

    pub fn ref_name_column(mut self, column: impl Into<String>) -> Self {
        self.ref_name_column = column.into();
        self
    }

    /// Cache the linked names, joined by the delimiter, in `column`.
    pub fn name_column(mut self, column: impl Into<String>) -> Self {
        self.name_column = Some(column.into());
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Stamp join rows in `column`; `None` disables the stamp.
    pub fn created_at_column(mut self, column: Option<&str>) -> Self {
        self.created_at_column = column.map(str::to_string);
        self
    }

    pub fn exclude_id(mut self, id: i64) -> Self {
        self.exclude_id = Some(id);
        self
    }

    /// Copy `main_fields` of the main entity into `join_columns` of each
    /// join row. Both lists are paired by position.
    pub fn copy_columns<C, F, S, T>(mut self, join_columns: C, main_fields: F) -> Self
    where
        C: IntoIterator<Item = S>,
        F: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.copy_join_columns = join_columns.into_iter().map(Into::into).collect();
        self.copy_main_fields = main_fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn reverse(mut self, column: ReverseColumn) -> Self {
        self.reverse.push(column);
        self
    }

    /// Cache keys or `prefix:*` patterns invalidated after each upsert.
    pub fn invalidate<C, S>(mut self, patterns: C) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cache_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn main_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&R) -> Result<i64> + Send + Sync + 'static,
    {
        self.main_id = Some(Arc::new(f));
        self
    }

    pub fn ref_ids<F>(mut self, f: F) -> Self
    where
        F: Fn(&R) -> Result<Vec<i64>> + Send + Sync + 'static,
    {
        self.ref_ids = Some(Arc::new(f));
        self
    }

    pub fn set_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut O, &LinkSet) + Send + Sync + 'static,
    {
        self.set_result = Some(Arc::new(f));
        self
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        check_ident(key, "main table", &self.main_table)?;
        check_ident(key, "main key", &self.main_key)?;
        check_ident(key, "referenced table", &self.ref_table)?;
        check_ident(key, "referenced key", &self.ref_key)?;
        check_ident(key, "referenced name column", &self.ref_name_column)?;
        check_ident(key, "join table", &self.join_table)?;
        check_ident(key, "main foreign key", &self.main_fk)?;
        check_ident(key, "referenced foreign key", &self.ref_fk)?;
        for column in self
            .name_column
            .iter()
            .chain(&self.created_at_column)
            .chain(&self.copy_join_columns)
        {
            check_ident(key, "column", column)?;
        }
        for reverse in &self.reverse {
            check_ident(key, "reverse column", &reverse.ref_column)?;
            check_ident(key, "reverse join column", &reverse.join_column)?;
        }
        if self.main_id.is_none() || self.ref_ids.is_none() {
            return Err(Error::Config(ConfigError::for_key(
                key,
                "main id and referenced ids accessors are required",
            )));
        }
        if self.copy_join_columns.len() != self.copy_main_fields.len() {
            return Err(Error::Config(ConfigError::for_key(
                key,
                format!(
                    "{} copied join columns but {} main fields",
                    self.copy_join_columns.len(),
                    self.copy_main_fields.len()
                ),
            )));
        }
        Ok(())
    }

    /// De-duplicate `requested` keeping first occurrences and drop the
    /// exclude sentinel.
    pub fn resolve_ids(&self, requested: Vec<i64>) -> Vec<i64> {
        let mut ids = Vec::with_capacity(requested.len());
        for id in requested {
            if Some(id) != self.exclude_id && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn delete_statement(&self, main_id: i64) -> DeleteStatement {
        DeleteStatement::from_table(self.join_table.as_str())
            .filter(Expr::col(self.main_fk.as_str()).eq(main_id))
            .returning([self.ref_fk.as_str()])
    }

    fn insert_statement(&self, main_id: i64, ids: &[i64], copied: &[Value]) -> InsertStatement {
        let mut columns = vec![self.main_fk.clone(), self.ref_fk.clone()];
        columns.extend(self.created_at_column.iter().cloned());
        columns.extend(self.copy_join_columns.iter().cloned());

        let mut insert = InsertStatement::into_table(self.join_table.as_str()).columns(columns);
        let stamp = Value::now_tz();
        for id in ids {
            let mut row = vec![Value::BigInt(main_id), Value::BigInt(*id)];
            if self.created_at_column.is_some() {
                row.push(stamp.clone());
            }
            row.extend(copied.iter().cloned());
            insert.push_row(row);
        }
        insert
    }

    /// `FROM unnest($n::bigint[]) WITH ORDINALITY ... JOIN ref` in request order.
    fn ordered_refs_from(&self, array_param: usize) -> String {
        format!(
            "FROM unnest(${array_param}::bigint[]) WITH ORDINALITY AS ids(id, ord) JOIN {} AS r ON {} = ids.id",
            quote_ident(&self.ref_table),
            quote_qualified("r", &self.ref_key),
        )
    }

    /// UPDATE of the cached name column, or `None` when none is declared.
    fn name_update(&self, main_id: i64, ids: &[i64]) -> Option<Result<(String, Vec<Value>)>> {
        let column = self.name_column.as_deref()?;
        if ids.is_empty() {
            return Some(
                UpdateStatement::table(self.main_table.as_str())
                    .set(column, "")
                    .filter(Expr::col(self.main_key.as_str()).eq(main_id))
                    .build(),
            );
        }
        let sql = format!(
            "UPDATE {} SET {} = COALESCE((SELECT string_agg({}, $1 ORDER BY ids.ord) {}), '') WHERE {} = $3",
            quote_ident(&self.main_table),
            quote_ident(column),
            quote_qualified("r", &self.ref_name_column),
            self.ordered_refs_from(2),
            quote_ident(&self.main_key),
        );
        let params = vec![
            Value::Text(self.delimiter.clone()),
            Value::from(ids.to_vec()),
            Value::BigInt(main_id),
        ];
        Some(Ok((sql, params)))
    }

    fn names_query(&self, ids: &[i64]) -> (String, Vec<Value>) {
        let sql = format!(
            "SELECT {} AS name {} ORDER BY ids.ord",
            quote_qualified("r", &self.ref_name_column),
            self.ordered_refs_from(1),
        );
        (sql, vec![Value::from(ids.to_vec())])
    }

    /// Re-aggregate the reverse columns for `affected` ref ids.
    fn reverse_update(&self, affected: &[i64]) -> Option<(String, Vec<Value>)> {
        if self.reverse.is_empty() || affected.is_empty() {
            return None;
        }
        let mut params = Vec::new();
        let sets: Vec<String> = self
            .reverse
            .iter()
            .map(|column| {
                params.push(Value::Text(column.delimiter.clone()));
                format!(
                    "{} = COALESCE((SELECT string_agg({}, ${} ORDER BY {}) FROM {} AS j WHERE {} = {}), '')",
                    quote_ident(&column.ref_column),
                    quote_qualified("j", &column.join_column),
                    params.len(),
                    quote_qualified("j", &self.main_fk),
                    quote_ident(&self.join_table),
                    quote_qualified("j", &self.ref_fk),
                    quote_qualified("r", &self.ref_key),
                )
            })
            .collect();
        params.push(Value::from(affected.to_vec()));
        let sql = format!(
            "UPDATE {} AS r SET {} WHERE {} = ANY(${})",
            quote_ident(&self.ref_table),
            sets.join(", "),
            quote_qualified("r", &self.ref_key),
            params.len(),
        );
        Some((sql, params))
    }
}

#[allow(clippy::result_large_err)]
fn read_ids(rows: &[Row], column: &str) -> Result<Vec<i64>> {
    rows.iter().map(|row| row.get_named::<i64>(column)).collect()
}

impl<M, R, O> ManyToManyConfig<M, R, O>
where
    M: Serialize,
{
    /// Replace the links of the main row named by `request`.
    #[tracing::instrument(level = "debug", skip_all, fields(join_table = %self.join_table))]
    pub async fn upsert<E: Executor>(
        &self,
        cx: &Cx,
        exec: &E,
        main: &M,
        request: &R,
        output: &mut O,
        cache: &dyn CacheInvalidator,
    ) -> Outcome<LinkSet, Error> {
        let (Some(main_id_fn), Some(ref_ids_fn)) = (&self.main_id, &self.ref_ids) else {
            return Outcome::Err(Error::Config(ConfigError::new(format!(
                "many-to-many relation through '{}' has no accessors",
                self.join_table
            ))));
        };

        // Step 1: everything that can fail without touching the database.
        let main_id = match main_id_fn(request) {
            Ok(id) => id,
            Err(e) => return Outcome::Err(e),
        };
        let ids = match ref_ids_fn(request) {
            Ok(requested) => self.resolve_ids(requested),
            Err(e) => return Outcome::Err(e),
        };
        let copied: Vec<Value> = match self
            .copy_main_fields
            .iter()
            .map(|field| field_value(main, field))
            .collect::<Result<_>>()
        {
            Ok(values) => values,
            Err(e) => return Outcome::Err(e),
        };

        // Step 2: drop every current link.
        let old_ids = match self.delete_statement(main_id).fetch(cx, exec).await {
            Outcome::Ok(rows) => match read_ids(&rows, &self.ref_fk) {
                Ok(ids) => ids,
                Err(e) => return Outcome::Err(e),
            },
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        // Step 3: link the requested ids.
        if !ids.is_empty() {
            match self
                .insert_statement(main_id, &ids, &copied)
                .execute(cx, exec)
                .await
            {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        // Step 4: cached names on the main row, then names for the result.
        if let Some(update) = self.name_update(main_id, &ids) {
            let (sql, params) = match update {
                Ok(built) => built,
                Err(e) => return Outcome::Err(e),
            };
            match raw_execute(cx, exec, &sql, &params).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let mut names = Vec::new();
        if !ids.is_empty() {
            let (sql, params) = self.names_query(&ids);
            let rows = match raw_query(cx, exec, &sql, &params).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            // NULL names are skipped, as string_agg skips them in the cached column.
            for row in &rows {
                match row.get_named::<Option<String>>("name") {
                    Ok(Some(name)) => names.push(name),
                    Ok(None) => {}
                    Err(e) => return Outcome::Err(e),
                }
            }
        }

        // Step 4b: reverse aggregation over old and new ids.
        let mut affected = old_ids.clone();
        for id in &ids {
            if !affected.contains(id) {
                affected.push(*id);
            }
        }
        if let Some((sql, params)) = self.reverse_update(&affected) {
            match raw_execute(cx, exec, &sql, &params).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let links = LinkSet {
            removed: old_ids.into_iter().filter(|id| !ids.contains(id)).collect(),
            ids,
            names,
        };

        // Steps 5 and 6.
        if let Some(setter) = &self.set_result {
            setter(output, &links);
        }
        invalidate(cache, &self.cache_patterns);

        tracing::debug!(
            main_id,
            linked = links.ids.len(),
            removed = links.removed.len(),
            "Replaced many-to-many links"
        );
        Outcome::Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use relmap_core::testing::RecordingExecutor;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct User {
        id: i64,
        tenant_id: i64,
    }

    #[derive(Debug, Clone, Default)]
    struct AssignRoles {
        user_id: i64,
        role_ids: Vec<i64>,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct UserView {
        role_ids: Vec<i64>,
        role_names: Vec<String>,
    }

    fn config() -> ManyToManyConfig<User, AssignRoles, UserView> {
        ManyToManyConfig::<User, AssignRoles, UserView>::new("users", "roles")
            .name_column("role_names")
            .exclude_id(0)
            .main_id(|r| Ok(r.user_id))
            .ref_ids(|r| Ok(r.role_ids.clone()))
            .set_result(|out, links| {
                out.role_ids = links.ids.clone();
                out.role_names = links.names.clone();
            })
            .invalidate(["users:*"])
    }

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    #[test]
    fn defaults_follow_table_names() {
        let config = config();
        assert_eq!(config.join_table, "user_roles");
        assert_eq!(config.main_fk, "user_id");
        assert_eq!(config.ref_fk, "role_id");
        assert!(config.validate("user.roles").is_ok());
    }

    #[test]
    fn resolve_ids_dedups_and_drops_sentinel() {
        assert_eq!(config().resolve_ids(vec![4, 0, 2, 4, 9, 2]), vec![4, 2, 9]);
    }

    #[test]
    fn copy_length_mismatch_is_config_error() {
        let bad = config().copy_columns(["tenant_id", "extra"], ["tenant_id"]);
        assert!(bad.validate("user.roles").unwrap_err().is_config_error());
    }

    #[test]
    fn missing_accessors_are_config_errors() {
        let bare = ManyToManyConfig::<User, AssignRoles, UserView>::new("users", "roles");
        assert!(bare.validate("user.roles").unwrap_err().is_config_error());
    }

    #[test]
    fn name_update_orders_by_request() {
        let (sql, params) = config().name_update(7, &[4, 2]).unwrap().unwrap();
        assert_eq!(
            sql,
            "UPDATE \"users\" SET \"role_names\" = COALESCE((SELECT string_agg(\"r\".\"name\", $1 ORDER BY ids.ord) FROM unnest($2::bigint[]) WITH ORDINALITY AS ids(id, ord) JOIN \"roles\" AS r ON \"r\".\"id\" = ids.id), '') WHERE \"id\" = $3"
        );
        assert_eq!(params[1], Value::from(vec![4_i64, 2]));
    }

    #[test]
    fn reverse_update_covers_affected_ids() {
        let config = config().reverse(ReverseColumn::new("user_names", "user_name").delimiter("; "));
        let (sql, params) = config.reverse_update(&[1, 4]).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"roles\" AS r SET \"user_names\" = COALESCE((SELECT string_agg(\"j\".\"user_name\", $1 ORDER BY \"j\".\"user_id\") FROM \"user_roles\" AS j WHERE \"j\".\"role_id\" = \"r\".\"id\"), '') WHERE \"r\".\"id\" = ANY($2)"
        );
        assert_eq!(params[0], Value::Text("; ".into()));
        assert!(config.reverse_update(&[]).is_none());
    }

    #[test]
    fn replace_links_in_request_order() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.on_once(
            "DELETE FROM",
            vec![
                Row::from_pairs([("role_id", 1_i64)]),
                Row::from_pairs([("role_id", 2_i64)]),
                Row::from_pairs([("role_id", 3_i64)]),
            ],
        );
        exec.on_once(
            "SELECT \"r\".\"name\"",
            vec![
                Row::from_pairs([("name", "Editor")]),
                Row::from_pairs([("name", "Admin")]),
            ],
        );

        let request = AssignRoles {
            user_id: 7,
            role_ids: vec![2, 4],
        };
        let mut view = UserView::default();
        let links = rt.block_on(async {
            unwrap_outcome(
                config()
                    .upsert(&cx, &exec, &User::default(), &request, &mut view, &relmap_core::NoopInvalidator)
                    .await,
            )
        });

        assert_eq!(links.ids, vec![2, 4]);
        assert_eq!(links.removed, vec![1, 3]);
        assert_eq!(view.role_names, vec!["Editor".to_string(), "Admin".to_string()]);

        let executed = exec.executed();
        assert_eq!(executed.len(), 4);
        assert_eq!(
            executed[0].0,
            "DELETE FROM \"user_roles\" WHERE \"user_id\" = $1 RETURNING \"role_id\""
        );
        assert_eq!(
            executed[1].0,
            "INSERT INTO \"user_roles\" (\"user_id\", \"role_id\", \"created_at\") VALUES ($1, $2, $3), ($4, $5, $6)"
        );
        assert_eq!(executed[1].1[1], Value::BigInt(2));
        assert_eq!(executed[1].1[4], Value::BigInt(4));
        assert!(executed[2].0.starts_with("UPDATE \"users\" SET \"role_names\""));
        assert!(executed[3].0.starts_with("SELECT \"r\".\"name\" AS name"));
    }

    #[test]
    fn null_names_are_left_out_like_the_cached_column() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.on_once(
            "SELECT \"r\".\"name\"",
            vec![
                Row::from_pairs([("name", Value::from("Admin"))]),
                Row::from_pairs([("name", Value::Null)]),
                Row::from_pairs([("name", Value::from("Viewer"))]),
            ],
        );

        let request = AssignRoles {
            user_id: 7,
            role_ids: vec![1, 2, 3],
        };
        let mut view = UserView::default();
        let links = rt.block_on(async {
            unwrap_outcome(
                config()
                    .upsert(&cx, &exec, &User::default(), &request, &mut view, &relmap_core::NoopInvalidator)
                    .await,
            )
        });

        assert_eq!(links.ids, vec![1, 2, 3]);
        assert_eq!(view.role_names, vec!["Admin".to_string(), "Viewer".to_string()]);
    }

    #[test]
    fn failure_skips_result_setter() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.fail_on("INSERT INTO", "foreign key violation");

        let request = AssignRoles {
            user_id: 7,
            role_ids: vec![5],
        };
        let mut view = UserView::default();
        let outcome = rt.block_on(async {
            config()
                .upsert(&cx, &exec, &User::default(), &request, &mut view, &relmap_core::NoopInvalidator)
                .await
        });
        assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
        assert_eq!(view, UserView::default());
        assert_eq!(exec.call_count(), 2);
    }

    #[test]
    fn copied_columns_come_from_main_entity() {
        let config = config().copy_columns(["tenant_id"], ["tenant_id"]);
        let insert = config.insert_statement(7, &[3], &[Value::BigInt(42)]);
        let (sql, params) = insert.build().unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"user_roles\" (\"user_id\", \"role_id\", \"created_at\", \"tenant_id\") VALUES ($1, $2, $3, $4)"
        );
        assert_eq!(params[3], Value::BigInt(42));
        let main = User { id: 7, tenant_id: 42 };
        assert_eq!(field_value(&main, "tenant_id").unwrap(), Value::BigInt(42));
    }
}
