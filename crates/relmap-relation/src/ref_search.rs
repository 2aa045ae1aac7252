//! Read-only keyword search over the referenced side of a relation.
//!
//! Typical use is a picker listing roles that can still be assigned to a
//! user: search `roles`, excluding rows already linked through `user_roles`.

use crate::many_to_many::ManyToManyConfig;
use crate::naming::check_ident;
use asupersync::{Cx, Outcome};
use relmap_core::{ConfigError, Error, Executor, FromRow, Result};
use relmap_query::{
    Expr, Join, PagingConfig, QueryDescriptor, SearchRequest, SearchResult, SearchSpec,
    SelectQuery, search_with,
};

/// Join table linking main rows to referenced rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    pub table: String,
    pub main_fk: String,
    pub ref_fk: String,
}

/// Per-call restriction of a ref search.
#[derive(Debug, Clone)]
pub enum RefFilter {
    /// Only rows not linked to this main id.
    ExcludeLinked(i64),
    /// Only rows linked to this main id.
    OnlyLinked(i64),
    /// An arbitrary predicate over the referenced table.
    Where(Expr),
}

impl RefFilter {
    pub fn exclude_linked(main_id: i64) -> Self {
        RefFilter::ExcludeLinked(main_id)
    }

    pub fn only_linked(main_id: i64) -> Self {
        RefFilter::OnlyLinked(main_id)
    }
}

/// Declarative search over a referenced table.
#[derive(Debug, Clone)]
pub struct RefSearchConfig {
    pub descriptor: QueryDescriptor,
    /// Selected columns; empty selects every column.
    pub columns: Vec<String>,
    pub like_columns: Vec<String>,
    pub joins: Vec<Join>,
    pub filters: Vec<Expr>,
    pub link: Option<LinkTable>,
    /// SQL function folding like columns before matching, e.g. `unaccent`.
    pub fold_with: Option<String>,
}

impl RefSearchConfig {
    /// Search `table`, sorted by `name` and tie-broken by `id` unless changed.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            descriptor: QueryDescriptor::new(table, "id", "name"),
            columns: Vec::new(),
            like_columns: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            link: None,
            fold_with: None,
        }
    }

    /// Search the referenced side of a many-to-many relation, linked
    /// through its join table.
    pub fn for_many_to_many<M, R, O>(relation: &ManyToManyConfig<M, R, O>) -> Self {
        let mut config = Self::new(relation.ref_table.as_str())
            .primary_key(relation.ref_key.as_str())
            .default_sort(relation.ref_name_column.as_str())
            .like_columns([relation.ref_name_column.as_str()]);
        config.link = Some(LinkTable {
            table: relation.join_table.clone(),
            main_fk: relation.main_fk.clone(),
            ref_fk: relation.ref_fk.clone(),
        });
        config
    }

    pub fn table(&self) -> &str {
        &self.descriptor.table
    }

    pub fn select_columns<C, S>(mut self, columns: C) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn like_columns<C, S>(mut self, columns: C) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.like_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// A predicate applied to every search.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    /// Fold like columns through `function` so accented rows match.
    pub fn fold_columns(mut self, function: impl Into<String>) -> Self {
        self.fold_with = Some(function.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.descriptor.primary_key = column.into();
        self
    }

    pub fn default_sort(mut self, field: impl Into<String>) -> Self {
        self.descriptor.default_sort = field.into();
        self
    }

    pub fn paging(mut self, paging: PagingConfig) -> Self {
        self.descriptor.paging = paging;
        self
    }

    pub fn linked_through(
        mut self,
        table: impl Into<String>,
        main_fk: impl Into<String>,
        ref_fk: impl Into<String>,
    ) -> Self {
        self.link = Some(LinkTable {
            table: table.into(),
            main_fk: main_fk.into(),
            ref_fk: ref_fk.into(),
        });
        self
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        check_ident(key, "table", self.table())?;
        check_ident(key, "primary key", &self.descriptor.primary_key)?;
        if self.like_columns.is_empty() {
            return Err(Error::Config(ConfigError::for_key(
                key,
                "at least one search column is required",
            )));
        }
        for column in self.like_columns.iter().chain(&self.columns) {
            check_ident(key, "column", column)?;
        }
        if let Some(function) = &self.fold_with {
            check_ident(key, "fold function", function)?;
        }
        if let Some(link) = &self.link {
            check_ident(key, "link table", &link.table)?;
            check_ident(key, "link main key", &link.main_fk)?;
            check_ident(key, "link ref key", &link.ref_fk)?;
        }
        Ok(())
    }

    fn link_exists(&self, main_id: i64, negated: bool) -> Result<Expr> {
        let Some(link) = &self.link else {
            return Err(Error::Config(ConfigError::new(format!(
                "ref search on '{}' has no link table",
                self.table()
            ))));
        };
        let sub = SelectQuery::from(link.table.as_str())
            .select_raw("1")
            .filter(
                Expr::qualified(link.table.as_str(), link.ref_fk.as_str()).eq(Expr::qualified(
                    self.table(),
                    self.descriptor.primary_key.as_str(),
                )),
            )
            .filter(Expr::qualified(link.table.as_str(), link.main_fk.as_str()).eq(main_id));
        Ok(if negated {
            Expr::not_exists(sub)
        } else {
            Expr::exists(sub)
        })
    }

    /// The base query with declared joins, filters and `extra` applied.
    #[allow(clippy::result_large_err)]
    pub fn base_query(&self, extra: &[RefFilter]) -> Result<SelectQuery> {
        let table = self.table();
        let mut query = SelectQuery::from(table);
        if !self.columns.is_empty() {
            let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
            query = query.columns(&columns);
        }
        for join in &self.joins {
            query = query.join(join.clone());
        }
        for expr in &self.filters {
            query = query.filter(expr.clone());
        }
        for filter in extra {
            let expr = match filter {
                RefFilter::ExcludeLinked(main_id) => self.link_exists(*main_id, true)?,
                RefFilter::OnlyLinked(main_id) => self.link_exists(*main_id, false)?,
                RefFilter::Where(expr) => expr.clone(),
            };
            query = query.filter(expr);
        }
        Ok(query)
    }

    fn spec(&self) -> SearchSpec {
        let spec = SearchSpec::new().columns(self.like_columns.iter().map(String::as_str));
        match &self.fold_with {
            Some(function) => spec.fold_columns(function.as_str()),
            None => spec,
        }
    }

    /// Search the referenced table, decoding rows as `D`.
    pub async fn search<D, E>(
        &self,
        cx: &Cx,
        exec: &E,
        request: &SearchRequest,
        filters: &[RefFilter],
    ) -> Outcome<SearchResult<D>, Error>
    where
        D: FromRow,
        E: Executor,
    {
        self.search_with(cx, exec, request, filters, std::convert::identity)
            .await
    }

    /// Search the referenced table, decoding rows as `R` and mapping to `T`.
    pub async fn search_with<R, T, E, F>(
        &self,
        cx: &Cx,
        exec: &E,
        request: &SearchRequest,
        filters: &[RefFilter],
        mapper: F,
    ) -> Outcome<SearchResult<T>, Error>
    where
        R: FromRow,
        E: Executor,
        F: Fn(R) -> T,
    {
        let query = match self.base_query(filters) {
            Ok(query) => query,
            Err(e) => return Outcome::Err(e),
        };
        search_with(cx, exec, &query, &self.spec(), request, &self.descriptor, mapper).await
    }
}
