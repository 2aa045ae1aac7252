//! Keyword search with `has_more` paging.
//!
//! [`search`] narrows a caller-filtered base query by a normalized keyword:
//! one ILIKE predicate per declared column plus any extra predicates,
//! combined with OR (or AND). It fetches `limit + 1` rows so the caller
//! learns whether another page exists without a second round-trip.

use crate::expr::Expr;
use crate::paging::{PageRequest, QueryDescriptor, apply_page};
use crate::select::SelectQuery;
use asupersync::{Cx, Outcome};
use regex::Regex;
use relmap_core::{Error, Executor, FromRow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

fn whitespace() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern compiles"))
}

/// Normalize a search keyword.
///
/// Lower-cases, strips diacritics (including `đ`), collapses runs of
/// whitespace to one space and trims. Normalizing twice gives the same
/// result as normalizing once.
///
/// ```
/// use relmap_query::normalize_keyword;
///
/// assert_eq!(normalize_keyword("  Đà   Nẵng "), "da nang");
/// assert_eq!(normalize_keyword(" \t "), "");
/// ```
pub fn normalize_keyword(keyword: &str) -> String {
    let folded: String = keyword
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' | 'Đ' => 'd',
            other => other,
        })
        .collect::<String>()
        .to_lowercase();
    whitespace().replace_all(folded.trim(), " ").into_owned()
}

/// Builds an extra predicate from the normalized keyword.
pub type PredicateBuilder = Arc<dyn Fn(&str) -> Expr + Send + Sync>;

/// How keyword predicates are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combinator {
    #[default]
    Or,
    And,
}

/// Which columns and predicates a keyword is matched against.
///
/// The keyword is always folded by [`normalize_keyword`]. Columns are
/// compared as stored unless [`SearchSpec::fold_columns`] names a SQL
/// function (usually `unaccent`) that folds them the same way.
#[derive(Clone, Default)]
pub struct SearchSpec {
    /// Columns matched with ILIKE; `alias.column` qualifies a joined table.
    pub like_columns: Vec<String>,
    pub extra: Vec<PredicateBuilder>,
    pub combinator: Combinator,
    /// SQL function wrapped around each like column before matching.
    pub fold_with: Option<String>,
}

impl fmt::Debug for SearchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchSpec")
            .field("like_columns", &self.like_columns)
            .field("extra", &self.extra.len())
            .field("combinator", &self.combinator)
            .field("fold_with", &self.fold_with)
            .finish()
    }
}

impl SearchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the keyword against these columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.like_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add a predicate built from the normalized keyword.
    pub fn extra<F>(mut self, builder: F) -> Self
    where
        F: Fn(&str) -> Expr + Send + Sync + 'static,
    {
        self.extra.push(Arc::new(builder));
        self
    }

    /// Also match rows that have a related row matching the keyword.
    pub fn related(self, related: RelatedMatch) -> Self {
        self.extra(move |keyword| related.predicate(keyword))
    }

    pub fn combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    /// Strip diacritics from the columns with `function` before matching,
    /// e.g. `unaccent` from the PostgreSQL extension of that name.
    pub fn fold_columns(mut self, function: impl Into<String>) -> Self {
        self.fold_with = Some(function.into());
        self
    }

    /// The combined keyword predicate, or `None` when nothing is declared.
    pub fn predicate(&self, source: &str, keyword: &str) -> Option<Expr> {
        let predicates = self
            .like_columns
            .iter()
            .map(|column| {
                let column = column_ref(source, column);
                match &self.fold_with {
                    Some(function) => Expr::function(function.as_str(), vec![column]),
                    None => column,
                }
                .icontains(keyword)
            })
            .chain(self.extra.iter().map(|build| build(keyword)));
        match self.combinator {
            Combinator::Or => Expr::any_of(predicates),
            Combinator::And => Expr::all_of(predicates),
        }
    }
}

fn column_ref(source: &str, column: &str) -> Expr {
    match column.split_once('.') {
        Some((table, name)) => Expr::qualified(table, name),
        None if source.is_empty() => Expr::col(column),
        None => Expr::qualified(source, column),
    }
}

/// "Has a related row matching the keyword", as an EXISTS subquery.
///
/// Renders `EXISTS (SELECT 1 FROM "related" WHERE "related"."fk" =
/// "parent"."key" AND ("related"."a" ILIKE $n OR ...))`.
#[derive(Debug, Clone)]
pub struct RelatedMatch {
    pub table: String,
    pub foreign_key: String,
    pub parent: String,
    pub parent_key: String,
    pub columns: Vec<String>,
}

impl RelatedMatch {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        parent: impl Into<String>,
        parent_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            parent: parent.into(),
            parent_key: parent_key.into(),
            columns: Vec::new(),
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn predicate(&self, keyword: &str) -> Expr {
        related_exists(
            &self.table,
            &self.foreign_key,
            &self.parent,
            &self.parent_key,
            &self.columns,
            keyword,
        )
    }
}

/// EXISTS predicate over `related` rows linked by `fk = parent.parent_key`
/// whose `columns` contain `keyword`.
///
/// With no columns the predicate only requires a linked row to exist.
pub fn related_exists(
    related: &str,
    fk: &str,
    parent: &str,
    parent_key: &str,
    columns: &[String],
    keyword: &str,
) -> Expr {
    let mut sub = SelectQuery::from(related)
        .select_raw("1")
        .filter(Expr::qualified(related, fk).eq(Expr::qualified(parent, parent_key)));
    let matches = columns
        .iter()
        .map(|c| Expr::qualified(related, c.as_str()).icontains(keyword));
    if let Some(any) = Expr::any_of(matches) {
        sub = sub.filter(any);
    }
    Expr::exists(sub)
}

/// A page request plus the raw keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    #[serde(flatten)]
    pub page: PageRequest,
    pub keyword: String,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>, page: PageRequest) -> Self {
        Self {
            page,
            keyword: keyword.into(),
        }
    }
}

/// One page of search hits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    /// Row count of the base query, before the keyword is applied.
    pub total: u64,
}

impl<T> SearchResult<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            total: 0,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> SearchResult<U> {
        SearchResult {
            items: self.items.into_iter().map(f).collect(),
            has_more: self.has_more,
            total: self.total,
        }
    }
}

/// Search `query` for `request.keyword`, decoding rows as `D`.
pub async fn search<D, E>(
    cx: &Cx,
    exec: &E,
    query: &SelectQuery,
    spec: &SearchSpec,
    request: &SearchRequest,
    descriptor: &QueryDescriptor,
) -> Outcome<SearchResult<D>, Error>
where
    D: FromRow,
    E: Executor,
{
    search_with(cx, exec, query, spec, request, descriptor, std::convert::identity).await
}

/// Search `query`, decoding rows as `R` and mapping each to `T`.
#[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.table))]
pub async fn search_with<R, T, E, F>(
    cx: &Cx,
    exec: &E,
    query: &SelectQuery,
    spec: &SearchSpec,
    request: &SearchRequest,
    descriptor: &QueryDescriptor,
    mapper: F,
) -> Outcome<SearchResult<T>, Error>
where
    R: FromRow,
    E: Executor,
    F: Fn(R) -> T,
{
    let keyword = normalize_keyword(&request.keyword);
    if keyword.is_empty() {
        tracing::trace!("Empty keyword, skipping search");
        return Outcome::Ok(SearchResult::empty());
    }

    let total = match query.count(cx, exec).await {
        Outcome::Ok(n) => n,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let narrowed = match spec.predicate(query.source_name(), &keyword) {
        Some(predicate) => query.clone().filter(predicate),
        None => query.clone(),
    };

    let mut page = request.page.normalize(&descriptor.paging);
    let limit = page.limit;
    page.limit += 1;
    let paged = apply_page(&narrowed, &request.page, descriptor, page);

    let mut rows: Vec<R> = match paged.all(cx, exec).await {
        Outcome::Ok(rows) => rows,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let has_more = rows.len() as u64 > limit;
    rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

    tracing::debug!(
        keyword = %keyword,
        total,
        returned = rows.len(),
        has_more,
        "Search page"
    );

    Outcome::Ok(SearchResult {
        items: rows.into_iter().map(mapper).collect(),
        has_more,
        total,
    })
}
