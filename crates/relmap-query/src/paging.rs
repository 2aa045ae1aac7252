//! Paginated listing over any entity.
//!
//! A listing is described by three pieces of plain data: the base
//! [`SelectQuery`] (filters and joins the caller already applied), a
//! [`PageRequest`] from the user, and the entity's [`QueryDescriptor`].
//! [`list`] counts the unpaged rows, then fetches one ordered window.

use crate::clause::OrderDirection;
use crate::order::build_order;
use crate::select::SelectQuery;
use asupersync::{Cx, Outcome};
use relmap_core::{Error, Executor, FromRow};
use serde::{Deserialize, Serialize};

/// Page-size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    /// Used when the requested limit is zero or negative.
    pub default_limit: u64,
    /// Requested limits above this are clamped down.
    pub max_limit: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 200,
        }
    }
}

impl PagingConfig {
    pub fn default_limit(mut self, limit: u64) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn max_limit(mut self, limit: u64) -> Self {
        self.max_limit = limit.max(1);
        self
    }
}

/// Static description of a listable entity.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    pub table: String,
    /// Tie-breaker column; empty disables the tie-breaker.
    pub primary_key: String,
    /// Sort field used when the request names none.
    pub default_sort: String,
    pub paging: PagingConfig,
}

impl QueryDescriptor {
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        default_sort: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            default_sort: default_sort.into(),
            paging: PagingConfig::default(),
        }
    }

    pub fn with_paging(mut self, paging: PagingConfig) -> Self {
        self.paging = paging;
        self
    }
}

/// A page as the user asked for it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
    pub order_by: Option<String>,
    pub direction: OrderDirection,
}

/// A normalized page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl PageRequest {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            ..Self::default()
        }
    }

    /// Sort by `field` in `direction`.
    pub fn sorted_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(field.into());
        self.direction = direction;
        self
    }

    /// Clamp the limit into `[1, max_limit]` and the offset to `>= 0`.
    ///
    /// A non-positive limit becomes the configured default.
    pub fn normalize(&self, config: &PagingConfig) -> Page {
        let limit = match u64::try_from(self.limit) {
            Ok(0) | Err(_) => config.default_limit,
            Ok(n) => n,
        };
        Page {
            limit: limit.clamp(1, config.max_limit.max(1)),
            offset: u64::try_from(self.offset).unwrap_or(0),
        }
    }

    /// The requested sort field when non-blank, else the descriptor default.
    pub fn sort_field<'a>(&'a self, descriptor: &'a QueryDescriptor) -> &'a str {
        match self.order_by.as_deref().map(str::trim) {
            Some(field) if !field.is_empty() => field,
            _ => &descriptor.default_sort,
        }
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> PageResult<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

/// Apply the request's ordering and window to `query`.
pub(crate) fn apply_page(
    query: &SelectQuery,
    request: &PageRequest,
    descriptor: &QueryDescriptor,
    page: Page,
) -> SelectQuery {
    let field = request.sort_field(descriptor);
    let orders = build_order(
        query.source_name(),
        field,
        request.direction,
        &descriptor.primary_key,
    );
    query
        .unpaged()
        .order_by_all(orders)
        .limit(page.limit)
        .offset(page.offset)
}

/// List one page of `query`, decoding rows as `D`.
pub async fn list<D, E>(
    cx: &Cx,
    exec: &E,
    query: &SelectQuery,
    request: &PageRequest,
    descriptor: &QueryDescriptor,
) -> Outcome<PageResult<D>, Error>
where
    D: FromRow,
    E: Executor,
{
    list_with(cx, exec, query, request, descriptor, std::convert::identity).await
}

/// List one page of `query`, decoding rows as `R` and mapping each to `T`.
#[tracing::instrument(level = "debug", skip_all, fields(table = %descriptor.table))]
pub async fn list_with<R, T, E, F>(
    cx: &Cx,
    exec: &E,
    query: &SelectQuery,
    request: &PageRequest,
    descriptor: &QueryDescriptor,
    mapper: F,
) -> Outcome<PageResult<T>, Error>
where
    R: FromRow,
    E: Executor,
    F: Fn(R) -> T,
{
    let total = match query.count(cx, exec).await {
        Outcome::Ok(n) => n,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let page = request.normalize(&descriptor.paging);
    let paged = apply_page(query, request, descriptor, page);

    let rows: Vec<R> = match paged.all(cx, exec).await {
        Outcome::Ok(rows) => rows,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    tracing::debug!(
        total,
        limit = page.limit,
        offset = page.offset,
        returned = rows.len(),
        "Listed page"
    );

    Outcome::Ok(PageResult {
        items: rows.into_iter().map(mapper).collect(),
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use asupersync::runtime::RuntimeBuilder;
    use relmap_core::testing::RecordingExecutor;
    use relmap_core::{Row, Value};

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    #[test]
    fn limit_clamping() {
        let config = PagingConfig::default();
        assert_eq!(PageRequest::new(0, 0).normalize(&config).limit, 20);
        assert_eq!(PageRequest::new(-3, 0).normalize(&config).limit, 20);
        assert_eq!(PageRequest::new(1, 0).normalize(&config).limit, 1);
        assert_eq!(PageRequest::new(200, 0).normalize(&config).limit, 200);
        assert_eq!(PageRequest::new(5000, 0).normalize(&config).limit, 200);
        assert_eq!(PageRequest::new(10, -7).normalize(&config).offset, 0);
        assert_eq!(PageRequest::new(10, 40).normalize(&config).offset, 40);
    }

    #[test]
    fn custom_bounds() {
        let config = PagingConfig::default().default_limit(50).max_limit(100);
        assert_eq!(PageRequest::new(0, 0).normalize(&config).limit, 50);
        assert_eq!(PageRequest::new(101, 0).normalize(&config).limit, 100);
    }

    #[test]
    fn blank_sort_field_falls_back_to_default() {
        let descriptor = QueryDescriptor::new("users", "id", "created_at");
        let request = PageRequest::new(10, 0).sorted_by("  ", OrderDirection::Desc);
        assert_eq!(request.sort_field(&descriptor), "created_at");
        let request = PageRequest::new(10, 0).sorted_by("name", OrderDirection::Desc);
        assert_eq!(request.sort_field(&descriptor), "name");
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: PageRequest =
            serde_json::from_str(r#"{"limit": 5, "direction": "desc"}"#).unwrap();
        assert_eq!(request.limit, 5);
        assert_eq!(request.offset, 0);
        assert_eq!(request.direction, OrderDirection::Desc);
    }

    #[test]
    fn list_counts_then_fetches_ordered_window() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.on_count("COUNT(*)", 42);
        exec.on_once(
            "ORDER BY",
            vec![
                Row::from_pairs([("id", Value::BigInt(1)), ("name", Value::from("ann"))]),
                Row::from_pairs([("id", Value::BigInt(2)), ("name", Value::from("bob"))]),
            ],
        );

        let descriptor = QueryDescriptor::new("users", "id", "created_at");
        let query = SelectQuery::from("users").filter(Expr::col("active").eq(true));
        let request = PageRequest::new(500, -1).sorted_by("name", OrderDirection::Desc);

        rt.block_on(async {
            let page: PageResult<Row> =
                unwrap_outcome(list(&cx, &exec, &query, &request, &descriptor).await);
            assert_eq!(page.total, 42);
            assert_eq!(page.items.len(), 2);
        });

        let statements = exec.statements();
        assert_eq!(
            statements,
            vec![
                "SELECT COUNT(*) AS count FROM \"users\" WHERE \"active\" = $1".to_string(),
                "SELECT \"users\".* FROM \"users\" WHERE \"active\" = $1 ORDER BY \"users\".\"name\" DESC, \"users\".\"id\" DESC LIMIT 200 OFFSET 0".to_string(),
            ]
        );
    }

    #[test]
    fn count_failure_short_circuits() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.fail_on("COUNT(*)", "relation does not exist");

        let descriptor = QueryDescriptor::new("users", "id", "id");
        let query = SelectQuery::from("users");

        rt.block_on(async {
            let outcome: Outcome<PageResult<Row>, Error> =
                list(&cx, &exec, &query, &PageRequest::default(), &descriptor).await;
            assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
        });
        assert_eq!(exec.call_count(), 1);
    }

    #[test]
    fn list_with_maps_rows() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let exec = RecordingExecutor::new();
        exec.on_count("COUNT(*)", 1);
        exec.on_once(
            "ORDER BY",
            vec![Row::from_pairs([("id", Value::BigInt(7))])],
        );

        let descriptor = QueryDescriptor::new("users", "id", "id");
        let query = SelectQuery::from("users");

        rt.block_on(async {
            let page = unwrap_outcome(
                list_with(&cx, &exec, &query, &PageRequest::default(), &descriptor, |row: Row| {
                    row.get_named::<i64>("id").unwrap_or_default()
                })
                .await,
            );
            assert_eq!(page.items, vec![7]);
        });
    }
}
