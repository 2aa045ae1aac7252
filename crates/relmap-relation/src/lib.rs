//! Declarative relation management for relmap.
//!
//! `relmap-relation` is the **relation layer**. Relations are described by
//! config values registered under string keys, then applied by a
//! [`RelationEngine`] against whatever executor the caller's transaction
//! provides.
//!
//! # Role In The Architecture
//!
//! - **One-to-one**: foreign key plus optional cached name on the main row.
//! - **One-to-many**: batch insert of new child rows, per-row update of
//!   existing ones, returned columns scanned back into the items.
//! - **Many-to-many**: replace the join rows, rebuild cached names, optionally
//!   re-aggregate join columns onto the referenced rows.
//! - **Ref search**: keyword search over the referenced side, optionally
//!   excluding rows already linked.
//!
//! The engine never opens or commits transactions; a failed step returns
//! before any caller-visible output is written.

pub mod many_to_many;
pub mod naming;
pub mod one_to_many;
pub mod one_to_one;
pub mod ref_search;
pub mod registry;
pub mod scan;

pub use many_to_many::{LinkSet, MainIdFn, ManyToManyConfig, RefIdsFn, ResultSetter, ReverseColumn};
pub use naming::{default_fk, default_join_table, plural_table, pluralize, singularize};
pub use one_to_many::{ItemsFn, OneToManyConfig, ParentIdFn, UpsertReport};
pub use one_to_one::OneToOneConfig;
pub use ref_search::{LinkTable, RefFilter, RefSearchConfig};
pub use registry::RelationRegistry;
pub use scan::{ReturnProp, ScanKind, ScanPlan};

use asupersync::{Cx, Outcome};
use relmap_core::{CacheInvalidator, Error, Executor, FromRow, NoopInvalidator, Value};
use relmap_query::{SearchRequest, SearchResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

fn with_context<T>(outcome: Outcome<T, Error>, operation: &str, key: &str) -> Outcome<T, Error> {
    match outcome {
        Outcome::Err(e) => Outcome::Err(e.context(operation, key)),
        other => other,
    }
}

/// Applies registered relations through a caller-supplied executor.
#[derive(Clone)]
pub struct RelationEngine {
    registry: Arc<RelationRegistry>,
    cache: Arc<dyn CacheInvalidator>,
}

impl std::fmt::Debug for RelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RelationEngine {
    pub fn new(registry: Arc<RelationRegistry>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { registry, cache }
    }

    /// An engine whose invalidations go nowhere.
    pub fn without_cache(registry: Arc<RelationRegistry>) -> Self {
        Self::new(registry, Arc::new(NoopInvalidator))
    }

    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// Column assignments for the one-to-one relation `key`.
    #[allow(clippy::result_large_err)]
    pub fn one_to_one_assignments(
        &self,
        key: &str,
        ref_id: Option<i64>,
        ref_name: Option<&str>,
    ) -> relmap_core::Result<Vec<(String, Value)>> {
        let config = self.registry.one_to_one(key)?;
        Ok(config.assignments(ref_id, ref_name))
    }

    /// Look up the display name of the row `ref_id` refers to.
    pub async fn resolve_one_to_one_name<E: Executor>(
        &self,
        cx: &Cx,
        exec: &E,
        key: &str,
        ref_id: i64,
    ) -> Outcome<Option<String>, Error> {
        let config = match self.registry.one_to_one(key) {
            Ok(config) => config,
            Err(e) => return Outcome::Err(e),
        };
        with_context(
            config.resolve_name(cx, exec, ref_id).await,
            "resolve_one_to_one_name",
            key,
        )
    }

    /// Write the child list of `payload` for the one-to-many relation `key`.
    pub async fn upsert_one_to_many<P, I, E>(
        &self,
        cx: &Cx,
        exec: &E,
        key: &str,
        payload: &mut P,
    ) -> Outcome<UpsertReport, Error>
    where
        P: 'static,
        I: Serialize + DeserializeOwned + 'static,
        E: Executor,
    {
        let config = match self.registry.one_to_many::<P, I>(key) {
            Ok(config) => config,
            Err(e) => return Outcome::Err(e),
        };
        with_context(
            config.upsert(cx, exec, payload, self.cache.as_ref()).await,
            "upsert_one_to_many",
            key,
        )
    }

    /// Replace the links of one main row for the many-to-many relation `key`.
    pub async fn upsert_many_to_many<M, R, O, E>(
        &self,
        cx: &Cx,
        exec: &E,
        key: &str,
        main: &M,
        request: &R,
        output: &mut O,
    ) -> Outcome<LinkSet, Error>
    where
        M: Serialize + 'static,
        R: 'static,
        O: 'static,
        E: Executor,
    {
        let config = match self.registry.many_to_many::<M, R, O>(key) {
            Ok(config) => config,
            Err(e) => return Outcome::Err(e),
        };
        with_context(
            config
                .upsert(cx, exec, main, request, output, self.cache.as_ref())
                .await,
            "upsert_many_to_many",
            key,
        )
    }

    /// Keyword search through the ref search `key`.
    pub async fn search_refs<D, E>(
        &self,
        cx: &Cx,
        exec: &E,
        key: &str,
        request: &SearchRequest,
        filters: &[RefFilter],
    ) -> Outcome<SearchResult<D>, Error>
    where
        D: FromRow,
        E: Executor,
    {
        let config = match self.registry.ref_search(key) {
            Ok(config) => config,
            Err(e) => return Outcome::Err(e),
        };
        with_context(
            config.search(cx, exec, request, filters).await,
            "search_refs",
            key,
        )
    }
}
