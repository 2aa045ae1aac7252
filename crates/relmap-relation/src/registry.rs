//! Keyed storage for relation configurations.
//!
//! Configs are validated when registered and read concurrently afterwards.
//! One-to-many and many-to-many configs are generic over the caller's record
//! types, so they are stored type-erased and downcast on lookup; asking for a
//! key with the wrong type parameters is a shape error, not a panic.

use crate::many_to_many::ManyToManyConfig;
use crate::one_to_many::OneToManyConfig;
use crate::one_to_one::OneToOneConfig;
use crate::ref_search::RefSearchConfig;
use relmap_core::{ConfigError, Error, Result, ShapeErrorKind};
use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Erased = Arc<dyn Any + Send + Sync>;

/// Relation configurations keyed by name.
#[derive(Default)]
pub struct RelationRegistry {
    one_to_one: RwLock<HashMap<String, Arc<OneToOneConfig>>>,
    one_to_many: RwLock<HashMap<String, Erased>>,
    many_to_many: RwLock<HashMap<String, Erased>>,
    ref_search: RwLock<HashMap<String, Arc<RefSearchConfig>>>,
}

impl std::fmt::Debug for RelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationRegistry")
            .field("one_to_one", &self.keys_one_to_one())
            .field("one_to_many", &self.keys_one_to_many())
            .field("many_to_many", &self.keys_many_to_many())
            .field("ref_search", &self.keys_ref_search())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("relation registry lock poisoned; recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("relation registry lock poisoned; recovering");
        poisoned.into_inner()
    })
}

#[allow(clippy::result_large_err)]
fn insert<V>(
    lock: &RwLock<HashMap<String, V>>,
    kind: &'static str,
    key: &str,
    value: V,
) -> Result<()> {
    match write(lock).entry(key.to_string()) {
        Entry::Occupied(_) => Err(Error::Config(ConfigError::for_key(
            key,
            format!("{kind} relation is already registered"),
        ))),
        Entry::Vacant(slot) => {
            slot.insert(value);
            tracing::info!(key = %key, kind, "Registered relation");
            Ok(())
        }
    }
}

#[allow(clippy::result_large_err)]
fn lookup<V: Clone>(
    lock: &RwLock<HashMap<String, V>>,
    what: &'static str,
    key: &str,
) -> Result<V> {
    read(lock)
        .get(key)
        .cloned()
        .ok_or_else(|| Error::not_found(what, key))
}

#[allow(clippy::result_large_err)]
fn downcast<T: Any + Send + Sync>(erased: Erased, key: &str) -> Result<Arc<T>> {
    erased.downcast::<T>().map_err(|_| {
        Error::shape(
            ShapeErrorKind::TypeMismatch,
            format!(
                "relation '{key}' was registered with different types than {}",
                std::any::type_name::<T>()
            ),
        )
    })
}

fn sorted_keys<V>(lock: &RwLock<HashMap<String, V>>) -> Vec<String> {
    let mut keys: Vec<String> = read(lock).keys().cloned().collect();
    keys.sort();
    keys
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::result_large_err)]
    pub fn register_one_to_one(&self, key: &str, config: OneToOneConfig) -> Result<()> {
        config.validate(key)?;
        insert(&self.one_to_one, "one-to-one", key, Arc::new(config))
    }

    #[allow(clippy::result_large_err)]
    pub fn register_one_to_many<P, I>(&self, key: &str, config: OneToManyConfig<P, I>) -> Result<()>
    where
        P: 'static,
        I: 'static,
    {
        config.validate(key)?;
        insert(&self.one_to_many, "one-to-many", key, Arc::new(config) as Erased)
    }

    #[allow(clippy::result_large_err)]
    pub fn register_many_to_many<M, R, O>(
        &self,
        key: &str,
        config: ManyToManyConfig<M, R, O>,
    ) -> Result<()>
    where
        M: 'static,
        R: 'static,
        O: 'static,
    {
        config.validate(key)?;
        insert(&self.many_to_many, "many-to-many", key, Arc::new(config) as Erased)
    }

    #[allow(clippy::result_large_err)]
    pub fn register_ref_search(&self, key: &str, config: RefSearchConfig) -> Result<()> {
        config.validate(key)?;
        insert(&self.ref_search, "ref search", key, Arc::new(config))
    }

    #[allow(clippy::result_large_err)]
    pub fn one_to_one(&self, key: &str) -> Result<Arc<OneToOneConfig>> {
        lookup(&self.one_to_one, "one-to-one relation", key)
    }

    #[allow(clippy::result_large_err)]
    pub fn one_to_many<P, I>(&self, key: &str) -> Result<Arc<OneToManyConfig<P, I>>>
    where
        P: 'static,
        I: 'static,
    {
        downcast(lookup(&self.one_to_many, "one-to-many relation", key)?, key)
    }

    #[allow(clippy::result_large_err)]
    pub fn many_to_many<M, R, O>(&self, key: &str) -> Result<Arc<ManyToManyConfig<M, R, O>>>
    where
        M: 'static,
        R: 'static,
        O: 'static,
    {
        downcast(lookup(&self.many_to_many, "many-to-many relation", key)?, key)
    }

    #[allow(clippy::result_large_err)]
    pub fn ref_search(&self, key: &str) -> Result<Arc<RefSearchConfig>> {
        lookup(&self.ref_search, "ref search", key)
    }

    pub fn contains_one_to_one(&self, key: &str) -> bool {
        read(&self.one_to_one).contains_key(key)
    }

    pub fn contains_one_to_many(&self, key: &str) -> bool {
        read(&self.one_to_many).contains_key(key)
    }

    pub fn contains_many_to_many(&self, key: &str) -> bool {
        read(&self.many_to_many).contains_key(key)
    }

    pub fn contains_ref_search(&self, key: &str) -> bool {
        read(&self.ref_search).contains_key(key)
    }

    pub fn keys_one_to_one(&self) -> Vec<String> {
        sorted_keys(&self.one_to_one)
    }

    pub fn keys_one_to_many(&self) -> Vec<String> {
        sorted_keys(&self.one_to_many)
    }

    pub fn keys_many_to_many(&self) -> Vec<String> {
        sorted_keys(&self.many_to_many)
    }

    pub fn keys_ref_search(&self) -> Vec<String> {
        sorted_keys(&self.ref_search)
    }
}
