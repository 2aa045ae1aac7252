//! Cache invalidation collaborator.
//!
//! Upsert engines only know cache keys by pattern (`<prefix>:*`); the
//! cache itself lives outside relmap and is reached through
//! [`CacheInvalidator`].

/// Receives invalidation requests after a relation write.
pub trait CacheInvalidator: Send + Sync {
    /// Invalidate every cache entry matching any of `patterns`.
    ///
    /// Patterns use a trailing `*` wildcard, e.g. `orders:*`.
    fn invalidate_keys(&self, patterns: &[String]);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&[String]) + Send + Sync,
{
    fn invalidate_keys(&self, patterns: &[String]) {
        self(patterns);
    }
}

/// An invalidator that drops every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate_keys(&self, _patterns: &[String]) {}
}

/// Pattern covering every key under `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

/// Check whether `key` is covered by `pattern`.
///
/// Only a single trailing `*` is treated as a wildcard; any other pattern
/// must match exactly. Handy for in-memory caches that receive
/// [`CacheInvalidator::invalidate_keys`] calls.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

/// Forward `patterns` to `invalidator` unless empty, logging the request.
pub fn invalidate(invalidator: &dyn CacheInvalidator, patterns: &[String]) {
    if patterns.is_empty() {
        return;
    }
    tracing::debug!(patterns = ?patterns, "Invalidating cache keys");
    invalidator.invalidate_keys(patterns);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_invalidators() {
        let seen = Mutex::new(Vec::new());
        let inv = |patterns: &[String]| seen.lock().unwrap().extend_from_slice(patterns);
        invalidate(&inv, &[prefix_pattern("orders")]);
        invalidate(&inv, &[]);
        assert_eq!(*seen.lock().unwrap(), vec!["orders:*".to_string()]);
    }

    #[test]
    fn trailing_wildcard_matching() {
        assert!(pattern_matches("orders:*", "orders:42"));
        assert!(pattern_matches("orders:*", "orders:"));
        assert!(!pattern_matches("orders:*", "order:42"));
        assert!(pattern_matches("orders:1", "orders:1"));
        assert!(!pattern_matches("orders:1", "orders:10"));
    }
}
