use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use beacon_types::query::ListParams;

/// What a cached query holds: one page of a list, or one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryKind {
    List(ListParams),
    Detail(String),
}

/// `[namespace, params]`. Two keys are the same query iff every parameter
/// matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub namespace: String,
    pub kind: QueryKind,
}

impl QueryKey {
    pub fn list(namespace: impl Into<String>, params: ListParams) -> Self {
        Self {
            namespace: namespace.into(),
            kind: QueryKind::List(params),
        }
    }

    pub fn detail(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: QueryKind::Detail(id.into()),
        }
    }

    pub fn list_params(&self) -> Option<&ListParams> {
        match &self.kind {
            QueryKind::List(params) => Some(params),
            QueryKind::Detail(_) => None,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            QueryKind::List(p) => write!(
                f,
                "[{}, status={} page={} limit={} search={:?} filters={:?}]",
                self.namespace, p.status, p.page, p.limit, p.search, p.filters
            ),
            QueryKind::Detail(id) => write!(f, "[{}, id={}]", self.namespace, id),
        }
    }
}

/// Injected query-cache store.
pub trait QueryCache<V>: Send + Sync {
    fn get(&self, key: &QueryKey) -> Option<V>;

    fn set(&self, key: QueryKey, value: V);

    /// Drops an entry so the next read refetches. Returns whether it existed.
    fn invalidate(&self, key: &QueryKey) -> bool;

    /// Every cached key in `namespace`.
    fn keys(&self, namespace: &str) -> Vec<QueryKey>;

    fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.keys(namespace)
            .iter()
            .filter(|key| self.invalidate(key))
            .count()
    }
}

/// In-process cache backed by a map.
pub struct MemoryQueryCache<V> {
    entries: RwLock<HashMap<QueryKey, V>>,
}

impl<V> Default for MemoryQueryCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> MemoryQueryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send + Sync> QueryCache<V> for MemoryQueryCache<V> {
    fn get(&self, key: &QueryKey) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: QueryKey, value: V) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }

    fn invalidate(&self, key: &QueryKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    fn keys(&self, namespace: &str) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|k| k.namespace == namespace)
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}
