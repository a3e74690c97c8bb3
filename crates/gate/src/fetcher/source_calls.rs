use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::Provider;

/// Provider calls supplied for one logical request, keyed by source id.
pub struct SourceCalls<T> {
    calls: HashMap<String, Arc<dyn Provider<T>>>,
}

impl<T> SourceCalls<T> {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<P>(mut self, source: impl Into<String>, provider: P) -> Self
    where
        P: Provider<T> + 'static,
    {
        self.insert(source, provider);
        self
    }

    pub fn insert<P>(&mut self, source: impl Into<String>, provider: P)
    where
        P: Provider<T> + 'static,
    {
        self.calls.insert(source.into(), Arc::new(provider));
    }

    pub fn insert_shared(&mut self, source: impl Into<String>, provider: Arc<dyn Provider<T>>) {
        self.calls.insert(source.into(), provider);
    }

    pub fn get(&self, source: &str) -> Option<&Arc<dyn Provider<T>>> {
        self.calls.get(source)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.calls.contains_key(source)
    }

    /// Source ids in lexicographic order.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.calls.keys().map(String::as_str).collect();
        sources.sort_unstable();
        sources
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl<T> Default for SourceCalls<T> {
    fn default() -> Self {
        Self::new()
    }
}
