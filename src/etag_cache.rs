use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::types::ListQuery;

/// Last validator seen per listing query. Lives for the process only.
#[derive(Debug, Default)]
pub struct EtagCache {
    entries: Mutex<HashMap<ListQuery, String>>,
}

impl EtagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query: &ListQuery) -> Option<String> {
        self.lock().get(&Self::key(query)).cloned()
    }

    pub fn put(&self, query: &ListQuery, etag: String) {
        self.lock().insert(Self::key(query), etag);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A missing label filter and an empty one address the same listing.
    fn key(query: &ListQuery) -> ListQuery {
        ListQuery {
            labels: query.labels.clone().filter(|l| !l.is_empty()),
            ..query.clone()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ListQuery, String>> {
        // Entries are independent; a poisoned lock still holds a usable map.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
