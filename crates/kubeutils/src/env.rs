//! Environment publication for fetched secrets
//!
//! Secrets fetched with `to_env` are written into an [`EnvironmentSink`]
//! keyed by the secret key. Library callers and tests use
//! [`MemoryEnvironment`]; only the process entry point binds
//! [`ProcessEnvironment`] to the real OS environment.
//!
//! Concurrent writes to distinct keys are independent. Concurrent writes
//! to the same key have no defined order: the last writer wins.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Destination for published secret values
pub trait EnvironmentSink: Send + Sync {
    /// Publish `value` under `key`
    fn publish(&self, key: &str, value: &str);
}

/// In-memory environment owned by the caller
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: Mutex<BTreeMap<String, String>>,
}

impl MemoryEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a published value
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of published keys
    pub fn len(&self) -> usize {
        self.vars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything published so far
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EnvironmentSink for MemoryEnvironment {
    fn publish(&self, key: &str, value: &str) {
        self.vars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }
}

/// The real process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;

impl EnvironmentSink for ProcessEnvironment {
    fn publish(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}
