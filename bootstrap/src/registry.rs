//! Process-local payload registry
//!
//! The child command line references payloads by name; the hosting binary
//! registers each entry point here at startup. This is the static-language
//! stand-in for resolving an entry point dynamically at run time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type PayloadFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// One payload entry point: takes its arguments, returns when the payload
/// is done.
pub type PayloadFn = fn(Vec<String>) -> PayloadFuture;

#[derive(Default)]
pub struct PayloadRegistry {
    entries: HashMap<String, PayloadFn>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entry` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, entry: PayloadFn) -> &mut Self {
        self.entries.insert(name.into(), entry);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<PayloadFn> {
        self.entries.get(name).copied()
    }

    /// Registered payload names, sorted for stable diagnostics.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}
