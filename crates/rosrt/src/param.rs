// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parameter values and the node-local parameter cache.
//!
//! Parameters live on the master. Reads normally round-trip to it; a cached
//! read (`use_cache = true`) installs a per-key subscription so subsequent
//! reads are served locally, with out-of-band updates keeping the entry
//! fresh.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// A parameter value stored on the master.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Double(v) => Some(*v),
            ParamValue::Int(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Double(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Node-local cache of parameter values keyed by resolved parameter name.
#[derive(Default)]
pub struct ParamCache {
    entries: Mutex<HashMap<String, ParamValue>>,
    subscribed: Mutex<HashSet<String>>,
}

impl ParamCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ParamValue> {
        self.entries.lock().get(key).cloned()
    }

    /// Store a value for a key that already has (or is gaining) a
    /// subscription.
    pub fn store(&self, key: &str, value: ParamValue) {
        self.entries.lock().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Whether this key has a master-side update subscription installed.
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.subscribed.lock().contains(key)
    }

    /// Record that a master-side subscription now exists for `key`.
    /// Returns false if one was already installed.
    pub fn mark_subscribed(&self, key: &str) -> bool {
        self.subscribed.lock().insert(key.to_string())
    }

    /// Apply an out-of-band update from the master. Entries without a
    /// subscription are ignored.
    pub fn update(&self, key: &str, value: ParamValue) {
        if self.is_subscribed(key) {
            self.store(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_and_accessors() {
        assert_eq!(ParamValue::from(3).as_i32(), Some(3));
        assert_eq!(ParamValue::from(3).as_f64(), Some(3.0));
        assert_eq!(ParamValue::from(true).as_bool(), Some(true));
        assert_eq!(ParamValue::from("x").as_str(), Some("x"));
        assert_eq!(ParamValue::from(1.5).as_i32(), None);
    }

    #[test]
    fn cache_updates_only_subscribed_keys() {
        let cache = ParamCache::new();
        cache.update("/unsubscribed", ParamValue::Int(1));
        assert_eq!(cache.get("/unsubscribed"), None);

        assert!(cache.mark_subscribed("/rate"));
        assert!(!cache.mark_subscribed("/rate"));
        cache.store("/rate", ParamValue::Int(10));
        cache.update("/rate", ParamValue::Int(20));
        assert_eq!(cache.get("/rate"), Some(ParamValue::Int(20)));
    }
}
