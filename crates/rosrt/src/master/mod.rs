// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directory service (master) client surface.
//!
//! The master holds the graph's name -> endpoint mapping and the parameter
//! dictionary. The runtime only consumes it: registrations, lookups, and
//! parameter operations go through the [`Master`] trait. [`XmlRpcMaster`]
//! talks to a real master over XML-RPC; [`MemoryMaster`] is a process-local
//! implementation for tests and single-process graphs.

mod memory;
mod xmlrpc;

pub use memory::MemoryMaster;
pub use xmlrpc::XmlRpcMaster;

use std::sync::Weak;

use crate::error::Result;
use crate::msg::TypeDescriptor;
use crate::param::ParamValue;

/// Callbacks a node exposes to the master for out-of-band notifications.
pub trait GraphEvents: Send + Sync {
    /// The publisher set of a subscribed topic changed.
    fn publisher_update(&self, topic: &str, publisher_uris: &[String]);

    /// A subscribed parameter changed value.
    fn param_update(&self, key: &str, value: &ParamValue);
}

/// Client surface of the directory service.
///
/// All names passed here are fully resolved. Registration calls are made
/// once per (name, direction) per process; withdrawal is best-effort and
/// must not block teardown.
pub trait Master: Send + Sync {
    fn register_publisher(
        &self,
        caller_id: &str,
        topic: &str,
        ty: &TypeDescriptor,
        caller_uri: &str,
    ) -> Result<()>;

    fn unregister_publisher(&self, caller_id: &str, topic: &str, caller_uri: &str) -> Result<()>;

    /// Registers interest in a topic; returns the URIs of current
    /// publishers.
    fn register_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
        ty: &TypeDescriptor,
        caller_uri: &str,
    ) -> Result<Vec<String>>;

    fn unregister_subscriber(&self, caller_id: &str, topic: &str, caller_uri: &str) -> Result<()>;

    fn register_service(
        &self,
        caller_id: &str,
        service: &str,
        service_uri: &str,
        caller_uri: &str,
    ) -> Result<()>;

    fn unregister_service(&self, caller_id: &str, service: &str, service_uri: &str) -> Result<()>;

    /// Resolve a service name to the provider's connection URI.
    fn lookup_service(&self, caller_id: &str, service: &str) -> Result<String>;

    /// All currently advertised (topic, type name) pairs.
    fn get_published_topics(&self, caller_id: &str) -> Result<Vec<(String, String)>>;

    // ------------------------------------------------------------------
    // Parameter dictionary
    // ------------------------------------------------------------------

    fn set_param(&self, caller_id: &str, key: &str, value: &ParamValue) -> Result<()>;

    fn get_param(&self, caller_id: &str, key: &str) -> Result<Option<ParamValue>>;

    fn has_param(&self, caller_id: &str, key: &str) -> Result<bool>;

    fn delete_param(&self, caller_id: &str, key: &str) -> Result<bool>;

    /// Install a per-key update subscription; returns the current value.
    fn subscribe_param(
        &self,
        caller_id: &str,
        callback_uri: &str,
        key: &str,
    ) -> Result<Option<ParamValue>>;

    // ------------------------------------------------------------------
    // Liveness / notification plumbing
    // ------------------------------------------------------------------

    /// Probe whether the master is reachable.
    fn ping(&self) -> Result<()>;

    /// Attach a node's event sink for publisher/parameter updates.
    ///
    /// The in-process master delivers updates through this hook. Remote
    /// masters deliver them to the node's RPC endpoint instead, which is
    /// outside this crate; the default implementation ignores the hook.
    fn attach_events(&self, _caller_uri: &str, _events: Weak<dyn GraphEvents>) {}

    /// Overall retry budget for directory calls, in milliseconds; -1 means
    /// retry indefinitely. Only meaningful for remote masters.
    fn set_retry_timeout_ms(&self, _timeout_ms: i64) {}
}
