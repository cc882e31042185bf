// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The process-wide node and its lifecycle.
//!
//! [`crate::init`] captures process arguments once. The first
//! [`NodeHandle`] constructed afterwards starts the shared [`Node`]; every
//! further handle (and every registration handle derived from one) shares
//! it, and the release that drops the last strong reference tears it down:
//! registrations are withdrawn newest-first, the data listener is joined,
//! and the global callback queue is disabled.

mod handle;

pub use handle::{AdvertiseOptions, NodeHandle};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::master::{GraphEvents, Master, XmlRpcMaster};
use crate::names::{self, Remappings};
use crate::param::{ParamCache, ParamValue};
use crate::queue::CallbackQueue;
use crate::registry::Registry;
use crate::transport::{local_uri, tcp};

const DEFAULT_MASTER_URI: &str = "http://localhost:11311";

/// Options for [`crate::init_with_options`].
#[derive(Default, Clone)]
pub struct InitOptions {
    /// Make the node name unique by appending process id and a counter
    /// (used by tools that may run several instances).
    pub anonymous: bool,
    /// Replace the XML-RPC master client, e.g. with
    /// [`crate::master::MemoryMaster`] for single-process graphs and tests.
    pub master: Option<Arc<dyn Master>>,
}

impl InitOptions {
    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn master(mut self, master: Arc<dyn Master>) -> Self {
        self.master = Some(master);
        self
    }
}

#[derive(Clone)]
struct InitContext {
    node_name: String,
    namespace: String,
    master_uri: String,
    remappings: Arc<Remappings>,
    master_override: Option<Arc<dyn Master>>,
}

fn context_slot() -> &'static Mutex<Option<InitContext>> {
    static SLOT: OnceLock<Mutex<Option<InitContext>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

fn current_slot() -> &'static Mutex<Weak<Node>> {
    static SLOT: OnceLock<Mutex<Weak<Node>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(Weak::new()))
}

/// Capture process arguments and the node name. Must be called before the
/// first [`NodeHandle`] is constructed.
///
/// Recognized arguments: `__name:=NAME`, `__ns:=NAMESPACE`,
/// `__master:=URI`, and `from:=to` name remappings. Defaults come from
/// `ROSRT_NAMESPACE` and `ROSRT_MASTER_URI`.
pub fn init<I, S>(args: I, default_name: &str) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    init_with_options(args, default_name, InitOptions::default())
}

/// [`init`] with explicit [`InitOptions`].
pub fn init_with_options<I, S>(args: I, default_name: &str, options: InitOptions) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    if current_slot().lock().upgrade().is_some() {
        return Err(Error::InvalidState(
            "cannot re-initialize while a node is active".to_string(),
        ));
    }

    let mut base_name = default_name.to_string();
    let mut namespace =
        std::env::var("ROSRT_NAMESPACE").unwrap_or_else(|_| "/".to_string());
    let mut master_uri =
        std::env::var("ROSRT_MASTER_URI").unwrap_or_else(|_| DEFAULT_MASTER_URI.to_string());
    let mut raw_remappings: Vec<(String, String)> = Vec::new();

    for arg in args {
        let arg = arg.into();
        let Some((from, to)) = arg.split_once(":=") else {
            continue;
        };
        match from {
            "__name" => base_name = to.to_string(),
            "__ns" => namespace = to.to_string(),
            "__master" => master_uri = to.to_string(),
            _ => raw_remappings.push((from.to_string(), to.to_string())),
        }
    }

    names::validate(&base_name)?;
    if base_name.is_empty() || base_name.contains('/') {
        return Err(Error::NameInvalid(base_name));
    }
    if !namespace.starts_with('/') {
        namespace = format!("/{}", namespace);
    }
    names::validate(&namespace)?;
    let namespace = names::normalize(&namespace);

    if options.anonymous {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        base_name = format!(
            "{}_{}_{}",
            base_name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
    }
    let node_name = names::append(&namespace, &base_name);

    let mut remappings = Remappings::new();
    for (from, to) in raw_remappings {
        let key = names::resolve(&namespace, &node_name, &from, &[])?;
        let value = names::resolve(&namespace, &node_name, &to, &[])?;
        remappings.insert(key, value);
    }

    *context_slot().lock() = Some(InitContext {
        node_name,
        namespace,
        master_uri,
        remappings: Arc::new(remappings),
        master_override: options.master,
    });
    Ok(())
}

/// Whether an initialized, still-running node exists.
pub fn ok() -> bool {
    current_slot()
        .lock()
        .upgrade()
        .map(|node| node.ok())
        .unwrap_or(false)
}

/// Cooperative shutdown signal: flips the current node's OK flag so
/// spinners and blocking calls unwind. Registrations are withdrawn when
/// the last handle releases. Idempotent.
pub fn request_shutdown() {
    if let Some(node) = current_slot().lock().upgrade() {
        node.request_shutdown();
    }
}

pub(crate) fn current_node() -> Result<Arc<Node>> {
    current_slot()
        .lock()
        .upgrade()
        .ok_or(Error::NotInitialized)
}

pub(crate) fn create_or_attach() -> Result<Arc<Node>> {
    let mut current = current_slot().lock();
    if let Some(node) = current.upgrade() {
        return Ok(node);
    }
    let context = context_slot()
        .lock()
        .clone()
        .ok_or(Error::NotInitialized)?;
    let node = Node::start(context)?;
    *current = Arc::downgrade(&node);
    Ok(node)
}

/// The shared per-process node runtime.
pub struct Node {
    name: String,
    namespace: String,
    uri: String,
    master_uri: String,
    master: Arc<dyn Master>,
    registry: Arc<Registry>,
    global_queue: Arc<CallbackQueue>,
    remappings: Arc<Remappings>,
    params: ParamCache,
    listener: Mutex<Option<tcp::Listener>>,
    ok: AtomicBool,
}

impl Node {
    fn start(context: InitContext) -> Result<Arc<Self>> {
        let master: Arc<dyn Master> = match context.master_override {
            Some(master) => master,
            None => Arc::new(XmlRpcMaster::new(context.master_uri.clone())),
        };

        // The accept callback outlives this function; it reaches the node
        // through a slot filled in below.
        let slot: Arc<OnceLock<Weak<Node>>> = Arc::new(OnceLock::new());
        let accept_slot = Arc::clone(&slot);
        let accept: tcp::AcceptFn = Arc::new(move |handshake, stream| {
            if let Some(node) = accept_slot.get().and_then(Weak::upgrade) {
                node.registry.handle_topic_connection(handshake, stream);
            }
        });
        let listener = tcp::Listener::spawn("node", accept)?;
        let uri = local_uri(listener.port());
        let registry = Registry::new(context.node_name.clone(), uri.clone(), Arc::clone(&master));

        let node = Arc::new(Self {
            name: context.node_name,
            namespace: context.namespace,
            uri: uri.clone(),
            master_uri: context.master_uri,
            master: Arc::clone(&master),
            registry,
            global_queue: Arc::new(CallbackQueue::new()),
            remappings: context.remappings,
            params: ParamCache::new(),
            listener: Mutex::new(Some(listener)),
            ok: AtomicBool::new(true),
        });
        let _ = slot.set(Arc::downgrade(&node));
        let events: Weak<dyn GraphEvents> = Arc::downgrade(&node) as Weak<dyn GraphEvents>;
        master.attach_events(&uri, events);
        log::info!("node '{}' up at {}", node.name, node.uri);
        Ok(node)
    }

    pub fn ok(&self) -> bool {
        self.ok.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.ok.store(false, Ordering::Release);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Connection URI of this node's data listener.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn master_uri(&self) -> &str {
        &self.master_uri
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn global_queue(&self) -> &Arc<CallbackQueue> {
        &self.global_queue
    }

    pub(crate) fn master(&self) -> &Arc<dyn Master> {
        &self.master
    }

    pub(crate) fn remappings(&self) -> &Arc<Remappings> {
        &self.remappings
    }

    /// Resolve a name against the node's root namespace and the global
    /// remappings.
    pub(crate) fn resolve_root(&self, name: &str) -> Result<String> {
        names::resolve(&self.namespace, &self.name, name, &[&self.remappings])
    }

    pub(crate) fn lookup_service(&self, resolved: &str) -> Result<String> {
        self.master.lookup_service(&self.name, resolved)
    }

    // ------------------------------------------------------------------
    // Parameters (resolved keys)
    // ------------------------------------------------------------------

    pub(crate) fn set_param(&self, key: &str, value: &ParamValue) -> Result<()> {
        self.master.set_param(&self.name, key, value)?;
        self.params.update(key, value.clone());
        Ok(())
    }

    pub(crate) fn get_param(&self, key: &str, use_cache: bool) -> Result<Option<ParamValue>> {
        if use_cache {
            if self.params.is_subscribed(key) {
                if let Some(value) = self.params.get(key) {
                    return Ok(Some(value));
                }
            }
            let value = self.master.subscribe_param(&self.name, &self.uri, key)?;
            self.params.mark_subscribed(key);
            if let Some(value) = &value {
                self.params.store(key, value.clone());
            }
            return Ok(value);
        }

        let value = self.master.get_param(&self.name, key)?;
        // A non-cached read still refreshes an installed cache entry.
        if self.params.is_subscribed(key) {
            match &value {
                Some(value) => self.params.store(key, value.clone()),
                None => self.params.remove(key),
            }
        }
        Ok(value)
    }

    pub(crate) fn has_param(&self, key: &str) -> Result<bool> {
        self.master.has_param(&self.name, key)
    }

    pub(crate) fn delete_param(&self, key: &str) -> Result<bool> {
        self.params.remove(key);
        self.master.delete_param(&self.name, key)
    }

    // ------------------------------------------------------------------
    // Graph introspection
    // ------------------------------------------------------------------

    pub fn advertised_topics(&self) -> Vec<String> {
        self.registry.advertised_topics()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.registry.subscribed_topics()
    }

    pub fn published_topics(&self) -> Result<Vec<(String, String)>> {
        self.master.get_published_topics(&self.name)
    }

    pub fn check_master(&self) -> bool {
        self.master.ping().is_ok()
    }

    pub fn set_master_retry_timeout(&self, timeout_ms: i64) {
        self.master.set_retry_timeout_ms(timeout_ms);
    }
}

impl GraphEvents for Node {
    fn publisher_update(&self, topic: &str, publisher_uris: &[String]) {
        if !self.ok() {
            return;
        }
        self.registry.connect_publishers(topic, publisher_uris);
    }

    fn param_update(&self, key: &str, value: &ParamValue) {
        self.params.update(key, value.clone());
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.ok.store(false, Ordering::Release);
        self.registry.shutdown();
        if let Some(mut listener) = self.listener.lock().take() {
            listener.shutdown();
        }
        self.global_queue.disable();
        self.global_queue.clear();
        log::info!("node '{}' stopped", self.name);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("ok", &self.ok())
            .finish()
    }
}
