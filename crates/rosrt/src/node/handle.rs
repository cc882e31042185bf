// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # NodeHandle
//!
//! The [`NodeHandle`] is the entry point for writing nodes. Constructing
//! the first handle starts the shared node runtime; the last release tears
//! it down. Handles are cheap to clone and compose: a child handle's
//! namespace is the parent's namespace plus a suffix, and its remappings
//! layer over the parent's (child wins on collision).
//!
//! ## Example
//!
//! ```rust,no_run
//! use rosrt::{msg::Text, NodeHandle};
//!
//! fn main() -> rosrt::Result<()> {
//!     rosrt::init(std::env::args().skip(1), "talker")?;
//!     let nh = NodeHandle::new("")?;
//!
//!     let chatter = nh.advertise::<Text>("chatter", 10)?;
//!     let _echo = nh.subscribe::<Text, _>("chatter", 10, |msg| {
//!         println!("heard: {}", msg.data);
//!     })?;
//!
//!     chatter.publish(&Text::new("hello"))?;
//!     rosrt::spin_once();
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::msg::{AnyMessage, Message, TypeDescriptor};
use crate::names::{self, Remappings};
use crate::node::{self, Node};
use crate::param::ParamValue;
use crate::queue::CallbackQueue;
use crate::registry::{
    PublicationOptions, PublicationToken, StatusCallback, SubscriptionOptions, SubscriptionToken,
};
use crate::service::server::{erase_handler, ServicePublication, ServiceServer, ServiceServerCore};
use crate::service::ServiceClient;
use crate::topic::{Publisher, RawPublisher, Subscriber};
use crate::tracked::TrackedObject;

/// Optional wiring for [`NodeHandle::advertise_with`]: subscriber status
/// callbacks and a tracked object guarding them.
#[derive(Default)]
pub struct AdvertiseOptions {
    pub on_connect: Option<StatusCallback>,
    pub on_disconnect: Option<StatusCallback>,
    pub tracked: Option<TrackedObject>,
}

impl AdvertiseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called (on the owning callback queue) when a subscriber connects,
    /// with the peer's caller id.
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Called when a subscriber connection goes away.
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Suppress the status callbacks once `object` is dropped. The tracked
    /// object must not be the publisher handle itself.
    pub fn tracked<T: Send + Sync + 'static>(mut self, object: &Arc<T>) -> Self {
        self.tracked = Some(TrackedObject::new(object));
        self
    }
}

enum Issued {
    Publication(Weak<PublicationToken>),
    Subscription(Weak<SubscriptionToken>),
    Service(Weak<crate::registry::ServiceToken>),
}

/// Reference-counted facade over the shared node runtime.
pub struct NodeHandle {
    node: Arc<Node>,
    namespace: String,
    /// Remapping tables, deepest scope first; the node's global table last.
    remap_chain: Vec<Arc<Remappings>>,
    queue: Arc<CallbackQueue>,
    issued: Mutex<Vec<Issued>>,
}

impl NodeHandle {
    /// Construct a handle under `ns` (resolved against the node's
    /// namespace; empty means the node's namespace itself).
    ///
    /// Starts the node runtime if this is the first handle. Fails with
    /// [`Error::NotInitialized`] before [`crate::init`].
    pub fn new(ns: &str) -> Result<Self> {
        Self::with_remappings(ns, Remappings::new())
    }

    /// [`NodeHandle::new`] plus handle-local remappings, which take
    /// precedence over those inherited from `init`.
    pub fn with_remappings(ns: &str, remappings: Remappings) -> Result<Self> {
        let node = node::create_or_attach()?;
        let namespace = names::resolve(node.namespace(), node.name(), ns, &[])?;
        let chain = vec![Arc::clone(node.remappings())];
        Self::build(node, namespace, chain, remappings)
    }

    /// Derive a child handle: its namespace is this handle's namespace
    /// plus `ns`.
    pub fn child(&self, ns: &str) -> Result<Self> {
        self.child_with_remappings(ns, Remappings::new())
    }

    /// [`NodeHandle::child`] plus child-local remappings (deepest scope,
    /// consulted first).
    pub fn child_with_remappings(&self, ns: &str, remappings: Remappings) -> Result<Self> {
        let namespace = names::resolve(&self.namespace, self.node.name(), ns, &[])?;
        let mut handle = Self::build(
            Arc::clone(&self.node),
            namespace,
            self.remap_chain.clone(),
            remappings,
        )?;
        handle.queue = Arc::clone(&self.queue);
        Ok(handle)
    }

    fn build(
        node: Arc<Node>,
        namespace: String,
        mut chain: Vec<Arc<Remappings>>,
        local: Remappings,
    ) -> Result<Self> {
        if !local.is_empty() {
            let mut resolved = Remappings::new();
            for (from, to) in &local {
                let key = names::resolve(&namespace, node.name(), from, &[])?;
                let value = names::resolve(&namespace, node.name(), to, &[])?;
                resolved.insert(key, value);
            }
            chain.insert(0, Arc::new(resolved));
        }
        let queue = Arc::clone(node.global_queue());
        Ok(Self {
            node,
            namespace,
            remap_chain: chain,
            queue,
            issued: Mutex::new(Vec::new()),
        })
    }

    /// Namespace all relative names pass through.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The resolved node name.
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Resolve a user-supplied name the way every registration through
    /// this handle does.
    pub fn resolve_name(&self, name: &str) -> Result<String> {
        let tables: Vec<&Remappings> = self.remap_chain.iter().map(Arc::as_ref).collect();
        names::resolve(&self.namespace, self.node.name(), name, &tables)
    }

    /// Route callbacks for subsequent registrations through `queue`
    /// instead of the global one drained by [`crate::spin`].
    pub fn set_callback_queue(&mut self, queue: Arc<CallbackQueue>) {
        self.queue = queue;
    }

    /// The queue subsequent registrations will use.
    pub fn callback_queue(&self) -> &Arc<CallbackQueue> {
        &self.queue
    }

    /// Whether it is time to exit: false once shutdown has been requested
    /// or the node stopped.
    pub fn ok(&self) -> bool {
        self.node.ok()
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Advertise a topic. `queue_size` bounds each subscriber link's send
    /// buffer and must be >= 1.
    ///
    /// A second advertisement of the same resolved name shares the
    /// registration (the master sees one advertisement); a different
    /// message type fails with [`Error::TypeConflict`].
    pub fn advertise<M: Message>(&self, topic: &str, queue_size: usize) -> Result<Publisher<M>> {
        self.advertise_with::<M>(topic, queue_size, AdvertiseOptions::default())
    }

    /// [`NodeHandle::advertise`] with subscriber status callbacks.
    pub fn advertise_with<M: Message>(
        &self,
        topic: &str,
        queue_size: usize,
        options: AdvertiseOptions,
    ) -> Result<Publisher<M>> {
        let core = self.advertise_core(topic, TypeDescriptor::of::<M>(), queue_size, options)?;
        Ok(Publisher::new(core))
    }

    /// Advertise with a runtime type descriptor instead of a compile-time
    /// message type. Replay tooling uses this to re-publish recorded
    /// payloads under their recorded type identity.
    pub fn advertise_any(
        &self,
        topic: &str,
        ty: TypeDescriptor,
        queue_size: usize,
    ) -> Result<RawPublisher> {
        let core = self.advertise_core(topic, ty, queue_size, AdvertiseOptions::default())?;
        Ok(RawPublisher::new(core))
    }

    fn advertise_core(
        &self,
        topic: &str,
        ty: TypeDescriptor,
        queue_size: usize,
        options: AdvertiseOptions,
    ) -> Result<crate::topic::publisher::PublisherCore> {
        let name = self.resolve_name(topic)?;
        let (publication, token) = self.node.registry().ensure_publication(PublicationOptions {
            name,
            ty,
            queue_size,
            connect_cb: options.on_connect,
            disconnect_cb: options.on_disconnect,
            tracked: options.tracked,
            queue: Arc::clone(&self.queue),
        })?;
        let token = Arc::new(token);
        self.issued
            .lock()
            .push(Issued::Publication(Arc::downgrade(&token)));
        Ok(crate::topic::publisher::PublisherCore {
            node: Arc::clone(&self.node),
            publication,
            token,
        })
    }

    /// Subscribe to a topic. The callback runs on this handle's callback
    /// queue, driven by a spinner; `queue_size` bounds how many decoded
    /// messages may wait there (excess inbound messages are discarded).
    pub fn subscribe<M, F>(&self, topic: &str, queue_size: usize, callback: F) -> Result<Subscriber>
    where
        M: Message,
        F: Fn(Arc<M>) + Send + Sync + 'static,
    {
        self.subscribe_with::<M, F>(topic, queue_size, callback, None)
    }

    /// [`NodeHandle::subscribe`] with a tracked object: once it is
    /// dropped, pending and future messages are discarded without
    /// invoking the callback. The tracked object must not be the
    /// [`Subscriber`] handle itself.
    pub fn subscribe_with<M, F>(
        &self,
        topic: &str,
        queue_size: usize,
        callback: F,
        tracked: Option<TrackedObject>,
    ) -> Result<Subscriber>
    where
        M: Message,
        F: Fn(Arc<M>) + Send + Sync + 'static,
    {
        let deserialize = Arc::new(|bytes: &[u8]| {
            Ok(Arc::new(M::decode(bytes)?) as Arc<dyn std::any::Any + Send + Sync>)
        });
        let invoke = Arc::new(move |message: Arc<dyn std::any::Any + Send + Sync>| {
            if let Ok(message) = message.downcast::<M>() {
                callback(message);
            }
        });
        self.subscribe_core(topic, TypeDescriptor::of::<M>(), queue_size, deserialize, invoke, tracked)
    }

    /// Subscribe without compile-time type knowledge; the callback
    /// receives raw payload bytes with the topic's declared identity.
    pub fn subscribe_any<F>(
        &self,
        topic: &str,
        queue_size: usize,
        callback: F,
    ) -> Result<Subscriber>
    where
        F: Fn(Arc<AnyMessage>) + Send + Sync + 'static,
    {
        let ty = TypeDescriptor::any();
        let descriptor = ty.clone();
        let deserialize = Arc::new(move |bytes: &[u8]| {
            Ok(Arc::new(AnyMessage::new(descriptor.clone(), bytes.to_vec()))
                as Arc<dyn std::any::Any + Send + Sync>)
        });
        let invoke = Arc::new(move |message: Arc<dyn std::any::Any + Send + Sync>| {
            if let Ok(message) = message.downcast::<AnyMessage>() {
                callback(message);
            }
        });
        self.subscribe_core(topic, ty, queue_size, deserialize, invoke, None)
    }

    fn subscribe_core(
        &self,
        topic: &str,
        ty: TypeDescriptor,
        queue_size: usize,
        deserialize: crate::registry::ErasedDeserialize,
        invoke: crate::registry::ErasedInvoke,
        tracked: Option<TrackedObject>,
    ) -> Result<Subscriber> {
        let name = self.resolve_name(topic)?;
        let (subscription, publisher_uris, token) =
            self.node.registry().ensure_subscription(SubscriptionOptions {
                name: name.clone(),
                ty,
                queue_size,
                deserialize,
                invoke,
                tracked,
                queue: Arc::clone(&self.queue),
            })?;
        // Only the first subscription on a name reaches the master and
        // learns the publisher set; later registrations return an empty
        // list, which must not reach connect_publishers (it would read as
        // "no publishers left" and prune the topic's shared links).
        if !publisher_uris.is_empty() {
            self.node.registry().connect_publishers(&name, &publisher_uris);
        }
        let token = Arc::new(token);
        self.issued
            .lock()
            .push(Issued::Subscription(Arc::downgrade(&token)));
        Ok(Subscriber::new(crate::topic::subscriber::SubscriberCore {
            node: Arc::clone(&self.node),
            subscription,
            token,
        }))
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// Advertise a service. At most one provider per resolved name in the
    /// graph; the handler runs on this handle's callback queue.
    pub fn advertise_service<Req, Res, F>(&self, service: &str, handler: F) -> Result<ServiceServer>
    where
        Req: Message,
        Res: Message,
        F: Fn(Req) -> Result<Res> + Send + Sync + 'static,
    {
        self.advertise_service_with::<Req, Res, F>(service, handler, None)
    }

    /// [`NodeHandle::advertise_service`] with a tracked object guarding
    /// the handler.
    pub fn advertise_service_with<Req, Res, F>(
        &self,
        service: &str,
        handler: F,
        tracked: Option<TrackedObject>,
    ) -> Result<ServiceServer>
    where
        Req: Message,
        Res: Message,
        F: Fn(Req) -> Result<Res> + Send + Sync + 'static,
    {
        let name = self.resolve_name(service)?;
        let publication = ServicePublication::spawn(
            name,
            TypeDescriptor::of::<Req>(),
            TypeDescriptor::of::<Res>(),
            erase_handler(handler),
            tracked,
            Arc::clone(&self.queue),
            self.node.name().to_string(),
        )?;
        let token = self
            .node
            .registry()
            .ensure_service(Arc::clone(&publication))
            .map_err(|e| {
                publication.close();
                e
            })?;
        let token = Arc::new(token);
        self.issued
            .lock()
            .push(Issued::Service(Arc::downgrade(&token)));
        Ok(ServiceServer::new(ServiceServerCore {
            node: Arc::clone(&self.node),
            service: publication,
            token,
        }))
    }

    /// Create a client for a service. With `persistent` the connection to
    /// the provider stays open across calls.
    pub fn service_client<Req, Res>(
        &self,
        service: &str,
        persistent: bool,
    ) -> Result<ServiceClient<Req, Res>>
    where
        Req: Message,
        Res: Message,
    {
        let name = self.resolve_name(service)?;
        Ok(ServiceClient::new(
            Arc::clone(&self.node),
            name,
            persistent,
        ))
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    pub fn set_param(&self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        let key = self.resolve_name(key)?;
        self.node.set_param(&key, &value.into())
    }

    /// Read a parameter from the master.
    pub fn get_param(&self, key: &str) -> Result<Option<ParamValue>> {
        let key = self.resolve_name(key)?;
        self.node.get_param(&key, false)
    }

    /// Read through the node-local cache, installing a master-side update
    /// subscription on first use so later reads are local.
    pub fn get_param_cached(&self, key: &str) -> Result<Option<ParamValue>> {
        let key = self.resolve_name(key)?;
        self.node.get_param(&key, true)
    }

    pub fn has_param(&self, key: &str) -> Result<bool> {
        let key = self.resolve_name(key)?;
        self.node.has_param(&key)
    }

    pub fn delete_param(&self, key: &str) -> Result<bool> {
        let key = self.resolve_name(key)?;
        self.node.delete_param(&key)
    }

    /// Read with a fallback: the parameter's value if it exists and is
    /// readable, `default` otherwise.
    pub fn param(&self, key: &str, default: ParamValue) -> ParamValue {
        match self.get_param(key) {
            Ok(Some(value)) => value,
            _ => default,
        }
    }

    // ------------------------------------------------------------------
    // Graph introspection
    // ------------------------------------------------------------------

    /// Topics advertised by this node (all handles).
    pub fn advertised_topics(&self) -> Vec<String> {
        self.node.advertised_topics()
    }

    /// Topics subscribed by this node (all handles).
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.node.subscribed_topics()
    }

    /// All (topic, type) pairs currently advertised in the graph.
    pub fn published_topics(&self) -> Result<Vec<(String, String)>> {
        self.node.published_topics()
    }

    /// Probe master reachability.
    pub fn check_master(&self) -> bool {
        self.node.check_master()
    }

    pub fn master_uri(&self) -> &str {
        self.node.master_uri()
    }

    /// This node's data connection URI.
    pub fn node_uri(&self) -> &str {
        self.node.uri()
    }

    /// Bound the time directory calls spend retrying, in milliseconds;
    /// -1 retries indefinitely.
    pub fn set_master_retry_timeout(&self, timeout_ms: i64) {
        self.node.set_master_retry_timeout(timeout_ms);
    }

    /// Withdraw every registration issued through **this** handle. The
    /// node itself keeps running until the last handle is released.
    pub fn shutdown(&self) {
        let issued = std::mem::take(&mut *self.issued.lock());
        for registration in issued {
            match registration {
                Issued::Publication(token) => {
                    if let Some(token) = token.upgrade() {
                        token.release();
                    }
                }
                Issued::Subscription(token) => {
                    if let Some(token) = token.upgrade() {
                        token.release();
                    }
                }
                Issued::Service(token) => {
                    if let Some(token) = token.upgrade() {
                        token.release();
                    }
                }
            }
        }
    }
}

impl Clone for NodeHandle {
    /// Clones share the node, namespace, remappings, and callback queue;
    /// registrations issued later are tracked per clone.
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            namespace: self.namespace.clone(),
            remap_chain: self.remap_chain.clone(),
            queue: Arc::clone(&self.queue),
            issued: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("namespace", &self.namespace)
            .field("node", &self.node.name())
            .finish()
    }
}
