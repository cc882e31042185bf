// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration registry: advertised topics, subscriptions, and services.
//!
//! Every registration is keyed by resolved name and direction, carries a
//! refcount, and owns its callback wiring. The master is informed on the
//! first reference and on the release that brings the count to zero;
//! withdrawal is best-effort (failures are logged, the entry is removed
//! regardless). The hot message path reads an immutable [`Snapshot`] that
//! is swapped under the write lock, so dispatch never contends with
//! registration churn beyond the snapshot swap.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::master::Master;
use crate::msg::TypeDescriptor;
use crate::queue::{CallOutcome, CallbackItem, CallbackQueue};
use crate::service::server::ServicePublication;
use crate::tracked::{LivenessGuard, Pin, TrackedObject};
use crate::transport::tcp::{self, ReceiveLink, SendLink};
use crate::transport::Handshake;

/// Subscriber connect/disconnect notification, invoked with the peer's
/// caller id.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Byte payload to type-erased message object.
pub type ErasedDeserialize =
    Arc<dyn Fn(&[u8]) -> Result<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// Type-erased message object to user callback.
pub type ErasedInvoke = Arc<dyn Fn(Arc<dyn Any + Send + Sync>) + Send + Sync>;

/// One advertised topic in this process.
pub struct Publication {
    pub name: String,
    pub ty: TypeDescriptor,
    pub queue_size: usize,
    pub(crate) guard: LivenessGuard,
    queue: Arc<CallbackQueue>,
    connect_cb: Option<StatusCallback>,
    disconnect_cb: Option<StatusCallback>,
    links: Mutex<Vec<SendLink>>,
    refs: AtomicUsize,
}

impl Publication {
    /// Number of remote subscriber connections currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Frames dropped across all subscriber links because their send
    /// buffers were full.
    pub fn dropped_frames(&self) -> u64 {
        self.links.lock().iter().map(SendLink::dropped).sum()
    }

    fn post_status(&self, hook: &Option<StatusCallback>, peer: &str) {
        if let Some(hook) = hook {
            self.queue.push(Box::new(StatusItem {
                hook: Arc::clone(hook),
                guard: self.guard.clone(),
                peer: peer.to_string(),
            }));
        }
    }

    /// Accept a remote subscriber connection (already handshaken).
    pub(crate) fn attach_subscriber(&self, peer_id: &str, stream: TcpStream) {
        let link = SendLink::spawn(peer_id.to_string(), stream, self.queue_size);
        self.links.lock().push(link);
        self.post_status(&self.connect_cb, peer_id);
    }

    /// Send a serialized message to every attached subscriber link,
    /// pruning links whose peer went away.
    pub(crate) fn push_frame(&self, frame: &[u8]) {
        let mut gone = Vec::new();
        {
            let mut links = self.links.lock();
            links.retain_mut(|link| {
                if link.is_closed() {
                    gone.push(link.peer_id.clone());
                    false
                } else {
                    link.push(frame.to_vec());
                    true
                }
            });
        }
        for peer in gone {
            self.post_status(&self.disconnect_cb, &peer);
        }
    }

    fn close(&self) {
        self.guard.revoke();
        let mut links = self.links.lock();
        for link in links.iter_mut() {
            link.close();
        }
        links.clear();
    }
}

/// One subscription in this process. Multiple subscriptions may share a
/// topic; each keeps its own dispatch path and counters.
pub struct Subscription {
    pub name: String,
    pub ty: TypeDescriptor,
    pub queue_size: usize,
    pub(crate) id: u64,
    pub(crate) guard: LivenessGuard,
    pub(crate) queue: Arc<CallbackQueue>,
    pub(crate) deserialize: ErasedDeserialize,
    pub(crate) invoke: ErasedInvoke,
    pub(crate) pending: Arc<AtomicUsize>,
    decode_errors: AtomicU64,
    overflow_drops: AtomicU64,
}

impl Subscription {
    /// Payloads that could not be decoded for the declared type.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Messages discarded because `queue_size` items were already pending.
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops.load(Ordering::Relaxed)
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflow_drops.fetch_add(1, Ordering::Relaxed);
    }
}

/// Connect/disconnect notification queued for a publication.
struct StatusItem {
    hook: StatusCallback,
    guard: LivenessGuard,
    peer: String,
}

impl CallbackItem for StatusItem {
    fn ready(&self) -> CallOutcome {
        if self.guard.attempt_pin().is_gone() {
            CallOutcome::Drop
        } else {
            CallOutcome::Ready
        }
    }

    fn invoke(self: Box<Self>) {
        match self.guard.attempt_pin() {
            Pin::Pinned(_strong) => (self.hook)(&self.peer),
            Pin::Gone => {}
        }
    }
}

/// Immutable dispatch view: topic -> subscriptions.
#[derive(Default)]
pub struct Snapshot {
    by_topic: HashMap<String, Vec<Arc<Subscription>>>,
}

impl Snapshot {
    pub fn subscriptions(&self, topic: &str) -> &[Arc<Subscription>] {
        self.by_topic.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Registration {
    Publication(String),
    Subscription(String, u64),
    Service(String),
}

#[derive(Default)]
struct Inner {
    publications: HashMap<String, Arc<Publication>>,
    subscriptions: HashMap<String, Vec<Arc<Subscription>>>,
    services: HashMap<String, Arc<ServicePublication>>,
    /// Insertion order of live registrations, for reverse teardown.
    order: Vec<Registration>,
}

/// Options for [`Registry::ensure_publication`].
pub struct PublicationOptions {
    pub name: String,
    pub ty: TypeDescriptor,
    pub queue_size: usize,
    pub connect_cb: Option<StatusCallback>,
    pub disconnect_cb: Option<StatusCallback>,
    pub tracked: Option<TrackedObject>,
    pub queue: Arc<CallbackQueue>,
}

/// Options for [`Registry::ensure_subscription`].
pub struct SubscriptionOptions {
    pub name: String,
    pub ty: TypeDescriptor,
    pub queue_size: usize,
    pub deserialize: ErasedDeserialize,
    pub invoke: ErasedInvoke,
    pub tracked: Option<TrackedObject>,
    pub queue: Arc<CallbackQueue>,
}

/// The process-wide registration table.
pub struct Registry {
    caller_id: String,
    caller_uri: String,
    master: Arc<dyn Master>,
    inner: RwLock<Inner>,
    snapshot: Mutex<Arc<Snapshot>>,
    /// (topic, publisher URI) -> inbound link. Subscriptions on the same
    /// topic share one connection per publisher.
    inbound: Mutex<HashMap<(String, String), ReceiveLink>>,
    next_sub_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Registry {
    pub fn new(caller_id: String, caller_uri: String, master: Arc<dyn Master>) -> Arc<Self> {
        Arc::new(Self {
            caller_id,
            caller_uri,
            master,
            inner: RwLock::new(Inner::default()),
            snapshot: Mutex::new(Arc::new(Snapshot::default())),
            inbound: Mutex::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Cheap clone of the current dispatch view.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.lock())
    }

    fn rebuild_snapshot(&self, inner: &Inner) {
        let mut by_topic: HashMap<String, Vec<Arc<Subscription>>> = HashMap::new();
        for (topic, subs) in &inner.subscriptions {
            by_topic.insert(topic.clone(), subs.clone());
        }
        *self.snapshot.lock() = Arc::new(Snapshot { by_topic });
    }

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    /// Get or create the publication for `opts.name`, incrementing its
    /// refcount. A type mismatch against an existing entry is an error.
    pub fn ensure_publication(
        self: &Arc<Self>,
        opts: PublicationOptions,
    ) -> Result<(Arc<Publication>, PublicationToken)> {
        if opts.queue_size == 0 {
            return Err(Error::QueueInvalid("queue_size must be >= 1".to_string()));
        }
        {
            let inner = self.inner.read();
            if let Some(existing) = inner.publications.get(&opts.name) {
                if !existing.ty.matches(&opts.ty) {
                    return Err(Error::TypeConflict {
                        name: opts.name,
                        existing: existing.ty.name.clone(),
                        requested: opts.ty.name,
                    });
                }
                existing.refs.fetch_add(1, Ordering::SeqCst);
                return Ok((Arc::clone(existing), PublicationToken::new(self, &opts.name)));
            }
        }

        // The master may push a publisher update back into this registry
        // synchronously, so no registry lock can be held across this call.
        self.master.register_publisher(
            &self.caller_id,
            &opts.name,
            &opts.ty,
            &self.caller_uri,
        )?;

        let mut inner = self.inner.write();
        if let Some(existing) = inner.publications.get(&opts.name) {
            existing.refs.fetch_add(1, Ordering::SeqCst);
            return Ok((Arc::clone(existing), PublicationToken::new(self, &opts.name)));
        }
        let publication = Arc::new(Publication {
            name: opts.name.clone(),
            ty: opts.ty,
            queue_size: opts.queue_size,
            guard: LivenessGuard::new(opts.tracked),
            queue: opts.queue,
            connect_cb: opts.connect_cb,
            disconnect_cb: opts.disconnect_cb,
            links: Mutex::new(Vec::new()),
            refs: AtomicUsize::new(1),
        });
        inner
            .publications
            .insert(opts.name.clone(), Arc::clone(&publication));
        inner.order.push(Registration::Publication(opts.name.clone()));
        log::debug!("advertised '{}' [{}]", publication.name, publication.ty.name);
        Ok((publication, PublicationToken::new(self, &opts.name)))
    }

    fn release_publication(&self, name: &str) {
        let mut inner = self.inner.write();
        let Some(publication) = inner.publications.get(name) else {
            return;
        };
        if publication.refs.fetch_sub(1, Ordering::SeqCst) > 1 {
            return;
        }
        let publication = inner.publications.remove(name).expect("checked above");
        inner
            .order
            .retain(|r| *r != Registration::Publication(name.to_string()));
        drop(inner);

        // Withdraw with the master before the entry is destroyed.
        if let Err(e) = self
            .master
            .unregister_publisher(&self.caller_id, name, &self.caller_uri)
        {
            log::warn!("unregisterPublisher({}) failed: {}", name, e);
        }
        publication.close();
        log::debug!("unadvertised '{}'", name);
    }

    /// Serialize-once fan-out: local subscriptions through the dispatch
    /// snapshot, remote subscribers through their links.
    pub fn publish(&self, publication: &Publication, frame: &[u8]) {
        crate::dispatch::dispatch_payload(&self.snapshot(), &publication.name, frame);
        publication.push_frame(frame);
    }

    /// Inbound topic connection from the node's data listener.
    pub fn handle_topic_connection(&self, handshake: Handshake, mut stream: TcpStream) {
        let reply = |stream: &mut TcpStream, hs: &Handshake| {
            let _ = tcp::send_frame(stream, &hs.to_frame());
        };
        let topic = match handshake.require("topic") {
            Ok(topic) => topic.to_string(),
            Err(e) => {
                reply(&mut stream, &Handshake::new().with("error", e.to_string()));
                return;
            }
        };
        let peer = handshake.get("callerid").unwrap_or("unknown").to_string();
        let requested = TypeDescriptor::new(
            handshake.get("type").unwrap_or("*"),
            handshake.get("md5sum").unwrap_or("*"),
        );

        let publication = {
            let inner = self.inner.read();
            inner.publications.get(&topic).cloned()
        };
        let Some(publication) = publication else {
            reply(
                &mut stream,
                &Handshake::new().with("error", format!("topic '{}' is not advertised", topic)),
            );
            return;
        };
        if !publication.ty.matches(&requested) {
            reply(
                &mut stream,
                &Handshake::new().with(
                    "error",
                    format!(
                        "type mismatch on '{}': have [{}], requested [{}]",
                        topic, publication.ty.name, requested.name
                    ),
                ),
            );
            return;
        }

        reply(
            &mut stream,
            &Handshake::new()
                .with("type", publication.ty.name.clone())
                .with("md5sum", publication.ty.md5sum.clone())
                .with("callerid", self.caller_id.clone()),
        );
        publication.attach_subscriber(&peer, stream);
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Create a subscription entry. The master is informed only for the
    /// first subscription on a name, and only that first registration
    /// returns the topic's current publisher URIs; later ones return an
    /// empty list (the shared inbound links already exist).
    pub fn ensure_subscription(
        self: &Arc<Self>,
        opts: SubscriptionOptions,
    ) -> Result<(Arc<Subscription>, Vec<String>, SubscriptionToken)> {
        if opts.queue_size == 0 {
            return Err(Error::QueueInvalid("queue_size must be >= 1".to_string()));
        }
        if !opts.queue.is_enabled() {
            return Err(Error::QueueInvalid(
                "callback queue is disabled".to_string(),
            ));
        }

        let first_for_name = {
            let inner = self.inner.read();
            if let Some(first) = inner.subscriptions.get(&opts.name).and_then(|s| s.first()) {
                if !first.ty.matches(&opts.ty) {
                    return Err(Error::TypeConflict {
                        name: opts.name,
                        existing: first.ty.name.clone(),
                        requested: opts.ty.name,
                    });
                }
            }
            inner
                .subscriptions
                .get(&opts.name)
                .map_or(true, Vec::is_empty)
        };

        // Master call with no registry lock held; see ensure_publication.
        let uris = if first_for_name {
            self.master.register_subscriber(
                &self.caller_id,
                &opts.name,
                &opts.ty,
                &self.caller_uri,
            )?
        } else {
            Vec::new()
        };

        let mut inner = self.inner.write();
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            name: opts.name.clone(),
            ty: opts.ty,
            queue_size: opts.queue_size,
            id,
            guard: LivenessGuard::new(opts.tracked),
            queue: opts.queue,
            deserialize: opts.deserialize,
            invoke: opts.invoke,
            pending: Arc::new(AtomicUsize::new(0)),
            decode_errors: AtomicU64::new(0),
            overflow_drops: AtomicU64::new(0),
        });
        inner
            .subscriptions
            .entry(opts.name.clone())
            .or_default()
            .push(Arc::clone(&subscription));
        inner
            .order
            .push(Registration::Subscription(opts.name.clone(), id));
        self.rebuild_snapshot(&inner);
        log::debug!("subscribed to '{}' [{}]", subscription.name, subscription.ty.name);
        Ok((
            subscription,
            uris,
            SubscriptionToken::new(self, &opts.name, id),
        ))
    }

    fn release_subscription(&self, name: &str, id: u64) {
        let mut inner = self.inner.write();
        let Some(subs) = inner.subscriptions.get_mut(name) else {
            return;
        };
        let Some(index) = subs.iter().position(|s| s.id == id) else {
            return;
        };
        let subscription = subs.remove(index);
        subscription.guard.revoke();
        let last_for_name = subs.is_empty();
        if last_for_name {
            inner.subscriptions.remove(name);
        }
        inner
            .order
            .retain(|r| *r != Registration::Subscription(name.to_string(), id));
        self.rebuild_snapshot(&inner);
        drop(inner);

        if last_for_name {
            // Drop the shared inbound connections for this topic.
            let mut inbound = self.inbound.lock();
            let keys: Vec<_> = inbound
                .keys()
                .filter(|(topic, _)| topic == name)
                .cloned()
                .collect();
            for key in keys {
                if let Some(mut link) = inbound.remove(&key) {
                    link.close();
                }
            }
            drop(inbound);
            if let Err(e) =
                self.master
                    .unregister_subscriber(&self.caller_id, name, &self.caller_uri)
            {
                log::warn!("unregisterSubscriber({}) failed: {}", name, e);
            }
        }
        log::debug!("unsubscribed from '{}'", name);
    }

    /// Reconcile the topic's inbound links against `uris`, the complete
    /// current publisher set (from the first registration's reply or a
    /// master publisher update): new URIs are connected, links to absent
    /// ones are closed. The node's own URI is skipped; local delivery
    /// happens on the publish path.
    pub fn connect_publishers(self: &Arc<Self>, topic: &str, uris: &[String]) {
        let ty = {
            let inner = self.inner.read();
            match inner.subscriptions.get(topic).and_then(|s| s.first()) {
                Some(sub) => sub.ty.clone(),
                None => return,
            }
        };

        let mut inbound = self.inbound.lock();

        // Drop links to publishers that disappeared.
        let current: HashSet<&String> = uris.iter().collect();
        let stale: Vec<_> = inbound
            .keys()
            .filter(|(t, uri)| t == topic && !current.contains(uri))
            .cloned()
            .collect();
        for key in stale {
            if let Some(mut link) = inbound.remove(&key) {
                link.close();
            }
        }

        for uri in uris {
            if uri == &self.caller_uri {
                continue;
            }
            let key = (topic.to_string(), uri.clone());
            if inbound.contains_key(&key) {
                continue;
            }
            let handshake = Handshake::new()
                .with("topic", topic)
                .with("type", ty.name.clone())
                .with("md5sum", ty.md5sum.clone())
                .with("callerid", self.caller_id.clone());
            let weak = Arc::downgrade(self);
            let topic_owned = topic.to_string();
            let sink: tcp::FrameSink = Arc::new(move |frame: &[u8]| {
                if let Some(registry) = weak.upgrade() {
                    crate::dispatch::dispatch_payload(&registry.snapshot(), &topic_owned, frame);
                }
            });
            let link = ReceiveLink::spawn(uri.clone(), handshake, sink);
            inbound.insert(key, link);
        }
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// Register a service provider. At most one per resolved name.
    pub fn ensure_service(
        self: &Arc<Self>,
        service: Arc<ServicePublication>,
    ) -> Result<ServiceToken> {
        {
            let inner = self.inner.read();
            if inner.services.contains_key(service.name()) {
                return Err(Error::InvalidState(format!(
                    "service '{}' is already advertised",
                    service.name()
                )));
            }
        }
        self.master.register_service(
            &self.caller_id,
            service.name(),
            service.uri(),
            &self.caller_uri,
        )?;
        let mut inner = self.inner.write();
        let name = service.name().to_string();
        inner.services.insert(name.clone(), service);
        inner.order.push(Registration::Service(name.clone()));
        log::debug!("advertised service '{}'", name);
        Ok(ServiceToken::new(self, &name))
    }

    fn release_service(&self, name: &str) {
        let mut inner = self.inner.write();
        let Some(service) = inner.services.remove(name) else {
            return;
        };
        inner
            .order
            .retain(|r| *r != Registration::Service(name.to_string()));
        drop(inner);

        if let Err(e) = self
            .master
            .unregister_service(&self.caller_id, name, service.uri())
        {
            log::warn!("unregisterService({}) failed: {}", name, e);
        }
        service.close();
        log::debug!("unadvertised service '{}'", name);
    }

    // ------------------------------------------------------------------
    // Introspection and teardown
    // ------------------------------------------------------------------

    pub fn advertised_topics(&self) -> Vec<String> {
        self.inner.read().publications.keys().cloned().collect()
    }

    /// Number of inbound publisher links held for a topic (for testing).
    #[cfg(test)]
    pub(crate) fn inbound_link_count(&self, topic: &str) -> usize {
        self.inbound
            .lock()
            .keys()
            .filter(|(t, _)| t == topic)
            .count()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.read().subscriptions.keys().cloned().collect()
    }

    /// Withdraw everything still registered, newest first. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let order: Vec<Registration> = {
            let inner = self.inner.read();
            inner.order.clone()
        };
        for registration in order.into_iter().rev() {
            match registration {
                Registration::Publication(name) => {
                    // Force the count to one so the release below retires it.
                    if let Some(publication) = self.inner.read().publications.get(&name) {
                        publication.refs.store(1, Ordering::SeqCst);
                    }
                    self.release_publication(&name);
                }
                Registration::Subscription(name, id) => self.release_subscription(&name, id),
                Registration::Service(name) => self.release_service(&name),
            }
        }
        let mut inbound = self.inbound.lock();
        for (_, mut link) in inbound.drain() {
            link.close();
        }
    }
}

// ============================================================================
// Refcount tokens
// ============================================================================

macro_rules! define_token {
    ($(#[$doc:meta])* $name:ident, |$registry:ident, $token:ident| $release:expr) => {
        $(#[$doc])*
        pub struct $name {
            registry: Weak<Registry>,
            name: String,
            #[allow(dead_code)]
            id: u64,
            released: AtomicBool,
        }

        impl $name {
            /// Release this reference now. Idempotent; also runs on drop.
            pub fn release(&self) {
                if self.released.swap(true, Ordering::SeqCst) {
                    return;
                }
                if let Some($registry) = self.registry.upgrade() {
                    let $token = self;
                    $release
                }
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.release();
            }
        }
    };
}

define_token!(
    /// Refcount reference to a topic advertisement.
    PublicationToken,
    |registry, token| registry.release_publication(&token.name)
);

define_token!(
    /// Reference to one subscription entry.
    SubscriptionToken,
    |registry, token| registry.release_subscription(&token.name, token.id)
);

define_token!(
    /// Reference to a service advertisement.
    ServiceToken,
    |registry, token| registry.release_service(&token.name)
);

impl PublicationToken {
    fn new(registry: &Arc<Registry>, name: &str) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            name: name.to_string(),
            id: 0,
            released: AtomicBool::new(false),
        }
    }
}

impl SubscriptionToken {
    fn new(registry: &Arc<Registry>, name: &str, id: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            name: name.to_string(),
            id,
            released: AtomicBool::new(false),
        }
    }
}

impl ServiceToken {
    fn new(registry: &Arc<Registry>, name: &str) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            name: name.to_string(),
            id: 0,
            released: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MemoryMaster;
    use crate::msg::{Empty, Message, Text};
    use std::time::Duration;

    fn registry_with_master() -> (Arc<Registry>, Arc<MemoryMaster>) {
        let master = Arc::new(MemoryMaster::new());
        let registry = Registry::new(
            "/test_node".to_string(),
            "rosrt://127.0.0.1:1".to_string(),
            Arc::clone(&master) as Arc<dyn Master>,
        );
        (registry, master)
    }

    fn pub_opts(name: &str, queue: &Arc<CallbackQueue>) -> PublicationOptions {
        PublicationOptions {
            name: name.to_string(),
            ty: TypeDescriptor::of::<Empty>(),
            queue_size: 4,
            connect_cb: None,
            disconnect_cb: None,
            tracked: None,
            queue: Arc::clone(queue),
        }
    }

    fn sub_opts(name: &str, queue: &Arc<CallbackQueue>) -> SubscriptionOptions {
        SubscriptionOptions {
            name: name.to_string(),
            ty: TypeDescriptor::of::<Empty>(),
            queue_size: 4,
            deserialize: Arc::new(|bytes: &[u8]| {
                Ok(Arc::new(Empty::decode(bytes)?) as Arc<dyn std::any::Any + Send + Sync>)
            }),
            invoke: Arc::new(|_msg| {}),
            tracked: None,
            queue: Arc::clone(queue),
        }
    }

    #[test]
    fn double_advertise_registers_once_and_unregisters_once() {
        let (registry, master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());

        let (_pub1, token1) = registry
            .ensure_publication(pub_opts("/topic_b", &queue))
            .unwrap();
        let (_pub2, token2) = registry
            .ensure_publication(pub_opts("/topic_b", &queue))
            .unwrap();
        assert_eq!(master.publisher_registrations("/topic_b"), 1);

        token1.release();
        assert_eq!(master.publisher_unregistrations("/topic_b"), 0);

        token2.release();
        assert_eq!(master.publisher_unregistrations("/topic_b"), 1);
        assert!(registry.advertised_topics().is_empty());
    }

    #[test]
    fn type_conflict_is_rejected() {
        let (registry, _master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());
        let (_p, _t) = registry
            .ensure_publication(pub_opts("/conflicted", &queue))
            .unwrap();

        let mut other = pub_opts("/conflicted", &queue);
        other.ty = TypeDescriptor::of::<Text>();
        assert!(matches!(
            registry.ensure_publication(other),
            Err(Error::TypeConflict { .. })
        ));
    }

    #[test]
    fn zero_queue_size_is_rejected() {
        let (registry, _master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());
        let mut opts = pub_opts("/zq", &queue);
        opts.queue_size = 0;
        assert!(matches!(
            registry.ensure_publication(opts),
            Err(Error::QueueInvalid(_))
        ));
    }

    #[test]
    fn subscribe_on_disabled_queue_is_rejected() {
        let (registry, _master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());
        queue.disable();
        assert!(matches!(
            registry.ensure_subscription(sub_opts("/t", &queue)),
            Err(Error::QueueInvalid(_))
        ));
    }

    #[test]
    fn multiple_subscriptions_register_with_master_once() {
        let (registry, master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());

        let (_s1, _uris1, tok1) = registry
            .ensure_subscription(sub_opts("/shared", &queue))
            .unwrap();
        let (_s2, _uris2, tok2) = registry
            .ensure_subscription(sub_opts("/shared", &queue))
            .unwrap();
        assert_eq!(master.subscriber_registrations("/shared"), 1);
        assert_eq!(registry.snapshot().subscriptions("/shared").len(), 2);

        tok1.release();
        assert_eq!(master.subscriber_unregistrations("/shared"), 0);
        tok2.release();
        assert_eq!(master.subscriber_unregistrations("/shared"), 1);
        assert!(registry.snapshot().subscriptions("/shared").is_empty());
    }

    #[test]
    fn publish_reaches_local_subscription_through_snapshot() {
        let (registry, _master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let mut opts = sub_opts("/loop", &queue);
        let counter = Arc::clone(&hits);
        opts.invoke = Arc::new(move |_msg| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (_sub, _uris, _token) = registry.ensure_subscription(opts).unwrap();

        let (publication, _pt) = registry
            .ensure_publication(pub_opts("/loop", &queue))
            .unwrap();
        registry.publish(&publication, &[]);
        registry.publish(&publication, &[]);

        assert_eq!(queue.call_available(Duration::ZERO), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_withdraws_everything_and_is_idempotent() {
        let (registry, master) = registry_with_master();
        let queue = Arc::new(CallbackQueue::new());
        let (_p, pt) = registry.ensure_publication(pub_opts("/a", &queue)).unwrap();
        let (_s, _u, st) = registry.ensure_subscription(sub_opts("/b", &queue)).unwrap();

        registry.shutdown();
        registry.shutdown();
        assert_eq!(master.publisher_unregistrations("/a"), 1);
        assert_eq!(master.subscriber_unregistrations("/b"), 1);

        // Late token drops find the entries gone and do nothing.
        pt.release();
        st.release();
        assert_eq!(master.publisher_unregistrations("/a"), 1);
        assert_eq!(master.subscriber_unregistrations("/b"), 1);
    }
}
