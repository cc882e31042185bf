// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher handles.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::msg::{encode_to_vec, Message, TypeDescriptor};
use crate::node::Node;
use crate::registry::{Publication, PublicationToken};

pub(crate) struct PublisherCore {
    pub(crate) node: Arc<Node>,
    pub(crate) publication: Arc<Publication>,
    pub(crate) token: Arc<PublicationToken>,
}

impl PublisherCore {
    fn publish_frame(&self, frame: &[u8]) -> Result<()> {
        if !self.node.ok() {
            return Err(Error::Shutdown);
        }
        self.node.registry().publish(&self.publication, frame);
        Ok(())
    }
}

/// Typed publisher for one advertised topic.
///
/// `publish` is non-blocking: the payload is serialized once, delivered to
/// in-process subscriptions through the dispatch snapshot, and enqueued
/// into each remote subscriber's bounded send buffer (frames beyond
/// `queue_size` are dropped with a counter increment).
pub struct Publisher<M: Message> {
    core: Arc<PublisherCore>,
    _marker: PhantomData<fn(&M)>,
}

impl<M: Message> Publisher<M> {
    pub(crate) fn new(core: PublisherCore) -> Self {
        Self {
            core: Arc::new(core),
            _marker: PhantomData,
        }
    }

    pub fn publish(&self, message: &M) -> Result<()> {
        let frame = encode_to_vec(message)?;
        self.core.publish_frame(&frame)
    }

    /// Resolved topic name.
    pub fn topic(&self) -> &str {
        &self.core.publication.name
    }

    /// Remote subscriber connections currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.core.publication.subscriber_count()
    }

    /// Frames dropped because a subscriber link's send buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.core.publication.dropped_frames()
    }

    /// Release this advertisement reference now instead of at drop.
    pub fn shutdown(&self) {
        self.core.token.release();
    }
}

impl<M: Message> Clone for Publisher<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<M: Message> std::fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic())
            .field("type", &M::type_name())
            .finish()
    }
}

/// Dynamically-typed publisher: serialized payload bytes plus the type
/// descriptor captured at advertisement time. Used by replay tooling.
#[derive(Clone)]
pub struct RawPublisher {
    core: Arc<PublisherCore>,
}

impl RawPublisher {
    pub(crate) fn new(core: PublisherCore) -> Self {
        Self { core: Arc::new(core) }
    }

    /// Publish already-serialized payload bytes.
    pub fn publish_bytes(&self, payload: &[u8]) -> Result<()> {
        self.core.publish_frame(payload)
    }

    pub fn topic(&self) -> &str {
        &self.core.publication.name
    }

    pub fn type_descriptor(&self) -> &TypeDescriptor {
        &self.core.publication.ty
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.publication.subscriber_count()
    }

    pub fn shutdown(&self) {
        self.core.token.release();
    }
}

impl std::fmt::Debug for RawPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPublisher")
            .field("topic", &self.topic())
            .field("type", &self.type_descriptor().name)
            .finish()
    }
}
