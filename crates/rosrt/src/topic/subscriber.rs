// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber handles.

use std::sync::Arc;

use crate::node::Node;
use crate::registry::{Subscription, SubscriptionToken};

pub(crate) struct SubscriberCore {
    #[allow(dead_code)]
    pub(crate) node: Arc<Node>,
    pub(crate) subscription: Arc<Subscription>,
    pub(crate) token: Arc<SubscriptionToken>,
}

/// Handle to one subscription. Dropping the last clone releases it; the
/// release of the last subscription on a name unsubscribes with the
/// master.
#[derive(Clone)]
pub struct Subscriber {
    core: Arc<SubscriberCore>,
}

impl Subscriber {
    pub(crate) fn new(core: SubscriberCore) -> Self {
        Self { core: Arc::new(core) }
    }

    /// Resolved topic name.
    pub fn topic(&self) -> &str {
        &self.core.subscription.name
    }

    /// Inbound payloads that failed to decode for the declared type.
    pub fn decode_errors(&self) -> u64 {
        self.core.subscription.decode_errors()
    }

    /// Messages discarded because the subscription's queue bound was hit.
    pub fn overflow_drops(&self) -> u64 {
        self.core.subscription.overflow_drops()
    }

    /// Release this subscription now instead of at drop.
    pub fn shutdown(&self) {
        self.core.token.release();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic())
            .field("type", &self.core.subscription.ty.name)
            .finish()
    }
}
