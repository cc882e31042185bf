// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply services.
//!
//! A service provider advertises a resolved name with the master and
//! listens on its own connection endpoint; invocations are posted to the
//! provider's callback queue and run on spinner threads, never on the
//! connection thread. Clients look the provider up through the master and
//! speak a small framed protocol: handshake, request frame, one status
//! byte, reply frame.
//!
//! # Wire protocol
//!
//! - client handshake fields: `service`, `md5sum`, `callerid`, `persistent`
//! - provider reply fields: `callerid`, or `error`
//! - request: one frame of encoded request bytes
//! - reply: one `1` byte and a frame of encoded response bytes on success,
//!   one `0` byte and a frame of UTF-8 error text on handler failure

pub(crate) mod client;
pub(crate) mod server;

pub use client::ServiceClient;
pub use server::ServiceServer;

use crate::error::Result;
use crate::msg::Message;

/// Call a service through the process node, creating a transient
/// (non-persistent) client for the duration of the call.
///
/// The name is resolved against the node's root namespace. Fails with
/// [`crate::Error::ServiceUnavailable`] when no provider is registered.
pub fn call<Req: Message, Res: Message>(name: &str, request: &Req) -> Result<Res> {
    let node = crate::node::current_node()?;
    let resolved = node.resolve_root(name)?;
    let client = ServiceClient::<Req, Res>::new(node, resolved, false);
    client.call(request)
}
