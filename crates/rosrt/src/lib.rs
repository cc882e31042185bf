// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rosrt - client runtime for a distributed publish/subscribe node graph
//!
//! A process ("node") joins a logical graph managed by an external
//! directory service (the master), advertises named typed topics and
//! services, subscribes to topics advertised by peers, and invokes
//! services offered by peers. The runtime mediates discovery, manages the
//! TCP data connections, serializes and deserializes typed payloads, and
//! dispatches received payloads to user callbacks on spinner-owned worker
//! threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rosrt::{msg::Text, NodeHandle};
//!
//! fn main() -> rosrt::Result<()> {
//!     rosrt::init(std::env::args().skip(1), "listener")?;
//!     let nh = NodeHandle::new("")?;
//!
//!     let _sub = nh.subscribe::<Text, _>("chatter", 16, |msg| {
//!         println!("heard: {}", msg.data);
//!     })?;
//!
//!     rosrt::spin(&nh); // drain callbacks until shutdown
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |     NodeHandle -> Publisher / Subscriber / Service handles         |
//! +--------------------------------------------------------------------+
//! |                         Runtime Layer                              |
//! |  Name resolution | Registration registry | Callback queues |       |
//! |  Spinners | Tracked-object guards | Parameter cache                |
//! +--------------------------------------------------------------------+
//! |                        Graph / Transport                           |
//! |  Master client (XML-RPC) | TCP topic links | Service endpoints     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`NodeHandle`] | Ref-counted facade; first handle starts the node, last release stops it |
//! | [`Publisher`] | Publishes typed messages on an advertised topic |
//! | [`Subscriber`] | Routes inbound messages to a callback via a queue |
//! | [`ServiceServer`] / [`ServiceClient`] | Request/reply endpoints |
//! | [`CallbackQueue`] | Deferred invocation records drained by spinners |
//! | [`TrackedObject`] | Weak-referenced guard suppressing callbacks after drop |
//!
//! ## Lifecycle
//!
//! [`init`] captures process arguments (`__name:=`, `__ns:=`,
//! `__master:=`, `from:=to` remappings) exactly once. Handles and the
//! registration handles derived from them share the node; destruction is
//! deterministic and the master is informed of every withdrawal.

mod dispatch;
/// Error and result types for the public API.
pub mod error;
/// Directory service (master) client: trait, XML-RPC client, in-memory
/// master for single-process graphs and tests.
pub mod master;
/// Message trait, type descriptors, and built-in message types.
pub mod msg;
/// Graph name validation and resolution.
pub mod names;
mod node;
/// Parameter values and the node-local cache.
pub mod param;
/// Callback queues and the item protocol spinners drain.
pub mod queue;
mod registry;
/// Request/reply services (`service::call` lives here).
pub mod service;
/// Scheduling strategies over callback queues.
pub mod spinner;
/// Liveness guards for queued callbacks.
pub mod tracked;
mod topic;
mod transport;

pub use error::{Error, Result};
pub use msg::{AnyMessage, Message, TypeDescriptor};
pub use node::{
    init, init_with_options, ok, request_shutdown, AdvertiseOptions, InitOptions, Node, NodeHandle,
};
pub use param::ParamValue;
pub use queue::{CallOutcome, CallbackItem, CallbackQueue};
pub use registry::StatusCallback;
pub use service::{ServiceClient, ServiceServer};
pub use spinner::{spin, spin_once, MultiThreadedSpinner, SingleThreadedSpinner};
pub use topic::{Publisher, RawPublisher, Subscriber};
pub use tracked::TrackedObject;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
