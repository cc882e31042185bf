// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-registration topic handles.
//!
//! A handle is a cheap clone sharing one registration reference; dropping
//! the last clone releases it, and the release that brings the
//! registration's refcount to zero withdraws it with the master.

pub(crate) mod publisher;
pub(crate) mod subscriber;

pub use publisher::{Publisher, RawPublisher};
pub use subscriber::Subscriber;
