// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport surfaces consumed by the runtime.
//!
//! Wire framing is deliberately small: a key=value handshake exchanged once
//! per connection, then length-prefixed payload frames. Outbound traffic
//! goes through bounded [`OutboundQueue`]s so `publish` never blocks; frames
//! beyond the queue size are dropped with a counter increment.

pub mod tcp;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Connection URI scheme used by the data transport.
pub const URI_SCHEME: &str = "rosrt://";

/// Build a connection URI for a local port.
pub fn local_uri(port: u16) -> String {
    format!("{}{}:{}", URI_SCHEME, local_host(), port)
}

fn local_host() -> String {
    std::env::var("ROSRT_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Extract `host:port` from a `rosrt://host:port` URI.
pub fn uri_to_addr(uri: &str) -> Result<String> {
    let rest = uri
        .strip_prefix(URI_SCHEME)
        .ok_or_else(|| Error::TransportError(format!("unsupported transport URI: {}", uri)))?;
    if rest.rsplit_once(':').is_none() {
        return Err(Error::TransportError(format!("URI has no port: {}", uri)));
    }
    Ok(rest.to_string())
}

/// Key/value fields exchanged once when a connection is established.
#[derive(Debug, Default, Clone)]
pub struct Handshake {
    fields: HashMap<String, String>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Field access that fails with a handshake error when absent.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::TransportError(format!("handshake missing field '{}'", key)))
    }

    /// Serialize as one frame: `key=value` pairs, each length-prefixed.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (key, value) in &self.fields {
            let field = format!("{}={}", key, value);
            body.extend_from_slice(&(field.len() as u32).to_le_bytes());
            body.extend_from_slice(field.as_bytes());
        }
        body
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let mut fields = HashMap::new();
        let mut offset = 0;
        while offset < frame.len() {
            if offset + 4 > frame.len() {
                return Err(Error::TransportError("truncated handshake".to_string()));
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&frame[offset..offset + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            offset += 4;
            let end = offset + len;
            if end > frame.len() {
                return Err(Error::TransportError("truncated handshake".to_string()));
            }
            let field = std::str::from_utf8(&frame[offset..end])
                .map_err(|_| Error::TransportError("handshake is not utf-8".to_string()))?;
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| Error::TransportError("handshake field has no '='".to_string()))?;
            fields.insert(key.to_string(), value.to_string());
            offset = end;
        }
        Ok(Self { fields })
    }
}

struct OutboundState {
    frames: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Bounded per-connection send buffer.
///
/// `push` never blocks: when the buffer is full the oldest frame is
/// discarded to make room and the drop counter is incremented.
pub struct OutboundQueue {
    state: Mutex<OutboundState>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(OutboundState {
                frames: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, frame: Vec<u8>) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            state.frames.push_back(frame);
        }
        self.available.notify_one();
    }

    /// Blocking pop used by the writer thread. Returns `None` once the
    /// queue is closed and drained.
    pub fn pop(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if state.frames.is_empty() && !state.closed {
            self.available.wait_for(&mut state, timeout);
        }
        state.frames.pop_front()
    }

    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
        }
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_roundtrip() {
        let hs = Handshake::new()
            .with("topic", "/chatter")
            .with("type", "rosrt_msgs/Text")
            .with("md5sum", "abc123");
        let frame = hs.to_frame();
        let back = Handshake::from_frame(&frame).unwrap();
        assert_eq!(back.get("topic"), Some("/chatter"));
        assert_eq!(back.require("md5sum").unwrap(), "abc123");
        assert!(back.require("missing").is_err());
    }

    #[test]
    fn outbound_queue_drops_oldest_beyond_capacity() {
        let queue = OutboundQueue::new(2);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.push(vec![3]);

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop(Duration::ZERO), Some(vec![2]));
        assert_eq!(queue.pop(Duration::ZERO), Some(vec![3]));
        assert_eq!(queue.pop(Duration::ZERO), None);
    }

    #[test]
    fn closed_queue_refuses_frames() {
        let queue = OutboundQueue::new(4);
        queue.push(vec![1]);
        queue.close();
        queue.push(vec![2]);
        assert_eq!(queue.pop(Duration::ZERO), Some(vec![1]));
        assert_eq!(queue.pop(Duration::ZERO), None);
    }

    #[test]
    fn uri_parsing() {
        assert_eq!(uri_to_addr("rosrt://h:42").unwrap(), "h:42");
        assert!(uri_to_addr("http://h:42").is_err());
        assert!(uri_to_addr("rosrt://nohost").is_err());
    }
}
