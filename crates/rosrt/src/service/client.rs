// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service client side.

use std::io::Read;
use std::marker::PhantomData;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::msg::{encode_to_vec, Message, TypeDescriptor};
use crate::node::Node;
use crate::transport::tcp;
use crate::transport::{uri_to_addr, Handshake};

const READ_POLL: Duration = Duration::from_millis(100);

/// Client handle for a service.
///
/// In persistent mode the TCP connection stays open across calls, making
/// subsequent invocations cheaper at the cost of not surviving provider
/// restarts: a failed persistent call fails that single invocation, and
/// the next call reconnects.
///
/// Calls block until the response arrives or the transport fails. If the
/// node shuts down mid-call the call fails fast with
/// [`Error::TransportError`]. Calls must not be issued from a callback
/// running on the same queue that would service this call's response.
pub struct ServiceClient<Req, Res> {
    node: Arc<Node>,
    name: String,
    persistent: bool,
    connection: Mutex<Option<TcpStream>>,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req: Message, Res: Message> ServiceClient<Req, Res> {
    pub(crate) fn new(node: Arc<Node>, resolved_name: String, persistent: bool) -> Self {
        Self {
            node,
            name: resolved_name,
            persistent,
            connection: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Resolved service name this client calls.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Whether a provider is currently registered with the master.
    pub fn exists(&self) -> bool {
        self.node.lookup_service(&self.name).is_ok()
    }

    fn md5sum() -> String {
        format!("{}:{}", Req::md5sum(), Res::md5sum())
    }

    fn connect(&self) -> Result<TcpStream> {
        let uri = self.node.lookup_service(&self.name)?;
        let addr = uri_to_addr(&uri)?;
        let mut stream =
            TcpStream::connect(&addr).map_err(|e| Error::TransportError(e.to_string()))?;
        let _ = stream.set_nodelay(true);
        let handshake = Handshake::new()
            .with("service", self.name.clone())
            .with("md5sum", Self::md5sum())
            .with("callerid", self.node.name().to_string())
            .with("persistent", if self.persistent { "1" } else { "0" });
        let reply = tcp::client_handshake(&mut stream, &handshake)?;
        if let Some(error) = reply.get("error") {
            return Err(Error::TransportError(format!(
                "provider refused '{}': {}",
                self.name, error
            )));
        }
        stream
            .set_read_timeout(Some(READ_POLL))
            .map_err(|e| Error::TransportError(e.to_string()))?;
        Ok(stream)
    }

    /// Invoke the service and block for its response.
    pub fn call(&self, request: &Req) -> Result<Res> {
        if !self.node.ok() {
            return Err(Error::Shutdown);
        }
        let request_bytes = encode_to_vec(request)?;

        let mut cached = self.connection.lock();
        let mut stream = match cached.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };

        let outcome = self.exchange(&mut stream, &request_bytes);
        if self.persistent && outcome.is_ok() {
            *cached = Some(stream);
        }
        outcome
    }

    fn exchange(&self, stream: &mut TcpStream, request: &[u8]) -> Result<Res> {
        tcp::send_frame(stream, request).map_err(|e| Error::TransportError(e.to_string()))?;

        let mut status = [0u8; 1];
        self.read_exact_while_ok(stream, &mut status)?;
        let mut len_bytes = [0u8; 4];
        self.read_exact_while_ok(stream, &mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes);
        if len > tcp::MAX_FRAME_LEN {
            return Err(Error::TransportError(format!(
                "service reply of {} bytes exceeds limit",
                len
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.read_exact_while_ok(stream, &mut payload)?;

        if status[0] == 0 {
            let text = String::from_utf8_lossy(&payload).into_owned();
            return Err(Error::InvalidState(format!(
                "service '{}' reported failure: {}",
                self.name, text
            )));
        }
        Res::decode(&payload)
    }

    /// Blocking read in 100 ms slices so a node shutdown fails the call
    /// promptly instead of hanging on a dead provider.
    fn read_exact_while_ok(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if !self.node.ok() {
                return Err(Error::TransportError(
                    "node shut down during service call".to_string(),
                ));
            }
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::TransportError(
                        "service connection closed".to_string(),
                    ))
                }
                Ok(n) => filled += n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(Error::TransportError(e.to_string())),
            }
        }
        Ok(())
    }

    /// Declared request/response identity of this client.
    pub fn type_descriptors() -> (TypeDescriptor, TypeDescriptor) {
        (TypeDescriptor::of::<Req>(), TypeDescriptor::of::<Res>())
    }
}

impl<Req, Res> std::fmt::Debug for ServiceClient<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.name)
            .field("persistent", &self.persistent)
            .finish()
    }
}
