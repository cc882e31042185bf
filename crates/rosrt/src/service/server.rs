// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service provider side: listener, per-connection threads, queued
//! invocations.

use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::msg::TypeDescriptor;
use crate::queue::{CallOutcome, CallbackItem, CallbackQueue};
use crate::tracked::{LivenessGuard, Pin, TrackedObject};
use crate::transport::tcp::{self, Listener};
use crate::transport::{local_uri, Handshake};

/// Type-erased request handler: encoded request in, encoded response out.
pub type ErasedHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

const READ_POLL: Duration = Duration::from_millis(100);

/// One advertised service provider.
pub struct ServicePublication {
    name: String,
    req_ty: TypeDescriptor,
    res_ty: TypeDescriptor,
    uri: String,
    caller_id: String,
    pub(crate) guard: LivenessGuard,
    queue: Arc<CallbackQueue>,
    handler: ErasedHandler,
    listener: Mutex<Option<Listener>>,
}

impl ServicePublication {
    /// Bind a listener and build the provider state. The master is not
    /// contacted here; the registry does that when the provider is
    /// registered.
    pub(crate) fn spawn(
        name: String,
        req_ty: TypeDescriptor,
        res_ty: TypeDescriptor,
        handler: ErasedHandler,
        tracked: Option<TrackedObject>,
        queue: Arc<CallbackQueue>,
        caller_id: String,
    ) -> Result<Arc<Self>> {
        let slot: Arc<OnceLock<Weak<ServicePublication>>> = Arc::new(OnceLock::new());
        let accept_slot = Arc::clone(&slot);
        let accept: tcp::AcceptFn = Arc::new(move |handshake, stream| {
            if let Some(service) = accept_slot.get().and_then(Weak::upgrade) {
                service.accept_connection(handshake, stream);
            }
        });
        let listener = Listener::spawn(&format!("srv{}", name.replace('/', "-")), accept)?;
        let uri = local_uri(listener.port());

        let service = Arc::new(Self {
            name,
            req_ty,
            res_ty,
            uri,
            caller_id,
            guard: LivenessGuard::new(tracked),
            queue,
            handler,
            listener: Mutex::new(Some(listener)),
        });
        let _ = slot.set(Arc::downgrade(&service));
        Ok(service)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Combined identity exchanged in handshakes.
    pub(crate) fn md5sum(&self) -> String {
        format!("{}:{}", self.req_ty.md5sum, self.res_ty.md5sum)
    }

    fn accept_connection(self: Arc<Self>, handshake: Handshake, mut stream: TcpStream) {
        let reply = |stream: &mut TcpStream, hs: &Handshake| {
            let _ = tcp::send_frame(stream, &hs.to_frame());
        };
        match handshake.get("service") {
            Some(name) if name == self.name => {}
            other => {
                reply(
                    &mut stream,
                    &Handshake::new().with(
                        "error",
                        format!("this endpoint serves '{}', not '{:?}'", self.name, other),
                    ),
                );
                return;
            }
        }
        if let Some(sum) = handshake.get("md5sum") {
            if !sum.contains('*') && sum != self.md5sum() {
                reply(
                    &mut stream,
                    &Handshake::new()
                        .with("error", format!("type digest mismatch on '{}'", self.name)),
                );
                return;
            }
        }
        reply(
            &mut stream,
            &Handshake::new().with("callerid", self.caller_id.clone()),
        );

        let service = Arc::downgrade(&self);
        let spawned = std::thread::Builder::new()
            .name("rosrt-service".to_string())
            .spawn(move || connection_loop(service, stream));
        if let Err(e) = spawned {
            log::warn!("failed to spawn service connection thread: {}", e);
        }
    }

    /// Stop accepting and revoke queued invocations.
    pub(crate) fn close(&self) {
        self.guard.revoke();
        if let Some(mut listener) = self.listener.lock().take() {
            listener.shutdown();
        }
    }
}

/// Read requests off one client connection, posting each as a queue item.
/// The loop exits when the client disconnects or the provider is
/// withdrawn.
fn connection_loop(service: Weak<ServicePublication>, stream: TcpStream) {
    let Ok(mut frames) = tcp::FrameReader::new(stream, READ_POLL) else {
        return;
    };
    loop {
        let Some(service) = service.upgrade() else {
            return;
        };
        if service.guard.is_revoked() {
            return;
        }
        match frames.poll_frame() {
            Ok(Some(request)) => {
                let Ok(reply_stream) = frames.stream().try_clone() else {
                    return;
                };
                service.queue.push(Box::new(InvocationItem {
                    guard: service.guard.clone(),
                    handler: Arc::clone(&service.handler),
                    request,
                    stream: reply_stream,
                }));
            }
            Ok(None) => {}
            Err(_) => return,
        }
    }
}

/// A pending service invocation on a callback queue.
struct InvocationItem {
    guard: LivenessGuard,
    handler: ErasedHandler,
    request: Vec<u8>,
    stream: TcpStream,
}

impl CallbackItem for InvocationItem {
    fn ready(&self) -> CallOutcome {
        if self.guard.attempt_pin().is_gone() {
            CallOutcome::Drop
        } else {
            CallOutcome::Ready
        }
    }

    fn invoke(mut self: Box<Self>) {
        let pinned = match self.guard.attempt_pin() {
            Pin::Pinned(strong) => strong,
            Pin::Gone => return,
        };
        let outcome = (self.handler)(&self.request);
        drop(pinned);

        let (status, payload) = match outcome {
            Ok(response) => (1u8, response),
            Err(e) => (0u8, e.to_string().into_bytes()),
        };
        if self
            .stream
            .write_all(&[status])
            .and_then(|_| tcp::send_frame(&mut self.stream, &payload))
            .is_err()
        {
            log::debug!("service reply dropped: client went away");
        }
    }
}

/// Handle to an advertised service. Dropping the last clone withdraws the
/// advertisement.
#[derive(Clone)]
pub struct ServiceServer {
    core: Arc<ServiceServerCore>,
}

pub(crate) struct ServiceServerCore {
    #[allow(dead_code)]
    pub(crate) node: Arc<crate::node::Node>,
    pub(crate) service: Arc<ServicePublication>,
    pub(crate) token: Arc<crate::registry::ServiceToken>,
}

impl ServiceServer {
    pub(crate) fn new(core: ServiceServerCore) -> Self {
        Self { core: Arc::new(core) }
    }

    /// Resolved service name.
    pub fn name(&self) -> &str {
        self.core.service.name()
    }

    /// Connection URI clients are directed to.
    pub fn uri(&self) -> &str {
        self.core.service.uri()
    }

    /// Withdraw the advertisement now instead of at drop.
    pub fn shutdown(&self) {
        self.core.token.release();
        self.core.service.close();
    }
}

impl std::fmt::Debug for ServiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("name", &self.name())
            .field("uri", &self.uri())
            .finish()
    }
}

/// Decode/encode wrapper turning a typed handler into an [`ErasedHandler`].
pub(crate) fn erase_handler<Req, Res, F>(handler: F) -> ErasedHandler
where
    Req: crate::msg::Message,
    Res: crate::msg::Message,
    F: Fn(Req) -> Result<Res> + Send + Sync + 'static,
{
    Arc::new(move |bytes: &[u8]| {
        let request = Req::decode(bytes)
            .map_err(|e| Error::DeserializationError(format!("service request: {}", e)))?;
        let response = handler(request)?;
        crate::msg::encode_to_vec(&response)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{encode_to_vec, Message, Text};

    #[test]
    fn erased_handler_roundtrips_payloads() {
        let handler = erase_handler(|req: Text| Ok(Text::new(format!("re:{}", req.data))));
        let reply = handler(&encode_to_vec(&Text::new("ping")).unwrap()).unwrap();
        assert_eq!(Text::decode(&reply).unwrap().data, "re:ping");
    }

    #[test]
    fn erased_handler_surfaces_decode_failures() {
        let handler = erase_handler(|req: Text| Ok(req));
        assert!(matches!(
            handler(&[0xFF, 0xFF]),
            Err(Error::DeserializationError(_))
        ));
    }
}
