// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP links: length-prefixed frames over `std::net` streams.
//!
//! The node owns one [`Listener`] for inbound topic connections; each
//! service server owns its own. Outbound publisher links drain an
//! [`OutboundQueue`](super::OutboundQueue) on a writer thread; inbound
//! subscriber links reconnect with exponential backoff capped at 10 s.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{uri_to_addr, Handshake, OutboundQueue};

/// Upper bound on a single frame; larger lengths indicate a corrupt peer.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const WRITER_POLL: Duration = Duration::from_millis(100);
const RECONNECT_CAP: Duration = Duration::from_secs(10);

/// Write one length-prefixed frame.
pub fn send_frame<W: Write>(w: &mut W, payload: &[u8]) -> std::io::Result<()> {
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Read one length-prefixed frame.
pub fn read_frame<R: Read>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok(payload)
}

/// Incremental frame reader over a stream with a bounded read timeout.
///
/// Timeout-based polling must not lose partial progress: a frame whose
/// bytes straddle a timeout slice is accumulated across calls and
/// delivered whole.
pub struct FrameReader {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl FrameReader {
    pub fn new(stream: TcpStream, poll: Duration) -> std::io::Result<Self> {
        stream.set_read_timeout(Some(poll))?;
        Ok(Self {
            stream,
            pending: Vec::new(),
        })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// `Ok(Some(frame))` when a frame completed, `Ok(None)` when the
    /// timeout slice elapsed first, `Err` on close or corruption.
    pub fn poll_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let needed = self.bytes_needed()?;
            if needed == 0 {
                let frame = self.pending.split_off(4);
                self.pending.clear();
                return Ok(Some(frame));
            }
            let mut chunk = vec![0u8; needed.min(64 * 1024)];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    ))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn bytes_needed(&self) -> std::io::Result<usize> {
        if self.pending.len() < 4 {
            return Ok(4 - self.pending.len());
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.pending[0..4]);
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit", len),
            ));
        }
        Ok((4 + len as usize).saturating_sub(self.pending.len()))
    }
}

/// Exchange handshakes from the connecting side: send ours, read the reply.
pub fn client_handshake(stream: &mut TcpStream, ours: &Handshake) -> Result<Handshake> {
    send_frame(stream, &ours.to_frame()).map_err(|e| Error::TransportError(e.to_string()))?;
    let reply = read_frame(stream).map_err(|e| Error::TransportError(e.to_string()))?;
    Handshake::from_frame(&reply)
}

/// Callback invoked for each accepted connection, after its handshake has
/// been read. Runs on the accept thread; implementations must hand the
/// stream off instead of doing slow work.
pub type AcceptFn = Arc<dyn Fn(Handshake, TcpStream) + Send + Sync>;

/// Listening socket with a polling accept thread.
pub struct Listener {
    port: u16,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind an ephemeral port and start accepting.
    pub fn spawn(name: &str, on_accept: AcceptFn) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let thread_name = format!("rosrt-accept-{}", name);
        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || accept_loop(listener, flag, on_accept))
            .map_err(|e| Error::TransportError(e.to_string()))?;

        Ok(Self {
            port,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and join the accept thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shutdown: Arc<AtomicBool>, on_accept: AcceptFn) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let _ = stream.set_nodelay(true);
                match read_frame(&mut stream) {
                    Ok(frame) => match Handshake::from_frame(&frame) {
                        Ok(handshake) => on_accept(handshake, stream),
                        Err(e) => log::warn!("bad handshake from {}: {}", peer, e),
                    },
                    Err(e) => log::debug!("connection from {} closed early: {}", peer, e),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::warn!("accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

/// Outbound link: a writer thread draining a bounded queue into a stream.
pub struct SendLink {
    pub peer_id: String,
    queue: Arc<OutboundQueue>,
    thread: Option<JoinHandle<()>>,
}

impl SendLink {
    pub fn spawn(peer_id: String, mut stream: TcpStream, queue_size: usize) -> Self {
        let queue = Arc::new(OutboundQueue::new(queue_size));
        let writer_queue = Arc::clone(&queue);
        let thread = std::thread::Builder::new()
            .name("rosrt-send".to_string())
            .spawn(move || loop {
                match writer_queue.pop(WRITER_POLL) {
                    Some(frame) => {
                        if let Err(e) = send_frame(&mut stream, &frame) {
                            log::debug!("send link closed: {}", e);
                            writer_queue.close();
                            return;
                        }
                    }
                    None => {
                        if writer_queue.is_closed() {
                            return;
                        }
                    }
                }
            })
            .ok();
        Self {
            peer_id,
            queue,
            thread,
        }
    }

    pub fn push(&self, frame: Vec<u8>) {
        self.queue.push(frame);
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn close(&mut self) {
        self.queue.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SendLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Frames received on an inbound link are handed to this sink on the link's
/// read thread.
pub type FrameSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Inbound link: connects to a publisher, performs the topic handshake, and
/// feeds frames to a sink. Reconnects with exponential backoff (capped at
/// 10 s) until closed.
pub struct ReceiveLink {
    pub uri: String,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReceiveLink {
    pub fn spawn(uri: String, handshake: Handshake, sink: FrameSink) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let link_uri = uri.clone();
        let thread = std::thread::Builder::new()
            .name("rosrt-recv".to_string())
            .spawn(move || receive_loop(link_uri, handshake, sink, flag))
            .ok();
        Self { uri, alive, thread }
    }

    pub fn close(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReceiveLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(uri: String, handshake: Handshake, sink: FrameSink, alive: Arc<AtomicBool>) {
    let mut backoff = Duration::from_millis(100);
    while alive.load(Ordering::Acquire) {
        match connect_and_read(&uri, &handshake, &sink, &alive) {
            Ok(()) => return,
            Err(e) => {
                if !alive.load(Ordering::Acquire) {
                    return;
                }
                log::debug!("link to {} lost ({}), retrying in {:?}", uri, e, backoff);
                interruptible_sleep(backoff, &alive);
                backoff = (backoff * 2).min(RECONNECT_CAP);
            }
        }
    }
}

fn interruptible_sleep(total: Duration, alive: &AtomicBool) {
    let step = Duration::from_millis(50);
    let mut remaining = total;
    while !remaining.is_zero() && alive.load(Ordering::Acquire) {
        let slice = remaining.min(step);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

fn connect_and_read(
    uri: &str,
    handshake: &Handshake,
    sink: &FrameSink,
    alive: &AtomicBool,
) -> Result<()> {
    let addr = uri_to_addr(uri)?;
    let mut stream = TcpStream::connect(&addr).map_err(|e| Error::TransportError(e.to_string()))?;
    let _ = stream.set_nodelay(true);
    let reply = client_handshake(&mut stream, handshake)?;
    if let Some(error) = reply.get("error") {
        // The publisher refused us; do not retry a rejected handshake.
        log::warn!("publisher at {} refused subscription: {}", uri, error);
        return Ok(());
    }
    // Bounded read slices so the loop can observe closure.
    let mut frames = FrameReader::new(stream, Duration::from_millis(100))
        .map_err(|e| Error::TransportError(e.to_string()))?;

    loop {
        if !alive.load(Ordering::Acquire) {
            return Ok(());
        }
        match frames.poll_frame() {
            Ok(Some(frame)) => sink(&frame),
            Ok(None) => {}
            Err(e) => return Err(Error::TransportError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn frame_roundtrip_over_a_socketpair() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let frame = read_frame(&mut stream).unwrap();
            send_frame(&mut stream, &frame).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        send_frame(&mut client, b"payload").unwrap();
        assert_eq!(read_frame(&mut client).unwrap(), b"payload");
        server.join().unwrap();
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        assert!(read_frame(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn listener_hands_handshakes_to_the_accept_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        let accept: AcceptFn = Arc::new(move |handshake, mut stream| {
            assert_eq!(handshake.get("topic"), Some("/t"));
            observed.fetch_add(1, Ordering::SeqCst);
            let _ = send_frame(&mut stream, &Handshake::new().with("ok", "1").to_frame());
        });
        let listener = Listener::spawn("test", accept).unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", listener.port())).unwrap();
        let reply =
            client_handshake(&mut stream, &Handshake::new().with("topic", "/t")).unwrap();
        assert_eq!(reply.get("ok"), Some("1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_link_delivers_queued_frames() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let a = read_frame(&mut stream).unwrap();
            let b = read_frame(&mut stream).unwrap();
            (a, b)
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut link = SendLink::spawn("peer".to_string(), stream, 8);
        link.push(vec![1, 2]);
        link.push(vec![3]);
        let (a, b) = reader.join().unwrap();
        assert_eq!(a, vec![1, 2]);
        assert_eq!(b, vec![3]);
        link.close();
    }
}
