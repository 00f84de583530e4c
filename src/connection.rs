// Connection byte accounting
// A transport connection is reused by many requests (keep-alive) and its
// byte counters are never reset, so each request is charged the difference
// between the counters at its end and the counters left by the request
// before it. This file holds the connection handle shared with requests,
// the counting stream that feeds it, and the side table of per-connection
// accounting state.
//
// Numan Thabit 2025 Nov

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Runs once the connection has flushed; `true` when the flush succeeded,
/// `false` when the connection closed first.
type FlushHook = Box<dyn FnOnce(bool) + Send>;
type CloseHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Hooks {
    closed: bool,
    after_flush: Vec<FlushHook>,
    on_close: Vec<CloseHook>,
}

struct ConnectionShared {
    id: ConnectionId,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    hooks: Mutex<Hooks>,
}

/// Handle to a transport connection, inserted into the extensions of every
/// request served over it.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandle {
    pub fn new() -> Self {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            shared: Arc::new(ConnectionShared {
                id,
                bytes_read: AtomicU64::new(0),
                bytes_written: AtomicU64::new(0),
                hooks: Mutex::new(Hooks::default()),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Cumulative bytes read since the connection was established.
    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::Acquire)
    }

    /// Cumulative bytes written since the connection was established.
    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::Acquire)
    }

    pub fn record_read(&self, n: u64) {
        self.shared.bytes_read.fetch_add(n, Ordering::AcqRel);
    }

    pub fn record_written(&self, n: u64) {
        self.shared.bytes_written.fetch_add(n, Ordering::AcqRel);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.hooks.lock().closed
    }

    /// Run `hook` after the next successful flush, or at close if the
    /// connection goes away first. Runs immediately on a closed connection.
    pub fn after_flush(&self, hook: impl FnOnce(bool) + Send + 'static) {
        let hook = {
            let mut hooks = self.shared.hooks.lock();
            if !hooks.closed {
                hooks.after_flush.push(Box::new(hook));
                return;
            }
            hook
        };
        hook(false);
    }

    /// Run `hook` when the connection closes. Runs immediately on a closed
    /// connection.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        let hook = {
            let mut hooks = self.shared.hooks.lock();
            if !hooks.closed {
                hooks.on_close.push(Box::new(hook));
                return;
            }
            hook
        };
        hook();
    }

    /// Signal that everything written so far reached the socket.
    pub fn flushed(&self) {
        let pending = std::mem::take(&mut self.shared.hooks.lock().after_flush);
        for hook in pending {
            hook(true);
        }
    }

    /// Mark the connection closed and run every outstanding hook. Only the
    /// first call has any effect.
    pub fn close(&self) {
        let (pending, closing) = {
            let mut hooks = self.shared.hooks.lock();
            if hooks.closed {
                return;
            }
            hooks.closed = true;
            (
                std::mem::take(&mut hooks.after_flush),
                std::mem::take(&mut hooks.on_close),
            )
        };
        for hook in pending {
            hook(false);
        }
        for hook in closing {
            hook();
        }
    }
}

/// Wraps an io stream and feeds every byte moved through it into a
/// [`ConnectionHandle`]. Dropping the stream closes the handle.
pub struct CountingStream<S> {
    inner: S,
    conn: ConnectionHandle,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, conn: ConnectionHandle) -> Self {
        Self { inner, conn }
    }
}

impl<S> Drop for CountingStream<S> {
    fn drop(&mut self) {
        self.conn.close();
    }
}

impl<S> AsyncRead for CountingStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.conn.record_read((buf.filled().len() - before) as u64);
        }
        poll
    }
}

impl<S> AsyncWrite for CountingStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.conn.record_written(n as u64);
        }
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = poll {
            this.conn.record_written(n as u64);
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        if let Poll::Ready(Ok(())) = poll {
            this.conn.flushed();
        }
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Byte counters of a connection as seen when a request arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteBaseline {
    pub read: u64,
    pub written: u64,
}

/// Bytes attributable to a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteDelta {
    pub read: u64,
    pub written: u64,
}

/// Counters left on a connection by the last request that finished on it.
#[derive(Debug, Clone, Copy, Default)]
struct ConnectionAccountingState {
    last_bytes_read: u64,
    last_bytes_written: u64,
}

type StateTable = Arc<Mutex<HashMap<ConnectionId, ConnectionAccountingState>>>;

/// Side table of accounting state keyed by connection. An entry lives from
/// the first request seen on a connection until the connection closes.
#[derive(Clone, Default)]
pub struct ConnectionLedger {
    states: StateTable,
}

impl ConnectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `conn` unless it is tracked already. The state starts
    /// from the connection's origin, so the first request is charged every
    /// byte the connection has moved so far, its own request head included.
    pub fn attach_if_absent(&self, conn: &ConnectionHandle) {
        let id = conn.id();
        {
            let mut states = self.states.lock();
            if states.contains_key(&id) {
                return;
            }
            states.insert(id, ConnectionAccountingState::default());
        }
        debug!(connection = %id, "tracking connection");

        let states = Arc::downgrade(&self.states);
        conn.on_close(move || {
            if let Some(states) = states.upgrade() {
                ConnectionLedger { states }.release(id);
            }
        });
    }

    /// Snapshot the counters the previous request on `conn` left behind.
    pub fn begin_request(&self, conn: &ConnectionHandle) -> ByteBaseline {
        let states = self.states.lock();
        let state = states.get(&conn.id()).copied().unwrap_or_default();
        ByteBaseline {
            read: state.last_bytes_read,
            written: state.last_bytes_written,
        }
    }

    /// Charge the request everything since `baseline` and move the
    /// connection's state forward to the current counters.
    pub fn end_request(&self, conn: &ConnectionHandle, baseline: ByteBaseline) -> ByteDelta {
        let id = conn.id();
        let mut states = self.states.lock();
        let read = conn.bytes_read();
        let written = conn.bytes_written();
        if let Some(state) = states.get_mut(&id) {
            state.last_bytes_read = read;
            state.last_bytes_written = written;
        }
        ByteDelta {
            read: clamped_delta(id, "read", read, baseline.read),
            written: clamped_delta(id, "written", written, baseline.written),
        }
    }

    /// Drop the state of a connection. Runs when the connection closes.
    pub fn release(&self, id: ConnectionId) {
        if self.states.lock().remove(&id).is_some() {
            debug!(connection = %id, "released connection");
        }
    }

    pub fn is_tracked(&self, id: ConnectionId) -> bool {
        self.states.lock().contains_key(&id)
    }

    /// Number of connections currently tracked.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clamped_delta(id: ConnectionId, direction: &'static str, current: u64, baseline: u64) -> u64 {
    match current.checked_sub(baseline) {
        Some(delta) => delta,
        None => {
            warn!(
                connection = %id,
                direction = direction,
                current = current,
                baseline = baseline,
                "byte counter behind request baseline; clamping delta to zero"
            );
            0
        }
    }
}
