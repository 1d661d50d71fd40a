//! The public client object.
//!
//! Every public call is turned into a unit on the sequential queue and
//! returns immediately. Transport completions arrive through the
//! completion router and are queued the same way, so the state machine only
//! ever runs on one unit at a time.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::generation::Epoch;
use super::handlers::HandlerSlot;
use super::machine::{Deferred, Driver, Machine};
use crate::config::Config;
use crate::encoding;
use crate::error::Error;
use crate::executor::{DelayTimer, SequentialQueue};
use crate::message::{CloseCode, MessageKind};
use crate::teardown::{DrainGate, TransportResource};
use crate::transport::{
    CompletionRouter, CompletionSink, CompletionTarget, Endpoint, HandleId, Transport,
    TransportError, TransportEvent,
};

/// State bound by a successful `initialize`.
struct Binding {
    endpoint: Endpoint,
    queue: SequentialQueue,
    timer: DelayTimer,
}

struct Inner {
    transport: Arc<dyn Transport>,
    router: Arc<CompletionRouter>,
    runtime: Option<Handle>,
    gate: DrainGate,
    machine: Mutex<Machine>,
    binding: OnceLock<Binding>,
    this: Weak<Inner>,
}

impl Inner {
    /// Queue `work` to run against the machine.
    fn submit<F>(&self, work: F)
    where
        F: FnOnce(&mut Machine, &dyn Driver) + Send + 'static,
    {
        let Some(binding) = self.binding.get() else {
            warn!("call ignored: websocket is not initialized");
            return;
        };
        let weak = self.this.clone();
        binding.queue.queue_work(move || {
            if let Some(inner) = weak.upgrade() {
                inner.execute(work);
            }
        });
    }

    /// Run `work` in the current unit.
    fn execute<F>(&self, work: F)
    where
        F: FnOnce(&mut Machine, &dyn Driver),
    {
        let Some(binding) = self.binding.get() else {
            return;
        };
        let ctx = Ctx {
            inner: self,
            binding,
        };
        let mut machine = self.machine.lock();
        work(&mut machine, &ctx);
    }

    fn initialize(&self, server: &str, port: u16, path: &str, secure: bool) -> bool {
        if server.is_empty() {
            warn!("initialize rejected: empty server name");
            return false;
        }
        if !path.starts_with('/') {
            warn!(path, "initialize rejected: path must start with '/'");
            return false;
        }
        let Some(runtime) = self.runtime.clone() else {
            warn!("initialize rejected: no tokio runtime");
            return false;
        };

        let binding = Binding {
            endpoint: Endpoint::new(server, port, path, secure),
            queue: SequentialQueue::new(runtime.clone()),
            timer: DelayTimer::new(runtime),
        };
        if self.binding.set(binding).is_err() {
            warn!("initialize rejected: already initialized");
            return false;
        }
        debug!(server, port, path, secure, "websocket initialized");
        true
    }

    fn connect(&self, delay: Duration) {
        self.submit(move |m, drv| m.connect(drv, delay));
    }

    fn abort(&self) {
        self.submit(|m, drv| m.abort(drv));
    }

    fn send(&self, data: Bytes, kind: MessageKind) {
        self.submit(move |m, drv| m.send(drv, data, kind));
    }

    fn send_encoded(&self, encoded: crate::Result<Bytes>, kind: MessageKind) {
        match encoded {
            Ok(data) => self.send(data, kind),
            Err(err) => self.submit(move |m, _| m.reject(err)),
        }
    }

    fn close(&self, code: CloseCode, reason: String) {
        self.submit(move |m, drv| m.close(drv, code, &reason));
    }

    fn register(&self, slot: HandlerSlot) {
        self.submit(move |m, _| m.set_handler(slot));
    }
}

impl CompletionTarget for Inner {
    fn on_completion(&self, handle: HandleId, event: TransportEvent) {
        if self.gate.is_draining() {
            trace!(%handle, event = event.name(), "completion discarded while draining");
            return;
        }
        self.submit(move |m, drv| m.on_event(drv, handle, event));
    }
}

/// The machine's view of its owner during one unit.
struct Ctx<'a> {
    inner: &'a Inner,
    binding: &'a Binding,
}

impl Driver for Ctx<'_> {
    fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    fn open(&self) -> Result<TransportResource, (HandleId, TransportError)> {
        let handle = HandleId::next();
        let owner: Weak<dyn CompletionTarget> = self.inner.this.clone();
        let latch = self.inner.router.register(handle, owner);
        let sink = CompletionSink::new(Arc::clone(&self.inner.router));

        match self
            .inner
            .transport
            .send_upgrade_request(handle, &self.binding.endpoint, sink)
        {
            Ok(()) => Ok(TransportResource::new(handle, latch)),
            Err(err) => {
                self.inner.router.unregister(handle);
                Err((handle, err))
            }
        }
    }

    fn release(&self, resource: TransportResource) {
        resource.release(self.inner.transport.as_ref(), &self.inner.gate);
    }

    fn defer(&self, deferred: Deferred) {
        trace!(?deferred, "deferred");
        self.inner.submit(move |m, drv| m.on_deferred(drv, deferred));
    }

    fn arm_timer(&self, delay: Duration, epoch: Epoch) {
        let weak = self.inner.this.clone();
        self.binding.timer.arm(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.submit(move |m, drv| m.on_deferred(drv, Deferred::ConnectTimer(epoch)));
            }
        });
    }
}

/// Asynchronous, callback-driven WebSocket client.
///
/// All operations except [`initialize`](Self::initialize) return after
/// queuing and report their outcome through the registered handlers. The
/// handlers run one at a time, in the order their stimuli were queued.
///
/// Use [`handle`](Self::handle) to get a controller that can be moved into
/// handlers.
///
/// # Dropping
///
/// Dropping a `WebSocket` cancels a pending delayed connect, releases the
/// transport handle and blocks until the transport confirms the release.
/// No handler runs afterwards. The runtime captured at construction must
/// still be running, and the drop must not happen inside a handler.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use cwsock::{TcpTransport, WebSocket};
///
/// let ws = WebSocket::new(Arc::new(TcpTransport::new()));
/// assert!(ws.initialize("echo.example.com", 80, "/", false));
/// let handle = ws.handle();
/// ws.on_open(move || handle.send_text("hello"))
///     .on_text_message(|text| println!("{text}"));
/// ws.connect(Duration::ZERO);
/// ```
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl WebSocket {
    /// Create a client over `transport` with the default [`Config`].
    ///
    /// Captures the current tokio runtime, if any; without one,
    /// [`initialize`](Self::initialize) fails.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, Config::default())
    }

    /// Create a client with a custom [`Config`].
    #[must_use]
    pub fn with_config(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self::with_router(transport, config, CompletionRouter::global())
    }

    pub(crate) fn with_router(
        transport: Arc<dyn Transport>,
        config: Config,
        router: Arc<CompletionRouter>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| Inner {
            transport,
            router,
            runtime: Handle::try_current().ok(),
            gate: DrainGate::new(),
            machine: Mutex::new(Machine::new(config.limits)),
            binding: OnceLock::new(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Bind the server identity.
    ///
    /// Returns `false` if already initialized, if no tokio runtime was
    /// available at construction, if `server` is empty, or if `path` does
    /// not start with `/`. After `false` the object should be discarded.
    pub fn initialize(&self, server: &str, port: u16, path: &str, secure: bool) -> bool {
        self.inner.initialize(server, port, path, secure)
    }

    /// Returns `true` once [`initialize`](Self::initialize) has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    /// The bound endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.inner.binding.get().map(|b| &b.endpoint)
    }

    /// Start a new connection attempt after `delay`.
    ///
    /// A zero delay aborts any existing connection and issues the upgrade
    /// right away. A non-zero delay releases the existing connection and
    /// arms a timer. Rejected with `on_error` while a delayed connect is
    /// pending.
    pub fn connect(&self, delay: Duration) {
        self.inner.connect(delay);
    }

    /// Drop the connection without a closing handshake.
    ///
    /// No close handlers run. Rejected with `on_error` unless an attempt is
    /// active.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Queue a message. At most one send is in flight; the rest wait.
    pub fn send(&self, data: impl Into<Bytes>, kind: MessageKind) {
        self.inner.send(data.into(), kind);
    }

    /// Queue a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) {
        self.inner.send(data.into(), MessageKind::Binary);
    }

    /// Queue a text message. Text containing NUL is rejected via `on_error`.
    pub fn send_text(&self, text: &str) {
        self.inner
            .send_encoded(encoding::text_to_bytes(text), MessageKind::Text);
    }

    /// Queue already UTF-8 encoded bytes as a text message, unvalidated.
    pub fn send_utf8(&self, data: impl Into<Bytes>) {
        self.inner.send(data.into(), MessageKind::Text);
    }

    /// Queue UTF-16 text as a text message.
    pub fn send_utf16(&self, units: &[u16]) {
        self.inner
            .send_encoded(encoding::utf16_to_bytes(units), MessageKind::Text);
    }

    /// Queue the raw little-endian UTF-16 code units as a binary message.
    pub fn send_utf16_as_binary(&self, units: &[u16]) {
        self.inner
            .send(encoding::utf16_le_bytes(units), MessageKind::Binary);
    }

    /// Start the closing handshake.
    ///
    /// The close frame is sent once every queued message has been sent.
    /// A reason longer than 123 bytes is rejected via `on_error`.
    pub fn close(&self, code: CloseCode, reason: &str) {
        self.inner.close(code, reason.to_owned());
    }

    /// Close with 1000 and no reason.
    pub fn close_normal(&self) {
        self.close(CloseCode::Normal, "");
    }

    /// A weak controller for use inside handlers.
    #[must_use]
    pub fn handle(&self) -> WebSocketHandle {
        WebSocketHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Handler for a completed upgrade.
    pub fn on_open<F>(&self, handler: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.register(HandlerSlot::Open(Box::new(handler)));
        self
    }

    /// Handler for complete binary messages.
    pub fn on_binary_message<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.inner
            .register(HandlerSlot::BinaryMessage(Box::new(handler)));
        self
    }

    /// Handler for complete text messages.
    pub fn on_text_message<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.inner.register(HandlerSlot::TextMessage(Box::new(handler)));
        self
    }

    /// Handler for the end of a closing handshake we started, or a reset
    /// after our close frame went out. Arguments: code, reason, was clean.
    pub fn on_close<F>(&self, handler: F) -> &Self
    where
        F: FnMut(CloseCode, Option<&str>, bool) + Send + 'static,
    {
        self.inner.register(HandlerSlot::Close(Box::new(handler)));
        self
    }

    /// Handler for a close frame from the peer, or a reset of an open
    /// connection. If it does not call `close`, the peer's status is echoed.
    pub fn on_closing<F>(&self, handler: F) -> &Self
    where
        F: FnMut(CloseCode, Option<&str>, bool) + Send + 'static,
    {
        self.inner.register(HandlerSlot::Closing(Box::new(handler)));
        self
    }

    /// Handler for the final notification of a connection.
    pub fn on_closed<F>(&self, handler: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.register(HandlerSlot::Closed(Box::new(handler)));
        self
    }

    /// Handler for failures and rejected operations.
    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&Error) + Send + 'static,
    {
        self.inner.register(HandlerSlot::Error(Box::new(handler)));
        self
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        let Some(binding) = self.inner.binding.get() else {
            return;
        };
        binding.timer.cancel();

        let inner = Arc::clone(&self.inner);
        binding
            .queue
            .queue_final(move || inner.execute(|m, drv| m.teardown(drv)));
        binding.queue.wait_for_drain();
        debug!("websocket torn down");
    }
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let machine = self.inner.machine.try_lock();
        f.debug_struct("WebSocket")
            .field("endpoint", &self.endpoint())
            .field("state", &machine.as_ref().map(|m| m.state()))
            .field("generation", &machine.as_ref().map(|m| m.epoch()))
            .finish()
    }
}

/// Weak controller for a [`WebSocket`].
///
/// Cloneable and safe to move into handlers. Calls become no-ops once the
/// owning `WebSocket` has been dropped.
#[derive(Clone)]
pub struct WebSocketHandle {
    inner: Weak<Inner>,
}

impl WebSocketHandle {
    fn with<F: FnOnce(&Inner)>(&self, f: F) {
        match self.inner.upgrade() {
            Some(inner) => f(&inner),
            None => trace!("call ignored: websocket dropped"),
        }
    }

    /// See [`WebSocket::connect`].
    pub fn connect(&self, delay: Duration) {
        self.with(|inner| inner.connect(delay));
    }

    /// See [`WebSocket::abort`].
    pub fn abort(&self) {
        self.with(Inner::abort);
    }

    /// See [`WebSocket::send`].
    pub fn send(&self, data: impl Into<Bytes>, kind: MessageKind) {
        let data = data.into();
        self.with(|inner| inner.send(data, kind));
    }

    /// See [`WebSocket::send_binary`].
    pub fn send_binary(&self, data: impl Into<Bytes>) {
        self.send(data, MessageKind::Binary);
    }

    /// See [`WebSocket::send_text`].
    pub fn send_text(&self, text: &str) {
        self.with(|inner| inner.send_encoded(encoding::text_to_bytes(text), MessageKind::Text));
    }

    /// See [`WebSocket::send_utf8`].
    pub fn send_utf8(&self, data: impl Into<Bytes>) {
        self.send(data, MessageKind::Text);
    }

    /// See [`WebSocket::send_utf16`].
    pub fn send_utf16(&self, units: &[u16]) {
        self.with(|inner| inner.send_encoded(encoding::utf16_to_bytes(units), MessageKind::Text));
    }

    /// See [`WebSocket::send_utf16_as_binary`].
    pub fn send_utf16_as_binary(&self, units: &[u16]) {
        self.with(|inner| inner.send(encoding::utf16_le_bytes(units), MessageKind::Binary));
    }

    /// See [`WebSocket::close`].
    pub fn close(&self, code: CloseCode, reason: &str) {
        self.with(|inner| inner.close(code, reason.to_owned()));
    }

    /// See [`WebSocket::close_normal`].
    pub fn close_normal(&self) {
        self.close(CloseCode::Normal, "");
    }

    /// Returns `true` while the owning `WebSocket` is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl std::fmt::Debug for WebSocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
