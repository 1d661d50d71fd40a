//! The connection lifecycle state machine.
//!
//! `Machine` is only ever touched by the unit the sequential queue is
//! currently running. Each stimulus (a public call, a transport completion
//! or a deferred continuation) produces at most one transition, at most one
//! transport call and at most one handler invocation. Follow-up work is
//! handed back to the queue through [`Driver::defer`] and is tagged with the
//! generation it was scheduled in.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::generation::{Epoch, Generation};
use super::handlers::{HandlerRegistry, HandlerSlot};
use super::state::ConnectionState;
use crate::config::Limits;
use crate::encoding;
use crate::error::{Error, Operation};
use crate::message::{BufferKind, CloseCode, MessageKind};
use crate::teardown::TransportResource;
use crate::transport::{HandleId, Transport, TransportError, TransportEvent};

/// What the machine needs from its owner.
pub(crate) trait Driver {
    fn transport(&self) -> &dyn Transport;

    /// Allocate a handle, route it to the owner and start the upgrade.
    ///
    /// On a synchronous start failure the route is already dropped.
    fn open(&self) -> Result<TransportResource, (HandleId, TransportError)>;

    /// Two-phase release of `resource`; blocks until the transport confirms.
    fn release(&self, resource: TransportResource);

    /// Run `deferred` after every unit that is already queued.
    fn defer(&self, deferred: Deferred);

    /// Arm the connect delay; expiry defers [`Deferred::ConnectTimer`].
    fn arm_timer(&self, delay: Duration, epoch: Epoch);
}

/// Continuations scheduled by the machine itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Deferred {
    /// The connect delay expired.
    ConnectTimer(Epoch),
    /// Echo the peer's close unless `on_closing` already called `close`.
    EchoClose {
        epoch: Epoch,
        code: CloseCode,
        reason: String,
    },
    /// Deliver `on_closed` unless a new attempt started meanwhile.
    Closed(Epoch),
}

/// Which side started the closing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initiator {
    Local,
    Remote,
}

/// The close frame we are about to send.
#[derive(Debug, Clone)]
pub(crate) struct CloseNegotiation {
    code: u16,
    reason: Bytes,
    initiator: Initiator,
}

struct PendingSend {
    data: Bytes,
    kind: MessageKind,
}

#[derive(Default)]
struct Assembly {
    buf: BytesMut,
    kind: Option<MessageKind>,
}

impl Assembly {
    fn clear(&mut self) {
        self.buf.clear();
        self.kind = None;
    }
}

pub(crate) struct Machine {
    state: ConnectionState,
    generation: Generation,
    resource: Option<TransportResource>,
    /// Head is in flight.
    sends: VecDeque<PendingSend>,
    assembly: Assembly,
    close: Option<CloseNegotiation>,
    handlers: HandlerRegistry,
    limits: Limits,
}

impl Machine {
    pub(crate) fn new(limits: Limits) -> Self {
        Self {
            state: ConnectionState::NoConnection,
            generation: Generation::new(),
            resource: None,
            sends: VecDeque::new(),
            assembly: Assembly::default(),
            close: None,
            handlers: HandlerRegistry::default(),
            limits,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.generation.current()
    }

    pub(crate) fn current_handle(&self) -> Option<HandleId> {
        self.resource.as_ref().map(|r| r.handle)
    }

    pub(crate) fn set_handler(&mut self, slot: HandlerSlot) {
        trace!(slot = slot.name(), "handler registered");
        self.handlers.set(slot);
    }

    // ---- public operations ----

    pub(crate) fn connect(&mut self, drv: &dyn Driver, delay: Duration) {
        if self.state == ConnectionState::ConnectPending {
            self.reject(Error::illegal(Operation::Connect, self.state));
            return;
        }

        self.release_current(drv);
        let epoch = self.generation.advance();
        debug!(%epoch, ?delay, "connect");

        if delay.is_zero() {
            self.start_attempt(drv);
        } else {
            self.transition(ConnectionState::ConnectPending);
            drv.arm_timer(delay, epoch);
        }
    }

    pub(crate) fn abort(&mut self, drv: &dyn Driver) {
        if !self.state.is_active() {
            self.reject(Error::illegal(Operation::Abort, self.state));
            return;
        }
        debug!(state = %self.state, "abort");
        self.release_current(drv);
        self.transition(ConnectionState::NoConnection);
    }

    pub(crate) fn send(&mut self, drv: &dyn Driver, data: Bytes, kind: MessageKind) {
        if !self.state.can_send() {
            self.reject(Error::illegal(Operation::Send, self.state));
            return;
        }
        self.sends.push_back(PendingSend { data, kind });
        if self.sends.len() == 1 {
            self.issue_send(drv);
        }
    }

    pub(crate) fn close(&mut self, drv: &dyn Driver, code: CloseCode, reason: &str) {
        if !self.state.can_send() {
            self.reject(Error::illegal(Operation::Close, self.state));
            return;
        }
        let reason = match encoding::text_to_bytes(reason) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.reject(err);
                return;
            }
        };
        if let Err(err) = self.limits.check_close_reason(reason.len()) {
            self.reject(err);
            return;
        }

        let (next, initiator) = if self.state == ConnectionState::WaitingForActivity {
            (ConnectionState::SendingLocalClose, Initiator::Local)
        } else {
            (ConnectionState::SendingRemoteClose, Initiator::Remote)
        };
        self.close = Some(CloseNegotiation {
            code: code.as_u16(),
            reason,
            initiator,
        });
        self.transition(next);

        if self.sends.is_empty() {
            self.issue_close(drv);
        }
    }

    /// Report a failure that leaves the state untouched.
    pub(crate) fn reject(&mut self, err: Error) {
        warn!(state = %self.state, error = %err, "operation rejected");
        self.handlers.error(&err);
    }

    /// Release the current resource for destruction.
    pub(crate) fn teardown(&mut self, drv: &dyn Driver) {
        debug!(state = %self.state, "teardown");
        self.release_current(drv);
    }

    // ---- transport completions ----

    pub(crate) fn on_event(&mut self, drv: &dyn Driver, handle: HandleId, event: TransportEvent) {
        if self.current_handle() != Some(handle) {
            trace!(%handle, event = event.name(), "stale completion discarded");
            return;
        }
        if matches!(
            self.state,
            ConnectionState::NoConnection | ConnectionState::ConnectPending
        ) || self.state.is_terminal()
        {
            trace!(%handle, event = event.name(), state = %self.state, "completion ignored");
            return;
        }
        trace!(%handle, event = event.name(), state = %self.state, "completion");

        match event {
            TransportEvent::UpgradeRequestSent => self.on_upgrade_sent(drv),
            TransportEvent::UpgradeResponseReceived => self.on_upgrade_received(drv),
            TransportEvent::ReadComplete { data, kind } => self.on_read(drv, data, kind),
            TransportEvent::WriteComplete => self.on_write_complete(drv),
            TransportEvent::CloseComplete => self.on_close_complete(drv),
            TransportEvent::RequestError(TransportError::Cancelled) => {
                trace!(%handle, "cancelled operation ignored");
            }
            TransportEvent::RequestError(TransportError::ConnectionReset) => {
                self.on_reset(drv);
            }
            TransportEvent::RequestError(err) => {
                let err = if self.state.is_handshaking() {
                    Error::ProtocolUpgradeFailure(err.to_string())
                } else {
                    Error::Transport(err)
                };
                self.fail(err);
            }
            // Consumed by the router.
            TransportEvent::HandleClosing => {}
        }
    }

    fn on_upgrade_sent(&mut self, drv: &dyn Driver) {
        if self.state != ConnectionState::SendingUpgradeRequest {
            return;
        }
        self.transition(ConnectionState::ReceivingUpgradeResponse);
        if let Some(handle) = self.current_handle() {
            if let Err(err) = drv.transport().receive_upgrade_response(handle) {
                self.fail(Error::ProtocolUpgradeFailure(err.to_string()));
            }
        }
    }

    fn on_upgrade_received(&mut self, drv: &dyn Driver) {
        if self.state != ConnectionState::ReceivingUpgradeResponse {
            return;
        }
        if !self.issue_receive(drv) {
            return;
        }
        self.transition(ConnectionState::WaitingForActivity);
        self.handlers.open();
    }

    fn on_read(&mut self, drv: &dyn Driver, data: Bytes, kind: BufferKind) {
        if !self.state.can_receive() {
            trace!(state = %self.state, len = data.len(), "inbound buffer discarded");
            return;
        }
        let Some(message_kind) = kind.message_kind() else {
            self.on_remote_close(drv);
            return;
        };

        let size = self.assembly.buf.len() + data.len();
        if let Err(err) = self.limits.check_message_size(size) {
            self.fail(err);
            return;
        }
        self.assembly.kind.get_or_insert(message_kind);
        self.assembly.buf.extend_from_slice(&data);

        if !kind.is_final() {
            self.issue_receive(drv);
            return;
        }

        let payload = self.assembly.buf.split().freeze();
        let message_kind = self.assembly.kind.take().unwrap_or(message_kind);
        match message_kind {
            MessageKind::Binary => {
                if self.issue_receive(drv) {
                    self.handlers.binary_message(&payload);
                }
            }
            MessageKind::Text => match encoding::bytes_to_text(&payload, payload.len()) {
                Ok(text) => {
                    if self.issue_receive(drv) {
                        self.handlers.text_message(&text);
                    }
                }
                Err(err) => self.fail(err),
            },
        }
    }

    fn on_remote_close(&mut self, drv: &dyn Driver) {
        let Some(handle) = self.current_handle() else {
            return;
        };
        let status = match drv.transport().query_close_status(handle) {
            Ok(status) => status,
            Err(err) => {
                self.fail(Error::Transport(err));
                return;
            }
        };
        let reason = match encoding::bytes_to_text(&status.reason, status.reason.len()) {
            Ok(reason) => reason,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        let code = CloseCode::from_u16(status.code);
        self.assembly.clear();

        if self.state == ConnectionState::SendingLocalClose {
            // Simultaneous close: our queued close frame becomes the echo.
            if let Some(close) = self.close.as_mut() {
                close.initiator = Initiator::Remote;
            }
            self.transition(ConnectionState::SendingRemoteClose);
            self.handlers.closing(code, non_empty(&reason), true);
            return;
        }

        self.transition(ConnectionState::ReceivedRemoteCloseFrame);
        self.handlers.closing(code, non_empty(&reason), true);
        drv.defer(Deferred::EchoClose {
            epoch: self.generation.current(),
            code,
            reason,
        });
    }

    fn on_write_complete(&mut self, drv: &dyn Driver) {
        if self.sends.pop_front().is_none() {
            trace!("write completion without pending send");
        }
        match self.state {
            ConnectionState::WaitingForActivity
            | ConnectionState::ReceivedRemoteCloseFrame
            | ConnectionState::SendingLocalClose
            | ConnectionState::SendingRemoteClose => {
                if !self.sends.is_empty() {
                    self.issue_send(drv);
                } else if self.state.is_draining_sends() {
                    self.issue_close(drv);
                }
            }
            _ => {}
        }
    }

    fn on_close_complete(&mut self, drv: &dyn Driver) {
        match self.state {
            ConnectionState::SentCloseFrameLocal => {
                let Some(handle) = self.current_handle() else {
                    return;
                };
                let status = match drv.transport().query_close_status(handle) {
                    Ok(status) => status,
                    Err(err) => {
                        self.fail(Error::Transport(err));
                        return;
                    }
                };
                let reason = match encoding::bytes_to_text(&status.reason, status.reason.len()) {
                    Ok(reason) => reason,
                    Err(err) => {
                        self.fail(err);
                        return;
                    }
                };
                self.transition(ConnectionState::Done);
                self.handlers
                    .close(CloseCode::from_u16(status.code), non_empty(&reason), true);
                drv.defer(Deferred::Closed(self.generation.current()));
            }
            ConnectionState::SentCloseFrameRemote => {
                self.transition(ConnectionState::Done);
                self.handlers.closed();
            }
            state => trace!(%state, "close completion ignored"),
        }
    }

    fn on_reset(&mut self, drv: &dyn Driver) {
        let previous = self.state;
        if previous.is_handshaking() {
            self.fail(Error::ProtocolUpgradeFailure(
                TransportError::ConnectionReset.to_string(),
            ));
            return;
        }
        if !previous.is_active() {
            trace!(state = %previous, "reset ignored");
            return;
        }

        debug!(state = %previous, "connection reset");
        self.sends.clear();
        self.assembly.clear();
        self.close = None;
        self.transition(ConnectionState::Done);
        match previous {
            ConnectionState::WaitingForActivity
            | ConnectionState::SendingLocalClose
            | ConnectionState::SendingRemoteClose => {
                self.handlers.closing(CloseCode::Abnormal, None, false);
            }
            ConnectionState::SentCloseFrameLocal => {
                self.handlers.close(CloseCode::Abnormal, None, false);
            }
            _ => {}
        }
        drv.defer(Deferred::Closed(self.generation.current()));
    }

    // ---- deferred continuations ----

    pub(crate) fn on_deferred(&mut self, drv: &dyn Driver, deferred: Deferred) {
        match deferred {
            Deferred::ConnectTimer(epoch) => {
                if self.generation.is_current(epoch)
                    && self.state == ConnectionState::ConnectPending
                {
                    self.start_attempt(drv);
                } else {
                    trace!(%epoch, "stale connect timer");
                }
            }
            Deferred::EchoClose {
                epoch,
                code,
                reason,
            } => {
                if self.generation.is_current(epoch)
                    && self.state == ConnectionState::ReceivedRemoteCloseFrame
                {
                    debug!(%code, "echoing peer close");
                    self.close(drv, code, &reason);
                }
            }
            Deferred::Closed(epoch) => {
                if self.generation.is_current(epoch) && self.state == ConnectionState::Done {
                    self.handlers.closed();
                } else {
                    trace!(%epoch, "stale closed notification");
                }
            }
        }
    }

    // ---- helpers ----

    fn start_attempt(&mut self, drv: &dyn Driver) {
        self.release_current(drv);
        self.transition(ConnectionState::SendingUpgradeRequest);
        match drv.open() {
            Ok(resource) => {
                debug!(handle = %resource.handle, "upgrade request issued");
                self.resource = Some(resource);
            }
            Err((handle, err)) => {
                debug!(%handle, error = %err, "upgrade request failed to start");
                self.fail(Error::ProtocolUpgradeFailure(err.to_string()));
            }
        }
    }

    fn release_current(&mut self, drv: &dyn Driver) {
        self.sends.clear();
        self.assembly.clear();
        self.close = None;
        if let Some(resource) = self.resource.take() {
            drv.release(resource);
        }
    }

    fn issue_send(&mut self, drv: &dyn Driver) {
        let (Some(handle), Some(head)) = (self.current_handle(), self.sends.front()) else {
            return;
        };
        let (data, kind) = (head.data.clone(), head.kind);
        if let Err(err) = drv.transport().send(handle, data, kind) {
            self.fail(Error::TransportSendFailure(err));
        }
    }

    fn issue_close(&mut self, drv: &dyn Driver) {
        let (Some(handle), Some(close)) = (self.current_handle(), self.close.clone()) else {
            return;
        };
        let next = match close.initiator {
            Initiator::Local => ConnectionState::SentCloseFrameLocal,
            Initiator::Remote => ConnectionState::SentCloseFrameRemote,
        };
        self.transition(next);
        if let Err(err) = drv.transport().close(handle, close.code, close.reason) {
            self.fail(Error::TransportSendFailure(err));
        }
    }

    /// Returns `false` if the receive could not be started.
    fn issue_receive(&mut self, drv: &dyn Driver) -> bool {
        let Some(handle) = self.current_handle() else {
            return false;
        };
        match drv.transport().receive(handle) {
            Ok(()) => true,
            Err(err) => {
                self.fail(Error::TransportReceiveFailure(err));
                false
            }
        }
    }

    /// Enter `Error` and report once for this attempt. An attempt that
    /// already ended in `Done` or `Error` stays silent.
    fn fail(&mut self, err: Error) {
        if self.state.is_terminal() {
            trace!(state = %self.state, error = %err, "failure after attempt ended");
            return;
        }
        debug!(state = %self.state, error = %err, "attempt failed");
        self.sends.clear();
        self.assembly.clear();
        self.close = None;
        self.transition(ConnectionState::Error);
        self.handlers.error(&err);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }
}

fn non_empty(reason: &str) -> Option<&str> {
    (!reason.is_empty()).then_some(reason)
}
