//! Lifecycle states of a client connection.

/// Connection state.
///
/// Exactly one state is active at a time. `NoConnection` is initial;
/// `Done` and `Error` end an attempt until the next `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No attempt has been started, or the last one was aborted.
    #[default]
    NoConnection,
    /// `connect` was called with a delay; the timer is armed.
    ConnectPending,
    /// The upgrade request is being written.
    SendingUpgradeRequest,
    /// Waiting for the upgrade response.
    ReceivingUpgradeResponse,
    /// Open; messages flow both ways.
    WaitingForActivity,
    /// Local close requested; draining queued sends before the close frame.
    SendingLocalClose,
    /// Local close frame issued; waiting for the peer's.
    SentCloseFrameLocal,
    /// The peer sent a close frame; `on_closing` has run.
    ReceivedRemoteCloseFrame,
    /// Echoing the peer's close; draining queued sends first.
    SendingRemoteClose,
    /// Echo close frame issued.
    SentCloseFrameRemote,
    /// The attempt ended, cleanly or by reset.
    Done,
    /// The attempt failed and `on_error` has run.
    Error,
}

impl ConnectionState {
    /// Returns `true` while a transport resource is in use for the attempt.
    ///
    /// `abort` is only legal in these states.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(
            self,
            ConnectionState::NoConnection
                | ConnectionState::ConnectPending
                | ConnectionState::Done
                | ConnectionState::Error
        )
    }

    /// Returns `true` if `send` and `close` are accepted.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(
            self,
            ConnectionState::WaitingForActivity | ConnectionState::ReceivedRemoteCloseFrame
        )
    }

    /// Returns `true` if inbound data is dispatched to the message handlers.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(
            self,
            ConnectionState::WaitingForActivity | ConnectionState::SendingLocalClose
        )
    }

    /// Returns `true` during the upgrade handshake.
    #[must_use]
    #[inline]
    pub const fn is_handshaking(&self) -> bool {
        matches!(
            self,
            ConnectionState::SendingUpgradeRequest | ConnectionState::ReceivingUpgradeResponse
        )
    }

    /// Returns `true` while a close is queued behind pending sends.
    #[must_use]
    #[inline]
    pub const fn is_draining_sends(&self) -> bool {
        matches!(
            self,
            ConnectionState::SendingLocalClose | ConnectionState::SendingRemoteClose
        )
    }

    /// Returns `true` for `Done` and `Error`.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Done | ConnectionState::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::NoConnection => "NoConnection",
            ConnectionState::ConnectPending => "ConnectPending",
            ConnectionState::SendingUpgradeRequest => "SendingUpgradeRequest",
            ConnectionState::ReceivingUpgradeResponse => "ReceivingUpgradeResponse",
            ConnectionState::WaitingForActivity => "WaitingForActivity",
            ConnectionState::SendingLocalClose => "SendingLocalClose",
            ConnectionState::SentCloseFrameLocal => "SentCloseFrameLocal",
            ConnectionState::ReceivedRemoteCloseFrame => "ReceivedRemoteCloseFrame",
            ConnectionState::SendingRemoteClose => "SendingRemoteClose",
            ConnectionState::SentCloseFrameRemote => "SentCloseFrameRemote",
            ConnectionState::Done => "Done",
            ConnectionState::Error => "Error",
        };
        f.write_str(name)
    }
}
