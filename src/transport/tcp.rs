//! Built-in transport over tokio TCP, with optional rustls.
//!
//! Each handle is served by one task that owns the socket. Calls on the
//! transport turn into commands for that task; the task reports outcomes
//! through the handle's [`CompletionSink`].

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{CompletionSink, Endpoint, HandleId, Transport, TransportError, TransportEvent};
use crate::config::Config;
use crate::error::Error;
use crate::message::{BufferKind, CloseStatus, MessageKind};
use crate::protocol::handshake::{
    ClientRequest, HandshakeResponse, MAX_RESPONSE_HEAD, find_header_end, generate_key,
};
use crate::protocol::mask::generate_mask;
use crate::protocol::{Frame, OpCode};
#[cfg(feature = "tls-rustls")]
use crate::tls::TlsConnector;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

type BoxStream = Box<dyn Stream>;

enum Command {
    ReceiveUpgrade,
    Receive,
    Send(Bytes, MessageKind),
    Close(u16, Bytes),
}

/// Per-handle state shared between the transport and the socket task.
struct Link {
    handle: HandleId,
    sink: CompletionSink,
    released: Mutex<bool>,
    close_status: Mutex<Option<CloseStatus>>,
}

impl Link {
    fn deliver(&self, event: TransportEvent) {
        let released = self.released.lock();
        if *released {
            trace!(handle = %self.handle, event = event.name(), "completion after release dropped");
            return;
        }
        self.sink.deliver(self.handle, event);
    }

    /// Deliver `HandleClosing`; nothing is delivered afterwards.
    fn finish(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.sink.deliver(self.handle, TransportEvent::HandleClosing);
    }
}

struct Session {
    commands: mpsc::UnboundedSender<Command>,
    link: Arc<Link>,
    task: JoinHandle<()>,
}

/// [`Transport`] speaking RFC 6455 over a tokio `TcpStream`.
///
/// Operations must be started from within a tokio runtime. `wss` endpoints
/// need the `tls-rustls` feature.
pub struct TcpTransport {
    config: Arc<Config>,
    sessions: Mutex<FxHashMap<HandleId, Session>>,
    #[cfg(feature = "tls-rustls")]
    tls: Result<TlsConnector, TransportError>,
}

impl TcpTransport {
    /// Transport with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Transport with custom configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Mutex::new(FxHashMap::default()),
            #[cfg(feature = "tls-rustls")]
            tls: TlsConnector::with_webpki_roots(),
        }
    }

    /// Number of handles not yet released.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.sessions.lock().len()
    }

    fn command(&self, handle: HandleId, command: Command) -> Result<(), TransportError> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        session
            .commands
            .send(command)
            .map_err(|_| TransportError::Closed)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("config", &self.config)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

impl Transport for TcpTransport {
    fn send_upgrade_request(
        &self,
        handle: HandleId,
        endpoint: &Endpoint,
        sink: CompletionSink,
    ) -> Result<(), TransportError> {
        let runtime = Handle::try_current()
            .map_err(|e| TransportError::Io(format!("no tokio runtime: {e}")))?;

        let link = Arc::new(Link {
            handle,
            sink,
            released: Mutex::new(false),
            close_status: Mutex::new(None),
        });
        let (commands, receiver) = mpsc::unbounded_channel();

        let connect = Connect {
            endpoint: endpoint.clone(),
            config: Arc::clone(&self.config),
            #[cfg(feature = "tls-rustls")]
            tls: self.tls.clone(),
        };
        let task = runtime.spawn(run(connect, Arc::clone(&link), receiver));

        debug!(%handle, server = %endpoint.server, port = endpoint.port, "upgrade started");
        self.sessions.lock().insert(
            handle,
            Session {
                commands,
                link,
                task,
            },
        );
        Ok(())
    }

    fn receive_upgrade_response(&self, handle: HandleId) -> Result<(), TransportError> {
        self.command(handle, Command::ReceiveUpgrade)
    }

    fn receive(&self, handle: HandleId) -> Result<(), TransportError> {
        self.command(handle, Command::Receive)
    }

    fn send(
        &self,
        handle: HandleId,
        data: Bytes,
        kind: MessageKind,
    ) -> Result<(), TransportError> {
        self.command(handle, Command::Send(data, kind))
    }

    fn close(&self, handle: HandleId, status: u16, reason: Bytes) -> Result<(), TransportError> {
        self.command(handle, Command::Close(status, reason))
    }

    fn query_close_status(&self, handle: HandleId) -> Result<CloseStatus, TransportError> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        let status = session.link.close_status.lock().clone();
        status.ok_or_else(|| TransportError::Io("no close frame received".into()))
    }

    fn release(&self, handle: HandleId) {
        let session = self.sessions.lock().remove(&handle);
        match session {
            Some(session) => {
                session.task.abort();
                session.link.finish();
                debug!(%handle, "handle released");
            }
            None => warn!(%handle, "release of unknown handle"),
        }
    }
}

struct Connect {
    endpoint: Endpoint,
    config: Arc<Config>,
    #[cfg(feature = "tls-rustls")]
    tls: Result<TlsConnector, TransportError>,
}

impl Connect {
    /// Connect, wrap in TLS if asked, and write the upgrade request.
    async fn open(&self) -> Result<(BoxStream, String), TransportError> {
        let tcp = TcpStream::connect((self.endpoint.server.as_str(), self.endpoint.port)).await?;
        tcp.set_nodelay(true)?;

        let mut stream: BoxStream = if self.endpoint.secure {
            self.wrap_tls(tcp).await?
        } else {
            Box::new(tcp)
        };

        let key = generate_key()?;
        let request = ClientRequest {
            host: self.endpoint.host_header(),
            path: self.endpoint.path.clone(),
            key: key.clone(),
            user_agent: Some(self.config.user_agent.clone()).filter(|agent| !agent.is_empty()),
        };
        let mut head = Vec::with_capacity(256);
        request.write(&mut head);
        stream.write_all(&head).await?;
        stream.flush().await?;
        Ok((stream, key))
    }

    #[cfg(feature = "tls-rustls")]
    async fn wrap_tls(&self, tcp: TcpStream) -> Result<BoxStream, TransportError> {
        let connector = self.tls.as_ref().map_err(Clone::clone)?;
        let stream = connector.connect(&self.endpoint.server, tcp).await?;
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls-rustls"))]
    async fn wrap_tls(&self, _tcp: TcpStream) -> Result<BoxStream, TransportError> {
        Err(TransportError::Tls(
            "secure endpoint requires the tls-rustls feature".into(),
        ))
    }
}

/// Read the response head; returns bytes that followed it.
async fn read_upgrade_response(
    stream: &mut BoxStream,
    key: &str,
) -> Result<BytesMut, TransportError> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_header_end(&buf) {
            let head = buf.split_to(end);
            HandshakeResponse::parse(&head)
                .and_then(|response| response.verify(key))
                .map_err(|e| TransportError::Upgrade(e.to_string()))?;
            return Ok(buf);
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(TransportError::Upgrade("response head too large".into()));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(TransportError::ConnectionReset);
        }
    }
}

async fn run(connect: Connect, link: Arc<Link>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let timeout = connect.config.timeouts.handshake;

    let opened = tokio::time::timeout(timeout, connect.open())
        .await
        .unwrap_or_else(|_| Err(TransportError::Io("handshake timed out".into())));
    let (mut stream, key) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            debug!(handle = %link.handle, error = %err, "upgrade request failed");
            link.deliver(TransportEvent::RequestError(err));
            return;
        }
    };
    link.deliver(TransportEvent::UpgradeRequestSent);

    match commands.recv().await {
        Some(Command::ReceiveUpgrade) => {}
        Some(_) => {
            link.deliver(TransportEvent::RequestError(TransportError::Upgrade(
                "operation issued before the upgrade completed".into(),
            )));
            return;
        }
        None => return,
    }

    let upgraded = tokio::time::timeout(timeout, read_upgrade_response(&mut stream, &key))
        .await
        .unwrap_or_else(|_| Err(TransportError::Io("handshake timed out".into())));
    let leftover = match upgraded {
        Ok(leftover) => leftover,
        Err(err) => {
            debug!(handle = %link.handle, error = %err, "upgrade response rejected");
            link.deliver(TransportEvent::RequestError(err));
            return;
        }
    };
    link.deliver(TransportEvent::UpgradeResponseReceived);

    let mut socket = Socket::new(stream, leftover, &connect.config, Arc::clone(&link));
    if let Err(err) = socket.serve(&mut commands).await {
        debug!(handle = %link.handle, error = %err, "connection failed");
        link.deliver(TransportEvent::RequestError(err));
    }
}

enum Flow {
    Continue,
    Finished,
}

enum Step {
    Command(Option<Command>),
    Read(std::io::Result<usize>),
}

/// An upgraded connection.
struct Socket {
    stream: BoxStream,
    buf: BytesMut,
    link: Arc<Link>,
    max_frame_size: usize,
    inbound: VecDeque<(Bytes, BufferKind)>,
    receive_pending: bool,
    fragment: Option<MessageKind>,
    close_sent: bool,
    close_received: bool,
}

impl Socket {
    fn new(stream: BoxStream, leftover: BytesMut, config: &Config, link: Arc<Link>) -> Self {
        let mut buf = BytesMut::with_capacity(config.read_buffer_size.max(leftover.len()));
        buf.extend_from_slice(&leftover);
        Self {
            stream,
            buf,
            link,
            max_frame_size: config.limits.max_frame_size,
            inbound: VecDeque::new(),
            receive_pending: false,
            fragment: None,
            close_sent: false,
            close_received: false,
        }
    }

    async fn serve(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), TransportError> {
        // Frames that arrived together with the handshake response.
        if let Flow::Finished = self.parse_frames().await? {
            return Ok(());
        }

        loop {
            self.complete_receive();

            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                read = self.stream.read_buf(&mut self.buf) => Step::Read(read),
            };

            let flow = match step {
                Step::Command(None) => return Ok(()),
                Step::Command(Some(command)) => self.on_command(command).await?,
                Step::Read(read) => {
                    if read? == 0 {
                        return Err(TransportError::ConnectionReset);
                    }
                    self.parse_frames().await?
                }
            };
            if let Flow::Finished = flow {
                trace!(handle = %self.link.handle, "closing handshake complete");
                return Ok(());
            }
        }
    }

    fn complete_receive(&mut self) {
        if !self.receive_pending {
            return;
        }
        if let Some((data, kind)) = self.inbound.pop_front() {
            self.receive_pending = false;
            self.link
                .deliver(TransportEvent::ReadComplete { data, kind });
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<Flow, TransportError> {
        match command {
            Command::ReceiveUpgrade => {
                self.link.deliver(TransportEvent::RequestError(TransportError::Upgrade(
                    "already upgraded".into(),
                )));
            }
            Command::Receive => {
                if self.close_sent {
                    self.link
                        .deliver(TransportEvent::RequestError(TransportError::Cancelled));
                } else {
                    self.receive_pending = true;
                }
            }
            Command::Send(data, kind) => {
                if self.close_sent {
                    self.link
                        .deliver(TransportEvent::RequestError(TransportError::Closed));
                } else {
                    self.write_frame(&Frame::new(true, OpCode::from(kind), data))
                        .await?;
                    self.link.deliver(TransportEvent::WriteComplete);
                }
            }
            Command::Close(code, reason) => {
                self.write_frame(&Frame::close(code, &reason)).await?;
                self.close_sent = true;
                self.inbound.clear();
                if std::mem::take(&mut self.receive_pending) {
                    self.link
                        .deliver(TransportEvent::RequestError(TransportError::Cancelled));
                }
                if self.close_received {
                    self.link.deliver(TransportEvent::CloseComplete);
                    return Ok(Flow::Finished);
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn parse_frames(&mut self) -> Result<Flow, TransportError> {
        loop {
            match Frame::parse(&self.buf, self.max_frame_size) {
                Ok((frame, used)) => {
                    self.buf.advance(used);
                    if let Flow::Finished = self.on_frame(frame).await? {
                        return Ok(Flow::Finished);
                    }
                }
                Err(Error::IncompleteFrame { .. }) => return Ok(Flow::Continue),
                Err(err) => return self.protocol_error(err).await,
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Flow, TransportError> {
        trace!(handle = %self.link.handle, opcode = %frame.opcode, len = frame.payload.len(), "frame");
        match frame.opcode {
            OpCode::Ping => {
                if !self.close_sent {
                    self.write_frame(&Frame::pong(frame.payload)).await?;
                }
            }
            OpCode::Pong => {}
            OpCode::Close => {
                let status = match frame.close_status() {
                    Ok(status) => status,
                    Err(err) => return self.protocol_error(err).await,
                };
                *self.link.close_status.lock() = Some(status);
                self.close_received = true;
                if self.close_sent {
                    self.link.deliver(TransportEvent::CloseComplete);
                    return Ok(Flow::Finished);
                }
                self.inbound.push_back((Bytes::new(), BufferKind::Close));
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if self.close_sent || self.close_received {
                    return Ok(Flow::Continue);
                }
                let kind = match (frame.opcode.message_kind(), self.fragment) {
                    (Some(kind), None) => kind,
                    (None, Some(kind)) => kind,
                    _ => {
                        return self
                            .protocol_error(Error::InvalidFrame(
                                "unexpected continuation state".into(),
                            ))
                            .await;
                    }
                };
                self.fragment = if frame.fin { None } else { Some(kind) };
                self.inbound
                    .push_back((frame.payload, BufferKind::for_data(kind, frame.fin)));
            }
        }
        Ok(Flow::Continue)
    }

    /// Fail the connection with 1002 after a malformed frame.
    async fn protocol_error(&mut self, err: Error) -> Result<Flow, TransportError> {
        warn!(handle = %self.link.handle, error = %err, "protocol violation from peer");
        if !self.close_sent {
            // Best effort; the connection is failing anyway.
            let _ = self.write_frame(&Frame::close(1002, b"")).await;
            self.close_sent = true;
        }
        Err(TransportError::Io(format!("protocol violation: {err}")))
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut out = BytesMut::with_capacity(frame.payload.len() + 14);
        frame.encode(Some(generate_mask()?), &mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
