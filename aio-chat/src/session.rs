//! One connection's lifecycle: `Unauthenticated → Active → Closed`.
//!
//! [`serve`] owns the socket for its whole life. It multiplexes the next
//! inbound frame against the next queued outbound line, so it is the only
//! writer to its peer and lines from one sender arrive in the order sent.
//! When the listener signals shutdown the session writes out whatever is
//! already queued, closes its side of the socket, and returns.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    select,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::{
    codec::{LoginReply, Message, encode_text},
    config::ServerConfig,
    error::RouteError,
    frame::{FrameReader, write_frame},
    registry::{ConnectionHandle, ConnectionId},
    router::Router,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Active { name: String },
    Closed,
}

/// The per-connection state machine, free of any I/O.
///
/// Frames go in through [`Session::handle_frame`]; the only thing that comes
/// back out is the login reply owed to this connection. Everything routed to
/// other connections goes through the [`Router`].
pub struct Session {
    handle: ConnectionHandle,
    router: Router,
    state: SessionState,
}

impl Session {
    pub fn new(handle: ConnectionHandle, router: Router) -> Self {
        Self {
            handle,
            router,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn name(&self) -> Option<&str> {
        match &self.state {
            SessionState::Active { name } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn handle_frame(&mut self, unit: &[u8]) -> Option<LoginReply> {
        match Message::decode(unit) {
            Ok(message) => self.handle_message(message),
            Err(error) => {
                warn!(peer = %self.handle.peer(), %error, "dropping frame");
                None
            }
        }
    }

    pub fn handle_message(&mut self, message: Message) -> Option<LoginReply> {
        match message {
            Message::Login { name } => self.login(name),
            Message::Direct { target, body } => {
                if self.ready_to_route(&body) {
                    let result = self.router.route_direct(self.id(), &target, &body);
                    self.log_route_error(result.err());
                }
                None
            }
            Message::Broadcast { body } => {
                if self.ready_to_route(&body) {
                    let result = self.router.route_broadcast(self.id(), &body);
                    self.log_route_error(result.err());
                }
                None
            }
        }
    }

    /// Unregisters the connection and enters `Closed`. Later calls do nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(name) = self.router.registry().unregister(self.id()) {
            info!(peer = %self.handle.peer(), %name, "client disconnected");
        }
        self.state = SessionState::Closed;
    }

    fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    fn login(&mut self, name: String) -> Option<LoginReply> {
        match &self.state {
            SessionState::Unauthenticated => {}
            SessionState::Active { name: current } => {
                warn!(
                    peer = %self.handle.peer(),
                    %current,
                    requested = %name,
                    "already logged in; ignoring login"
                );
                return None;
            }
            SessionState::Closed => return None,
        }

        if !self.router.registry().try_register(&name, &self.handle) {
            info!(peer = %self.handle.peer(), %name, "name already taken");
            return Some(LoginReply::NameTaken);
        }

        info!(peer = %self.handle.peer(), %name, "client logged in");
        self.state = SessionState::Active { name };
        Some(LoginReply::Accepted)
    }

    fn ready_to_route(&self, body: &str) -> bool {
        if self.name().is_none() {
            warn!(peer = %self.handle.peer(), "message before login; dropping");
            return false;
        }
        if body.trim().is_empty() {
            debug!(peer = %self.handle.peer(), "blank message; dropping");
            return false;
        }
        true
    }

    fn log_route_error(&self, error: Option<RouteError>) {
        if let Some(error) = error {
            debug!(peer = %self.handle.peer(), %error, "message not routed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs one connection until the peer leaves, an I/O error occurs, or `stop`
/// changes.
///
/// The connection is unregistered on every exit path, including
/// cancellation of this future.
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    peer: SocketAddr,
    router: Router,
    config: &ServerConfig,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (outbox, mut inbox) = mpsc::channel(config.outbox_capacity.max(1));
    let handle = ConnectionHandle::new(ConnectionId::next(), peer, outbox);
    let mut session = Session::new(handle, router);
    let mut frames = FrameReader::new(reader, config.max_frame_bytes);

    debug!(%peer, connection = %session.handle().id(), "session started");
    let result = run_session(&mut session, &mut frames, &mut inbox, &mut writer, &mut stop).await;
    session.close();

    result
}

async fn run_session<R, W>(
    session: &mut Session,
    frames: &mut FrameReader<R>,
    inbox: &mut mpsc::Receiver<String>,
    writer: &mut W,
    stop: &mut watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        select! {
            frame = frames.next_frame() => {
                let Some(unit) = frame.context("failed to read from client")? else {
                    break;
                };
                if let Some(reply) = session.handle_frame(&unit) {
                    write_frame(writer, &reply.encode())
                        .await
                        .context("failed to send login reply")?;
                }
            }
            Some(line) = inbox.recv() => {
                write_frame(writer, &encode_text(&line))
                    .await
                    .context("failed to deliver message to client")?;
            }
            // A dropped sender counts as a stop request too.
            _ = stop.changed() => {
                flush_outbox(inbox, writer).await?;
                break;
            }
        }
    }

    Ok(())
}

/// Writes every line already queued, then closes the write side.
async fn flush_outbox<W>(inbox: &mut mpsc::Receiver<String>, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Ok(line) = inbox.try_recv() {
        write_frame(writer, &encode_text(&line))
            .await
            .context("failed to deliver message to client")?;
    }
    writer
        .shutdown()
        .await
        .context("failed to close connection to client")
}
