//! Connection handling logic for WebSocket clients.
//!
//! This module contains the per-connection task: handshake, authentication
//! at the session gate, the inbound read loop, the outbound writer, and the
//! cleanup that runs however the connection ends.

use crate::{
    auth::{HandshakeMetadata, SessionGate},
    connection::Frame,
    error::ServerError,
    lifecycle::LifecycleManager,
    security::{FrameGuard, SecurityConfig},
    shutdown::ShutdownState,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, trace};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Shared state every connection task needs.
pub struct ConnectionContext {
    pub gate: SessionGate,
    pub lifecycle: Arc<LifecycleManager>,
    pub security: SecurityConfig,
    pub idle_timeout: Option<Duration>,
    pub shutdown: ShutdownState,
}

fn close_message(code: CloseCode, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

/// Handles a single client connection from establishment to cleanup.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket handshake, capturing the bearer token
/// 2. Authenticate at the session gate; on failure close with a policy code
/// 3. Register the connection and open its session
/// 4. Spawn the outbound writer and run the inbound reader until the
///    socket closes or the writer ends
/// 5. Run disconnect cleanup, then give the writer a moment to flush
///
/// # Returns
///
/// `Ok(())` if the connection was handled successfully, or a `ServerError`
/// if the handshake failed.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ConnectionContext>,
) -> Result<(), ServerError> {
    let mut metadata = HandshakeMetadata::default();
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        metadata.authorization = request
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        metadata.query = request.uri().query().map(str::to_string);
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, capture)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (mut ws_sender, ws_receiver) = ws_stream.split();
    let lifecycle = &context.lifecycle;

    let identity = match context.gate.authenticate(&metadata).await {
        Ok(identity) => identity,
        Err(e) => {
            lifecycle.stats().auth_failed();
            debug!("🔒 Rejecting {}: {}", addr, e);
            let _ = ws_sender.send(close_message(CloseCode::Policy, "authentication failed")).await;
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };

    let (mailbox, outbox) = mpsc::unbounded_channel::<Frame>();
    let mut session = lifecycle.open_session(identity, addr, mailbox);
    let connection_id = session.connection_id;
    info!("👋 {} authenticated as {}", connection_id, session.user_id());

    // Outgoing message task - drains the mailbox into the socket
    let mut writer = tokio::spawn(write_loop(ws_sender, outbox, context.clone(), connection_id));

    // Incoming frames are applied in order; a handler always runs to completion
    read_loop(ws_receiver, &context, &mut session, &mut writer).await;

    lifecycle.disconnect(&mut session).await;
    if !writer.is_finished() && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
    Ok(())
}

/// How long the writer may keep flushing after cleanup.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

enum Inbound {
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Idle,
    WriterClosed,
}

async fn read_loop(
    mut ws_receiver: WsStream,
    context: &ConnectionContext,
    session: &mut crate::connection::ConnectionSession,
    writer: &mut JoinHandle<()>,
) {
    let mut guard = FrameGuard::new(&context.security);
    let connection_id = session.connection_id;
    loop {
        // Only the wait for the next frame is raced against the writer
        let inbound = tokio::select! {
            next = next_frame(&mut ws_receiver, context.idle_timeout) => next,
            _ = &mut *writer => Inbound::WriterClosed,
        };

        let next = match inbound {
            Inbound::Frame(next) => next,
            Inbound::Idle => {
                debug!("⏰ Connection {} idle, closing", connection_id);
                break;
            }
            Inbound::WriterClosed => {
                debug!("📭 Writer for {} ended, closing", connection_id);
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = guard.admit(text.len()) {
                    context.lifecycle.stats().event_dropped();
                    debug!("🚧 Dropping frame from {}: {}", connection_id, e);
                    continue;
                }
                context.lifecycle.handle_frame(session, text.as_str()).await;
            }
            Some(Ok(Message::Close(_))) => {
                debug!("🔌 Client {} requested close", connection_id);
                break;
            }
            Some(Ok(Message::Binary(_))) => {
                context.lifecycle.stats().event_dropped();
                trace!("Ignoring binary frame from {}", connection_id);
            }
            // Pings are answered by the protocol layer; pongs only reset the idle timer
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("WebSocket error for connection {}: {}", connection_id, e);
                break;
            }
            None => break,
        }
    }
}

async fn next_frame(ws_receiver: &mut WsStream, idle_timeout: Option<Duration>) -> Inbound {
    match idle_timeout {
        Some(idle) => match tokio::time::timeout(idle, ws_receiver.next()).await {
            Ok(next) => Inbound::Frame(next),
            Err(_) => Inbound::Idle,
        },
        None => Inbound::Frame(ws_receiver.next().await),
    }
}

async fn write_loop(
    mut ws_sender: WsSink,
    mut outbox: mpsc::UnboundedReceiver<Frame>,
    context: Arc<ConnectionContext>,
    connection_id: crate::types::ConnectionId,
) {
    let ping_every = context
        .idle_timeout
        .map(|idle| idle / 2)
        .unwrap_or(Duration::from_secs(3600))
        .max(Duration::from_millis(100));
    let mut ping = tokio::time::interval(ping_every);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = outbox.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_sender.send(Message::Text(frame.to_string().into())).await {
                    error!("Failed to send message to {}: {}", connection_id, e);
                    break;
                }
            }
            _ = ping.tick(), if context.idle_timeout.is_some() => {
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = context.shutdown.wait_for_shutdown() => {
                let _ = ws_sender.send(close_message(CloseCode::Away, "server shutting down")).await;
                break;
            }
        }
    }
    let _ = ws_sender.close().await;
}
