//! WebSocket endpoints.
//!
//! `/ws/:client_id` joins the relay as that client. Each connection gets a
//! writer task that drains the client's outbound queue into the socket while
//! the read half is fed to [`tandem_relay::run_session`].
//!
//! `/ws` is a plain echo endpoint kept for smoke-testing a deployment.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{future, Sink, SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tandem_relay::{run_session, ClientId, InboundEvent, OutboundMessage, RelayError};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Close code sent when a client id is already connected and duplicates are
/// rejected. 4000-4999 is the application range.
pub const CLOSE_DUPLICATE_CLIENT: u16 = 4009;

/// How long a closing connection gets to write what is still queued.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/:client_id", get(relay_handler))
        .route("/ws", get(echo_handler))
        .with_state(state)
}

/// GET /ws/:client_id
///
/// A non-numeric id is rejected by the path extractor before upgrading.
async fn relay_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<ClientId>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(client = %client_id, "Relay WebSocket connection request");

    ws.on_upgrade(move |socket| handle_relay_socket(socket, client_id, state))
}

/// Handle one relay connection from upgrade to teardown
async fn handle_relay_socket(socket: WebSocket, client_id: ClientId, state: Arc<AppState>) {
    let relay = &state.relay;
    let (handle, outbound) = relay.open_handle(state.shutdown.child_token());
    let (mut sink, stream) = socket.split();

    if let Err(e) = relay.connect(client_id, handle.clone()) {
        if matches!(e, RelayError::DuplicateClient(_)) {
            let close = Message::Close(Some(CloseFrame {
                code: CLOSE_DUPLICATE_CLIENT,
                reason: e.to_string().into(),
            }));
            if let Err(e) = sink.send(close).await {
                debug!(error = %e, "Failed to send duplicate client close frame");
            }
        } else {
            error!(client = %client_id, error = %e, "Failed to register client");
        }
        return;
    }
    info!(client = %client_id, session = %handle.session(), "Client connected");

    let writer = tokio::spawn(write_outbound(sink, outbound, handle.close_token()));

    let inbound = stream
        .take_while(|msg| {
            if let Err(e) = msg {
                warn!(error = %e, "WebSocket read error");
            }
            future::ready(msg.is_ok())
        })
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(InboundEvent::Text(text)),
                Ok(Message::Close(_)) => Some(InboundEvent::Close),
                Ok(Message::Binary(_)) => {
                    debug!("Ignoring binary WebSocket message");
                    None
                }
                // Pings are answered by axum; pongs need nothing
                _ => None,
            })
        });

    let summary = run_session(relay, client_id, handle.clone(), inbound).await;

    handle.close();
    if let Err(e) = writer.await {
        error!(client = %client_id, error = %e, "Writer task failed");
    }

    info!(
        client = %client_id,
        end = ?summary.end,
        frames = summary.frames_received,
        "Client disconnected"
    );
}

/// Drain `outbound` into the socket until the queue ends, a write fails or
/// `closed` fires.
///
/// A close interrupts a write that is stuck on a client that stopped
/// reading. Whatever was already queued is then flushed along with a close
/// frame, bounded by [`CLOSE_FLUSH_TIMEOUT`].
async fn write_outbound<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    closed: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            msg = outbound.recv() => msg,
        };
        let Some(msg) = msg else { break };

        let written = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            written = sink.send(Message::Text(msg.text)) => written,
        };
        if let Err(e) = written {
            debug!(error = %e, "Failed to write to WebSocket");
            // Closing the receiver makes later sends fail fast
            outbound.close();
            return;
        }
    }

    outbound.close();
    let flush = async {
        while let Ok(msg) = outbound.try_recv() {
            sink.send(Message::Text(msg.text)).await?;
        }
        sink.send(Message::Close(None)).await
    };
    match timeout(CLOSE_FLUSH_TIMEOUT, flush).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to flush WebSocket before close"),
        Err(_) => debug!("Client not reading, dropping connection without close frame"),
    }
}

/// GET /ws
async fn echo_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(handle_echo_socket)
}

/// Reply to each text frame with `Received message: <text>`.
async fn handle_echo_socket(socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = format!("Received message: {text}");
                if let Err(e) = sender.send(Message::Text(reply)).await {
                    error!(error = %e, "Failed to send WebSocket message");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Echo WebSocket close requested");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
        }
    }
}
