//! WebSocket media relay for one voice session
//!
//! Inbound binary frames are caller audio. Outbound binary frames are
//! synthesized audio; outbound text frames are JSON [`WsOutgoing`] events.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{ApiError, ApiState};
use crate::session::{Metadata, VoiceSession};

/// Outgoing WebSocket text message
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Relay attached to the session
    Connected { session_id: String },
    /// Assistant reply with derived metadata
    Response { text: String, metadata: Metadata },
    /// Provider failure inside the session
    Fault { message: String },
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/session/{session_id}", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let session = state.registry.get(&session_id).await?;
    match ws {
        Ok(ws) => Ok(ws.on_upgrade(move |socket| handle_socket(socket, session))),
        Err(rejection) => Ok(rejection.into_response()),
    }
}

async fn handle_socket(socket: WebSocket, session: Arc<VoiceSession>) {
    let session_id = session.id().to_string();
    let (mut sender, mut receiver) = socket.split();
    let mut outgoing = outgoing_frames(&session);

    let connected = WsOutgoing::Connected {
        session_id: session_id.clone(),
    };
    if let Ok(msg) = serde_json::to_string(&connected) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }

    tracing::info!(session_id = %session_id, "media relay connected");

    let send_id = session_id.clone();
    let closed = session.watch_closed();
    let mut send_task = tokio::spawn(async move {
        let session_closed = wait_closed(closed);
        tokio::pin!(session_closed);

        loop {
            let item = tokio::select! {
                () = &mut session_closed => {
                    tracing::info!(session_id = %send_id, "session ended, closing media relay");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                item = outgoing.next() => item,
            };
            let frame = match item {
                Some(Ok(Some(frame))) => frame,
                Some(Ok(None)) => continue,
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(session_id = %send_id, skipped, "media relay lagging, events skipped");
                    continue;
                }
                None => break,
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let recv_session = Arc::clone(&session);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    if let Err(e) = recv_session.send_audio(data).await {
                        tracing::warn!(session_id = %recv_session.id(), error = %e, "audio not forwarded");
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %recv_session.id(), "media relay closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(session_id = %session_id, "media relay disconnected");
}

type FrameStream = BoxStream<'static, Result<Option<Message>, BroadcastStreamRecvError>>;

/// Merge the session's output channels into one stream of outbound frames
fn outgoing_frames(session: &VoiceSession) -> futures::stream::SelectAll<FrameStream> {
    let audio = BroadcastStream::new(session.subscribe_audio())
        .map(|event| event.map(|e| Some(Message::Binary(e.audio))));
    let text = BroadcastStream::new(session.subscribe_text()).map(|event| {
        event.map(|e| {
            json_frame(&WsOutgoing::Response {
                text: e.text,
                metadata: e.metadata,
            })
        })
    });
    let faults = BroadcastStream::new(session.subscribe_faults())
        .map(|event| event.map(|f| json_frame(&WsOutgoing::Fault { message: f.message })));

    futures::stream::select_all([audio.boxed(), text.boxed(), faults.boxed()])
}

/// Resolve once the session starts shutting down (or is gone)
async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn json_frame(event: &WsOutgoing) -> Option<Message> {
    serde_json::to_string(event)
        .inspect_err(|e| tracing::error!(error = %e, "failed to encode relay event"))
        .ok()
        .map(|text| Message::Text(text.into()))
}
