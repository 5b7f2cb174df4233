//! Media-stream WebSocket endpoint.

use crate::registry::track_calls;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{future, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use voxline_types::media::{InboundEvent, OutboundEvent};

/// Outbound queue depth. A reply of several seconds is a few hundred
/// 20 ms chunks, so this absorbs one whole reply.
const OUTBOUND_BUFFER: usize = 512;

/// Handler for `GET /media-stream`.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let lifecycle = state.lifecycle.clone();
    ws.on_upgrade(move |socket| lifecycle.track(handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(OUTBOUND_BUFFER);

    let forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to serialize outbound event: {}", e);
                    continue;
                }
            };
            if sender.send(AxumMessage::Text(text.into())).await.is_err() {
                tracing::debug!("media stream sender closed");
                break;
            }
        }
    });

    // Shutdown ends the stream like a hangup, so the call still flushes.
    let lifecycle = state.lifecycle.clone();
    let inbound = receiver
        .take_while(|frame| {
            future::ready(!matches!(frame, Err(_) | Ok(AxumMessage::Close(_))))
        })
        .filter_map(|frame| future::ready(frame.ok().and_then(parse_frame)))
        .take_until(async move { lifecycle.stopping().await });
    let inbound = Box::pin(track_calls(state.registry.clone(), inbound));

    let summary = state.orchestrator.run(inbound, tx).await;

    if let Some(summary) = summary {
        state.registry.deregister(&summary.call_sid);
        tracing::debug!(
            call_sid = %summary.call_sid,
            active_calls = state.registry.len(),
            "call deregistered"
        );
    }

    // The orchestrator dropped its sender; let queued frames drain before
    // tearing the socket down.
    if let Err(e) = forward_task.await {
        if !e.is_cancelled() {
            tracing::warn!("media stream forwarder failed: {}", e);
        }
    }
}

/// Parses one WebSocket frame into a wire event. Malformed text frames are
/// logged and skipped.
fn parse_frame(frame: AxumMessage) -> Option<InboundEvent> {
    let AxumMessage::Text(text) = frame else {
        return None;
    };
    match serde_json::from_str::<InboundEvent>(text.as_str()) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed media-stream frame");
            None
        }
    }
}
