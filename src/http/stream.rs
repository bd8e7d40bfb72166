//! Server-sent streaming for `POST /agents/{name}/ask?stream=true`.
//!
//! Frames: `chunk` for each streamed piece of the reply, then exactly one
//! `done` (the final ask result) or `error` (`{error, statusCode}`).
//! Chunk ordering is preserved: the final frame is emitted only after the
//! chunk forwarder has drained.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::agents::ask;
use crate::errors::BridgeError;

use super::AppState;

/// One outbound SSE frame.
enum StreamFrame {
    Chunk(String),
    Done(ask::AskOutcome),
    Error(BridgeError),
}

impl StreamFrame {
    fn into_event(self) -> Event {
        let (name, data) = match self {
            Self::Chunk(chunk) => ("chunk", json!({ "chunk": chunk })),
            Self::Done(outcome) => (
                "done",
                serde_json::to_value(&outcome).unwrap_or_else(|_| json!({})),
            ),
            Self::Error(err) => (
                "error",
                json!({
                    "error": err.message(),
                    "statusCode": err.status_code().as_u16(),
                }),
            ),
        };
        Event::default().event(name).data(data.to_string())
    }
}

/// Run an ask with an attached chunk subscriber and stream the frames.
pub async fn ask_stream(state: Arc<AppState>, name: String, prompt: String) -> Response {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<StreamFrame>();
    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();

    // Forward chunks into the frame stream. Ends when the ask executor
    // deregisters the subscriber and the last sender drops.
    let chunk_frames = frame_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            if chunk_frames.send(StreamFrame::Chunk(chunk)).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let result = ask::ask(
            &state.agents,
            state.config.ask_timeout_ms,
            &name,
            &prompt,
            Some(chunk_tx),
            None,
        )
        .await;

        // All chunk senders are gone once the ask returns; wait for the
        // forwarder so the final frame lands after every chunk.
        if let Err(err) = forwarder.await {
            debug!(error = %err, "chunk forwarder ended abnormally");
        }

        let frame = match result {
            Ok(outcome) => StreamFrame::Done(outcome),
            Err(err) => StreamFrame::Error(err),
        };
        let _ = frame_tx.send(frame);
    });

    let stream = UnboundedReceiverStream::new(frame_rx)
        .map(|frame| Ok::<Event, Infallible>(frame.into_event()));
    Sse::new(stream).into_response()
}
