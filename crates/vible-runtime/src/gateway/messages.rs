use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use vible_core::model::NewMessage;
use vible_core::realtime::ConnectionId;

use super::auth::CallerId;
use super::response::{ApiError, ApiResponse};
use super::server::GatewayState;
use crate::realtime::ConnectionRegistry;

/// Releases the registry slot when the stream is dropped.
struct StreamGuard {
    registry: Arc<ConnectionRegistry>,
    user_id: String,
    connection_id: ConnectionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.registry.release(&self.user_id, self.connection_id) {
            tracing::debug!(
                user_id = %self.user_id,
                connection_id = %self.connection_id,
                "Stream closed"
            );
        }
    }
}

/// `GET /api/message/{user_id}`: open the user's live stream.
pub async fn subscribe(
    State(state): State<GatewayState>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let registry = state.dispatcher.registry().clone();
    let subscription = registry.connect(&user_id);
    tracing::info!(
        user_id = %user_id,
        connection_id = %subscription.connection_id,
        "Stream opened"
    );

    let guard = StreamGuard {
        registry,
        user_id,
        connection_id: subscription.connection_id,
    };

    let frames = ReceiverStream::new(subscription.frames).map(move |frame| {
        tracing::trace!(
            user_id = %guard.user_id,
            age_ms = (Utc::now() - frame.created_at()).num_milliseconds(),
            "Frame written"
        );
        Ok::<_, Infallible>(SseEvent::default().data(frame.data()))
    });
    let shutdown = state.shutdown.clone();
    let connected = SseEvent::default().comment("connected");
    let stream = stream::once(async move { Ok::<_, Infallible>(connected) })
        .chain(frames)
        .take_until(async move { shutdown.cancelled().await });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping"))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to_user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media_url: Option<String>,
}

/// `POST /api/message/send`
pub async fn send(
    State(state): State<GatewayState>,
    CallerId(user_id): CallerId,
    Json(body): Json<SendMessageRequest>,
) -> Result<ApiResponse, ApiError> {
    let message = state
        .dispatcher
        .create_message(NewMessage {
            from_user_id: user_id,
            to_user_id: body.to_user_id,
            text: body.text,
            media_url: body.media_url,
        })
        .await?;
    ApiResponse::json(&message)
}

#[derive(Debug, Deserialize)]
pub struct ThreadRequest {
    pub to_user_id: String,
}

/// `POST /api/message/get`: the thread with a peer; marks the peer's
/// messages as seen.
pub async fn thread(
    State(state): State<GatewayState>,
    CallerId(user_id): CallerId,
    Json(body): Json<ThreadRequest>,
) -> Result<ApiResponse, ApiError> {
    let messages = state.dispatcher.thread(&user_id, &body.to_user_id).await?;
    ApiResponse::json(&messages)
}

/// `GET /api/user/recent-messages`
pub async fn recent(
    State(state): State<GatewayState>,
    CallerId(user_id): CallerId,
) -> Result<ApiResponse, ApiError> {
    let messages = state.dispatcher.recent(&user_id).await?;
    ApiResponse::json(&messages)
}
