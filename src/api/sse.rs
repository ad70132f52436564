//! SSE stream of conversation events

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::{AppError, AppState};
use crate::runtime::ConversationEvent;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Subscribe to a conversation. The first event is always a full snapshot;
/// a lagged subscriber is resynchronized with a fresh snapshot instead of
/// being dropped.
pub async fn conversation_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let runtime = state.conversations.get(id).await?;
    let (snapshot, mut receiver) = runtime.subscribe().await;
    tracing::debug!(conversation = %id, "stream subscriber attached");

    let stream = async_stream::stream! {
        yield Ok(to_sse_event(&snapshot));

        loop {
            match receiver.recv().await {
                Ok(event) => yield Ok(to_sse_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conversation = %id, skipped, "subscriber lagged; resyncing");
                    let (snapshot, fresh) = runtime.subscribe().await;
                    receiver = fresh;
                    yield Ok(to_sse_event(&snapshot));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}

fn to_sse_event(event: &ConversationEvent) -> Event {
    let name = match event {
        ConversationEvent::Snapshot { .. } => "snapshot",
        ConversationEvent::TurnAccepted { .. } => "turn_accepted",
        ConversationEvent::StreamStarted => "stream_started",
        ConversationEvent::Fragment { .. } => "fragment",
        ConversationEvent::TurnFailed { .. } => "turn_failed",
        ConversationEvent::Completed { .. } => "completed",
    };
    match Event::default().event(name).json_data(event) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(%error, "event did not serialize");
            Event::default().event("error").data("serialization failed")
        }
    }
}
