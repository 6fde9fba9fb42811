//! Live event stream.
//!
//! Each connected client is a subscriber on the live bus. While at least one
//! stream is attached (and no manual suspension is set) the host counts as
//! live and events are delivered here instead of the deferred spool.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::state::SharedState;

/// Creates the events router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(stream_events))
}

/// Subscribe to live events.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    operation_id = "streamEvents",
    summary = "Stream live events",
    description = "Server-Sent Events stream. The SSE event name is the bus event \
        (`regionDidEnter`, `regionDidExit`, `didDetermineState`, `beaconsDidRange`, \
        `beaconServiceConnected`) and the data is its JSON payload.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream",
            body = beaconwatch_core::BusEvent)
    )
)]
pub async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.bus.subscribe();
    info!(
        subscribers = state.bus.subscriber_count(),
        "Event stream attached"
    );

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default()
                    .event(&event.event)
                    .json_data(&event.payload)
                {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), receiver)),
                    Err(e) => warn!(event = %event.event, error = %e, "Dropping unencodable event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged, events dropped for this client");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let shutdown = state.shutdown.clone();
    let events = events.take_until(async move { shutdown.notified().await });

    Sse::new(events).keep_alive(KeepAlive::default())
}
