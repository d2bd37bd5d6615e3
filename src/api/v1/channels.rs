//! Step progress stream for a request channel

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::api::state::AppState;
use crate::domain::notify::{StepEvent, StepPhase};

/// GET /v1/channels/{channel}/events
///
/// Server-sent events for every step start and end of requests started with
/// this `channel`. Only events published after the subscription are seen.
pub async fn channel_events(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(channel = %channel, "Channel subscriber connected");
    let receiver = state.notifier.subscribe();

    let stream = BroadcastStream::new(receiver).filter_map(move |received| {
        let event = match received {
            Ok(event) if event.channel == channel => to_sse(&event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "Channel subscriber lagged; events dropped");
                None
            }
        };
        std::future::ready(event.map(Ok))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &StepEvent) -> Option<Event> {
    let name = match event.phase {
        StepPhase::Start => "step_start",
        StepPhase::End => "step_end",
    };

    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!(error = %e, step = %event.step, "Failed to encode step event");
            None
        }
    }
}
