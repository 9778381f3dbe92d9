use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::StreamExt as _;
use tracing::info;

use crate::registry::DisplayNode;

use super::http::AppState;

// Global event broadcaster for operator dashboards
lazy_static::lazy_static! {
    static ref EVENT_BROADCASTER: broadcast::Sender<WallEvent> = {
        let (tx, _) = broadcast::channel(100);
        tx
    };
}

#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WallEvent {
    ScreensUpdated {
        screens: Vec<DisplayNode>,
    },
    Error {
        message: String,
    },
}

pub async fn sse_handler(
    State(_state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected");

    let rx = EVENT_BROADCASTER.subscribe();

    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|result| {
        match result {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Ok(Event::default().event("wall-event").data(json))
            }
            Err(_) => {
                // Client lagged, send a sync event
                Ok(Event::default().event("sync-required").data("{}"))
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

pub fn broadcast_event(event: WallEvent) {
    let _ = EVENT_BROADCASTER.send(event);
}

pub fn notify_screens_updated(screens: Vec<DisplayNode>) {
    broadcast_event(WallEvent::ScreensUpdated { screens });
}

pub fn notify_error(message: String) {
    broadcast_event(WallEvent::Error { message });
}
