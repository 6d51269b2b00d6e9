//! Live event stream over WebSocket.
//!
//! GET /restaurants/{id}/events[?session_id=<id>]
//!
//! Server → client: one JSON `DomainEvent` envelope per text frame. When the
//! subscriber falls behind, a `{"type": "resync", "payload": {"missed": n}}`
//! frame tells the client to refetch its views before trusting further deltas.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use common::{RestaurantId, SessionId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use session_store::Repository;
use tokio::sync::broadcast;
use tokio::time::Duration;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub session_id: Option<SessionId>,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
enum ControlFrame {
    Resync { missed: u64 },
}

pub async fn subscribe<R: Repository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let restaurant_id: RestaurantId = parse_id("restaurant", &id)?;
    let receiver = state.engine.broadcaster().subscribe(restaurant_id);
    Ok(ws.on_upgrade(move |socket| {
        stream_events(socket, receiver, restaurant_id, query.session_id)
    }))
}

async fn stream_events(
    socket: WebSocket,
    mut receiver: broadcast::Receiver<domain::DomainEvent>,
    restaurant_id: RestaurantId,
    session_id: Option<SessionId>,
) {
    let (mut sink, mut stream) = socket.split();
    tracing::info!(%restaurant_id, ?session_id, "event stream connected");
    metrics::gauge!("event_stream_connections").increment(1.0);

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            event = receiver.recv() => {
                let frame = match event {
                    Ok(event) if session_id.is_some_and(|id| id != event.session_id()) => continue,
                    Ok(event) => serde_json::to_string(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(%restaurant_id, missed, "event stream lagged");
                        serde_json::to_string(&ControlFrame::Resync { missed })
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let text = match frame {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode event frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "event stream receive error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    metrics::gauge!("event_stream_connections").decrement(1.0);
    tracing::info!(%restaurant_id, "event stream disconnected");
}
