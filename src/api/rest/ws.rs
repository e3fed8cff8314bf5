use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::Event;
use crate::state::AppState;

type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

#[derive(Deserialize)]
pub struct WsQuery {
    pub party_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.party_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, party_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    let broadcasts: EventStream = Box::pin(
        BroadcastStream::new(state.hub.subscribe_broadcast())
            .filter_map(|event| async move { event.ok() }),
    );

    let mut connection = None;
    let mut events = match party_id {
        Some(party_id) => match state.hub.subscribe(party_id).await {
            Ok(subscription) => {
                connection = Some((subscription.party_id, subscription.connection_id));
                let direct: EventStream = Box::pin(ReceiverStream::new(subscription.events));
                Box::pin(futures::stream::select(direct, broadcasts)) as EventStream
            }
            Err(err) => {
                warn!(party_id = %party_id, error = %err, "websocket subscription failed");
                return;
            }
        },
        None => broadcasts,
    };

    info!(party_id = ?party_id, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some((party_id, connection_id)) = connection {
        state.hub.unsubscribe(party_id, connection_id).await;
    }
    info!(party_id = ?party_id, "websocket client disconnected");
}
