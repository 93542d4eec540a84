//! WebSocket handler for appliance connections.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use bobolith_telemetry::log_connection_refused;
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use super::router::AppState;
use crate::error::ProblemDetails;
use crate::routing::{ConnectionRequest, SessionConfig};
use crate::session::{Frame, Session};

/// WebSocket endpoint handler.
///
/// The appliance is resolved before the upgrade, so refusals are plain
/// HTTP error responses.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(appliance_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let instance = format!("/ws/{}", appliance_id);

    let Ok(appliance_id) = Uuid::parse_str(&appliance_id) else {
        log_connection_refused!(path = %instance, "Refusing connection with malformed appliance id");
        return ProblemDetails::bad_request("appliance id must be a UUID")
            .with_instance(instance)
            .into_response();
    };

    let config = match state.router.resolve(ConnectionRequest::new(appliance_id)).await {
        Ok(config) => config,
        Err(e) => {
            log_connection_refused!(appliance_id = %appliance_id, reason = %e, "Refusing appliance connection");
            return ProblemDetails::from(e)
                .with_instance(instance)
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, config))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: AppState, mut config: SessionConfig) {
    let appliance_id = config.appliance_id;

    let mut lease = match state.sessions.acquire(appliance_id).await {
        Ok(lease) => lease,
        Err(e) => {
            tracing::info!(appliance_id = %appliance_id, reason = %e, "Dropping connection");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    // A previous session may have written since the request was resolved.
    match state.context.directory.get(appliance_id).await {
        Ok(Some(appliance)) => config.initial = appliance.record,
        Ok(None) => {
            tracing::warn!(appliance_id = %appliance_id, "Appliance removed before session start");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            tracing::warn!(appliance_id = %appliance_id, error = %e, "Using status read at resolve time");
        }
    }

    let (sender, receiver) = socket.split();

    let inbound = receiver.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
            Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
            // Binary frames carry nothing in this protocol; control frames
            // are answered by axum.
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => Some(Err(e)),
        }
    });

    let outbound = sender.with(|frame: Frame| async move {
        Ok::<_, axum::Error>(match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Close => Message::Close(None),
        })
    });

    let mut shutdown = state.shutdown.clone();
    let cancel = async {
        tokio::select! {
            _ = lease.superseded() => {}
            _ = shutdown.changed() => {}
        }
    };

    let session = Session::new(config, state.context.clone());
    session.run(inbound, outbound, cancel).await;

    // The next connection for this appliance may start now.
    drop(lease);
}
