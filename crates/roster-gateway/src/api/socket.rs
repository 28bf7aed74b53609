//! Realtime endpoint.
//!
//! Endpoint: GET /v1/socket
//!
//! Each upgraded connection is registered under a fresh `con_` ID and then
//! only receives: broadcasts queued by the registry are forwarded as text
//! frames until the peer goes away or the registry drops the connection.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::StreamExt;
use futures::SinkExt;

use roster_common::ids;

use crate::api::error::ApiError;
use crate::registry::Connection;
use crate::state::AppState;

/// Upgrades HTTP to WebSocket.
pub async fn handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let ws = ws.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket)))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let id = ids::connection_id();
    let (connection, mut outbound) = Connection::channel(id.clone());
    state.registry().add(connection);
    tracing::info!(connection_id = %id, "realtime client connected");

    loop {
        tokio::select! {
            // Frames queued by broadcasts
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Dropped by the registry (failed send or shutdown)
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "realtime read failed");
                        break;
                    }
                    _ => {} // Inbound frames carry no commands
                }
            }
        }
    }

    state.registry().remove(&id);
    tracing::info!(connection_id = %id, "realtime client disconnected");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use roster_common::auth::TokenAuthority;
    use tower::ServiceExt;

    use crate::gateway::{Gateway, Route, ServerSettings};
    use crate::store::MemoryUserStore;

    use super::*;

    #[tokio::test]
    async fn plain_get_is_rejected_with_envelope() {
        let state = AppState::new(
            TokenAuthority::new(b"secret", None).unwrap(),
            Arc::new(MemoryUserStore::new()),
        );
        let mut gw = Gateway::new(ServerSettings::default(), state);
        gw.register_route(Route::new("Socket", Method::GET, "/v1/socket", handler))
            .unwrap();

        let req = Request::builder().uri("/v1/socket").body(Body::empty()).unwrap();
        let resp = gw.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["requestId"].as_str().unwrap().starts_with("req_"));
        assert!(!body["message"].as_str().unwrap().is_empty());
    }
}
