use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use vigil_hub::Peer;
use vigil_protocol::Envelope;

use crate::app::AppState;
use crate::ws::transport::{WsSink, WsStream};

/// Axum handler: upgrades HTTP to WebSocket at GET /ws. Authorization has
/// already run as a route layer.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let limit = state.config.hub.max_message_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move { attach(socket, addr, &state) })
}

/// Hand the upgraded socket to the hub. The first frame the client sees is
/// the `initial` snapshot; from then on the hub owns the connection.
fn attach(socket: WebSocket, addr: SocketAddr, state: &AppState) {
    let (sink, stream) = socket.split();
    let peer = Peer::new(addr.to_string(), WsSink::new(sink), WsStream::new(stream));
    info!(peer_id = %peer.id(), remote_addr = %addr, "websocket upgraded");

    // taken by the hub at registration so no broadcast falls between the
    // snapshot and the peer's first queued envelope
    let store = Arc::clone(&state.store);
    state
        .hub
        .register_with_greeting(peer, move || Envelope::initial(store.snapshot()));
}
