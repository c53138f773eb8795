//! WebSocket boundary for the Concord game server.
//!
//! Payloads are validated into protocol enums here; everything past
//! this module speaks typed events on a per-room queue.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use concord_protocol::{ClientToServer, ServerToClient};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub mod broadcast;
pub mod config;
pub mod generator;
pub mod registry;
pub mod room;
pub mod vote;


use generator::ContentGenerator;
use room::RoomEvent;

type RoomSender = mpsc::UnboundedSender<RoomEvent>;

#[derive(Clone)]
pub struct AppState {
    rooms: Arc<Mutex<HashMap<String, RoomSender>>>,
    generator: Arc<ContentGenerator>,
}

impl AppState {
    pub fn new(generator: Arc<ContentGenerator>) -> Self {
        AppState {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            generator,
        }
    }

    fn room(&self, name: &str) -> RoomSender {
        let mut rooms = self.rooms.lock();
        if let Some(tx) = rooms.get(name) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let tx = room::spawn(name.to_string(), self.generator.clone());
        rooms.insert(name.to_string(), tx.clone());
        tx
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx_out, mut rx_out) = mpsc::unbounded_channel::<ServerToClient>();
    tokio::spawn(async move {
        while let Some(msg) = rx_out.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(err) => {
                    debug!(%err, "unserializable outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let conn_id = Uuid::new_v4();
    let _ = tx_out.send(ServerToClient::Hello { your_id: conn_id });

    let mut joined_room: Option<RoomSender> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientToServer>(&text) {
                Ok(cmd) => route_cmd(cmd, &state, &mut joined_room, conn_id, &tx_out),
                Err(_) => {
                    let _ = tx_out.send(ServerToClient::Error {
                        message: "bad json".into(),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(room) = &joined_room {
        let _ = room.send(RoomEvent::Leave { conn: conn_id });
    }
}

fn route_cmd(
    cmd: ClientToServer,
    state: &AppState,
    joined_room: &mut Option<RoomSender>,
    conn: Uuid,
    tx_out: &mpsc::UnboundedSender<ServerToClient>,
) {
    match cmd {
        ClientToServer::Join {
            room,
            player_id,
            name,
            role,
            x,
            y,
            viewport_width,
            viewport_height,
        } => {
            // Joining while joined means switching rooms.
            if let Some(old) = joined_room.take() {
                let _ = old.send(RoomEvent::Leave { conn });
            }
            let tx = state.room(&room);
            let _ = tx.send(RoomEvent::Join {
                conn,
                tx: tx_out.clone(),
                player_id,
                name,
                role,
                x,
                y,
                viewport_width,
                viewport_height,
            });
            *joined_room = Some(tx);
        }
        ClientToServer::Move { x, y } => {
            if let Some(room) = joined_room {
                let _ = room.send(RoomEvent::Move { conn, x, y });
            }
        }
        ClientToServer::Respond { text } => {
            if let Some(room) = joined_room {
                let _ = room.send(RoomEvent::Respond { conn, text });
            }
        }
        ClientToServer::Chat { text } => {
            if let Some(room) = joined_room {
                let _ = room.send(RoomEvent::Chat { conn, text });
            }
        }
        ClientToServer::Leave => {
            if let Some(room) = joined_room.take() {
                let _ = room.send(RoomEvent::Leave { conn });
            }
        }
    }
}
