//! Drives the real WebSocket endpoint end to end: handshake, join,
//! move, and boundary validation of malformed payloads.

use async_trait::async_trait;
use concord_protocol::{ClientToServer, ServerToClient};
use concord_server::generator::{ContentGenerator, GenerateError, TextService};
use concord_server::{build_router, AppState};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct OfflineService;

#[async_trait]
impl TextService for OfflineService {
    async fn complete(&self, _prompt: &str) -> Result<String, GenerateError> {
        Err(GenerateError::Service("offline".into()))
    }
}

async fn start_server() -> String {
    let state = AppState::new(Arc::new(ContentGenerator::new(Arc::new(OfflineService))));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn next_where<F>(ws: &mut WsClient, pred: F) -> ServerToClient
where
    F: Fn(&ServerToClient) -> bool,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            let msg: ServerToClient = serde_json::from_str(&text).expect("unparsable message");
            if pred(&msg) {
                return msg;
            }
        }
    }
}

async fn send(ws: &mut WsClient, msg: &ClientToServer) {
    ws.send(Message::Text(serde_json::to_string(msg).unwrap()))
        .await
        .unwrap();
}

#[tokio::test]
async fn join_move_and_error_handling_over_a_real_socket() {
    let url = start_server().await;
    let (mut ws, _) = connect_async(&url).await.unwrap();

    let hello = next_where(&mut ws, |m| matches!(m, ServerToClient::Hello { .. })).await;
    assert!(matches!(hello, ServerToClient::Hello { .. }));

    send(
        &mut ws,
        &ClientToServer::Join {
            room: "lobby".to_string(),
            player_id: Uuid::new_v4(),
            name: "alice".to_string(),
            role: "scout".to_string(),
            x: 400.0,
            y: 300.0,
            viewport_width: 800.0,
            viewport_height: 600.0,
        },
    )
    .await;

    let snapshot = next_where(&mut ws, |m| {
        matches!(m, ServerToClient::PlayerSnapshot { .. })
    })
    .await;
    if let ServerToClient::PlayerSnapshot { players } = snapshot {
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "alice");
    }
    let vote = next_where(&mut ws, |m| matches!(m, ServerToClient::TeamVote { .. })).await;
    if let ServerToClient::TeamVote { vote } = vote {
        assert_eq!(vote.samples, 1);
        assert_eq!((vote.axis1, vote.axis2), (0.0, 0.0));
    }

    send(&mut ws, &ClientToServer::Move { x: 0.0, y: 0.0 }).await;
    let vote = next_where(
        &mut ws,
        |m| matches!(m, ServerToClient::TeamVote { vote } if vote.axis1 < 0.0),
    )
    .await;
    if let ServerToClient::TeamVote { vote } = vote {
        assert_eq!((vote.axis1, vote.axis2), (-1.0, -1.0));
    }

    // Malformed payloads are rejected at the boundary without killing
    // the connection.
    ws.send(Message::Text("{not json".to_string())).await.unwrap();
    let err = next_where(&mut ws, |m| matches!(m, ServerToClient::Error { .. })).await;
    if let ServerToClient::Error { message } = err {
        assert_eq!(message, "bad json");
    }

    send(&mut ws, &ClientToServer::Chat { text: "hi".to_string() }).await;
    let chat = next_where(&mut ws, |m| matches!(m, ServerToClient::ChatMessage { .. })).await;
    if let ServerToClient::ChatMessage { player_name, text, .. } = chat {
        assert_eq!(player_name, "alice");
        assert_eq!(text, "hi");
    }

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn two_connections_share_one_room() {
    let url = start_server().await;
    let (mut a, _) = connect_async(&url).await.unwrap();
    let (mut b, _) = connect_async(&url).await.unwrap();

    let join = |name: &str| ClientToServer::Join {
        room: "shared".to_string(),
        player_id: Uuid::new_v4(),
        name: name.to_string(),
        role: "scout".to_string(),
        x: 400.0,
        y: 300.0,
        viewport_width: 800.0,
        viewport_height: 600.0,
    };

    send(&mut a, &join("alice")).await;
    next_where(&mut a, |m| {
        matches!(m, ServerToClient::PlayerSnapshot { players } if players.len() == 1)
    })
    .await;

    send(&mut b, &join("bob")).await;
    next_where(&mut a, |m| {
        matches!(m, ServerToClient::PlayerSnapshot { players } if players.len() == 2)
    })
    .await;
    let vote = next_where(
        &mut a,
        |m| matches!(m, ServerToClient::TeamVote { vote } if vote.samples == 2),
    )
    .await;
    assert!(matches!(vote, ServerToClient::TeamVote { .. }));

    // A dropped socket leaves the room on the way out.
    b.close(None).await.unwrap();
    next_where(&mut a, |m| {
        matches!(m, ServerToClient::PlayerSnapshot { players } if players.len() == 1)
    })
    .await;
}
