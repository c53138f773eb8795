//! Broadcast hub: authoritative snapshots and lifecycle events fan out
//! to every connected peer in a room. Always full snapshots, never
//! diffs; room sizes are small enough that consistency wins.

use crate::registry::SessionRegistry;
use concord_protocol::{ServerToClient, TeamVote};
use tracing::debug;
use uuid::Uuid;

pub fn send_all(registry: &SessionRegistry, msg: &ServerToClient) {
    for p in registry.players() {
        if p.tx.send(msg.clone()).is_err() {
            debug!(player = %p.name, "dropped outbound message");
        }
    }
}

pub fn send_to(registry: &SessionRegistry, conn: Uuid, msg: ServerToClient) {
    if let Some(p) = registry.get(conn) {
        let _ = p.tx.send(msg);
    }
}

pub fn snapshot(registry: &SessionRegistry) {
    send_all(
        registry,
        &ServerToClient::PlayerSnapshot {
            players: registry.snapshot(),
        },
    );
}

pub fn team_vote(registry: &SessionRegistry, vote: TeamVote) {
    send_all(registry, &ServerToClient::TeamVote { vote });
}
