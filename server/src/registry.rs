//! Per-room player registry: identity, role, position, viewport, and the
//! outbound connection handle for each seated player.

use concord_protocol::{PublicPlayer, ServerToClient};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type Outbound = mpsc::UnboundedSender<ServerToClient>;

pub struct Player {
    pub conn: Uuid,
    pub player_id: Uuid,
    pub name: String,
    pub role: String,
    pub x: f64,
    pub y: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub tx: Outbound,
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("room is full ({capacity} players)")]
    RoomFull { capacity: usize },
}

/// Players in join order, keyed by connection id.
pub struct SessionRegistry {
    players: Vec<Player>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        SessionRegistry {
            players: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn join(&mut self, player: Player) -> Result<(), JoinError> {
        if self.players.len() >= self.capacity {
            return Err(JoinError::RoomFull {
                capacity: self.capacity,
            });
        }
        self.players.push(player);
        Ok(())
    }

    /// Updates a known connection's position. Returns false for unknown
    /// connections; stale movers are not an error to the caller.
    pub fn move_to(&mut self, conn: Uuid, x: f64, y: f64) -> bool {
        match self.players.iter_mut().find(|p| p.conn == conn) {
            Some(p) => {
                p.x = x;
                p.y = y;
                true
            }
            None => false,
        }
    }

    pub fn leave(&mut self, conn: Uuid) -> Option<Player> {
        let pos = self.players.iter().position(|p| p.conn == conn)?;
        Some(self.players.remove(pos))
    }

    pub fn get(&self, conn: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.conn == conn)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn snapshot(&self) -> Vec<PublicPlayer> {
        self.players
            .iter()
            .map(|p| PublicPlayer {
                id: p.player_id,
                name: p.name.clone(),
                role: p.role.clone(),
                x: p.x,
                y: p.y,
            })
            .collect()
    }

    pub fn roles(&self) -> Vec<String> {
        self.players.iter().map(|p| p.role.clone()).collect()
    }
}
