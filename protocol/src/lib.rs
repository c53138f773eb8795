use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// ---- Axes ----
///
/// Each axis is a labeled tension between a negative and a positive pole;
/// positions along it are always in [-1, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxisPair {
    pub neg: String,
    pub pos: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxisLabels {
    pub axis1: AxisPair,
    pub axis2: AxisPair,
}

impl Default for AxisLabels {
    fn default() -> Self {
        AxisLabels {
            axis1: AxisPair {
                neg: "Avoidance".to_string(),
                pos: "Approach".to_string(),
            },
            axis2: AxisPair {
                neg: "Self-reliance".to_string(),
                pos: "Collaboration".to_string(),
            },
        }
    }
}

/// The hidden target a round is scored against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdealPoint {
    pub axis1: f64,
    pub axis2: f64,
    pub action: String,
}

impl IdealPoint {
    pub fn clamped(mut self) -> Self {
        self.axis1 = clamp_axis(self.axis1);
        self.axis2 = clamp_axis(self.axis2);
        self
    }
}

/// ---- Votes ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamVote {
    pub axis1: f64,
    pub axis2: f64,
    pub samples: usize,
}

impl Default for TeamVote {
    fn default() -> Self {
        TeamVote {
            axis1: 0.0,
            axis2: 0.0,
            samples: 0,
        }
    }
}

pub fn clamp_axis(v: f64) -> f64 {
    v.clamp(-1.0, 1.0)
}

/// Round accuracy from the distance between the team vote and the hidden
/// ideal point: `max(0, 100 - 50 * distance)`.
pub fn accuracy(team: &TeamVote, ideal: &IdealPoint) -> f64 {
    let d1 = team.axis1 - ideal.axis1;
    let d2 = team.axis2 - ideal.axis2;
    let distance = (d1 * d1 + d2 * d2).sqrt();
    (100.0 - 50.0 * distance).max(0.0)
}

/// ---- Gauges ----
///
/// Running game metrics, each bounded to [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gauges {
    pub cohesion: f64,
    pub reputation: f64,
    pub volatility: f64,
}

impl Default for Gauges {
    fn default() -> Self {
        Gauges {
            cohesion: 50.0,
            reputation: 50.0,
            volatility: 50.0,
        }
    }
}

impl Gauges {
    pub fn clamp(&mut self) {
        self.cohesion = self.cohesion.clamp(0.0, 100.0);
        self.reputation = self.reputation.clamp(0.0, 100.0);
        self.volatility = self.volatility.clamp(0.0, 100.0);
    }
}

/// ---- Players ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicPlayer {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub x: f64,
    pub y: f64,
}

/// ---- Scenarios ----
///
/// The broadcast view of a live scenario: everything except the hidden
/// ideal point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicScenario {
    pub id: Uuid,
    pub text: String,
    pub axes: AxisLabels,
    pub started_at: String,
    pub duration_ms: u64,
    pub round: usize,
    pub total_rounds: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundOutcome {
    pub round: usize,
    pub scenario_text: String,
    pub axes: AxisLabels,
    pub team: TeamVote,
    pub ideal: IdealPoint,
    pub accuracy: f64,
    pub responses: usize,
}

/// ---- Messages ----
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientToServer {
    Join {
        room: String,
        player_id: Uuid,
        name: String,
        role: String,
        x: f64,
        y: f64,
        viewport_width: f64,
        viewport_height: f64,
    },
    Move {
        x: f64,
        y: f64,
    },
    Respond {
        text: String,
    },
    Chat {
        text: String,
    },
    Leave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerToClient {
    Hello {
        your_id: Uuid,
    },
    PlayerSnapshot {
        players: Vec<PublicPlayer>,
    },
    TeamVote {
        vote: TeamVote,
    },
    ScenarioLoading {
        round: usize,
        total_rounds: usize,
    },
    ScenarioNew {
        scenario: PublicScenario,
    },
    ScenarioResync {
        scenario: PublicScenario,
        remaining_ms: u64,
    },
    ScenarioEnd {
        scenario_id: Uuid,
    },
    ScoreLoading,
    ScoreDisplay {
        accuracy: f64,
        team: TeamVote,
        ideal: IdealPoint,
        ideal_feedback: String,
        team_feedback: String,
        gauges: Gauges,
        responses: usize,
    },
    GameComplete {
        final_score: f64,
        history: Vec<RoundOutcome>,
    },
    ChatMessage {
        player_name: String,
        text: String,
        timestamp: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_axis_bounds() {
        assert_eq!(clamp_axis(-3.2), -1.0);
        assert_eq!(clamp_axis(1.7), 1.0);
        assert_eq!(clamp_axis(0.25), 0.25);
    }

    #[test]
    fn accuracy_perfect_and_floor() {
        let ideal = IdealPoint {
            axis1: 0.5,
            axis2: -0.5,
            action: String::new(),
        };
        let exact = TeamVote {
            axis1: 0.5,
            axis2: -0.5,
            samples: 3,
        };
        assert_eq!(accuracy(&exact, &ideal), 100.0);

        // Opposite corners are further than 2 units apart, so the score
        // bottoms out at zero rather than going negative.
        let far = TeamVote {
            axis1: -1.0,
            axis2: 1.0,
            samples: 3,
        };
        assert_eq!(accuracy(&far, &ideal), 0.0);
    }

    #[test]
    fn gauges_clamp_to_bounds() {
        let mut g = Gauges {
            cohesion: 104.0,
            reputation: -3.0,
            volatility: 55.0,
        };
        g.clamp();
        assert_eq!(g.cohesion, 100.0);
        assert_eq!(g.reputation, 0.0);
        assert_eq!(g.volatility, 55.0);
    }

    #[test]
    fn ideal_point_clamped() {
        let p = IdealPoint {
            axis1: 2.4,
            axis2: -9.0,
            action: "hold".to_string(),
        }
        .clamped();
        assert_eq!(p.axis1, 1.0);
        assert_eq!(p.axis2, -1.0);
    }
}
