//! Per-room round controller.
//!
//! Each room is one actor task: every inbound client event, timer
//! expiry, and finished generation call arrives on the room's event
//! queue and is processed to completion before the next, so room state
//! needs no locking. Generation runs in detached tasks that post their
//! result back as an event; results and timers are tagged with the
//! controller's sequence number, and a stale tag is dropped rather than
//! applied over state committed after it.

use crate::broadcast;
use crate::config::{
    total_rounds, FIRST_ROUND_DELAY, GAUGE_AXIS_THRESHOLD, GAUGE_DELTA_COHESION,
    GAUGE_DELTA_REPUTATION, GAUGE_DELTA_VOLATILITY, INTER_ROUND_DELAY, RESPONSE_MAX_CHARS,
    ROOM_CAPACITY, ROUND_DURATIONS_MS,
};
use crate::generator::{ContentGenerator, FeedbackKind, RoundContent};
use crate::registry::{Outbound, Player, SessionRegistry};
use crate::vote;
use chrono::Utc;
use concord_protocol::{
    accuracy, AxisLabels, Gauges, IdealPoint, PublicScenario, RoundOutcome, ServerToClient,
    TeamVote,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub enum RoomEvent {
    Join {
        conn: Uuid,
        tx: Outbound,
        player_id: Uuid,
        name: String,
        role: String,
        x: f64,
        y: f64,
        viewport_width: f64,
        viewport_height: f64,
    },
    Move {
        conn: Uuid,
        x: f64,
        y: f64,
    },
    Respond {
        conn: Uuid,
        text: String,
    },
    Chat {
        conn: Uuid,
        text: String,
    },
    Leave {
        conn: Uuid,
    },
    StartLoading {
        seq: u64,
    },
    ContentReady {
        seq: u64,
        content: RoundContent,
    },
    Deadline {
        seq: u64,
    },
    FeedbackReady {
        seq: u64,
        ideal_feedback: String,
        team_feedback: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Active,
    Scoring,
}

struct Scenario {
    id: Uuid,
    text: String,
    axes: AxisLabels,
    ideal: IdealPoint,
    started_at: Instant,
    started_at_wall: String,
    duration: Duration,
    responses: HashMap<Uuid, String>,
    used_fallback: bool,
}

struct RoundState {
    round: usize,
    gauges: Gauges,
    history: Vec<RoundOutcome>,
}

impl RoundState {
    fn new() -> Self {
        RoundState {
            round: 0,
            gauges: Gauges::default(),
            history: Vec::new(),
        }
    }

    fn reset(&mut self) {
        *self = RoundState::new();
    }
}

/// Held between countdown expiry and the feedback generation resolving:
/// the scenario is no longer live but its data still scores the round.
struct PendingScore {
    scenario: Scenario,
    team: TeamVote,
    accuracy: f64,
}

pub struct Room {
    name: String,
    registry: SessionRegistry,
    phase: Phase,
    scenario: Option<Scenario>,
    round: RoundState,
    pending_score: Option<PendingScore>,
    seq: u64,
    timer: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<RoomEvent>,
    generator: Arc<ContentGenerator>,
}

/// Spawns the room actor and returns its event queue.
pub fn spawn(name: String, generator: Arc<ContentGenerator>) -> mpsc::UnboundedSender<RoomEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let room = Room {
        name,
        registry: SessionRegistry::new(ROOM_CAPACITY),
        phase: Phase::Idle,
        scenario: None,
        round: RoundState::new(),
        pending_score: None,
        seq: 0,
        timer: None,
        tx: tx.clone(),
        generator,
    };
    tokio::spawn(room.run(rx));
    tx
}

impl Room {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomEvent>) {
        while let Some(ev) = rx.recv().await {
            self.handle(ev);
        }
    }

    fn handle(&mut self, ev: RoomEvent) {
        match ev {
            RoomEvent::Join {
                conn,
                tx,
                player_id,
                name,
                role,
                x,
                y,
                viewport_width,
                viewport_height,
            } => self.on_join(
                conn,
                tx,
                player_id,
                name,
                role,
                x,
                y,
                viewport_width,
                viewport_height,
            ),
            RoomEvent::Move { conn, x, y } => self.on_move(conn, x, y),
            RoomEvent::Respond { conn, text } => self.on_respond(conn, text),
            RoomEvent::Chat { conn, text } => self.on_chat(conn, text),
            RoomEvent::Leave { conn } => self.on_leave(conn),
            RoomEvent::StartLoading { seq } => self.on_start_loading(seq),
            RoomEvent::ContentReady { seq, content } => self.on_content_ready(seq, content),
            RoomEvent::Deadline { seq } => self.on_deadline(seq),
            RoomEvent::FeedbackReady {
                seq,
                ideal_feedback,
                team_feedback,
            } => self.on_feedback_ready(seq, ideal_feedback, team_feedback),
        }
    }

    /* ---------------- client events ---------------- */

    #[allow(clippy::too_many_arguments)]
    fn on_join(
        &mut self,
        conn: Uuid,
        tx: Outbound,
        player_id: Uuid,
        name: String,
        role: String,
        x: f64,
        y: f64,
        viewport_width: f64,
        viewport_height: f64,
    ) {
        let was_empty = self.registry.is_empty();
        let player = Player {
            conn,
            player_id,
            name,
            role,
            x,
            y,
            viewport_width,
            viewport_height,
            tx: tx.clone(),
        };
        if let Err(err) = self.registry.join(player) {
            let _ = tx.send(ServerToClient::Error {
                message: err.to_string(),
            });
            return;
        }
        info!(room = %self.name, %conn, players = self.registry.len(), "player joined");
        broadcast::snapshot(&self.registry);
        self.broadcast_vote();

        // Late joiners see the live round without racing the timer.
        if let Some(sc) = &self.scenario {
            let remaining = sc.duration.saturating_sub(sc.started_at.elapsed());
            broadcast::send_to(
                &self.registry,
                conn,
                ServerToClient::ScenarioResync {
                    scenario: self.public_scenario(sc),
                    remaining_ms: remaining.as_millis() as u64,
                },
            );
        } else if self.phase == Phase::Loading {
            broadcast::send_to(
                &self.registry,
                conn,
                ServerToClient::ScenarioLoading {
                    round: self.round.round,
                    total_rounds: total_rounds(),
                },
            );
        }

        if was_empty && self.phase == Phase::Idle && self.timer.is_none() {
            self.arm_timer(FIRST_ROUND_DELAY, |seq| RoomEvent::StartLoading { seq });
        }
    }

    fn on_move(&mut self, conn: Uuid, x: f64, y: f64) {
        if !self.registry.move_to(conn, x, y) {
            return;
        }
        broadcast::snapshot(&self.registry);
        self.broadcast_vote();
    }

    fn on_respond(&mut self, conn: Uuid, text: String) {
        if self.phase != Phase::Active || self.registry.get(conn).is_none() {
            return;
        }
        let Some(sc) = self.scenario.as_mut() else {
            return;
        };
        let text: String = text.chars().take(RESPONSE_MAX_CHARS).collect();
        sc.responses.insert(conn, text);
    }

    fn on_chat(&mut self, conn: Uuid, text: String) {
        let Some(player) = self.registry.get(conn) else {
            return;
        };
        broadcast::send_all(
            &self.registry,
            &ServerToClient::ChatMessage {
                player_name: player.name.clone(),
                text,
                timestamp: Utc::now().to_rfc3339(),
            },
        );
    }

    fn on_leave(&mut self, conn: Uuid) {
        let Some(player) = self.registry.leave(conn) else {
            return;
        };
        if let Some(sc) = self.scenario.as_mut() {
            sc.responses.remove(&conn);
        }
        info!(room = %self.name, %conn, player = %player.name, "player left");

        if self.registry.is_empty() {
            // An empty room must never reach Loading; drop everything
            // scheduled and park in Idle until the next first join.
            self.clear_timer();
            self.seq += 1;
            self.scenario = None;
            self.pending_score = None;
            self.round.reset();
            self.phase = Phase::Idle;
            return;
        }
        broadcast::snapshot(&self.registry);
        self.broadcast_vote();
    }

    /* ---------------- round lifecycle ---------------- */

    fn on_start_loading(&mut self, seq: u64) {
        if seq != self.seq {
            debug!(room = %self.name, "stale round trigger dropped");
            return;
        }
        if self.registry.is_empty() {
            return;
        }
        self.seq += 1;
        self.clear_timer();
        self.phase = Phase::Loading;
        broadcast::send_all(
            &self.registry,
            &ServerToClient::ScenarioLoading {
                round: self.round.round,
                total_rounds: total_rounds(),
            },
        );

        let generator = self.generator.clone();
        let tx = self.tx.clone();
        let seq = self.seq;
        let roles = self.registry.roles();
        tokio::spawn(async move {
            let content = generator.round_content(&roles).await;
            let _ = tx.send(RoomEvent::ContentReady { seq, content });
        });
    }

    fn on_content_ready(&mut self, seq: u64, content: RoundContent) {
        if seq != self.seq {
            debug!(room = %self.name, "stale round content dropped");
            return;
        }
        self.seq += 1;
        let duration = Duration::from_millis(ROUND_DURATIONS_MS[self.round.round]);
        let scenario = Scenario {
            id: Uuid::new_v4(),
            text: content.text,
            axes: content.axes,
            ideal: content.ideal,
            started_at: Instant::now(),
            started_at_wall: Utc::now().to_rfc3339(),
            duration,
            responses: HashMap::new(),
            used_fallback: content.used_fallback,
        };
        if scenario.used_fallback {
            info!(room = %self.name, round = self.round.round, "round content used fallback");
        }
        broadcast::send_all(
            &self.registry,
            &ServerToClient::ScenarioNew {
                scenario: self.public_scenario(&scenario),
            },
        );
        self.scenario = Some(scenario);
        self.phase = Phase::Active;
        self.arm_timer(duration, |seq| RoomEvent::Deadline { seq });
        info!(room = %self.name, round = self.round.round, ?duration, "round active");
    }

    fn on_deadline(&mut self, seq: u64) {
        if seq != self.seq {
            debug!(room = %self.name, "stale countdown dropped");
            return;
        }
        let Some(scenario) = self.scenario.take() else {
            // The sequence guard keeps countdowns and scenarios paired;
            // an unpaired expiry means the round was already torn down.
            warn!(room = %self.name, "countdown expired without a live scenario");
            return;
        };
        self.seq += 1;
        self.clear_timer();
        self.phase = Phase::Scoring;

        let team = vote::recompute(&self.registry);
        let score = accuracy(&team, &scenario.ideal);
        self.apply_gauges(&team);
        self.round.history.push(RoundOutcome {
            round: self.round.round,
            scenario_text: scenario.text.clone(),
            axes: scenario.axes.clone(),
            team: team.clone(),
            ideal: scenario.ideal.clone(),
            accuracy: score,
            responses: scenario.responses.len(),
        });
        info!(
            room = %self.name,
            round = self.round.round,
            accuracy = score,
            samples = team.samples,
            "round scored"
        );

        broadcast::send_all(
            &self.registry,
            &ServerToClient::ScenarioEnd {
                scenario_id: scenario.id,
            },
        );
        broadcast::send_all(&self.registry, &ServerToClient::ScoreLoading);

        let generator = self.generator.clone();
        let tx = self.tx.clone();
        let seq = self.seq;
        let text = scenario.text.clone();
        let axes = scenario.axes.clone();
        let ideal_point = (scenario.ideal.axis1, scenario.ideal.axis2);
        let team_point = (team.axis1, team.axis2);
        self.pending_score = Some(PendingScore {
            scenario,
            team,
            accuracy: score,
        });
        tokio::spawn(async move {
            let (ideal_feedback, team_feedback) = tokio::join!(
                generator.feedback(&text, &axes, ideal_point, FeedbackKind::IdealExplanation),
                generator.feedback(&text, &axes, team_point, FeedbackKind::ActualExplanation),
            );
            let _ = tx.send(RoomEvent::FeedbackReady {
                seq,
                ideal_feedback: ideal_feedback.0,
                team_feedback: team_feedback.0,
            });
        });
    }

    fn on_feedback_ready(&mut self, seq: u64, ideal_feedback: String, team_feedback: String) {
        if seq != self.seq {
            debug!(room = %self.name, "stale feedback dropped");
            return;
        }
        let Some(pending) = self.pending_score.take() else {
            return;
        };
        self.seq += 1;
        broadcast::send_all(
            &self.registry,
            &ServerToClient::ScoreDisplay {
                accuracy: pending.accuracy,
                team: pending.team,
                ideal: pending.scenario.ideal.clone(),
                ideal_feedback,
                team_feedback,
                gauges: self.round.gauges.clone(),
                responses: pending.scenario.responses.len(),
            },
        );

        self.round.round += 1;
        if self.round.round < total_rounds() {
            self.arm_timer(INTER_ROUND_DELAY, |seq| RoomEvent::StartLoading { seq });
            return;
        }

        let history = std::mem::take(&mut self.round.history);
        let final_score = history.iter().map(|o| o.accuracy).sum::<f64>() / history.len() as f64;
        info!(room = %self.name, final_score, rounds = history.len(), "game complete");
        broadcast::send_all(
            &self.registry,
            &ServerToClient::GameComplete {
                final_score,
                history,
            },
        );
        self.round.reset();
        self.phase = Phase::Idle;
    }

    /* ---------------- helpers ---------------- */

    fn apply_gauges(&mut self, team: &TeamVote) {
        let g = &mut self.round.gauges;
        if team.axis1 > GAUGE_AXIS_THRESHOLD {
            g.reputation += GAUGE_DELTA_REPUTATION;
        } else if team.axis1 < -GAUGE_AXIS_THRESHOLD {
            g.reputation -= GAUGE_DELTA_REPUTATION;
        }
        if team.axis2 > GAUGE_AXIS_THRESHOLD {
            g.cohesion += GAUGE_DELTA_COHESION;
            g.volatility -= GAUGE_DELTA_VOLATILITY;
        } else if team.axis2 < -GAUGE_AXIS_THRESHOLD {
            g.cohesion -= GAUGE_DELTA_COHESION;
            g.volatility += GAUGE_DELTA_VOLATILITY;
        }
        g.clamp();
    }

    fn broadcast_vote(&self) {
        broadcast::team_vote(&self.registry, vote::recompute(&self.registry));
    }

    fn public_scenario(&self, sc: &Scenario) -> PublicScenario {
        PublicScenario {
            id: sc.id,
            text: sc.text.clone(),
            axes: sc.axes.clone(),
            started_at: sc.started_at_wall.clone(),
            duration_ms: sc.duration.as_millis() as u64,
            round: self.round.round,
            total_rounds: total_rounds(),
        }
    }

    fn arm_timer(
        &mut self,
        delay: Duration,
        make: impl FnOnce(u64) -> RoomEvent + Send + 'static,
    ) {
        self.clear_timer();
        let tx = self.tx.clone();
        let seq = self.seq;
        self.timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(make(seq));
        }));
    }

    fn clear_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}
