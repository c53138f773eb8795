//! Tuning knobs for the room engine and the content generator.

use std::time::Duration;

// ==== knobs ====
pub const ROOM_CAPACITY: usize = 8; // maximum players per room
pub const FIRST_ROUND_DELAY: Duration = Duration::from_millis(3_000);
pub const INTER_ROUND_DELAY: Duration = Duration::from_millis(5_000);

/// Per-round countdown schedule; the taper raises time pressure as the
/// game progresses. Its length is the number of rounds in a game.
pub const ROUND_DURATIONS_MS: &[u64] = &[30_000, 25_000, 20_000, 15_000];

/// Dead border (screen units) excluded from the playable area when a
/// position is normalized against a client's viewport.
pub const VIEW_MARGIN: f64 = 40.0;

pub const RESPONSE_MAX_CHARS: usize = 200;

// Scoring constants, preserved as tuned.
pub const GAUGE_AXIS_THRESHOLD: f64 = 0.3;
pub const GAUGE_DELTA_REPUTATION: f64 = 5.0;
pub const GAUGE_DELTA_COHESION: f64 = 5.0;
pub const GAUGE_DELTA_VOLATILITY: f64 = 5.0;

// Content generator timeouts.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(15);
pub const AXES_TIMEOUT: Duration = Duration::from_secs(15);
pub const IDEAL_TIMEOUT: Duration = Duration::from_secs(15);
pub const FEEDBACK_TIMEOUT: Duration = Duration::from_secs(10);

pub const TEXT_API_BASE_DEFAULT: &str = "https://api.openai.com/v1";
pub const TEXT_MODEL_DEFAULT: &str = "gpt-4o-mini";
pub const TEXT_API_KEY_ENV: &str = "CONCORD_TEXT_API_KEY";

pub fn total_rounds() -> usize {
    ROUND_DURATIONS_MS.len()
}
