//! Vote aggregation: each player's absolute position is normalized
//! against that player's own viewport, then the room's mean is taken.

use crate::config::VIEW_MARGIN;
use crate::registry::{Player, SessionRegistry};
use concord_protocol::{clamp_axis, TeamVote};

fn normalize(pos: f64, extent: f64) -> f64 {
    let offset = pos - extent / 2.0;
    let half_span = (extent - 2.0 * VIEW_MARGIN) / 2.0;
    if half_span <= 0.0 {
        // Viewport smaller than the margins; only the side of centre is
        // meaningful.
        if offset == 0.0 {
            return 0.0;
        }
        return clamp_axis(offset.signum());
    }
    clamp_axis(offset / half_span)
}

pub fn normalized_point(p: &Player) -> (f64, f64) {
    (
        normalize(p.x, p.viewport_width),
        normalize(p.y, p.viewport_height),
    )
}

/// Mean normalized position of all connected players. Zero players
/// yields the (0, 0) sentinel with a zero sample count.
pub fn recompute(registry: &SessionRegistry) -> TeamVote {
    let mut sum1 = 0.0;
    let mut sum2 = 0.0;
    let mut samples = 0usize;
    for p in registry.players() {
        let (a1, a2) = normalized_point(p);
        sum1 += a1;
        sum2 += a2;
        samples += 1;
    }
    if samples == 0 {
        return TeamVote::default();
    }
    TeamVote {
        axis1: clamp_axis(sum1 / samples as f64),
        axis2: clamp_axis(sum2 / samples as f64),
        samples,
    }
}
