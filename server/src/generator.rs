//! Adapter around the external text-generation service.
//!
//! Every operation is guarded by a fixed timeout and a deterministic,
//! schema-valid fallback; callers always receive a usable value. The
//! transport is one request/response call per operation behind the
//! [`TextService`] trait.

use crate::config::{
    AXES_TIMEOUT, FEEDBACK_TIMEOUT, IDEAL_TIMEOUT, SCENARIO_TIMEOUT,
};
use async_trait::async_trait;
use concord_protocol::{AxisLabels, IdealPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("text service timed out")]
    Timeout,
    #[error("text service error: {0}")]
    Service(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait TextService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// OpenAI-style chat-completion transport.
pub struct HttpTextService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpTextService {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        HttpTextService {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl TextService for HttpTextService {
    async fn complete(&self, prompt: &str) -> Result<String, GenerateError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let req = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": 300,
            "temperature": 0.8,
        });
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| GenerateError::Service(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GenerateError::Service(format!("http {}", status.as_u16())));
        }
        serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v["choices"][0]["message"]["content"]
                    .as_str()
                    .map(str::to_owned)
            })
            .ok_or_else(|| GenerateError::Malformed("missing chat content".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    IdealExplanation,
    ActualExplanation,
}

/// Resolved content for one round.
#[derive(Debug, Clone)]
pub struct RoundContent {
    pub text: String,
    pub axes: AxisLabels,
    pub ideal: IdealPoint,
    pub used_fallback: bool,
}

pub struct ContentGenerator {
    service: Arc<dyn TextService>,
}

impl ContentGenerator {
    pub fn new(service: Arc<dyn TextService>) -> Self {
        ContentGenerator { service }
    }

    /// One decode-with-fallback path shared by every operation: the
    /// service call races its timeout, the reply must parse, and any
    /// failure substitutes the operation's deterministic fallback.
    async fn call_or_fallback<T>(
        &self,
        op: &'static str,
        timeout: Duration,
        prompt: String,
        parse: impl Fn(&str) -> Result<T, GenerateError>,
        fallback: impl FnOnce() -> T,
    ) -> (T, bool) {
        let outcome = match tokio::time::timeout(timeout, self.service.complete(&prompt)).await {
            Err(_) => Err(GenerateError::Timeout),
            Ok(Err(err)) => Err(err),
            Ok(Ok(raw)) => parse(&raw),
        };
        match outcome {
            Ok(value) => (value, false),
            Err(err) => {
                warn!(op, %err, "content generation failed, using fallback");
                (fallback(), true)
            }
        }
    }

    pub async fn scenario_text(&self, active_roles: &[String]) -> (String, bool) {
        let roles = if active_roles.is_empty() {
            "a small crew".to_string()
        } else {
            active_roles.join(", ")
        };
        let prompt = format!(
            "Write a tense two-sentence scenario for a team huddle. \
             The team's roles are: {roles}. End with one open decision \
             the whole team must settle together. Reply with the \
             scenario text only."
        );
        let seed = hash_of(&roles);
        self.call_or_fallback(
            "scenario_text",
            SCENARIO_TIMEOUT,
            prompt,
            parse_text,
            move || fallback_scenario(seed),
        )
        .await
    }

    pub async fn axis_labels(&self, scenario: &str) -> (AxisLabels, bool) {
        let prompt = format!(
            "Scenario: {scenario}\n\
             Name the two tensions this decision pulls the team between. \
             Reply with JSON only, exactly this shape: \
             {{\"axis1\":{{\"neg\":\"...\",\"pos\":\"...\"}},\
             \"axis2\":{{\"neg\":\"...\",\"pos\":\"...\"}}}}"
        );
        self.call_or_fallback(
            "axis_labels",
            AXES_TIMEOUT,
            prompt,
            parse_axes,
            AxisLabels::default,
        )
        .await
    }

    pub async fn ideal_point(&self, scenario: &str, axes: &AxisLabels) -> (IdealPoint, bool) {
        let prompt = format!(
            "Scenario: {scenario}\n\
             Axis 1 runs from \"{}\" to \"{}\". Axis 2 runs from \"{}\" \
             to \"{}\". Where on both axes does the wisest response sit, \
             and what would the team actually do there? Reply with JSON \
             only, exactly this shape: {{\"axis1\":0.0,\"axis2\":0.0,\
             \"actionSummary\":\"...\"}} with both values between -1 and 1.",
            axes.axis1.neg, axes.axis1.pos, axes.axis2.neg, axes.axis2.pos
        );
        let seed = hash_of(scenario);
        self.call_or_fallback(
            "ideal_point",
            IDEAL_TIMEOUT,
            prompt,
            parse_ideal,
            move || fallback_ideal(seed),
        )
        .await
    }

    pub async fn feedback(
        &self,
        scenario: &str,
        axes: &AxisLabels,
        point: (f64, f64),
        kind: FeedbackKind,
    ) -> (String, bool) {
        let subject = match kind {
            FeedbackKind::IdealExplanation => {
                "Explain in two sentences why this stance was the wisest response."
            }
            FeedbackKind::ActualExplanation => {
                "Describe in two sentences what this stance says about the team."
            }
        };
        let prompt = format!(
            "Scenario: {scenario}\n\
             Axis 1 runs from \"{}\" to \"{}\"; axis 2 from \"{}\" to \
             \"{}\". The stance in question sits at ({:.2}, {:.2}). \
             {subject} Reply with the text only.",
            axes.axis1.neg, axes.axis1.pos, axes.axis2.neg, axes.axis2.pos, point.0, point.1
        );
        let axes = axes.clone();
        self.call_or_fallback(
            "feedback",
            FEEDBACK_TIMEOUT,
            prompt,
            parse_text,
            move || fallback_feedback(&axes, point, kind),
        )
        .await
    }

    /// The three sequential calls that gate a round: scenario text, then
    /// axis labels, then the ideal point (axis semantics gate the point).
    pub async fn round_content(&self, active_roles: &[String]) -> RoundContent {
        let (text, f1) = self.scenario_text(active_roles).await;
        let (axes, f2) = self.axis_labels(&text).await;
        let (ideal, f3) = self.ideal_point(&text, &axes).await;
        RoundContent {
            text,
            axes,
            ideal,
            used_fallback: f1 || f2 || f3,
        }
    }
}

/* ---------------- parsing ---------------- */

fn parse_text(raw: &str) -> Result<String, GenerateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GenerateError::Malformed("empty text".into()));
    }
    Ok(trimmed.to_string())
}

/// Models often wrap JSON in prose; accept exactly one object in the
/// reply and nothing less.
fn extract_json(raw: &str) -> Result<&str, GenerateError> {
    let start = raw
        .find('{')
        .ok_or_else(|| GenerateError::Malformed("no json object".into()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| GenerateError::Malformed("no json object".into()))?;
    if end < start {
        return Err(GenerateError::Malformed("no json object".into()));
    }
    Ok(&raw[start..=end])
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AxisPairWire {
    neg: String,
    pos: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AxisLabelsWire {
    axis1: AxisPairWire,
    axis2: AxisPairWire,
}

fn parse_axes(raw: &str) -> Result<AxisLabels, GenerateError> {
    let wire: AxisLabelsWire = serde_json::from_str(extract_json(raw)?)
        .map_err(|e| GenerateError::Malformed(e.to_string()))?;
    Ok(AxisLabels {
        axis1: concord_protocol::AxisPair {
            neg: wire.axis1.neg,
            pos: wire.axis1.pos,
        },
        axis2: concord_protocol::AxisPair {
            neg: wire.axis2.neg,
            pos: wire.axis2.pos,
        },
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IdealWire {
    axis1: f64,
    axis2: f64,
    #[serde(rename = "actionSummary")]
    action_summary: String,
}

fn parse_ideal(raw: &str) -> Result<IdealPoint, GenerateError> {
    let wire: IdealWire = serde_json::from_str(extract_json(raw)?)
        .map_err(|e| GenerateError::Malformed(e.to_string()))?;
    Ok(IdealPoint {
        axis1: wire.axis1,
        axis2: wire.axis2,
        action: wire.action_summary,
    }
    .clamped())
}

/* ---------------- fallbacks ---------------- */

const FALLBACK_SCENARIOS: &[&str] = &[
    "A storm has cut the supply line and the relief convoy is a day late. \
     The team must decide whether to ration what is left or push out to \
     meet the convoy halfway.",
    "An anonymous tip says a rival crew will undercut your contract at \
     dawn. The team must decide whether to confront them tonight or let \
     the work speak for itself.",
    "The bridge everyone planned to cross is flagged as unsafe, and the \
     detour costs half a day. The team must decide whether to risk the \
     crossing or take the long way around.",
    "A new member's bold plan could double the payoff or sink the whole \
     effort. The team must decide how much of the plan to adopt.",
    "Headquarters wants an answer within the hour and half the facts are \
     still missing. The team must decide whether to commit now or ask \
     for more time.",
];

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn fallback_scenario(seed: u64) -> String {
    FALLBACK_SCENARIOS[(seed as usize) % FALLBACK_SCENARIOS.len()].to_string()
}

/// Reproducible for a given scenario text: the rng is seeded from the
/// text, so retries land on the same point.
fn fallback_ideal(seed: u64) -> IdealPoint {
    let mut rng = StdRng::seed_from_u64(seed);
    IdealPoint {
        axis1: rng.gen_range(-1.0..=1.0),
        axis2: rng.gen_range(-1.0..=1.0),
        action: "Hold position and reassess together.".to_string(),
    }
}

fn lean_word(v: f64) -> &'static str {
    if v.abs() < 0.25 {
        "stayed near the middle of"
    } else if v.abs() < 0.6 {
        "leaned toward"
    } else {
        "leaned hard toward"
    }
}

fn pole(pair: &concord_protocol::AxisPair, v: f64) -> &str {
    if v >= 0.0 {
        &pair.pos
    } else {
        &pair.neg
    }
}

fn fallback_feedback(axes: &AxisLabels, point: (f64, f64), kind: FeedbackKind) -> String {
    let subject = match kind {
        FeedbackKind::IdealExplanation => "The wiser course",
        FeedbackKind::ActualExplanation => "The team",
    };
    format!(
        "{subject} {} {} and {} {}.",
        lean_word(point.0),
        pole(&axes.axis1, point.0),
        lean_word(point.1),
        pole(&axes.axis2, point.1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed reply script, then errors.
    struct ScriptedService {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedService {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(ScriptedService {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl TextService for ScriptedService {
        async fn complete(&self, _prompt: &str) -> Result<String, GenerateError> {
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| GenerateError::Service("script exhausted".into()))
        }
    }

    /// Never answers; exercises the timeout path.
    struct StalledService;

    #[async_trait]
    impl TextService for StalledService {
        async fn complete(&self, _prompt: &str) -> Result<String, GenerateError> {
            std::future::pending().await
        }
    }

    fn roles() -> Vec<String> {
        vec!["scout".to_string(), "medic".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_schema_valid_fallback() {
        let gen = ContentGenerator::new(Arc::new(StalledService));
        let content = gen.round_content(&roles()).await;
        assert!(content.used_fallback);
        assert!(!content.text.is_empty());
        assert!((-1.0..=1.0).contains(&content.ideal.axis1));
        assert!((-1.0..=1.0).contains(&content.ideal.axis2));

        // The fallback axes survive the same wire validation as a
        // genuine reply.
        let wire = format!(
            "{{\"axis1\":{{\"neg\":\"{}\",\"pos\":\"{}\"}},\"axis2\":{{\"neg\":\"{}\",\"pos\":\"{}\"}}}}",
            content.axes.axis1.neg,
            content.axes.axis1.pos,
            content.axes.axis2.neg,
            content.axes.axis2.pos
        );
        assert_eq!(parse_axes(&wire).unwrap(), content.axes);
    }

    #[tokio::test]
    async fn malformed_axes_fall_back() {
        let svc = ScriptedService::new(&["this is not json at all"]);
        let gen = ContentGenerator::new(svc);
        let (axes, used_fallback) = gen.axis_labels("scenario").await;
        assert!(used_fallback);
        assert_eq!(axes, AxisLabels::default());
    }

    #[tokio::test]
    async fn unexpected_axis_fields_fall_back() {
        let svc = ScriptedService::new(&[
            "{\"axis1\":{\"neg\":\"a\",\"pos\":\"b\"},\"axis2\":{\"neg\":\"c\",\"pos\":\"d\"},\"extra\":1}",
        ]);
        let gen = ContentGenerator::new(svc);
        let (axes, used_fallback) = gen.axis_labels("scenario").await;
        assert!(used_fallback);
        assert_eq!(axes, AxisLabels::default());
    }

    #[tokio::test]
    async fn axes_parse_inside_prose() {
        let svc = ScriptedService::new(&[
            "Here you go: {\"axis1\":{\"neg\":\"Caution\",\"pos\":\"Boldness\"},\"axis2\":{\"neg\":\"Solo\",\"pos\":\"Together\"}} hope that helps",
        ]);
        let gen = ContentGenerator::new(svc);
        let (axes, used_fallback) = gen.axis_labels("scenario").await;
        assert!(!used_fallback);
        assert_eq!(axes.axis1.neg, "Caution");
        assert_eq!(axes.axis2.pos, "Together");
    }

    #[tokio::test]
    async fn ideal_point_values_are_clamped() {
        let svc = ScriptedService::new(&[
            "{\"axis1\":3.0,\"axis2\":-2.5,\"actionSummary\":\"charge\"}",
        ]);
        let gen = ContentGenerator::new(svc);
        let (ideal, used_fallback) = gen.ideal_point("scenario", &AxisLabels::default()).await;
        assert!(!used_fallback);
        assert_eq!(ideal.axis1, 1.0);
        assert_eq!(ideal.axis2, -1.0);
        assert_eq!(ideal.action, "charge");
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_ideal_is_reproducible() {
        let gen = ContentGenerator::new(Arc::new(StalledService));
        let (a, used_fallback) = gen.ideal_point("the same text", &AxisLabels::default()).await;
        let (b, _) = gen.ideal_point("the same text", &AxisLabels::default()).await;
        assert!(used_fallback);
        assert_eq!(a, b);
        assert!((-1.0..=1.0).contains(&a.axis1));
        assert!((-1.0..=1.0).contains(&a.axis2));
    }

    #[tokio::test]
    async fn feedback_fallback_names_the_poles() {
        let gen = ContentGenerator::new(ScriptedService::new(&[]));
        let axes = AxisLabels::default();
        let (text, used_fallback) = gen
            .feedback("scenario", &axes, (0.8, -0.1), FeedbackKind::ActualExplanation)
            .await;
        assert!(used_fallback);
        assert!(text.contains(&axes.axis1.pos));
        assert!(text.contains(&axes.axis2.neg));
    }

    #[tokio::test]
    async fn genuine_round_content_passes_through() {
        let svc = ScriptedService::new(&[
            "A fire breaks out in the archive wing. The team must decide what to save first.",
            "{\"axis1\":{\"neg\":\"Preserve\",\"pos\":\"Evacuate\"},\"axis2\":{\"neg\":\"Orders\",\"pos\":\"Instinct\"}}",
            "{\"axis1\":0.4,\"axis2\":-0.2,\"actionSummary\":\"Clear people first, papers second.\"}",
        ]);
        let gen = ContentGenerator::new(svc);
        let content = gen.round_content(&roles()).await;
        assert!(!content.used_fallback);
        assert!(content.text.starts_with("A fire"));
        assert_eq!(content.axes.axis1.pos, "Evacuate");
        assert!((content.ideal.axis1 - 0.4).abs() < 1e-9);
    }
}
