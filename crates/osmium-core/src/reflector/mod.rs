//! Bounded iterative reflection.
//!
//! The reflector runs rounds `1..=max_rounds`. Round 1 diagnoses the draft
//! from feedback and optional ground truth; every later round sees the
//! previous round's insight and is asked to sharpen it. The loop stops early
//! when two consecutive rounds agree after normalization.
//!
//! Round 1 failing leaves nothing usable and is an error. A later round
//! failing truncates the loop: the last successful round stays authoritative.

mod prompt;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use osmium_abstraction::{Model, ModelParameters};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::coercion::ExpectedShape;
use crate::completion::{CompletionError, StructuredRequest, complete_structured};
use crate::generator::Trajectory;
use crate::playbook::Playbook;

pub use types::{
    BulletTag, Insight, Reflection, ReflectionError, ReflectionTruncatedError, StopReason, Verdict,
};

/// Default round limit.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Reflector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectorConfig {
    /// Upper bound on refinement rounds.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Reply token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: None,
        }
    }
}

/// Everything one reflection looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInput<'a> {
    /// Generation being judged.
    pub trajectory: &'a Trajectory,
    /// Feedback on the draft.
    pub feedback: &'a str,
    /// Expected result, when known.
    pub ground_truth: Option<&'a Value>,
    /// Snapshot the draft was generated from.
    pub playbook: &'a Playbook,
}

#[derive(Debug, Deserialize)]
struct ReflectorReply {
    error_identification: String,
    root_cause: String,
    correct_approach: String,
    #[serde(default)]
    key_insight: Option<String>,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    bullet_tags: Vec<ReplyTag>,
}

#[derive(Debug, Deserialize)]
struct ReplyTag {
    #[serde(alias = "item_id", alias = "bullet_id")]
    id: String,
    #[serde(alias = "verdict")]
    tag: String,
}

/// Diagnoses drafts through bounded refinement.
pub struct Reflector {
    model: Arc<dyn Model>,
    config: ReflectorConfig,
}

impl Reflector {
    /// Creates a reflector.
    pub fn new(model: Arc<dyn Model>, config: ReflectorConfig) -> Self {
        Self { model, config }
    }

    /// Current settings.
    pub fn config(&self) -> &ReflectorConfig {
        &self.config
    }

    /// Runs the refinement loop.
    ///
    /// # Errors
    /// Returns `ReflectionError` only when round 1 fails; later failures are
    /// reported through [`Reflection::truncation`].
    pub async fn reflect(&self, input: ReflectionInput<'_>) -> Result<Reflection, ReflectionError> {
        let max_rounds = self.config.max_rounds.max(1);

        let (mut insight, mut tags) =
            self.run_round(&input, None, 1).await.map_err(|source| ReflectionError { source })?;
        let mut history = vec![insight.clone()];
        let mut stop_reason = StopReason::MaxRounds;
        let mut truncation = None;

        for round in 2..=max_rounds {
            match self.run_round(&input, Some((&insight, tags.as_slice())), round).await {
                Ok((next, next_tags)) => {
                    let converged = is_converged(&insight, &tags, &next, &next_tags);
                    history.push(next.clone());
                    insight = next;
                    tags = next_tags;

                    if converged {
                        stop_reason = StopReason::Converged;
                        break;
                    }
                }
                Err(source) => {
                    warn!(round, error = %source, "Reflection round failed, keeping previous round");
                    truncation = Some(ReflectionTruncatedError { round, source });
                    stop_reason = StopReason::Truncated;
                    break;
                }
            }
        }

        let rounds_completed = u32::try_from(history.len()).unwrap_or(u32::MAX);
        info!(
            rounds = rounds_completed,
            stop_reason = ?stop_reason,
            tags = tags.len(),
            "Reflection finished"
        );

        Ok(Reflection { insight, tags, history, rounds_completed, stop_reason, truncation })
    }

    async fn run_round(
        &self,
        input: &ReflectionInput<'_>,
        previous: Option<(&Insight, &[BulletTag])>,
        round: u32,
    ) -> Result<(Insight, Vec<BulletTag>), CompletionError> {
        let request = StructuredRequest {
            messages: prompt::build_messages(input, previous, round),
            schema: prompt::reply_schema(),
            shape: ExpectedShape::object(),
            parameters: ModelParameters {
                temperature: Some(self.config.temperature),
                max_tokens: Some(self.config.max_tokens),
                ..ModelParameters::default()
            },
            timeout: self.config.timeout_ms.map(Duration::from_millis),
        };

        let reply = complete_structured::<ReflectorReply>(self.model.as_ref(), request).await?;
        let (insight, tags) = into_round(reply.value, round, input.trajectory);
        debug!(round, root_cause = %insight.root_cause, tags = tags.len(), "Reflection round complete");
        Ok((insight, tags))
    }
}

/// Converts a reply into an insight plus one tag per item the trajectory used.
///
/// Items the reply does not mention are neutral; ids outside the trajectory
/// are dropped.
fn into_round(reply: ReflectorReply, round: u32, trajectory: &Trajectory) -> (Insight, Vec<BulletTag>) {
    let mut verdicts: HashMap<String, Verdict> = HashMap::new();
    for tag in reply.bullet_tags {
        let id = tag.id.trim().trim_matches(|c| c == '[' || c == ']').to_string();
        if !trajectory.item_ids_used.contains(&id) {
            debug!(item_id = %id, "Dropping tag for item outside the trajectory");
            continue;
        }
        let verdict = Verdict::parse(&tag.tag).unwrap_or_else(|| {
            debug!(item_id = %id, tag = %tag.tag, "Unknown verdict, treating as neutral");
            Verdict::Neutral
        });
        verdicts.insert(id, verdict);
    }

    let tags = trajectory
        .item_ids_used
        .iter()
        .map(|id| BulletTag {
            item_id: id.clone(),
            verdict: verdicts.get(id).copied().unwrap_or(Verdict::Neutral),
        })
        .collect();

    let insight = Insight {
        error_identification: reply.error_identification.trim().to_string(),
        root_cause: reply.root_cause.trim().to_string(),
        correct_approach: reply.correct_approach.trim().to_string(),
        key_insight: reply.key_insight.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
        section: reply.section.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        round_number: round,
    };

    (insight, tags)
}

/// Two rounds agree when their normalized root causes and tag sets match.
fn is_converged(
    previous: &Insight,
    previous_tags: &[BulletTag],
    current: &Insight,
    current_tags: &[BulletTag],
) -> bool {
    normalize(&previous.root_cause) == normalize(&current.root_cause) && previous_tags == current_tags
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
