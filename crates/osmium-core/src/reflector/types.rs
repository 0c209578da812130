//! Reflection records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::CompletionError;

/// Judgement of one playbook item's effect on a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The item improved the draft.
    Helpful,
    /// The item misled the draft.
    Harmful,
    /// No observable effect.
    Neutral,
}

impl Verdict {
    /// Returns the lowercase name used in prompts and persisted documents.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::Harmful => "harmful",
            Self::Neutral => "neutral",
        }
    }

    /// Parses a verdict leniently (case, whitespace and a few synonyms).
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "helpful" | "help" | "positive" | "good" => Some(Self::Helpful),
            "harmful" | "harm" | "negative" | "bad" | "misleading" => Some(Self::Harmful),
            "neutral" | "none" | "irrelevant" | "unused" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Verdict for one item referenced by a trajectory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BulletTag {
    /// Item judged.
    pub item_id: String,
    /// Judgement.
    pub verdict: Verdict,
}

/// Structured diagnosis produced by one reflection round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// What went wrong in the draft.
    pub error_identification: String,
    /// Why it went wrong.
    pub root_cause: String,
    /// What should have been done.
    pub correct_approach: String,
    /// Reusable takeaway worth adding to the playbook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_insight: Option<String>,
    /// Section the takeaway belongs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Round that produced this insight, starting at 1.
    pub round_number: u32,
}

impl Insight {
    /// Text that should enter the playbook, if any.
    pub fn lesson(&self) -> Option<&str> {
        self.key_insight
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.correct_approach.trim()).filter(|s| !s.is_empty()))
    }
}

/// Why the refinement loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Two consecutive rounds agreed.
    Converged,
    /// The round limit was reached.
    MaxRounds,
    /// A later round failed; earlier results were kept.
    Truncated,
}

/// Non-fatal failure of a refinement round after round 1.
#[derive(Error, Debug, Clone)]
#[error("Reflection truncated at round {round}: {source}")]
pub struct ReflectionTruncatedError {
    /// Round that failed.
    pub round: u32,
    /// Underlying failure.
    #[source]
    pub source: CompletionError,
}

/// Reflection produced nothing usable: the first round failed.
#[derive(Error, Debug, Clone)]
#[error("Reflection failed: {source}")]
pub struct ReflectionError {
    /// Underlying failure.
    #[source]
    pub source: CompletionError,
}

impl ReflectionError {
    /// Raw model text of the failed round, if the model replied.
    pub fn raw_text(&self) -> Option<&str> {
        self.source.raw_text()
    }
}

/// Outcome of the refinement loop.
#[derive(Debug, Clone)]
pub struct Reflection {
    /// Authoritative insight (the last successful round's).
    pub insight: Insight,
    /// Authoritative tags, one per item the trajectory used.
    pub tags: Vec<BulletTag>,
    /// Every successful round's insight, oldest first.
    pub history: Vec<Insight>,
    /// Successful rounds.
    pub rounds_completed: u32,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
    /// Set when a later round failed.
    pub truncation: Option<ReflectionTruncatedError>,
}

impl Reflection {
    /// True when a later round failed and earlier results were kept.
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_as_str_matches_serde_name() {
        for verdict in [Verdict::Helpful, Verdict::Harmful, Verdict::Neutral] {
            assert_eq!(serde_json::to_value(verdict).unwrap(), verdict.as_str());
        }
    }

    #[test]
    fn test_verdict_parse() {
        assert_eq!(Verdict::parse(" Helpful "), Some(Verdict::Helpful));
        assert_eq!(Verdict::parse("HARMFUL"), Some(Verdict::Harmful));
        assert_eq!(Verdict::parse("unused"), Some(Verdict::Neutral));
        assert_eq!(Verdict::parse("maybe"), None);
    }

    #[test]
    fn test_lesson_prefers_key_insight() {
        let mut insight = Insight {
            error_identification: "e".into(),
            root_cause: "r".into(),
            correct_approach: "Dilute acid into water".into(),
            key_insight: Some("  ".into()),
            section: None,
            round_number: 1,
        };
        assert_eq!(insight.lesson(), Some("Dilute acid into water"));

        insight.key_insight = Some("Always add acid to water".into());
        assert_eq!(insight.lesson(), Some("Always add acid to water"));

        insight.key_insight = None;
        insight.correct_approach = String::new();
        assert_eq!(insight.lesson(), None);
    }
}
