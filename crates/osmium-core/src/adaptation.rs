//! The generate, reflect, curate loop.
//!
//! [`Adapter::run_sample`] drives one sample through the whole loop against
//! the latest playbook. When another writer publishes first, the adapter
//! re-reads the playbook and recomputes the curation deltas, up to a bounded
//! number of attempts. [`Adapter::run_epochs`] repeats this over a sample set.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::curator::{CurationError, CurationMode, CurationOutcome, Curator};
use crate::generator::{GenerationError, Generator, Trajectory};
use crate::playbook::{PlaybookError, PlaybookStore};
use crate::reflector::{Reflection, ReflectionError, ReflectionInput, Reflector};

/// Errors from the adaptation loop.
#[derive(Error, Debug)]
pub enum AdaptationError {
    /// The playbook could not be read.
    #[error("Playbook error: {0}")]
    Playbook(#[from] PlaybookError),

    /// No draft was produced.
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Feedback could not be obtained.
    #[error("Feedback error: {0}")]
    Feedback(String),

    /// No insight was produced.
    #[error("Reflection error: {0}")]
    Reflection(#[from] ReflectionError),

    /// The playbook could not be updated.
    #[error("Curation error: {0}")]
    Curation(#[from] CurationError),

    /// Other writers kept publishing first.
    #[error("Gave up publishing after {attempts} version conflicts")]
    PublishContention {
        /// Attempts made.
        attempts: usize,
    },
}

impl AdaptationError {
    /// True when the failure only affects the current sample.
    pub fn is_sample_local(&self) -> bool {
        matches!(self, Self::Generation(_) | Self::Feedback(_) | Self::Reflection(_))
    }
}

/// One unit of adaptation input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Caller-chosen identifier.
    #[serde(default)]
    pub id: String,
    /// Extracted requirements.
    #[serde(default)]
    pub requirements: BTreeMap<String, Value>,
    /// Retrieved reference templates.
    #[serde(default)]
    pub templates: Vec<Value>,
    /// Expected result, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<Value>,
    /// Pre-recorded feedback text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Feedback on one draft.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    /// Free-text judgement.
    pub text: String,
    /// Expected result, when known.
    pub ground_truth: Option<Value>,
}

/// Evaluates drafts.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Judges `trajectory`'s draft for `sample`.
    ///
    /// # Errors
    /// Returns a message when no feedback can be produced.
    async fn feedback(&self, sample: &Sample, trajectory: &Trajectory) -> Result<Feedback, String>;
}

/// Feedback taken from the sample itself.
///
/// Uses the recorded feedback text when present; otherwise compares the draft
/// with the ground truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFeedback;

#[async_trait]
impl FeedbackSource for StaticFeedback {
    async fn feedback(&self, sample: &Sample, trajectory: &Trajectory) -> Result<Feedback, String> {
        let text = match (&sample.feedback, &sample.ground_truth) {
            (Some(text), _) => text.clone(),
            (None, Some(truth)) if *truth == trajectory.draft => {
                "The draft matches the expected result.".to_string()
            }
            (None, Some(_)) => "The draft differs from the expected result.".to_string(),
            (None, None) => {
                return Err(format!("sample '{}' has neither feedback nor ground truth", sample.id));
            }
        };
        Ok(Feedback { text, ground_truth: sample.ground_truth.clone() })
    }
}

/// Adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Curation mode for per-sample updates.
    #[serde(default)]
    pub mode: CurationMode,
    /// Curation attempts per sample before giving up on version conflicts.
    #[serde(default = "default_max_publish_attempts")]
    pub max_publish_attempts: usize,
}

fn default_max_publish_attempts() -> usize {
    3
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self { mode: CurationMode::default(), max_publish_attempts: default_max_publish_attempts() }
    }
}

/// Result of one sample.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    /// Sample processed.
    pub sample_id: String,
    /// Generation record.
    pub trajectory: Trajectory,
    /// Reflection record.
    pub reflection: Reflection,
    /// Published curation.
    pub curation: CurationOutcome,
    /// Curation attempts needed.
    pub publish_attempts: usize,
}

/// Summary of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochReport {
    /// Epoch number, starting at 1.
    pub epoch: usize,
    /// Samples that went through the whole loop.
    pub processed: usize,
    /// Samples abandoned after a sample-local failure.
    pub failed: usize,
    /// Items merged across the epoch.
    pub merges: usize,
    /// Playbook version at the end of the epoch.
    pub version: u64,
    /// Playbook size at the end of the epoch.
    pub items: usize,
}

/// Drives samples through generation, reflection and curation.
pub struct Adapter {
    store: Arc<dyn PlaybookStore>,
    generator: Generator,
    reflector: Reflector,
    curator: Curator,
    feedback: Arc<dyn FeedbackSource>,
    config: AdapterConfig,
}

impl Adapter {
    /// Assembles an adapter.
    pub fn new(
        store: Arc<dyn PlaybookStore>,
        generator: Generator,
        reflector: Reflector,
        curator: Curator,
        feedback: Arc<dyn FeedbackSource>,
        config: AdapterConfig,
    ) -> Self {
        Self { store, generator, reflector, curator, feedback, config }
    }

    /// Runs one sample through the loop and publishes the result.
    ///
    /// # Errors
    /// Returns `AdaptationError` when any stage fails, or
    /// `AdaptationError::PublishContention` when every curation attempt hit a
    /// version conflict.
    pub async fn run_sample(&self, sample: &Sample) -> Result<SampleOutcome, AdaptationError> {
        let snapshot = self.store.load()?;

        let trajectory =
            self.generator.generate(&sample.requirements, &sample.templates, &snapshot).await?;
        let feedback =
            self.feedback.feedback(sample, &trajectory).await.map_err(AdaptationError::Feedback)?;

        let reflection = self
            .reflector
            .reflect(ReflectionInput {
                trajectory: &trajectory,
                feedback: &feedback.text,
                ground_truth: feedback.ground_truth.as_ref(),
                playbook: &snapshot,
            })
            .await?;
        if let Some(truncation) = &reflection.truncation {
            warn!(sample_id = %sample.id, error = %truncation, "Using truncated reflection");
        }

        let insights = std::slice::from_ref(&reflection.insight);
        let mut playbook = snapshot;
        let attempts = self.config.max_publish_attempts.max(1);

        for attempt in 1..=attempts {
            let curated = self
                .curator
                .update(self.store.as_ref(), &playbook, insights, &reflection.tags, self.config.mode)
                .await;
            match curated {
                Ok(curation) => {
                    info!(
                        sample_id = %sample.id,
                        version = curation.playbook.version(),
                        deltas = curation.deltas.len(),
                        attempt,
                        "Sample adapted"
                    );
                    return Ok(SampleOutcome {
                        sample_id: sample.id.clone(),
                        trajectory,
                        reflection,
                        curation,
                        publish_attempts: attempt,
                    });
                }
                Err(e) if e.is_version_conflict() => {
                    warn!(sample_id = %sample.id, attempt, error = %e, "Playbook moved on, recomputing deltas");
                    playbook = self.store.load()?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AdaptationError::PublishContention { attempts })
    }

    /// Runs every sample `epochs` times.
    ///
    /// Sample-local failures are logged and counted; storage failures stop
    /// the run. In lazy mode each epoch ends with a consolidation pass.
    ///
    /// # Errors
    /// Returns the first failure that is not local to a sample.
    pub async fn run_epochs(
        &self,
        samples: &[Sample],
        epochs: usize,
    ) -> Result<Vec<EpochReport>, AdaptationError> {
        let mut reports = Vec::with_capacity(epochs);

        for epoch in 1..=epochs {
            let mut processed = 0;
            let mut failed = 0;
            let mut merges = 0;

            for sample in samples {
                match self.run_sample(sample).await {
                    Ok(outcome) => {
                        processed += 1;
                        merges += outcome.curation.dedup_report.merge_count();
                    }
                    Err(e) if e.is_sample_local() => {
                        warn!(epoch, sample_id = %sample.id, error = %e, "Sample failed");
                        failed += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            if self.config.mode == CurationMode::Lazy {
                let playbook = self.store.load()?;
                let consolidated = self.curator.consolidate(self.store.as_ref(), &playbook).await?;
                merges += consolidated.dedup_report.merge_count();
            }

            let playbook = self.store.load()?;
            info!(
                epoch,
                processed,
                failed,
                version = playbook.version(),
                items = playbook.len(),
                "Epoch finished"
            );
            reports.push(EpochReport {
                epoch,
                processed,
                failed,
                merges,
                version: playbook.version(),
                items: playbook.len(),
            });
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trajectory(draft: Value) -> Trajectory {
        Trajectory {
            draft,
            item_ids_used: Vec::new(),
            reasoning_trace: String::new(),
            retrieved: Vec::new(),
            playbook_version: 1,
        }
    }

    #[tokio::test]
    async fn test_static_feedback_prefers_recorded_text() {
        let sample = Sample {
            feedback: Some("too vague".into()),
            ground_truth: Some(json!({"a": 1})),
            ..Sample::default()
        };
        let feedback = StaticFeedback.feedback(&sample, &trajectory(json!({}))).await.unwrap();
        assert_eq!(feedback.text, "too vague");
        assert_eq!(feedback.ground_truth, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_static_feedback_compares_with_ground_truth() {
        let sample = Sample { ground_truth: Some(json!({"a": 1})), ..Sample::default() };

        let same = StaticFeedback.feedback(&sample, &trajectory(json!({"a": 1}))).await.unwrap();
        assert!(same.text.contains("matches"));

        let different = StaticFeedback.feedback(&sample, &trajectory(json!({"a": 2}))).await.unwrap();
        assert!(different.text.contains("differs"));
    }

    #[tokio::test]
    async fn test_static_feedback_needs_something() {
        let sample = Sample { id: "s1".into(), ..Sample::default() };
        let err = StaticFeedback.feedback(&sample, &trajectory(json!({}))).await.unwrap_err();
        assert!(err.contains("s1"));
    }

    #[test]
    fn test_sample_from_jsonl_line() {
        let sample: Sample =
            serde_json::from_str(r#"{"id": "q1", "requirements": {"topic": "acids"}, "feedback": "ok"}"#)
                .unwrap();
        assert_eq!(sample.requirements["topic"], "acids");
        assert!(sample.templates.is_empty());
    }
}
