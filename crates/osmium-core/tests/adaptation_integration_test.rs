//! End-to-end tests of the generate, reflect, curate loop.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{StaticEmbedder, generator_reply, index, reflector_reply, seeded_store};
use osmium_core::{
    AdaptationError, Adapter, AdapterConfig, CurationMode, Curator, CuratorConfig, Feedback,
    FeedbackSource, Generator, GeneratorConfig, InMemoryPlaybookStore, ItemSource, PlaybookStore,
    ReflectionInput, Reflector, ReflectorConfig, Sample, StaticFeedback, StopReason, Trajectory,
};
use osmium_abstraction::{Model, ModelError};
use osmium_models::MockModel;
use serde_json::json;

const SEED: &str = "Pour water into acid";
const LESSON: &str = "Always add acid to water, never the reverse";

fn embedder() -> StaticEmbedder {
    StaticEmbedder::new(4).with_axis(SEED, 0).with_axis(LESSON, 1)
}

fn sample(id: &str) -> Sample {
    let mut requirements = BTreeMap::new();
    requirements.insert("task".to_string(), json!("dilute sulfuric acid"));
    Sample {
        id: id.to_string(),
        requirements,
        templates: Vec::new(),
        ground_truth: Some(json!({"steps": ["add acid to water"]})),
        feedback: None,
    }
}

fn one_round_reflector(model: Arc<MockModel>) -> Reflector {
    Reflector::new(model, ReflectorConfig { max_rounds: 1, ..ReflectorConfig::default() })
}

fn adapter(
    store: Arc<dyn PlaybookStore>,
    generator_model: Arc<MockModel>,
    reflector_model: Arc<MockModel>,
    feedback: Arc<dyn FeedbackSource>,
    config: AdapterConfig,
) -> Adapter {
    let index = index(embedder());
    Adapter::new(
        store,
        Generator::new(generator_model, Arc::clone(&index), GeneratorConfig::default()),
        one_round_reflector(reflector_model),
        Curator::new(index, CuratorConfig::default()),
        feedback,
        config,
    )
}

/// Publishes an unrelated change the first time it is asked for feedback.
struct InterferingFeedback {
    store: Arc<InMemoryPlaybookStore>,
    fired: AtomicBool,
}

#[async_trait]
impl FeedbackSource for InterferingFeedback {
    async fn feedback(&self, sample: &Sample, trajectory: &Trajectory) -> Result<Feedback, String> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let playbook = self.store.load().map_err(|e| e.to_string())?;
            let mut draft = playbook.to_draft();
            draft.add_item("general", "Label every bottle", ItemSource::Manual);
            self.store.publish(draft).map_err(|e| e.to_string())?;
        }
        StaticFeedback.feedback(sample, trajectory).await
    }
}

#[tokio::test]
async fn test_sample_flows_through_generation_reflection_and_curation() {
    let store = Arc::new(seeded_store(&["safety", "general"], &[("safety", SEED, 0, 0)]));
    let generator_model = Arc::new(MockModel::scripted(
        "generator",
        vec![generator_reply(&["safety-00001", "safety-09999"], json!({"steps": ["pour water into acid"]}))],
    ));
    let reflector_model = Arc::new(MockModel::scripted(
        "reflector",
        vec![reflector_reply("Mixing order reversed", LESSON, "safety", &[("safety-00001", "harmful")])],
    ));
    let adapter = adapter(
        store.clone(),
        Arc::clone(&generator_model),
        Arc::clone(&reflector_model),
        Arc::new(StaticFeedback),
        AdapterConfig::default(),
    );

    let outcome = adapter.run_sample(&sample("s1")).await.unwrap();

    assert_eq!(outcome.trajectory.item_ids_used, vec!["safety-00001"]);
    assert_eq!(outcome.trajectory.playbook_version, 1);
    assert_eq!(outcome.reflection.rounds_completed, 1);
    assert_eq!(outcome.publish_attempts, 1);

    let published = store.load().unwrap();
    assert_eq!(published.version(), 2);
    assert_eq!(published.get("safety-00001").unwrap().metadata.harmful_count, 1);
    assert!(published.items().iter().any(|item| item.content == LESSON && item.section == "safety"));

    let reflector_prompt = &reflector_model.requests()[0];
    let user = &reflector_prompt.last().unwrap().content;
    assert!(user.contains("differs from the expected result"));
    assert!(user.contains("safety-00001"));
}

#[tokio::test]
async fn test_version_conflict_recomputes_against_latest_playbook() {
    let store = Arc::new(seeded_store(&["safety", "general"], &[("safety", SEED, 0, 0)]));
    let feedback = Arc::new(InterferingFeedback { store: Arc::clone(&store), fired: AtomicBool::new(false) });
    let generator_model = Arc::new(MockModel::scripted(
        "generator",
        vec![generator_reply(&["safety-00001"], json!({"steps": []}))],
    ));
    let reflector_model = Arc::new(MockModel::scripted(
        "reflector",
        vec![reflector_reply("Mixing order reversed", LESSON, "safety", &[("safety-00001", "harmful")])],
    ));
    let adapter =
        adapter(store.clone(), generator_model, reflector_model, feedback, AdapterConfig::default());

    let outcome = adapter.run_sample(&sample("s1")).await.unwrap();

    assert_eq!(outcome.publish_attempts, 2);
    assert_eq!(outcome.curation.playbook.version(), 3);

    let published = store.load().unwrap();
    assert!(published.items().iter().any(|item| item.content == "Label every bottle"));
    assert!(published.items().iter().any(|item| item.content == LESSON));
    assert_eq!(published.get("safety-00001").unwrap().metadata.harmful_count, 1);
}

#[tokio::test]
async fn test_publish_contention_gives_up() {
    let store = Arc::new(seeded_store(&["safety", "general"], &[("safety", SEED, 0, 0)]));
    let feedback = Arc::new(InterferingFeedback { store: Arc::clone(&store), fired: AtomicBool::new(false) });
    let generator_model =
        Arc::new(MockModel::scripted("generator", vec![generator_reply(&[], json!({"steps": []}))]));
    let reflector_model = Arc::new(MockModel::scripted(
        "reflector",
        vec![reflector_reply("Mixing order reversed", LESSON, "safety", &[])],
    ));
    let config = AdapterConfig { max_publish_attempts: 1, ..AdapterConfig::default() };
    let adapter = adapter(store, generator_model, reflector_model, feedback, config);

    let err = adapter.run_sample(&sample("s1")).await.unwrap_err();
    assert!(matches!(err, AdaptationError::PublishContention { attempts: 1 }));
    assert!(!err.is_sample_local());
}

#[tokio::test]
async fn test_epochs_count_failures_and_consolidate_lazy_runs() {
    let store = Arc::new(seeded_store(&["safety", "general"], &[("safety", SEED, 0, 0)]));
    let generator_model = Arc::new(MockModel::scripted(
        "generator",
        vec![
            generator_reply(&["safety-00001"], json!({"steps": []})),
            generator_reply(&["safety-00001"], json!({"steps": []})),
        ],
    ));
    // Both samples teach the same lesson; lazy runs add it twice.
    let reflector_model = Arc::new(MockModel::scripted(
        "reflector",
        vec![
            reflector_reply("Mixing order reversed", LESSON, "safety", &[("safety-00001", "harmful")]),
            reflector_reply("Mixing order reversed", LESSON, "safety", &[("safety-00001", "harmful")]),
        ],
    ));
    let config = AdapterConfig { mode: CurationMode::Lazy, ..AdapterConfig::default() };
    let adapter =
        adapter(store.clone(), generator_model, reflector_model, Arc::new(StaticFeedback), config);

    let mut unlabeled = sample("s3");
    unlabeled.ground_truth = None;
    let samples = vec![sample("s1"), sample("s2"), unlabeled];

    let reports = adapter.run_epochs(&samples, 1).await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.merges, 1);

    let published = store.load().unwrap();
    assert_eq!(report.version, published.version());
    assert_eq!(published.items().iter().filter(|item| item.content == LESSON).count(), 1);
    assert_eq!(published.get("safety-00001").unwrap().metadata.harmful_count, 2);
}

fn trajectory() -> Trajectory {
    Trajectory {
        draft: json!({"steps": ["pour water into acid"]}),
        item_ids_used: vec!["safety-00001".to_string()],
        reasoning_trace: String::new(),
        retrieved: Vec::new(),
        playbook_version: 1,
    }
}

#[tokio::test]
async fn test_refinement_stops_early_when_rounds_agree() {
    let store = seeded_store(&["safety"], &[("safety", SEED, 0, 0)]);
    let playbook = store.load().unwrap();
    let trajectory = trajectory();
    let model = Arc::new(MockModel::scripted(
        "reflector",
        vec![
            reflector_reply("Wrong order", "First take", "safety", &[("safety-00001", "neutral")]),
            reflector_reply("Mixing order reversed", LESSON, "safety", &[("safety-00001", "harmful")]),
            reflector_reply(
                "  mixing ORDER reversed ",
                LESSON,
                "safety",
                &[("safety-00001", "harmful")],
            ),
        ],
    ));
    let reflector =
        Reflector::new(Arc::clone(&model) as Arc<dyn Model>, ReflectorConfig { max_rounds: 5, ..ReflectorConfig::default() });

    let reflection = reflector
        .reflect(ReflectionInput {
            trajectory: &trajectory,
            feedback: "Unsafe",
            ground_truth: None,
            playbook: &playbook,
        })
        .await
        .unwrap();

    assert_eq!(reflection.stop_reason, StopReason::Converged);
    assert_eq!(reflection.rounds_completed, 3);
    assert_eq!(reflection.history.len(), 3);
    assert_eq!(reflection.insight.round_number, 3);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn test_refinement_never_exceeds_round_bound() {
    let store = seeded_store(&["safety"], &[("safety", SEED, 0, 0)]);
    let playbook = store.load().unwrap();
    let trajectory = trajectory();
    let replies: Vec<Result<String, ModelError>> = (0..10)
        .map(|n| reflector_reply(&format!("Cause {}", n), LESSON, "safety", &[]))
        .collect();
    let model = Arc::new(MockModel::scripted("reflector", replies));
    let reflector =
        Reflector::new(Arc::clone(&model) as Arc<dyn Model>, ReflectorConfig { max_rounds: 3, ..ReflectorConfig::default() });

    let reflection = reflector
        .reflect(ReflectionInput {
            trajectory: &trajectory,
            feedback: "Unsafe",
            ground_truth: None,
            playbook: &playbook,
        })
        .await
        .unwrap();

    assert_eq!(reflection.stop_reason, StopReason::MaxRounds);
    assert_eq!(reflection.rounds_completed, 3);
    assert_eq!(reflection.insight.root_cause, "Cause 2");
    assert_eq!(model.call_count(), 3);
}
