//! Integration tests for curation against a deterministic embedder.

mod common;

use common::{StaticEmbedder, curator, index, seeded_store};
use osmium_core::{
    BulletTag, CurationMode, CuratorConfig, DeltaOperation, Insight, MergePhase, PlaybookStore,
    Verdict,
};

fn insight(lesson: &str, section: &str) -> Insight {
    Insight {
        error_identification: "The draft skipped a precaution".to_string(),
        root_cause: "No playbook entry covered it".to_string(),
        correct_approach: "Cover the precaution explicitly".to_string(),
        key_insight: Some(lesson.to_string()),
        section: Some(section.to_string()),
        round_number: 1,
    }
}

fn harmful(item_id: &str) -> BulletTag {
    BulletTag { item_id: item_id.to_string(), verdict: Verdict::Harmful }
}

#[tokio::test]
async fn test_repeated_harmful_tags_remove_item_once_below_peers() {
    let store = seeded_store(
        &["safety"],
        &[
            ("safety", "Pour water into acid", 3, 0),
            ("safety", "Wear gloves", 1, 1),
            ("safety", "Ventilate the room", 2, 0),
        ],
    );
    let embedder = StaticEmbedder::new(4)
        .with_axis("Pour water into acid", 0)
        .with_axis("Wear gloves", 1)
        .with_axis("Ventilate the room", 2);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig::default());

    let target = "safety-00001";
    let mut removed_at = None;

    for update in 1..=5 {
        let playbook = store.load().unwrap();
        let outcome = curator
            .update(&store, &playbook, &[], &[harmful(target)], CurationMode::Incremental)
            .await
            .unwrap();

        let published = &outcome.playbook;
        match published.get(target) {
            Some(item) => {
                assert_eq!(item.metadata.harmful_count, update);
                assert_eq!(published.len(), 3);
            }
            None => {
                if removed_at.is_none() {
                    removed_at = Some(update);
                    assert!(outcome.deltas.iter().any(
                        |op| matches!(op, DeltaOperation::Remove { item_id, .. } if item_id == target)
                    ));
                } else {
                    assert_eq!(outcome.skipped.len(), 1);
                    assert!(outcome.deltas.is_empty());
                }
                assert_eq!(published.len(), 2);
            }
        }
    }

    // 3 / (3 + 4) drops below the weakest peer's 1 / (1 + 1).
    assert_eq!(removed_at, Some(4));
    let survivors = store.load().unwrap();
    assert!(survivors.contains("safety-00002"));
    assert!(survivors.contains("safety-00003"));
    assert_eq!(survivors.version(), 6);
}

#[tokio::test]
async fn test_near_duplicate_insight_merges_into_existing_item() {
    let existing = "Wear goggles when pouring acid";
    let incoming = "Always protect your eyes around acid";
    let store = seeded_store(
        &["safety", "general"],
        &[("safety", existing, 2, 0), ("general", "Label every bottle", 1, 0)],
    );
    let embedder = StaticEmbedder::new(4)
        .with(existing, &[1.0, 0.0])
        .with(incoming, &[0.93, 0.367_64])
        .with_axis("Label every bottle", 2);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig::default());

    let playbook = store.load().unwrap();
    let outcome = curator
        .update(&store, &playbook, &[insight(incoming, "safety")], &[], CurationMode::Incremental)
        .await
        .unwrap();

    assert_eq!(outcome.dedup_report.merge_count(), 1);
    let merge = &outcome.dedup_report.merges[0];
    assert_eq!(merge.survivor_id, "safety-00001");
    assert_eq!(merge.phase, MergePhase::Insertion);
    assert!((merge.similarity - 0.93).abs() < 1e-3);

    let published = &outcome.playbook;
    assert_eq!(published.len(), playbook.len());
    let survivor = published.get("safety-00001").unwrap();
    assert_eq!(survivor.content, existing);
    assert_eq!(survivor.metadata.helpful_count, 2);
    assert!(!published.items().iter().any(|item| item.content == incoming));
}

#[tokio::test]
async fn test_duplicate_insight_is_absorbed_even_by_a_zero_score_item() {
    let existing = "Heat the flask before adding acid";
    let store = seeded_store(&["safety"], &[("safety", existing, 0, 2)]);
    let embedder = StaticEmbedder::new(4)
        .with(existing, &[1.0, 0.0])
        .with("Preheat the flask", &[1.0, 0.0]);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig { prune_harmful: false, ..CuratorConfig::default() });

    let playbook = store.load().unwrap();
    let outcome = curator
        .update(
            &store,
            &playbook,
            &[insight("Preheat the flask", "safety")],
            &[],
            CurationMode::Incremental,
        )
        .await
        .unwrap();

    assert_eq!(outcome.dedup_report.merge_count(), 1);
    assert_eq!(outcome.dedup_report.merges[0].survivor_id, "safety-00001");
    assert!(!outcome.deltas.iter().any(|op| matches!(op, DeltaOperation::Add { .. })));

    let survivor = outcome.playbook.get("safety-00001").unwrap();
    assert_eq!(survivor.content, existing);
    assert_eq!(survivor.metadata.harmful_count, 2);
    assert_eq!(outcome.playbook.len(), 1);
}

#[tokio::test]
async fn test_dissimilar_insight_is_added() {
    let store = seeded_store(&["safety"], &[("safety", "Wear goggles", 1, 0)]);
    let embedder = StaticEmbedder::new(4)
        .with("Wear goggles", &[1.0, 0.0])
        .with("Keep a spill kit nearby", &[0.6, 0.8]);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig::default());

    let playbook = store.load().unwrap();
    let outcome = curator
        .update(
            &store,
            &playbook,
            &[insight("Keep a spill kit nearby", "safety")],
            &[],
            CurationMode::Incremental,
        )
        .await
        .unwrap();

    assert!(outcome.dedup_report.is_empty());
    assert_eq!(outcome.playbook.len(), 2);
}

#[tokio::test]
async fn test_replaying_an_insight_batch_does_not_grow_the_playbook() {
    let store = seeded_store(&["safety"], &[("safety", "Wear goggles", 1, 0)]);
    let embedder = StaticEmbedder::new(4)
        .with("Wear goggles", &[1.0, 0.0])
        .with("Keep a spill kit nearby", &[0.0, 1.0]);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig::default());
    let batch = [insight("Keep a spill kit nearby", "safety")];

    let first = curator
        .update(&store, &store.load().unwrap(), &batch, &[], CurationMode::Incremental)
        .await
        .unwrap();
    assert_eq!(first.playbook.len(), 2);

    let second = curator
        .update(&store, &store.load().unwrap(), &batch, &[], CurationMode::Incremental)
        .await
        .unwrap();
    assert_eq!(second.dedup_report.merge_count(), 1);
    assert_eq!(second.playbook.len(), 2);
    assert_eq!(second.dedup_report.merges[0].survivor_id, "safety-00002");
}

#[tokio::test]
async fn test_consolidation_is_idempotent() {
    let store = seeded_store(
        &["safety"],
        &[
            ("safety", "Wear goggles", 3, 0),
            ("safety", "Wear safety glasses", 1, 0),
            ("safety", "Protect your eyes", 0, 1),
            ("safety", "Ventilate the room", 2, 0),
        ],
    );
    let embedder = StaticEmbedder::new(4)
        .with("Wear goggles", &[1.0, 0.0])
        .with("Wear safety glasses", &[0.95, 0.312_25])
        .with("Protect your eyes", &[0.9, -0.435_89])
        .with_axis("Ventilate the room", 2);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig { prune_harmful: false, ..CuratorConfig::default() });

    let playbook = store.load().unwrap();
    let first = curator.consolidate(&store, &playbook).await.unwrap();

    assert_eq!(first.dedup_report.merge_count(), 2);
    assert!(first.dedup_report.merges.iter().all(|m| m.survivor_id == "safety-00001"));
    let survivor = first.playbook.get("safety-00001").unwrap();
    assert_eq!(survivor.metadata.helpful_count, 4);
    assert_eq!(survivor.metadata.harmful_count, 1);
    assert_eq!(first.playbook.len(), 2);

    let second = curator.consolidate(&store, &first.playbook).await.unwrap();
    assert!(second.dedup_report.is_empty());
    assert!(second.deltas.is_empty());
    assert_eq!(second.playbook.items(), first.playbook.items());
}

#[tokio::test]
async fn test_lazy_runs_defer_merges_until_consolidation() {
    let store = seeded_store(&["safety"], &[("safety", "Wear goggles", 1, 0)]);
    let embedder = StaticEmbedder::new(4)
        .with("Wear goggles", &[1.0, 0.0])
        .with("Wear eye protection", &[0.99, 0.141_07]);
    let index = index(embedder);
    let curator = curator(&index, CuratorConfig::default());

    let playbook = store.load().unwrap();
    let lazy = curator
        .update(&store, &playbook, &[insight("Wear eye protection", "safety")], &[], CurationMode::Lazy)
        .await
        .unwrap();
    assert!(lazy.dedup_report.is_empty());
    assert_eq!(lazy.playbook.len(), 2);

    let consolidated = curator.consolidate(&store, &lazy.playbook).await.unwrap();
    assert_eq!(consolidated.dedup_report.merge_count(), 1);
    assert_eq!(consolidated.dedup_report.merges[0].phase, MergePhase::Consolidation);
    assert_eq!(consolidated.playbook.len(), 1);
    assert!(consolidated.playbook.contains("safety-00001"));
}

#[tokio::test]
async fn test_size_bound_holds_and_spares_section_champions() {
    let store = seeded_store(
        &["safety", "general"],
        &[
            ("safety", "Wear goggles", 5, 0),
            ("safety", "Work alone at night", 1, 3),
            ("general", "Label every bottle", 4, 0),
            ("general", "Skip the inventory", 0, 2),
        ],
    );
    let lessons = ["Keep a spill kit nearby", "Check fume hood airflow", "Log every disposal"];
    let mut embedder = StaticEmbedder::new(8)
        .with_axis("Wear goggles", 0)
        .with_axis("Work alone at night", 1)
        .with_axis("Label every bottle", 2)
        .with_axis("Skip the inventory", 3);
    for (axis, lesson) in lessons.iter().enumerate() {
        embedder = embedder.with_axis(lesson, axis + 4);
    }
    let index = index(embedder);
    let config = CuratorConfig { max_size: 4, prune_harmful: false, ..CuratorConfig::default() };
    let curator = curator(&index, config);

    for (i, lesson) in lessons.iter().enumerate() {
        let section = if i % 2 == 0 { "safety" } else { "general" };
        let playbook = store.load().unwrap();
        let outcome = curator
            .update(&store, &playbook, &[insight(lesson, section)], &[], CurationMode::Incremental)
            .await
            .unwrap();

        let published = &outcome.playbook;
        assert!(published.len() <= 4, "version {} has {} items", published.version(), published.len());
        assert!(published.contains("safety-00001"));
        assert!(published.contains("general-00003"));
        assert!(published.items().iter().any(|item| item.content == *lesson));
    }

    for version in store.versions().unwrap() {
        assert!(store.load_version(version).unwrap().len() <= 4);
    }
}
