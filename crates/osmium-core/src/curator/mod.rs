//! Folding reflections back into the playbook.
//!
//! A curation run turns insights and tags into an ordered batch of
//! [`DeltaOperation`]s against one playbook version, applies them to a draft
//! and publishes the draft as the next version. In `incremental` mode the run
//! also deduplicates new and existing items and prunes net-harmful ones;
//! `lazy` mode leaves both to a later incremental run. The size bound holds
//! for every published version in either mode.
//!
//! Publishing is a compare-and-swap on the base version. A
//! `PlaybookError::VersionConflict` is returned as-is: the caller re-reads
//! the playbook and curates again.

pub mod dedup;
pub mod delta;
mod pruning;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::playbook::{
    ItemSource, KnowledgeItem, Playbook, PlaybookDraft, PlaybookError, PlaybookIndex, PlaybookStore,
};
use crate::reflector::{BulletTag, Insight, Verdict};

pub use dedup::{DedupReport, MergePhase, MergeRecord};
pub use delta::{DeltaOperation, ItemChange};

/// Default similarity at or above which two items are duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Default maximum number of items.
pub const DEFAULT_MAX_SIZE: usize = 200;

/// Errors from curation.
#[derive(Error, Debug)]
pub enum CurationError {
    /// Storage, validation, version or embedding failure.
    #[error(transparent)]
    Playbook(#[from] PlaybookError),
}

impl CurationError {
    /// True when the draft's base version went stale before publish.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Playbook(PlaybookError::VersionConflict { .. }))
    }
}

/// Result type alias for curation.
pub type Result<T> = std::result::Result<T, CurationError>;

/// How much work a curation run does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurationMode {
    /// Deltas, deduplication, pruning and the size bound.
    #[default]
    Incremental,
    /// Deltas and the size bound only.
    Lazy,
}

/// Curator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratorConfig {
    /// Cosine similarity at or above which items are duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Maximum number of items in a published playbook.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Remove net-harmful items scoring below all their peers.
    #[serde(default = "default_prune_harmful")]
    pub prune_harmful: bool,
    /// Section for insights that name none (or an unknown one).
    #[serde(default = "default_section")]
    pub default_section: String,
    /// Mode used by callers that do not pick one.
    #[serde(default)]
    pub mode: CurationMode,
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

fn default_prune_harmful() -> bool {
    true
}

fn default_section() -> String {
    "general".to_string()
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_size: default_max_size(),
            prune_harmful: default_prune_harmful(),
            default_section: default_section(),
            mode: CurationMode::default(),
        }
    }
}

/// Deltas computed against one playbook version, not yet published.
#[derive(Debug, Clone)]
pub struct CurationPlan {
    /// Draft with every delta applied.
    pub draft: PlaybookDraft,
    /// Applied operations, in order.
    pub deltas: Vec<DeltaOperation>,
    /// Merges performed.
    pub dedup_report: DedupReport,
    /// Operations skipped because their item no longer exists.
    pub skipped: Vec<DeltaOperation>,
}

/// A published curation run.
#[derive(Debug, Clone)]
pub struct CurationOutcome {
    /// The newly published version.
    pub playbook: Arc<Playbook>,
    /// Applied operations, in order.
    pub deltas: Vec<DeltaOperation>,
    /// Merges performed.
    pub dedup_report: DedupReport,
    /// Operations skipped because their item no longer exists.
    pub skipped: Vec<DeltaOperation>,
}

/// Running state of one curation pass.
struct Pass {
    draft: PlaybookDraft,
    deltas: Vec<DeltaOperation>,
    report: DedupReport,
    skipped: Vec<DeltaOperation>,
    current_cycle: HashSet<String>,
    now: DateTime<Utc>,
}

impl Pass {
    fn new(playbook: &Playbook) -> Self {
        Self {
            draft: playbook.to_draft(),
            deltas: Vec::new(),
            report: DedupReport::default(),
            skipped: Vec::new(),
            current_cycle: HashSet::new(),
            now: Utc::now(),
        }
    }

    fn apply(&mut self, op: DeltaOperation) -> bool {
        if delta::apply(&mut self.draft, &op, self.now) {
            if let DeltaOperation::Add { item, .. } = &op {
                self.current_cycle.insert(item.id.clone());
            }
            self.deltas.push(op);
            true
        } else {
            warn!(kind = op.kind(), item_id = %op.item_id(), "Skipping delta for stale item");
            self.skipped.push(op);
            false
        }
    }

    /// Folds `merged` into `survivor`: counts are summed, content discarded.
    fn merge(&mut self, survivor_id: &str, merged: &KnowledgeItem, similarity: f32, phase: MergePhase) {
        let absorb = DeltaOperation::Update {
            item_id: survivor_id.to_string(),
            change: ItemChange::absorb(merged),
            reason: format!("merged near-duplicate {} (similarity {:.2})", merged.id, similarity),
        };
        if !self.apply(absorb) {
            return;
        }
        if self.draft.contains(&merged.id) {
            self.apply(DeltaOperation::Remove {
                item_id: merged.id.clone(),
                reason: format!("duplicate of {}", survivor_id),
            });
        }

        info!(
            survivor = %survivor_id,
            merged = %merged.id,
            similarity,
            section = %merged.section,
            "Merged duplicate items"
        );
        self.report.merges.push(MergeRecord {
            survivor_id: survivor_id.to_string(),
            merged_id: merged.id.clone(),
            similarity,
            section: merged.section.clone(),
            phase,
        });
    }
}

/// Computes and publishes playbook deltas.
pub struct Curator {
    index: Arc<PlaybookIndex>,
    config: CuratorConfig,
}

impl Curator {
    /// Creates a curator sharing `index` with the generator.
    pub fn new(index: Arc<PlaybookIndex>, config: CuratorConfig) -> Self {
        Self { index, config }
    }

    /// Current settings.
    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    /// Computes the deltas for one run without publishing.
    ///
    /// # Errors
    /// Returns `CurationError` if embeddings cannot be computed.
    pub async fn plan(
        &self,
        playbook: &Playbook,
        insights: &[Insight],
        tags: &[BulletTag],
        mode: CurationMode,
    ) -> Result<CurationPlan> {
        let mut pass = Pass::new(playbook);

        Self::apply_tags(&mut pass, tags);
        self.add_insights(&mut pass, insights, mode).await?;

        if mode == CurationMode::Incremental {
            self.consolidate_sections(&mut pass).await?;
            if self.config.prune_harmful {
                Self::prune_harmful(&mut pass);
            }
        }
        self.enforce_size_bound(&mut pass);

        debug!(
            base_version = playbook.version(),
            deltas = pass.deltas.len(),
            merges = pass.report.merge_count(),
            skipped = pass.skipped.len(),
            mode = ?mode,
            "Planned curation"
        );

        Ok(CurationPlan {
            draft: pass.draft,
            deltas: pass.deltas,
            dedup_report: pass.report,
            skipped: pass.skipped,
        })
    }

    /// Computes the deltas for one run and publishes the result.
    ///
    /// # Errors
    /// Returns `CurationError::Playbook` with `VersionConflict` when another
    /// writer published since `playbook` was read; other storage, validation
    /// and embedding failures surface the same way.
    pub async fn update(
        &self,
        store: &dyn PlaybookStore,
        playbook: &Playbook,
        insights: &[Insight],
        tags: &[BulletTag],
        mode: CurationMode,
    ) -> Result<CurationOutcome> {
        let plan = self.plan(playbook, insights, tags, mode).await?;
        let published = store.publish(plan.draft)?;
        self.index.retain(&published);

        info!(
            version = published.version(),
            items = published.len(),
            deltas = plan.deltas.len(),
            merges = plan.dedup_report.merge_count(),
            "Curated playbook"
        );

        Ok(CurationOutcome {
            playbook: published,
            deltas: plan.deltas,
            dedup_report: plan.dedup_report,
            skipped: plan.skipped,
        })
    }

    /// Runs deduplication and pruning with no new input, e.g. after a series
    /// of lazy runs.
    ///
    /// # Errors
    /// See [`Curator::update`].
    pub async fn consolidate(
        &self,
        store: &dyn PlaybookStore,
        playbook: &Playbook,
    ) -> Result<CurationOutcome> {
        self.update(store, playbook, &[], &[], CurationMode::Incremental).await
    }

    fn apply_tags(pass: &mut Pass, tags: &[BulletTag]) {
        for tag in tags {
            let change = match tag.verdict {
                Verdict::Neutral => continue,
                Verdict::Helpful => ItemChange::helpful(),
                Verdict::Harmful => ItemChange::harmful(),
            };
            pass.apply(DeltaOperation::Update {
                item_id: tag.item_id.clone(),
                change,
                reason: format!("tagged {:?} by reflection", tag.verdict).to_lowercase(),
            });
        }
    }

    async fn add_insights(&self, pass: &mut Pass, insights: &[Insight], mode: CurationMode) -> Result<()> {
        for insight in insights {
            let Some(lesson) = insight.lesson() else {
                debug!(round = insight.round_number, "Insight has no lesson to add");
                continue;
            };

            let section = self.resolve_section(&pass.draft, insight.section.as_deref());
            let id = pass.draft.allocate_id(&section);
            let mut item = KnowledgeItem::new(id, section, lesson, ItemSource::Reflection);
            item.metadata.created_at = pass.now;
            item.metadata.last_updated = pass.now;

            if mode == CurationMode::Incremental {
                let duplicate = dedup::find_duplicate(
                    &self.index,
                    &pass.draft,
                    &item,
                    self.config.similarity_threshold,
                )
                .await?;

                if let Some((existing_id, similarity)) = duplicate {
                    Self::merge_on_insert(pass, &existing_id, item, similarity);
                    continue;
                }
            }

            pass.apply(DeltaOperation::Add {
                reason: format!("insight from reflection round {}", insight.round_number),
                item,
            });
        }
        Ok(())
    }

    /// Folds a duplicate insight into the existing item.
    ///
    /// A fresh reflection item has zero counts, so the existing item always
    /// scores at least as high and survives.
    fn merge_on_insert(pass: &mut Pass, existing_id: &str, item: KnowledgeItem, similarity: f32) {
        let Some(existing) = pass.draft.get(existing_id).cloned() else {
            return;
        };

        let absorb = DeltaOperation::Update {
            item_id: existing.id.clone(),
            change: ItemChange::absorb(&item),
            reason: format!("absorbed near-duplicate insight (similarity {:.2})", similarity),
        };
        if pass.apply(absorb) {
            info!(survivor = %existing.id, similarity, section = %existing.section, "Merged duplicate insight");
            pass.report.merges.push(MergeRecord {
                survivor_id: existing.id,
                merged_id: item.id,
                similarity,
                section: existing.section,
                phase: MergePhase::Insertion,
            });
        }
    }

    async fn consolidate_sections(&self, pass: &mut Pass) -> Result<()> {
        let sections = pass.draft.sections.clone();
        for section in &sections {
            let pairs =
                dedup::sweep_section(&self.index, &pass.draft, section, self.config.similarity_threshold)
                    .await?;
            for (survivor_id, merged_id, similarity) in pairs {
                let Some(merged) = pass.draft.get(&merged_id).cloned() else {
                    continue;
                };
                pass.merge(&survivor_id, &merged, similarity, MergePhase::Consolidation);
            }
        }
        Ok(())
    }

    fn prune_harmful(pass: &mut Pass) {
        for (item_id, score, lowest_peer) in pruning::harmful_candidates(&pass.draft) {
            info!(item_id = %item_id, score, lowest_peer, "Pruning net-harmful item");
            pass.apply(DeltaOperation::Remove {
                item_id,
                reason: format!("net harmful, score {:.2} below every peer ({:.2})", score, lowest_peer),
            });
        }
    }

    fn enforce_size_bound(&self, pass: &mut Pass) {
        while pass.draft.items.len() > self.config.max_size {
            let Some(victim) = pruning::eviction_victim(&pass.draft, &pass.current_cycle) else {
                break;
            };
            info!(item_id = %victim, max_size = self.config.max_size, "Evicting item over size bound");
            pass.apply(DeltaOperation::Remove {
                item_id: victim,
                reason: format!("size bound of {} items", self.config.max_size),
            });
        }
    }

    fn resolve_section(&self, draft: &PlaybookDraft, requested: Option<&str>) -> String {
        let known = |name: &str| draft.sections.iter().find(|s| s.eq_ignore_ascii_case(name)).cloned();

        requested
            .and_then(known)
            .or_else(|| known(&self.config.default_section))
            .or_else(|| draft.sections.first().cloned())
            .unwrap_or_else(|| self.config.default_section.clone())
    }
}
