//! Osmium Core - a self-improving playbook for model-drafted artifacts.
//!
//! This crate provides the curation loop:
//! - [`playbook`]: versioned knowledge items with snapshot/publish semantics
//! - [`generator`]: drafts artifacts from a playbook snapshot
//! - [`reflector`]: diagnoses drafts through bounded refinement
//! - [`curator`]: folds insights back as deduplicated, size-bounded deltas
//! - [`coercion`]: turns loosely structured model output into typed records
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use osmium_core::{
//!     CurationMode, Curator, CuratorConfig, Generator, GeneratorConfig, InMemoryPlaybookStore,
//!     ItemSource, PlaybookDraft, PlaybookIndex, PlaybookStore, ReflectionInput, Reflector,
//!     ReflectorConfig,
//! };
//! # use osmium_abstraction::{Embedder, Model};
//! # async fn run(model: Arc<dyn Model>, embedder: Arc<dyn Embedder>) -> osmium_core::Result<()> {
//! let mut seed = PlaybookDraft::new(["safety", "general"]);
//! seed.add_item("safety", "Add acid to water, never the reverse", ItemSource::Seed);
//! let store = InMemoryPlaybookStore::with_initial(seed)?;
//! let index = Arc::new(PlaybookIndex::new(embedder));
//!
//! let generator = Generator::new(Arc::clone(&model), Arc::clone(&index), GeneratorConfig::default());
//! let reflector = Reflector::new(model, ReflectorConfig::default());
//! let curator = Curator::new(index, CuratorConfig::default());
//!
//! let playbook = store.load()?;
//! let trajectory = generator.generate(&Default::default(), &[], &playbook).await?;
//! let reflection = reflector
//!     .reflect(ReflectionInput {
//!         trajectory: &trajectory,
//!         feedback: "The dilution step is unsafe",
//!         ground_truth: None,
//!         playbook: &playbook,
//!     })
//!     .await?;
//! let outcome = curator
//!     .update(&store, &playbook, &[reflection.insight], &reflection.tags, CurationMode::Incremental)
//!     .await?;
//! assert!(outcome.playbook.version() > playbook.version());
//! # Ok(())
//! # }
//! ```

pub mod adaptation;
pub mod coercion;
pub mod completion;
pub mod config;
pub mod curator;
pub mod error;
pub mod generator;
pub mod playbook;
pub mod reflector;

pub use adaptation::{
    AdaptationError, Adapter, AdapterConfig, EpochReport, Feedback, FeedbackSource, Sample,
    SampleOutcome, StaticFeedback,
};
pub use coercion::{CoercionStep, Coerced, ExpectedShape, SchemaMismatchError, coerce};
pub use completion::{CompletionError, StructuredReply, StructuredRequest, complete_structured};
pub use config::{ConfigError, OsmiumConfig};
pub use curator::{
    CurationError, CurationMode, CurationOutcome, CurationPlan, Curator, CuratorConfig,
    DedupReport, DeltaOperation, ItemChange, MergePhase, MergeRecord,
};
pub use error::{OsmiumError, Result};
pub use generator::{GenerationError, Generator, GeneratorConfig, Trajectory};
pub use playbook::{
    FilePlaybookStore, InMemoryPlaybookStore, ItemMetadata, ItemSource, KnowledgeItem, Playbook,
    PlaybookDraft, PlaybookError, PlaybookIndex, PlaybookStats, PlaybookStore,
};
pub use reflector::{
    BulletTag, Insight, Reflection, ReflectionError, ReflectionInput, ReflectionTruncatedError,
    Reflector, ReflectorConfig, StopReason, Verdict,
};
