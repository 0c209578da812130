//! Adaptation passes over a sample file.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use osmium_abstraction::{Embedder, Model};
use osmium_core::{
    Adapter, AdapterConfig, CurationMode, Curator, Generator, OsmiumConfig, PlaybookIndex,
    PlaybookStore, Reflector, Sample, StaticFeedback,
};
use osmium_models::{EmbedderConfig, EmbedderFactory, EmbedderType, ModelConfig, ModelFactory, ModelType};
use tracing::info;

use crate::config::open_store;

/// Run `epochs` passes of the loop over every sample in `samples`.
pub async fn execute(
    config: &OsmiumConfig,
    samples: &Path,
    epochs: usize,
    mode: Option<CurationMode>,
    json: bool,
) -> Result<()> {
    let samples = read_samples(samples)?;
    if samples.is_empty() {
        anyhow::bail!("No samples found");
    }

    let store = open_store(config)?;
    store.load().context("No playbook found. Run 'osm init' to create one.")?;

    let model = create_model(config)?;
    let embedder = create_embedder(config)?;
    info!(
        model_id = %model.model_id(),
        embedder = %embedder.model_id(),
        samples = samples.len(),
        epochs,
        "Starting adaptation"
    );

    let index = Arc::new(PlaybookIndex::new(embedder));
    let generator = Generator::new(Arc::clone(&model), Arc::clone(&index), config.generator.clone());
    let reflector = Reflector::new(model, config.reflector.clone());
    let curator = Curator::new(index, config.curator_config());
    let adapter_config = AdapterConfig {
        mode: mode.unwrap_or(config.adaptation.mode),
        ..config.adaptation.clone()
    };

    let adapter = Adapter::new(
        Arc::new(store),
        generator,
        reflector,
        curator,
        Arc::new(StaticFeedback),
        adapter_config,
    );

    let reports = adapter.run_epochs(&samples, epochs).await.context("Adaptation failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("{}", "Adaptation Complete".bold().cyan());
    println!();
    for report in &reports {
        let failed = if report.failed > 0 {
            report.failed.to_string().red()
        } else {
            report.failed.to_string().normal()
        };
        println!(
            "  Epoch {}: {} processed, {} failed, {} merged -> v{} ({} items)",
            report.epoch,
            report.processed.to_string().green(),
            failed,
            report.merges,
            report.version,
            report.items
        );
    }

    Ok(())
}

/// Reads one JSON sample per non-empty line.
fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples from {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            let mut sample: Sample = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid sample", path.display(), n + 1))?;
            if sample.id.is_empty() {
                sample.id = format!("line-{}", n + 1);
            }
            Ok(sample)
        })
        .collect()
}

fn create_model(config: &OsmiumConfig) -> Result<Arc<dyn Model>> {
    let settings = &config.model;
    let model_type = ModelType::from_str(&settings.model_type)
        .map_err(|()| anyhow!("Unknown model type '{}' (expected mock or openai)", settings.model_type))?;

    let mut model_config = ModelConfig::new(model_type, settings.model_id.clone());
    if let Some(api_key) = &settings.api_key {
        model_config = model_config.with_api_key(api_key.clone());
    }
    if let Some(base_url) = &settings.base_url {
        model_config = model_config.with_base_url(base_url.clone());
    }

    ModelFactory::create(model_config).context("Failed to create model")
}

fn create_embedder(config: &OsmiumConfig) -> Result<Arc<dyn Embedder>> {
    let settings = &config.embedding;
    let embedder_type = EmbedderType::from_str(&settings.provider).map_err(|()| {
        anyhow!("Unknown embedding provider '{}' (expected hash or openai)", settings.provider)
    })?;

    let mut embedder_config =
        EmbedderConfig::new(embedder_type, settings.model_id.clone(), settings.dimensions);
    embedder_config.api_key.clone_from(&config.model.api_key);
    embedder_config.base_url.clone_from(&config.model.base_url);

    EmbedderFactory::create(embedder_config).context("Failed to create embedder")
}
