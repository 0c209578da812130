//! Playbook inspection and maintenance commands.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use osmium_core::{
    ExpectedShape, ItemSource, KnowledgeItem, OsmiumConfig, PlaybookDraft, PlaybookError,
    PlaybookStore, coerce,
};
use serde::Deserialize;
use serde_json::json;

use crate::config::open_store;

/// Seed file accepted by `osm init`. A bare array is read as its `items`.
#[derive(Debug, Deserialize)]
struct SeedFile {
    /// Sections to create; defaults to the configured ones.
    #[serde(default)]
    sections: Option<Vec<String>>,
    #[serde(default)]
    items: Vec<SeedItem>,
}

#[derive(Debug, Deserialize)]
struct SeedItem {
    section: String,
    content: String,
    #[serde(default)]
    helpful: u32,
    #[serde(default)]
    harmful: u32,
}

/// Create the playbook, optionally from a JSON seed file.
pub fn init(config: &OsmiumConfig, seed: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    match store.load() {
        Ok(existing) => bail!(
            "A playbook already exists at {} (version {})",
            config.playbook.data_dir.display(),
            existing.version()
        ),
        Err(PlaybookError::NotFound) => {}
        Err(e) => return Err(e).context("Failed to read existing playbook"),
    }

    let seed = match seed {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read seed file {}", path.display()))?;
            coerce::<SeedFile>(&content, ExpectedShape::object_with_list("items"))
                .with_context(|| format!("Invalid seed file {}", path.display()))?
                .value
        }
        None => SeedFile { sections: None, items: Vec::new() },
    };

    let sections = seed.sections.unwrap_or_else(|| config.playbook.sections.clone());
    let mut draft = PlaybookDraft::new(sections);
    for item in seed.items {
        let id = draft.allocate_id(&item.section);
        draft.items.push(
            KnowledgeItem::new(id, item.section, item.content, ItemSource::Seed)
                .with_counts(item.helpful, item.harmful),
        );
    }

    let playbook = store.publish(draft).context("Failed to create playbook")?;

    println!("{}", "Playbook created".green().bold());
    println!("  Location: {}", store.root().display().to_string().cyan());
    println!("  Sections: {}", playbook.sections().join(", "));
    println!("  Items: {}", playbook.len());

    Ok(())
}

/// Print the current playbook.
pub fn show(config: &OsmiumConfig, section: Option<&str>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let playbook = load_current(&store)?;

    if let Some(section) = section {
        if !playbook.sections().iter().any(|s| s == section) {
            bail!("Unknown section '{}'. Sections: {}", section, playbook.sections().join(", "));
        }
    }

    let sections: Vec<&String> =
        playbook.sections().iter().filter(|s| section.is_none_or(|wanted| *s == wanted)).collect();

    if json {
        let items: Vec<&KnowledgeItem> = sections.iter().flat_map(|s| playbook.items_in(s)).collect();
        let output = json!({
            "version": playbook.version(),
            "sections": sections,
            "items": items,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} {}", "Playbook".bold().cyan(), format!("v{}", playbook.version()).dimmed());
    println!();

    if playbook.is_empty() {
        println!("  {}", "No items yet.".dimmed());
        return Ok(());
    }

    for section in sections {
        let items: Vec<&KnowledgeItem> = playbook.items_in(section).collect();
        if items.is_empty() {
            continue;
        }
        println!("  {}", section.bold());
        for item in items {
            println!("    {} [{}]", "•".cyan(), item.id.dimmed());
            println!("      {}", item.content);
            println!(
                "      {} Helpful: {} | Harmful: {} | Score: {:.2}",
                "Stats:".dimmed(),
                item.metadata.helpful_count.to_string().green(),
                item.metadata.harmful_count.to_string().red(),
                item.helpfulness_score()
            );
        }
        println!();
    }

    Ok(())
}

/// Print per-section statistics.
pub fn stats(config: &OsmiumConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let stats = load_current(&store)?.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Playbook Statistics".bold().cyan());
    println!();
    println!("  Version: {}", stats.version);
    println!("  Items: {}", stats.total_items);
    println!();

    for (section, section_stats) in &stats.sections {
        println!(
            "  {:<20} {:>4} items  {} {}  {} {}  mean score {:.2}",
            section.bold(),
            section_stats.items,
            "+".green(),
            section_stats.helpful,
            "-".red(),
            section_stats.harmful,
            section_stats.mean_score()
        );
    }

    if !stats.by_source.is_empty() {
        println!();
        let sources: Vec<String> =
            stats.by_source.iter().map(|(source, count)| format!("{}={}", source, count)).collect();
        println!("  {} {}", "By source:".dimmed(), sources.join(", "));
    }

    Ok(())
}

/// List every published version.
pub fn history(config: &OsmiumConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let versions = store.versions().context("Failed to list playbook versions")?;
    let current = store.load().ok().map(|p| p.version());

    let mut rows = Vec::with_capacity(versions.len());
    for version in versions {
        let snapshot = store
            .load_version(version)
            .with_context(|| format!("Failed to read playbook version {}", version))?;
        let sections: BTreeSet<&str> = snapshot.items().iter().map(|i| i.section.as_str()).collect();
        rows.push((version, snapshot.len(), sections.len()));
    }

    if json {
        let output: Vec<_> = rows
            .iter()
            .map(|(version, items, sections)| {
                json!({"version": version, "items": items, "sections_used": sections})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "Playbook History".bold().cyan());
    println!();

    if rows.is_empty() {
        println!("  {}", "No versions published.".dimmed());
        return Ok(());
    }

    for (version, items, sections) in rows {
        let marker = if Some(version) == current { "*".green() } else { " ".normal() };
        println!("  {} v{:<6} {:>4} items in {} sections", marker, version, items, sections);
    }

    Ok(())
}

/// Publish an earlier version's items as a new version.
pub fn rollback(config: &OsmiumConfig, version: u64) -> Result<()> {
    let store = open_store(config)?;
    let restored = store
        .rollback(version)
        .with_context(|| format!("Failed to roll back to version {}", version))?;

    println!(
        "{}",
        format!("Restored version {} as version {}", version, restored.version()).green().bold()
    );
    println!("  Items: {}", restored.len());

    Ok(())
}

/// Add a hand-written item.
pub fn add(config: &OsmiumConfig, section: &str, content: &str) -> Result<()> {
    let store = open_store(config)?;
    let playbook = load_current(&store)?;

    if !playbook.sections().iter().any(|s| s == section) {
        bail!("Unknown section '{}'. Sections: {}", section, playbook.sections().join(", "));
    }
    if content.trim().is_empty() {
        bail!("Content cannot be empty");
    }

    let mut draft = playbook.to_draft();
    let id = draft.add_item(section, content, ItemSource::Manual);
    let published = store.publish(draft).context("Failed to publish playbook")?;

    println!("{}", "Item added successfully".green().bold());
    println!("  ID: {}", id.cyan());
    println!("  Section: {}", section.cyan());
    println!("  Version: {}", published.version());

    Ok(())
}

fn load_current(store: &impl PlaybookStore) -> Result<std::sync::Arc<osmium_core::Playbook>> {
    match store.load() {
        Ok(playbook) => Ok(playbook),
        Err(PlaybookError::NotFound) => bail!("No playbook found. Run 'osm init' to create one."),
        Err(e) => Err(e).context("Failed to load playbook"),
    }
}
