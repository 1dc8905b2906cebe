//! Manifest-driven batch conversion
//!
//! Each manifest line names a model in its first `;`-separated field. For a
//! model `leader.gr2` the directory is scanned for:
//!
//! 1. `leader_model*.<source>` - imported into the shared scene
//! 2. `leader__*.<source>` - each imported and exported on its own
//! 3. `leader.<source>` - imported into the shared scene
//!
//! If no variant was exported the shared scene is written to
//! `leader.<target>`.

use anyhow::{Context, Result, bail};
use nexus_common::FormatKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::export::export_file;
use crate::import::Importer;
use crate::scene::{HostScene, SceneWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub models: usize,
    pub written: Vec<PathBuf>,
    pub failed: Vec<String>,
}

/// Model name of a manifest line, lowercased; `None` for blank lines
pub fn model_name(line: &str) -> Option<String> {
    let name = line.split(';').next().unwrap_or("").trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Convert every model listed in `manifest`; files are looked up next to it
pub fn run_manifest(manifest: &Path, config: &Config) -> Result<BatchSummary> {
    let content = std::fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
    let dir = manifest.parent().unwrap_or_else(|| Path::new("."));

    let source = config.batch.source.to_lowercase();
    let target = FormatKind::from_extension(&config.batch.target)
        .with_context(|| format!("Unknown target format: {}", config.batch.target))?;
    if FormatKind::from_extension(&source).is_none() {
        bail!("Unknown source format: {}", config.batch.source);
    }

    let mut summary = BatchSummary::default();
    for model in content.lines().filter_map(model_name) {
        summary.models += 1;
        tracing::info!("Processing model `{}`", model);
        match convert_model(dir, &model, &source, target, config) {
            Ok(mut written) => summary.written.append(&mut written),
            Err(e) => {
                tracing::error!("{}: {:#}", model, e);
                summary.failed.push(model);
            }
        }
    }

    tracing::info!(
        "{} models, {} files written, {} failed",
        summary.models,
        summary.written.len(),
        summary.failed.len()
    );
    Ok(summary)
}

/// Run the four conversion steps for one model
pub fn convert_model(
    dir: &Path,
    model: &str,
    source: &str,
    target: FormatKind,
    config: &Config,
) -> Result<Vec<PathBuf>> {
    let root = model.replace(".gr2", "");
    let extension = format!(".{}", source);
    let files = list_sources(dir, &extension)?;
    let target_extension = target.spec().extension;

    let mut scene = HostScene::new();
    let mut importer = Importer::new(&config.import);
    let mut written = Vec::new();

    let model_prefix = format!("{}_model", root);
    for (name, path) in &files {
        if name.starts_with(&model_prefix) {
            importer.import_file(&mut scene, path)?;
        }
    }

    let variant_prefix = format!("{}__", root);
    for (name, path) in &files {
        if name.starts_with(&variant_prefix) {
            importer.import_file(&mut scene, path)?;
            let output = path.with_extension(target_extension);
            export_file(&scene, &output, target, &config.export)?;
            scene.clear_objects();
            written.push(output);
        }
    }

    let exact = format!("{}{}", root, extension);
    for (name, path) in &files {
        if *name == exact {
            importer.import_file(&mut scene, path)?;
        }
    }

    if written.is_empty() {
        let output = dir.join(format!("{}.{}", root, target_extension));
        export_file(&scene, &output, target, &config.export)?;
        written.push(output);
    }
    Ok(written)
}

/// Lowercased file names with `extension` directly inside `dir`, sorted
fn list_sources(dir: &Path, extension: &str) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(extension) {
            files.push((name, entry.into_path()));
        }
    }
    Ok(files)
}
