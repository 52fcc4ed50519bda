use super::{CollectionContext, FactCollector};
use crate::errors::CollectorError;
use crate::facts::{CollectionFailure, FactBatch};
use crate::identity::IdentityResolver;
use crate::identity::paths::to_slash;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const COLLECTOR_NAME: &str = "fact_files";

/// Loads fact batches that external extractors serialized as JSON under the
/// configured facts directory.
pub struct FactFileCollector;

impl FactCollector for FactFileCollector {
    fn name(&self) -> &'static str {
        COLLECTOR_NAME
    }

    fn collect(&self, context: &CollectionContext<'_>) -> Result<FactBatch, CollectorError> {
        let facts_dir = context.repo_root.join(&context.config.facts_dir);
        if !facts_dir.is_dir() {
            debug!("No facts directory at {}", facts_dir.display());
            return Ok(FactBatch::new());
        }

        let files = batch_files(&facts_dir);
        let resolver = IdentityResolver::new(context.repo_root);
        let loaded: Vec<Result<FactBatch, CollectorError>> = files
            .par_iter()
            .map(|path| {
                if context.is_cancelled() {
                    return Err(CollectorError::Cancelled);
                }
                Ok(load_batch(context, &resolver, path))
            })
            .collect();

        let mut batches = Vec::with_capacity(loaded.len());
        for batch in loaded {
            batches.push(batch?);
        }
        let merged = FactBatch::merge(batches);
        debug!(
            "Loaded {} facts from {} batch files in {}",
            merged.fact_count(),
            files.len(),
            facts_dir.display()
        );
        Ok(merged)
    }
}

/// Every `*.json` file under `facts_dir`, sorted
fn batch_files(facts_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(facts_dir)
        .standard_filters(false)
        .follow_links(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

/// A file that cannot be read or parsed, or that points outside the
/// repository, yields a batch holding only its failure, so one bad file never
/// hides the others.
fn load_batch(
    context: &CollectionContext<'_>,
    resolver: &IdentityResolver,
    path: &Path,
) -> FactBatch {
    let unit = to_slash(path.strip_prefix(context.repo_root).unwrap_or(path));
    let failed = |message: String| FactBatch {
        failures: vec![CollectionFailure {
            collector: COLLECTOR_NAME.to_string(),
            unit: unit.clone(),
            message,
        }],
        ..FactBatch::default()
    };

    match fs::metadata(path) {
        Ok(metadata) if metadata.len() > context.config.max_file_size => {
            return failed(format!(
                "file size {} exceeds max_file_size {}",
                metadata.len(),
                context.config.max_file_size
            ));
        }
        Ok(_) => {}
        Err(e) => return failed(e.to_string()),
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => return failed(e.to_string()),
    };
    let batch = match serde_json::from_str::<FactBatch>(&contents) {
        Ok(batch) => batch,
        Err(e) => return failed(format!("malformed fact batch: {e}")),
    };

    if let Some(outside) = batch
        .referenced_paths()
        .find(|referenced| resolver.file_id(Path::new(referenced)).is_err())
    {
        return failed(format!(
            "fact batch references a path outside the repository: {outside}"
        ));
    }

    debug!("Loaded fact batch {}", unit);
    batch
}
