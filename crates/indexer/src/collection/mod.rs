//! Built-in fact collectors.
//!
//! Format-specific extraction lives outside this crate. The collectors here
//! cover the repository's file inventory and the JSON interchange format
//! external extractors write to. Collectors are composed explicitly in a
//! [`CollectorRegistry`]; there is no discovery at runtime.

pub mod fact_files;
pub mod filesystem;

pub use fact_files::FactFileCollector;
pub use filesystem::FilesystemCollector;

use crate::config::AnalysisConfig;
use crate::errors::{CollectorError, EngineError, Result, WarningKind, WarningLog};
use crate::facts::{CollectionFailure, FactBatch};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use strum::{AsRefStr, Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Read-only inputs shared by every collector of a run
#[derive(Clone, Copy)]
pub struct CollectionContext<'a> {
    pub repo_root: &'a Path,
    pub config: &'a AnalysisConfig,
    /// Directories no collector may read, such as the output directory
    pub excluded_paths: &'a [PathBuf],
    pub cancellation_token: Option<&'a CancellationToken>,
}

impl CollectionContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token
            .is_some_and(|token| token.is_cancelled())
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded_paths
            .iter()
            .any(|excluded| path.starts_with(excluded))
    }
}

/// A source of facts.
///
/// Collectors never mutate shared state. A unit that cannot be read becomes a
/// [`CollectionFailure`] in the returned batch; an `Err` discards the whole
/// collector's output.
pub trait FactCollector: Send + Sync {
    fn name(&self) -> &'static str;

    fn collect(&self, context: &CollectionContext<'_>)
    -> std::result::Result<FactBatch, CollectorError>;
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollectorKind {
    Filesystem,
    FactFiles,
}

impl CollectorKind {
    fn build(self) -> Box<dyn FactCollector> {
        match self {
            Self::Filesystem => Box::new(FilesystemCollector),
            Self::FactFiles => Box::new(FactFileCollector),
        }
    }
}

/// Ordered set of collectors for one run
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Box<dyn FactCollector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kinds(kinds: &[CollectorKind]) -> Self {
        let mut registry = Self::new();
        for kind in kinds {
            registry.register(kind.build());
        }
        registry
    }

    pub fn register(&mut self, collector: Box<dyn FactCollector>) {
        self.collectors.push(collector);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run every collector in parallel and merge their batches.
    ///
    /// Results are gathered in registry order before the merge, and the merge
    /// itself sorts, so the outcome does not depend on scheduling. Every
    /// excluded unit is reported as a `FactCollection` warning.
    pub fn collect_all(
        &self,
        context: &CollectionContext<'_>,
        warnings: &mut WarningLog,
    ) -> Result<FactBatch> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(context.config.effective_threads())
            .build()?;

        let results: Vec<(&'static str, std::result::Result<FactBatch, CollectorError>)> =
            pool.install(|| {
                self.collectors
                    .par_iter()
                    .map(|collector| (collector.name(), collector.collect(context)))
                    .collect()
            });

        if context.is_cancelled() {
            return Err(EngineError::cancelled("during fact collection"));
        }

        let mut batches = Vec::with_capacity(results.len());
        let mut collector_failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(batch) => {
                    debug!("Collector {} produced {} facts", name, batch.fact_count());
                    batches.push(batch);
                }
                Err(CollectorError::Cancelled) => {
                    return Err(EngineError::cancelled(format!("in collector {name}")));
                }
                Err(e) => collector_failures.push(CollectionFailure {
                    collector: name.to_string(),
                    unit: name.to_string(),
                    message: e.to_string(),
                }),
            }
        }

        let mut merged = FactBatch::merge(batches);
        merged.failures.extend(collector_failures);
        merged.normalize();

        for failure in &merged.failures {
            warnings.push(
                WarningKind::FactCollection,
                format!("{}:{}", failure.collector, failure.unit),
                failure.message.clone(),
            );
        }

        info!(
            "Collected {} facts from {} collectors in {:?} ({} units excluded)",
            merged.fact_count(),
            self.collectors.len(),
            start.elapsed(),
            merged.failures.len()
        );
        Ok(merged)
    }
}
