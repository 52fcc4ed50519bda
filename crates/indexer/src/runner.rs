use crate::collection::{CollectionContext, CollectorRegistry};
use crate::config::AnalysisConfig;
use crate::determinism::CanonicalBundle;
use crate::errors::{EngineError, Result, Warning, WarningLog};
use crate::identity::IdentityResolver;
use crate::identity::paths::resolve_path;
use crate::index::IndexBuilder;
use crate::paths::PathReconstructor;
use crate::resolution::ResolutionEngine;
use crate::stats::{FactCounts, PathCounts, ResolutionCounts, RunStatistics};
use crate::writer::{WriterResult, WriterService};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};

fn progress_with_tracing<F>(message: &str, progress: &mut F, level: Level)
where
    F: FnMut(&str),
{
    progress(message);
    match level {
        Level::INFO => info!("{message}"),
        Level::WARN => warn!("{message}"),
        Level::ERROR => error!("{message}"),
        _ => info!("{message}"),
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_directory: PathBuf,
    /// Reload and compare every document before committing the output
    pub verify: bool,
}

/// Everything a run computed, before anything is written
#[derive(Debug, Clone)]
pub struct AnalysisModel {
    pub bundle: CanonicalBundle,
    pub statistics: RunStatistics,
}

impl AnalysisModel {
    pub fn warnings(&self) -> &[Warning] {
        self.bundle.warnings()
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub model: AnalysisModel,
    pub writer_result: WriterResult,
}

/// Drives one full analysis: collect, canonicalize, resolve, reconstruct,
/// index, validate and (optionally) write.
pub struct AnalysisRunner<'a> {
    repo_root: PathBuf,
    config: &'a AnalysisConfig,
    registry: CollectorRegistry,
    cancellation_token: Option<CancellationToken>,
}

impl<'a> AnalysisRunner<'a> {
    pub fn new(repo_root: impl AsRef<Path>, config: &'a AnalysisConfig) -> Self {
        Self {
            repo_root: resolve_path(repo_root.as_ref()),
            config,
            registry: CollectorRegistry::from_kinds(&config.collectors),
            cancellation_token: None,
        }
    }

    pub fn with_registry(mut self, registry: CollectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cancellation(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = Some(cancellation_token);
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn check_cancellation(&self, stage: &str) -> Result<()> {
        if let Some(token) = &self.cancellation_token {
            if token.is_cancelled() {
                return Err(EngineError::cancelled(stage));
            }
        }
        Ok(())
    }

    /// Run every phase in memory and return the canonical documents
    pub fn analyze<F>(&self, progress: F) -> Result<AnalysisModel>
    where
        F: FnMut(&str),
    {
        self.analyze_excluding(&[], progress)
    }

    /// Analyze, then write the output atomically
    pub fn run<F>(&self, options: &RunOptions, mut progress: F) -> Result<RunOutcome>
    where
        F: FnMut(&str),
    {
        let output_directory = resolve_path(&options.output_directory);
        let mut model = self.analyze_excluding(
            std::slice::from_ref(&output_directory),
            &mut progress,
        )?;
        self.check_cancellation("before writing output")?;

        progress_with_tracing(
            &format!("💾 Writing output to {}", output_directory.display()),
            &mut progress,
            Level::INFO,
        );
        let phase = Instant::now();
        let writer_result = WriterService::new(&output_directory).write(
            &model.bundle,
            options.verify,
            self.cancellation_token.as_ref(),
        )?;
        model.statistics.record_phase("write", phase.elapsed());
        model.statistics.total_duration_seconds += phase.elapsed().as_secs_f64();

        progress_with_tracing(
            &format!(
                "✅ Wrote {} documents ({} bytes){}",
                writer_result.files_written.len(),
                writer_result.total_bytes,
                if writer_result.verified {
                    ", verified byte for byte"
                } else {
                    ""
                }
            ),
            &mut progress,
            Level::INFO,
        );

        Ok(RunOutcome {
            model,
            writer_result,
        })
    }

    fn analyze_excluding<F>(&self, excluded: &[PathBuf], mut progress: F) -> Result<AnalysisModel>
    where
        F: FnMut(&str),
    {
        let start_time = Instant::now();
        let config = self.config;
        let token = self.cancellation_token.as_ref();
        let mut statistics = RunStatistics::new(&self.repo_root);
        let mut warnings = WarningLog::new();

        progress_with_tracing(
            &format!("🚀 Analyzing {}", self.repo_root.display()),
            &mut progress,
            Level::INFO,
        );
        progress_with_tracing(
            &format!(
                "🧵 Threads: {}, collectors: {}",
                config.effective_threads(),
                self.registry.names().join(", ")
            ),
            &mut progress,
            Level::INFO,
        );
        self.check_cancellation("before fact collection")?;

        let phase = Instant::now();
        let context = CollectionContext {
            repo_root: &self.repo_root,
            config,
            excluded_paths: excluded,
            cancellation_token: token,
        };
        let batch = self.registry.collect_all(&context, &mut warnings)?;
        statistics.record_phase("collect", phase.elapsed());
        progress_with_tracing(
            &format!(
                "📥 Collected {} files and {} facts ({} units excluded)",
                batch.files.len(),
                batch.fact_count(),
                batch.failures.len()
            ),
            &mut progress,
            if batch.failures.is_empty() {
                Level::INFO
            } else {
                Level::WARN
            },
        );
        self.check_cancellation("after fact collection")?;

        let phase = Instant::now();
        let resolver = IdentityResolver::new(&self.repo_root);
        let roots =
            resolver.discover_module_roots(&config.module_markers, config.respect_gitignore, token)?;
        let (facts, module_roots) = resolver.canonicalize(batch, &roots, &mut warnings)?;
        statistics.record_phase("canonicalize", phase.elapsed());
        statistics.facts = FactCounts::from_facts(&facts);
        progress_with_tracing(
            &format!(
                "🪪 Canonicalized identities ({} module roots, {} symbols)",
                module_roots.len(),
                facts.symbols().len()
            ),
            &mut progress,
            Level::INFO,
        );
        self.check_cancellation("after identity resolution")?;

        let phase = Instant::now();
        let resolved = ResolutionEngine::new(config).resolve(&facts, &mut warnings)?;
        statistics.record_phase("resolve", phase.elapsed());
        statistics.resolutions = ResolutionCounts::from_resolved(&resolved);
        progress_with_tracing(
            &format!(
                "🧩 Resolved {} preferences ({} conflicts), {} interception chains, {} events",
                statistics.resolutions.preference_resolutions,
                statistics.resolutions.preference_conflicts,
                statistics.resolutions.interception_chains,
                statistics.resolutions.events
            ),
            &mut progress,
            Level::INFO,
        );
        self.check_cancellation("after override resolution")?;

        let phase = Instant::now();
        let paths = PathReconstructor::new(&facts, &resolved, config.max_depth)
            .reconstruct_all(token, &mut warnings)?;
        statistics.record_phase("reconstruct", phase.elapsed());
        statistics.paths = PathCounts::from_paths(&paths);
        progress_with_tracing(
            &format!(
                "🛤️ Reconstructed {} execution paths ({} truncated)",
                statistics.paths.paths, statistics.paths.truncated_paths
            ),
            &mut progress,
            Level::INFO,
        );
        self.check_cancellation("after path reconstruction")?;

        let phase = Instant::now();
        let index = IndexBuilder::new(config).build(&facts, &resolved, &paths)?;
        statistics.record_phase("index", phase.elapsed());
        self.check_cancellation("after index construction")?;

        let phase = Instant::now();
        let bundle = CanonicalBundle::assemble(&facts, &resolved, &paths, index, config, warnings)?;
        statistics.record_phase("validate", phase.elapsed());
        statistics.record_limits(bundle.limits());
        statistics.record_warnings(bundle.warnings());
        statistics.fingerprint = bundle.fingerprint();
        statistics.total_duration_seconds = start_time.elapsed().as_secs_f64();

        progress_with_tracing(
            &format!(
                "📦 Canonical output ready in {:.2}s ({} warnings)",
                statistics.total_duration_seconds,
                bundle.warnings().len()
            ),
            &mut progress,
            if bundle.warnings().is_empty() {
                Level::INFO
            } else {
                Level::WARN
            },
        );

        Ok(AnalysisModel { bundle, statistics })
    }
}
