use crate::cli::{AnalyzeArgs, DEFAULT_OUTPUT_DIR};
use anyhow::{Context, Result};
use indexer::runner::{AnalysisRunner, RunOptions};
use indexer::stats::RunStatistics;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn handle_statistics_output(statistics: &RunStatistics, stats_output: Option<Option<PathBuf>>) {
    if let Some(stats_path_option) = stats_output {
        if let Some(stats_path) = stats_path_option {
            match statistics.export_to_file(&stats_path) {
                Ok(_) => {
                    info!("Statistics saved to: {}", stats_path.display());
                }
                Err(e) => {
                    error!("Failed to save statistics: {e}");
                }
            }
        }

        info!("Analysis Summary:");
        info!(
            "  - Facts: {} modules, {} files, {} symbols",
            statistics.facts.modules, statistics.facts.files, statistics.facts.symbols
        );
        info!(
            "  - Resolutions: {} preferences ({} conflicts), {} interception chains, {} events",
            statistics.resolutions.preference_resolutions,
            statistics.resolutions.preference_conflicts,
            statistics.resolutions.interception_chains,
            statistics.resolutions.events
        );
        info!(
            "  - Execution paths: {} ({} truncated)",
            statistics.paths.paths, statistics.paths.truncated_paths
        );
        info!("  - Total Duration: {:.2}s", statistics.total_duration_seconds);

        if !statistics.phases.is_empty() {
            info!("Phase Timing:");
            for phase in &statistics.phases {
                info!("  - {}: {:.3}s", phase.phase, phase.duration_seconds);
            }
        }

        if !statistics.warnings.is_empty() {
            info!("Warnings:");
            for (kind, count) in &statistics.warnings {
                info!("  - {kind}: {count}");
            }
        }
    }
}

pub fn run(args: AnalyzeArgs, cancellation_token: CancellationToken) -> Result<()> {
    let config = args.config.load()?;
    let output_directory = args
        .output
        .clone()
        .unwrap_or_else(|| args.config.repo_path.join(DEFAULT_OUTPUT_DIR));

    let runner =
        AnalysisRunner::new(&args.config.repo_path, &config).with_cancellation(cancellation_token);
    let options = RunOptions {
        output_directory,
        verify: !args.no_verify,
    };

    // Progress messages are already emitted through tracing.
    let outcome = runner
        .run(&options, |_| {})
        .with_context(|| format!("analysis of {} failed", runner.repo_root().display()))?;

    let statistics = &outcome.model.statistics;
    if statistics.warning_count() > 0 {
        warn!(
            "Completed with {} warnings, see warnings.json",
            statistics.warning_count()
        );
    }
    println!("{}", statistics.fingerprint);

    handle_statistics_output(statistics, args.stats);
    Ok(())
}
