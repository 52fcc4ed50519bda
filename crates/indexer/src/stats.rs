//! Run statistics. Written on request next to, never inside, the canonical
//! output: durations change from run to run.

use crate::determinism::LimitSummary;
use crate::errors::{EngineError, Result, Warning};
use crate::facts::CanonicalFacts;
use crate::paths::{ExecutionPath, TruncationReason};
use crate::resolution::Resolved;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactCounts {
    pub modules: usize,
    pub files: usize,
    pub symbols: usize,
    pub preferences: usize,
    pub interceptions: usize,
    pub subscriptions: usize,
    pub entry_points: usize,
    pub dispatches: usize,
    pub calls: usize,
    pub failures: usize,
}

impl FactCounts {
    pub fn from_facts(facts: &CanonicalFacts) -> Self {
        Self {
            modules: facts.modules().len(),
            files: facts.files().len(),
            symbols: facts.symbols().len(),
            preferences: facts.preferences().len(),
            interceptions: facts.interceptions().len(),
            subscriptions: facts.subscriptions().len(),
            entry_points: facts.entry_points().len(),
            dispatches: facts.dispatches().len(),
            calls: facts.calls().len(),
            failures: facts.failures().len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionCounts {
    pub ordered_modules: usize,
    pub preference_resolutions: usize,
    pub preference_conflicts: usize,
    pub interception_chains: usize,
    pub events: usize,
    pub cross_module_events: usize,
}

impl ResolutionCounts {
    pub fn from_resolved(resolved: &Resolved) -> Self {
        Self {
            ordered_modules: resolved.order.len(),
            preference_resolutions: resolved.preferences.len(),
            preference_conflicts: resolved.preferences.conflict_count(),
            interception_chains: resolved.chains.len(),
            events: resolved.subscriptions.len(),
            cross_module_events: resolved
                .subscriptions
                .events()
                .filter(|fan_out| fan_out.cross_module_count > 0)
                .count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCounts {
    pub paths: usize,
    pub nodes: usize,
    pub truncated_paths: usize,
    pub revisit_truncations: usize,
    pub depth_truncations: usize,
}

impl PathCounts {
    pub fn from_paths(paths: &BTreeMap<String, ExecutionPath>) -> Self {
        let mut counts = Self {
            paths: paths.len(),
            ..Self::default()
        };
        for path in paths.values() {
            counts.nodes += path.nodes.len();
            if path.truncated {
                counts.truncated_paths += 1;
            }
            for truncation in &path.truncations {
                match truncation.reason {
                    TruncationReason::Revisit => counts.revisit_truncations += 1,
                    TruncationReason::Depth => counts.depth_truncations += 1,
                }
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub modgraph_version: String,
    pub repository: String,
    pub facts: FactCounts,
    pub resolutions: ResolutionCounts,
    pub paths: PathCounts,
    pub evidence_lists_truncated: usize,
    pub reverse_entries_truncated: usize,
    /// Warning kind → count
    pub warnings: BTreeMap<String, usize>,
    pub phases: Vec<PhaseTiming>,
    pub total_duration_seconds: f64,
    /// SHA-256 of the manifest document
    pub fingerprint: String,
}

impl RunStatistics {
    pub fn new(repository: &Path) -> Self {
        Self {
            modgraph_version: env!("CARGO_PKG_VERSION").to_string(),
            repository: repository.display().to_string(),
            ..Self::default()
        }
    }

    pub fn record_phase(&mut self, phase: &str, duration: Duration) {
        self.phases.push(PhaseTiming {
            phase: phase.to_string(),
            duration_seconds: duration.as_secs_f64(),
        });
    }

    pub fn record_limits(&mut self, limits: LimitSummary) {
        self.evidence_lists_truncated = limits.evidence_lists_truncated;
        self.reverse_entries_truncated = limits.reverse_entries_truncated;
    }

    pub fn record_warnings(&mut self, warnings: &[Warning]) {
        self.warnings.clear();
        for warning in warnings {
            *self.warnings.entry(warning.kind.to_string()).or_insert(0) += 1;
        }
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.values().sum()
    }

    pub fn export_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WarningKind;
    use tempfile::TempDir;

    #[test]
    fn test_record_warnings_counts_by_kind() {
        let mut stats = RunStatistics::new(Path::new("/repo"));
        let warning = |kind| Warning {
            kind,
            subject: "s".to_string(),
            message: "m".to_string(),
        };
        stats.record_warnings(&[
            warning(WarningKind::UnknownScope),
            warning(WarningKind::UnknownScope),
            warning(WarningKind::FactCollection),
        ]);

        assert_eq!(stats.warnings["unknown_scope"], 2);
        assert_eq!(stats.warnings["fact_collection"], 1);
        assert_eq!(stats.warning_count(), 3);
    }

    #[test]
    fn test_export_to_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stats.json");
        let mut stats = RunStatistics::new(Path::new("/repo"));
        stats.record_phase("collect", Duration::from_millis(1500));
        stats.export_to_file(&path).unwrap();

        let loaded: RunStatistics =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, stats);
        assert_eq!(loaded.phases[0].duration_seconds, 1.5);
    }
}
