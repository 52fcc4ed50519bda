pub mod analyze;
pub mod check_config;

use crate::cli::ConfigArgs;
use indexer::config::{AnalysisConfig, ConfigOverrides};

impl ConfigArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            evidence_cap: self.evidence_cap,
            reverse_index_ceiling: self.reverse_index_ceiling,
            max_depth: self.max_depth,
            threads: self.threads,
            respect_gitignore: self.no_gitignore.then_some(false),
            facts_dir: self.facts_dir.clone(),
            scopes: self.scopes.iter().cloned().collect(),
            weights: self.weights.iter().cloned().collect(),
        }
    }

    pub fn load(&self) -> anyhow::Result<AnalysisConfig> {
        let config =
            AnalysisConfig::load(&self.repo_path, self.config.as_deref(), &self.overrides())?;
        Ok(config)
    }
}
