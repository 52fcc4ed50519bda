//! Analysis configuration.
//!
//! Values are layered: built-in defaults, then the project's `modgraph.toml`,
//! then explicit caller overrides. The result is validated once and passed by
//! shared reference into every phase.

use crate::collection::CollectorKind;
use crate::errors::ConfigError;
use crate::facts::FactKind;
use crate::resolution::confidence::{ConfidencePolicy, GeometricDecay, ReciprocalDecay};
use crate::resolution::scope::ScopeTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "modgraph.toml";
pub const DEFAULT_FACTS_DIR: &str = ".modgraph/facts";

/// Which decay function turns a candidate count into a confidence
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case", deny_unknown_fields)]
pub enum ConfidenceConfig {
    #[default]
    Reciprocal,
    Geometric { ratio: f64 },
}

impl ConfidenceConfig {
    pub fn policy(&self) -> Box<dyn ConfidencePolicy> {
        match self {
            Self::Reciprocal => Box::new(ReciprocalDecay),
            Self::Geometric { ratio } => Box::new(GeometricDecay { ratio: *ratio }),
        }
    }
}

/// Files with a directory named `segment` in their path belong to `layer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerRule {
    pub segment: String,
    pub layer: String,
}

impl LayerRule {
    fn new(segment: &str, layer: &str) -> Self {
        Self {
            segment: segment.to_string(),
            layer: layer.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Scope hierarchy as child → parent; `global` is implicit
    pub scopes: BTreeMap<String, String>,
    pub evidence_cap: usize,
    pub weights: BTreeMap<FactKind, f64>,
    pub reverse_index_ceiling: usize,
    pub max_depth: usize,
    /// Marker files locating module roots, relative to the root
    pub module_markers: Vec<String>,
    pub confidence: ConfidenceConfig,
    pub respect_gitignore: bool,
    pub max_file_size: u64,
    pub layers: Vec<LayerRule>,
    /// 0 means one per CPU
    pub threads: usize,
    pub collectors: Vec<CollectorKind>,
    /// Where pre-extracted fact batches live, relative to the repository
    pub facts_dir: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let scopes = [
            "frontend",
            "adminhtml",
            "crontab",
            "webapi_rest",
            "webapi_soap",
            "graphql",
        ]
        .into_iter()
        .map(|scope| (scope.to_string(), "global".to_string()))
        .collect();

        let weights = [
            (FactKind::Module, 0.5),
            (FactKind::File, 0.25),
            (FactKind::Symbol, 0.5),
            (FactKind::Preference, 1.0),
            (FactKind::Interception, 1.0),
            (FactKind::Subscription, 1.0),
            (FactKind::EntryPoint, 1.0),
            (FactKind::Dispatch, 0.75),
            (FactKind::Call, 0.5),
            (FactKind::Resolution, 1.0),
            (FactKind::InterceptionChain, 1.0),
            (FactKind::ExecutionPath, 0.5),
        ]
        .into_iter()
        .collect();

        Self {
            scopes,
            evidence_cap: 5,
            weights,
            reverse_index_ceiling: 500,
            max_depth: 8,
            module_markers: vec!["etc/module.xml".to_string(), "registration.php".to_string()],
            confidence: ConfidenceConfig::default(),
            respect_gitignore: true,
            max_file_size: 5_000_000,
            layers: vec![
                LayerRule::new("Controller", "controller"),
                LayerRule::new("Model", "model"),
                LayerRule::new("Block", "view"),
                LayerRule::new("view", "view"),
                LayerRule::new("Observer", "observer"),
                LayerRule::new("Plugin", "plugin"),
                LayerRule::new("Api", "api"),
                LayerRule::new("Console", "command"),
                LayerRule::new("Cron", "scheduled"),
                LayerRule::new("Setup", "setup"),
                LayerRule::new("etc", "config"),
            ],
            threads: 0,
            collectors: vec![CollectorKind::Filesystem, CollectorKind::FactFiles],
            facts_dir: PathBuf::from(DEFAULT_FACTS_DIR),
        }
    }
}

/// On-disk shape of `modgraph.toml`. Every key is optional; maps merge into
/// the defaults key by key, lists replace them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub scopes: Option<BTreeMap<String, String>>,
    pub evidence_cap: Option<usize>,
    pub weights: Option<BTreeMap<String, f64>>,
    pub reverse_index_ceiling: Option<usize>,
    pub max_depth: Option<usize>,
    pub module_markers: Option<Vec<String>>,
    pub confidence: Option<ConfidenceConfig>,
    pub respect_gitignore: Option<bool>,
    pub max_file_size: Option<u64>,
    pub layers: Option<Vec<LayerRule>>,
    pub threads: Option<usize>,
    pub collectors: Option<Vec<CollectorKind>>,
    pub facts_dir: Option<PathBuf>,
}

/// Values supplied explicitly by the caller; they win over the config file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub evidence_cap: Option<usize>,
    pub reverse_index_ceiling: Option<usize>,
    pub max_depth: Option<usize>,
    pub threads: Option<usize>,
    pub respect_gitignore: Option<bool>,
    pub facts_dir: Option<PathBuf>,
    pub scopes: BTreeMap<String, String>,
    pub weights: BTreeMap<String, f64>,
}

impl AnalysisConfig {
    /// Layer defaults, the project config file and `overrides`, then validate.
    ///
    /// `config_path` names an explicit config file, which must exist. Without
    /// it `modgraph.toml` at the repository root is used when present.
    pub fn load(
        repo_root: &Path,
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let file = match config_path {
            Some(path) => Some(ConfigFile::read(path)?),
            None => {
                let candidate = repo_root.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Some(ConfigFile::read(&candidate)?)
                } else {
                    debug!("No {} found, using defaults", CONFIG_FILE_NAME);
                    None
                }
            }
        };

        if let Some(file) = file {
            config.apply_file(file)?;
        }
        config.apply_overrides(overrides)?;
        config.validate()?;

        info!(
            "Configuration loaded: {} scopes, evidence cap {}, reverse index ceiling {}, max depth {}",
            config.scopes.len() + 1,
            config.evidence_cap,
            config.reverse_index_ceiling,
            config.max_depth
        );
        Ok(config)
    }

    pub fn apply_file(&mut self, file: ConfigFile) -> Result<(), ConfigError> {
        if let Some(scopes) = file.scopes {
            self.scopes.extend(scopes);
        }
        if let Some(weights) = file.weights {
            self.merge_weights(&weights)?;
        }
        if let Some(cap) = file.evidence_cap {
            self.evidence_cap = cap;
        }
        if let Some(ceiling) = file.reverse_index_ceiling {
            self.reverse_index_ceiling = ceiling;
        }
        if let Some(depth) = file.max_depth {
            self.max_depth = depth;
        }
        if let Some(markers) = file.module_markers {
            self.module_markers = markers;
        }
        if let Some(confidence) = file.confidence {
            self.confidence = confidence;
        }
        if let Some(respect) = file.respect_gitignore {
            self.respect_gitignore = respect;
        }
        if let Some(size) = file.max_file_size {
            self.max_file_size = size;
        }
        if let Some(layers) = file.layers {
            self.layers = layers;
        }
        if let Some(threads) = file.threads {
            self.threads = threads;
        }
        if let Some(collectors) = file.collectors {
            self.collectors = collectors;
        }
        if let Some(facts_dir) = file.facts_dir {
            self.facts_dir = facts_dir;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        self.scopes.extend(overrides.scopes.clone());
        self.merge_weights(&overrides.weights)?;
        if let Some(cap) = overrides.evidence_cap {
            self.evidence_cap = cap;
        }
        if let Some(ceiling) = overrides.reverse_index_ceiling {
            self.reverse_index_ceiling = ceiling;
        }
        if let Some(depth) = overrides.max_depth {
            self.max_depth = depth;
        }
        if let Some(threads) = overrides.threads {
            self.threads = threads;
        }
        if let Some(respect) = overrides.respect_gitignore {
            self.respect_gitignore = respect;
        }
        if let Some(facts_dir) = &overrides.facts_dir {
            self.facts_dir = facts_dir.clone();
        }
        Ok(())
    }

    fn merge_weights(&mut self, weights: &BTreeMap<String, f64>) -> Result<(), ConfigError> {
        for (name, weight) in weights {
            let kind = FactKind::from_str(name.trim())
                .map_err(|_| ConfigError::invalid(format!("weights.{name}"), "unknown fact kind"))?;
            self.weights.insert(kind, *weight);
        }
        Ok(())
    }

    /// Reject contradictory or out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scope_tree()?;

        if self.evidence_cap == 0 {
            return Err(ConfigError::invalid("evidence_cap", "must be at least 1"));
        }
        if self.reverse_index_ceiling == 0 {
            return Err(ConfigError::invalid(
                "reverse_index_ceiling",
                "must be at least 1",
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::invalid("max_depth", "must be at least 1"));
        }
        for (kind, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::invalid(
                    format!("weights.{kind}"),
                    format!("must be a finite, non-negative number (got {weight})"),
                ));
            }
        }
        if let ConfidenceConfig::Geometric { ratio } = self.confidence {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::invalid(
                    "confidence.ratio",
                    format!("must be in (0, 1] (got {ratio})"),
                ));
            }
        }
        for marker in &self.module_markers {
            let trimmed = marker.trim();
            if trimmed.is_empty() || Path::new(trimmed).is_absolute() || trimmed.starts_with('/') {
                return Err(ConfigError::invalid(
                    "module_markers",
                    format!("'{marker}' must be a non-empty relative path"),
                ));
            }
        }
        for rule in &self.layers {
            if rule.segment.trim().is_empty() || rule.layer.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "layers",
                    "segment and layer must both be non-empty",
                ));
            }
        }
        if self.collectors.is_empty() {
            return Err(ConfigError::invalid(
                "collectors",
                "at least one collector must be enabled",
            ));
        }
        if self.facts_dir.is_absolute() {
            return Err(ConfigError::invalid(
                "facts_dir",
                "must be relative to the repository root",
            ));
        }
        Ok(())
    }

    pub fn scope_tree(&self) -> Result<ScopeTree, ConfigError> {
        ScopeTree::new(&self.scopes)
    }

    /// Configured weight of one fact kind
    pub fn weight(&self, kind: FactKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(1.0)
    }

    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
