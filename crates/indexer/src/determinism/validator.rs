use super::canonical::{first_difference, render, sort_keys, to_canonical_value};
use super::limits::{apply_reverse_ceiling, cap_document_evidence};
use crate::config::AnalysisConfig;
use crate::errors::{EngineError, Result, Warning, WarningLog};
use crate::facts::{CanonicalFacts, ModuleId};
use crate::index::CrossReferenceIndex;
use crate::paths::ExecutionPath;
use crate::resolution::{InterceptionChain, Resolved};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const SYMBOL_INDEX_FILE: &str = "symbol_index.json";
pub const FILE_INDEX_FILE: &str = "file_index.json";
pub const REVERSE_INDEX_FILE: &str = "reverse_index.json";
pub const PREFERENCES_FILE: &str = "preferences.json";
pub const INTERCEPTION_CHAINS_FILE: &str = "interception_chains.json";
pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";
pub const EXECUTION_PATHS_FILE: &str = "execution_paths.json";
pub const WARNINGS_FILE: &str = "warnings.json";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const FORMAT_VERSION: u32 = 1;

/// Every document written by a run, in the order they are listed
pub const OUTPUT_FILES: [&str; 9] = [
    SYMBOL_INDEX_FILE,
    FILE_INDEX_FILE,
    REVERSE_INDEX_FILE,
    PREFERENCES_FILE,
    INTERCEPTION_CHAINS_FILE,
    SUBSCRIPTIONS_FILE,
    EXECUTION_PATHS_FILE,
    WARNINGS_FILE,
    MANIFEST_FILE,
];

#[derive(Serialize)]
struct ChainDocument<'a> {
    #[serde(flatten)]
    chain: &'a InterceptionChain,
    steps: Vec<String>,
}

/// How much the size ceilings cut from this bundle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitSummary {
    pub evidence_lists_truncated: usize,
    pub reverse_entries_truncated: usize,
}

/// Rendered output documents, ready to be written byte for byte
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalBundle {
    documents: BTreeMap<&'static str, String>,
    warnings: Vec<Warning>,
    limits: LimitSummary,
}

impl CanonicalBundle {
    /// Render every output document in canonical form.
    ///
    /// Size ceilings are applied here, so the warnings they raise still make
    /// it into the warnings document.
    pub fn assemble(
        facts: &CanonicalFacts,
        resolved: &Resolved,
        paths: &BTreeMap<String, ExecutionPath>,
        mut index: CrossReferenceIndex,
        config: &AnalysisConfig,
        mut warnings: WarningLog,
    ) -> Result<Self> {
        let mut limits = LimitSummary {
            reverse_entries_truncated: apply_reverse_ceiling(
                &mut index.reverse,
                config.reverse_index_ceiling,
                &mut warnings,
            ),
            ..LimitSummary::default()
        };

        let chains: Vec<ChainDocument<'_>> = resolved
            .chains
            .chains()
            .map(|chain| ChainDocument {
                chain,
                steps: chain.steps().iter().map(|step| step.label()).collect(),
            })
            .collect();
        let subscriptions: BTreeMap<_, _> = resolved
            .subscriptions
            .events()
            .map(|fan_out| (fan_out.event.as_str(), fan_out))
            .collect();
        let resolutions: Vec<_> = resolved.preferences.resolutions().collect();
        let module_order: &[ModuleId] = resolved.order.modules();

        let mut values: Vec<(&'static str, Value)> = vec![
            (
                SYMBOL_INDEX_FILE,
                to_canonical_value(&json!({ "symbols": index.symbols }))?,
            ),
            (
                FILE_INDEX_FILE,
                to_canonical_value(&json!({ "files": index.files }))?,
            ),
            (REVERSE_INDEX_FILE, to_canonical_value(&index.reverse)?),
            (
                PREFERENCES_FILE,
                to_canonical_value(&json!({
                    "module_order": module_order,
                    "resolutions": resolutions,
                    "effective": resolved.preferences.effective(&resolved.scopes),
                }))?,
            ),
            (
                INTERCEPTION_CHAINS_FILE,
                to_canonical_value(&json!({ "chains": chains }))?,
            ),
            (
                SUBSCRIPTIONS_FILE,
                to_canonical_value(&json!({ "events": subscriptions }))?,
            ),
            (
                EXECUTION_PATHS_FILE,
                to_canonical_value(&json!({ "paths": paths }))?,
            ),
        ];

        for (name, value) in &mut values {
            limits.evidence_lists_truncated +=
                cap_document_evidence(name, value, config.evidence_cap, &mut warnings);
        }

        let warnings = warnings.into_sorted();
        values.push((
            WARNINGS_FILE,
            to_canonical_value(&json!({
                "warnings": warnings,
                "failures": facts.failures(),
            }))?,
        ));

        let mut documents = BTreeMap::new();
        for (name, value) in values {
            documents.insert(name, render(&value)?);
        }
        let manifest = manifest(&documents)?;
        documents.insert(MANIFEST_FILE, render(&manifest)?);

        info!(
            "Assembled {} canonical documents ({} evidence lists and {} reverse entries truncated)",
            documents.len(),
            limits.evidence_lists_truncated,
            limits.reverse_entries_truncated
        );

        Ok(Self {
            documents,
            warnings,
            limits,
        })
    }

    pub fn documents(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.documents
            .iter()
            .map(|(name, text)| (*name, text.as_str()))
    }

    pub fn document(&self, name: &str) -> Option<&str> {
        self.documents.get(name).map(String::as_str)
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn limits(&self) -> LimitSummary {
        self.limits
    }

    /// Digest of the manifest, which covers every other document
    pub fn fingerprint(&self) -> String {
        self.document(MANIFEST_FILE).map(sha256_hex).unwrap_or_default()
    }
}

fn manifest(documents: &BTreeMap<&'static str, String>) -> Result<Value> {
    let entries: BTreeMap<&str, Value> = documents
        .iter()
        .map(|(name, text)| {
            (
                *name,
                json!({ "sha256": sha256_hex(text), "bytes": text.len() }),
            )
        })
        .collect();
    to_canonical_value(&json!({
        "format_version": FORMAT_VERSION,
        "documents": entries,
    }))
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Reload written documents and compare them with the bundle byte for byte
pub fn verify_written(bundle: &CanonicalBundle, directory: &Path) -> Result<()> {
    for (name, expected) in bundle.documents() {
        let path = directory.join(name);
        let written = fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;
        let reloaded: Value = serde_json::from_str(&written)?;
        let rerendered = render(&sort_keys(reloaded.clone()))?;

        if rerendered != expected || written != expected {
            let original: Value = serde_json::from_str(expected)?;
            let location = first_difference(&original, &reloaded)
                .unwrap_or_else(|| "$ (formatting)".to_string());
            return Err(EngineError::integrity(
                format!("{name}:{location}"),
                "written document is not byte-identical to its canonical form",
            ));
        }
        debug!("Verified {}", name);
    }
    info!("Verified {} documents byte for byte", bundle.documents.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactBatch;
    use crate::index::IndexBuilder;
    use crate::paths::PathReconstructor;
    use crate::resolution::ResolutionEngine;
    use tempfile::TempDir;

    fn empty_bundle() -> CanonicalBundle {
        let facts = CanonicalFacts::from_canonical(FactBatch::new());
        let config = AnalysisConfig::default();
        let mut warnings = WarningLog::new();
        let resolved = ResolutionEngine::new(&config).resolve(&facts, &mut warnings).unwrap();
        let paths = PathReconstructor::new(&facts, &resolved, config.max_depth)
            .reconstruct_all(None, &mut warnings)
            .unwrap();
        let index = IndexBuilder::new(&config).build(&facts, &resolved, &paths).unwrap();
        CanonicalBundle::assemble(&facts, &resolved, &paths, index, &config, warnings).unwrap()
    }

    #[test]
    fn test_bundle_lists_every_document() {
        let bundle = empty_bundle();
        let names: Vec<&str> = bundle.documents().map(|(name, _)| name).collect();
        let mut expected = OUTPUT_FILES.to_vec();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_manifest_digests_documents() {
        let bundle = empty_bundle();
        let manifest: Value = serde_json::from_str(bundle.document(MANIFEST_FILE).unwrap()).unwrap();
        let symbols = bundle.document(SYMBOL_INDEX_FILE).unwrap();

        assert_eq!(
            manifest["documents"][SYMBOL_INDEX_FILE]["sha256"],
            json!(sha256_hex(symbols))
        );
        assert!(manifest.get("timestamp").is_none());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let bundle = empty_bundle();
        let temp = TempDir::new().unwrap();
        for (name, text) in bundle.documents() {
            fs::write(temp.path().join(name), text).unwrap();
        }
        verify_written(&bundle, temp.path()).unwrap();

        fs::write(
            temp.path().join(SYMBOL_INDEX_FILE),
            "{\n  \"symbols\": {\n    \"x\": 1\n  }\n}\n",
        )
        .unwrap();
        let err = verify_written(&bundle, temp.path()).unwrap_err();
        match err {
            EngineError::IntegrityViolation { key, .. } => {
                assert_eq!(key, format!("{SYMBOL_INDEX_FILE}:$[\"symbols\"][\"x\"]"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
