//! Typed, immutable records produced by fact collectors.
//!
//! Collectors hand the engine [`FactBatch`]es. Batches are merged by a single
//! reduction ([`FactBatch::merge`]) that sorts and de-duplicates every fact
//! list, so the merged result does not depend on the order in which
//! collectors finished. The identity resolver then turns the merged batch
//! into [`CanonicalFacts`], the only input the resolution phases accept.

pub mod ids;
pub mod types;

pub use ids::{EventId, FileId, ModuleId, ScopeId, SymbolId};
pub use types::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

pub const MERGE_STAGE: &str = "merge";

/// One collector run worth of facts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactBatch {
    pub modules: Vec<ModuleDecl>,
    pub files: Vec<FileDecl>,
    pub symbols: Vec<SymbolDecl>,
    pub preferences: Vec<PreferenceFact>,
    pub interceptions: Vec<InterceptionFact>,
    pub subscriptions: Vec<SubscriptionFact>,
    pub entry_points: Vec<EntryPointFact>,
    pub dispatches: Vec<DispatchFact>,
    pub calls: Vec<CallFact>,
    pub failures: Vec<CollectionFailure>,
}

impl FactBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge batches into one normalized batch.
    ///
    /// The result is identical for any permutation of `batches`.
    pub fn merge(batches: impl IntoIterator<Item = FactBatch>) -> FactBatch {
        let mut merged = FactBatch::default();
        for batch in batches {
            merged.extend(batch);
        }
        merged.normalize();
        merged
    }

    pub fn extend(&mut self, other: FactBatch) {
        self.modules.extend(other.modules);
        self.files.extend(other.files);
        self.symbols.extend(other.symbols);
        self.preferences.extend(other.preferences);
        self.interceptions.extend(other.interceptions);
        self.subscriptions.extend(other.subscriptions);
        self.entry_points.extend(other.entry_points);
        self.dispatches.extend(other.dispatches);
        self.calls.extend(other.calls);
        self.failures.extend(other.failures);
    }

    /// Sort every list, fold duplicate declarations together and reject facts
    /// without evidence.
    pub fn normalize(&mut self) {
        let mut failures = std::mem::take(&mut self.failures);

        self.modules = merge_modules(std::mem::take(&mut self.modules));
        self.files.sort();
        self.files.dedup();
        self.symbols.sort();
        self.symbols.dedup();
        self.preferences = merge_facts(std::mem::take(&mut self.preferences), &mut failures);
        self.interceptions = merge_facts(std::mem::take(&mut self.interceptions), &mut failures);
        self.subscriptions = merge_facts(std::mem::take(&mut self.subscriptions), &mut failures);
        self.entry_points = merge_facts(std::mem::take(&mut self.entry_points), &mut failures);
        self.dispatches = merge_facts(std::mem::take(&mut self.dispatches), &mut failures);
        self.calls = merge_facts(std::mem::take(&mut self.calls), &mut failures);

        failures.sort();
        failures.dedup();
        self.failures = failures;
    }

    /// Number of evidence-bearing facts (declarations excluded)
    pub fn fact_count(&self) -> usize {
        self.preferences.len()
            + self.interceptions.len()
            + self.subscriptions.len()
            + self.entry_points.len()
            + self.dispatches.len()
            + self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fact_count() == 0
            && self.modules.is_empty()
            && self.files.is_empty()
            && self.symbols.is_empty()
    }

    /// Every file path the batch mentions: module roots, declared files,
    /// symbol files and evidence pointers.
    pub fn referenced_paths(&self) -> impl Iterator<Item = &str> {
        fn evidence_files<T: Fact>(facts: &[T]) -> impl Iterator<Item = &str> {
            facts
                .iter()
                .flat_map(|fact| fact.evidence().iter().map(|e| e.file.as_str()))
        }

        self.modules
            .iter()
            .flat_map(|module| {
                std::iter::once(module.root.as_str())
                    .chain(module.evidence.iter().map(|e| e.file.as_str()))
            })
            .chain(self.files.iter().map(|file| file.path.as_str()))
            .chain(self.symbols.iter().map(|symbol| symbol.file.as_str()))
            .chain(evidence_files(&self.preferences))
            .chain(evidence_files(&self.interceptions))
            .chain(evidence_files(&self.subscriptions))
            .chain(evidence_files(&self.entry_points))
            .chain(evidence_files(&self.dispatches))
            .chain(evidence_files(&self.calls))
    }
}

fn merge_facts<T: Fact>(facts: Vec<T>, failures: &mut Vec<CollectionFailure>) -> Vec<T> {
    let mut by_key: BTreeMap<String, T> = BTreeMap::new();

    for mut fact in facts {
        let key = fact.key();
        if fact.evidence().is_empty() {
            failures.push(CollectionFailure {
                collector: MERGE_STAGE.to_string(),
                unit: format!("{}:{}", T::KIND, key),
                message: "fact carries no evidence".to_string(),
            });
            continue;
        }

        match by_key.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(fact);
            }
            Entry::Occupied(mut slot) => {
                let evidence = std::mem::take(fact.evidence_mut());
                slot.get_mut().evidence_mut().extend(evidence);
            }
        }
    }

    by_key
        .into_values()
        .map(|mut fact| {
            let evidence = fact.evidence_mut();
            evidence.sort();
            evidence.dedup();
            fact
        })
        .collect()
}

fn merge_modules(modules: Vec<ModuleDecl>) -> Vec<ModuleDecl> {
    let mut by_id: BTreeMap<(ModuleId, String), ModuleDecl> = BTreeMap::new();

    for module in modules {
        match by_id.entry((module.id.clone(), module.root.clone())) {
            Entry::Vacant(slot) => {
                slot.insert(module);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.sequence.extend(module.sequence);
                existing.evidence.extend(module.evidence);
            }
        }
    }

    by_id
        .into_values()
        .map(|mut module| {
            module.sequence.sort();
            module.sequence.dedup();
            module.evidence.sort();
            module.evidence.dedup();
            module
        })
        .collect()
}

/// Fact set whose identifiers have all been canonicalized.
///
/// Only the identity resolver constructs this type; every phase after it
/// takes a shared reference and never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFacts {
    batch: FactBatch,
}

impl CanonicalFacts {
    pub(crate) fn from_canonical(batch: FactBatch) -> Self {
        Self { batch }
    }

    pub fn modules(&self) -> &[ModuleDecl] {
        &self.batch.modules
    }

    pub fn files(&self) -> &[FileDecl] {
        &self.batch.files
    }

    pub fn symbols(&self) -> &[SymbolDecl] {
        &self.batch.symbols
    }

    pub fn preferences(&self) -> &[PreferenceFact] {
        &self.batch.preferences
    }

    pub fn interceptions(&self) -> &[InterceptionFact] {
        &self.batch.interceptions
    }

    pub fn subscriptions(&self) -> &[SubscriptionFact] {
        &self.batch.subscriptions
    }

    pub fn entry_points(&self) -> &[EntryPointFact] {
        &self.batch.entry_points
    }

    pub fn dispatches(&self) -> &[DispatchFact] {
        &self.batch.dispatches
    }

    pub fn calls(&self) -> &[CallFact] {
        &self.batch.calls
    }

    pub fn failures(&self) -> &[CollectionFailure] {
        &self.batch.failures
    }

    pub fn as_batch(&self) -> &FactBatch {
        &self.batch
    }

    /// Every module id mentioned anywhere in the fact set
    pub fn referenced_modules(&self) -> Vec<ModuleId> {
        let batch = &self.batch;
        let mut modules: Vec<ModuleId> = batch
            .modules
            .iter()
            .flat_map(|m| std::iter::once(m.id.clone()).chain(m.sequence.iter().cloned()))
            .chain(batch.files.iter().map(|f| f.module.clone()))
            .chain(batch.symbols.iter().map(|s| s.module.clone()))
            .chain(batch.preferences.iter().map(|f| f.module.clone()))
            .chain(batch.interceptions.iter().map(|f| f.module.clone()))
            .chain(batch.subscriptions.iter().map(|f| f.module.clone()))
            .chain(batch.entry_points.iter().map(|f| f.module.clone()))
            .chain(batch.dispatches.iter().map(|f| f.module.clone()))
            .chain(batch.calls.iter().map(|f| f.module.clone()))
            .collect();
        modules.sort();
        modules.dedup();
        modules
    }

    /// Every scope id mentioned by a scoped fact
    pub fn referenced_scopes(&self) -> Vec<ScopeId> {
        let batch = &self.batch;
        let mut scopes: Vec<ScopeId> = batch
            .preferences
            .iter()
            .map(|f| f.scope.clone())
            .chain(batch.interceptions.iter().map(|f| f.scope.clone()))
            .chain(batch.subscriptions.iter().map(|f| f.scope.clone()))
            .chain(batch.entry_points.iter().map(|f| f.scope.clone()))
            .collect();
        scopes.sort();
        scopes.dedup();
        scopes
    }

    /// Every event id mentioned by a subscription or dispatch
    pub fn referenced_events(&self) -> Vec<EventId> {
        let mut events: Vec<EventId> = self
            .batch
            .subscriptions
            .iter()
            .map(|f| f.event.clone())
            .chain(self.batch.dispatches.iter().map(|f| f.event.clone()))
            .collect();
        events.sort();
        events.dedup();
        events
    }
}
