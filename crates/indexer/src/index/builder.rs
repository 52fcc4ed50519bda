use super::{
    CrossReferenceIndex, FactRef, FileEntry, RefRole, ReverseEntry, ReverseIndex, SymbolEntry,
};
use crate::config::AnalysisConfig;
use crate::errors::{EngineError, Result};
use crate::facts::{CanonicalFacts, Fact, FactKind, FileId};
use crate::paths::ExecutionPath;
use crate::resolution::Resolved;
use crate::resolution::confidence::round_score;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Reference lists under construction, one per reverse-index section
#[derive(Default)]
struct Sections {
    by_symbol: FxHashMap<String, Vec<FactRef>>,
    by_module: FxHashMap<String, Vec<FactRef>>,
    by_event: FxHashMap<String, Vec<FactRef>>,
    by_entry_point: FxHashMap<String, Vec<FactRef>>,
}

fn add(section: &mut FxHashMap<String, Vec<FactRef>>, key: &str, kind: FactKind, fact_key: &str, role: RefRole) {
    section.entry(key.to_string()).or_default().push(FactRef {
        kind,
        key: fact_key.to_string(),
        role,
    });
}

fn seed(section: &mut FxHashMap<String, Vec<FactRef>>, key: &str) {
    section.entry(key.to_string()).or_default();
}

pub struct IndexBuilder<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Single aggregation pass over facts, resolutions and paths
    pub fn build(
        &self,
        facts: &CanonicalFacts,
        resolved: &Resolved,
        paths: &BTreeMap<String, ExecutionPath>,
    ) -> Result<CrossReferenceIndex> {
        let start = Instant::now();
        let mut sections = Sections::default();

        let symbols: BTreeMap<_, _> = facts
            .symbols()
            .iter()
            .map(|symbol| {
                seed(&mut sections.by_symbol, symbol.id.as_str());
                (
                    symbol.id.clone(),
                    SymbolEntry {
                        name: symbol.name.clone(),
                        kind: symbol.kind,
                        file: FileId::new(symbol.file.clone()),
                        module: symbol.module.clone(),
                        extends: symbol.extends.clone(),
                        implements: symbol.implements.clone(),
                        operations: symbol.operations.clone(),
                    },
                )
            })
            .collect();

        let files: BTreeMap<_, _> = facts
            .files()
            .iter()
            .map(|file| {
                (
                    file.file_id(),
                    FileEntry {
                        module: file.module.clone(),
                        layer: file.layer.clone(),
                        size: file.size,
                    },
                )
            })
            .collect();

        for module in facts.referenced_modules() {
            seed(&mut sections.by_module, module.as_str());
        }
        for event in facts.referenced_events() {
            seed(&mut sections.by_event, event.as_str());
        }
        for entry in facts.entry_points() {
            seed(&mut sections.by_entry_point, &entry.entry_key());
        }

        self.add_declarations(facts, &mut sections);
        self.add_facts(facts, &mut sections);
        self.add_resolutions(resolved, &mut sections);
        self.add_paths(paths, &mut sections);

        let reverse = ReverseIndex {
            by_symbol: self.finish(sections.by_symbol),
            by_module: self.finish(sections.by_module),
            by_event: self.finish(sections.by_event),
            by_entry_point: self.finish(sections.by_entry_point),
        };

        let index = CrossReferenceIndex {
            symbols,
            files,
            reverse,
        };
        verify_completeness(&index, facts)?;

        info!(
            "Built index: {} symbols, {} files, {} reverse entries in {:?}",
            index.symbols.len(),
            index.files.len(),
            index.reverse.entry_count(),
            start.elapsed()
        );
        Ok(index)
    }

    fn add_declarations(&self, facts: &CanonicalFacts, sections: &mut Sections) {
        for module in facts.modules() {
            let id = module.id.as_str();
            add(&mut sections.by_module, id, FactKind::Module, id, RefRole::Declares);
            for dependency in &module.sequence {
                add(
                    &mut sections.by_module,
                    dependency.as_str(),
                    FactKind::Module,
                    id,
                    RefRole::Dependent,
                );
            }
        }
        for file in facts.files() {
            add(
                &mut sections.by_module,
                file.module.as_str(),
                FactKind::File,
                &file.path,
                RefRole::Owner,
            );
        }
        for symbol in facts.symbols() {
            add(
                &mut sections.by_module,
                symbol.module.as_str(),
                FactKind::Symbol,
                symbol.id.as_str(),
                RefRole::Owner,
            );
            for parent in symbol.extends.iter().chain(symbol.implements.iter()) {
                add(
                    &mut sections.by_symbol,
                    parent.as_str(),
                    FactKind::Symbol,
                    symbol.id.as_str(),
                    RefRole::Dependent,
                );
            }
        }
    }

    fn add_facts(&self, facts: &CanonicalFacts, sections: &mut Sections) {
        for fact in facts.preferences() {
            let key = fact.key();
            let kind = FactKind::Preference;
            add(&mut sections.by_symbol, fact.interface.as_str(), kind, &key, RefRole::Interface);
            add(
                &mut sections.by_symbol,
                fact.implementation.as_str(),
                kind,
                &key,
                RefRole::Implementation,
            );
            add(&mut sections.by_module, fact.module.as_str(), kind, &key, RefRole::Declares);
        }

        for fact in facts.interceptions() {
            let key = fact.key();
            let kind = FactKind::Interception;
            add(&mut sections.by_symbol, fact.target.as_str(), kind, &key, RefRole::Target);
            add(
                &mut sections.by_symbol,
                fact.interceptor.as_str(),
                kind,
                &key,
                RefRole::Interceptor,
            );
            add(&mut sections.by_module, fact.module.as_str(), kind, &key, RefRole::Declares);
        }

        for fact in facts.subscriptions() {
            let key = fact.key();
            let kind = FactKind::Subscription;
            add(&mut sections.by_event, fact.event.as_str(), kind, &key, RefRole::Subscriber);
            add(
                &mut sections.by_symbol,
                fact.subscriber.as_str(),
                kind,
                &key,
                RefRole::Subscriber,
            );
            add(&mut sections.by_module, fact.module.as_str(), kind, &key, RefRole::Declares);
        }

        for fact in facts.dispatches() {
            let key = fact.key();
            let kind = FactKind::Dispatch;
            add(&mut sections.by_event, fact.event.as_str(), kind, &key, RefRole::Dispatcher);
            add(&mut sections.by_symbol, fact.class.as_str(), kind, &key, RefRole::Dispatcher);
            add(&mut sections.by_module, fact.module.as_str(), kind, &key, RefRole::Declares);
        }

        for fact in facts.calls() {
            let key = fact.key();
            let kind = FactKind::Call;
            add(&mut sections.by_symbol, fact.caller.as_str(), kind, &key, RefRole::Caller);
            add(&mut sections.by_symbol, fact.callee.as_str(), kind, &key, RefRole::Callee);
            add(&mut sections.by_module, fact.module.as_str(), kind, &key, RefRole::Declares);
        }

        for fact in facts.entry_points() {
            let key = fact.key();
            let kind = FactKind::EntryPoint;
            add(
                &mut sections.by_entry_point,
                &fact.entry_key(),
                kind,
                &key,
                RefRole::Declares,
            );
            add(&mut sections.by_symbol, fact.class.as_str(), kind, &key, RefRole::Handler);
            add(&mut sections.by_module, fact.module.as_str(), kind, &key, RefRole::Declares);
        }
    }

    fn add_resolutions(&self, resolved: &Resolved, sections: &mut Sections) {
        for resolution in resolved.preferences.resolutions() {
            let key = resolution.key();
            let kind = FactKind::Resolution;
            add(
                &mut sections.by_symbol,
                resolution.interface.as_str(),
                kind,
                &key,
                RefRole::Interface,
            );
            add(
                &mut sections.by_symbol,
                resolution.implementation.as_str(),
                kind,
                &key,
                RefRole::Implementation,
            );
        }

        for chain in resolved.chains.chains() {
            let key = chain.key();
            let kind = FactKind::InterceptionChain;
            add(&mut sections.by_symbol, chain.target.as_str(), kind, &key, RefRole::Target);
            for link in &chain.links {
                add(
                    &mut sections.by_symbol,
                    link.interceptor.as_str(),
                    kind,
                    &key,
                    RefRole::Interceptor,
                );
                add(&mut sections.by_module, link.module.as_str(), kind, &key, RefRole::Declares);
            }
        }
    }

    fn add_paths(&self, paths: &BTreeMap<String, ExecutionPath>, sections: &mut Sections) {
        let kind = FactKind::ExecutionPath;
        for (key, path) in paths {
            add(&mut sections.by_entry_point, key, kind, key, RefRole::Entry);
            for class in path.classes() {
                add(&mut sections.by_symbol, class.as_str(), kind, key, RefRole::Node);
            }
            for event in &path.events {
                add(&mut sections.by_event, event.as_str(), kind, key, RefRole::Event);
            }
        }
    }

    fn finish(&self, section: FxHashMap<String, Vec<FactRef>>) -> BTreeMap<String, ReverseEntry> {
        section
            .into_iter()
            .map(|(key, mut refs)| {
                refs.sort();
                refs.dedup();
                let score: f64 = refs.iter().map(|r| self.config.weight(r.kind)).sum();
                let entry = ReverseEntry {
                    total: refs.len(),
                    score: round_score(score),
                    truncated: false,
                    refs,
                };
                (key, entry)
            })
            .collect()
    }
}

/// Every symbol, referenced module, event and entry point must have a
/// reverse-index entry, even an empty one.
pub fn verify_completeness(index: &CrossReferenceIndex, facts: &CanonicalFacts) -> Result<()> {
    let reverse = &index.reverse;

    for symbol in index.symbols.keys() {
        if !reverse.by_symbol.contains_key(symbol.as_str()) {
            return Err(missing("by_symbol", symbol.as_str()));
        }
    }
    for module in facts.referenced_modules() {
        if !reverse.by_module.contains_key(module.as_str()) {
            return Err(missing("by_module", module.as_str()));
        }
    }
    for event in facts.referenced_events() {
        if !reverse.by_event.contains_key(event.as_str()) {
            return Err(missing("by_event", event.as_str()));
        }
    }
    for entry in facts.entry_points() {
        let key = entry.entry_key();
        if !reverse.by_entry_point.contains_key(&key) {
            return Err(missing("by_entry_point", &key));
        }
    }
    Ok(())
}

fn missing(section: &str, key: &str) -> EngineError {
    EngineError::integrity(format!("{section}[{key}]"), "missing reverse index entry")
}
