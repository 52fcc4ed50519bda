//! Canonical identity scheme for files, modules, symbols and the other ids
//! that facts refer to.
//!
//! All functions here are pure except [`IdentityResolver::discover_module_roots`],
//! which walks the repository once looking for module marker files.

pub mod module_roots;
pub mod paths;

pub use module_roots::ModuleRoots;

use crate::errors::{EngineError, Result, WarningKind, WarningLog};
use crate::facts::{
    CanonicalFacts, EventId, Evidence, FactBatch, FileDecl, FileId, GLOBAL_SCOPE, ModuleId,
    ScopeId, SymbolDecl, SymbolId, UNASSIGNED_MODULE,
};
use ignore::WalkBuilder;
use paths::{from_any_separator, resolve_path, to_slash};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Canonical symbol id for a fully qualified name.
///
/// `::`, `/` and `\` all separate namespace segments; the canonical separator
/// is `\`. Empty segments are dropped and names are ASCII-lowercased, so
/// `\Vendor\Pay\Model`, `Vendor::Pay::Model` and `vendor/pay/model` share one id.
pub fn symbol_id(fqn: &str) -> SymbolId {
    let unified = fqn.trim().replace("::", "\\").replace('/', "\\");
    let segments: Vec<String> = unified
        .split('\\')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    SymbolId::new(segments.join("\\"))
}

/// Method names are case-insensitive
pub fn method_name(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn scope_id(raw: &str) -> ScopeId {
    let scope = raw.trim().to_ascii_lowercase();
    if scope.is_empty() {
        ScopeId::new(GLOBAL_SCOPE)
    } else {
        ScopeId::new(scope)
    }
}

pub fn event_id(raw: &str) -> EventId {
    EventId::new(raw.trim().to_ascii_lowercase())
}

/// Module names keep their casing; only surrounding whitespace is dropped
pub fn normalize_module(raw: &str) -> ModuleId {
    let module = raw.trim();
    if module.is_empty() {
        ModuleId::new(UNASSIGNED_MODULE)
    } else {
        ModuleId::new(module)
    }
}

/// Repository-relative, `/`-separated id of `path`.
///
/// Relative paths are taken relative to `repo_root`. Both `/` and `\` are
/// accepted as separators and symlinks are resolved, so every spelling of
/// the same file yields the same id. A path outside the repository is a
/// programming error and surfaces as an [`EngineError::IntegrityViolation`].
pub fn file_id(path: &Path, repo_root: &Path) -> Result<FileId> {
    let root = resolve_path(repo_root);
    file_id_under(path, &root)
}

fn file_id_under(path: &Path, resolved_root: &Path) -> Result<FileId> {
    let raw = from_any_separator(&path.to_string_lossy());
    let absolute = if raw.is_absolute() {
        raw
    } else {
        resolved_root.join(raw)
    };
    let resolved = resolve_path(&absolute);

    let relative = resolved.strip_prefix(resolved_root).map_err(|_| {
        EngineError::integrity(
            path.display().to_string(),
            format!(
                "path lies outside the repository root {}",
                resolved_root.display()
            ),
        )
    })?;
    Ok(FileId::new(to_slash(relative)))
}

/// Applies the identity scheme to a whole merged fact batch
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    repo_root: PathBuf,
}

impl IdentityResolver {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            repo_root: resolve_path(repo_root.as_ref()),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn file_id(&self, path: &Path) -> Result<FileId> {
        file_id_under(path, &self.repo_root)
    }

    fn file_id_str(&self, path: &str) -> Result<FileId> {
        self.file_id(Path::new(path))
    }

    /// Walk the repository once and return every directory holding one of
    /// the `markers` (paths relative to a module root, e.g. `etc/module.xml`).
    pub fn discover_module_roots(
        &self,
        markers: &[String],
        respect_gitignore: bool,
        cancellation_token: Option<&CancellationToken>,
    ) -> Result<Vec<FileId>> {
        let marker_parts: Vec<Vec<String>> = markers
            .iter()
            .map(|marker| {
                marker
                    .split(['/', '\\'])
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .filter(|parts: &Vec<String>| !parts.is_empty())
            .collect();

        let mut roots = Vec::new();
        if !self.repo_root.is_dir() {
            debug!(
                "Repository root {} is not a directory, no module roots discovered",
                self.repo_root.display()
            );
            return Ok(roots);
        }

        let walker = WalkBuilder::new(&self.repo_root)
            .hidden(true)
            .git_ignore(respect_gitignore)
            .git_global(false)
            .git_exclude(respect_gitignore)
            .ignore(respect_gitignore)
            .parents(false)
            .follow_links(false)
            .build();

        for entry in walker {
            if cancellation_token.is_some_and(|token| token.is_cancelled()) {
                return Err(EngineError::cancelled("during module root discovery"));
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry during module discovery: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.repo_root) else {
                continue;
            };
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            for marker in &marker_parts {
                if parts.len() >= marker.len() && parts.ends_with(marker) {
                    let root = parts[..parts.len() - marker.len()].join("/");
                    roots.push(FileId::new(root));
                }
            }
        }

        roots.sort();
        roots.dedup();
        info!("Discovered {} module roots", roots.len());
        Ok(roots)
    }

    /// Rewrite every identifier of `batch` into canonical form.
    ///
    /// Files are assigned to modules through the module roots; symbols take
    /// the module of their file. Facts that collapse onto the same key after
    /// canonicalization are merged again, and conflicting symbol declarations
    /// are reduced to the first in canonical order with a warning.
    pub fn canonicalize(
        &self,
        batch: FactBatch,
        discovered_roots: &[FileId],
        warnings: &mut WarningLog,
    ) -> Result<(CanonicalFacts, ModuleRoots)> {
        let FactBatch {
            modules,
            files,
            symbols,
            preferences,
            interceptions,
            subscriptions,
            entry_points,
            dispatches,
            calls,
            failures,
        } = batch;

        let mut canonical = FactBatch {
            failures,
            ..FactBatch::default()
        };

        for mut module in modules {
            module.id = normalize_module(module.id.as_str());
            module.root = self.file_id_str(&module.root)?.as_str().to_string();
            module.sequence = module
                .sequence
                .iter()
                .map(|m| normalize_module(m.as_str()))
                .collect();
            module.evidence = self.canonical_evidence(module.evidence)?;
            canonical.modules.push(module);
        }

        let roots = ModuleRoots::build(discovered_roots, &canonical.modules);

        for file in files {
            let id = self.file_id_str(&file.path)?;
            let module = roots.module_id(&id);
            canonical.files.push(FileDecl {
                path: id.as_str().to_string(),
                size: file.size,
                layer: file.layer.trim().to_ascii_lowercase(),
                module,
            });
        }

        for symbol in symbols {
            canonical.symbols.push(self.canonical_symbol(symbol, &roots)?);
        }

        for mut fact in preferences {
            fact.interface = symbol_id(fact.interface.as_str());
            fact.implementation = symbol_id(fact.implementation.as_str());
            fact.scope = scope_id(fact.scope.as_str());
            fact.module = normalize_module(fact.module.as_str());
            fact.evidence = self.canonical_evidence(fact.evidence)?;
            canonical.preferences.push(fact);
        }

        for mut fact in interceptions {
            fact.target = symbol_id(fact.target.as_str());
            fact.interceptor = symbol_id(fact.interceptor.as_str());
            fact.methods = canonical_methods(&fact.methods);
            fact.name = if fact.name.trim().is_empty() {
                fact.interceptor.as_str().to_string()
            } else {
                fact.name.trim().to_ascii_lowercase()
            };
            fact.scope = scope_id(fact.scope.as_str());
            fact.module = normalize_module(fact.module.as_str());
            fact.evidence = self.canonical_evidence(fact.evidence)?;
            canonical.interceptions.push(fact);
        }

        for mut fact in subscriptions {
            fact.event = event_id(fact.event.as_str());
            fact.subscriber = symbol_id(fact.subscriber.as_str());
            fact.name = if fact.name.trim().is_empty() {
                fact.subscriber.as_str().to_string()
            } else {
                fact.name.trim().to_ascii_lowercase()
            };
            fact.method = method_name(&fact.method);
            fact.scope = scope_id(fact.scope.as_str());
            fact.module = normalize_module(fact.module.as_str());
            fact.evidence = self.canonical_evidence(fact.evidence)?;
            canonical.subscriptions.push(fact);
        }

        for mut fact in entry_points {
            fact.identifier = fact.identifier.trim().to_string();
            fact.class = symbol_id(fact.class.as_str());
            fact.method = method_name(&fact.method);
            fact.scope = scope_id(fact.scope.as_str());
            fact.module = normalize_module(fact.module.as_str());
            fact.evidence = self.canonical_evidence(fact.evidence)?;
            canonical.entry_points.push(fact);
        }

        for mut fact in dispatches {
            fact.class = symbol_id(fact.class.as_str());
            fact.method = method_name(&fact.method);
            fact.event = event_id(fact.event.as_str());
            fact.module = normalize_module(fact.module.as_str());
            fact.evidence = self.canonical_evidence(fact.evidence)?;
            canonical.dispatches.push(fact);
        }

        for mut fact in calls {
            fact.caller = symbol_id(fact.caller.as_str());
            fact.caller_method = method_name(&fact.caller_method);
            fact.callee = symbol_id(fact.callee.as_str());
            fact.callee_method = method_name(&fact.callee_method);
            fact.module = normalize_module(fact.module.as_str());
            fact.evidence = self.canonical_evidence(fact.evidence)?;
            canonical.calls.push(fact);
        }

        canonical.normalize();
        canonical.files = unique_files(std::mem::take(&mut canonical.files));
        canonical.symbols = unique_symbols(std::mem::take(&mut canonical.symbols), warnings);

        info!(
            "Canonicalized {} facts, {} files, {} symbols across {} module roots",
            canonical.fact_count(),
            canonical.files.len(),
            canonical.symbols.len(),
            roots.len()
        );

        Ok((CanonicalFacts::from_canonical(canonical), roots))
    }

    fn canonical_symbol(&self, symbol: SymbolDecl, roots: &ModuleRoots) -> Result<SymbolDecl> {
        let file = self.file_id_str(&symbol.file)?;
        let by_root = roots.module_id(&file);
        let declared = normalize_module(symbol.module.as_str());
        let module = if by_root.as_str() == UNASSIGNED_MODULE {
            declared
        } else {
            by_root
        };

        let name = if symbol.name.trim().is_empty() {
            symbol.id.as_str().trim().trim_start_matches('\\').to_string()
        } else {
            symbol.name.trim().to_string()
        };

        let mut extends: Vec<SymbolId> =
            symbol.extends.iter().map(|s| symbol_id(s.as_str())).collect();
        extends.sort();
        extends.dedup();
        let mut implements: Vec<SymbolId> = symbol
            .implements
            .iter()
            .map(|s| symbol_id(s.as_str()))
            .collect();
        implements.sort();
        implements.dedup();

        Ok(SymbolDecl {
            id: symbol_id(symbol.id.as_str()),
            name,
            kind: symbol.kind,
            file: file.as_str().to_string(),
            module,
            extends,
            implements,
            operations: canonical_methods(&symbol.operations),
        })
    }

    fn canonical_evidence(&self, evidence: Vec<Evidence>) -> Result<Vec<Evidence>> {
        evidence
            .into_iter()
            .map(|mut item| {
                item.file = self.file_id_str(&item.file)?.as_str().to_string();
                Ok(item)
            })
            .collect()
    }
}

fn canonical_methods(methods: &[String]) -> Vec<String> {
    let mut methods: Vec<String> = methods
        .iter()
        .map(|m| method_name(m))
        .filter(|m| !m.is_empty())
        .collect();
    methods.sort();
    methods.dedup();
    methods
}

/// One declaration per path: the largest reported size and the first
/// classified layer in canonical order.
fn unique_files(files: Vec<FileDecl>) -> Vec<FileDecl> {
    let mut by_path: BTreeMap<String, FileDecl> = BTreeMap::new();
    for file in files {
        match by_path.entry(file.path.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(file);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.size = existing.size.max(file.size);
                if existing.layer == "unclassified" {
                    existing.layer = file.layer;
                }
            }
        }
    }
    by_path.into_values().collect()
}

fn unique_symbols(symbols: Vec<SymbolDecl>, warnings: &mut WarningLog) -> Vec<SymbolDecl> {
    let mut by_id: BTreeMap<SymbolId, SymbolDecl> = BTreeMap::new();
    let mut sorted = symbols;
    sorted.sort();
    sorted.dedup();

    for symbol in sorted {
        match by_id.entry(symbol.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(symbol);
            }
            Entry::Occupied(slot) => {
                warnings.push(
                    WarningKind::DuplicateSymbol,
                    symbol.id.as_str(),
                    format!(
                        "declared in both {} and {}; keeping {}",
                        slot.get().file,
                        symbol.file,
                        slot.get().file
                    ),
                );
            }
        }
    }
    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{
        InterceptionFact, InterceptorKind, ModuleDecl, PreferenceFact, SymbolKind,
    };
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_symbol_id_normalizes_separators_and_case() {
        let expected = SymbolId::new("pay\\gateway\\chargeinterface");
        assert_eq!(symbol_id("\\Pay\\Gateway\\ChargeInterface"), expected);
        assert_eq!(symbol_id("Pay::Gateway::ChargeInterface"), expected);
        assert_eq!(symbol_id(" pay/gateway//ChargeInterface\\ "), expected);
    }

    #[test]
    fn test_symbol_id_is_stable() {
        let once = symbol_id("Vendor\\Module\\Model");
        assert_eq!(symbol_id(once.as_str()), once);
    }

    #[test]
    fn test_symbol_id_keeps_distinct_names_distinct() {
        assert_ne!(symbol_id("A\\BC"), symbol_id("AB\\C"));
        assert_ne!(symbol_id("A\\B"), symbol_id("A\\B\\C"));
    }

    #[test]
    fn test_scope_and_event_ids() {
        assert_eq!(scope_id(" Frontend "), ScopeId::new("frontend"));
        assert_eq!(scope_id(""), ScopeId::new(GLOBAL_SCOPE));
        assert_eq!(event_id("Sales_Order_Save_After"), EventId::new("sales_order_save_after"));
    }

    #[test]
    fn test_file_id_is_separator_independent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let forward = file_id(Path::new("app/code/A/Model.php"), root).unwrap();
        let backward = file_id(Path::new("app\\code\\A\\Model.php"), root).unwrap();
        let absolute = file_id(&root.join("app/code/./B/../A/Model.php"), root).unwrap();

        assert_eq!(forward, FileId::new("app/code/A/Model.php"));
        assert_eq!(forward, backward);
        assert_eq!(forward, absolute);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_id_resolves_symlinks() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("real/dir")).unwrap();
        fs::write(root.join("real/dir/file.php"), "<?php").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let direct = file_id(&root.join("real/dir/file.php"), root).unwrap();
        let via_link = file_id(&root.join("link/dir/file.php"), root).unwrap();
        assert_eq!(direct, via_link);
    }

    #[test]
    fn test_file_id_outside_repository_is_integrity_violation() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();

        let err = file_id(&temp.path().join("elsewhere.php"), &repo).unwrap_err();
        assert!(matches!(err, EngineError::IntegrityViolation { .. }));
        let err = file_id(Path::new("../escape.php"), &repo).unwrap_err();
        assert!(matches!(err, EngineError::IntegrityViolation { .. }));
    }

    #[test]
    fn test_discover_module_roots_with_markers() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("app/code/Acme/Pay/etc")).unwrap();
        fs::write(root.join("app/code/Acme/Pay/etc/module.xml"), "<config/>").unwrap();
        fs::create_dir_all(root.join("vendor/acme/theme")).unwrap();
        fs::write(root.join("vendor/acme/theme/registration.php"), "<?php").unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/module.xml"), "<config/>").unwrap();

        let resolver = IdentityResolver::new(root);
        let roots = resolver
            .discover_module_roots(
                &["etc/module.xml".to_string(), "registration.php".to_string()],
                false,
                None,
            )
            .unwrap();

        assert_eq!(
            roots,
            vec![
                FileId::new("app/code/Acme/Pay"),
                FileId::new("vendor/acme/theme")
            ]
        );
    }

    #[test]
    fn test_discover_stops_on_cancellation() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("registration.php"), "<?php").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let resolver = IdentityResolver::new(temp.path());
        let err = resolver
            .discover_module_roots(&["registration.php".to_string()], false, Some(&token))
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[test]
    fn test_canonicalize_assigns_modules_and_merges_collapsed_facts() {
        let temp = TempDir::new().unwrap();
        let resolver = IdentityResolver::new(temp.path());
        let mut batch = FactBatch::new();
        batch.modules.push(ModuleDecl {
            id: ModuleId::new(" Acme_Pay "),
            root: "app/code/Acme/Pay/".to_string(),
            sequence: vec![],
            evidence: vec![],
        });
        batch.files.push(FileDecl {
            path: "app\\code\\Acme\\Pay\\Model\\Charge.php".to_string(),
            size: 10,
            layer: "Model".to_string(),
            module: ModuleId::new(UNASSIGNED_MODULE),
        });
        batch.files.push(FileDecl {
            path: "lib/Util.php".to_string(),
            size: 3,
            layer: "unclassified".to_string(),
            module: ModuleId::new("Bogus"),
        });
        batch.symbols.push(SymbolDecl {
            id: SymbolId::new("\\Acme\\Pay\\Model\\Charge"),
            name: String::new(),
            kind: SymbolKind::Class,
            file: "app/code/Acme/Pay/Model/Charge.php".to_string(),
            module: ModuleId::new(UNASSIGNED_MODULE),
            extends: vec![],
            implements: vec![SymbolId::new("Acme\\Pay\\Api\\ChargeInterface")],
            operations: vec!["Charge".to_string(), "charge".to_string()],
        });
        for interface in ["Acme\\Pay\\Api\\ChargeInterface", "acme::pay::api::chargeinterface"] {
            batch.preferences.push(PreferenceFact {
                interface: SymbolId::new(interface),
                implementation: SymbolId::new("Acme\\Pay\\Model\\Charge"),
                scope: ScopeId::new("GLOBAL"),
                module: ModuleId::new("Acme_Pay"),
                evidence: vec![Evidence::at_line("app/code/Acme/Pay/etc/di.xml", 3)],
            });
        }
        batch.interceptions.push(InterceptionFact {
            target: SymbolId::new("Acme\\Pay\\Model\\Charge"),
            methods: vec!["Capture".to_string()],
            interceptor: SymbolId::new("Acme\\Pay\\Plugin\\Log"),
            name: String::new(),
            scope: ScopeId::new(GLOBAL_SCOPE),
            order: 0,
            module: ModuleId::new("Acme_Pay"),
            kind: InterceptorKind::Before,
            disabled: false,
            evidence: vec![Evidence::new("app/code/Acme/Pay/etc/di.xml")],
        });

        let mut warnings = WarningLog::new();
        let (facts, roots) = resolver
            .canonicalize(FactBatch::merge(vec![batch]), &[], &mut warnings)
            .unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(facts.modules()[0].id, ModuleId::new("Acme_Pay"));
        assert_eq!(facts.modules()[0].root, "app/code/Acme/Pay");

        let files: Vec<(&str, &str)> = facts
            .files()
            .iter()
            .map(|f| (f.path.as_str(), f.module.as_str()))
            .collect();
        assert_eq!(
            files,
            vec![
                ("app/code/Acme/Pay/Model/Charge.php", "Acme_Pay"),
                ("lib/Util.php", UNASSIGNED_MODULE)
            ]
        );

        let symbol = &facts.symbols()[0];
        assert_eq!(symbol.id, SymbolId::new("acme\\pay\\model\\charge"));
        assert_eq!(symbol.name, "Acme\\Pay\\Model\\Charge");
        assert_eq!(symbol.module, ModuleId::new("Acme_Pay"));
        assert_eq!(symbol.operations, vec!["charge".to_string()]);

        assert_eq!(facts.preferences().len(), 1);
        assert_eq!(facts.preferences()[0].scope, ScopeId::new(GLOBAL_SCOPE));
        assert_eq!(
            facts.preferences()[0].evidence[0].file,
            "app/code/Acme/Pay/etc/di.xml"
        );

        let interception = &facts.interceptions()[0];
        assert_eq!(interception.name, "acme\\pay\\plugin\\log");
        assert_eq!(interception.methods, vec!["capture".to_string()]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_canonicalize_reports_duplicate_symbols() {
        let temp = TempDir::new().unwrap();
        let resolver = IdentityResolver::new(temp.path());
        let mut batch = FactBatch::new();
        for file in ["b/A.php", "a/A.php"] {
            batch.symbols.push(SymbolDecl {
                id: SymbolId::new("Vendor\\A"),
                name: String::new(),
                kind: SymbolKind::Class,
                file: file.to_string(),
                module: ModuleId::new(UNASSIGNED_MODULE),
                extends: vec![],
                implements: vec![],
                operations: vec![],
            });
        }

        let mut warnings = WarningLog::new();
        let (facts, _) = resolver.canonicalize(batch, &[], &mut warnings).unwrap();

        assert_eq!(facts.symbols().len(), 1);
        assert_eq!(facts.symbols()[0].file, "a/A.php");
        assert_eq!(warnings.count(WarningKind::DuplicateSymbol), 1);
    }
}
