use crate::errors::{EngineError, Result, WarningKind, WarningLog};
use crate::facts::{CanonicalFacts, ModuleId};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Topological load order of every module referenced by the fact set.
///
/// Later positions load later and therefore win conflicts.
#[derive(Debug, Clone, Default)]
pub struct ModuleOrder {
    order: Vec<ModuleId>,
    positions: FxHashMap<ModuleId, usize>,
}

impl ModuleOrder {
    /// Kahn's algorithm over the declared `sequence` dependencies.
    ///
    /// The ready set is kept sorted so that independent modules always load in
    /// lexicographic order. A cycle is fatal.
    pub fn compute(facts: &CanonicalFacts, warnings: &mut WarningLog) -> Result<Self> {
        let nodes: BTreeSet<ModuleId> = facts.referenced_modules().into_iter().collect();
        let declared: BTreeSet<&ModuleId> = facts.modules().iter().map(|m| &m.id).collect();

        // dependency -> dependents
        let mut dependents: BTreeMap<&ModuleId, BTreeSet<&ModuleId>> = BTreeMap::new();
        // module -> dependencies
        let mut dependencies: BTreeMap<&ModuleId, BTreeSet<&ModuleId>> = BTreeMap::new();

        for module in facts.modules() {
            for dependency in &module.sequence {
                if !declared.contains(dependency) {
                    warnings.push(
                        WarningKind::UnknownModuleDependency,
                        module.id.as_str(),
                        format!("depends on undeclared module '{dependency}'; dependency ignored"),
                    );
                    continue;
                }
                dependents.entry(dependency).or_default().insert(&module.id);
                dependencies.entry(&module.id).or_default().insert(dependency);
            }
        }

        let mut in_degree: BTreeMap<&ModuleId, usize> = nodes
            .iter()
            .map(|node| (node, dependencies.get(node).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: BTreeSet<&ModuleId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(next.clone());
            if let Some(children) = dependents.get(next) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(*child);
                        }
                    }
                }
            }
        }

        if order.len() < nodes.len() {
            let placed: BTreeSet<&ModuleId> = order.iter().collect();
            let cycle = find_cycle(&dependencies, &placed);
            let first = cycle.first().map(ToString::to_string).unwrap_or_default();
            let rendered: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            return Err(EngineError::integrity(
                first,
                format!("module dependency cycle: {}", rendered.join(" -> ")),
            ));
        }

        let positions = order
            .iter()
            .enumerate()
            .map(|(position, module)| (module.clone(), position))
            .collect();

        info!("Computed load order for {} modules", order.len());
        Ok(Self { order, positions })
    }

    /// Load position of `module`; modules unknown to the run sort first
    pub fn position(&self, module: &ModuleId) -> usize {
        self.positions.get(module).copied().unwrap_or(0)
    }

    pub fn modules(&self) -> &[ModuleId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Follow the smallest unplaced dependency from the smallest unplaced module
/// until a module repeats. Every unplaced module has one, so this terminates
/// on a cycle; the cycle is returned closed (`a -> b -> a`).
fn find_cycle(
    dependencies: &BTreeMap<&ModuleId, BTreeSet<&ModuleId>>,
    placed: &BTreeSet<&ModuleId>,
) -> Vec<ModuleId> {
    let Some(mut current) = dependencies
        .keys()
        .copied()
        .find(|module| !placed.contains(module))
    else {
        return Vec::new();
    };

    let mut walk: Vec<&ModuleId> = Vec::new();
    loop {
        if let Some(start) = walk.iter().position(|module| *module == current) {
            let mut cycle: Vec<ModuleId> = walk[start..].iter().map(|m| (*m).clone()).collect();
            cycle.push(current.clone());
            return cycle;
        }
        walk.push(current);
        let next = dependencies
            .get(current)
            .and_then(|deps| deps.iter().copied().find(|dep| !placed.contains(dep)));
        match next {
            Some(next) => current = next,
            None => return walk.into_iter().cloned().collect(),
        }
    }
}
