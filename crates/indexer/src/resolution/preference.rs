use super::confidence::{ConfidencePolicy, round_score};
use super::order::ModuleOrder;
use super::scope::ScopeTree;
use crate::facts::{Evidence, ModuleId, PreferenceFact, ScopeId, SymbolId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Upper bound on preference chains followed by [`PreferenceMap::resolve_type`]
pub const MAX_SUBSTITUTION_CHAIN: usize = 16;

/// One implementation competing for an (interface, scope) slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceCandidate {
    pub implementation: SymbolId,
    pub modules: Vec<ModuleId>,
    pub evidence: Vec<Evidence>,
}

/// Decision for one (interface, scope) conflict set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceResolution {
    pub interface: SymbolId,
    pub scope: ScopeId,
    pub implementation: SymbolId,
    /// Module whose declaration won
    pub module: ModuleId,
    pub confidence: f64,
    pub candidates: Vec<PreferenceCandidate>,
}

impl PreferenceResolution {
    pub fn key(&self) -> String {
        format!("{}@{}", self.interface, self.scope)
    }
}

/// Effective substitution of one interface as seen from a scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivePreference {
    pub implementation: SymbolId,
    /// Scope whose declaration applies
    pub declared_at: ScopeId,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PreferenceMap {
    declared: BTreeMap<(SymbolId, ScopeId), PreferenceResolution>,
}

impl PreferenceMap {
    /// Resolve every (interface, scope) group.
    ///
    /// The declaration of the latest-loaded module wins; equal load positions
    /// fall back to the greater implementation id.
    pub fn resolve(
        facts: &[PreferenceFact],
        order: &ModuleOrder,
        policy: &dyn ConfidencePolicy,
    ) -> Self {
        let mut groups: BTreeMap<(SymbolId, ScopeId), Vec<&PreferenceFact>> = BTreeMap::new();
        for fact in facts {
            groups
                .entry((fact.interface.clone(), fact.scope.clone()))
                .or_default()
                .push(fact);
        }

        let mut declared = BTreeMap::new();
        for ((interface, scope), group) in groups {
            let Some(winner) = group
                .iter()
                .max_by(|a, b| {
                    (order.position(&a.module), &a.implementation, &a.module)
                        .cmp(&(order.position(&b.module), &b.implementation, &b.module))
                })
                .copied()
            else {
                continue;
            };

            let mut candidates: BTreeMap<&SymbolId, PreferenceCandidate> = BTreeMap::new();
            for fact in &group {
                let candidate = candidates
                    .entry(&fact.implementation)
                    .or_insert_with(|| PreferenceCandidate {
                        implementation: fact.implementation.clone(),
                        modules: Vec::new(),
                        evidence: Vec::new(),
                    });
                candidate.modules.push(fact.module.clone());
                candidate.evidence.extend(fact.evidence.iter().cloned());
            }
            let candidates: Vec<PreferenceCandidate> = candidates
                .into_values()
                .map(|mut candidate| {
                    candidate.modules.sort();
                    candidate.modules.dedup();
                    candidate.evidence.sort();
                    candidate.evidence.dedup();
                    candidate
                })
                .collect();

            let resolution = PreferenceResolution {
                interface: interface.clone(),
                scope: scope.clone(),
                implementation: winner.implementation.clone(),
                module: winner.module.clone(),
                confidence: round_score(policy.score(candidates.len())),
                candidates,
            };
            declared.insert((interface, scope), resolution);
        }

        Self { declared }
    }

    /// Resolution in force for `interface` at `scope`: the nearest scope on
    /// the path to `global` that declares one.
    pub fn lookup(
        &self,
        interface: &SymbolId,
        scope: &ScopeId,
        scopes: &ScopeTree,
    ) -> Option<&PreferenceResolution> {
        scopes
            .lineage(scope)
            .into_iter()
            .find_map(|candidate| self.declared.get(&(interface.clone(), candidate)))
    }

    /// Concrete type instantiated for `ty` at `scope`, following substitution
    /// chains (A → B → C). Stops on a repeat or after
    /// [`MAX_SUBSTITUTION_CHAIN`] hops.
    pub fn resolve_type(&self, ty: &SymbolId, scope: &ScopeId, scopes: &ScopeTree) -> SymbolId {
        let mut current = ty.clone();
        let mut seen = vec![current.clone()];
        for _ in 0..MAX_SUBSTITUTION_CHAIN {
            let Some(resolution) = self.lookup(&current, scope, scopes) else {
                break;
            };
            if seen.contains(&resolution.implementation) {
                break;
            }
            current = resolution.implementation.clone();
            seen.push(current.clone());
        }
        current
    }

    /// Effective preferences for every scope of the tree
    pub fn effective(
        &self,
        scopes: &ScopeTree,
    ) -> BTreeMap<ScopeId, BTreeMap<SymbolId, EffectivePreference>> {
        let mut interfaces: Vec<&SymbolId> = self.declared.keys().map(|(i, _)| i).collect();
        interfaces.dedup();

        scopes
            .scopes()
            .into_iter()
            .map(|scope| {
                let resolved = interfaces
                    .iter()
                    .filter_map(|interface| {
                        self.lookup(interface, &scope, scopes).map(|resolution| {
                            (
                                (*interface).clone(),
                                EffectivePreference {
                                    implementation: resolution.implementation.clone(),
                                    declared_at: resolution.scope.clone(),
                                    confidence: resolution.confidence,
                                },
                            )
                        })
                    })
                    .collect();
                (scope, resolved)
            })
            .collect()
    }

    pub fn resolutions(&self) -> impl Iterator<Item = &PreferenceResolution> {
        self.declared.values()
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Number of resolutions with more than one candidate
    pub fn conflict_count(&self) -> usize {
        self.declared
            .values()
            .filter(|resolution| resolution.candidates.len() > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WarningLog;
    use crate::facts::{CanonicalFacts, FactBatch, GLOBAL_SCOPE, ModuleDecl};
    use crate::resolution::confidence::ReciprocalDecay;

    fn preference(interface: &str, implementation: &str, scope: &str, module: &str) -> PreferenceFact {
        PreferenceFact {
            interface: SymbolId::new(interface),
            implementation: SymbolId::new(implementation),
            scope: ScopeId::new(scope),
            module: ModuleId::new(module),
            evidence: vec![Evidence::new(format!("app/code/{module}/etc/di.xml"))],
        }
    }

    fn order(modules: &[(&str, &[&str])]) -> ModuleOrder {
        let mut batch = FactBatch::new();
        for (id, sequence) in modules {
            batch.modules.push(ModuleDecl {
                id: ModuleId::new(*id),
                root: format!("app/code/{id}"),
                sequence: sequence.iter().map(|s| ModuleId::new(*s)).collect(),
                evidence: vec![],
            });
        }
        batch.normalize();
        ModuleOrder::compute(&CanonicalFacts::from_canonical(batch), &mut WarningLog::new())
            .unwrap()
    }

    fn scopes() -> ScopeTree {
        ScopeTree::new(
            &[
                ("frontend".to_string(), "global".to_string()),
                ("checkout".to_string(), "frontend".to_string()),
                ("adminhtml".to_string(), "global".to_string()),
            ]
            .into_iter()
            .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_specific_scope_wins_and_others_fall_back() {
        let order = order(&[("Pay", &[])]);
        let facts = vec![
            preference("pay\\gateway\\chargeinterface", "pay\\defaultcharge", GLOBAL_SCOPE, "Pay"),
            preference("pay\\gateway\\chargeinterface", "pay\\fastcharge", "checkout", "Pay"),
        ];
        let map = PreferenceMap::resolve(&facts, &order, &ReciprocalDecay);
        let scopes = scopes();
        let interface = SymbolId::new("pay\\gateway\\chargeinterface");

        let checkout = map.lookup(&interface, &ScopeId::new("checkout"), &scopes).unwrap();
        assert_eq!(checkout.implementation, SymbolId::new("pay\\fastcharge"));
        assert_eq!(checkout.confidence, 1.0);

        let admin = map.lookup(&interface, &ScopeId::new("adminhtml"), &scopes).unwrap();
        assert_eq!(admin.implementation, SymbolId::new("pay\\defaultcharge"));
        assert_eq!(admin.scope, ScopeId::new(GLOBAL_SCOPE));

        assert!(map.lookup(&SymbolId::new("other"), &ScopeId::new("checkout"), &scopes).is_none());
    }

    #[test]
    fn test_latest_loaded_module_wins_with_reduced_confidence() {
        let order = order(&[("Core", &[]), ("Custom", &["Core"])]);
        let facts = vec![
            preference("i", "custom\\impl", GLOBAL_SCOPE, "Custom"),
            preference("i", "core\\impl", GLOBAL_SCOPE, "Core"),
        ];
        let map = PreferenceMap::resolve(&facts, &order, &ReciprocalDecay);
        let resolution = map.resolutions().next().unwrap();

        assert_eq!(resolution.implementation, SymbolId::new("custom\\impl"));
        assert_eq!(resolution.confidence, 0.5);
        assert_eq!(resolution.candidates.len(), 2);
        assert_eq!(map.conflict_count(), 1);
    }

    #[test]
    fn test_equal_positions_break_on_implementation_id() {
        let order = order(&[("A", &[])]);
        let facts = vec![
            preference("i", "impl\\a", GLOBAL_SCOPE, "A"),
            preference("i", "impl\\b", GLOBAL_SCOPE, "A"),
        ];
        let forward = PreferenceMap::resolve(&facts, &order, &ReciprocalDecay);
        let reversed: Vec<_> = facts.iter().rev().cloned().collect();
        let backward = PreferenceMap::resolve(&reversed, &order, &ReciprocalDecay);

        let winner = |map: &PreferenceMap| map.resolutions().next().unwrap().implementation.clone();
        assert_eq!(winner(&forward), SymbolId::new("impl\\b"));
        assert_eq!(winner(&forward), winner(&backward));
    }

    #[test]
    fn test_resolve_type_follows_chains_and_stops_on_cycles() {
        let order = order(&[("A", &[])]);
        let facts = vec![
            preference("a", "b", GLOBAL_SCOPE, "A"),
            preference("b", "c", GLOBAL_SCOPE, "A"),
            preference("x", "y", GLOBAL_SCOPE, "A"),
            preference("y", "x", GLOBAL_SCOPE, "A"),
        ];
        let map = PreferenceMap::resolve(&facts, &order, &ReciprocalDecay);
        let scopes = scopes();
        let global = ScopeId::new(GLOBAL_SCOPE);

        assert_eq!(map.resolve_type(&SymbolId::new("a"), &global, &scopes), SymbolId::new("c"));
        assert_eq!(map.resolve_type(&SymbolId::new("x"), &global, &scopes), SymbolId::new("y"));
        assert_eq!(map.resolve_type(&SymbolId::new("z"), &global, &scopes), SymbolId::new("z"));
    }

    #[test]
    fn test_effective_covers_every_scope() {
        let order = order(&[("Pay", &[])]);
        let facts = vec![preference("i", "impl", "frontend", "Pay")];
        let map = PreferenceMap::resolve(&facts, &order, &ReciprocalDecay);
        let effective = map.effective(&scopes());

        assert!(effective[&ScopeId::new("checkout")].contains_key(&SymbolId::new("i")));
        assert!(effective[&ScopeId::new(GLOBAL_SCOPE)].is_empty());
    }
}
