//! Interception chain resolution.
//!
//! A chain is resolved per (type, method, scope). Declarations apply to the
//! declared target and every descendant of it, and to the declaring scope and
//! every scope below it. Declarations sharing a (name, kind) narrow each
//! other: the most specific one wins and may disable the interceptor.

use super::ancestry::TypeHierarchy;
use super::order::ModuleOrder;
use super::scope::ScopeTree;
use crate::facts::{
    Evidence, Fact, InterceptionFact, InterceptorKind, ModuleId, ScopeId, SymbolId,
};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainLink {
    pub interceptor: SymbolId,
    pub name: String,
    pub kind: InterceptorKind,
    pub order: i64,
    pub module: ModuleId,
    /// Scope of the winning declaration
    pub scope: ScopeId,
    /// Type the winning declaration targets (the chain's type or an ancestor)
    pub declared_on: SymbolId,
    /// Method invoked on the interceptor, e.g. `beforesave`
    pub hook: String,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterceptionChain {
    pub target: SymbolId,
    pub method: String,
    pub scope: ScopeId,
    /// Total order: order key, module load position, interceptor, kind, name
    pub links: Vec<ChainLink>,
}

/// One step of an intercepted call, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStep<'a> {
    Before(&'a SymbolId),
    AroundEnter(&'a SymbolId),
    Original,
    AroundExit(&'a SymbolId),
    After(&'a SymbolId),
}

impl InvocationStep<'_> {
    pub fn label(&self) -> String {
        match self {
            Self::Before(id) => format!("before {id}"),
            Self::AroundEnter(id) => format!("around-enter {id}"),
            Self::Original => "original".to_string(),
            Self::AroundExit(id) => format!("around-exit {id}"),
            Self::After(id) => format!("after {id}"),
        }
    }
}

/// How the links of a chain wrap the original call
#[derive(Debug, Clone, PartialEq)]
pub struct CallNesting<'a> {
    /// Ascending order
    pub before: Vec<&'a ChainLink>,
    /// Outermost first
    pub around: Vec<&'a ChainLink>,
    /// Descending order
    pub after: Vec<&'a ChainLink>,
}

impl InterceptionChain {
    pub fn nesting(&self) -> CallNesting<'_> {
        let of_kind = |kind: InterceptorKind| -> Vec<&ChainLink> {
            self.links.iter().filter(|link| link.kind == kind).collect()
        };
        let mut after = of_kind(InterceptorKind::After);
        after.reverse();
        CallNesting {
            before: of_kind(InterceptorKind::Before),
            around: of_kind(InterceptorKind::Around),
            after,
        }
    }

    pub fn steps(&self) -> Vec<InvocationStep<'_>> {
        let nesting = self.nesting();
        let mut steps: Vec<InvocationStep<'_>> = nesting
            .before
            .iter()
            .map(|link| InvocationStep::Before(&link.interceptor))
            .collect();
        steps.extend(
            nesting
                .around
                .iter()
                .map(|link| InvocationStep::AroundEnter(&link.interceptor)),
        );
        steps.push(InvocationStep::Original);
        steps.extend(
            nesting
                .around
                .iter()
                .rev()
                .map(|link| InvocationStep::AroundExit(&link.interceptor)),
        );
        steps.extend(
            nesting
                .after
                .iter()
                .map(|link| InvocationStep::After(&link.interceptor)),
        );
        steps
    }

    pub fn key(&self) -> String {
        format!("{}::{}@{}", self.target, self.method, self.scope)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainMap {
    chains: BTreeMap<(SymbolId, String), BTreeMap<ScopeId, InterceptionChain>>,
}

impl ChainMap {
    pub fn resolve(
        facts: &[InterceptionFact],
        hierarchy: &TypeHierarchy,
        scopes: &ScopeTree,
        order: &ModuleOrder,
    ) -> Self {
        // every (type, method) some declaration can reach
        let mut targets: BTreeSet<(SymbolId, String)> = BTreeSet::new();
        for fact in facts {
            let reached: Vec<SymbolId> = std::iter::once(fact.target.clone())
                .chain(hierarchy.descendants(&fact.target))
                .collect();
            for ty in reached {
                for method in &fact.methods {
                    targets.insert((ty.clone(), method.clone()));
                }
            }
        }

        let mut chains = BTreeMap::new();
        for (ty, method) in targets {
            let ancestors: BTreeMap<SymbolId, usize> = hierarchy.ancestors(&ty).into_iter().collect();
            let relevant: Vec<(&InterceptionFact, usize)> = facts
                .iter()
                .filter(|fact| fact.methods.contains(&method))
                .filter_map(|fact| ancestors.get(&fact.target).map(|d| (fact, *d)))
                .collect();

            let declaring_scopes: BTreeSet<&ScopeId> =
                relevant.iter().map(|(fact, _)| &fact.scope).collect();

            let mut per_scope = BTreeMap::new();
            for scope in declaring_scopes {
                let chain = build_chain(&ty, &method, scope, &relevant, scopes, order);
                per_scope.insert(scope.clone(), chain);
            }
            chains.insert((ty, method), per_scope);
        }

        Self { chains }
    }

    /// Chain in force for `ty::method` at `scope`; `None` when nothing
    /// intercepts the method at that scope or above.
    pub fn chain_for(
        &self,
        ty: &SymbolId,
        method: &str,
        scope: &ScopeId,
        scopes: &ScopeTree,
    ) -> Option<&InterceptionChain> {
        let per_scope = self.chains.get(&(ty.clone(), method.to_string()))?;
        scopes
            .lineage(scope)
            .into_iter()
            .find_map(|candidate| per_scope.get(&candidate))
    }

    pub fn chains(&self) -> impl Iterator<Item = &InterceptionChain> {
        self.chains.values().flat_map(BTreeMap::values)
    }

    pub fn len(&self) -> usize {
        self.chains.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

fn build_chain(
    ty: &SymbolId,
    method: &str,
    scope: &ScopeId,
    relevant: &[(&InterceptionFact, usize)],
    scopes: &ScopeTree,
    order: &ModuleOrder,
) -> InterceptionChain {
    let lineage = scopes.lineage(scope);

    // (name, kind) -> most specific declaration
    let mut winners: BTreeMap<(&str, InterceptorKind), (&InterceptionFact, usize)> = BTreeMap::new();
    for (fact, distance) in relevant {
        if !lineage.contains(&fact.scope) {
            continue;
        }
        let slot = (fact.name.as_str(), fact.kind);
        let replace = match winners.get(&slot) {
            None => true,
            Some((current, current_distance)) => {
                specificity(fact, *distance, scopes, order)
                    > specificity(current, *current_distance, scopes, order)
            }
        };
        if replace {
            winners.insert(slot, (*fact, *distance));
        }
    }

    let mut links: Vec<(usize, ChainLink)> = winners
        .into_values()
        .filter(|(fact, _)| !fact.disabled)
        .map(|(fact, _)| {
            (
                order.position(&fact.module),
                ChainLink {
                    interceptor: fact.interceptor.clone(),
                    name: fact.name.clone(),
                    kind: fact.kind,
                    order: fact.order,
                    module: fact.module.clone(),
                    scope: fact.scope.clone(),
                    declared_on: fact.target.clone(),
                    hook: fact.kind.hook_method(method),
                    evidence: fact.evidence.clone(),
                },
            )
        })
        .collect();

    links.sort_by(|(a_pos, a), (b_pos, b)| {
        (a.order, a_pos, &a.interceptor, a.kind, &a.name)
            .cmp(&(b.order, b_pos, &b.interceptor, b.kind, &b.name))
    });

    InterceptionChain {
        target: ty.clone(),
        method: method.to_string(),
        scope: scope.clone(),
        links: links.into_iter().map(|(_, link)| link).collect(),
    }
}

/// Deeper scope first, then nearer type, then later module; the fact key
/// makes the comparison total.
fn specificity(
    fact: &InterceptionFact,
    distance: usize,
    scopes: &ScopeTree,
    order: &ModuleOrder,
) -> (usize, Reverse<usize>, usize, String) {
    (
        scopes.depth(&fact.scope),
        Reverse(distance),
        order.position(&fact.module),
        fact.key(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{GLOBAL_SCOPE, SymbolDecl, SymbolKind};

    fn interception(
        target: &str,
        interceptor: &str,
        kind: InterceptorKind,
        order: i64,
        scope: &str,
    ) -> InterceptionFact {
        InterceptionFact {
            target: SymbolId::new(target),
            methods: vec!["save".to_string()],
            interceptor: SymbolId::new(interceptor),
            name: interceptor.to_string(),
            scope: ScopeId::new(scope),
            order,
            module: ModuleId::new("M"),
            kind,
            disabled: false,
            evidence: vec![Evidence::new("etc/di.xml")],
        }
    }

    fn scopes() -> ScopeTree {
        ScopeTree::new(&[("frontend".to_string(), "global".to_string())].into_iter().collect())
            .unwrap()
    }

    fn interceptors(chain: &InterceptionChain) -> Vec<&str> {
        chain.links.iter().map(|l| l.interceptor.as_str()).collect()
    }

    fn resolve(facts: &[InterceptionFact], symbols: &[SymbolDecl]) -> ChainMap {
        ChainMap::resolve(
            facts,
            &TypeHierarchy::new(symbols),
            &scopes(),
            &ModuleOrder::default(),
        )
    }

    #[test]
    fn test_around_and_before_nesting() {
        let facts = vec![
            interception("a", "p1", InterceptorKind::Around, 10, GLOBAL_SCOPE),
            interception("a", "p2", InterceptorKind::Before, 5, GLOBAL_SCOPE),
        ];
        let map = resolve(&facts, &[]);
        let chain = map
            .chain_for(&SymbolId::new("a"), "save", &ScopeId::new(GLOBAL_SCOPE), &scopes())
            .unwrap();

        let p1 = SymbolId::new("p1");
        let p2 = SymbolId::new("p2");
        assert_eq!(
            chain.steps(),
            vec![
                InvocationStep::Before(&p2),
                InvocationStep::AroundEnter(&p1),
                InvocationStep::Original,
                InvocationStep::AroundExit(&p1),
            ]
        );
        assert!(chain.nesting().after.is_empty());
        assert_eq!(chain.links[1].hook, "aroundsave");
    }

    #[test]
    fn test_order_is_stable_under_permutation() {
        let facts = vec![
            interception("a", "p3", InterceptorKind::After, 1, GLOBAL_SCOPE),
            interception("a", "p1", InterceptorKind::Before, 1, GLOBAL_SCOPE),
            interception("a", "p2", InterceptorKind::Around, 0, GLOBAL_SCOPE),
        ];
        let forward = resolve(&facts, &[]);
        let reversed: Vec<_> = facts.iter().rev().cloned().collect();
        let backward = resolve(&reversed, &[]);

        let global = ScopeId::new(GLOBAL_SCOPE);
        let a = SymbolId::new("a");
        let f = forward.chain_for(&a, "save", &global, &scopes()).unwrap();
        let b = backward.chain_for(&a, "save", &global, &scopes()).unwrap();
        assert_eq!(f, b);
        assert_eq!(interceptors(f), vec!["p2", "p1", "p3"]);
    }

    #[test]
    fn test_after_hooks_run_in_descending_order() {
        let facts = vec![
            interception("a", "low", InterceptorKind::After, 1, GLOBAL_SCOPE),
            interception("a", "high", InterceptorKind::After, 9, GLOBAL_SCOPE),
        ];
        let map = resolve(&facts, &[]);
        let chain = map
            .chain_for(&SymbolId::new("a"), "save", &ScopeId::new("frontend"), &scopes())
            .unwrap();
        let after: Vec<&str> = chain
            .nesting()
            .after
            .iter()
            .map(|l| l.interceptor.as_str())
            .collect();
        assert_eq!(after, vec!["high", "low"]);
    }

    #[test]
    fn test_specific_scope_disables_interceptor() {
        let mut disabled = interception("a", "p1", InterceptorKind::Before, 0, "frontend");
        disabled.disabled = true;
        let facts = vec![
            interception("a", "p1", InterceptorKind::Before, 0, GLOBAL_SCOPE),
            disabled,
        ];
        let map = resolve(&facts, &[]);
        let a = SymbolId::new("a");

        let global = map.chain_for(&a, "save", &ScopeId::new(GLOBAL_SCOPE), &scopes()).unwrap();
        assert_eq!(interceptors(global), vec!["p1"]);
        let frontend = map.chain_for(&a, "save", &ScopeId::new("frontend"), &scopes()).unwrap();
        assert!(frontend.links.is_empty());
    }

    #[test]
    fn test_descendants_inherit_interceptors() {
        let child = SymbolDecl {
            id: SymbolId::new("child"),
            name: "Child".to_string(),
            kind: SymbolKind::Class,
            file: "Child.php".to_string(),
            module: ModuleId::new("M"),
            extends: vec![SymbolId::new("a")],
            implements: vec![],
            operations: vec!["save".to_string()],
        };
        let facts = vec![interception("a", "p1", InterceptorKind::Before, 0, GLOBAL_SCOPE)];
        let map = resolve(&facts, &[child]);

        let chain = map
            .chain_for(&SymbolId::new("child"), "save", &ScopeId::new(GLOBAL_SCOPE), &scopes())
            .unwrap();
        assert_eq!(interceptors(chain), vec!["p1"]);
        assert_eq!(chain.links[0].declared_on, SymbolId::new("a"));
        assert!(map
            .chain_for(&SymbolId::new("unrelated"), "save", &ScopeId::new(GLOBAL_SCOPE), &scopes())
            .is_none());
    }
}
