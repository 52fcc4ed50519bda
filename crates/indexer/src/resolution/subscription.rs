use super::confidence::round_score;
use super::order::ModuleOrder;
use super::scope::ScopeTree;
use crate::facts::{DispatchFact, EventId, Evidence, ModuleId, ScopeId, SubscriptionFact, SymbolId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Subscriber that runs when an event fires at some scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSubscriber {
    pub name: String,
    pub subscriber: SymbolId,
    pub method: String,
    pub module: ModuleId,
    /// Scope of the winning declaration
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatcher {
    pub class: SymbolId,
    pub method: String,
    pub module: ModuleId,
    pub evidence: Vec<Evidence>,
}

/// Everything known about one event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFanOut {
    pub event: EventId,
    /// Every declaration, disabled ones included, in canonical order
    pub subscriptions: Vec<SubscriptionFact>,
    /// Distinct declaring modules of enabled subscriptions, minus one
    pub cross_module_count: usize,
    pub risk: f64,
    pub dispatchers: Vec<Dispatcher>,
    /// Scope → subscribers in force there, for every scope that declares one
    pub effective: BTreeMap<ScopeId, Vec<EffectiveSubscriber>>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionGraph {
    events: BTreeMap<EventId, EventFanOut>,
}

impl SubscriptionGraph {
    /// Fan-out per event.
    ///
    /// `risk = weight * c / (c + 1)` clamped to `[0, 1]`, where `c` is the
    /// cross-module count; monotonic in `c` and 0 for a single module.
    pub fn resolve(
        subscriptions: &[SubscriptionFact],
        dispatches: &[DispatchFact],
        scopes: &ScopeTree,
        order: &ModuleOrder,
        weight: f64,
    ) -> Self {
        let mut by_event: BTreeMap<&EventId, Vec<&SubscriptionFact>> = BTreeMap::new();
        for fact in subscriptions {
            by_event.entry(&fact.event).or_default().push(fact);
        }
        let mut dispatchers: BTreeMap<&EventId, Vec<Dispatcher>> = BTreeMap::new();
        for fact in dispatches {
            dispatchers.entry(&fact.event).or_default().push(Dispatcher {
                class: fact.class.clone(),
                method: fact.method.clone(),
                module: fact.module.clone(),
                evidence: fact.evidence.clone(),
            });
        }

        let events: BTreeSet<&EventId> = by_event.keys().chain(dispatchers.keys()).copied().collect();

        let events = events
            .into_iter()
            .map(|event| {
                let declared = by_event.remove(event).unwrap_or_default();
                let modules: BTreeSet<&ModuleId> = declared
                    .iter()
                    .filter(|fact| !fact.disabled)
                    .map(|fact| &fact.module)
                    .collect();
                let cross_module_count = modules.len().saturating_sub(1);
                let c = cross_module_count as f64;
                let risk = round_score((weight * c / (c + 1.0)).clamp(0.0, 1.0));

                let declaring_scopes: BTreeSet<&ScopeId> =
                    declared.iter().map(|fact| &fact.scope).collect();
                let effective = declaring_scopes
                    .into_iter()
                    .map(|scope| {
                        (
                            scope.clone(),
                            effective_at(&declared, scope, scopes, order),
                        )
                    })
                    .collect();

                let mut event_dispatchers = dispatchers.remove(event).unwrap_or_default();
                event_dispatchers.sort_by(|a, b| (&a.class, &a.method).cmp(&(&b.class, &b.method)));

                let fan_out = EventFanOut {
                    event: event.clone(),
                    subscriptions: declared.into_iter().cloned().collect(),
                    cross_module_count,
                    risk,
                    dispatchers: event_dispatchers,
                    effective,
                };
                (event.clone(), fan_out)
            })
            .collect();

        Self { events }
    }

    /// Subscribers in force for `event` at `scope`
    pub fn effective_subscribers(
        &self,
        event: &EventId,
        scope: &ScopeId,
        scopes: &ScopeTree,
    ) -> &[EffectiveSubscriber] {
        let Some(fan_out) = self.events.get(event) else {
            return &[];
        };
        scopes
            .lineage(scope)
            .into_iter()
            .find_map(|candidate| fan_out.effective.get(&candidate))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn event(&self, event: &EventId) -> Option<&EventFanOut> {
        self.events.get(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventFanOut> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Same narrowing as interceptors: per name, the deepest scope wins, then
/// the latest-loaded module. A disabled winner removes the subscriber.
fn effective_at(
    declared: &[&SubscriptionFact],
    scope: &ScopeId,
    scopes: &ScopeTree,
    order: &ModuleOrder,
) -> Vec<EffectiveSubscriber> {
    let lineage = scopes.lineage(scope);
    let mut winners: BTreeMap<&str, &SubscriptionFact> = BTreeMap::new();

    for fact in declared.iter().copied() {
        if !lineage.contains(&fact.scope) {
            continue;
        }
        let rank = |f: &SubscriptionFact| {
            (
                scopes.depth(&f.scope),
                order.position(&f.module),
                f.subscriber.clone(),
                f.method.clone(),
            )
        };
        let replace = winners
            .get(fact.name.as_str())
            .is_none_or(|current| rank(fact) > rank(*current));
        if replace {
            winners.insert(fact.name.as_str(), fact);
        }
    }

    winners
        .into_values()
        .filter(|fact| !fact.disabled)
        .map(|fact| EffectiveSubscriber {
            name: fact.name.clone(),
            subscriber: fact.subscriber.clone(),
            method: fact.method.clone(),
            module: fact.module.clone(),
            scope: fact.scope.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::GLOBAL_SCOPE;

    fn subscription(event: &str, subscriber: &str, module: &str, scope: &str) -> SubscriptionFact {
        SubscriptionFact {
            event: EventId::new(event),
            subscriber: SymbolId::new(subscriber),
            name: subscriber.to_string(),
            method: "execute".to_string(),
            scope: ScopeId::new(scope),
            module: ModuleId::new(module),
            disabled: false,
            evidence: vec![Evidence::new("etc/events.xml")],
        }
    }

    fn scopes() -> ScopeTree {
        ScopeTree::new(&[("frontend".to_string(), "global".to_string())].into_iter().collect())
            .unwrap()
    }

    fn graph(subscriptions: &[SubscriptionFact], dispatches: &[DispatchFact]) -> SubscriptionGraph {
        SubscriptionGraph::resolve(
            subscriptions,
            dispatches,
            &scopes(),
            &ModuleOrder::default(),
            1.0,
        )
    }

    #[test]
    fn test_single_module_has_no_cross_module_risk() {
        let graph = graph(
            &[
                subscription("order_placed", "a\\one", "A", GLOBAL_SCOPE),
                subscription("order_placed", "a\\two", "A", GLOBAL_SCOPE),
            ],
            &[],
        );
        let fan_out = graph.event(&EventId::new("order_placed")).unwrap();
        assert_eq!(fan_out.cross_module_count, 0);
        assert_eq!(fan_out.risk, 0.0);
    }

    #[test]
    fn test_risk_grows_with_cross_module_count() {
        let two = graph(
            &[
                subscription("e", "a\\s", "A", GLOBAL_SCOPE),
                subscription("e", "b\\s", "B", GLOBAL_SCOPE),
            ],
            &[],
        );
        let three = graph(
            &[
                subscription("e", "a\\s", "A", GLOBAL_SCOPE),
                subscription("e", "b\\s", "B", GLOBAL_SCOPE),
                subscription("e", "c\\s", "C", GLOBAL_SCOPE),
            ],
            &[],
        );
        let e = EventId::new("e");
        let two = two.event(&e).unwrap();
        let three = three.event(&e).unwrap();

        assert_eq!(two.cross_module_count, 1);
        assert_eq!(three.cross_module_count, 2);
        assert!(three.risk >= two.risk);
        assert!(three.risk <= 1.0);
    }

    #[test]
    fn test_disabled_in_narrower_scope() {
        let mut disabled = subscription("e", "a\\s", "A", "frontend");
        disabled.disabled = true;
        let graph = graph(&[subscription("e", "a\\s", "A", GLOBAL_SCOPE), disabled], &[]);
        let e = EventId::new("e");

        assert_eq!(
            graph
                .effective_subscribers(&e, &ScopeId::new(GLOBAL_SCOPE), &scopes())
                .len(),
            1
        );
        assert!(graph
            .effective_subscribers(&e, &ScopeId::new("frontend"), &scopes())
            .is_empty());
    }

    #[test]
    fn test_dispatch_only_events_are_listed() {
        let graph = graph(
            &[],
            &[DispatchFact {
                class: SymbolId::new("sales\\order"),
                method: "place".to_string(),
                event: EventId::new("order_placed"),
                module: ModuleId::new("Sales"),
                evidence: vec![Evidence::at_line("Sales/Model/Order.php", 40)],
            }],
        );
        let fan_out = graph.event(&EventId::new("order_placed")).unwrap();
        assert!(fan_out.subscriptions.is_empty());
        assert_eq!(fan_out.dispatchers.len(), 1);
        assert!(graph
            .effective_subscribers(&EventId::new("order_placed"), &ScopeId::new(GLOBAL_SCOPE), &scopes())
            .is_empty());
    }
}
