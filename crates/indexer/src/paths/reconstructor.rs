use super::{ExecutionPath, NodeOrigin, PathNode, Truncation, TruncationReason};
use crate::errors::{EngineError, Result, WarningKind, WarningLog};
use crate::facts::{
    CallFact, CanonicalFacts, DispatchFact, EntryPointFact, EventId, ScopeId, SymbolId,
};
use crate::resolution::Resolved;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type MethodKey = (SymbolId, String);

/// Continuation not yet expanded
struct Frame {
    parent: Option<usize>,
    class: SymbolId,
    declared_class: SymbolId,
    method: String,
    depth: usize,
    origin: NodeOrigin,
}

pub struct PathReconstructor<'a> {
    facts: &'a CanonicalFacts,
    resolved: &'a Resolved,
    max_depth: usize,
    calls: FxHashMap<MethodKey, Vec<&'a CallFact>>,
    dispatches: FxHashMap<MethodKey, Vec<&'a DispatchFact>>,
}

impl<'a> PathReconstructor<'a> {
    pub fn new(facts: &'a CanonicalFacts, resolved: &'a Resolved, max_depth: usize) -> Self {
        let mut calls: FxHashMap<MethodKey, Vec<&CallFact>> = FxHashMap::default();
        for call in facts.calls() {
            calls
                .entry((call.caller.clone(), call.caller_method.clone()))
                .or_default()
                .push(call);
        }
        let mut dispatches: FxHashMap<MethodKey, Vec<&DispatchFact>> = FxHashMap::default();
        for dispatch in facts.dispatches() {
            dispatches
                .entry((dispatch.class.clone(), dispatch.method.clone()))
                .or_default()
                .push(dispatch);
        }

        Self {
            facts,
            resolved,
            max_depth,
            calls,
            dispatches,
        }
    }

    /// One path per distinct entry point, keyed by `kind:identifier`.
    ///
    /// When several declarations share a key the first in canonical order is
    /// used and the others are reported.
    pub fn reconstruct_all(
        &self,
        cancellation_token: Option<&CancellationToken>,
        warnings: &mut WarningLog,
    ) -> Result<BTreeMap<String, ExecutionPath>> {
        let start = Instant::now();
        let mut paths: BTreeMap<String, ExecutionPath> = BTreeMap::new();

        for entry in self.facts.entry_points() {
            if cancellation_token.is_some_and(|token| token.is_cancelled()) {
                return Err(EngineError::cancelled("during path reconstruction"));
            }

            let key = entry.entry_key();
            if let Some(existing) = paths.get(&key) {
                warnings.push(
                    WarningKind::DuplicateEntryPoint,
                    key.as_str(),
                    format!(
                        "declared more than once; keeping the declaration from module '{}', ignoring '{}::{}' from '{}'",
                        existing.module, entry.class, entry.method, entry.module
                    ),
                );
                continue;
            }
            paths.insert(key, self.reconstruct(entry));
        }

        let truncated = paths.values().filter(|path| path.truncated).count();
        info!(
            "Reconstructed {} execution paths ({} truncated) in {:?}",
            paths.len(),
            truncated,
            start.elapsed()
        );
        Ok(paths)
    }

    pub fn reconstruct(&self, entry: &EntryPointFact) -> ExecutionPath {
        let scope = &entry.scope;
        let mut nodes: Vec<PathNode> = Vec::new();
        let mut truncations = Vec::new();
        let mut visited: FxHashSet<MethodKey> = FxHashSet::default();
        let mut events: BTreeSet<EventId> = BTreeSet::new();
        let mut subscribers: BTreeSet<SymbolId> = BTreeSet::new();
        let mut interceptors: BTreeSet<SymbolId> = BTreeSet::new();

        let mut stack = vec![Frame {
            parent: None,
            class: self.concrete(&entry.class, scope),
            declared_class: entry.class.clone(),
            method: entry.method.clone(),
            depth: 0,
            origin: NodeOrigin::Entry,
        }];

        while let Some(frame) = stack.pop() {
            let key = (frame.class.clone(), frame.method.clone());
            if !visited.insert(key) {
                truncations.push(Truncation {
                    node: frame.parent.unwrap_or(0),
                    reason: TruncationReason::Revisit,
                    class: frame.class,
                    method: frame.method,
                });
                continue;
            }

            let index = nodes.len();
            let chain = self
                .resolved
                .chains
                .chain_for(&frame.class, &frame.method, scope, &self.resolved.scopes);
            let node_interceptors: Vec<SymbolId> = chain
                .map(|chain| chain.links.iter().map(|l| l.interceptor.clone()).collect())
                .unwrap_or_default();
            interceptors.extend(node_interceptors.iter().cloned());

            if let NodeOrigin::Event { .. } = &frame.origin {
                subscribers.insert(frame.class.clone());
            }
            for dispatch in self.lookup(&self.dispatches, &frame.class, &frame.method) {
                events.insert(dispatch.event.clone());
            }

            let continuations = self.continuations(index, &frame, scope);

            if !continuations.is_empty() && frame.depth >= self.max_depth {
                truncations.push(Truncation {
                    node: index,
                    reason: TruncationReason::Depth,
                    class: frame.class.clone(),
                    method: frame.method.clone(),
                });
            } else {
                stack.extend(continuations.into_iter().rev());
            }

            nodes.push(PathNode {
                index,
                parent: frame.parent,
                class: frame.class,
                declared_class: frame.declared_class,
                method: frame.method,
                depth: frame.depth,
                origin: frame.origin,
                interceptors: node_interceptors,
            });
        }

        let truncated = !truncations.is_empty();
        if truncated {
            debug!(
                "Path for {} truncated at {} point(s)",
                entry.entry_key(),
                truncations.len()
            );
        }

        ExecutionPath {
            entry: entry.entry_key(),
            kind: entry.kind,
            identifier: entry.identifier.clone(),
            scope: entry.scope.clone(),
            module: entry.module.clone(),
            nodes,
            events: events.into_iter().collect(),
            subscribers: subscribers.into_iter().collect(),
            interceptors: interceptors.into_iter().collect(),
            truncated,
            truncations,
        }
    }

    /// Interceptor hooks, then static calls, then subscribers of dispatched
    /// events, each in canonical order.
    fn continuations(&self, index: usize, frame: &Frame, scope: &ScopeId) -> Vec<Frame> {
        let resolved = self.resolved;
        let depth = frame.depth + 1;
        let mut next = Vec::new();

        if let Some(chain) =
            resolved
                .chains
                .chain_for(&frame.class, &frame.method, scope, &resolved.scopes)
        {
            let nesting = chain.nesting();
            for link in nesting
                .before
                .iter()
                .chain(nesting.around.iter())
                .chain(nesting.after.iter())
            {
                next.push(Frame {
                    parent: Some(index),
                    class: self.concrete(&link.interceptor, scope),
                    declared_class: link.interceptor.clone(),
                    method: link.hook.clone(),
                    depth,
                    origin: NodeOrigin::Interceptor { kind: link.kind },
                });
            }
        }

        for call in self.lookup(&self.calls, &frame.class, &frame.method) {
            next.push(Frame {
                parent: Some(index),
                class: self.concrete(&call.callee, scope),
                declared_class: call.callee.clone(),
                method: call.callee_method.clone(),
                depth,
                origin: NodeOrigin::Call,
            });
        }

        for dispatch in self.lookup(&self.dispatches, &frame.class, &frame.method) {
            let subscribers = resolved.subscriptions.effective_subscribers(
                &dispatch.event,
                scope,
                &resolved.scopes,
            );
            for subscriber in subscribers {
                next.push(Frame {
                    parent: Some(index),
                    class: self.concrete(&subscriber.subscriber, scope),
                    declared_class: subscriber.subscriber.clone(),
                    method: subscriber.method.clone(),
                    depth,
                    origin: NodeOrigin::Event {
                        event: dispatch.event.clone(),
                    },
                });
            }
        }

        next
    }

    /// Facts recorded for `class::method`, or for the nearest ancestor that
    /// has any when the class itself has none
    fn lookup<'m, T>(
        &self,
        index: &'m FxHashMap<MethodKey, Vec<&'a T>>,
        class: &SymbolId,
        method: &str,
    ) -> &'m [&'a T] {
        self.resolved
            .hierarchy
            .ancestors(class)
            .into_iter()
            .find_map(|(ancestor, _)| index.get(&(ancestor, method.to_string())))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn concrete(&self, ty: &SymbolId, scope: &ScopeId) -> SymbolId {
        self.resolved
            .preferences
            .resolve_type(ty, scope, &self.resolved.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::facts::{
        EntryPointKind, Evidence, FactBatch, GLOBAL_SCOPE, InterceptionFact,
        InterceptorKind, ModuleId, SubscriptionFact,
    };
    use crate::resolution::ResolutionEngine;

    fn evidence() -> Vec<Evidence> {
        vec![Evidence::new("etc/di.xml")]
    }

    fn entry(class: &str, method: &str) -> EntryPointFact {
        EntryPointFact {
            kind: EntryPointKind::Route,
            identifier: "checkout/index".to_string(),
            class: SymbolId::new(class),
            method: method.to_string(),
            scope: ScopeId::new(GLOBAL_SCOPE),
            module: ModuleId::new("M"),
            evidence: evidence(),
        }
    }

    fn call(caller: &str, caller_method: &str, callee: &str, callee_method: &str) -> CallFact {
        CallFact {
            caller: SymbolId::new(caller),
            caller_method: caller_method.to_string(),
            callee: SymbolId::new(callee),
            callee_method: callee_method.to_string(),
            module: ModuleId::new("M"),
            evidence: evidence(),
        }
    }

    fn canonical(batch: FactBatch) -> CanonicalFacts {
        let mut batch = batch;
        batch.normalize();
        CanonicalFacts::from_canonical(batch)
    }

    fn reconstruct(batch: FactBatch, config: &AnalysisConfig) -> ExecutionPath {
        let facts = canonical(batch);
        let mut warnings = WarningLog::new();
        let resolved = ResolutionEngine::new(config).resolve(&facts, &mut warnings).unwrap();
        let reconstructor = PathReconstructor::new(&facts, &resolved, config.max_depth);
        let paths = reconstructor.reconstruct_all(None, &mut warnings).unwrap();
        paths.into_values().next().unwrap()
    }

    fn nodes(path: &ExecutionPath) -> Vec<String> {
        path.nodes
            .iter()
            .map(|n| format!("{}::{}", n.class, n.method))
            .collect()
    }

    #[test]
    fn test_interceptor_reinvoking_target_terminates() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("a", "save"));
        batch.interceptions.push(InterceptionFact {
            target: SymbolId::new("a"),
            methods: vec!["save".to_string()],
            interceptor: SymbolId::new("p"),
            name: "p".to_string(),
            scope: ScopeId::new(GLOBAL_SCOPE),
            order: 0,
            module: ModuleId::new("M"),
            kind: InterceptorKind::Around,
            disabled: false,
            evidence: evidence(),
        });
        batch.calls.push(call("p", "aroundsave", "a", "save"));

        let path = reconstruct(batch, &AnalysisConfig::default());

        assert!(path.truncated);
        assert_eq!(path.truncations[0].reason, TruncationReason::Revisit);
        assert_eq!(nodes(&path), vec!["a::save", "p::aroundsave"]);
        assert_eq!(path.interceptors, vec![SymbolId::new("p")]);
    }

    #[test]
    fn test_event_cycle_terminates() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("a", "save"));
        batch.dispatches.push(DispatchFact {
            class: SymbolId::new("a"),
            method: "save".to_string(),
            event: EventId::new("saved"),
            module: ModuleId::new("M"),
            evidence: evidence(),
        });
        batch.subscriptions.push(SubscriptionFact {
            event: EventId::new("saved"),
            subscriber: SymbolId::new("observer"),
            name: "observer".to_string(),
            method: "execute".to_string(),
            scope: ScopeId::new(GLOBAL_SCOPE),
            module: ModuleId::new("M"),
            disabled: false,
            evidence: evidence(),
        });
        batch.calls.push(call("observer", "execute", "a", "save"));

        let path = reconstruct(batch, &AnalysisConfig::default());

        assert!(path.truncated);
        assert_eq!(nodes(&path), vec!["a::save", "observer::execute"]);
        assert_eq!(path.events, vec![EventId::new("saved")]);
        assert_eq!(path.subscribers, vec![SymbolId::new("observer")]);
    }

    #[test]
    fn test_depth_limit_truncates() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("c0", "run"));
        for i in 0..5 {
            batch
                .calls
                .push(call(&format!("c{i}"), "run", &format!("c{}", i + 1), "run"));
        }
        let config = AnalysisConfig {
            max_depth: 2,
            ..AnalysisConfig::default()
        };

        let path = reconstruct(batch, &config);

        assert!(path.truncated);
        assert_eq!(path.nodes.len(), 3);
        assert_eq!(path.truncations[0].reason, TruncationReason::Depth);
        assert_eq!(path.truncations[0].node, 2);
    }

    #[test]
    fn test_terminal_node_is_not_truncated() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("a", "run"));
        batch.calls.push(call("a", "run", "b", "run"));

        let path = reconstruct(batch, &AnalysisConfig::default());

        assert!(!path.truncated);
        assert_eq!(nodes(&path), vec!["a::run", "b::run"]);
        assert_eq!(path.nodes[1].parent, Some(0));
        assert_eq!(path.nodes[1].origin, NodeOrigin::Call);
    }

    #[test]
    fn test_duplicate_entry_points_warn() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("a", "run"));
        batch.entry_points.push(entry("b", "run"));
        let facts = canonical(batch);
        let config = AnalysisConfig::default();
        let mut warnings = WarningLog::new();
        let resolved = ResolutionEngine::new(&config).resolve(&facts, &mut warnings).unwrap();

        let paths = PathReconstructor::new(&facts, &resolved, config.max_depth)
            .reconstruct_all(None, &mut warnings)
            .unwrap();

        assert_eq!(paths.len(), 1);
        assert_eq!(warnings.count(WarningKind::DuplicateEntryPoint), 1);
        assert_eq!(paths["route:checkout/index"].nodes[0].class, SymbolId::new("a"));
    }

    #[test]
    fn test_cancelled_reconstruction() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("a", "run"));
        let facts = canonical(batch);
        let config = AnalysisConfig::default();
        let resolved = ResolutionEngine::new(&config)
            .resolve(&facts, &mut WarningLog::new())
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = PathReconstructor::new(&facts, &resolved, config.max_depth)
            .reconstruct_all(Some(&token), &mut WarningLog::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[test]
    fn test_shared_node_is_expanded_once() {
        let mut batch = FactBatch::new();
        batch.entry_points.push(entry("a", "run"));
        batch.calls.push(call("a", "run", "b", "run"));
        batch.calls.push(call("a", "run", "c", "run"));
        batch.calls.push(call("b", "run", "d", "run"));
        batch.calls.push(call("c", "run", "d", "run"));

        let path = reconstruct(batch, &AnalysisConfig::default());

        let visited = nodes(&path);
        assert_eq!(visited.len(), 4);
        assert_eq!(visited.iter().filter(|n| *n == "d::run").count(), 1);
        assert!(path.truncated);
        assert_eq!(path.truncations.len(), 1);
        assert_eq!(path.truncations[0].reason, TruncationReason::Revisit);
        assert_eq!(path.truncations[0].class.as_str(), "d");
    }
}
