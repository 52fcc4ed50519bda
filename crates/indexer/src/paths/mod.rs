//! Execution path reconstruction.
//!
//! Paths are reconstructed per entry point by walking interceptor hooks,
//! static calls and dispatched events from the entry's implementing method.

pub mod reconstructor;

pub use reconstructor::PathReconstructor;

use crate::facts::{EntryPointKind, EventId, InterceptorKind, ModuleId, ScopeId, SymbolId};
use serde::Serialize;
use strum::{AsRefStr, Display};

/// How a node was reached from its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum NodeOrigin {
    Entry,
    Interceptor { kind: InterceptorKind },
    Call,
    Event { event: EventId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathNode {
    pub index: usize,
    pub parent: Option<usize>,
    /// Concrete class after preference substitution
    pub class: SymbolId,
    /// Type as referenced by the fact that led here
    pub declared_class: SymbolId,
    pub method: String,
    pub depth: usize,
    #[serde(flatten)]
    pub origin: NodeOrigin,
    /// Interception chain of this method at the entry's scope, in chain order
    pub interceptors: Vec<SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TruncationReason {
    /// The (class, method) pair already occurs on this path.
    ///
    /// Paths keep one visited set, not one per branch, so a node shared by
    /// two branches (a diamond) is expanded once and its second arrival is
    /// recorded here as well, just like a true cycle. Every (class, method)
    /// therefore appears at most once per path.
    Revisit,
    /// The depth limit was reached with continuations left
    Depth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Truncation {
    /// Node whose continuation was cut
    pub node: usize,
    pub reason: TruncationReason,
    pub class: SymbolId,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPath {
    /// `kind:identifier`
    pub entry: String,
    pub kind: EntryPointKind,
    pub identifier: String,
    pub scope: ScopeId,
    pub module: ModuleId,
    /// Traversal order (depth first, continuations in declaration order)
    pub nodes: Vec<PathNode>,
    /// Events dispatched anywhere on the path, sorted
    pub events: Vec<EventId>,
    /// Subscriber classes reached, sorted
    pub subscribers: Vec<SymbolId>,
    /// Interceptor classes applied anywhere on the path, sorted
    pub interceptors: Vec<SymbolId>,
    pub truncated: bool,
    pub truncations: Vec<Truncation>,
}

impl ExecutionPath {
    /// Every class the path touches, sorted and de-duplicated
    pub fn classes(&self) -> Vec<&SymbolId> {
        let mut classes: Vec<&SymbolId> = self
            .nodes
            .iter()
            .flat_map(|node| [&node.class, &node.declared_class])
            .chain(self.interceptors.iter())
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }
}
