//! Symbol, file and reverse indexes over the resolved model.

pub mod builder;

pub use builder::IndexBuilder;

use crate::facts::{FactKind, FileId, ModuleId, SymbolId, SymbolKind};
use serde::Serialize;
use std::collections::BTreeMap;
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    pub file: FileId,
    pub module: ModuleId,
    pub extends: Vec<SymbolId>,
    pub implements: Vec<SymbolId>,
    pub operations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub module: ModuleId,
    pub layer: String,
    pub size: u64,
}

/// Part a key plays in the referencing record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefRole {
    Declares,
    Owner,
    Dependent,
    Interface,
    Implementation,
    Target,
    Interceptor,
    Subscriber,
    Dispatcher,
    Event,
    Handler,
    Caller,
    Callee,
    Entry,
    Node,
}

/// Pointer from a reverse-index key to one fact or derived record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FactRef {
    pub kind: FactKind,
    pub key: String,
    pub role: RefRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReverseEntry {
    /// Sorted by (kind, key, role)
    pub refs: Vec<FactRef>,
    /// Sum of the configured weights of every reference, truncated ones included
    pub score: f64,
    /// Number of references before truncation
    pub total: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReverseIndex {
    pub by_symbol: BTreeMap<String, ReverseEntry>,
    pub by_module: BTreeMap<String, ReverseEntry>,
    pub by_event: BTreeMap<String, ReverseEntry>,
    pub by_entry_point: BTreeMap<String, ReverseEntry>,
}

impl ReverseIndex {
    /// The four sections with their names, in output order
    pub fn sections_mut(&mut self) -> [(&'static str, &mut BTreeMap<String, ReverseEntry>); 4] {
        [
            ("by_symbol", &mut self.by_symbol),
            ("by_module", &mut self.by_module),
            ("by_event", &mut self.by_event),
            ("by_entry_point", &mut self.by_entry_point),
        ]
    }

    pub fn entry_count(&self) -> usize {
        self.by_symbol.len() + self.by_module.len() + self.by_event.len() + self.by_entry_point.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossReferenceIndex {
    pub symbols: BTreeMap<SymbolId, SymbolEntry>,
    pub files: BTreeMap<FileId, FileEntry>,
    pub reverse: ReverseIndex,
}
