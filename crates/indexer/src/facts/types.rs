use super::ids::{EventId, FileId, ModuleId, ScopeId, SymbolId};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

pub const DEFAULT_METHOD: &str = "execute";
pub const GLOBAL_SCOPE: &str = "global";
pub const UNASSIGNED_MODULE: &str = "__unassigned__";

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

fn default_scope() -> ScopeId {
    ScopeId::new(GLOBAL_SCOPE)
}

fn unassigned_module() -> ModuleId {
    ModuleId::new(UNASSIGNED_MODULE)
}

fn unclassified_layer() -> String {
    "unclassified".to_string()
}

/// Source location backing a fact
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Evidence {
    /// File the fact was read from (repository-relative once canonical)
    pub file: String,
    /// 1-based line, when the collector knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Free-form pointer, e.g. an XPath or a snippet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Evidence {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            detail: None,
        }
    }

    pub fn at_line(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            detail: None,
        }
    }
}

/// Every kind of record that can be referenced from the reverse index.
///
/// Also used as the key of per-fact-type scoring weights.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FactKind {
    Module,
    File,
    Symbol,
    Preference,
    Interception,
    Subscription,
    EntryPoint,
    Dispatch,
    Call,
    Resolution,
    InterceptionChain,
    ExecutionPath,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Interface,
    Trait,
    Enum,
}

/// When an interceptor runs relative to the intercepted method.
///
/// Declaration order of the variants is the final tie-breaker of chain order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterceptorKind {
    Before,
    Around,
    After,
}

impl InterceptorKind {
    /// Name of the hook method implementing this interceptor for `method`,
    /// e.g. `beforesave` for `save`.
    pub fn hook_method(&self, method: &str) -> String {
        format!("{}{}", self.as_ref(), method)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EntryPointKind {
    Route,
    ScheduledJob,
    Command,
}

/// A deployable module and its declared load-order dependencies
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleDecl {
    pub id: ModuleId,
    /// Filesystem root of the module
    pub root: String,
    /// Modules that must load before this one
    #[serde(default)]
    pub sequence: Vec<ModuleId>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileDecl {
    /// Absolute or repository-relative path; a `FileId` once canonical
    pub path: String,
    /// Content size in bytes
    #[serde(default)]
    pub size: u64,
    #[serde(default = "unclassified_layer")]
    pub layer: String,
    /// Assigned by the identity resolver, never trusted from collectors
    #[serde(default = "unassigned_module")]
    pub module: ModuleId,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolDecl {
    pub id: SymbolId,
    /// Human-readable name; filled from the raw id when a collector leaves it empty
    #[serde(default)]
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    #[serde(default = "unassigned_module")]
    pub module: ModuleId,
    #[serde(default)]
    pub extends: Vec<SymbolId>,
    #[serde(default)]
    pub implements: Vec<SymbolId>,
    /// Declared public operations (method names)
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Substitution of `implementation` for `interface` at `scope`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreferenceFact {
    pub interface: SymbolId,
    pub implementation: SymbolId,
    #[serde(default = "default_scope")]
    pub scope: ScopeId,
    pub module: ModuleId,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterceptionFact {
    pub target: SymbolId,
    pub methods: Vec<String>,
    pub interceptor: SymbolId,
    /// Declaration name; a more specific declaration with the same name and
    /// kind replaces this one. Defaults to the interceptor id.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_scope")]
    pub scope: ScopeId,
    #[serde(default)]
    pub order: i64,
    pub module: ModuleId,
    pub kind: InterceptorKind,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionFact {
    pub event: EventId,
    pub subscriber: SymbolId,
    /// Defaults to the subscriber id
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_scope")]
    pub scope: ScopeId,
    pub module: ModuleId,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryPointFact {
    pub kind: EntryPointKind,
    pub identifier: String,
    pub class: SymbolId,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_scope")]
    pub scope: ScopeId,
    pub module: ModuleId,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl EntryPointFact {
    /// Key of this entry point in the path collection and the reverse index
    pub fn entry_key(&self) -> String {
        format!("{}:{}", self.kind, self.identifier)
    }
}

/// `class::method` dispatches `event`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchFact {
    pub class: SymbolId,
    pub method: String,
    pub event: EventId,
    pub module: ModuleId,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// Static call edge `caller::caller_method -> callee::callee_method`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallFact {
    pub caller: SymbolId,
    pub caller_method: String,
    pub callee: SymbolId,
    pub callee_method: String,
    pub module: ModuleId,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// A unit (file, document) a collector could not analyze
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionFailure {
    pub collector: String,
    pub unit: String,
    pub message: String,
}

/// Common view over evidence-bearing facts.
pub trait Fact {
    const KIND: FactKind;

    /// Identity of the fact; two facts with the same key are the same
    /// declaration and get their evidence merged.
    fn key(&self) -> String;

    fn evidence(&self) -> &[Evidence];

    fn evidence_mut(&mut self) -> &mut Vec<Evidence>;

    fn module(&self) -> &ModuleId;
}

impl Fact for PreferenceFact {
    const KIND: FactKind = FactKind::Preference;

    fn key(&self) -> String {
        format!(
            "{}@{}={}#{}",
            self.interface, self.scope, self.implementation, self.module
        )
    }

    fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
        &mut self.evidence
    }

    fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl Fact for InterceptionFact {
    const KIND: FactKind = FactKind::Interception;

    fn key(&self) -> String {
        format!(
            "{}::{}@{}<{}:{}={}/{}{}#{}",
            self.target,
            self.methods.join(","),
            self.scope,
            self.kind,
            self.name,
            self.interceptor,
            self.order,
            if self.disabled { "/disabled" } else { "" },
            self.module
        )
    }

    fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
        &mut self.evidence
    }

    fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl Fact for SubscriptionFact {
    const KIND: FactKind = FactKind::Subscription;

    fn key(&self) -> String {
        format!(
            "{}@{}>{}={}::{}{}#{}",
            self.event,
            self.scope,
            self.name,
            self.subscriber,
            self.method,
            if self.disabled { "/disabled" } else { "" },
            self.module
        )
    }

    fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
        &mut self.evidence
    }

    fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl Fact for EntryPointFact {
    const KIND: FactKind = FactKind::EntryPoint;

    fn key(&self) -> String {
        format!(
            "{}={}::{}@{}#{}",
            self.entry_key(),
            self.class,
            self.method,
            self.scope,
            self.module
        )
    }

    fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
        &mut self.evidence
    }

    fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl Fact for DispatchFact {
    const KIND: FactKind = FactKind::Dispatch;

    fn key(&self) -> String {
        format!(
            "{}::{}>{}#{}",
            self.class, self.method, self.event, self.module
        )
    }

    fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
        &mut self.evidence
    }

    fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl Fact for CallFact {
    const KIND: FactKind = FactKind::Call;

    fn key(&self) -> String {
        format!(
            "{}::{}->{}::{}#{}",
            self.caller, self.caller_method, self.callee, self.callee_method, self.module
        )
    }

    fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
        &mut self.evidence
    }

    fn module(&self) -> &ModuleId {
        &self.module
    }
}

impl FileDecl {
    pub fn file_id(&self) -> FileId {
        FileId::new(self.path.clone())
    }
}
