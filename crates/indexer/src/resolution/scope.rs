use crate::errors::{ConfigError, WarningKind, WarningLog};
use crate::facts::{GLOBAL_SCOPE, ScopeId};
use crate::identity::scope_id;
use std::collections::BTreeMap;

/// Strict tree of scopes rooted at `global`.
///
/// Resolution always walks a scope's lineage from the most specific node up
/// to `global`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTree {
    parents: BTreeMap<ScopeId, ScopeId>,
}

impl ScopeTree {
    /// Build the tree from a child → parent table
    pub fn new(parents: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let global = ScopeId::new(GLOBAL_SCOPE);
        let mut tree = BTreeMap::new();

        for (child, parent) in parents {
            let child_id = scope_id(child);
            if child_id == global {
                return Err(ConfigError::ScopeTree {
                    scope: child.clone(),
                    reason: "the root scope cannot have a parent".to_string(),
                });
            }
            if tree.insert(child_id, scope_id(parent)).is_some() {
                return Err(ConfigError::ScopeTree {
                    scope: child.clone(),
                    reason: "scope declared more than once".to_string(),
                });
            }
        }

        for (child, parent) in &tree {
            if parent != &global && !tree.contains_key(parent) {
                return Err(ConfigError::ScopeTree {
                    scope: child.to_string(),
                    reason: format!("parent scope '{parent}' is not declared"),
                });
            }
        }

        for start in tree.keys() {
            let mut current = start;
            let mut steps = 0;
            while let Some(parent) = tree.get(current) {
                steps += 1;
                if parent == start || steps > tree.len() {
                    return Err(ConfigError::ScopeTree {
                        scope: start.to_string(),
                        reason: "scope hierarchy contains a cycle".to_string(),
                    });
                }
                current = parent;
            }
        }

        Ok(Self { parents: tree })
    }

    /// Only the root scope
    pub fn global_only() -> Self {
        Self {
            parents: BTreeMap::new(),
        }
    }

    pub fn contains(&self, scope: &ScopeId) -> bool {
        scope.as_str() == GLOBAL_SCOPE || self.parents.contains_key(scope)
    }

    pub fn parent(&self, scope: &ScopeId) -> Option<&ScopeId> {
        self.parents.get(scope)
    }

    /// `scope` followed by each of its ancestors, ending at `global`
    pub fn lineage(&self, scope: &ScopeId) -> Vec<ScopeId> {
        let mut lineage = vec![scope.clone()];
        let mut current = scope;
        while let Some(parent) = self.parents.get(current) {
            lineage.push(parent.clone());
            current = parent;
        }
        if current.as_str() != GLOBAL_SCOPE {
            lineage.push(ScopeId::new(GLOBAL_SCOPE));
        }
        lineage
    }

    /// Distance from `global` (which has depth 0)
    pub fn depth(&self, scope: &ScopeId) -> usize {
        self.lineage(scope).len() - 1
    }

    /// Every scope of the tree in lexicographic order, `global` included
    pub fn scopes(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self.parents.keys().cloned().collect();
        scopes.push(ScopeId::new(GLOBAL_SCOPE));
        scopes.sort();
        scopes
    }

    /// Attach scopes that facts mention but configuration does not know as
    /// direct children of `global`.
    pub fn attach_unknown(&mut self, referenced: &[ScopeId], warnings: &mut WarningLog) {
        for scope in referenced {
            if self.contains(scope) {
                continue;
            }
            warnings.push(
                WarningKind::UnknownScope,
                scope.as_str(),
                "scope is not part of the configured hierarchy; treated as a child of global",
            );
            self.parents
                .insert(scope.clone(), ScopeId::new(GLOBAL_SCOPE));
        }
    }
}
