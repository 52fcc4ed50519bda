use crate::facts::{SymbolDecl, SymbolId};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Type hierarchy from `extends`/`implements` declarations.
///
/// Ancestry may be incomplete or even cyclic in broken codebases; every walk
/// carries a visited guard.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    parents: FxHashMap<SymbolId, BTreeSet<SymbolId>>,
    children: FxHashMap<SymbolId, BTreeSet<SymbolId>>,
}

impl TypeHierarchy {
    pub fn new(symbols: &[SymbolDecl]) -> Self {
        let mut hierarchy = Self::default();
        for symbol in symbols {
            for parent in symbol.extends.iter().chain(symbol.implements.iter()) {
                if parent == &symbol.id {
                    continue;
                }
                hierarchy
                    .parents
                    .entry(symbol.id.clone())
                    .or_default()
                    .insert(parent.clone());
                hierarchy
                    .children
                    .entry(parent.clone())
                    .or_default()
                    .insert(symbol.id.clone());
            }
        }
        hierarchy
    }

    /// `ty` and all of its ancestors with their distance, nearest first and
    /// lexicographic within one distance.
    pub fn ancestors(&self, ty: &SymbolId) -> Vec<(SymbolId, usize)> {
        let mut visited: FxHashSet<&SymbolId> = FxHashSet::default();
        visited.insert(ty);
        let mut result = vec![(ty.clone(), 0)];
        let mut frontier: BTreeSet<&SymbolId> = BTreeSet::from([ty]);
        let mut distance = 0;

        while !frontier.is_empty() {
            distance += 1;
            let mut next = BTreeSet::new();
            for current in frontier {
                if let Some(parents) = self.parents.get(current) {
                    for parent in parents {
                        if visited.insert(parent) {
                            next.insert(parent);
                        }
                    }
                }
            }
            result.extend(next.iter().map(|parent| ((*parent).clone(), distance)));
            frontier = next;
        }
        result
    }

    /// Distance from `ty` up to `ancestor`, if `ancestor` is one
    pub fn distance(&self, ty: &SymbolId, ancestor: &SymbolId) -> Option<usize> {
        self.ancestors(ty)
            .into_iter()
            .find(|(candidate, _)| candidate == ancestor)
            .map(|(_, distance)| distance)
    }

    /// All transitive descendants of `ty`, sorted, `ty` excluded
    pub fn descendants(&self, ty: &SymbolId) -> Vec<SymbolId> {
        let mut visited: BTreeSet<&SymbolId> = BTreeSet::new();
        let mut stack = vec![ty];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children.get(current) {
                for child in children {
                    if child != ty && visited.insert(child) {
                        stack.push(child);
                    }
                }
            }
        }
        visited.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{ModuleId, SymbolKind};

    fn symbol(id: &str, extends: &[&str], implements: &[&str]) -> SymbolDecl {
        SymbolDecl {
            id: SymbolId::new(id),
            name: id.to_string(),
            kind: SymbolKind::Class,
            file: format!("{id}.php"),
            module: ModuleId::new("M"),
            extends: extends.iter().map(|s| SymbolId::new(*s)).collect(),
            implements: implements.iter().map(|s| SymbolId::new(*s)).collect(),
            operations: vec![],
        }
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let hierarchy = TypeHierarchy::new(&[
            symbol("child", &["parent"], &["iface"]),
            symbol("parent", &["root"], &[]),
        ]);

        let ancestors = hierarchy.ancestors(&SymbolId::new("child"));
        let rendered: Vec<(&str, usize)> =
            ancestors.iter().map(|(id, d)| (id.as_str(), *d)).collect();
        assert_eq!(
            rendered,
            vec![("child", 0), ("iface", 1), ("parent", 1), ("root", 2)]
        );
        assert_eq!(
            hierarchy.distance(&SymbolId::new("child"), &SymbolId::new("root")),
            Some(2)
        );
    }

    #[test]
    fn test_descendants_are_transitive() {
        let hierarchy = TypeHierarchy::new(&[
            symbol("b", &["a"], &[]),
            symbol("c", &["b"], &[]),
            symbol("d", &[], &["a"]),
        ]);
        let descendants = hierarchy.descendants(&SymbolId::new("a"));
        assert_eq!(
            descendants,
            vec![SymbolId::new("b"), SymbolId::new("c"), SymbolId::new("d")]
        );
    }

    #[test]
    fn test_cyclic_ancestry_terminates() {
        let hierarchy = TypeHierarchy::new(&[symbol("a", &["b"], &[]), symbol("b", &["a"], &[])]);
        assert_eq!(hierarchy.ancestors(&SymbolId::new("a")).len(), 2);
        assert_eq!(hierarchy.descendants(&SymbolId::new("a")), vec![SymbolId::new("b")]);
    }
}
