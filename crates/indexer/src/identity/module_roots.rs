use crate::facts::{FileId, ModuleDecl, ModuleId, UNASSIGNED_MODULE};
use std::collections::BTreeMap;
use tracing::debug;

const ROOT_MODULE_ID: &str = "__root__";

/// Repository-relative module root directories and the module owning each.
///
/// Lookup walks from a file's directory towards the repository root, so for
/// nested roots the nearest one wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleRoots {
    roots: BTreeMap<String, ModuleId>,
}

impl ModuleRoots {
    /// Combine marker-discovered roots with collector declarations.
    ///
    /// Declared modules name their root; a discovered root nobody declared is
    /// named after its path.
    pub fn build(discovered: &[FileId], declared: &[ModuleDecl]) -> Self {
        let mut roots = BTreeMap::new();

        for module in declared {
            let root = module.root.trim_end_matches('/').to_string();
            if let Some(existing) = roots.get(&root) {
                debug!(
                    "Module root '{}' already owned by '{}', ignoring '{}'",
                    root, existing, module.id
                );
                continue;
            }
            roots.insert(root, module.id.clone());
        }

        for root in discovered {
            roots
                .entry(root.as_str().trim_end_matches('/').to_string())
                .or_insert_with(|| module_id_for_root(root.as_str()));
        }

        Self { roots }
    }

    /// Owning module of `file`, or the unassigned sentinel
    pub fn module_id(&self, file: &FileId) -> ModuleId {
        let mut current = file.as_str();
        while let Some(split) = current.rfind('/') {
            current = &current[..split];
            if let Some(module) = self.roots.get(current) {
                return module.clone();
            }
        }
        self.roots
            .get("")
            .cloned()
            .unwrap_or_else(|| ModuleId::new(UNASSIGNED_MODULE))
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleId)> {
        self.roots.iter().map(|(root, id)| (root.as_str(), id))
    }
}

fn module_id_for_root(root: &str) -> ModuleId {
    if root.is_empty() {
        ModuleId::new(ROOT_MODULE_ID)
    } else {
        ModuleId::new(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(id: &str, root: &str) -> ModuleDecl {
        ModuleDecl {
            id: ModuleId::new(id),
            root: root.to_string(),
            sequence: vec![],
            evidence: vec![],
        }
    }

    #[test]
    fn test_nearest_root_wins() {
        let roots = ModuleRoots::build(
            &[],
            &[
                declared("Outer", "app/code/Outer"),
                declared("Inner", "app/code/Outer/Nested"),
            ],
        );

        assert_eq!(
            roots.module_id(&FileId::new("app/code/Outer/Nested/Model/A.php")),
            ModuleId::new("Inner")
        );
        assert_eq!(
            roots.module_id(&FileId::new("app/code/Outer/Model/B.php")),
            ModuleId::new("Outer")
        );
    }

    #[test]
    fn test_files_outside_modules_are_unassigned() {
        let roots = ModuleRoots::build(&[], &[declared("Outer", "app/code/Outer")]);
        assert_eq!(
            roots.module_id(&FileId::new("lib/internal/Foo.php")),
            ModuleId::new(UNASSIGNED_MODULE)
        );
        // a sibling directory sharing a name prefix is not inside the root
        assert_eq!(
            roots.module_id(&FileId::new("app/code/OuterX/Foo.php")),
            ModuleId::new(UNASSIGNED_MODULE)
        );
    }

    #[test]
    fn test_discovered_roots_named_after_path() {
        let roots = ModuleRoots::build(&[FileId::new("vendor/acme/module-pay")], &[]);
        assert_eq!(
            roots.module_id(&FileId::new("vendor/acme/module-pay/Model/Pay.php")),
            ModuleId::new("vendor/acme/module-pay")
        );
    }

    #[test]
    fn test_declaration_names_discovered_root() {
        let roots = ModuleRoots::build(
            &[FileId::new("app/code/Acme/Pay")],
            &[declared("Acme_Pay", "app/code/Acme/Pay")],
        );
        assert_eq!(roots.len(), 1);
        assert_eq!(
            roots.module_id(&FileId::new("app/code/Acme/Pay/etc/di.xml")),
            ModuleId::new("Acme_Pay")
        );
    }
}
