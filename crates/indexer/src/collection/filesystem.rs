use super::{CollectionContext, FactCollector};
use crate::config::LayerRule;
use crate::errors::CollectorError;
use crate::facts::{CollectionFailure, FactBatch, FileDecl, ModuleId, UNASSIGNED_MODULE};
use crate::identity::paths::to_slash;
use ignore::{WalkBuilder, WalkState};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const UNCLASSIFIED_LAYER: &str = "unclassified";

const COLLECTOR_NAME: &str = "filesystem";

/// File inventory of the repository: one `FileDecl` per regular file, with
/// its size and layer.
pub struct FilesystemCollector;

enum Discovered {
    File(FileDecl),
    Failure(CollectionFailure),
}

impl FactCollector for FilesystemCollector {
    fn name(&self) -> &'static str {
        COLLECTOR_NAME
    }

    fn collect(&self, context: &CollectionContext<'_>) -> Result<FactBatch, CollectorError> {
        let config = context.config;
        if !context.repo_root.is_dir() {
            return Err(CollectorError::Io {
                path: context.repo_root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "repository root is not a directory",
                ),
            });
        }

        let discovered: Arc<Mutex<Vec<Discovered>>> = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));

        WalkBuilder::new(context.repo_root)
            .hidden(true)
            .git_ignore(config.respect_gitignore)
            .git_global(false)
            .git_exclude(config.respect_gitignore)
            .ignore(config.respect_gitignore)
            .parents(false)
            .follow_links(false)
            .threads(config.effective_threads())
            .build_parallel()
            .run(|| {
                let discovered = Arc::clone(&discovered);
                let cancelled = Arc::clone(&cancelled);

                Box::new(move |result| {
                    if context.is_cancelled() {
                        cancelled.store(true, Ordering::Relaxed);
                        return WalkState::Quit;
                    }
                    let item = match result {
                        Ok(entry) => {
                            if context.is_excluded(entry.path()) {
                                return WalkState::Skip;
                            }
                            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                                return WalkState::Continue;
                            }
                            inspect_file(context, entry.path())
                        }
                        Err(e) => Discovered::Failure(CollectionFailure {
                            collector: COLLECTOR_NAME.to_string(),
                            unit: walk_error_unit(context.repo_root, &e),
                            message: e.to_string(),
                        }),
                    };
                    discovered
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(item);
                    WalkState::Continue
                })
            });

        if cancelled.load(Ordering::Relaxed) || context.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        let discovered = std::mem::take(
            &mut *discovered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut batch = FactBatch::new();
        for item in discovered {
            match item {
                Discovered::File(file) => batch.files.push(file),
                Discovered::Failure(failure) => batch.failures.push(failure),
            }
        }
        batch.files.sort();
        batch.failures.sort();

        debug!(
            "Filesystem walk found {} files ({} skipped)",
            batch.files.len(),
            batch.failures.len()
        );
        Ok(batch)
    }
}

/// Path a walk error concerns, repository-relative; `walk` when the error
/// carries none.
fn walk_error_unit(repo_root: &Path, error: &ignore::Error) -> String {
    fn error_path(error: &ignore::Error) -> Option<&Path> {
        match error {
            ignore::Error::WithPath { path, .. } => Some(path),
            ignore::Error::Loop { child, .. } => Some(child),
            ignore::Error::WithLineNumber { err, .. } | ignore::Error::WithDepth { err, .. } => {
                error_path(err)
            }
            ignore::Error::Partial(errors) => errors.iter().find_map(error_path),
            _ => None,
        }
    }

    match error_path(error) {
        Some(path) => to_slash(path.strip_prefix(repo_root).unwrap_or(path)),
        None => "walk".to_string(),
    }
}

fn inspect_file(context: &CollectionContext<'_>, path: &Path) -> Discovered {
    let relative = path.strip_prefix(context.repo_root).unwrap_or(path);
    let unit = to_slash(relative);

    let size = match path.metadata() {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            return Discovered::Failure(CollectionFailure {
                collector: COLLECTOR_NAME.to_string(),
                unit,
                message: e.to_string(),
            });
        }
    };
    if size > context.config.max_file_size {
        return Discovered::Failure(CollectionFailure {
            collector: COLLECTOR_NAME.to_string(),
            unit,
            message: format!(
                "file size {size} exceeds max_file_size {}",
                context.config.max_file_size
            ),
        });
    }

    Discovered::File(FileDecl {
        layer: classify_layer(relative, &context.config.layers),
        path: unit,
        size,
        module: ModuleId::new(UNASSIGNED_MODULE),
    })
}

/// First rule whose segment names one of the file's directories wins
pub fn classify_layer(relative: &Path, rules: &[LayerRule]) -> String {
    let directories: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    rules
        .iter()
        .find(|rule| directories.iter().any(|dir| *dir == rule.segment))
        .map(|rule| rule.layer.clone())
        .unwrap_or_else(|| UNCLASSIFIED_LAYER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn run(root: &Path, config: &AnalysisConfig, excluded: &[PathBuf]) -> FactBatch {
        let context = CollectionContext {
            repo_root: root,
            config,
            excluded_paths: excluded,
            cancellation_token: None,
        };
        FilesystemCollector.collect(&context).unwrap()
    }

    #[test]
    fn test_classify_layer_uses_first_matching_rule() {
        let rules = AnalysisConfig::default().layers;
        assert_eq!(
            classify_layer(Path::new("app/code/Pay/Gateway/Controller/Index.php"), &rules),
            "controller"
        );
        assert_eq!(
            classify_layer(Path::new("app/code/Pay/Gateway/etc/di.xml"), &rules),
            "config"
        );
        assert_eq!(
            classify_layer(Path::new("README.md"), &rules),
            UNCLASSIFIED_LAYER
        );
    }

    #[test]
    fn test_collects_files_with_size_and_layer() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "Pay/Model/Charge.php", "<?php class Charge {}");
        write(temp.path(), "Pay/etc/module.xml", "<config/>");

        let batch = run(temp.path(), &AnalysisConfig::default(), &[]);
        let paths: Vec<&str> = batch.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Pay/Model/Charge.php", "Pay/etc/module.xml"]);
        assert_eq!(batch.files[0].layer, "model");
        assert_eq!(batch.files[0].size, 21);
        assert!(batch.failures.is_empty());
    }

    #[test]
    fn test_oversized_files_become_failures() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "big.txt", "0123456789");
        let config = AnalysisConfig {
            max_file_size: 4,
            ..AnalysisConfig::default()
        };

        let batch = run(temp.path(), &config, &[]);
        assert!(batch.files.is_empty());
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].unit, "big.txt");
    }

    #[test]
    fn test_excluded_directories_are_skipped() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/a.php", "a");
        write(temp.path(), "out/symbol_index.json", "{}");

        let batch = run(temp.path(), &AnalysisConfig::default(), &[temp.path().join("out")]);
        let paths: Vec<&str> = batch.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.php"]);
    }

    #[test]
    fn test_walk_errors_keep_their_paths() {
        let root = Path::new("/repo");
        let denied = |relative: &str| ignore::Error::WithDepth {
            depth: 2,
            err: Box::new(ignore::Error::WithPath {
                path: root.join(relative),
                err: Box::new(ignore::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                ))),
            }),
        };

        let mut batch = FactBatch::new();
        for error in [denied("app/private"), denied("lib/secret")] {
            batch.failures.push(CollectionFailure {
                collector: COLLECTOR_NAME.to_string(),
                unit: walk_error_unit(root, &error),
                message: "permission denied".to_string(),
            });
        }
        batch.normalize();

        let units: Vec<&str> = batch.failures.iter().map(|f| f.unit.as_str()).collect();
        assert_eq!(units, vec!["app/private", "lib/secret"]);
        assert_eq!(
            walk_error_unit(root, &ignore::Error::Io(std::io::Error::other("boom"))),
            "walk"
        );
    }
}
