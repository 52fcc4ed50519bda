use std::path::{Component, Path, PathBuf};

/// Resolve `path` to its real location.
///
/// The longest existing ancestor is canonicalized (symlinks resolved, no UNC
/// prefixes thanks to `dunce`) and the non-existing remainder is appended
/// after lexical normalization, so paths that do not exist on disk still land
/// under the same canonical root as paths that do.
pub fn resolve_path(path: &Path) -> PathBuf {
    let normalized = lexical_normalize(path);

    let mut existing = normalized.as_path();
    let mut remainder: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(canonical) = dunce::canonicalize(existing) {
            let mut resolved = canonical;
            for part in remainder.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                remainder.push(name);
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

/// Remove `.` components and fold `..` into their parent without touching
/// the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match normalized.components().next_back() {
                    Some(Component::Normal(_)) => normalized.pop(),
                    _ => false,
                };
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Render a relative path with `/` separators regardless of platform
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Treat both `/` and `\` as separators in a raw path string
pub fn from_any_separator(raw: &str) -> PathBuf {
    PathBuf::from(raw.trim().replace('\\', "/"))
}
