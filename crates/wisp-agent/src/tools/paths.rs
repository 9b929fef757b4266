//! Filesystem path boundary shared by every path-accepting tool.

use std::path::{Component, Path, PathBuf};

/// Resolve `raw` (following symlinks) and check it lives under one of the
/// allow-roots.
///
/// Containment is checked component-wise via `Path::starts_with`, so
/// `/data/workspace-other` is not inside `/data/workspace` — a plain string
/// prefix check would accept that sibling and is exactly the bug this
/// function exists to prevent.
///
/// For paths that do not exist yet (write targets), the deepest existing
/// ancestor is canonicalised and the remaining components are appended; the
/// remainder must not contain `..`.
pub fn check_path(raw: &str, allow_roots: &[PathBuf]) -> Result<PathBuf, String> {
    if raw.trim().is_empty() {
        return Err("path is empty".to_string());
    }
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(format!("path must be absolute: {raw}"));
    }

    let resolved = resolve(path)?;

    for root in allow_roots {
        // Roots are configured paths; canonicalise so symlinked roots behave.
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
        if resolved == root || resolved.starts_with(&root) {
            return Ok(resolved);
        }
    }

    Err(format!(
        "path '{}' is outside the allowed roots",
        resolved.display()
    ))
}

/// Canonicalise `path`, tolerating a missing suffix (for files about to be
/// created). Components are consumed left to right: the deepest existing
/// prefix is canonicalised, and every remaining component must be a plain
/// name — a `..` or `.` past the existing prefix cannot be resolved against
/// the filesystem and is rejected outright.
fn resolve(path: &Path) -> Result<PathBuf, String> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }

    let mut prefix = PathBuf::new();
    let mut remainder: Vec<Component> = Vec::new();
    for comp in path.components() {
        if remainder.is_empty() {
            let candidate = prefix.join(comp);
            if candidate.exists() {
                prefix = candidate;
                continue;
            }
        }
        remainder.push(comp);
    }

    let mut resolved = std::fs::canonicalize(&prefix)
        .map_err(|e| format!("cannot resolve '{}': {e}", prefix.display()))?;
    for comp in remainder {
        match comp {
            Component::Normal(name) => resolved.push(name),
            _ => {
                return Err(format!(
                    "path '{}' escapes via parent references",
                    path.display()
                ))
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("workspace");
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::write(root.join("a/file.txt"), "x").unwrap();
        // Sibling directory whose name shares the root as a string prefix.
        std::fs::create_dir_all(dir.path().join("workspace-other")).unwrap();
        std::fs::write(dir.path().join("workspace-other/secret"), "s").unwrap();
        (dir, root)
    }

    #[test]
    fn sibling_name_with_shared_prefix_rejects() {
        let (dir, root) = setup();
        let roots = vec![root];
        let sibling = dir.path().join("workspace-other/secret");
        assert!(check_path(sibling.to_str().unwrap(), &roots).is_err());
    }

    #[test]
    fn dotdot_inside_root_resolves_and_accepts() {
        let (_dir, root) = setup();
        let roots = vec![root.clone()];
        let p = root.join("a/../a/file.txt");
        let resolved = check_path(p.to_str().unwrap(), &roots).unwrap();
        assert!(resolved.ends_with("a/file.txt"));
    }

    #[test]
    fn dotdot_escaping_root_rejects() {
        let (_dir, root) = setup();
        let roots = vec![root.clone()];
        let p = root.join("a/../../workspace-other/secret");
        assert!(check_path(p.to_str().unwrap(), &roots).is_err());
    }

    #[test]
    fn nonexistent_write_target_under_root_accepts() {
        let (_dir, root) = setup();
        let roots = vec![root.clone()];
        let p = root.join("a/new-dir/new-file.txt");
        let resolved = check_path(p.to_str().unwrap(), &roots).unwrap();
        assert!(resolved.starts_with(std::fs::canonicalize(&root).unwrap()));
    }

    #[test]
    fn nonexistent_with_dotdot_remainder_rejects() {
        let (_dir, root) = setup();
        let roots = vec![root.clone()];
        let p = root.join("a/ghost/../../../etc/passwd");
        assert!(check_path(p.to_str().unwrap(), &roots).is_err());
    }

    #[test]
    fn relative_path_rejects() {
        let (_dir, root) = setup();
        assert!(check_path("a/file.txt", &[root]).is_err());
    }

    #[test]
    fn symlink_escape_rejects() {
        let (dir, root) = setup();
        let link = root.join("link");
        std::os::unix::fs::symlink(dir.path().join("workspace-other"), &link).unwrap();
        let p = link.join("secret");
        assert!(check_path(p.to_str().unwrap(), &[root]).is_err());
    }
}
