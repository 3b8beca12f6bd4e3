use std::path::{Component, Path, PathBuf};

/// Lexically cleans a path: `.` components are dropped and `..` pops the
/// previous normal component where there is one.
pub fn clean_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut cleaned = PathBuf::new();

    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                ) && cleaned.pop();

                if !popped {
                    cleaned.push(component);
                }
            }
            other => cleaned.push(other),
        }
    }

    cleaned
}

/// Returns `path` relative to `root`, or `None` when it lies outside of it.
///
/// Both sides are cleaned first, so `./src/main.rs` under `.` is `src/main.rs`.
/// The root itself is returned as an empty path.
pub fn relative_to<P: AsRef<Path>, R: AsRef<Path>>(root: R, path: P) -> Option<PathBuf> {
    let root = clean_path(root);
    let path = clean_path(path);

    path.strip_prefix(&root).ok().map(Path::to_path_buf)
}

/// True when `child` lies strictly beneath `parent`.
pub fn is_child<P: AsRef<Path>, C: AsRef<Path>>(parent: P, child: C) -> bool {
    let parent = clean_path(parent);
    let child = clean_path(child);

    child != parent && child.starts_with(&parent)
}

/// The extension of `path` with its leading dot, e.g. `.rs`.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}
