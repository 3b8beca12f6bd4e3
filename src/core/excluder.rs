use super::paths::{clean_path, relative_to};
use crate::config::ExcluderConfig;

use anyhow::Context;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Decides which paths under a project root are ignored.
#[derive(Debug, Clone)]
pub struct Excluder {
    root: PathBuf,
    dirs: HashSet<PathBuf>,
    files: HashSet<PathBuf>,
    regex: Vec<Regex>,
}

impl Excluder {
    /// Builds an excluder rooted at `root`. Fails on the first invalid pattern.
    pub fn new<P: AsRef<Path>>(root: P, config: &ExcluderConfig) -> anyhow::Result<Self> {
        let regex = config
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("excluder error: invalid pattern '{pattern}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            dirs: config
                .dirs
                .iter()
                .map(clean_path)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect(),
            files: config.files.iter().map(clean_path).collect(),
            regex,
        })
    }

    /// Returns true if the path should be ignored.
    ///
    /// `path` may be absolute or relative to the working directory; it is
    /// matched relative to the excluder root. Paths outside of the root are
    /// always ignored. `_is_dir` is accepted for symmetry with the event
    /// source: excluded dirs match both the directory and everything in it.
    pub fn should_ignore<P: AsRef<Path>>(&self, path: P, _is_dir: bool) -> bool {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return true;
        }

        let Some(relative) = relative_to(&self.root, path) else {
            return true;
        };
        let relative = if relative.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            relative
        };

        if self.dirs.iter().any(|dir| relative.starts_with(dir)) {
            return true;
        }

        if self.files.contains(&relative) {
            return true;
        }

        let relative = relative.to_string_lossy();
        self.regex.iter().any(|regex| regex.is_match(&relative))
    }
}
