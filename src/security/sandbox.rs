use std::path::{Component, Path, PathBuf};

/// Errors raised when a path cannot be used as a working directory.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Path out of working directory: {0}")]
    OutsideRoot(String),

    #[error("Directory not found: {0}")]
    NotFound(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Sandbox root unavailable: {0}")]
    Io(#[from] std::io::Error),
}

/// Confines path resolution to a single root directory.
///
/// Relative paths are resolved against a movable current directory that
/// always stays inside the root.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    current_dir: PathBuf,
}

/// Remove control characters (C0, DEL, C1) and bidi overrides, then trim.
pub fn sanitize_path(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            let code = u32::from(*c);
            !(code <= 0x1F || (0x7F..=0x9F).contains(&code) || (0x202A..=0x202E).contains(&code))
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Collapse `.`, `..` and redundant separators without touching the filesystem.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root.
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

impl PathSandbox {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let display = root.display().to_string();
        let metadata = std::fs::metadata(root).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => SandboxError::NotFound(display.clone()),
            _ => SandboxError::Io(err),
        })?;
        if !metadata.is_dir() {
            return Err(SandboxError::NotADirectory(display));
        }
        let root = root.canonicalize()?;
        Ok(Self {
            current_dir: root.clone(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    /// Turn user-supplied text into a normalized absolute path.
    ///
    /// The result is not checked against the root; call [`Self::is_safe`].
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let cleaned = sanitize_path(raw);
        let candidate = Path::new(&cleaned);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.current_dir.join(candidate)
        };
        normalize_lexical(&joined)
    }

    /// True when `path`, with symlinks resolved, lies inside the root.
    ///
    /// Paths that do not exist yet are judged by their nearest existing
    /// ancestor. Any resolution failure counts as unsafe.
    pub fn is_safe(&self, path: &Path) -> bool {
        match canonicalize_lenient(path) {
            Some(canonical) => canonical.starts_with(&self.root),
            None => false,
        }
    }

    /// Move the current directory; on failure the pointer is unchanged.
    pub fn set_current_dir(&mut self, raw: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.resolve(raw);
        let display = resolved.display().to_string();
        if !self.is_safe(&resolved) {
            return Err(SandboxError::OutsideRoot(display));
        }
        if !resolved.exists() {
            return Err(SandboxError::NotFound(display));
        }
        if !resolved.is_dir() {
            return Err(SandboxError::NotADirectory(display));
        }
        let canonical = resolved.canonicalize()?;
        self.current_dir = canonical.clone();
        Ok(canonical)
    }
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
///
/// A dangling symlink anywhere on the path yields `None`.
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    let normalized = normalize_lexical(path);
    let mut existing = normalized.as_path();
    let mut missing = Vec::new();

    loop {
        match std::fs::symlink_metadata(existing) {
            Ok(_) => {
                let canonical = existing.canonicalize().ok()?;
                if !missing.is_empty() && !canonical.is_dir() {
                    return None;
                }
                let mut out = canonical;
                for part in missing.iter().rev() {
                    out.push(part);
                }
                return Some(out);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let name = existing.file_name()?.to_os_string();
                missing.push(name);
                existing = existing.parent()?;
            }
            Err(_) => return None,
        }
    }
}
