use std::fmt;
use std::path::{Path, PathBuf};

/// Width of the `=` banner around file contents and listings.
pub const BANNER_WIDTH: usize = 60;

/// What kind of answer a file operation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Error,
    FileContent,
    DirList,
}

impl OutcomeKind {
    /// The literal marker the model was prompted to recognise.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Success => "[SUCCESS]",
            Self::Error => "[ERROR]",
            Self::FileContent => "[FILE_CONTENT]",
            Self::DirList => "[DIR_LIST]",
        }
    }
}

/// Result of one sandboxed file operation.
///
/// `Display` renders the prefixed text that is shown to the user and fed back
/// to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub kind: OutcomeKind,
    pub message: String,
    pub resolved_path: Option<PathBuf>,
}

impl ToolOutcome {
    pub fn success(message: impl Into<String>, path: &Path) -> Self {
        Self {
            kind: OutcomeKind::Success,
            message: message.into(),
            resolved_path: Some(path.to_path_buf()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Error,
            message: message.into(),
            resolved_path: None,
        }
    }

    pub fn error_at(message: impl Into<String>, path: &Path) -> Self {
        Self {
            resolved_path: Some(path.to_path_buf()),
            ..Self::error(message)
        }
    }

    pub fn file_content(path: &Path, content: &str) -> Self {
        let banner = "=".repeat(BANNER_WIDTH);
        Self {
            kind: OutcomeKind::FileContent,
            message: format!("{}\n{banner}\n{content}\n{banner}", path.display()),
            resolved_path: Some(path.to_path_buf()),
        }
    }

    pub fn dir_list(path: &Path, body: String) -> Self {
        Self {
            kind: OutcomeKind::DirList,
            message: body,
            resolved_path: Some(path.to_path_buf()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OutcomeKind::Error
    }
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.prefix(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prepends_kind_marker() {
        let ok = ToolOutcome::success("File deleted: /w/a.txt", Path::new("/w/a.txt"));
        assert_eq!(ok.to_string(), "[SUCCESS] File deleted: /w/a.txt");

        let err = ToolOutcome::error("File path is empty");
        assert_eq!(err.to_string(), "[ERROR] File path is empty");
        assert!(err.is_error());
        assert!(err.resolved_path.is_none());
    }

    #[test]
    fn file_content_wraps_body_in_banners() {
        let outcome = ToolOutcome::file_content(Path::new("/w/a.txt"), "hi");
        let banner = "=".repeat(BANNER_WIDTH);
        assert_eq!(
            outcome.to_string(),
            format!("[FILE_CONTENT] /w/a.txt\n{banner}\nhi\n{banner}")
        );
    }
}
