use super::result::{ToolOutcome, BANNER_WIDTH};
use crate::security::{sanitize_path, PathSandbox, SandboxError};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Sandboxed file operations driven by user commands and model tool calls.
///
/// Every operation returns a [`ToolOutcome`]; filesystem failures are
/// reported in the outcome and never propagated.
#[derive(Debug, Clone)]
pub struct FileManager {
    sandbox: PathSandbox,
}

/// Resolve a WHATWG encoding label; an empty label means UTF-8.
fn resolve_encoding(label: &str) -> Option<&'static Encoding> {
    let label = label.trim();
    if label.is_empty() {
        return Some(UTF_8);
    }
    Encoding::for_label(label.as_bytes())
}

/// Strict decode: malformed input yields `None` instead of replacement characters.
fn decode(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

/// Strict encode: unmappable characters yield `None`.
///
/// `encoding_rs` has no UTF-16 encoders, so those labels produce `None` too.
fn encode<'a>(encoding: &'static Encoding, content: &'a str) -> Option<Cow<'a, [u8]>> {
    let (bytes, used, unmappable) = encoding.encode(content);
    (used == encoding && !unmappable).then_some(bytes)
}

fn encoding_error(path: &Path) -> ToolOutcome {
    ToolOutcome::error_at(
        format!("File encoding not supported (try utf-8 or gbk): {}", path.display()),
        path,
    )
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// `1234567` -> `1,234,567`
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn entry_line(path: &Path, name: &str) -> String {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => format!("[DIR] [{:>12}] {name}", ""),
        Ok(meta) => format!(
            "[FILE] [{:>12}] {name}",
            format!("{} bytes", group_thousands(meta.len()))
        ),
        Err(_) => format!("[FILE] [{:>12}] {name}", ""),
    }
}

impl FileManager {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        Ok(Self {
            sandbox: PathSandbox::new(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn current_dir(&self) -> &Path {
        self.sandbox.current_dir()
    }

    /// Resolve `raw` and confirm it stays inside the sandbox.
    fn checked(&self, raw: &str) -> Result<PathBuf, ToolOutcome> {
        let resolved = self.sandbox.resolve(raw);
        if self.sandbox.is_safe(&resolved) {
            Ok(resolved)
        } else {
            Err(ToolOutcome::error_at(
                format!("Path out of working directory: {}", resolved.display()),
                &resolved,
            ))
        }
    }

    pub fn read(&self, raw: &str, encoding: &str) -> ToolOutcome {
        let path = match self.checked(raw) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let shown = path.display();

        if !path.exists() {
            return ToolOutcome::error_at(format!("File not found: {shown}"), &path);
        }
        if path.is_dir() {
            return ToolOutcome::error_at(
                format!("Path is a directory, not a file: {shown}"),
                &path,
            );
        }
        let Some(encoding) = resolve_encoding(encoding) else {
            return encoding_error(&path);
        };

        match fs::read(&path) {
            Ok(bytes) => match decode(encoding, &bytes) {
                Some(content) => ToolOutcome::file_content(&path, &content),
                None => encoding_error(&path),
            },
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                ToolOutcome::error_at(format!("No read permission: {shown}"), &path)
            }
            Err(err) => ToolOutcome::error_at(format!("Failed to read file: {err}"), &path),
        }
    }

    /// Create or overwrite a file, creating missing parent directories.
    pub fn write(&self, raw: &str, content: &str, encoding: &str) -> ToolOutcome {
        if sanitize_path(raw).is_empty() {
            return ToolOutcome::error("File path is empty");
        }
        let path = match self.checked(raw) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let shown = path.display();

        if path.is_dir() {
            return ToolOutcome::error_at(
                format!(
                    "Path is a directory, not a file: {shown}. Did you mean to write a file inside this directory?"
                ),
                &path,
            );
        }
        let Some(bytes) = resolve_encoding(encoding).and_then(|enc| encode(enc, content)) else {
            return encoding_error(&path);
        };

        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, &bytes));
        match written {
            Ok(()) => {
                ToolOutcome::success(format!("File written successfully: {shown}"), &path)
            }
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                ToolOutcome::error_at(format!("No write permission: {shown}"), &path)
            }
            Err(err) => ToolOutcome::error_at(
                format!("Failed to write file: {err} (path: {shown})"),
                &path,
            ),
        }
    }

    /// Append to an existing file. Never creates one.
    pub fn append(&self, raw: &str, content: &str, encoding: &str) -> ToolOutcome {
        let path = match self.checked(raw) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let shown = path.display();

        if !path.exists() {
            return ToolOutcome::error_at(format!("File not found (append mode): {shown}"), &path);
        }
        if path.is_dir() {
            return ToolOutcome::error_at(
                format!("Path is a directory, not a file: {shown}"),
                &path,
            );
        }
        let Some(bytes) = resolve_encoding(encoding).and_then(|enc| encode(enc, content)) else {
            return encoding_error(&path);
        };

        let appended = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(&bytes));
        match appended {
            Ok(()) => ToolOutcome::success(format!("Content appended to: {shown}"), &path),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                ToolOutcome::error_at(format!("No write permission: {shown}"), &path)
            }
            Err(err) => ToolOutcome::error_at(format!("Failed to append to file: {err}"), &path),
        }
    }

    pub fn delete(&self, raw: &str) -> ToolOutcome {
        let path = match self.checked(raw) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let shown = path.display();

        if !path.exists() {
            return ToolOutcome::error_at(format!("File not found: {shown}"), &path);
        }
        if path.is_dir() {
            return ToolOutcome::error_at(format!("Path is a directory: {shown}"), &path);
        }

        match fs::remove_file(&path) {
            Ok(()) => ToolOutcome::success(format!("File deleted: {shown}"), &path),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                ToolOutcome::error_at(format!("No delete permission: {shown}"), &path)
            }
            Err(err) => ToolOutcome::error_at(format!("Failed to delete file: {err}"), &path),
        }
    }

    pub fn list(&self, raw: &str, show_hidden: bool, recursive: bool) -> ToolOutcome {
        let path = match self.checked(raw) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let shown = path.display();

        if !path.exists() {
            return ToolOutcome::error_at(format!("Directory not found: {shown}"), &path);
        }
        if !path.is_dir() {
            return ToolOutcome::error_at(format!("Path is not a directory: {shown}"), &path);
        }

        let entries = if recursive {
            self.walk_entries(&path, show_hidden)
        } else {
            Self::immediate_entries(&path, show_hidden)
        };

        match entries {
            Ok(lines) if lines.is_empty() => {
                ToolOutcome::dir_list(&path, format!("{shown} (empty)"))
            }
            Ok(lines) => ToolOutcome::dir_list(
                &path,
                format!("{shown}\n{}\n{}", "=".repeat(BANNER_WIDTH), lines.join("\n")),
            ),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                ToolOutcome::error_at(format!("No access permission: {shown}"), &path)
            }
            Err(err) => ToolOutcome::error_at(format!("Failed to list directory: {err}"), &path),
        }
    }

    fn immediate_entries(dir: &Path, show_hidden: bool) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if show_hidden || !is_hidden(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names
            .iter()
            .map(|name| entry_line(&dir.join(name), name))
            .collect())
    }

    /// Depth-first walk, sorted per directory, names relative to the root.
    fn walk_entries(&self, dir: &Path, show_hidden: bool) -> io::Result<Vec<String>> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| show_hidden || !is_hidden(&entry.file_name().to_string_lossy()));

        let mut lines = Vec::new();
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(self.root())
                .unwrap_or_else(|_| entry.path());
            lines.push(entry_line(entry.path(), &relative.display().to_string()));
        }
        Ok(lines)
    }

    /// Idempotent `mkdir -p`.
    pub fn create_dir(&self, raw: &str) -> ToolOutcome {
        let path = match self.checked(raw) {
            Ok(path) => path,
            Err(outcome) => return outcome,
        };
        let shown = path.display();

        match fs::create_dir_all(&path) {
            Ok(()) => ToolOutcome::success(format!("Directory created: {shown}"), &path),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                ToolOutcome::error_at(format!("No create permission: {shown}"), &path)
            }
            Err(err) => {
                ToolOutcome::error_at(format!("Failed to create directory: {err}"), &path)
            }
        }
    }

    /// Move the working directory used for relative paths.
    pub fn change_dir(&mut self, raw: &str) -> ToolOutcome {
        match self.sandbox.set_current_dir(raw) {
            Ok(dir) => ToolOutcome::success(format!("Current directory: {}", dir.display()), &dir),
            Err(err) => ToolOutcome::error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::result::OutcomeKind;

    fn manager() -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileManager::new(dir.path()).unwrap();
        (dir, manager)
    }

    fn listing(manager: &FileManager) -> String {
        manager.list(".", true, true).to_string()
    }

    #[test]
    fn group_thousands_inserts_separators() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn write_then_read_returns_content_between_banners() {
        let (_dir, manager) = manager();
        let written = manager.write("notes/a.txt", "line one\nline two", "utf-8");
        assert_eq!(written.kind, OutcomeKind::Success);

        let path = manager.root().join("notes/a.txt");
        let banner = "=".repeat(BANNER_WIDTH);
        assert_eq!(
            manager.read("notes/a.txt", "utf-8").to_string(),
            format!(
                "[FILE_CONTENT] {}\n{banner}\nline one\nline two\n{banner}",
                path.display()
            )
        );
    }

    #[test]
    fn write_success_message_echoes_resolved_path() {
        let (_dir, manager) = manager();
        let outcome = manager.write("a.txt", "hi", "utf-8");
        let path = manager.root().join("a.txt");
        assert_eq!(
            outcome.to_string(),
            format!("[SUCCESS] File written successfully: {}", path.display())
        );
        assert_eq!(outcome.resolved_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn write_rejects_empty_path_and_directories() {
        let (dir, manager) = manager();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert_eq!(
            manager.write("  ", "x", "utf-8").to_string(),
            "[ERROR] File path is empty"
        );
        let outcome = manager.write("sub", "x", "utf-8");
        assert!(outcome.is_error());
        assert!(outcome
            .message
            .ends_with("Did you mean to write a file inside this directory?"));
    }

    #[test]
    fn write_overwrites_existing_file() {
        let (dir, manager) = manager();
        manager.write("a.txt", "first", "utf-8");
        manager.write("a.txt", "second", "utf-8");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "second"
        );
    }

    #[test]
    fn read_reports_missing_and_directory_paths() {
        let (dir, manager) = manager();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert!(manager
            .read("nope.txt", "utf-8")
            .to_string()
            .starts_with("[ERROR] File not found: "));
        assert!(manager
            .read("sub", "utf-8")
            .to_string()
            .starts_with("[ERROR] Path is a directory, not a file: "));
    }

    #[test]
    fn read_rejects_invalid_bytes_and_unknown_encodings() {
        let (dir, manager) = manager();
        std::fs::write(dir.path().join("bin.dat"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        std::fs::write(dir.path().join("ok.txt"), "fine").unwrap();

        let invalid = manager.read("bin.dat", "utf-8");
        assert_eq!(
            invalid.message,
            format!(
                "File encoding not supported (try utf-8 or gbk): {}",
                manager.root().join("bin.dat").display()
            )
        );
        let unknown = manager.read("ok.txt", "no-such-codec");
        assert!(unknown.message.starts_with("File encoding not supported"));
        assert!(!manager.read("ok.txt", "UTF8").is_error());
        assert!(!manager.read("ok.txt", "").is_error());
    }

    #[test]
    fn gbk_files_are_decoded_and_encoded() {
        let (dir, manager) = manager();
        std::fs::write(dir.path().join("g.txt"), [0xD6, 0xD0, 0xCE, 0xC4]).unwrap();

        let read = manager.read("g.txt", "gbk");
        assert_eq!(read.kind, OutcomeKind::FileContent);
        assert!(read.message.contains("\n中文\n"));
        assert!(manager.read("g.txt", "utf-8").is_error());

        assert_eq!(manager.write("h.txt", "中文", "GBK").kind, OutcomeKind::Success);
        assert_eq!(
            std::fs::read(dir.path().join("h.txt")).unwrap(),
            vec![0xD6, 0xD0, 0xCE, 0xC4]
        );
        assert_eq!(manager.append("h.txt", "字", "gbk").kind, OutcomeKind::Success);
        assert!(manager.read("h.txt", "gbk").message.contains("\n中文字\n"));
    }

    #[test]
    fn write_refuses_unknown_and_unrepresentable_encodings() {
        let (dir, manager) = manager();

        assert!(manager
            .write("a.txt", "x", "no-such-codec")
            .message
            .starts_with("File encoding not supported"));
        assert!(manager.write("b.txt", "中文", "windows-1252").is_error());
        assert!(!dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn permission_failures_have_distinct_messages() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, manager) = manager();
        let locked = dir.path().join("locked.txt");
        std::fs::write(&locked, "secret").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users bypass mode bits.
        if std::fs::read(&locked).is_ok() {
            return;
        }
        let resolved = manager.root().join("locked.txt");
        let shown = resolved.display();

        assert_eq!(
            manager.read("locked.txt", "utf-8").to_string(),
            format!("[ERROR] No read permission: {shown}")
        );
        assert_eq!(
            manager.write("locked.txt", "x", "utf-8").to_string(),
            format!("[ERROR] No write permission: {shown}")
        );
        assert_eq!(
            manager.append("locked.txt", "x", "utf-8").to_string(),
            format!("[ERROR] No write permission: {shown}")
        );

        let sealed = dir.path().join("sealed");
        std::fs::create_dir(&sealed).unwrap();
        std::fs::write(sealed.join("inner.txt"), "x").unwrap();
        std::fs::set_permissions(&sealed, std::fs::Permissions::from_mode(0o555)).unwrap();
        assert_eq!(
            manager.delete("sealed/inner.txt").to_string(),
            format!(
                "[ERROR] No delete permission: {}",
                manager.root().join("sealed/inner.txt").display()
            )
        );
        assert_eq!(
            manager.create_dir("sealed/sub").to_string(),
            format!(
                "[ERROR] No create permission: {}",
                manager.root().join("sealed/sub").display()
            )
        );

        let closed = dir.path().join("closed");
        std::fs::create_dir(&closed).unwrap();
        std::fs::set_permissions(&closed, std::fs::Permissions::from_mode(0o000)).unwrap();
        assert_eq!(
            manager.list("closed", false, false).to_string(),
            format!(
                "[ERROR] No access permission: {}",
                manager.root().join("closed").display()
            )
        );

        std::fs::set_permissions(&closed, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::set_permissions(&sealed, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn append_requires_existing_file() {
        let (dir, manager) = manager();
        let outcome = manager.append("missing.txt", "x", "utf-8");
        assert!(outcome
            .to_string()
            .starts_with("[ERROR] File not found (append mode): "));
        assert!(!dir.path().join("missing.txt").exists());

        manager.write("log.txt", "a", "utf-8");
        let outcome = manager.append("log.txt", "b", "utf-8");
        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
            "ab"
        );
    }

    #[test]
    fn delete_missing_file_reports_error_and_changes_nothing() {
        let (_dir, manager) = manager();
        let before = listing(&manager);

        let outcome = manager.delete("ghost.txt");
        assert_eq!(
            outcome.to_string(),
            format!(
                "[ERROR] File not found: {}",
                manager.root().join("ghost.txt").display()
            )
        );
        assert_eq!(listing(&manager), before);
    }

    #[test]
    fn delete_refuses_directories_and_removes_files() {
        let (dir, manager) = manager();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        assert!(manager
            .delete("sub")
            .to_string()
            .starts_with("[ERROR] Path is a directory: "));
        assert_eq!(manager.delete("a.txt").kind, OutcomeKind::Success);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn create_dir_is_idempotent_and_creates_intermediates() {
        let (dir, manager) = manager();
        assert_eq!(manager.create_dir("a/b/c").kind, OutcomeKind::Success);
        assert_eq!(manager.create_dir("a/b/c").kind, OutcomeKind::Success);
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[test]
    fn list_formats_entries_and_sorts_them() {
        let (dir, manager) = manager();
        std::fs::write(dir.path().join("b.txt"), vec![b'x'; 1234]).unwrap();
        std::fs::create_dir(dir.path().join("a_dir")).unwrap();

        let outcome = manager.list(".", false, false);
        let banner = "=".repeat(BANNER_WIDTH);
        assert_eq!(
            outcome.to_string(),
            format!(
                "[DIR_LIST] {}\n{banner}\n[DIR] [            ] a_dir\n[FILE] [ 1,234 bytes] b.txt",
                manager.root().display()
            )
        );
    }

    #[test]
    fn list_hidden_filter() {
        let (dir, manager) = manager();
        std::fs::write(dir.path().join(".secret"), "x").unwrap();
        std::fs::write(dir.path().join("visible"), "x").unwrap();

        let hidden = manager.list(".", false, false).to_string();
        assert!(!hidden.contains(".secret"));
        assert!(hidden.contains("visible"));

        let shown = manager.list(".", true, false).to_string();
        assert!(shown.contains(".secret"));
    }

    #[test]
    fn list_recursive_uses_root_relative_names_and_prunes_hidden_dirs() {
        let (dir, manager) = manager();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(dir.path().join("src/nested/z.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();

        let mut manager = manager;
        manager.change_dir("src");
        let text = manager.list(".", false, true).to_string();
        let lines: Vec<&str> = text.lines().skip(2).collect();
        assert_eq!(
            lines,
            vec![
                "[FILE] [     0 bytes] src/a.rs",
                "[DIR] [            ] src/nested",
                "[FILE] [     0 bytes] src/nested/z.rs",
            ]
        );
        assert!(!manager.list("..", false, true).to_string().contains(".git"));
    }

    #[test]
    fn list_empty_directory_and_errors() {
        let (dir, manager) = manager();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();

        assert_eq!(
            manager.list("empty", false, false).to_string(),
            format!(
                "[DIR_LIST] {} (empty)",
                manager.root().join("empty").display()
            )
        );
        assert!(manager
            .list("nope", false, false)
            .to_string()
            .starts_with("[ERROR] Directory not found: "));
        assert!(manager
            .list("f.txt", false, false)
            .to_string()
            .starts_with("[ERROR] Path is not a directory: "));
    }

    #[test]
    fn every_operation_refuses_paths_outside_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("victim.txt"), "keep").unwrap();
        let mut manager = FileManager::new(&root).unwrap();

        let victim = outer.path().join("victim.txt");
        let victim_str = victim.to_string_lossy().into_owned();
        for raw in ["../victim.txt", victim_str.as_str()] {
            for outcome in [
                manager.read(raw, "utf-8"),
                manager.write(raw, "overwritten", "utf-8"),
                manager.append(raw, "more", "utf-8"),
                manager.delete(raw),
                manager.list(raw, true, true),
                manager.create_dir(raw),
            ] {
                assert!(
                    outcome.to_string().starts_with("[ERROR] Path out of working directory: "),
                    "{outcome}"
                );
            }
        }
        assert!(manager.create_dir("../newdir").is_error());
        assert!(manager.change_dir("..").is_error());

        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "keep");
        assert!(!outer.path().join("newdir").exists());
    }

    #[test]
    fn change_dir_affects_relative_operations() {
        let (dir, mut manager) = manager();
        manager.create_dir("work");
        assert_eq!(manager.change_dir("work").kind, OutcomeKind::Success);

        manager.write("inside.txt", "x", "utf-8");
        assert!(dir.path().join("work/inside.txt").exists());
        assert_eq!(manager.current_dir(), manager.root().join("work"));
    }
}
