//! Path utilities.
//!
//! Every path a tool touches is resolved against the project root first.
//! Resolution here is purely lexical: nothing in this module reads the
//! filesystem, so a rejected candidate never causes any I/O.
//!
//! Roots that look like Windows paths (`C:\...` or `\\server\share\...`) are
//! handled on every host platform, with case-insensitive comparison, so the
//! same project root string behaves identically wherever the engine runs.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced by the path safety checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathSafetyError {
    /// The candidate contains `..` or resolves outside the project root.
    #[error("path '{0}' is outside the project root")]
    PathTraversal(String),
}

/// Get the sandcode configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/sandcode` if set
/// - `~/.config/sandcode` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sandcode"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Anchor {
    Relative,
    /// Rooted at `/` (or `\` on a drive-less Windows path).
    Root,
    /// `C:`
    Drive(String),
    /// `\\server\share`
    Unc(String, String),
}

/// A path split into its anchor and normal segments.
///
/// `.` segments are dropped and `..` segments pop their parent, so two
/// spellings of the same location resolve to equal values.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    anchor: Anchor,
    segments: Vec<String>,
    windows: bool,
}

impl ResolvedPath {
    fn parse(raw: &str, windows: bool) -> Self {
        let (anchor, rest) = split_anchor(raw, windows);
        let mut segments: Vec<String> = Vec::new();
        for segment in split_segments(rest, windows) {
            if segment == ".." {
                segments.pop();
            } else {
                segments.push(segment.to_string());
            }
        }
        Self {
            anchor,
            segments,
            windows,
        }
    }

    /// Whether the path has an anchor (drive, UNC share or `/`).
    pub fn is_absolute(&self) -> bool {
        self.anchor != Anchor::Relative
    }

    fn separator(&self) -> char {
        if self.windows {
            '\\'
        } else {
            '/'
        }
    }

    fn anchor_eq(&self, other: &Self) -> bool {
        match (&self.anchor, &other.anchor) {
            (Anchor::Drive(a), Anchor::Drive(b)) => self.text_eq(a, b),
            (Anchor::Unc(s1, h1), Anchor::Unc(s2, h2)) => self.text_eq(s1, s2) && self.text_eq(h1, h2),
            (a, b) => a == b,
        }
    }

    fn text_eq(&self, a: &str, b: &str) -> bool {
        if self.windows {
            a.to_lowercase() == b.to_lowercase()
        } else {
            a == b
        }
    }

    /// The segments of `self` below `root`, or `None` if `self` is not inside it.
    fn segments_below<'a>(&'a self, root: &Self) -> Option<&'a [String]> {
        if !self.anchor_eq(root) || self.segments.len() < root.segments.len() {
            return None;
        }
        let prefix_matches = root
            .segments
            .iter()
            .zip(&self.segments)
            .all(|(r, s)| self.text_eq(r, s));
        prefix_matches.then(|| &self.segments[root.segments.len()..])
    }

    /// Check whether this path is `root` itself or lies below it.
    pub fn is_within(&self, root: &Self) -> bool {
        self.segments_below(root).is_some()
    }

    /// Path relative to `root`, using the root's native separator.
    ///
    /// Returns `None` if the path is not inside `root`. The root itself maps
    /// to an empty path.
    pub fn relative_to(&self, root: &Self) -> Option<PathBuf> {
        let below = self.segments_below(root)?;
        let sep = root.separator().to_string();
        Some(PathBuf::from(below.join(&sep)))
    }

    /// Lookup key: `/`-separated, lowercased on case-insensitive roots.
    pub fn key(&self) -> String {
        let anchor = match &self.anchor {
            Anchor::Relative => String::new(),
            Anchor::Root => "/".to_string(),
            Anchor::Drive(d) => format!("{d}/"),
            Anchor::Unc(server, share) => format!("//{server}/{share}/"),
        };
        let key = format!("{anchor}{}", self.segments.join("/"));
        if self.windows {
            key.to_lowercase()
        } else {
            key
        }
    }

    /// Render the path with native separators for its style.
    pub fn to_path_buf(&self) -> PathBuf {
        let sep = self.separator();
        let body = self.segments.join(&sep.to_string());
        let rendered = match &self.anchor {
            Anchor::Relative if body.is_empty() => ".".to_string(),
            Anchor::Relative => body,
            Anchor::Root => format!("{sep}{body}"),
            Anchor::Drive(d) => format!("{d}{sep}{body}"),
            Anchor::Unc(server, share) => format!("{sep}{sep}{server}{sep}{share}{sep}{body}"),
        };
        PathBuf::from(rendered)
    }

    fn join(&self, relative: &Self) -> Self {
        let mut segments = self.segments.clone();
        for segment in &relative.segments {
            segments.push(segment.clone());
        }
        Self {
            anchor: self.anchor.clone(),
            segments,
            windows: self.windows,
        }
    }
}

fn split_anchor(raw: &str, windows: bool) -> (Anchor, &str) {
    if windows {
        if let Some(rest) = raw.strip_prefix(r"\\").or_else(|| raw.strip_prefix("//")) {
            let mut parts = rest.splitn(3, ['/', '\\']);
            let server = parts.next().unwrap_or_default().to_string();
            let share = parts.next().unwrap_or_default().to_string();
            let tail = parts.next().unwrap_or_default();
            return (Anchor::Unc(server, share), tail);
        }
        if has_drive_letter(raw) {
            return (Anchor::Drive(raw[..2].to_string()), &raw[2..]);
        }
        if raw.starts_with(['/', '\\']) {
            return (Anchor::Root, raw);
        }
        return (Anchor::Relative, raw);
    }

    if raw.starts_with('/') {
        (Anchor::Root, raw)
    } else {
        (Anchor::Relative, raw)
    }
}

fn split_segments(raw: &str, windows: bool) -> impl Iterator<Item = &str> {
    raw.split(move |c: char| c == '/' || (windows && c == '\\'))
        .filter(|s| !s.is_empty() && *s != ".")
}

fn has_drive_letter(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Whether `root` looks like a drive-letter or UNC path.
///
/// Such roots live on a case-insensitive filesystem, so within-root checks and
/// overlay keys fold case for them.
pub fn is_case_insensitive_root(root: &Path) -> bool {
    let raw = root.to_string_lossy();
    has_drive_letter(&raw) || raw.starts_with(r"\\")
}

/// Whether the candidate contains a literal `..` segment (either separator).
pub fn has_parent_segment(candidate: &str) -> bool {
    candidate.split(['/', '\\']).any(|segment| segment == "..")
}

/// Resolve `root` to an absolute [`ResolvedPath`].
///
/// A relative POSIX root is anchored at the current working directory.
pub fn resolve_root(root: &Path) -> ResolvedPath {
    let windows = is_case_insensitive_root(root);
    let parsed = ResolvedPath::parse(&root.to_string_lossy(), windows);
    if parsed.is_absolute() {
        return parsed;
    }
    match std::env::current_dir() {
        Ok(cwd) => {
            ResolvedPath::parse(&cwd.to_string_lossy(), is_case_insensitive_root(&cwd)).join(&parsed)
        }
        Err(_) => parsed,
    }
}

/// Lexically resolve `path` against `root` without any safety check.
///
/// Absolute paths are taken as-is; relative ones are joined onto the root.
pub fn resolve(root: &Path, path: &Path) -> ResolvedPath {
    let root = resolve_root(root);
    let candidate = ResolvedPath::parse(&path.to_string_lossy(), root.windows);
    if candidate.is_absolute() {
        candidate
    } else {
        root.join(&candidate)
    }
}

/// Resolve `candidate` against `root`, rejecting anything that escapes it.
///
/// Candidates containing a `..` segment are rejected outright, even when the
/// resolved location would still be inside the root.
pub fn resolve_within_root(root: &Path, candidate: &str) -> Result<ResolvedPath, PathSafetyError> {
    if has_parent_segment(candidate) {
        return Err(PathSafetyError::PathTraversal(candidate.to_string()));
    }

    let resolved_root = resolve_root(root);
    let parsed = ResolvedPath::parse(candidate, resolved_root.windows);
    let resolved = if parsed.is_absolute() {
        parsed
    } else {
        resolved_root.join(&parsed)
    };

    if resolved.is_within(&resolved_root) {
        Ok(resolved)
    } else {
        Err(PathSafetyError::PathTraversal(candidate.to_string()))
    }
}

/// Join a caller-supplied relative path onto the project root safely.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, PathSafetyError> {
    resolve_within_root(root, relative).map(|resolved| resolved.to_path_buf())
}

/// Make `path` relative to `root`, or `None` if it lies outside.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<PathBuf> {
    let root_resolved = resolve_root(root);
    resolve(root, path).relative_to(&root_resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_join() {
        let path = safe_join(Path::new("/work/project"), "src/main.rs").unwrap();
        assert_eq!(path, PathBuf::from("/work/project/src/main.rs"));
    }

    #[test]
    fn test_dot_segments_are_dropped() {
        let path = safe_join(Path::new("/work/project"), "./src/./lib.rs").unwrap();
        assert_eq!(path, PathBuf::from("/work/project/src/lib.rs"));
    }

    #[test]
    fn test_root_itself_is_within() {
        assert_eq!(
            safe_join(Path::new("/work/project"), "").unwrap(),
            PathBuf::from("/work/project")
        );
        assert_eq!(
            safe_join(Path::new("/work/project"), ".").unwrap(),
            PathBuf::from("/work/project")
        );
    }

    #[test]
    fn test_parent_segment_always_rejected() {
        let root = Path::new("/work/project");
        for candidate in [
            "..",
            "../outside.txt",
            "../../etc/passwd",
            "src/../main.rs",
            "src/../../x",
            "a/b/..",
            r"src\..\main.rs",
            r"..\secrets",
        ] {
            assert_eq!(
                resolve_within_root(root, candidate).unwrap_err(),
                PathSafetyError::PathTraversal(candidate.to_string()),
                "{candidate} should be rejected"
            );
        }
    }

    #[test]
    fn test_double_dot_inside_a_name_is_allowed() {
        assert!(safe_join(Path::new("/work/project"), "notes..txt").is_ok());
        assert!(safe_join(Path::new("/work/project"), "..hidden/file").is_ok());
    }

    #[test]
    fn test_absolute_outside_rejected() {
        let root = Path::new("/work/project");
        assert!(resolve_within_root(root, "/etc/passwd").is_err());
        assert!(resolve_within_root(root, "/work/project-other/a").is_err());
    }

    #[test]
    fn test_absolute_inside_accepted() {
        let root = Path::new("/work/project");
        let path = safe_join(root, "/work/project/src/a.rs").unwrap();
        assert_eq!(path, PathBuf::from("/work/project/src/a.rs"));
    }

    #[test]
    fn test_posix_root_is_case_sensitive() {
        let root = Path::new("/work/Project");
        assert!(resolve_within_root(root, "/work/project/a.txt").is_err());
        assert!(!is_case_insensitive_root(root));
    }

    #[test]
    fn test_drive_root_is_case_insensitive() {
        let root = Path::new(r"C:\Users\dev\App");
        assert!(is_case_insensitive_root(root));

        let joined = safe_join(root, "src/index.ts").unwrap();
        assert_eq!(joined, PathBuf::from(r"C:\Users\dev\App\src\index.ts"));

        assert!(resolve_within_root(root, r"c:\users\DEV\app\src\a.ts").is_ok());
        assert!(resolve_within_root(root, r"D:\Users\dev\App\a.ts").is_err());
        assert!(resolve_within_root(root, r"\Windows\system32").is_err());
    }

    #[test]
    fn test_unc_root() {
        let root = Path::new(r"\\fileserver\projects\app");
        assert!(is_case_insensitive_root(root));
        let joined = safe_join(root, "lib/a.ts").unwrap();
        assert_eq!(joined, PathBuf::from(r"\\fileserver\projects\app\lib\a.ts"));
        assert!(resolve_within_root(root, r"\\FILESERVER\Projects\App\x").is_ok());
        assert!(resolve_within_root(root, r"\\other\projects\app\x").is_err());
    }

    #[test]
    fn test_relative_to_root() {
        let root = Path::new("/work/project");
        assert_eq!(
            relative_to_root(root, Path::new("/work/project/src/a.rs")),
            Some(PathBuf::from("src/a.rs"))
        );
        assert_eq!(relative_to_root(root, Path::new("/elsewhere/a.rs")), None);

        let win = Path::new(r"C:\App");
        assert_eq!(
            relative_to_root(win, Path::new("src/a.ts")),
            Some(PathBuf::from(r"src\a.ts"))
        );
    }

    #[test]
    fn test_keys_fold_case_only_on_windows_roots() {
        let posix = resolve(Path::new("/work/project"), Path::new("Src/A.rs"));
        assert_eq!(posix.key(), "/work/project/Src/A.rs");

        let win = resolve(Path::new(r"C:\App"), Path::new(r"Src\A.ts"));
        assert_eq!(win.key(), "c:/app/src/a.ts");
        let same = resolve(Path::new(r"C:\App"), Path::new("src/a.ts"));
        assert_eq!(win.key(), same.key());
    }

    #[test]
    fn test_relative_root_is_anchored_at_cwd() {
        let resolved = resolve_root(Path::new("project"));
        assert!(resolved.is_absolute());
        assert!(resolved.to_path_buf().ends_with("project"));
    }
}
