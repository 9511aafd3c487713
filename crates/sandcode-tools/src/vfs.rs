//! Virtual file system overlay.
//!
//! Records the writes, deletes and renames made during a conversation on
//! top of the real project directory. Lookups consult, in order: the write
//! overlay, the delete set, an optional injected [`VirtualSource`], and
//! finally the disk.
//!
//! Entries are keyed by the lexically resolved path, so `src/./a.ts` and
//! `/root/src/a.ts` name the same file, and keys fold case when the project
//! root is a drive-letter or UNC path.
//!
//! [`VirtualFileSystem`] reads the disk with `std::fs`,
//! [`AsyncVirtualFileSystem`] with `tokio::fs`. Their behavior is otherwise
//! identical.

use sandcode_util::path::{resolve, resolve_root};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Read-only source consulted before the disk, e.g. generated files that
/// only exist in memory.
pub trait VirtualSource: Send + Sync {
    /// Content for an absolute path, if the source has it.
    fn read(&self, path: &Path) -> Option<String>;
}

/// A file held in the write overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    /// Root-relative path with native separators.
    pub path: PathBuf,
    pub content: String,
}

/// A batch of changes applied as deletes, then renames, then writes.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub deletes: Vec<PathBuf>,
    pub renames: Vec<(PathBuf, PathBuf)>,
    pub writes: Vec<(PathBuf, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.renames.is_empty() && self.writes.is_empty()
    }
}

#[derive(Debug, Default)]
struct Overlay {
    /// key -> (resolved path, content)
    files: HashMap<String, (PathBuf, String)>,
    /// key -> resolved path
    deleted: HashMap<String, PathBuf>,
}

impl Overlay {
    fn write(&mut self, key: String, path: PathBuf, content: String) {
        self.deleted.remove(&key);
        self.files.insert(key, (path, content));
    }

    fn delete(&mut self, key: String, path: PathBuf) {
        let prefix = format!("{key}/");
        self.files
            .retain(|k, _| k != &key && !k.starts_with(&prefix));
        self.deleted.insert(key, path);
    }

    /// Re-key entries under `from/` to `to/` and clear pending deletes at
    /// or under `to`. Returns how many written files moved.
    fn move_children(
        &mut self,
        from_key: &str,
        from_path: &Path,
        to_key: &str,
        to_path: &Path,
    ) -> usize {
        let from_prefix = format!("{from_key}/");
        let to_prefix = format!("{to_key}/");
        let rekey = |key: &str, path: &Path| {
            let suffix = &key[from_prefix.len()..];
            let new_path = path
                .strip_prefix(from_path)
                .map(|rel| to_path.join(rel))
                .unwrap_or_else(|_| to_path.join(suffix));
            (format!("{to_prefix}{suffix}"), new_path)
        };

        self.deleted
            .retain(|k, _| k != to_key && !k.starts_with(&to_prefix));

        let file_keys: Vec<String> = self
            .files
            .keys()
            .filter(|k| k.starts_with(&from_prefix))
            .cloned()
            .collect();
        for key in &file_keys {
            if let Some((path, content)) = self.files.remove(key) {
                let (new_key, new_path) = rekey(key, &path);
                self.files.insert(new_key, (new_path, content));
            }
        }

        let deleted_keys: Vec<String> = self
            .deleted
            .keys()
            .filter(|k| k.starts_with(&from_prefix))
            .cloned()
            .collect();
        for key in deleted_keys {
            if let Some(path) = self.deleted.remove(&key) {
                let (new_key, new_path) = rekey(&key, &path);
                self.deleted.insert(new_key, new_path);
            }
        }

        file_keys.len()
    }

    fn is_deleted(&self, key: &str) -> bool {
        if self.deleted.contains_key(key) {
            return true;
        }
        self.deleted
            .keys()
            .any(|d| key.len() > d.len() && key.starts_with(d.as_str()) && key[d.len()..].starts_with('/'))
    }
}

enum Lookup {
    Found(String),
    Deleted,
    Miss(PathBuf),
}

/// Overlay state shared by both variants.
struct OverlayCore {
    root: PathBuf,
    overlay: RwLock<Overlay>,
    delegate: Option<Arc<dyn VirtualSource>>,
}

impl OverlayCore {
    fn new(root: &Path, delegate: Option<Arc<dyn VirtualSource>>) -> Self {
        Self {
            root: root.to_path_buf(),
            overlay: RwLock::new(Overlay::default()),
            delegate,
        }
    }

    fn resolve(&self, path: &Path) -> (String, PathBuf) {
        let resolved = resolve(&self.root, path);
        (resolved.key(), resolved.to_path_buf())
    }

    /// Everything short of the disk read.
    fn lookup(&self, path: &Path) -> Lookup {
        let (key, resolved) = self.resolve(path);
        {
            let overlay = self.overlay.read().unwrap_or_else(|e| e.into_inner());
            if let Some((_, content)) = overlay.files.get(&key) {
                return Lookup::Found(content.clone());
            }
            if overlay.is_deleted(&key) {
                return Lookup::Deleted;
            }
        }
        if let Some(content) = self.delegate.as_ref().and_then(|d| d.read(&resolved)) {
            return Lookup::Found(content);
        }
        Lookup::Miss(resolved)
    }

    fn write(&self, path: &Path, content: String) {
        let (key, resolved) = self.resolve(path);
        debug!(path = %resolved.display(), bytes = content.len(), "VFS write");
        self.overlay
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .write(key, resolved, content);
    }

    fn delete(&self, path: &Path) {
        let (key, resolved) = self.resolve(path);
        debug!(path = %resolved.display(), "VFS delete");
        self.overlay
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .delete(key, resolved);
    }

    /// Apply a rename under one lock.
    ///
    /// `from` always ends up deleted and any pending delete of `to` is
    /// cleared. Overlay entries under `from/` move under `to/`. `content` is
    /// the file content of `from`, if it had any.
    fn finish_rename(&self, from: &Path, to: &Path, content: Option<String>) {
        let (from_key, from_path) = self.resolve(from);
        let (to_key, to_path) = self.resolve(to);
        debug!(from = %from_path.display(), to = %to_path.display(), "VFS rename");
        let mut overlay = self.overlay.write().unwrap_or_else(|e| e.into_inner());
        let moved = overlay.move_children(&from_key, &from_path, &to_key, &to_path);
        if content.is_none() && moved == 0 {
            warn!(
                from = %from_path.display(),
                to = %to_path.display(),
                "Rename source has no content; marking it deleted only"
            );
        }
        overlay.delete(from_key, from_path);
        if let Some(content) = content {
            overlay.write(to_key, to_path, content);
        }
    }

    fn relative(&self, root: &sandcode_util::path::ResolvedPath, path: &Path) -> PathBuf {
        resolve(&self.root, path)
            .relative_to(root)
            .unwrap_or_else(|| path.to_path_buf())
    }

    fn virtual_files(&self) -> Vec<VirtualFile> {
        let root = resolve_root(&self.root);
        let overlay = self.overlay.read().unwrap_or_else(|e| e.into_inner());
        let mut files: Vec<VirtualFile> = overlay
            .files
            .values()
            .map(|(path, content)| VirtualFile {
                path: self.relative(&root, path),
                content: content.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    fn deleted_files(&self) -> Vec<PathBuf> {
        let root = resolve_root(&self.root);
        let overlay = self.overlay.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<PathBuf> = overlay
            .deleted
            .values()
            .map(|path| self.relative(&root, path))
            .collect();
        paths.sort();
        paths
    }

    fn clear(&self) {
        let mut overlay = self.overlay.write().unwrap_or_else(|e| e.into_inner());
        overlay.files.clear();
        overlay.deleted.clear();
    }
}

/// Overlay backed by blocking disk reads.
pub struct VirtualFileSystem {
    core: OverlayCore,
}

impl VirtualFileSystem {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            core: OverlayCore::new(root.as_ref(), None),
        }
    }

    /// Consult `source` before falling back to the disk.
    pub fn with_source(root: impl AsRef<Path>, source: Arc<dyn VirtualSource>) -> Self {
        Self {
            core: OverlayCore::new(root.as_ref(), Some(source)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.core.root
    }

    pub fn write_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.core.write(path.as_ref(), content.into());
    }

    pub fn delete_file(&self, path: impl AsRef<Path>) {
        self.core.delete(path.as_ref());
    }

    /// Move a file or directory within the overlay. `from` is marked deleted
    /// even when it has no content.
    pub fn rename_file(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
        let (from, to) = (from.as_ref(), to.as_ref());
        let content = self.read_file(from);
        self.core.finish_rename(from, to, content);
    }

    pub fn apply_changes(&self, changes: ChangeSet) {
        for path in changes.deletes {
            self.delete_file(path);
        }
        for (from, to) in changes.renames {
            self.rename_file(from, to);
        }
        for (path, content) in changes.writes {
            self.write_file(path, content);
        }
    }

    pub fn file_exists(&self, path: impl AsRef<Path>) -> bool {
        match self.core.lookup(path.as_ref()) {
            Lookup::Found(_) => true,
            Lookup::Deleted => false,
            Lookup::Miss(resolved) => resolved.exists(),
        }
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.core.lookup(path.as_ref()) {
            Lookup::Found(content) => Some(content),
            Lookup::Deleted => None,
            Lookup::Miss(resolved) => std::fs::read_to_string(resolved).ok(),
        }
    }

    pub fn get_virtual_files(&self) -> Vec<VirtualFile> {
        self.core.virtual_files()
    }

    pub fn get_deleted_files(&self) -> Vec<PathBuf> {
        self.core.deleted_files()
    }

    pub fn clear(&self) {
        self.core.clear();
    }
}

/// Overlay backed by async disk reads.
pub struct AsyncVirtualFileSystem {
    core: OverlayCore,
}

impl AsyncVirtualFileSystem {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            core: OverlayCore::new(root.as_ref(), None),
        }
    }

    /// Consult `source` before falling back to the disk.
    pub fn with_source(root: impl AsRef<Path>, source: Arc<dyn VirtualSource>) -> Self {
        Self {
            core: OverlayCore::new(root.as_ref(), Some(source)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.core.root
    }

    pub async fn write_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.core.write(path.as_ref(), content.into());
    }

    pub async fn delete_file(&self, path: impl AsRef<Path>) {
        self.core.delete(path.as_ref());
    }

    /// Move a file or directory within the overlay. `from` is marked deleted
    /// even when it has no content.
    pub async fn rename_file(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
        let (from, to) = (from.as_ref(), to.as_ref());
        let content = self.read_file(from).await;
        self.core.finish_rename(from, to, content);
    }

    pub async fn apply_changes(&self, changes: ChangeSet) {
        for path in changes.deletes {
            self.delete_file(path).await;
        }
        for (from, to) in changes.renames {
            self.rename_file(from, to).await;
        }
        for (path, content) in changes.writes {
            self.write_file(path, content).await;
        }
    }

    pub async fn file_exists(&self, path: impl AsRef<Path>) -> bool {
        match self.core.lookup(path.as_ref()) {
            Lookup::Found(_) => true,
            Lookup::Deleted => false,
            Lookup::Miss(resolved) => tokio::fs::try_exists(&resolved).await.unwrap_or(false),
        }
    }

    pub async fn read_file(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.core.lookup(path.as_ref()) {
            Lookup::Found(content) => Some(content),
            Lookup::Deleted => None,
            Lookup::Miss(resolved) => tokio::fs::read_to_string(resolved).await.ok(),
        }
    }

    /// Whether the overlay hides this path, without touching the disk.
    pub fn is_deleted(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.core.lookup(path.as_ref()), Lookup::Deleted)
    }

    pub fn get_virtual_files(&self) -> Vec<VirtualFile> {
        self.core.virtual_files()
    }

    pub fn get_deleted_files(&self) -> Vec<PathBuf> {
        self.core.deleted_files()
    }

    pub fn clear(&self) {
        self.core.clear();
    }
}
