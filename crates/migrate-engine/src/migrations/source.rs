//! Migration Source - Filesystem access behind a minimal interface
//!
//! The engine never touches `std::fs` directly; it goes through
//! [`MigrationSource`] so that tests can substitute [`MemorySource`].

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// An entry of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Minimal directory-read (and scaffold-write) interface
pub trait MigrationSource: Send + Sync {
    /// List the direct children of `dir`; `NotFound` if `dir` is not a directory
    fn list_entries(&self, dir: &Path) -> io::Result<Vec<SourceEntry>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn is_file(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl MigrationSource for FsSource {
    fn list_entries(&self, dir: &Path) -> io::Result<Vec<SourceEntry>> {
        let metadata = fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let is_dir = entry.file_type()?.is_dir();
            entries.push(SourceEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        Ok(entries)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }
}

#[derive(Debug, Default)]
struct MemoryTree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, String>,
}

impl MemoryTree {
    fn add_dir(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

/// An in-memory file tree
#[derive(Debug, Default)]
pub struct MemorySource {
    tree: RwLock<MemoryTree>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating its parent directories
    pub fn with_file(self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.insert_file(path, contents);
        self
    }

    /// Add an empty directory
    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.tree.write().add_dir(path.as_ref());
        self
    }

    pub fn insert_file(&self, path: impl AsRef<Path>, contents: impl Into<String>) {
        let path = path.as_ref();
        let mut tree = self.tree.write();
        if let Some(parent) = path.parent() {
            tree.add_dir(parent);
        }
        tree.files.insert(path.to_path_buf(), contents.into());
    }

    /// Remove a directory and everything below it
    pub fn remove_dir_all(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree.write();
        tree.dirs.retain(|dir| !dir.starts_with(path));
        tree.files.retain(|file, _| !file.starts_with(path));
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.tree.write().files.remove(path.as_ref());
    }
}

impl MigrationSource for MemorySource {
    fn list_entries(&self, dir: &Path) -> io::Result<Vec<SourceEntry>> {
        let tree = self.tree.read();
        if !tree.dirs.contains(dir) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut entries: Vec<SourceEntry> = tree
            .dirs
            .iter()
            .filter(|path| is_child_of(path, dir))
            .map(|path| SourceEntry {
                name: file_name(path),
                is_dir: true,
            })
            .collect();
        entries.extend(
            tree.files
                .keys()
                .filter(|path| is_child_of(path, dir))
                .map(|path| SourceEntry {
                    name: file_name(path),
                    is_dir: false,
                }),
        );
        Ok(entries)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.tree.read().files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )
        })
    }

    fn is_file(&self, path: &Path) -> bool {
        self.tree.read().files.contains_key(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.tree.write().add_dir(path);
        Ok(())
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut tree = self.tree.write();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !tree.dirs.contains(parent) => {
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", parent.display()),
                ))
            }
            _ => {
                tree.files.insert(path.to_path_buf(), contents.to_string());
                Ok(())
            }
        }
    }
}

fn is_child_of(path: &Path, dir: &Path) -> bool {
    path.parent() == Some(dir)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
