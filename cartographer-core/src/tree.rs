//! Per-room tree layout
//!
//! References inside the tree are written with forward slashes and a
//! leading `/` (e.g. `/rooms/1/room.json`) regardless of platform; they are
//! resolved against the tree root here.

use std::io;
use std::path::{Component, Path, PathBuf};

/// File name of every room envelope
pub const ENVELOPE_FILE: &str = "room.json";

/// Directory holding one sub-directory per room
pub const ROOMS_DIR: &str = "rooms";

/// Root of a per-room tree
#[derive(Debug, Clone)]
pub struct Tree {
    root: PathBuf,
}

impl Tree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reference of the envelope for room `id`
    pub fn envelope_ref(id: u64) -> String {
        format!("/{}/{}/{}", ROOMS_DIR, id, ENVELOPE_FILE)
    }

    /// Reference relative to the root (`rooms/1/room.json`)
    pub fn relative(reference: &str) -> String {
        normalize_path(reference).trim_start_matches('/').to_string()
    }

    /// Absolute location of a reference
    ///
    /// `..` segments are dropped so a reference can never leave the root.
    pub fn route(&self, reference: &str) -> PathBuf {
        let relative = Self::relative(reference);
        let mut path = self.root.clone();
        for component in Path::new(&relative).components() {
            if let Component::Normal(segment) = component {
                path.push(segment);
            }
        }
        path
    }

    /// Create the root directory
    pub async fn setup(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    pub async fn exists(&self, reference: &str) -> bool {
        tokio::fs::try_exists(self.route(reference))
            .await
            .unwrap_or(false)
    }

    pub async fn read_to_string(&self, reference: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.route(reference)).await
    }

    /// Write a file, creating parent directories as needed
    pub async fn write(&self, reference: &str, contents: &str) -> io::Result<()> {
        let path = self.route(reference);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await
    }
}

/// Normalize path separators to forward slashes
#[inline]
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Display form of a filesystem path with forward slashes
#[inline]
pub fn path_to_string(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}
