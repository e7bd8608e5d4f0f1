//! Inverse pass: per-room tree -> monolithic map
//!
//! The standard build concatenates the room bodies stored in the tree. The
//! bundle build additionally resolves every script reference into a
//! `Cartographer.evaluate_script` marker and writes the script bodies next
//! to the map, producing a self-contained distributable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;

use crate::script::{self, FallbackSource, ScriptReference};
use crate::tree::{path_to_string, Tree, ENVELOPE_FILE};
use crate::types::{BuildResults, Envelope, OperationError, Room};

/// Map file inside a bundle directory
pub const BUNDLE_MAPDB_FILE: &str = "mapdb.json";

/// Script directory inside a bundle directory
pub const BUNDLE_SCRIPT_DIR: &str = "stringprocs";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize map: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Bundle build settings
#[derive(Debug, Default)]
pub struct BundleOptions {
    /// Monolithic map used to recover scripts missing from the tree
    pub fallback: Option<FallbackSource>,

    /// Reject rooms whose scripts cannot be found anywhere
    /// (default: only when a fallback is configured)
    pub strict: Option<bool>,
}

impl BundleOptions {
    pub fn is_strict(&self) -> bool {
        self.strict.unwrap_or(self.fallback.is_some())
    }
}

/// Progress through the discovered envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProgress {
    pub current: usize,
    pub total: usize,
}

/// Rebuilds monolithic maps from a per-room tree
pub struct TreeBuilder {
    tree: Tree,
}

impl TreeBuilder {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            tree: Tree::new(input),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Every envelope under the input root, in name order
    pub async fn discover(&self) -> Result<Vec<PathBuf>, BuildError> {
        let root = self.tree.root().to_path_buf();
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match read_sorted(&dir).await {
                Ok(entries) => entries,
                Err(source) if dir == root => return Err(BuildError::Scan { path: dir, source }),
                Err(e) => {
                    tracing::warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            let mut subdirs = Vec::new();
            for (path, is_dir) in entries.drain(..) {
                if is_dir {
                    subdirs.push(path);
                } else if path.file_name().is_some_and(|name| name == ENVELOPE_FILE) {
                    found.push(path);
                }
            }
            // popped from the back, so push in reverse to visit in name order
            pending.extend(subdirs.into_iter().rev());
        }

        tracing::debug!("Found {} envelopes under {}", found.len(), root.display());
        Ok(found)
    }

    /// Write the room bodies of the tree to `output_file` as one JSON array
    pub async fn build_standard<F>(
        &self,
        output_file: &Path,
        mut on_progress: F,
    ) -> Result<BuildResults, BuildError>
    where
        F: FnMut(BuildProgress),
    {
        let envelopes = self.discover().await?;
        let total = envelopes.len();
        let mut errors = Vec::new();
        let mut rooms = BTreeMap::new();

        for (i, path) in envelopes.iter().enumerate() {
            match read_envelope(path).await {
                Ok(envelope) => {
                    rooms.insert(envelope.room.id, envelope.room);
                }
                Err(err) => errors.push(OperationError::new(err, path_to_string(path))),
            }
            on_progress(BuildProgress {
                current: i + 1,
                total,
            });
        }

        let rooms: Vec<Room> = rooms.into_values().collect();
        if let Some(parent) = output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir(parent).await?;
        }
        write_file(output_file, serde_json::to_string_pretty(&rooms)?).await?;

        tracing::info!("Built {} rooms into {}", rooms.len(), output_file.display());
        Ok(BuildResults {
            rooms_processed: rooms.len(),
            errors,
        })
    }

    /// Write a self-contained bundle to `output_dir`
    ///
    /// Produces `mapdb.json` with bundle markers and one file per script in
    /// `stringprocs/{wayto,timeto}/`. A room whose scripts cannot be resolved
    /// is left out and reported.
    pub async fn build_bundle<F>(
        &self,
        output_dir: &Path,
        options: &BundleOptions,
        mut on_progress: F,
    ) -> Result<BuildResults, BuildError>
    where
        F: FnMut(BuildProgress),
    {
        let envelopes = self.discover().await?;
        let total = envelopes.len();
        let strict = options.is_strict();
        let mut errors = Vec::new();
        let mut rooms = BTreeMap::new();
        let mut scripts: BTreeMap<u64, Vec<ScriptReference>> = BTreeMap::new();

        for (i, path) in envelopes.iter().enumerate() {
            let file = path_to_string(path);
            match read_envelope(path).await {
                Ok(envelope) => {
                    let mut room = envelope.room;
                    match script::resolve_for_bundle(&mut room, &self.tree, options.fallback.as_ref(), strict)
                        .await
                    {
                        Ok(resolved) => {
                            scripts.insert(room.id, resolved);
                            rooms.insert(room.id, room);
                        }
                        Err(e) => errors.push(OperationError::new(
                            format!("Failed to process room file: {}", e),
                            file,
                        )),
                    }
                }
                Err(err) => errors.push(OperationError::new(err, file)),
            }
            on_progress(BuildProgress {
                current: i + 1,
                total,
            });
        }

        let script_dir = output_dir.join(BUNDLE_SCRIPT_DIR);
        create_dir(output_dir).await?;
        for kind in script::ScriptKind::ALL {
            create_dir(&script_dir.join(kind.as_str())).await?;
        }

        let rooms: Vec<Room> = rooms.into_values().collect();
        write_file(
            &output_dir.join(BUNDLE_MAPDB_FILE),
            serde_json::to_string_pretty(&rooms)?,
        )
        .await?;

        let writes = scripts.values().flatten().map(|script| {
            let path = script_dir.join(script.bundle_path());
            async move {
                tokio::fs::write(&path, &script.code)
                    .await
                    .map_err(|e| OperationError::new(e.to_string(), path_to_string(&path)))
            }
        });
        errors.extend(join_all(writes).await.into_iter().filter_map(Result::err));

        tracing::info!(
            "Bundled {} rooms and {} scripts into {}",
            rooms.len(),
            scripts.values().map(Vec::len).sum::<usize>(),
            output_dir.display()
        );
        Ok(BuildResults {
            rooms_processed: rooms.len(),
            errors,
        })
    }
}

/// Directory entries sorted by name, with a directory flag
async fn read_sorted(dir: &Path) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((entry.path(), is_dir));
    }
    entries.sort();
    Ok(entries)
}

async fn read_envelope(path: &Path) -> Result<Envelope, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to process room file: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to process room file: {}", e))
}

async fn create_dir(path: &Path) -> Result<(), BuildError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| BuildError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_file(path: &Path, contents: String) -> Result<(), BuildError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| BuildError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Formatter, FormatterError, FormatterOutput};
    use crate::sync::SyncEngine;
    use crate::types::RoomRecord;
    use crate::validation::validate_mapdb;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct QuietFormatter;

    #[async_trait]
    impl Formatter for QuietFormatter {
        async fn format(&self, _cwd: &Path, _files: &[String]) -> Result<FormatterOutput, FormatterError> {
            Ok(FormatterOutput::default())
        }
    }

    async fn sync_into(root: &Path, rooms: Value) {
        let records: Vec<RoomRecord> = serde_json::from_value::<Vec<Room>>(rooms)
            .unwrap()
            .into_iter()
            .map(RoomRecord::new)
            .collect();
        let engine = SyncEngine::new(Tree::new(root), Arc::new(QuietFormatter));
        let operations = engine.run(&records, &[], |_| {}).await.unwrap();
        assert!(operations.errors.is_empty());
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_discover_sorted() {
        let temp_dir = TempDir::new().unwrap();
        sync_into(
            temp_dir.path(),
            json!([
                {"id": 20, "wayto": {}, "timeto": {}},
                {"id": 3, "wayto": {"4": ";e fput 'go gate'"}, "timeto": {}},
                {"id": 100, "wayto": {}, "timeto": {}},
            ]),
        )
        .await;
        std::fs::write(temp_dir.path().join("rooms").join("notes.json"), "{}").unwrap();

        let found = TreeBuilder::new(temp_dir.path()).discover().await.unwrap();
        let relative: Vec<String> = found
            .iter()
            .map(|p| path_to_string(p.strip_prefix(temp_dir.path()).unwrap()))
            .collect();
        assert_eq!(
            relative,
            vec!["rooms/100/room.json", "rooms/20/room.json", "rooms/3/room.json"]
        );

        let missing = TreeBuilder::new(temp_dir.path().join("absent"));
        assert!(matches!(missing.discover().await, Err(BuildError::Scan { .. })));
    }

    #[tokio::test]
    async fn test_standard_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let tree_root = temp_dir.path().join("tree");
        let source = json!([
            {"id": 2, "title": ["[Gate]"], "wayto": {"1": "south"}, "timeto": {"1": 0.2}},
            {"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {"2": 0.2, "3": null}},
        ]);
        sync_into(&tree_root, source).await;
        std::fs::write(tree_root.join("rooms").join("2").join("room.json"), "{ broken").unwrap();

        let output = temp_dir.path().join("out").join("map.json");
        let mut seen = Vec::new();
        let results = TreeBuilder::new(&tree_root)
            .build_standard(&output, |p| seen.push(p.current))
            .await
            .unwrap();
        assert_eq!(results.rooms_processed, 1);
        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].file.ends_with("rooms/2/room.json"));
        assert_eq!(seen, vec![1, 2]);

        let built = read_json(&output);
        assert_eq!(built[0]["id"], 1);
        assert_eq!(built[0]["wayto"]["2"], "/rooms/1/wayto/stringproc-2.rb");
        assert!(built[0]["timeto"]["3"].is_null());

        let validated = validate_mapdb(&output).await.unwrap();
        let records: Vec<RoomRecord> = validated.rooms.into_iter().map(RoomRecord::new).collect();
        let engine = SyncEngine::new(Tree::new(&tree_root), Arc::new(QuietFormatter));
        let operations = engine.run(&records, &[], |_| {}).await.unwrap();
        assert_eq!((operations.created, operations.updated, operations.skipped), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_bundle_build() {
        let temp_dir = TempDir::new().unwrap();
        let tree_root = temp_dir.path().join("tree");
        sync_into(
            &tree_root,
            json!([{"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {"2": 0.2}}]),
        )
        .await;

        let output = temp_dir.path().join("bundle");
        let results = TreeBuilder::new(&tree_root)
            .build_bundle(&output, &BundleOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(results.rooms_processed, 1);
        assert!(results.errors.is_empty());

        let mapdb = read_json(&output.join(BUNDLE_MAPDB_FILE));
        assert_eq!(
            mapdb[0]["wayto"]["2"],
            ";e Cartographer.evaluate_script('wayto/room-1-to-2.rb')"
        );
        assert_eq!(
            std::fs::read_to_string(output.join("stringprocs/wayto/room-1-to-2.rb")).unwrap(),
            "puts 'hi'"
        );
        assert!(output.join("stringprocs/timeto").is_dir());
    }

    #[tokio::test]
    async fn test_bundle_recovers_from_source() {
        let temp_dir = TempDir::new().unwrap();
        let tree_root = temp_dir.path().join("tree");
        let source = json!([{
            "id": 382,
            "wayto": {"30708": ";e table = \"Healer\"; fput \"go table\""},
            "timeto": {"19236": ";e Map[7].timeto['30714'].call;"},
        }]);
        sync_into(&tree_root, source.clone()).await;
        std::fs::remove_file(tree_root.join("rooms/382/wayto/stringproc-30708.rb")).unwrap();

        let source_path = temp_dir.path().join("source.json");
        std::fs::write(&source_path, source.to_string()).unwrap();

        let output = temp_dir.path().join("bundle");
        let options = BundleOptions {
            fallback: Some(FallbackSource::new(&source_path)),
            strict: None,
        };
        let results = TreeBuilder::new(&tree_root)
            .build_bundle(&output, &options, |_| {})
            .await
            .unwrap();
        assert!(results.errors.is_empty());
        assert_eq!(
            std::fs::read_to_string(output.join("stringprocs/wayto/room-382-to-30708.rb")).unwrap(),
            "table = \"Healer\"; fput \"go table\""
        );
        assert_eq!(
            std::fs::read_to_string(output.join("stringprocs/timeto/room-382-to-19236.rb")).unwrap(),
            "Map[7].timeto['30714'].call;"
        );
    }

    #[tokio::test]
    async fn test_bundle_recovery_failure_excludes_room() {
        let temp_dir = TempDir::new().unwrap();
        let tree_root = temp_dir.path().join("tree");
        sync_into(
            &tree_root,
            json!([{"id": 382, "wayto": {"30708": ";e fput 'go table'"}, "timeto": {}}]),
        )
        .await;
        std::fs::remove_file(tree_root.join("rooms/382/wayto/stringproc-30708.rb")).unwrap();

        // the source no longer has the script either
        let source_path = temp_dir.path().join("source.json");
        std::fs::write(
            &source_path,
            json!([{"id": 382, "wayto": {"30708": "go table"}, "timeto": {}}]).to_string(),
        )
        .unwrap();

        let options = BundleOptions {
            fallback: Some(FallbackSource::new(&source_path)),
            strict: None,
        };
        let results = TreeBuilder::new(&tree_root)
            .build_bundle(&temp_dir.path().join("bundle"), &options, |_| {})
            .await
            .unwrap();
        assert_eq!(results.rooms_processed, 0);
        assert_eq!(results.errors.len(), 1);
        assert!(results.errors[0].file.contains("rooms/382/room.json"));
    }

    #[tokio::test]
    async fn test_bundle_without_source_keeps_reference() {
        let temp_dir = TempDir::new().unwrap();
        let tree_root = temp_dir.path().join("tree");
        sync_into(
            &tree_root,
            json!([{"id": 5, "wayto": {"6": ";e fput 'climb'"}, "timeto": {}}]),
        )
        .await;
        std::fs::remove_file(tree_root.join("rooms/5/wayto/stringproc-6.rb")).unwrap();

        let output = temp_dir.path().join("bundle");
        let results = TreeBuilder::new(&tree_root)
            .build_bundle(&output, &BundleOptions::default(), |_| {})
            .await
            .unwrap();
        assert_eq!(results.rooms_processed, 1);
        assert!(results.errors.is_empty());
        assert_eq!(
            read_json(&output.join(BUNDLE_MAPDB_FILE))[0]["wayto"]["6"],
            "/rooms/5/wayto/stringproc-6.rb"
        );
    }
}
