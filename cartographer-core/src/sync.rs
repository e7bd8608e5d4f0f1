//! Forward pass: monolithic map -> per-room tree
//!
//! Rooms are classified against the tree one after another. Missing and
//! stale rooms get their envelope rewritten and their scripts queued; the
//! script queue is flushed through the formatter once, after the last room.

use std::path::PathBuf;
use std::sync::Arc;

use crate::format::{FormatProgress, Formatter, ScriptFormatBatch, DEFAULT_BATCH_SIZE};
use crate::tree::{Tree, ENVELOPE_FILE, ROOMS_DIR};
use crate::types::{DiskState, OperationError, Operations, RoomRecord};
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to prepare output tree {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Counters after each room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Progress events emitted during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Room(SyncProgress),
    Format(FormatProgress),
}

/// Drives sync passes against one tree
pub struct SyncEngine {
    tree: Tree,
    formatter: Arc<dyn Formatter>,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(tree: Tree, formatter: Arc<dyn Formatter>) -> Self {
        Self {
            tree,
            formatter,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Bring the tree in line with `rooms`
    ///
    /// `invalid` are rooms rejected upstream; they are reported first in
    /// `errors` and counted as not written. A room whose envelope cannot be
    /// written is reported in `errors` and the pass goes on; only failing to
    /// create the tree root ends it early.
    pub async fn run<F>(
        &self,
        rooms: &[RoomRecord],
        invalid: &[ValidationError],
        mut on_event: F,
    ) -> Result<Operations, SyncError>
    where
        F: FnMut(SyncEvent),
    {
        self.tree.setup().await.map_err(|source| SyncError::Setup {
            path: self.tree.root().to_path_buf(),
            source,
        })?;

        let batch = ScriptFormatBatch::new(self.formatter.clone()).with_batch_size(self.batch_size);
        let mut operations = Operations {
            not_written: invalid.len(),
            errors: invalid
                .iter()
                .map(|e| {
                    let file = match e.id {
                        Some(id) => Tree::relative(&Tree::envelope_ref(id)),
                        None => format!("{}/?/{}", ROOMS_DIR, ENVELOPE_FILE),
                    };
                    OperationError::new(e.to_string(), file)
                })
                .collect(),
            ..Default::default()
        };

        tracing::info!(
            "Syncing {} rooms into {}",
            rooms.len(),
            self.tree.root().display()
        );

        for (index, room) in rooms.iter().enumerate() {
            let state = room.disk_state(&self.tree).await;
            tracing::debug!("Room {} is {:?}", room.id(), state);

            match state {
                DiskState::Ok => operations.skipped += 1,
                DiskState::Missing | DiskState::Stale => match room.write(&self.tree, &batch).await {
                    Ok(()) if state == DiskState::Missing => operations.created += 1,
                    Ok(()) => operations.updated += 1,
                    Err(e) => {
                        tracing::warn!("Failed to write room {}: {}", room.id(), e);
                        operations.errors.push(OperationError::new(
                            format!("Failed to write room: {}", e),
                            Tree::relative(&room.envelope_ref()),
                        ));
                    }
                },
            }

            on_event(SyncEvent::Room(SyncProgress {
                completed: index + 1,
                total: rooms.len(),
                created: operations.created,
                updated: operations.updated,
                skipped: operations.skipped,
                errors: operations.errors.len(),
            }));
        }

        let format_errors = batch
            .flush(&self.tree, |progress| on_event(SyncEvent::Format(progress)))
            .await;
        operations.errors.extend(format_errors);

        tracing::info!(
            "created={} updated={} skipped={} errors={}",
            operations.created,
            operations.updated,
            operations.skipped,
            operations.errors.len()
        );
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatterError, FormatterOutput};
    use crate::types::Room;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::TempDir;

    struct QuietFormatter;

    #[async_trait]
    impl Formatter for QuietFormatter {
        async fn format(&self, _cwd: &Path, _files: &[String]) -> Result<FormatterOutput, FormatterError> {
            Ok(FormatterOutput {
                success: true,
                stdout: String::new(),
            })
        }
    }

    fn records(rooms: Value) -> Vec<RoomRecord> {
        serde_json::from_value::<Vec<Room>>(rooms)
            .unwrap()
            .into_iter()
            .map(RoomRecord::new)
            .collect()
    }

    fn engine(dir: &TempDir) -> SyncEngine {
        SyncEngine::new(Tree::new(dir.path().join("tree")), Arc::new(QuietFormatter))
    }

    #[tokio::test]
    async fn test_sync_writes_envelope_and_script() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir);
        let rooms = records(json!([
            {"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {"2": 0.2}},
        ]));

        let operations = engine.run(&rooms, &[], |_| {}).await.unwrap();
        assert_eq!(operations.created, 1);
        assert!(operations.errors.is_empty());

        let envelope: Value = serde_json::from_str(
            &engine.tree().read_to_string("/rooms/1/room.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(envelope["room"]["wayto"]["2"], "/rooms/1/wayto/stringproc-2.rb");
        assert_eq!(envelope["checksum"], rooms[0].checksum());
        assert_eq!(
            engine
                .tree()
                .read_to_string("/rooms/1/wayto/stringproc-2.rb")
                .await
                .unwrap(),
            "puts 'hi'"
        );
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir);
        let source = json!([
            {"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {"2": 0.2}},
            {"id": 2, "wayto": {"1": "south"}, "timeto": {"1": 0.2}},
            {"id": 3, "wayto": {}, "timeto": {}},
        ]);

        let first = engine.run(&records(source.clone()), &[], |_| {}).await.unwrap();
        assert_eq!(first.created, 3);

        let second = engine.run(&records(source), &[], |_| {}).await.unwrap();
        assert_eq!(
            second,
            Operations {
                skipped: 3,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_changed_and_damaged_rooms_are_updated() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir);
        engine
            .run(
                &records(json!([
                    {"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {}},
                    {"id": 2, "wayto": {"1": "south"}, "timeto": {}},
                ])),
                &[],
                |_| {},
            )
            .await
            .unwrap();

        tokio::fs::remove_file(engine.tree().route("/rooms/1/wayto/stringproc-2.rb"))
            .await
            .unwrap();

        let mut events = Vec::new();
        let operations = engine
            .run(
                &records(json!([
                    {"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {}},
                    {"id": 2, "wayto": {"1": "go south"}, "timeto": {}},
                    {"id": 4, "wayto": {}, "timeto": {}},
                ])),
                &[],
                |event| events.push(event),
            )
            .await
            .unwrap();

        assert_eq!((operations.created, operations.updated, operations.skipped), (1, 2, 0));
        assert!(engine.tree().exists("/rooms/1/wayto/stringproc-2.rb").await);

        let room_events: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Room(p) => Some(p.completed),
                _ => None,
            })
            .collect();
        assert_eq!(room_events, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_validation_errors_are_reported_first() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir);
        let invalid = crate::validation::validate_room(&json!({"id": 12, "wayto": {}, "timeto": [], "title": ["[Broken]"]}))
            .unwrap_err();

        let operations = engine
            .run(&records(json!([{"id": 1, "wayto": {}, "timeto": {}}])), &[invalid], |_| {})
            .await
            .unwrap();

        assert_eq!(operations.created, 1);
        assert_eq!(operations.not_written, 1);
        assert_eq!(operations.errors.len(), 1);
        assert_eq!(operations.errors[0].file, "rooms/12/room.json");
        assert!(!engine.tree().exists("/rooms/12/room.json").await);
    }

    #[tokio::test]
    async fn test_unwritable_room_does_not_stop_the_pass() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir);
        engine.tree().setup().await.unwrap();
        std::fs::create_dir_all(engine.tree().route("/rooms")).unwrap();
        // a plain file where room 2's directory should be
        std::fs::write(engine.tree().route("/rooms/2"), "").unwrap();

        let operations = engine
            .run(
                &records(json!([
                    {"id": 1, "wayto": {"2": ";e puts 'hi'"}, "timeto": {}},
                    {"id": 2, "wayto": {}, "timeto": {}},
                    {"id": 3, "wayto": {}, "timeto": {}},
                ])),
                &[],
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!((operations.created, operations.updated, operations.skipped), (2, 0, 0));
        assert_eq!(operations.errors.len(), 1);
        assert_eq!(operations.errors[0].file, "rooms/2/room.json");
        assert!(engine.tree().exists("/rooms/3/room.json").await);
        assert_eq!(
            engine
                .tree()
                .read_to_string("/rooms/1/wayto/stringproc-2.rb")
                .await
                .unwrap(),
            "puts 'hi'"
        );
    }

    #[tokio::test]
    async fn test_invalid_room_without_id_is_not_filed_under_room_zero() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir);
        let invalid = crate::validation::validate_room(&json!({"id": "abc", "wayto": {}, "timeto": {}}))
            .unwrap_err();

        let operations = engine.run(&[], &[invalid], |_| {}).await.unwrap();
        assert_eq!(operations.not_written, 1);
        assert_eq!(operations.errors[0].file, "rooms/?/room.json");
    }
}
