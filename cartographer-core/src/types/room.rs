//! Room records and their on-disk envelope
//!
//! A [`Room`] is the canonical body of one entry in the map database.
//! A [`RoomRecord`] wraps a room after its embedded scripts were lifted
//! into tree references, together with the checksum used to decide
//! whether the copy in the per-room tree is current.

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::format::ScriptFormatBatch;
use crate::script::{self, AddressMode, ScriptKind, ScriptReference};
use crate::tree::Tree;

/// Travel cost towards a destination room
///
/// A `null` cost is modeled as `None` in [`Room::timeto`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeCost {
    /// Plain numeric cost, kept in its exact JSON representation
    Cost(Number),

    /// Embedded script or a reference to one
    Script(String),
}

impl TimeCost {
    fn to_value(&self) -> Value {
        match self {
            TimeCost::Cost(n) => Value::Number(n.clone()),
            TimeCost::Script(s) => Value::String(s.clone()),
        }
    }
}

/// Canonical room body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: u64,

    /// Destination id -> movement instruction
    pub wayto: BTreeMap<String, String>,

    /// Destination id -> travel cost
    pub timeto: BTreeMap<String, Option<TimeCost>>,

    /// Descriptive fields (title, description, climate, ...) carried through untouched
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Room {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            wayto: BTreeMap::new(),
            timeto: BTreeMap::new(),
            fields: Map::new(),
        }
    }

    /// First title line, if the room has one
    pub fn title(&self) -> Option<&str> {
        self.fields
            .get("title")
            .and_then(|t| t.get(0))
            .and_then(|t| t.as_str())
    }

    /// String values of a navigation field, in key order
    pub fn navigation_strings(&self, kind: ScriptKind) -> Vec<(String, String)> {
        match kind {
            ScriptKind::Wayto => self
                .wayto
                .iter()
                .map(|(to, v)| (to.clone(), v.clone()))
                .collect(),
            ScriptKind::Timeto => self
                .timeto
                .iter()
                .filter_map(|(to, v)| match v {
                    Some(TimeCost::Script(s)) => Some((to.clone(), s.clone())),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Overwrite one navigation entry with a string value
    pub fn set_navigation(&mut self, kind: ScriptKind, to: &str, value: String) {
        match kind {
            ScriptKind::Wayto => {
                self.wayto.insert(to.to_string(), value);
            }
            ScriptKind::Timeto => {
                self.timeto
                    .insert(to.to_string(), Some(TimeCost::Script(value)));
            }
        }
    }

    /// Sorted-key JSON form of the room, independent of input key order
    pub fn canonical_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::from(self.id));
        map.insert(
            "wayto".to_string(),
            Value::Object(
                self.wayto
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert(
            "timeto".to_string(),
            Value::Object(
                self.timeto
                    .iter()
                    .map(|(k, v)| {
                        let value = v.as_ref().map(TimeCost::to_value).unwrap_or(Value::Null);
                        (k.clone(), value)
                    })
                    .collect(),
            ),
        );
        Value::Object(map)
    }

    /// Hex SHA-256 of the canonical serialization
    pub fn checksum(&self) -> String {
        let digest = Sha256::digest(self.canonical_value().to_string().as_bytes());
        format!("{:x}", digest)
    }
}

/// On-disk unit of the per-room tree (`rooms/{id}/room.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub checksum: String,
    pub room: Room,
}

/// Result of comparing a room against the per-room tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskState {
    /// No envelope at the room's path
    Missing,
    /// Envelope differs, is unreadable, or a referenced script file is gone
    Stale,
    /// Envelope and every referenced script file are current
    Ok,
}

/// A room prepared for the per-room tree
#[derive(Debug)]
pub struct RoomRecord {
    room: Room,
    scripts: Vec<ScriptReference>,
    checksum: String,
    state: OnceCell<DiskState>,
}

impl RoomRecord {
    /// Lift embedded scripts into tree references and checksum the result
    pub fn new(mut room: Room) -> Self {
        let scripts = script::extract(&mut room, AddressMode::Tree);
        let checksum = room.checksum();
        Self {
            room,
            scripts,
            checksum,
            state: OnceCell::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.room.id
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn scripts(&self) -> &[ScriptReference] {
        &self.scripts
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Tree reference of the envelope (`/rooms/{id}/room.json`)
    pub fn envelope_ref(&self) -> String {
        Tree::envelope_ref(self.room.id)
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            checksum: self.checksum.clone(),
            room: self.room.clone(),
        }
    }

    /// Pretty-printed envelope JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_envelope())
    }

    /// Compare against the tree, always hitting the filesystem
    pub async fn classify(&self, tree: &Tree) -> DiskState {
        let envelope_ref = self.envelope_ref();
        if !tree.exists(&envelope_ref).await {
            return DiskState::Missing;
        }

        let on_disk = match tree.read_to_string(&envelope_ref).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Unreadable envelope {}: {}", envelope_ref, e);
                return DiskState::Stale;
            }
        };

        let checksum = match serde_json::from_str::<Value>(&on_disk) {
            Ok(value) => value
                .get("checksum")
                .and_then(|c| c.as_str())
                .map(str::to_string),
            Err(e) => {
                tracing::warn!("Malformed envelope {}: {}", envelope_ref, e);
                return DiskState::Stale;
            }
        };

        if checksum.as_deref() != Some(self.checksum.as_str()) {
            return DiskState::Stale;
        }

        for script in &self.scripts {
            if !tree.exists(&script.tree_path()).await {
                tracing::debug!("Room {} is missing {}", self.room.id, script.tree_path());
                return DiskState::Stale;
            }
        }

        DiskState::Ok
    }

    /// Compare against the tree once; later calls return the first answer
    pub async fn disk_state(&self, tree: &Tree) -> DiskState {
        *self.state.get_or_init(|| self.classify(tree)).await
    }

    /// Write the envelope and queue the room's scripts for formatting
    pub async fn write(&self, tree: &Tree, batch: &ScriptFormatBatch) -> io::Result<()> {
        let json = self.to_json()?;
        tree.write(&self.envelope_ref(), &json).await?;
        batch.enqueue_all(self.scripts.iter().cloned());
        Ok(())
    }
}
