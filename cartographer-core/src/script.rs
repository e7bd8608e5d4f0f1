//! Embedded navigation scripts
//!
//! `wayto` and `timeto` values starting with `;e` carry Ruby code that the
//! game client evaluates. Those bodies are lifted out of the room into their
//! own files so room diffs stay readable and the code can be linted.
//!
//! Every script occurrence has two addresses, both derived only from
//! `(kind, from, to)`:
//! - a tree path, `/rooms/{from}/{kind}/stringproc-{to}.rb`, used inside the
//!   per-room tree
//! - a bundle path, `{kind}/room-{from}-to-{to}.rb`, used by distributable
//!   bundles and referenced through `Cartographer.evaluate_script`

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::types::Room;
use crate::tree::Tree;

/// Prefix marking a value as embedded code
pub const SENTINEL: &str = ";e";

/// Prefix of every tree-path reference
pub const TREE_PREFIX: &str = "/rooms/";

/// Extension of extracted script files
pub const SCRIPT_EXTENSION: &str = ".rb";

/// Navigation field a script lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Wayto,
    Timeto,
}

impl ScriptKind {
    /// Processing order: `wayto` first
    pub const ALL: [ScriptKind; 2] = [ScriptKind::Wayto, ScriptKind::Timeto];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Wayto => "wayto",
            ScriptKind::Timeto => "timeto",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which address an extracted field is rewritten to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// `/rooms/{from}/{kind}/stringproc-{to}.rb`
    Tree,
    /// `;e Cartographer.evaluate_script('{kind}/room-{from}-to-{to}.rb')`
    Bundle,
}

/// Value is embedded code (`;e ...`)
pub fn is_embedded_code(value: &str) -> bool {
    value.starts_with(SENTINEL)
}

/// Value points at an already extracted script inside the tree
pub fn is_tree_reference(value: &str) -> bool {
    value.starts_with(TREE_PREFIX) && value.ends_with(SCRIPT_EXTENSION)
}

/// One embedded script occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReference {
    pub kind: ScriptKind,
    pub from: u64,
    pub to: String,
    /// Ruby body, sentinel and surrounding whitespace removed
    pub code: String,
}

impl ScriptReference {
    pub fn new(kind: ScriptKind, from: u64, to: impl Into<String>, code: &str) -> Self {
        Self {
            kind,
            from,
            to: to.into(),
            code: code.trim().to_string(),
        }
    }

    /// Build from a raw `;e ...` value, `None` if it is not embedded code
    pub fn from_embedded(kind: ScriptKind, from: u64, to: &str, source: &str) -> Option<Self> {
        source
            .strip_prefix(SENTINEL)
            .map(|code| Self::new(kind, from, to, code))
    }

    pub fn tree_path(&self) -> String {
        format!(
            "{}{}/{}/stringproc-{}{}",
            TREE_PREFIX, self.from, self.kind, self.to, SCRIPT_EXTENSION
        )
    }

    pub fn bundle_path(&self) -> String {
        format!(
            "{}/room-{}-to-{}{}",
            self.kind, self.from, self.to, SCRIPT_EXTENSION
        )
    }

    pub fn bundle_marker(&self) -> String {
        format!(
            "{} Cartographer.evaluate_script('{}')",
            SENTINEL,
            self.bundle_path()
        )
    }

    /// Value a navigation field holds once this script is extracted
    pub fn address(&self, mode: AddressMode) -> String {
        match mode {
            AddressMode::Tree => self.tree_path(),
            AddressMode::Bundle => self.bundle_marker(),
        }
    }
}

/// Lift every embedded script out of the room, rewriting fields in place
pub fn extract(room: &mut Room, mode: AddressMode) -> Vec<ScriptReference> {
    let mut scripts = Vec::new();
    for kind in ScriptKind::ALL {
        for (to, value) in room.navigation_strings(kind) {
            if let Some(script) = ScriptReference::from_embedded(kind, room.id, &to, &value) {
                room.set_navigation(kind, &to, script.address(mode));
                scripts.push(script);
            }
        }
    }
    scripts
}

/// Failure to produce a bundle for one room
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Missing script file {path} and could not recover it from the source map ({reason})")]
    MissingScript { path: String, reason: String },

    #[error("Failed to read script file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Rewrite a room for a distributable bundle
///
/// Embedded code and tree-path references both become bundle markers. A
/// tree-path reference whose file is gone is recovered from `fallback`; when
/// that fails too the field is left as it was, unless `strict` is set, in
/// which case the room is rejected with [`ScriptError::MissingScript`].
pub async fn resolve_for_bundle(
    room: &mut Room,
    tree: &Tree,
    fallback: Option<&FallbackSource>,
    strict: bool,
) -> Result<Vec<ScriptReference>, ScriptError> {
    let mut scripts = Vec::new();

    for kind in ScriptKind::ALL {
        for (to, value) in room.navigation_strings(kind) {
            if let Some(script) = ScriptReference::from_embedded(kind, room.id, &to, &value) {
                room.set_navigation(kind, &to, script.bundle_marker());
                scripts.push(script);
                continue;
            }

            if !is_tree_reference(&value) {
                continue;
            }

            let script = match tree.read_to_string(&value).await {
                Ok(code) => ScriptReference::new(kind, room.id, to.as_str(), &code),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let reason = match fallback {
                        Some(source) => match source.recover(kind, room.id, &to).await {
                            Recovery::Found(script) => {
                                tracing::info!("Recovered {} from {}", value, source.path().display());
                                room.set_navigation(kind, &to, script.bundle_marker());
                                scripts.push(script);
                                continue;
                            }
                            Recovery::NotFound => {
                                format!("no script for {} {} in room {}", kind, to, room.id)
                            }
                            Recovery::MalformedSource(reason) => reason,
                        },
                        None => "no source map configured".to_string(),
                    };

                    if strict {
                        return Err(ScriptError::MissingScript {
                            path: value.clone(),
                            reason,
                        });
                    }
                    tracing::warn!("Leaving {} unresolved: {}", value, reason);
                    continue;
                }
                Err(source) => {
                    return Err(ScriptError::Io {
                        path: value.clone(),
                        source,
                    })
                }
            };

            room.set_navigation(kind, &to, script.bundle_marker());
            scripts.push(script);
        }
    }

    Ok(scripts)
}

/// Outcome of looking a script up in the monolithic source map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Found(ScriptReference),
    /// Room or key missing, or the value is no longer embedded code
    NotFound,
    /// Source map absent or unparsable
    MalformedSource(String),
}

/// Monolithic map used to recover scripts missing from the tree
///
/// The file is read and indexed on first use.
#[derive(Debug)]
pub struct FallbackSource {
    path: PathBuf,
    index: OnceCell<Result<HashMap<u64, Value>, String>>,
}

impl FallbackSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<u64, Value>, String> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| format!("cannot read {}: {}", self.path.display(), e))?;
        let rooms: Vec<Value> = serde_json::from_str(&content)
            .map_err(|e| format!("cannot parse {}: {}", self.path.display(), e))?;

        let mut index = HashMap::with_capacity(rooms.len());
        for room in rooms {
            let id = match room.get("id") {
                Some(Value::Number(n)) => n.as_u64(),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            };
            if let Some(id) = id {
                index.insert(id, room);
            }
        }
        tracing::debug!("Indexed {} rooms from {}", index.len(), self.path.display());
        Ok(index)
    }

    /// Rebuild a script from the current raw value at `room[kind][to]`
    pub async fn recover(&self, kind: ScriptKind, from: u64, to: &str) -> Recovery {
        let index = match self.index.get_or_init(|| self.load()).await {
            Ok(index) => index,
            Err(reason) => return Recovery::MalformedSource(reason.clone()),
        };

        let raw = index
            .get(&from)
            .and_then(|room| room.get(kind.as_str()))
            .and_then(|field| field.get(to))
            .and_then(|value| value.as_str());

        match raw.and_then(|source| ScriptReference::from_embedded(kind, from, to, source)) {
            Some(script) => Recovery::Found(script),
            None => Recovery::NotFound,
        }
    }
}
