//! Room validation
//!
//! Turns untyped JSON records into [`Room`]s. Every problem in a record is
//! reported with the path of the offending field, and unknown keys are
//! dropped from the result.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Room;

pub const CLIMATES: &[&str] = &[
    "arid",
    "arid, temperate",
    "cold, damp",
    "cold, dry",
    "",
    "freshwater",
    "glacial",
    "hot, damp",
    "humid",
    "moist",
    "none",
    "saltwater",
    "snowy, arctic",
    "temperate",
];

pub const TERRAINS: &[&str] = &[
    "barren scrub",
    "coniferous",
    "coniferous forest",
    "cultivated",
    "deciduous",
    "deciduous forest",
    "",
    "grassland",
    "hard, flat",
    "hilly",
    "mountainous",
    "muddy wetlands",
    "none",
    "plain dirt",
    "riparian",
    "rough",
    "sandy",
    "subterranean",
    "tropical",
];

/// One rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// `id`, `wayto["2"]`, `title[0]`, ... (empty for the record itself)
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{} at \"{}\"", self.message, self.path)
        }
    }
}

/// A record that is not a valid room
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Validation error: {}", join_issues(.issues))]
pub struct ValidationError {
    /// Room id, when the record has a usable one
    pub id: Option<u64>,
    /// First title line, when present
    pub title: Option<String>,
    pub issues: Vec<FieldIssue>,
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(FieldIssue::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn key_path(parent: &str, key: &str) -> String {
    if is_identifier(key) {
        if parent.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", parent, key)
        }
    } else {
        format!("{}[\"{}\"]", parent, key)
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Accepted shapes of the optional descriptive fields
#[derive(Clone, Copy)]
enum Shape {
    Strings,
    Numbers,
    Flag,
    Text,
    /// `location` may be a flag or a name
    FlagOrText,
    OneOf(&'static [&'static str]),
}

const DESCRIPTIVE_FIELDS: &[(&str, Shape)] = &[
    ("title", Shape::Strings),
    ("description", Shape::Strings),
    ("paths", Shape::Strings),
    ("location", Shape::FlagOrText),
    ("climate", Shape::OneOf(CLIMATES)),
    ("terrain", Shape::OneOf(TERRAINS)),
    ("tags", Shape::Strings),
    ("uid", Shape::Numbers),
    ("image", Shape::Text),
    ("image_coords", Shape::Numbers),
    ("check_location", Shape::Flag),
    ("unique_loot", Shape::Strings),
];

struct Checker {
    issues: Vec<FieldIssue>,
}

impl Checker {
    fn issue(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    fn expected(&mut self, path: &str, expected: &str, value: &Value) {
        self.issue(
            path,
            format!("Expected {}, received {}", expected, type_name(value)),
        );
    }

    fn id(&mut self, value: Option<&Value>) {
        match value {
            None => self.issue("id", "Required"),
            Some(Value::Number(n)) if n.is_u64() => {}
            Some(Value::Number(n)) => self.issue(
                "id",
                format!("Expected a non-negative integer, received {}", n),
            ),
            Some(other) => self.expected("id", "number", other),
        }
    }

    fn wayto(&mut self, value: Option<&Value>) {
        let Some(value) = value else {
            return self.issue("wayto", "Required");
        };
        let Value::Object(entries) = value else {
            return self.expected("wayto", "object", value);
        };
        for (to, instruction) in entries {
            if !instruction.is_string() {
                self.expected(&key_path("wayto", to), "string", instruction);
            }
        }
    }

    fn timeto(&mut self, value: Option<&Value>) {
        let Some(value) = value else {
            return self.issue("timeto", "Required");
        };
        let Value::Object(entries) = value else {
            return self.expected("timeto", "object", value);
        };
        for (to, cost) in entries {
            if !matches!(cost, Value::Number(_) | Value::String(_) | Value::Null) {
                self.expected(&key_path("timeto", to), "number | string | null", cost);
            }
        }
    }

    fn descriptive(&mut self, field: &str, shape: Shape, value: &Value) {
        if value.is_null() {
            return;
        }
        match shape {
            Shape::Strings | Shape::Numbers => {
                let (element, accepts): (&str, fn(&Value) -> bool) = match shape {
                    Shape::Strings => ("string", Value::is_string),
                    _ => ("number", Value::is_number),
                };
                let Value::Array(items) = value else {
                    return self.expected(field, &format!("array of {}s", element), value);
                };
                for (i, item) in items.iter().enumerate() {
                    if !accepts(item) {
                        self.expected(&index_path(field, i), element, item);
                    }
                }
            }
            Shape::Flag if !value.is_boolean() => self.expected(field, "boolean", value),
            Shape::Text if !value.is_string() => self.expected(field, "string", value),
            Shape::FlagOrText if !(value.is_boolean() || value.is_string()) => {
                self.expected(field, "boolean | string", value)
            }
            Shape::OneOf(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => {}
                _ => {
                    let expected = allowed
                        .iter()
                        .map(|a| format!("'{}'", a))
                        .collect::<Vec<_>>()
                        .join(" | ");
                    let received = match value {
                        Value::String(s) => format!("'{}'", s),
                        other => type_name(other).to_string(),
                    };
                    self.issue(
                        field,
                        format!("Invalid enum value. Expected {}, received {}", expected, received),
                    );
                }
            },
            _ => {}
        }
    }
}

/// Validate one untyped record into a canonical room
pub fn validate_room(value: &Value) -> Result<Room, ValidationError> {
    let Value::Object(record) = value else {
        return Err(ValidationError {
            id: None,
            title: None,
            issues: vec![FieldIssue {
                path: String::new(),
                message: format!("Expected object, received {}", type_name(value)),
            }],
        });
    };

    let id = record.get("id").and_then(Value::as_u64);
    let title = record
        .get("title")
        .and_then(|t| t.get(0))
        .and_then(Value::as_str)
        .map(str::to_string);
    let rejected = |issues| ValidationError {
        id,
        title: title.clone(),
        issues,
    };

    let mut checker = Checker { issues: Vec::new() };
    checker.id(record.get("id"));
    checker.wayto(record.get("wayto"));
    checker.timeto(record.get("timeto"));

    let mut canonical = Map::new();
    for key in ["id", "wayto", "timeto"] {
        if let Some(v) = record.get(key) {
            canonical.insert(key.to_string(), v.clone());
        }
    }
    for (field, shape) in DESCRIPTIVE_FIELDS {
        if let Some(v) = record.get(*field) {
            checker.descriptive(field, *shape, v);
            canonical.insert(field.to_string(), v.clone());
        }
    }

    if !checker.issues.is_empty() {
        return Err(rejected(checker.issues));
    }

    serde_json::from_value(Value::Object(canonical)).map_err(|e| {
        rejected(vec![FieldIssue {
            path: String::new(),
            message: e.to_string(),
        }])
    })
}

#[derive(Debug, thiserror::Error)]
pub enum MapdbError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid map database {path}: expected an array of rooms")]
    NotArray { path: PathBuf },
}

/// Outcome of validating a whole map database
#[derive(Debug, Default)]
pub struct ValidatedMapdb {
    pub rooms: Vec<Room>,
    pub errors: Vec<ValidationError>,
}

/// Validate every record of a monolithic map file
///
/// Invalid rooms are collected in `errors` and never abort the file.
pub async fn validate_mapdb(path: &Path) -> Result<ValidatedMapdb, MapdbError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| MapdbError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let value: Value = serde_json::from_str(&content).map_err(|source| MapdbError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Array(records) = value else {
        return Err(MapdbError::NotArray {
            path: path.to_path_buf(),
        });
    };

    let mut result = ValidatedMapdb::default();
    for record in &records {
        match validate_room(record) {
            Ok(room) => result.rooms.push(room),
            Err(e) => {
                tracing::debug!("Rejected room {:?}: {}", e.id, e);
                result.errors.push(e);
            }
        }
    }
    tracing::info!(
        "Validated {} rooms from {} ({} invalid)",
        records.len(),
        path.display(),
        result.errors.len()
    );
    Ok(result)
}

/// A room file that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValidationError {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValidationReport {
    pub valid_files: usize,
    pub errors: Vec<FileValidationError>,
    pub files: Vec<String>,
}

/// Validate individual room files
///
/// Each file is either an envelope (`{checksum, room}`) or a bare room.
pub async fn validate_files(paths: &[PathBuf]) -> FileValidationReport {
    let mut report = FileValidationReport {
        files: paths.iter().map(|p| p.display().to_string()).collect(),
        ..Default::default()
    };

    for path in paths {
        let file = path.display().to_string();
        let failed = |error: String, id, title| FileValidationError {
            file: file.clone(),
            id,
            title,
            error,
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                report.errors.push(failed(e.to_string(), None, None));
                continue;
            }
        };
        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                report.errors.push(failed(e.to_string(), None, None));
                continue;
            }
        };

        let record = match value.get("room") {
            Some(room) if room.is_object() => room,
            _ => &value,
        };
        match validate_room(record) {
            Ok(_) => report.valid_files += 1,
            Err(e) => report.errors.push(failed(e.to_string(), e.id, e.title)),
        }
    }

    report
}
