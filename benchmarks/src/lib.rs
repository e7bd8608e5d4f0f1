//! Fixtures shared by the Cartographer benchmarks

use std::path::Path;

use async_trait::async_trait;
use cartographer_core::{Formatter, FormatterError, FormatterOutput, Room};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

const CLIMATES: &[&str] = &["temperate", "arid", "humid", "snowy, arctic"];
const EXITS: &[&str] = &["north", "south", "east", "west", "up", "down", "go door", "climb ladder"];

/// A deterministic map of `count` rooms
///
/// Roughly one exit in `script_ratio` carries an embedded script.
pub fn generate_map(count: usize, script_ratio: u32) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(0x6d61_7064_62);
    (0..count as u64)
        .map(|id| {
            let mut wayto = serde_json::Map::new();
            let mut timeto = serde_json::Map::new();
            for _ in 0..rng.gen_range(1..6) {
                let to = rng.gen_range(0..count as u64).to_string();
                let instruction = if rng.gen_ratio(1, script_ratio) {
                    format!(";e fput '{}'; waitrt?", EXITS[rng.gen_range(0..EXITS.len())])
                } else {
                    EXITS[rng.gen_range(0..EXITS.len())].to_string()
                };
                wayto.insert(to.clone(), Value::String(instruction));
                timeto.insert(to, json!(rng.gen_range(1..40) as f64 / 10.0));
            }
            json!({
                "id": id,
                "title": [format!("[Room {}]", id)],
                "description": ["A generated room used for benchmarking."],
                "paths": ["Obvious exits: none"],
                "climate": CLIMATES[rng.gen_range(0..CLIMATES.len())],
                "uid": [13_000_000 + id],
                "wayto": wayto,
                "timeto": timeto,
            })
        })
        .collect()
}

/// [`generate_map`] as typed rooms
pub fn generate_rooms(count: usize, script_ratio: u32) -> Vec<Room> {
    generate_map(count, script_ratio)
        .into_iter()
        .filter_map(|room| serde_json::from_value(room).ok())
        .collect()
}

/// Formatter that accepts everything without spawning a process
pub struct NoopFormatter;

#[async_trait]
impl Formatter for NoopFormatter {
    async fn format(&self, _cwd: &Path, _files: &[String]) -> Result<FormatterOutput, FormatterError> {
        Ok(FormatterOutput {
            success: true,
            stdout: String::new(),
        })
    }
}
