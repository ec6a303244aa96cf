//! Spatial attention tracker.
//!
//! Records which map tiles each tool call put in front of the agent, to
//! `spatial_<civ>_<seed>.jsonl`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::journal::{GameJournal, JournalKind};

/// `(x,y)` integer pairs in narrated tool output.
static TILE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((-?\d+),\s*(-?\d+)\)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionType {
    /// Explicit area or advisory queries.
    DeliberateScan,
    /// Actions taken at a coordinate.
    DeliberateAction,
    /// Empire-wide overviews.
    Survey,
    /// Lists that incidentally include coordinates.
    Peripheral,
    /// Notification-driven.
    Reactive,
}

impl AttentionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionType::DeliberateScan => "deliberate_scan",
            AttentionType::DeliberateAction => "deliberate_action",
            AttentionType::Survey => "survey",
            AttentionType::Peripheral => "peripheral",
            AttentionType::Reactive => "reactive",
        }
    }
}

pub fn classify(tool: &str) -> Option<AttentionType> {
    match tool {
        "get_map_area" | "get_settle_advisor" => Some(AttentionType::DeliberateScan),
        "unit_action" => Some(AttentionType::DeliberateAction),
        "get_game_overview" | "get_cities" => Some(AttentionType::Survey),
        "get_units" => Some(AttentionType::Peripheral),
        "get_notifications" => Some(AttentionType::Reactive),
        _ => None,
    }
}

pub type Tile = (i32, i32);

pub fn tiles_in_text(text: &str) -> BTreeSet<Tile> {
    TILE_PATTERN
        .captures_iter(text)
        .filter_map(|cap| Some((cap[1].parse().ok()?, cap[2].parse().ok()?)))
        .collect()
}

/// Default half-width of a `get_map_area` scan.
pub const DEFAULT_MAP_RADIUS: i32 = 2;
/// Largest half-width a `get_map_area` scan will cover.
pub const MAX_MAP_RADIUS: i32 = 5;

/// Half-width of the square `get_map_area` actually scans for `params`.
pub fn map_area_radius(params: &Value) -> i32 {
    int_param(params, "radius")
        .or_else(|| int_param(params, "r"))
        .unwrap_or(DEFAULT_MAP_RADIUS)
        .clamp(0, MAX_MAP_RADIUS)
}

/// Tiles implied by the request itself: an explicit target, a plain `x/y`,
/// or the whole square scanned by `get_map_area`.
pub fn tiles_in_params(tool: &str, params: &Value) -> BTreeSet<Tile> {
    let mut tiles = BTreeSet::new();
    if let (Some(x), Some(y)) = (int_param(params, "target_x"), int_param(params, "target_y")) {
        tiles.insert((x, y));
    }
    if let (Some(x), Some(y)) = (int_param(params, "x"), int_param(params, "y")) {
        tiles.insert((x, y));
    }
    if tool == "get_map_area" {
        if let (Some(cx), Some(cy)) = (int_param(params, "center_x"), int_param(params, "center_y")) {
            let r = map_area_radius(params);
            for dx in -r..=r {
                for dy in -r..=r {
                    // Off the i32 plane: no such tile.
                    if let (Some(x), Some(y)) = (cx.checked_add(dx), cy.checked_add(dy)) {
                        tiles.insert((x, y));
                    }
                }
            }
        }
    }
    tiles
}

pub(crate) fn int_param(params: &Value, key: &str) -> Option<i32> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionRecord {
    pub tool: String,
    #[serde(rename = "type")]
    pub attention: AttentionType,
    pub tiles: Vec<[i32; 2]>,
    pub n_tiles: usize,
    pub ms: u64,
}

/// Build the record for one tool call, or `None` when the tool is not
/// spatial or surfaced no tiles.
pub fn attention_record(tool: &str, params: &Value, result: &str, ms: u64) -> Option<AttentionRecord> {
    let attention = classify(tool)?;
    let mut tiles = tiles_in_text(result);
    tiles.extend(tiles_in_params(tool, params));
    if tiles.is_empty() {
        return None;
    }
    let tiles: Vec<[i32; 2]> = tiles.into_iter().map(|(x, y)| [x, y]).collect();
    Some(AttentionRecord {
        tool: tool.to_string(),
        attention,
        n_tiles: tiles.len(),
        tiles,
        ms,
    })
}

pub struct SpatialTracker {
    journal: GameJournal,
}

impl SpatialTracker {
    pub fn new(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            journal: GameJournal::new(JournalKind::Spatial, dir, session),
        }
    }

    pub fn journal(&self) -> &GameJournal {
        &self.journal
    }

    /// Append an attention record for the call if it has one.
    pub fn observe(
        &self,
        tool: &str,
        params: &Value,
        result: &str,
        ms: u64,
    ) -> Result<Option<AttentionRecord>> {
        let Some(record) = attention_record(tool, params, result, ms) else {
            return Ok(None);
        };
        let mut fields = Map::new();
        fields.insert("tool".into(), json!(record.tool));
        fields.insert("type".into(), json!(record.attention.as_str()));
        fields.insert("tiles".into(), json!(record.tiles));
        fields.insert("n_tiles".into(), json!(record.n_tiles));
        fields.insert("ms".into(), json!(record.ms));
        self.journal.record(fields)?;
        Ok(Some(record))
    }
}
