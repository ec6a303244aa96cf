//! Map capture: one static terrain dump per game plus per-turn deltas.
//!
//! - `mapstatic_<civ>_<seed>.json` is written once, atomically
//! - `mapturns_<civ>_<seed>.jsonl` gets one line per captured turn holding
//!   ownership and route changes as `[tile_index, value]` pairs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info};

use crate::connection::GameConnection;
use crate::journal::{game_id, read_entries, GameJournal, JournalKind};

/// Values stored per tile in the static terrain array.
pub const TERRAIN_FIELDS: usize = 6;
const NO_VALUE: i32 = -1;
/// Far above the largest shipped map size (128x80).
const MAX_GRID_TILES: usize = 1 << 20;
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

pub const STATIC_SCRIPT: &str = r#"
local w, h = Map.GetGridSize()
print("G|" .. w .. "|" .. h)
for y = 0, h - 1 do
  local row = {}
  for x = 0, w - 1 do
    local p = Map.GetPlot(x, y)
    row[#row + 1] = table.concat({
      p:GetTerrainType(), p:GetFeatureType(),
      p:IsHills() and 1 or 0, p:IsRiver() and 1 or 0, p:IsCoastalLand() and 1 or 0,
      p:GetResourceType(), p:GetOwner(), p:GetRouteType()
    }, ",")
  end
  print("R|" .. y .. "|" .. table.concat(row, ";"))
end
for _, id in ipairs(PlayerManager.GetAliveIDs()) do
  print("P|" .. id .. "|" .. tostring(PlayerConfigurations[id]:GetCivilizationTypeName()))
  for _, c in Players[id]:GetCities():Members() do
    print("C|" .. id .. "|" .. c:GetX() .. "|" .. c:GetY() .. "|" .. c:GetPopulation() .. "|" .. Locale.Lookup(c:GetName()))
  end
end
print("---END---")
"#;

pub const TURN_SCRIPT: &str = r#"
local w, h = Map.GetGridSize()
print("G|" .. w .. "|" .. h)
for y = 0, h - 1 do
  local row = {}
  for x = 0, w - 1 do
    local p = Map.GetPlot(x, y)
    row[#row + 1] = p:GetOwner() .. "," .. p:GetRouteType()
  end
  print("O|" .. y .. "|" .. table.concat(row, ";"))
end
for _, id in ipairs(PlayerManager.GetAliveIDs()) do
  for _, c in Players[id]:GetCities():Members() do
    print("C|" .. id .. "|" .. c:GetX() .. "|" .. c:GetY() .. "|" .. c:GetPopulation() .. "|" .. Locale.Lookup(c:GetName()))
  end
end
print("---END---")
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityInfo {
    pub player: i32,
    pub x: i32,
    pub y: i32,
    pub population: i32,
    pub name: String,
}

/// Parsed result of [`STATIC_SCRIPT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub width: usize,
    pub height: usize,
    /// terrain, feature, hills, river, coastal, resource per tile.
    pub terrain: Vec<i32>,
    pub owners: Vec<i32>,
    pub routes: Vec<i32>,
    pub cities: Vec<CityInfo>,
    pub players: BTreeMap<i32, String>,
}

/// Parsed result of [`TURN_SCRIPT`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TurnSnapshot {
    pub owners: Vec<i32>,
    pub routes: Vec<i32>,
    pub cities: Vec<CityInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticDump {
    pub civ: String,
    pub seed: String,
    pub captured_at: String,
    #[serde(flatten)]
    pub map: MapSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TurnDelta {
    pub owner_changes: Vec<[i64; 2]>,
    pub route_changes: Vec<[i64; 2]>,
}

fn parse_grid(line: &str) -> Result<(usize, usize)> {
    let mut parts = line.split('|').skip(1);
    let w = parts.next().ok_or_else(|| anyhow!("grid line missing width"))?;
    let h = parts.next().ok_or_else(|| anyhow!("grid line missing height"))?;
    let (width, height): (usize, usize) = (w.trim().parse()?, h.trim().parse()?);
    match width.checked_mul(height) {
        Some(tiles) if tiles <= MAX_GRID_TILES => Ok((width, height)),
        _ => bail!("grid {}x{} exceeds {} tiles", width, height, MAX_GRID_TILES),
    }
}

fn parse_ints(cell: &str) -> Result<Vec<i32>> {
    cell.split(',')
        .map(|v| v.trim().parse::<i32>().with_context(|| format!("bad tile value '{}'", v)))
        .collect()
}

fn parse_city(line: &str) -> Result<CityInfo> {
    let parts: Vec<&str> = line.splitn(6, '|').collect();
    if parts.len() < 6 {
        bail!("city line has {} fields: {}", parts.len(), line);
    }
    Ok(CityInfo {
        player: parts[1].parse()?,
        x: parts[2].parse()?,
        y: parts[3].parse()?,
        population: parts[4].parse()?,
        name: parts[5].to_string(),
    })
}

/// Split a row line `<tag>|<y>|cell;cell;...` into its row number and cells.
fn parse_row(line: &str) -> Result<(usize, Vec<&str>)> {
    let mut parts = line.splitn(3, '|').skip(1);
    let y = parts
        .next()
        .ok_or_else(|| anyhow!("row line missing index"))?
        .parse()?;
    let cells = parts.next().unwrap_or("");
    let cells = if cells.is_empty() {
        Vec::new()
    } else {
        cells.split(';').collect()
    };
    Ok((y, cells))
}

pub fn parse_static(lines: &[String]) -> Result<MapSnapshot> {
    let mut grid = None;
    let mut rows: BTreeMap<usize, Vec<Vec<i32>>> = BTreeMap::new();
    let mut cities = Vec::new();
    let mut players = BTreeMap::new();

    for line in lines {
        match line.split('|').next() {
            Some("G") => grid = Some(parse_grid(line)?),
            Some("R") => {
                let (y, cells) = parse_row(line)?;
                let tiles = cells.into_iter().map(parse_ints).collect::<Result<Vec<_>>>()?;
                rows.insert(y, tiles);
            }
            Some("P") => {
                let mut parts = line.splitn(3, '|').skip(1);
                let id: i32 = parts.next().unwrap_or("").parse()?;
                players.insert(id, parts.next().unwrap_or("").to_string());
            }
            Some("C") => cities.push(parse_city(line)?),
            _ => debug!(line = %line, "Ignoring unexpected map line"),
        }
    }

    let (width, height) = grid.ok_or_else(|| anyhow!("map dump has no grid line"))?;
    let tiles = width * height;
    let mut terrain = Vec::with_capacity(tiles * TERRAIN_FIELDS);
    let mut owners = Vec::with_capacity(tiles);
    let mut routes = Vec::with_capacity(tiles);
    for y in 0..height {
        let row = rows
            .get(&y)
            .ok_or_else(|| anyhow!("map dump missing row {}", y))?;
        if row.len() != width {
            bail!("row {} has {} tiles, expected {}", y, row.len(), width);
        }
        for tile in row {
            if tile.len() != TERRAIN_FIELDS + 2 {
                bail!("row {} tile has {} values", y, tile.len());
            }
            terrain.extend_from_slice(&tile[..TERRAIN_FIELDS]);
            owners.push(tile[TERRAIN_FIELDS]);
            routes.push(tile[TERRAIN_FIELDS + 1]);
        }
    }

    Ok(MapSnapshot {
        width,
        height,
        terrain,
        owners,
        routes,
        cities,
        players,
    })
}

pub fn parse_turn(lines: &[String]) -> Result<TurnSnapshot> {
    let mut grid = None;
    let mut rows: BTreeMap<usize, Vec<(i32, i32)>> = BTreeMap::new();
    let mut cities = Vec::new();

    for line in lines {
        match line.split('|').next() {
            Some("G") => grid = Some(parse_grid(line)?),
            Some("O") => {
                let (y, cells) = parse_row(line)?;
                let mut row = Vec::with_capacity(cells.len());
                for cell in cells {
                    match parse_ints(cell)?.as_slice() {
                        [owner, route] => row.push((*owner, *route)),
                        other => bail!("row {} cell has {} values", y, other.len()),
                    }
                }
                rows.insert(y, row);
            }
            Some("C") => cities.push(parse_city(line)?),
            _ => debug!(line = %line, "Ignoring unexpected turn line"),
        }
    }

    let (width, height) = grid.ok_or_else(|| anyhow!("turn capture has no grid line"))?;
    let mut snapshot = TurnSnapshot {
        owners: Vec::with_capacity(width * height),
        routes: Vec::with_capacity(width * height),
        cities,
    };
    for y in 0..height {
        let row = rows
            .get(&y)
            .ok_or_else(|| anyhow!("turn capture missing row {}", y))?;
        if row.len() != width {
            bail!("row {} has {} tiles, expected {}", y, row.len(), width);
        }
        for (owner, route) in row {
            snapshot.owners.push(*owner);
            snapshot.routes.push(*route);
        }
    }
    Ok(snapshot)
}

/// `[index, value]` for every tile whose value differs from `before`.
/// Tiles missing from `before` count as unset.
pub fn diff(before: &[i32], after: &[i32]) -> Vec<[i64; 2]> {
    after
        .iter()
        .enumerate()
        .filter(|(i, v)| before.get(*i).copied().unwrap_or(NO_VALUE) != **v)
        .map(|(i, v)| [i as i64, *v as i64])
        .collect()
}

fn apply(values: &mut Vec<i32>, changes: &serde_json::Value) {
    let Some(pairs) = changes.as_array() else {
        return;
    };
    for pair in pairs {
        let (Some(i), Some(v)) = (
            pair.get(0).and_then(|v| v.as_u64()),
            pair.get(1).and_then(|v| v.as_i64()),
        ) else {
            continue;
        };
        let i = i as usize;
        if i >= values.len() {
            values.resize(i + 1, NO_VALUE);
        }
        values[i] = v as i32;
    }
}

#[derive(Default)]
struct CaptureState {
    game: Option<(String, String)>,
    owners: Vec<i32>,
    routes: Vec<i32>,
}

pub struct MapCapture {
    dir: PathBuf,
    turns: GameJournal,
    state: Mutex<CaptureState>,
}

impl MapCapture {
    pub fn new(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        let dir = dir.into();
        Self {
            turns: GameJournal::new(JournalKind::MapTurns, dir.clone(), session),
            dir,
            state: Mutex::new(CaptureState::default()),
        }
    }

    pub fn journal(&self) -> &GameJournal {
        &self.turns
    }

    pub fn static_path(&self, civ: &str, seed: &str) -> PathBuf {
        self.dir.join(format!("mapstatic_{}.json", game_id(civ, seed)))
    }

    /// Bind to a game and rebuild the ownership baseline from whatever an
    /// earlier run already wrote for it.
    pub fn bind(&self, civ: &str, seed: &str) -> Result<()> {
        let mut state = self.lock();
        if state.game.as_ref() == Some(&(civ.to_string(), seed.to_string())) {
            return Ok(());
        }
        self.turns.bind(civ, seed)?;

        let mut owners = Vec::new();
        let mut routes = Vec::new();
        let static_path = self.static_path(civ, seed);
        if static_path.exists() {
            let dump = read_static(&static_path)?;
            owners = dump.map.owners;
            routes = dump.map.routes;
            if let Some(path) = self.turns.path() {
                if path.exists() {
                    for entry in read_entries(&path)? {
                        if let Some(changes) = entry.fields.get("owner_changes") {
                            apply(&mut owners, changes);
                        }
                        if let Some(changes) = entry.fields.get("route_changes") {
                            apply(&mut routes, changes);
                        }
                    }
                }
            }
            debug!(tiles = owners.len(), "Restored map baseline");
        }

        *state = CaptureState {
            game: Some((civ.to_string(), seed.to_string())),
            owners,
            routes,
        };
        Ok(())
    }

    pub fn has_static(&self) -> bool {
        let state = self.lock();
        match &state.game {
            Some((civ, seed)) => self.static_path(civ, seed).exists(),
            None => false,
        }
    }

    /// Write the static dump unless one already exists. Returns whether a
    /// file was written.
    pub fn write_static(&self, map: MapSnapshot) -> Result<bool> {
        let mut state = self.lock();
        let (civ, seed) = state
            .game
            .clone()
            .ok_or_else(|| anyhow!("map capture is not bound to a game"))?;
        let path = self.static_path(&civ, &seed);
        if path.exists() {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)?;
        if state.owners.is_empty() {
            state.owners = map.owners.clone();
            state.routes = map.routes.clone();
        }
        let dump = StaticDump {
            civ,
            seed,
            captured_at: Utc::now().to_rfc3339(),
            map,
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&dump)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        info!(path = %path.display(), tiles = dump.map.owners.len(), "Static map dump written");
        Ok(true)
    }

    /// Append one turn's ownership/route delta against the previous capture.
    pub fn record_turn(&self, snapshot: TurnSnapshot) -> Result<TurnDelta> {
        let mut state = self.lock();
        if state.game.is_none() {
            bail!("map capture is not bound to a game");
        }
        let delta = TurnDelta {
            owner_changes: diff(&state.owners, &snapshot.owners),
            route_changes: diff(&state.routes, &snapshot.routes),
        };

        let mut fields = Map::new();
        fields.insert("owner_changes".into(), json!(delta.owner_changes));
        fields.insert("route_changes".into(), json!(delta.route_changes));
        fields.insert("cities".into(), json!(snapshot.cities));
        self.turns.record(fields)?;

        state.owners = snapshot.owners;
        state.routes = snapshot.routes;
        Ok(delta)
    }

    /// Fetch and write the static dump if this game has none yet.
    pub async fn capture_static(&self, conn: &GameConnection) -> Result<bool> {
        if self.has_static() {
            return Ok(false);
        }
        let lines = conn.execute_read(STATIC_SCRIPT, CAPTURE_TIMEOUT).await?;
        let map = parse_static(&lines).context("parsing static map dump")?;
        self.write_static(map)
    }

    pub async fn capture_turn(&self, conn: &GameConnection) -> Result<TurnDelta> {
        let lines = conn.execute_read(TURN_SCRIPT, CAPTURE_TIMEOUT).await?;
        let snapshot = parse_turn(&lines).context("parsing turn capture")?;
        self.record_turn(snapshot)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn read_static(path: &Path) -> Result<StaticDump> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_slice(&bytes)?)
}
