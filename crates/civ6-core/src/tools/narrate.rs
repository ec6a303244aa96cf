//! Parse pipe-separated tool output into typed records and readable text.

use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};

/// Fields of every line starting with `<tag>|`, in order.
fn records<'a>(lines: &'a [String], tag: &'a str) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    lines.iter().filter_map(move |line| {
        let rest = line.strip_prefix(tag)?.strip_prefix('|')?;
        Some(rest.split('|').collect())
    })
}

fn field<'a>(fields: &[&'a str], i: usize, what: &str) -> Result<&'a str> {
    fields
        .get(i)
        .copied()
        .ok_or_else(|| anyhow!("record missing {}", what))
}

fn num<T: std::str::FromStr>(fields: &[&str], i: usize, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    field(fields, i, what)?
        .trim()
        .parse::<T>()
        .with_context(|| format!("bad {}", what))
}

/// Whole-number floats print without a fraction.
fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{:.1}", v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub turn: u32,
    pub player: i32,
    pub civ: String,
    pub leader: String,
    pub seed: String,
    pub gold: f64,
    pub gold_rate: f64,
    pub science: f64,
    pub culture: f64,
    pub faith: f64,
    pub cities: u32,
    pub units: u32,
    pub score: i64,
}

pub fn parse_overview(lines: &[String]) -> Result<Overview> {
    let f = records(lines, "OV")
        .next()
        .ok_or_else(|| anyhow!("no overview in game response"))?;
    Ok(Overview {
        turn: num(&f, 0, "turn")?,
        player: num(&f, 1, "player")?,
        civ: field(&f, 2, "civ")?.to_string(),
        leader: field(&f, 3, "leader")?.to_string(),
        seed: field(&f, 4, "seed")?.to_string(),
        gold: num(&f, 5, "gold")?,
        gold_rate: num(&f, 6, "gold rate")?,
        science: num(&f, 7, "science")?,
        culture: num(&f, 8, "culture")?,
        faith: num(&f, 9, "faith")?,
        cities: num(&f, 10, "city count")?,
        units: num(&f, 11, "unit count")?,
        score: num(&f, 12, "score")?,
    })
}

pub fn narrate_overview(o: &Overview) -> String {
    format!(
        "Turn {} | {} ({}) | seed {}\nGold {} ({:+}/turn) | Science {} | Culture {} | Faith {}\n{} cities, {} units | Score {}",
        o.turn,
        o.civ,
        o.leader,
        o.seed,
        fmt_num(o.gold),
        o.gold_rate,
        fmt_num(o.science),
        fmt_num(o.culture),
        fmt_num(o.faith),
        o.cities,
        o.units,
        o.score
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitInfo {
    pub id: i64,
    pub unit_type: String,
    pub x: i32,
    pub y: i32,
    pub moves: f64,
    pub max_moves: f64,
    pub health: i32,
    pub max_health: i32,
}

pub fn parse_units(lines: &[String]) -> Result<Vec<UnitInfo>> {
    records(lines, "U")
        .map(|f| {
            Ok(UnitInfo {
                id: num(&f, 0, "unit id")?,
                unit_type: field(&f, 1, "unit type")?.to_string(),
                x: num(&f, 2, "x")?,
                y: num(&f, 3, "y")?,
                moves: num(&f, 4, "moves")?,
                max_moves: num(&f, 5, "max moves")?,
                health: num(&f, 6, "health")?,
                max_health: num(&f, 7, "max health")?,
            })
        })
        .collect()
}

pub fn narrate_units(units: &[UnitInfo]) -> String {
    if units.is_empty() {
        return "No units.".to_string();
    }
    let mut out = format!("Units ({}):", units.len());
    for u in units {
        let _ = write!(
            out,
            "\n  {} {} at ({},{}) moves {}/{} hp {}/{}",
            u.id,
            u.unit_type,
            u.x,
            u.y,
            fmt_num(u.moves),
            fmt_num(u.max_moves),
            u.health,
            u.max_health
        );
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityRow {
    pub id: i64,
    pub x: i32,
    pub y: i32,
    pub population: i32,
    pub producing: String,
    pub turns_left: i32,
    pub name: String,
}

pub fn parse_cities(lines: &[String]) -> Result<Vec<CityRow>> {
    records(lines, "C")
        .map(|f| {
            Ok(CityRow {
                id: num(&f, 0, "city id")?,
                x: num(&f, 1, "x")?,
                y: num(&f, 2, "y")?,
                population: num(&f, 3, "population")?,
                producing: field(&f, 4, "production")?.to_string(),
                turns_left: num(&f, 5, "turns left")?,
                // Names may contain the separator.
                name: f.get(6..).map(|rest| rest.join("|")).unwrap_or_default(),
            })
        })
        .collect()
}

pub fn narrate_cities(cities: &[CityRow]) -> String {
    if cities.is_empty() {
        return "No cities.".to_string();
    }
    let mut out = format!("Cities ({}):", cities.len());
    for c in cities {
        let _ = write!(out, "\n  {} {} at ({},{}) pop {}", c.id, c.name, c.x, c.y, c.population);
        if c.producing == "NONE" {
            out.push_str(" | idle");
        } else {
            let _ = write!(out, " | {} in {} turns", c.producing, c.turns_left);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileInfo {
    pub x: i32,
    pub y: i32,
    pub terrain: String,
    pub feature: String,
    pub resource: String,
    pub owner: i32,
    pub units: u32,
}

pub fn parse_tiles(lines: &[String]) -> Result<Vec<TileInfo>> {
    records(lines, "T")
        .map(|f| {
            Ok(TileInfo {
                x: num(&f, 0, "x")?,
                y: num(&f, 1, "y")?,
                terrain: field(&f, 2, "terrain")?.to_string(),
                feature: field(&f, 3, "feature")?.to_string(),
                resource: field(&f, 4, "resource")?.to_string(),
                owner: num(&f, 5, "owner")?,
                units: num(&f, 6, "unit count")?,
            })
        })
        .collect()
}

pub fn narrate_tiles(tiles: &[TileInfo]) -> String {
    if tiles.is_empty() {
        return "No tiles in range.".to_string();
    }
    let mut out = format!("{} tiles:", tiles.len());
    for t in tiles {
        let _ = write!(out, "\n  ({},{}) {}", t.x, t.y, t.terrain);
        for extra in [&t.feature, &t.resource] {
            if extra != "NONE" {
                let _ = write!(out, ", {}", extra);
            }
        }
        if t.owner >= 0 {
            let _ = write!(out, " | owner {}", t.owner);
        }
        if t.units > 0 {
            let _ = write!(out, " | {} units", t.units);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettleSpot {
    pub x: i32,
    pub y: i32,
    pub food: i32,
    pub production: i32,
    pub bonus: i32,
}

impl SettleSpot {
    pub fn score(&self) -> i32 {
        self.food * 2 + self.production * 2 + self.bonus
    }
}

/// Candidates ranked best first, at most `limit`.
pub fn rank_settle_spots(lines: &[String], limit: usize) -> Result<Vec<SettleSpot>> {
    let mut spots = records(lines, "S")
        .map(|f| {
            Ok(SettleSpot {
                x: num(&f, 0, "x")?,
                y: num(&f, 1, "y")?,
                food: num(&f, 2, "food")?,
                production: num(&f, 3, "production")?,
                bonus: num(&f, 4, "bonus")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    spots.sort_by(|a, b| b.score().cmp(&a.score()).then((a.x, a.y).cmp(&(b.x, b.y))));
    spots.truncate(limit);
    Ok(spots)
}

pub fn narrate_settle_spots(spots: &[SettleSpot]) -> String {
    if spots.is_empty() {
        return "No valid settle locations nearby.".to_string();
    }
    let mut out = "Best settle locations:".to_string();
    for (i, s) in spots.iter().enumerate() {
        let _ = write!(
            out,
            "\n  {}. ({},{}) score {} | food {} production {}",
            i + 1,
            s.x,
            s.y,
            s.score(),
            s.food,
            s.production
        );
        if s.bonus > 0 {
            let _ = write!(out, " | water bonus {}", s.bonus);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: String,
    pub location: Option<(i32, i32)>,
    pub message: String,
}

pub fn parse_notifications(lines: &[String]) -> Result<Vec<Notice>> {
    records(lines, "N")
        .map(|f| {
            let x: i32 = num(&f, 1, "x")?;
            let y: i32 = num(&f, 2, "y")?;
            Ok(Notice {
                kind: field(&f, 0, "type")?.to_string(),
                location: (x >= 0 && y >= 0).then_some((x, y)),
                message: f.get(3..).map(|rest| rest.join("|")).unwrap_or_default(),
            })
        })
        .collect()
}

pub fn narrate_notifications(notices: &[Notice]) -> String {
    if notices.is_empty() {
        return "No pending notifications.".to_string();
    }
    let mut out = format!("Notifications ({}):", notices.len());
    for n in notices {
        let _ = write!(out, "\n  [{}] {}", n.kind, n.message.trim());
        if let Some((x, y)) = n.location {
            let _ = write!(out, " at ({},{})", x, y);
        }
    }
    out
}

/// Result of a mutating script: the fields after `OK|`, or the `FAIL|`
/// reason as an error.
pub fn action_result(lines: &[String]) -> Result<Vec<String>> {
    for line in lines {
        if let Some(reason) = line.strip_prefix("FAIL|") {
            bail!("{}", reason);
        }
        if let Some(rest) = line.strip_prefix("BLOCKED|") {
            bail!("turn blocked by {}", rest);
        }
        if let Some(rest) = line.strip_prefix("OK") {
            let rest = rest.strip_prefix('|').unwrap_or(rest);
            return Ok(rest.split('|').map(str::to_string).collect());
        }
    }
    Err(anyhow!("game returned no result"))
}
