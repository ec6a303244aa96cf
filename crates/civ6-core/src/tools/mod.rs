//! Tool dispatcher: turns named tool calls into game requests.
//!
//! Every call, successful or not, is appended to the tool-call journal and
//! offered to the spatial tracker.

pub mod narrate;
pub mod scripts;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::DEFAULT_TIMEOUT;
use crate::journal::{CallCategory, ToolCallRecord};
use crate::session::GameSession;
use crate::spatial::{int_param, map_area_radius};
use narrate::*;
use scripts::UnitOp;

pub const TOOL_NAMES: &[&str] = &[
    "get_game_overview",
    "get_units",
    "get_cities",
    "get_map_area",
    "get_settle_advisor",
    "get_notifications",
    "unit_action",
    "city_production",
    "end_turn",
    "run_lua",
    "write_diary",
    "spectate",
];

const SETTLE_RADIUS: i32 = 4;
const SETTLE_RESULTS: usize = 5;

static TYPE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub success: bool,
}

pub fn is_known(name: &str) -> bool {
    TOOL_NAMES.contains(&name)
}

fn int_arg(params: &Value, key: &str) -> Result<i32> {
    int_param(params, key).ok_or_else(|| anyhow!("missing or invalid integer '{}'", key))
}

fn str_arg<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string '{}'", key))
}

fn bool_arg(params: &Value, key: &str) -> Option<bool> {
    match params.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "on" | "1" => Some(true),
            "false" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lua_is_write(params: &Value) -> bool {
    matches!(params.get("mode").and_then(Value::as_str), Some("write"))
}

pub struct ToolDispatcher {
    session: Arc<GameSession>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(session: Arc<GameSession>) -> Self {
        Self {
            session,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn session(&self) -> &Arc<GameSession> {
        &self.session
    }

    pub async fn call(&self, name: &str, params: Value) -> ToolOutput {
        let started = Instant::now();
        let outcome = self.dispatch(name, &params).await;
        let ms = started.elapsed().as_millis() as u64;

        let (text, success) = match outcome {
            Ok(text) => (text, true),
            Err(e) => {
                debug!(tool = name, error = %e, "Tool call failed");
                (format!("Error: {:#}", e), false)
            }
        };
        self.record(name, &params, &text, success, ms);
        ToolOutput { text, success }
    }

    fn record(&self, name: &str, params: &Value, text: &str, success: bool, ms: u64) {
        let call = ToolCallRecord {
            tool: name,
            params,
            result: text,
            success,
            duration_ms: ms,
        };
        let logged = if name == "run_lua" {
            let category = if lua_is_write(params) {
                CallCategory::Action
            } else {
                CallCategory::Query
            };
            self.session.tool_log().record_with_category(&call, category)
        } else {
            self.session.tool_log().record_call(&call)
        };
        if let Err(e) = logged {
            warn!(tool = name, error = %e, "Failed to write tool log");
        }
        if let Err(e) = self.session.spatial().observe(name, params, text, ms) {
            warn!(tool = name, error = %e, "Failed to write spatial record");
        }
    }

    async fn dispatch(&self, name: &str, params: &Value) -> Result<String> {
        match name {
            "get_game_overview" => self.game_overview().await,
            "get_units" => {
                let lines = self.read(&scripts::units()).await?;
                Ok(narrate_units(&parse_units(&lines)?))
            }
            "get_cities" => {
                let lines = self.read(&scripts::cities()).await?;
                Ok(narrate_cities(&parse_cities(&lines)?))
            }
            "get_map_area" => self.map_area(params).await,
            "get_settle_advisor" => self.settle_advisor(params).await,
            "get_notifications" => {
                let lines = self.write(&scripts::notifications()).await?;
                Ok(narrate_notifications(&parse_notifications(&lines)?))
            }
            "unit_action" => self.unit_action(params).await,
            "city_production" => self.city_production(params).await,
            "end_turn" => self.end_turn().await,
            "run_lua" => self.run_lua(params).await,
            "write_diary" => self.write_diary(params),
            "spectate" => self.spectate(params).await,
            other => bail!("unknown tool '{}'", other),
        }
    }

    async fn read(&self, script: &str) -> Result<Vec<String>> {
        Ok(self.session.connection().execute_read(script, self.timeout).await?)
    }

    async fn write(&self, script: &str) -> Result<Vec<String>> {
        Ok(self.session.connection().execute_write(script, self.timeout).await?)
    }

    async fn game_overview(&self) -> Result<String> {
        let lines = self.read(&scripts::game_overview()).await?;
        let overview = parse_overview(&lines)?;
        self.session.bind_game(&overview.civ, &overview.seed)?;
        self.session.set_turn(overview.turn);

        match self
            .session
            .mapcap()
            .capture_static(self.session.connection())
            .await
        {
            Ok(true) => info!(civ = %overview.civ, "Captured static map"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Static map capture failed"),
        }
        Ok(narrate_overview(&overview))
    }

    async fn map_area(&self, params: &Value) -> Result<String> {
        let cx = int_arg(params, "center_x")?;
        let cy = int_arg(params, "center_y")?;
        let radius = map_area_radius(params);
        let lines = self.read(&scripts::map_area(cx, cy, radius)).await?;
        Ok(narrate_tiles(&parse_tiles(&lines)?))
    }

    async fn settle_advisor(&self, params: &Value) -> Result<String> {
        let origin = match (int_param(params, "x"), int_param(params, "y")) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        };
        let radius = int_param(params, "radius").unwrap_or(SETTLE_RADIUS).clamp(1, 6);
        let lines = self.read(&scripts::settle_candidates(origin, radius)).await?;
        Ok(narrate_settle_spots(&rank_settle_spots(&lines, SETTLE_RESULTS)?))
    }

    async fn unit_action(&self, params: &Value) -> Result<String> {
        let unit_id = int_arg(params, "unit_id")?;
        let action = str_arg(params, "action")?;
        let op = UnitOp::parse(action).ok_or_else(|| anyhow!("unknown unit action '{}'", action))?;
        let target = match (int_param(params, "target_x"), int_param(params, "target_y")) {
            (Some(x), Some(y)) => Some((x, y)),
            _ if op.needs_target() => bail!("'{}' needs target_x and target_y", action),
            _ => None,
        };

        let lines = self.write(&scripts::unit_action(unit_id, op, target)).await?;
        let fields = action_result(&lines)?;
        let at = match (fields.first(), fields.get(1)) {
            (Some(x), Some(y)) => x.parse().ok().zip(y.parse().ok()),
            _ => None,
        };

        let spectator = self.session.spectator();
        if spectator.is_running() {
            if let Some((x, y)) = target.or(at) {
                spectator
                    .camera()
                    .push(x, y, format!("unit {} {}", unit_id, op.as_str()));
            }
        }

        let mut text = format!("Unit {}: {} ordered", unit_id, op.as_str());
        if let Some((x, y)) = target {
            text.push_str(&format!(" toward ({},{})", x, y));
        }
        if let Some((x, y)) = at {
            text.push_str(&format!(", unit at ({},{})", x, y));
        }
        Ok(text)
    }

    async fn city_production(&self, params: &Value) -> Result<String> {
        let city_id = int_arg(params, "city_id")?;
        let item = str_arg(params, "item")?;
        if !TYPE_NAME.is_match(item) {
            bail!("'{}' is not a type name such as UNIT_SETTLER", item);
        }
        let lines = self.write(&scripts::city_production(city_id, item)).await?;
        let fields = action_result(&lines)?;
        let name = fields.get(2..).map(|rest| rest.join("|")).unwrap_or_default();
        Ok(format!(
            "{} at ({},{}) now producing {}",
            name,
            fields.first().map(String::as_str).unwrap_or("?"),
            fields.get(1).map(String::as_str).unwrap_or("?"),
            item
        ))
    }

    async fn end_turn(&self) -> Result<String> {
        if self.session.game().is_some() {
            match self
                .session
                .mapcap()
                .capture_turn(self.session.connection())
                .await
            {
                Ok(delta) => debug!(
                    owners = delta.owner_changes.len(),
                    routes = delta.route_changes.len(),
                    "Recorded map delta"
                ),
                Err(e) => warn!(error = %e, "Map delta capture failed"),
            }
        } else {
            debug!("Game not identified yet, skipping map delta");
        }

        let lines = self.write(&scripts::end_turn()).await?;
        let fields = action_result(&lines)?;
        match fields.first().filter(|t| !t.is_empty()) {
            Some(turn) => Ok(format!("Turn {} ended.", turn)),
            None => Ok("Turn ended.".to_string()),
        }
    }

    async fn run_lua(&self, params: &Value) -> Result<String> {
        let code = str_arg(params, "code")?;
        let script = scripts::with_sentinel(code);
        let conn = self.session.connection();
        let lines = if let Some(index) = int_param(params, "state_index") {
            conn.execute_in(index, &script, self.timeout).await?
        } else if lua_is_write(params) {
            conn.execute_write(&script, self.timeout).await?
        } else {
            conn.execute_read(&script, self.timeout).await?
        };
        if lines.is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(lines.join("\n"))
        }
    }

    fn write_diary(&self, params: &Value) -> Result<String> {
        let text = str_arg(params, "text")?.trim();
        if text.is_empty() {
            bail!("diary entry is empty");
        }
        let tags: Vec<String> = params
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        match self.session.diary().reflect(text, &tags)? {
            Some(seq) => Ok(format!("Diary entry #{} saved.", seq)),
            None => Ok("Diary entry queued until the game is identified.".to_string()),
        }
    }

    async fn spectate(&self, params: &Value) -> Result<String> {
        let enabled =
            bool_arg(params, "enabled").ok_or_else(|| anyhow!("missing boolean 'enabled'"))?;
        let spectator = self.session.spectator();
        let text = match (enabled, spectator.is_running()) {
            (true, true) => "Spectator already running.",
            (true, false) => {
                spectator.start();
                "Spectator started."
            }
            (false, true) => {
                spectator.stop().await;
                "Spectator stopped."
            }
            (false, false) => "Spectator not running.",
        };
        Ok(text.to_string())
    }
}
