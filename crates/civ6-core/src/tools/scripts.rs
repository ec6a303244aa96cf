//! Lua payloads for the tool catalogue.
//!
//! Every payload prints pipe-separated records and ends with the sentinel.
//! Record tags: `OV` overview, `U` unit, `C` city, `T` tile, `S` settle
//! candidate, `N` notification, `OK`/`FAIL` action result, `BLOCKED` end turn.

use crate::config::SENTINEL;

pub fn with_sentinel(body: &str) -> String {
    format!("{}\nprint(\"{}\")", body.trim_end(), SENTINEL)
}

pub fn game_overview() -> String {
    with_sentinel(
        r#"
local me = Game.GetLocalPlayer()
local p = Players[me]
local cfg = PlayerConfigurations[me]
local t = p:GetTreasury()
print("OV|" .. table.concat({
  Game.GetCurrentGameTurn(), me,
  tostring(cfg:GetCivilizationTypeName()), tostring(cfg:GetLeaderTypeName()),
  tostring(MapConfiguration.GetValue("RANDOM_SEED")),
  math.floor(t:GetGoldBalance()), t:GetGoldYield() - t:GetTotalMaintenance(),
  p:GetTechs():GetScienceYield(), p:GetCulture():GetCultureYield(),
  math.floor(p:GetReligion():GetFaithBalance()),
  p:GetCities():GetCount(), p:GetUnits():GetCount(), p:GetScore()
}, "|"))
"#,
    )
}

pub fn units() -> String {
    with_sentinel(
        r#"
local me = Game.GetLocalPlayer()
for _, u in Players[me]:GetUnits():Members() do
  print("U|" .. table.concat({
    u:GetID(), GameInfo.Units[u:GetType()].UnitType, u:GetX(), u:GetY(),
    u:GetMovesRemaining(), u:GetMaxMoves(),
    u:GetMaxDamage() - u:GetDamage(), u:GetMaxDamage()
  }, "|"))
end
"#,
    )
}

pub fn cities() -> String {
    with_sentinel(
        r#"
local me = Game.GetLocalPlayer()
for _, c in Players[me]:GetCities():Members() do
  local q = c:GetBuildQueue()
  local h = q:GetCurrentProductionTypeHash()
  local item = "NONE"
  if h ~= 0 and GameInfo.Types[h] ~= nil then item = GameInfo.Types[h].Type end
  print("C|" .. table.concat({
    c:GetID(), c:GetX(), c:GetY(), c:GetPopulation(), item, q:GetTurnsLeft(),
    Locale.Lookup(c:GetName())
  }, "|"))
end
"#,
    )
}

pub fn map_area(cx: i32, cy: i32, radius: i32) -> String {
    with_sentinel(&format!(
        r#"
local function name(row, col) if row == nil then return "NONE" end return row[col] end
for dy = -{r}, {r} do
  for dx = -{r}, {r} do
    local p = Map.GetPlot({cx} + dx, {cy} + dy)
    if p ~= nil then
      print("T|" .. table.concat({{
        p:GetX(), p:GetY(),
        name(GameInfo.Terrains[p:GetTerrainType()], "TerrainType"),
        name(GameInfo.Features[p:GetFeatureType()], "FeatureType"),
        name(GameInfo.Resources[p:GetResourceType()], "ResourceType"),
        p:GetOwner(), p:GetUnitCount()
      }}, "|"))
    end
  end
end
"#,
        r = radius,
        cx = cx,
        cy = cy
    ))
}

/// Unowned land tiles within `radius` of the origin and at least four tiles
/// from every city, with the food and production of their first ring.
/// Without an origin the first settler (else the capital) is used.
pub fn settle_candidates(origin: Option<(i32, i32)>, radius: i32) -> String {
    let origin = match origin {
        Some((x, y)) => format!("local ox, oy = {}, {}", x, y),
        None => r#"
local ox, oy = -1, -1
for _, u in Players[me]:GetUnits():Members() do
  if GameInfo.Units[u:GetType()].FoundCity and ox < 0 then ox, oy = u:GetX(), u:GetY() end
end
if ox < 0 then
  local cap = Players[me]:GetCities():GetCapitalCity()
  if cap ~= nil then ox, oy = cap:GetX(), cap:GetY() end
end"#
            .to_string(),
    };
    with_sentinel(&format!(
        r#"
local me = Game.GetLocalPlayer()
{origin}
if ox >= 0 then
  for dy = -{r}, {r} do
    for dx = -{r}, {r} do
      local p = Map.GetPlot(ox + dx, oy + dy)
      if p ~= nil and not p:IsWater() and not p:IsImpassable() and p:GetOwner() == -1 then
        local near = false
        for _, id in ipairs(PlayerManager.GetAliveIDs()) do
          for _, c in Players[id]:GetCities():Members() do
            if Map.GetPlotDistance(p:GetX(), p:GetY(), c:GetX(), c:GetY()) < 4 then near = true end
          end
        end
        if not near then
          local food, prod = 0, 0
          for ry = -1, 1 do
            for rx = -1, 1 do
              local q = Map.GetPlot(p:GetX() + rx, p:GetY() + ry)
              if q ~= nil then
                food = food + q:GetYield(GameInfo.Yields["YIELD_FOOD"].Index)
                prod = prod + q:GetYield(GameInfo.Yields["YIELD_PRODUCTION"].Index)
              end
            end
          end
          local bonus = 0
          if p:IsRiver() then bonus = bonus + 3 end
          if p:IsCoastalLand() then bonus = bonus + 2 end
          if p:IsFreshWater() then bonus = bonus + 1 end
          print("S|" .. table.concat({{p:GetX(), p:GetY(), food, prod, bonus}}, "|"))
        end
      end
    end
  end
end
"#,
        origin = origin,
        r = radius
    ))
}

pub fn notifications() -> String {
    with_sentinel(
        r#"
local me = Game.GetLocalPlayer()
local list = NotificationManager.GetList(me)
if list ~= nil then
  for _, id in ipairs(list) do
    local n = NotificationManager.Find(me, id)
    if n ~= nil and not n:IsDismissed() then
      local x, y = -1, -1
      if n:IsLocationValid() then x, y = n:GetLocation() end
      local msg = string.gsub(Locale.Lookup(n:GetMessage()), "[|\n]", " ")
      print("N|" .. table.concat({n:GetTypeName(), x, y, msg}, "|"))
    end
  end
end
"#,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOp {
    Move,
    Attack,
    Fortify,
    Sleep,
    Skip,
    FoundCity,
}

impl UnitOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "move" => Some(UnitOp::Move),
            "attack" => Some(UnitOp::Attack),
            "fortify" => Some(UnitOp::Fortify),
            "sleep" => Some(UnitOp::Sleep),
            "skip" => Some(UnitOp::Skip),
            "found_city" => Some(UnitOp::FoundCity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOp::Move => "move",
            UnitOp::Attack => "attack",
            UnitOp::Fortify => "fortify",
            UnitOp::Sleep => "sleep",
            UnitOp::Skip => "skip",
            UnitOp::FoundCity => "found_city",
        }
    }

    pub fn needs_target(&self) -> bool {
        matches!(self, UnitOp::Move | UnitOp::Attack)
    }

    fn operation(&self) -> &'static str {
        match self {
            UnitOp::Move => "MOVE_TO",
            UnitOp::Attack => "RANGE_ATTACK",
            UnitOp::Fortify => "FORTIFY",
            UnitOp::Sleep => "SLEEP",
            UnitOp::Skip => "SKIP_TURN",
            UnitOp::FoundCity => "FOUND_CITY",
        }
    }
}

/// Prints `OK|x|y` with the unit's position after the request, or
/// `FAIL|reason`.
pub fn unit_action(unit_id: i32, op: UnitOp, target: Option<(i32, i32)>) -> String {
    let params = match target {
        Some((x, y)) => format!(
            "{{[UnitOperationTypes.PARAM_X] = {}, [UnitOperationTypes.PARAM_Y] = {}}}",
            x, y
        ),
        None => "{}".to_string(),
    };
    with_sentinel(&format!(
        r#"
local me = Game.GetLocalPlayer()
local u = UnitManager.GetUnit(me, {id})
if u == nil then
  print("FAIL|no unit {id}")
else
  local op = UnitOperationTypes.{op}
  local params = {params}
  if op == UnitOperationTypes.RANGE_ATTACK and not UnitManager.CanStartOperation(u, op, nil, params) then
    op = UnitOperationTypes.MOVE_TO
  end
  if UnitManager.CanStartOperation(u, op, nil, params) then
    UnitManager.RequestOperation(u, op, params)
    print("OK|" .. u:GetX() .. "|" .. u:GetY())
  else
    print("FAIL|cannot {name} now")
  end
end
"#,
        id = unit_id,
        op = op.operation(),
        params = params,
        name = op.as_str()
    ))
}

/// `item` must already be validated as an upper-case type name.
pub fn city_production(city_id: i32, item: &str) -> String {
    with_sentinel(&format!(
        r#"
local me = Game.GetLocalPlayer()
local c = CityManager.GetCity(me, {id})
local item = "{item}"
if c == nil then
  print("FAIL|no city {id}")
else
  local params = {{}}
  if GameInfo.Units[item] ~= nil then
    params[CityOperationTypes.PARAM_UNIT_TYPE] = GameInfo.Units[item].Hash
  elseif GameInfo.Buildings[item] ~= nil then
    params[CityOperationTypes.PARAM_BUILDING_TYPE] = GameInfo.Buildings[item].Hash
  elseif GameInfo.Projects[item] ~= nil then
    params[CityOperationTypes.PARAM_PROJECT_TYPE] = GameInfo.Projects[item].Hash
  end
  if next(params) == nil then
    print("FAIL|unknown item " .. item)
  elseif CityManager.CanStartOperation(c, CityOperationTypes.BUILD, params, true) then
    CityManager.RequestOperation(c, CityOperationTypes.BUILD, params)
    print("OK|" .. c:GetX() .. "|" .. c:GetY() .. "|" .. Locale.Lookup(c:GetName()))
  else
    print("FAIL|" .. Locale.Lookup(c:GetName()) .. " cannot build " .. item)
  end
end
"#,
        id = city_id,
        item = item
    ))
}

pub fn end_turn() -> String {
    with_sentinel(
        r#"
local me = Game.GetLocalPlayer()
local blocking = NotificationManager.GetFirstEndTurnBlocking(me)
if blocking ~= nil and blocking ~= EndTurnBlockingTypes.NO_ENDTURN_BLOCKING then
  local row = GameInfo.Notifications[blocking]
  print("BLOCKED|" .. (row and row.NotificationType or tostring(blocking)))
else
  UI.RequestAction(ActionTypes.ACTION_ENDTURN)
  print("OK|" .. Game.GetCurrentGameTurn())
end
"#,
    )
}
