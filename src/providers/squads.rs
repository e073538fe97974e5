use serde_json::Value;

use crate::db::models::SquadPlayer;

/// Normalize a squads/injuries payload.
///
/// Two shapes are accepted:
/// - a bare array of teams, each with a `players` list flagged `player_injured`
/// - `{ "response": [ { "player": {..}, "team": {..} } ] }`, one entry per
///   injured player
pub fn parse_squads(raw: &Value) -> Vec<SquadPlayer> {
    if let Some(teams) = raw.as_array() {
        return teams.iter().flat_map(parse_team_squad).collect();
    }
    match raw["response"].as_array() {
        Some(entries) => entries.iter().filter_map(parse_injury_entry).collect(),
        None => vec![],
    }
}

fn parse_team_squad(team: &Value) -> Vec<SquadPlayer> {
    let team_name = match team["team_name"].as_str().or_else(|| team["name"].as_str()) {
        Some(n) => n.trim().to_string(),
        None => return vec![],
    };

    team["players"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| {
            let player_name = p["player_name"].as_str().or_else(|| p["name"].as_str())?;
            Some(SquadPlayer {
                team_name: team_name.clone(),
                player_name: player_name.trim().to_string(),
                position: p["player_type"]
                    .as_str()
                    .or_else(|| p["position"].as_str())
                    .map(str::to_string),
                injured: truthy(&p["player_injured"]),
                injury_reason: p["injury_reason"].as_str().map(str::to_string),
            })
        })
        .collect()
}

fn parse_injury_entry(entry: &Value) -> Option<SquadPlayer> {
    Some(SquadPlayer {
        team_name: entry["team"]["name"].as_str()?.trim().to_string(),
        player_name: entry["player"]["name"].as_str()?.trim().to_string(),
        position: entry["player"]["position"].as_str().map(str::to_string),
        injured: true,
        injury_reason: entry["player"]["reason"].as_str().map(str::to_string),
    })
}

/// Providers flag injuries as `true`, `1`, `"yes"` or `"1"`.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1"),
        _ => false,
    }
}
