//! Per-field extractors. Each one looks at the resolved event object on its
//! own, so a malformed field never prevents the others from being read.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::normalizer::extract::{as_name, as_number, as_text, first_present, format_count, path};
use crate::types::{MatchStatus, OddsMarket, OddsPair, Players, DEFAULT_P1, DEFAULT_P2};

pub const ID_KEYS: &[&str] = &["id", "match_id", "matchId", "event_id", "eventId"];

const LEAGUE_KEYS: &[&str] = &["league", "leagueName", "league_name", "competition"];
const TOUR_KEYS: &[&str] = &["tour", "tourName", "tour_name", "category"];
const STATUS_KEYS: &[&str] = &["status", "state", "match_status", "matchStatus"];
const SET_INDEX_KEYS: &[&str] = &["currentSetIndex", "current_set_index", "setNumber", "set_number"];
const TIMESTAMP_KEYS: &[&str] = &[
    "last_update_ts",
    "lastUpdate",
    "last_update",
    "updatedAt",
    "updated_at",
    "timestamp",
    "ts",
];

type PairPath = (&'static [&'static str], &'static [&'static str]);

const SET_SCORE_PATHS: &[PairPath] = &[
    (&["score", "sets1"], &["score", "sets2"]),
    (&["score", "sets_p1"], &["score", "sets_p2"]),
    (&["sets", "p1"], &["sets", "p2"]),
];

const POINT_SCORE_PATHS: &[PairPath] = &[
    (&["score", "current", "p1"], &["score", "current", "p2"]),
    (&["currentSet", "p1"], &["currentSet", "p2"]),
    (&["current_set", "points1"], &["current_set", "points2"]),
];

/// Above this a numeric timestamp is taken to be epoch milliseconds.
const MILLIS_THRESHOLD: f64 = 1e11;

pub fn has_id(obj: &Value) -> bool {
    obj.is_object() && first_present(obj, ID_KEYS).and_then(as_text).is_some()
}

pub fn match_id(obj: &Value) -> Option<String> {
    first_present(obj, ID_KEYS).and_then(as_text)
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

pub fn players(obj: &Value) -> Players {
    let (p1, p2) = players_from_list(obj)
        .or_else(|| players_from_sides(obj))
        .or_else(|| players_from_scalars(obj))
        .unwrap_or((None, None));

    Players {
        p1: p1.unwrap_or_else(|| DEFAULT_P1.to_string()),
        p2: p2.unwrap_or_else(|| DEFAULT_P2.to_string()),
    }
}

type NamePair = (Option<String>, Option<String>);

fn any_named(pair: NamePair) -> Option<NamePair> {
    if pair.0.is_some() || pair.1.is_some() {
        Some(pair)
    } else {
        None
    }
}

fn players_from_list(obj: &Value) -> Option<NamePair> {
    let list = first_present(obj, &["players", "competitors"])?.as_array()?;
    let name_at = |i: usize| list.get(i).and_then(as_name);
    any_named((name_at(0), name_at(1)))
}

fn players_from_sides(obj: &Value) -> Option<NamePair> {
    let home = obj.get("home").and_then(as_name);
    let away = obj.get("away").and_then(as_name);
    any_named((home, away))
}

fn players_from_scalars(obj: &Value) -> Option<NamePair> {
    let p1 = first_present(obj, &["p1", "player1"]).and_then(as_text);
    let p2 = first_present(obj, &["p2", "player2"]).and_then(as_text);
    any_named((p1, p2))
}

// ---------------------------------------------------------------------------
// Status / labels
// ---------------------------------------------------------------------------

pub fn status(obj: &Value) -> MatchStatus {
    first_present(obj, STATUS_KEYS)
        .map(parse_status)
        .unwrap_or_default()
}

/// Maps free text or numeric codes onto the four canonical states.
pub fn parse_status(v: &Value) -> MatchStatus {
    let Some(raw) = as_name(v) else {
        return MatchStatus::Unknown;
    };
    let s = raw.to_lowercase();
    if s.contains("live") || s == "1" {
        MatchStatus::Live
    } else if s.contains("paused") || s == "2" {
        MatchStatus::Paused
    } else if s.contains("finished") || s == "3" {
        MatchStatus::Finished
    } else {
        MatchStatus::Unknown
    }
}

pub fn league(obj: &Value) -> Option<String> {
    first_present(obj, LEAGUE_KEYS).and_then(as_name)
}

pub fn tour(obj: &Value) -> Option<String> {
    first_present(obj, TOUR_KEYS).and_then(as_name)
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

pub fn score_sets(obj: &Value) -> Option<String> {
    score_pair(obj, SET_SCORE_PATHS)
}

pub fn score_points_current_set(obj: &Value) -> Option<String> {
    score_pair(obj, POINT_SCORE_PATHS)
}

fn score_pair(obj: &Value, paths: &[PairPath]) -> Option<String> {
    paths.iter().find_map(|(left, right)| {
        let p1 = path(obj, left).and_then(as_number)?;
        let p2 = path(obj, right).and_then(as_number)?;
        Some(format!("{}:{}", format_count(p1), format_count(p2)))
    })
}

pub fn current_set_index(obj: &Value) -> Option<i64> {
    SET_INDEX_KEYS
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(as_number)
        .map(|n| n as i64)
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

pub fn odds(obj: &Value) -> BTreeMap<OddsMarket, OddsPair> {
    let mut out = BTreeMap::new();
    let Some(source) = first_present(obj, &["markets", "odds"]) else {
        return out;
    };

    let by_key: HashMap<String, &Value> = match source {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(list) => {
            let mut keyed = HashMap::new();
            for market in list {
                if let Some(key) = first_present(market, &["type", "name"]).and_then(as_text) {
                    keyed.entry(key).or_insert(market);
                }
            }
            keyed
        }
        _ => return out,
    };

    for market in OddsMarket::ALL {
        let pair = market
            .source_keys()
            .iter()
            .filter_map(|k| by_key.get(*k))
            .map(|v| odds_pair(v))
            .find(|p| p.p1.is_some() || p.p2.is_some());
        if let Some(pair) = pair {
            out.insert(market, pair);
        }
    }
    out
}

fn odds_pair(v: &Value) -> OddsPair {
    OddsPair {
        p1: ["p1", "home"].iter().filter_map(|k| v.get(*k)).find_map(as_number),
        p2: ["p2", "away"].iter().filter_map(|k| v.get(*k)).find_map(as_number),
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

pub fn last_update_ts(obj: &Value) -> Option<f64> {
    first_present(obj, TIMESTAMP_KEYS).and_then(parse_timestamp)
}

/// Unix seconds from a number, a numeric string or an ISO-8601 string.
pub fn parse_timestamp(v: &Value) -> Option<f64> {
    if let Some(n) = as_number(v) {
        return Some(if n > MILLIS_THRESHOLD { n / 1000.0 } else { n });
    }
    let s = v.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9);
    }
    // No offset given: the feed reports UTC.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| {
            let dt = naive.and_utc();
            dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
        })
}
