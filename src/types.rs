use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_P1: &str = "Player 1";
pub const DEFAULT_P2: &str = "Player 2";

// ---------------------------------------------------------------------------
// Canonical event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    pub p1: String,
    pub p2: String,
}

impl Default for Players {
    fn default() -> Self {
        Self {
            p1: DEFAULT_P1.to_string(),
            p2: DEFAULT_P2.to_string(),
        }
    }
}

impl Players {
    pub fn is_default(&self) -> bool {
        self.p1 == DEFAULT_P1 && self.p2 == DEFAULT_P2
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Live,
    Paused,
    Finished,
    #[default]
    Unknown,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchStatus::Live => "live",
            MatchStatus::Paused => "paused",
            MatchStatus::Finished => "finished",
            MatchStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Scanner-side classification of a match. STALE and FINISHED are not terminal:
/// the next observation re-evaluates the field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStatus {
    #[default]
    Watch,
    Candidate,
    Signal,
    Stale,
    Finished,
}

impl LifecycleStatus {
    /// STALE and FINISHED matches do not count towards the active total.
    pub fn is_active(self) -> bool {
        !matches!(self, LifecycleStatus::Stale | LifecycleStatus::Finished)
    }

    pub fn from_status(status: MatchStatus) -> Self {
        match status {
            MatchStatus::Finished => LifecycleStatus::Finished,
            _ => LifecycleStatus::Watch,
        }
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleStatus::Watch => "WATCH",
            LifecycleStatus::Candidate => "CANDIDATE",
            LifecycleStatus::Signal => "SIGNAL",
            LifecycleStatus::Stale => "STALE",
            LifecycleStatus::Finished => "FINISHED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WATCH" => Ok(LifecycleStatus::Watch),
            "CANDIDATE" => Ok(LifecycleStatus::Candidate),
            "SIGNAL" => Ok(LifecycleStatus::Signal),
            "STALE" => Ok(LifecycleStatus::Stale),
            "FINISHED" => Ok(LifecycleStatus::Finished),
            other => Err(format!("unknown lifecycle status: {other}")),
        }
    }
}

/// The only odds markets carried on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsMarket {
    MatchWinner,
    SetWinnerCurrent,
    HandicapCurrentSet,
    TotalPointsCurrentSet,
}

impl OddsMarket {
    pub const ALL: [OddsMarket; 4] = [
        OddsMarket::MatchWinner,
        OddsMarket::SetWinnerCurrent,
        OddsMarket::HandicapCurrentSet,
        OddsMarket::TotalPointsCurrentSet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OddsMarket::MatchWinner => "match_winner",
            OddsMarket::SetWinnerCurrent => "set_winner_current",
            OddsMarket::HandicapCurrentSet => "handicap_current_set",
            OddsMarket::TotalPointsCurrentSet => "total_points_current_set",
        }
    }

    /// Source spellings accepted for this market, canonical name first.
    pub fn source_keys(self) -> &'static [&'static str] {
        match self {
            OddsMarket::MatchWinner => &["match_winner", "matchWinner"],
            OddsMarket::SetWinnerCurrent => &["set_winner_current", "setWinnerCurrent"],
            OddsMarket::HandicapCurrentSet => &["handicap_current_set", "handicapCurrentSet"],
            OddsMarket::TotalPointsCurrentSet => {
                &["total_points_current_set", "totalPointsCurrentSet"]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OddsPair {
    pub p1: Option<f64>,
    pub p2: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub match_id: String,
    pub players: Players,
    pub league: Option<String>,
    pub tour: Option<String>,
    pub status: MatchStatus,
    /// "p1:p2" sets won.
    pub score_sets: Option<String>,
    /// "p1:p2" points in the set being played.
    pub score_points_current_set: Option<String>,
    pub current_set_index: Option<i64>,
    #[serde(default)]
    pub odds: BTreeMap<OddsMarket, OddsPair>,
    /// Unix seconds.
    pub last_update_ts: Option<f64>,

    // Scanner-attached
    #[serde(default)]
    pub lifecycle_status: LifecycleStatus,
    pub last_seen: Option<f64>,
}

impl Event {
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            ..Self::default()
        }
    }

    /// Fill fields missing from a partial update with the previous observation.
    /// Feeds often push score-only or odds-only deltas for a match.
    pub fn absorb_previous(&mut self, prev: &Event) {
        if self.players.is_default() {
            self.players = prev.players.clone();
        }
        if self.league.is_none() {
            self.league = prev.league.clone();
        }
        if self.tour.is_none() {
            self.tour = prev.tour.clone();
        }
        if self.status == MatchStatus::Unknown {
            self.status = prev.status;
        }
        if self.score_sets.is_none() {
            self.score_sets = prev.score_sets.clone();
        }
        if self.score_points_current_set.is_none() {
            self.score_points_current_set = prev.score_points_current_set.clone();
        }
        if self.current_set_index.is_none() {
            self.current_set_index = prev.current_set_index;
        }
        for (market, pair) in &prev.odds {
            self.odds.entry(*market).or_insert(*pair);
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub match_id: String,
    pub reason: String,
    /// Stamped by the scanner when the signal actually fires.
    pub fired_at: Option<f64>,
}

impl Signal {
    pub fn new(match_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            reason: reason.into(),
            fired_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerStatus {
    WaitingLogin,
    Connected,
    Error,
}

impl std::fmt::Display for ScannerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScannerStatus::WaitingLogin => "waiting_login",
            ScannerStatus::Connected => "connected",
            ScannerStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Current wall-clock time as fractional unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
