use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

/// A match outcome, used both as a user's pick and as the authoritative result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    HomeWin,
    AwayWin,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "SCHEDULED",
            MatchStatus::Live => "LIVE",
            MatchStatus::Finished => "FINISHED",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(MatchStatus::Scheduled),
            "LIVE" => Ok(MatchStatus::Live),
            "FINISHED" => Ok(MatchStatus::Finished),
            other => Err(ParseEnumError {
                kind: "match status",
                value: other.to_string(),
            }),
        }
    }
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::HomeWin => "HOME_WIN",
            Outcome::AwayWin => "AWAY_WIN",
            Outcome::Draw => "DRAW",
        }
    }
}

impl FromStr for Outcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOME_WIN" => Ok(Outcome::HomeWin),
            "AWAY_WIN" => Ok(Outcome::AwayWin),
            "DRAW" => Ok(Outcome::Draw),
            other => Err(ParseEnumError {
                kind: "outcome",
                value: other.to_string(),
            }),
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Lenient parse used for identities forwarded by the auth gateway:
    /// anything that is not exactly `admin` is an ordinary user.
    pub fn from_header(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::User
        }
    }
}

/// Strict parse of the stored role column.
impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(ParseEnumError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── SQLite conversions ────────────────────────────────────────────────────────

impl ToSql for MatchStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MatchStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Outcome {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Outcome {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

/// A canonical match record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// Stable external identifier from the fixture provider
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    /// Scheduled kickoff
    pub match_date: DateTime<Utc>,
    pub status: MatchStatus,
    pub score: Score,
    /// Only ever set while `status == Finished`
    pub result: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fully mapped match data ready to be upserted by `match_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchUpsert {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub match_date: DateTime<Utc>,
    pub status: MatchStatus,
    pub score: Score,
    pub result: Option<Outcome>,
}

/// One user's pick for one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: i64,
    pub user_id: String,
    pub match_id: String,
    pub prediction: Outcome,
    /// Written only by the scoring pass
    pub points: i64,
    /// Set once, when the prediction is scored
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A prediction joined with the match it refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionWithMatch {
    #[serde(flatten)]
    pub prediction: Prediction,
    #[serde(rename = "match")]
    pub match_: Match,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
    /// Sum of points over this user's locked predictions
    pub total_score: i64,
}

/// Raw standings row, before ranks are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingRow {
    pub user_id: String,
    pub username: String,
    pub total_score: i64,
}

/// Outcome of one scoring pass over a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub match_id: String,
    pub result: Outcome,
    /// Predictions locked by this pass
    pub scored: usize,
    /// Predictions already locked by an earlier pass
    pub skipped: usize,
    pub points_awarded: i64,
}

/// Outcome of reconciling a batch of external matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub source: String,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
}

/// A user whose stored total disagrees with the recomputed sum of points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsDiscrepancy {
    pub user_id: String,
    pub username: String,
    pub stored_total: i64,
    pub recomputed_total: i64,
}

/// Raw fixture as delivered by the ingestion source, before mapping onto the
/// internal schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMatch {
    /// Provider's match identifier, numeric or string on the wire
    #[serde(deserialize_with = "provider_id")]
    pub id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    /// Kickoff as an RFC 3339 string
    pub utc_date: String,
    /// Provider status vocabulary, e.g. "TIMED", "IN_PLAY", "FINISHED"
    pub status: String,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    /// "HOME_TEAM" | "AWAY_TEAM" | "DRAW" when decided
    pub winner: Option<String>,
}

/// Providers disagree on whether ids are numbers or strings; store both as
/// text so the upsert key is the same either way.
fn provider_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
