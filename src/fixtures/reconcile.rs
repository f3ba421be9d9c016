use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::models::{ExternalMatch, MatchStatus, MatchUpsert, Outcome, Score};
use crate::error::{Error, Result};

const UNKNOWN_TEAM: &str = "TBD";

/// Map the provider's status vocabulary onto the three internal statuses.
/// Returns `None` for anything unrecognised.
pub fn map_status(raw: &str) -> Option<MatchStatus> {
    match raw.trim().to_uppercase().as_str() {
        "SCHEDULED" | "TIMED" | "POSTPONED" => Some(MatchStatus::Scheduled),
        "IN_PLAY" | "PAUSED" | "LIVE" | "SUSPENDED" => Some(MatchStatus::Live),
        "FINISHED" | "AWARDED" | "CANCELLED" => Some(MatchStatus::Finished),
        _ => None,
    }
}

/// Map the provider's winner marker onto an outcome. Anything other than a
/// definitive marker leaves the result unset.
pub fn map_winner(raw: Option<&str>) -> Option<Outcome> {
    match raw.map(|w| w.trim().to_uppercase()).as_deref() {
        Some("HOME_TEAM") => Some(Outcome::HomeWin),
        Some("AWAY_TEAM") => Some(Outcome::AwayWin),
        Some("DRAW") => Some(Outcome::Draw),
        _ => None,
    }
}

fn map_goals(ext_id: &str, side: &str, raw: Option<i64>) -> Result<u32> {
    match raw {
        None => {
            debug!(match_id = ext_id, side, "score missing, defaulting to 0");
            Ok(0)
        }
        Some(v) => u32::try_from(v).map_err(|_| {
            Error::UpstreamFailure(format!("match {}: invalid {} score {}", ext_id, side, v))
        }),
    }
}

fn map_team(ext_id: &str, side: &str, raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            debug!(match_id = ext_id, side, "team name missing, using placeholder");
            UNKNOWN_TEAM.to_string()
        }
    }
}

/// Map one external record onto the internal schema.
pub fn to_upsert(ext: &ExternalMatch) -> Result<MatchUpsert> {
    let match_id = ext.id.trim();
    if match_id.is_empty() {
        return Err(Error::UpstreamFailure("match without identifier".into()));
    }

    let match_date = DateTime::parse_from_rfc3339(ext.utc_date.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            Error::UpstreamFailure(format!(
                "match {}: invalid kickoff '{}': {}",
                match_id, ext.utc_date, e
            ))
        })?;

    let status = map_status(&ext.status).ok_or_else(|| {
        Error::UpstreamFailure(format!(
            "match {}: unknown status '{}'",
            match_id, ext.status
        ))
    })?;

    let score = Score {
        home: map_goals(match_id, "home", ext.home_score)?,
        away: map_goals(match_id, "away", ext.away_score)?,
    };

    let winner = map_winner(ext.winner.as_deref());
    let result = if status == MatchStatus::Finished {
        winner
    } else {
        if winner.is_some() {
            debug!(match_id, %status, "ignoring winner marker on unfinished match");
        }
        None
    };

    Ok(MatchUpsert {
        match_id: match_id.to_string(),
        home_team: map_team(match_id, "home", ext.home_team.as_deref()),
        away_team: map_team(match_id, "away", ext.away_team.as_deref()),
        match_date,
        status,
        score,
        result,
    })
}

/// Map a whole batch; the first malformed record fails the batch.
pub fn map_batch(batch: &[ExternalMatch]) -> Result<Vec<MatchUpsert>> {
    batch.iter().map(to_upsert).collect()
}
