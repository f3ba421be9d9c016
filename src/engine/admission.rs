use chrono::{DateTime, Utc};

use crate::db::models::{Match, MatchStatus};
use crate::error::{Error, Result};

/// Decide whether a prediction may be created or changed for `m` at `now`.
///
/// Only SCHEDULED matches accept predictions. With `lock_at_kickoff` set, the
/// kickoff instant closes admission even if ingestion has not yet moved the
/// match to LIVE.
pub fn check_admission(m: &Match, now: DateTime<Utc>, lock_at_kickoff: bool) -> Result<()> {
    if m.status != MatchStatus::Scheduled {
        return Err(Error::InvalidState(format!(
            "cannot predict after kickoff: match '{}' is {}",
            m.match_id, m.status
        )));
    }
    if lock_at_kickoff && now >= m.match_date {
        return Err(Error::InvalidState(format!(
            "cannot predict after kickoff: match '{}' kicked off at {}",
            m.match_id,
            m.match_date.to_rfc3339()
        )));
    }
    Ok(())
}
