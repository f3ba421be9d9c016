use serde::{Deserialize, Serialize};

use crate::db::models::StandingRow;

/// One leaderboard line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Competition rank: equal totals share a rank, the next rank skips (1, 1, 3)
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub total_score: i64,
}

/// Order standings and assign ranks.
///
/// Sorting is total: score descending, then username, then user id, so the
/// output is identical across calls on unchanged data regardless of the input
/// order.
pub fn rank_standings(mut rows: Vec<StandingRow>) -> Vec<LeaderboardEntry> {
    rows.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.username.cmp(&b.username))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let mut entries = Vec::with_capacity(rows.len());
    let mut prev_score: Option<i64> = None;
    let mut rank = 0usize;
    for (idx, row) in rows.into_iter().enumerate() {
        if prev_score != Some(row.total_score) {
            rank = idx + 1;
            prev_score = Some(row.total_score);
        }
        entries.push(LeaderboardEntry {
            rank,
            user_id: row.user_id,
            username: row.username,
            total_score: row.total_score,
        });
    }
    entries
}
