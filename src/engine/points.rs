//! Points rule for a single prediction.
//!
//! A correct win call (home or away) is worth 3 points, a correct draw call 1
//! point, anything else 0. The value is absolute, so applying it twice to the
//! same prediction yields the same number.

use crate::db::models::Outcome;

pub const WIN_POINTS: i64 = 3;
pub const DRAW_POINTS: i64 = 1;

/// Award for predicting `choice` when the match ended with `result`.
pub fn award_points(choice: Outcome, result: Outcome) -> i64 {
    if choice != result {
        return 0;
    }
    match result {
        Outcome::Draw => DRAW_POINTS,
        Outcome::HomeWin | Outcome::AwayWin => WIN_POINTS,
    }
}
