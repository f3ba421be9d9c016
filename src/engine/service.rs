use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::models::{
    ExternalMatch, Match, Outcome, Prediction, PredictionWithMatch, ReconcileResult, Role,
    ScoreResult, TotalsDiscrepancy, User,
};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fixtures::{map_batch, FixtureSource};

use super::admission::check_admission;
use super::points::award_points;
use super::ranking::{rank_standings, LeaderboardEntry};

/// Prediction lifecycle and scoring, on top of the match registry and
/// prediction store.
#[derive(Clone)]
pub struct PredictionEngine {
    db: Database,
    source: Arc<dyn FixtureSource>,
    lock_at_kickoff: bool,
}

impl PredictionEngine {
    pub fn new(db: Database, source: Arc<dyn FixtureSource>, lock_at_kickoff: bool) -> Self {
        PredictionEngine {
            db,
            source,
            lock_at_kickoff,
        }
    }

    pub fn register_user(&self, id: &str, username: &str, role: Role) -> Result<User> {
        self.db.upsert_user(id, username, role)
    }

    pub fn list_matches(&self) -> Result<Vec<Match>> {
        self.db.list_matches()
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Pull the fixture list from the configured source and reconcile it.
    pub async fn sync_fixtures(&self) -> Result<ReconcileResult> {
        let name = self.source.name().to_string();
        let batch = self.source.fetch_fixtures().await.map_err(|e| {
            warn!("Fixture source '{}' failed: {:#}", name, e);
            Error::UpstreamFailure(format!("{}: {:#}", name, e))
        })?;
        self.reconcile(&name, &batch)
    }

    /// Upsert a batch of external matches. The whole batch is mapped before
    /// anything is written, then applied atomically.
    pub fn reconcile(&self, source: &str, batch: &[ExternalMatch]) -> Result<ReconcileResult> {
        let mapped = map_batch(batch)?;
        let (created, updated) = self.db.upsert_matches(&mapped)?;
        info!(
            "Reconciled {} match(es) from {}: {} created, {} updated",
            mapped.len(),
            source,
            created,
            updated
        );
        Ok(ReconcileResult {
            source: source.to_string(),
            total: mapped.len(),
            created,
            updated,
        })
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    pub fn submit_prediction(
        &self,
        user_id: &str,
        match_id: &str,
        choice: Outcome,
    ) -> Result<Prediction> {
        let now = Utc::now();
        let lock_at_kickoff = self.lock_at_kickoff;
        self.db.upsert_prediction(user_id, match_id, choice, |m| {
            check_admission(m, now, lock_at_kickoff)
        })
    }

    pub fn predictions_for(&self, user_id: &str) -> Result<Vec<PredictionWithMatch>> {
        self.db.list_predictions_for_user(user_id)
    }

    // ── Results & scoring ─────────────────────────────────────────────────────

    /// Set the authoritative result, close the match and score it.
    pub fn set_result(&self, match_id: &str, result: Outcome) -> Result<(Match, ScoreResult)> {
        let updated = self.db.set_match_result(match_id, result)?;
        info!("Result for match {} set to {}", match_id, result);
        let scoring = self.score(match_id)?;
        Ok((updated, scoring))
    }

    /// Scoring pass for one match. Already-locked predictions are skipped, so
    /// repeated calls never change any total.
    pub fn score(&self, match_id: &str) -> Result<ScoreResult> {
        let outcome = self.db.score_match(match_id, award_points)?;
        info!(
            "Scored match {} ({}): {} locked, {} already locked, {} point(s) awarded",
            outcome.match_id,
            outcome.result,
            outcome.scored,
            outcome.skipped,
            outcome.points_awarded
        );
        Ok(outcome)
    }

    // ── Leaderboard ───────────────────────────────────────────────────────────

    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        Ok(rank_standings(self.db.standings()?))
    }

    pub fn audit_totals(&self) -> Result<Vec<TotalsDiscrepancy>> {
        let drift = self.db.audit_totals()?;
        if !drift.is_empty() {
            warn!("{} user total(s) disagree with locked prediction points", drift.len());
        }
        Ok(drift)
    }

    pub fn rebuild_totals(&self) -> Result<usize> {
        let fixed = self.db.rebuild_totals()?;
        info!("Rebuilt total score for {} user(s)", fixed);
        Ok(fixed)
    }
}
