use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub mod models;
use models::*;

use crate::error::{Error, Result};

/// Thread-safe SQLite handle (single connection with mutex).
///
/// Every multi-row operation runs inside one transaction while the mutex is
/// held, so admission, scoring and ingestion never interleave.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    /// Fresh private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Poisoned)
    }

    // ── Users ─────────────────────────────────────────────────────────────────

    /// Register an identity on first sight; refresh name and role afterwards.
    /// The stored total score is never touched here.
    pub fn upsert_user(&self, id: &str, username: &str, role: Role) -> Result<User> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, role, total_score, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(id) DO UPDATE SET
                username=excluded.username,
                role=excluded.role",
            params![id, username, role, Utc::now()],
        )?;
        let user = conn.query_row(
            "SELECT id, username, role, total_score FROM users WHERE id=?1",
            params![id],
            map_user,
        )?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, username, role, total_score FROM users WHERE id=?1",
                params![id],
                map_user,
            )
            .optional()?;
        Ok(user)
    }

    // ── Matches ───────────────────────────────────────────────────────────────

    /// Upsert a batch of matches by `match_id` in a single transaction.
    /// Returns `(created, updated)`.
    ///
    /// An incoming FINISHED match without a winner keeps any result already
    /// stored; an incoming unfinished status always clears the result.
    /// Once a match has locked predictions its stored status and result are
    /// frozen: a different winner or an unfinished status from the source is
    /// ignored for those two fields.
    pub fn upsert_matches(&self, matches: &[MatchUpsert]) -> Result<(usize, usize)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut created = 0usize;
        let mut updated = 0usize;

        for m in matches {
            let existing = find_match(&tx, &m.match_id)?;
            let (status, result) = match existing.as_ref().and_then(|e| e.result) {
                Some(scored) if count_locked(&tx, &m.match_id)? > 0 => {
                    if m.status != MatchStatus::Finished || m.result.is_some_and(|r| r != scored)
                    {
                        warn!(
                            match_id = %m.match_id,
                            incoming_status = %m.status,
                            incoming_result = ?m.result,
                            stored_result = %scored,
                            "ignoring status/result change for already scored match"
                        );
                    }
                    (MatchStatus::Finished, Some(scored))
                }
                _ => (m.status, m.result),
            };

            tx.execute(
                "INSERT INTO matches (match_id, home_team, away_team, match_date, status,
                                      home_score, away_score, result, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?9)
                 ON CONFLICT(match_id) DO UPDATE SET
                    home_team=excluded.home_team,
                    away_team=excluded.away_team,
                    match_date=excluded.match_date,
                    status=excluded.status,
                    home_score=excluded.home_score,
                    away_score=excluded.away_score,
                    result=CASE WHEN excluded.status='FINISHED'
                                THEN COALESCE(excluded.result, matches.result)
                                ELSE NULL END,
                    updated_at=excluded.updated_at",
                params![
                    m.match_id,
                    m.home_team,
                    m.away_team,
                    m.match_date,
                    status,
                    m.score.home,
                    m.score.away,
                    result,
                    now,
                ],
            )?;

            if existing.is_some() {
                updated += 1;
            } else {
                created += 1;
            }
        }

        tx.commit()?;
        Ok((created, updated))
    }

    pub fn get_match(&self, match_id: &str) -> Result<Option<Match>> {
        let conn = self.conn()?;
        Ok(find_match(&conn, match_id)?)
    }

    /// All matches, earliest kickoff first
    pub fn list_matches(&self) -> Result<Vec<Match>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches m ORDER BY m.match_date ASC, m.match_id ASC"
        ))?;
        let matches = stmt
            .query_map([], map_match)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(matches)
    }

    /// Record the authoritative result and close the match.
    ///
    /// Re-setting the same result is allowed. Changing the result after any
    /// prediction has been locked under the old one is rejected, since the
    /// awarded points could no longer be reconciled.
    pub fn set_match_result(&self, match_id: &str, result: Outcome) -> Result<Match> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = find_match(&tx, match_id)?.ok_or_else(|| Error::match_not_found(match_id))?;

        if let Some(previous) = existing.result {
            if previous != result && count_locked(&tx, match_id)? > 0 {
                return Err(Error::InvalidState(format!(
                    "match '{}' was already scored as {}; cannot change result to {}",
                    match_id, previous, result
                )));
            }
        }

        tx.execute(
            "UPDATE matches SET result=?1, status=?2, updated_at=?3 WHERE match_id=?4",
            params![result, MatchStatus::Finished, Utc::now(), match_id],
        )?;
        let updated = find_match(&tx, match_id)?.ok_or_else(|| Error::match_not_found(match_id))?;
        tx.commit()?;
        Ok(updated)
    }

    // ── Predictions ───────────────────────────────────────────────────────────

    /// Create or overwrite the (user, match) prediction.
    ///
    /// `admit` is evaluated against the match inside the same transaction as
    /// the write. The upsert itself only touches an unlocked row, so a locked
    /// prediction can never be reopened.
    pub fn upsert_prediction<F>(
        &self,
        user_id: &str,
        match_id: &str,
        choice: Outcome,
        admit: F,
    ) -> Result<Prediction>
    where
        F: FnOnce(&Match) -> Result<()>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let m = find_match(&tx, match_id)?.ok_or_else(|| Error::match_not_found(match_id))?;
        admit(&m)?;

        let user_known = tx
            .query_row("SELECT 1 FROM users WHERE id=?1", params![user_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !user_known {
            return Err(Error::NotFound(format!("user '{}' not found", user_id)));
        }

        let now = Utc::now();
        let changed = tx.execute(
            "INSERT INTO predictions (user_id, match_id, prediction, points, is_locked,
                                      created_at, updated_at)
             VALUES (?1,?2,?3,0,0,?4,?4)
             ON CONFLICT(user_id, match_id) DO UPDATE SET
                prediction=excluded.prediction,
                is_locked=0,
                updated_at=excluded.updated_at
             WHERE predictions.is_locked=0",
            params![user_id, match_id, choice, now],
        )?;
        if changed == 0 {
            return Err(Error::InvalidState(format!(
                "prediction for match '{}' is locked",
                match_id
            )));
        }

        let prediction = tx
            .query_row(
                "SELECT id, user_id, match_id, prediction, points, is_locked, created_at, updated_at
                 FROM predictions WHERE user_id=?1 AND match_id=?2",
                params![user_id, match_id],
                map_prediction,
            )
            .optional()?
            .ok_or_else(|| {
                Error::Conflict(format!(
                    "prediction for match '{}' vanished during upsert",
                    match_id
                ))
            })?;
        tx.commit()?;
        Ok(prediction)
    }

    /// A user's predictions joined with their matches, earliest kickoff first
    pub fn list_predictions_for_user(&self, user_id: &str) -> Result<Vec<PredictionWithMatch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT p.id, p.user_id, p.match_id, p.prediction, p.points, p.is_locked,
                    p.created_at, p.updated_at, {MATCH_COLUMNS}
             FROM predictions p
             JOIN matches m ON m.match_id = p.match_id
             WHERE p.user_id=?1
             ORDER BY m.match_date ASC, m.match_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(PredictionWithMatch {
                    prediction: map_prediction(row)?,
                    match_: map_match_at(row, PREDICTION_COLUMN_COUNT)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_predictions_for_match(&self, match_id: &str) -> Result<Vec<Prediction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, match_id, prediction, points, is_locked, created_at, updated_at
             FROM predictions WHERE match_id=?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![match_id], map_prediction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Scoring ───────────────────────────────────────────────────────────────

    /// Lock and score every unlocked prediction for a finished match.
    ///
    /// Each lock is a conditional update on `is_locked=0`, and the owner's
    /// total is incremented in SQL only when that update took effect. The
    /// whole pass commits as one transaction.
    pub fn score_match<F>(&self, match_id: &str, award: F) -> Result<ScoreResult>
    where
        F: Fn(Outcome, Outcome) -> i64,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let m = find_match(&tx, match_id)?.ok_or_else(|| Error::match_not_found(match_id))?;
        let result = m.result.ok_or_else(|| {
            Error::InvalidState(format!("result not available for match '{}'", match_id))
        })?;

        let pending: Vec<(i64, String, Outcome, bool)> = {
            let mut stmt = tx.prepare(
                "SELECT id, user_id, prediction, is_locked FROM predictions
                 WHERE match_id=?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![match_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let now = Utc::now();
        let mut scored = 0usize;
        let mut skipped = 0usize;
        let mut points_awarded = 0i64;

        for (id, user_id, choice, is_locked) in pending {
            if is_locked {
                skipped += 1;
                continue;
            }
            let points = award(choice, result);
            let locked = tx.execute(
                "UPDATE predictions SET points=?1, is_locked=1, updated_at=?2
                 WHERE id=?3 AND is_locked=0",
                params![points, now, id],
            )?;
            if locked == 0 {
                skipped += 1;
                continue;
            }
            tx.execute(
                "UPDATE users SET total_score = total_score + ?1 WHERE id=?2",
                params![points, user_id],
            )?;
            debug!(match_id, user_id = %user_id, points, "prediction scored");
            scored += 1;
            points_awarded += points;
        }

        tx.commit()?;
        Ok(ScoreResult {
            match_id: match_id.to_string(),
            result,
            scored,
            skipped,
            points_awarded,
        })
    }

    // ── Standings ─────────────────────────────────────────────────────────────

    /// Users by total score descending; ties by username then id.
    pub fn standings(&self) -> Result<Vec<StandingRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, username, total_score FROM users
             ORDER BY total_score DESC, username ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StandingRow {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    total_score: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Users whose stored total differs from the sum over locked predictions.
    pub fn audit_totals(&self) -> Result<Vec<TotalsDiscrepancy>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.username, u.total_score, COALESCE(SUM(p.points), 0) AS recomputed
             FROM users u
             LEFT JOIN predictions p ON p.user_id = u.id AND p.is_locked = 1
             GROUP BY u.id, u.username, u.total_score
             HAVING u.total_score != COALESCE(SUM(p.points), 0)
             ORDER BY u.username ASC, u.id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TotalsDiscrepancy {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    stored_total: row.get(2)?,
                    recomputed_total: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Rewrite every drifted total from locked prediction points.
    /// Returns the number of users corrected.
    pub fn rebuild_totals(&self) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET total_score = (
                SELECT COALESCE(SUM(points), 0) FROM predictions
                WHERE predictions.user_id = users.id AND predictions.is_locked = 1
             )
             WHERE total_score != (
                SELECT COALESCE(SUM(points), 0) FROM predictions
                WHERE predictions.user_id = users.id AND predictions.is_locked = 1
             )",
            [],
        )?;
        Ok(changed)
    }

    #[cfg(test)]
    pub(crate) fn force_total_score(&self, user_id: &str, total: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET total_score=?1 WHERE id=?2",
            params![total, user_id],
        )?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const MATCH_COLUMNS: &str = "m.match_id, m.home_team, m.away_team, m.match_date, m.status,
    m.home_score, m.away_score, m.result, m.created_at, m.updated_at";

const PREDICTION_COLUMN_COUNT: usize = 8;

fn find_match(conn: &Connection, match_id: &str) -> rusqlite::Result<Option<Match>> {
    conn.query_row(
        &format!("SELECT {MATCH_COLUMNS} FROM matches m WHERE m.match_id=?1"),
        params![match_id],
        map_match,
    )
    .optional()
}

fn count_locked(tx: &Transaction<'_>, match_id: &str) -> rusqlite::Result<i64> {
    tx.query_row(
        "SELECT COUNT(*) FROM predictions WHERE match_id=?1 AND is_locked=1",
        params![match_id],
        |row| row.get(0),
    )
}

fn map_match(row: &rusqlite::Row) -> rusqlite::Result<Match> {
    map_match_at(row, 0)
}

fn map_match_at(row: &rusqlite::Row, base: usize) -> rusqlite::Result<Match> {
    let match_date: DateTime<Utc> = row.get(base + 3)?;
    Ok(Match {
        match_id: row.get(base)?,
        home_team: row.get(base + 1)?,
        away_team: row.get(base + 2)?,
        match_date,
        status: row.get(base + 4)?,
        score: Score {
            home: row.get(base + 5)?,
            away: row.get(base + 6)?,
        },
        result: row.get(base + 7)?,
        created_at: row.get(base + 8)?,
        updated_at: row.get(base + 9)?,
    })
}

fn map_prediction(row: &rusqlite::Row) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        match_id: row.get(2)?,
        prediction: row.get(3)?,
        points: row.get(4)?,
        is_locked: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        role: row.get(2)?,
        total_score: row.get(3)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT    PRIMARY KEY,
    username    TEXT    NOT NULL,
    role        TEXT    NOT NULL DEFAULT 'user',
    total_score INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    match_id    TEXT    PRIMARY KEY,
    home_team   TEXT    NOT NULL,
    away_team   TEXT    NOT NULL,
    match_date  TEXT    NOT NULL,
    status      TEXT    NOT NULL DEFAULT 'SCHEDULED'
                CHECK (status IN ('SCHEDULED', 'LIVE', 'FINISHED')),
    home_score  INTEGER NOT NULL DEFAULT 0 CHECK (home_score >= 0),
    away_score  INTEGER NOT NULL DEFAULT 0 CHECK (away_score >= 0),
    result      TEXT    CHECK (result IN ('HOME_WIN', 'AWAY_WIN', 'DRAW')),
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL,
    CHECK (result IS NULL OR status = 'FINISHED')
);

CREATE TABLE IF NOT EXISTS predictions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT    NOT NULL,
    match_id    TEXT    NOT NULL,
    prediction  TEXT    NOT NULL CHECK (prediction IN ('HOME_WIN', 'AWAY_WIN', 'DRAW')),
    points      INTEGER NOT NULL DEFAULT 0,
    is_locked   INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT    NOT NULL,
    updated_at  TEXT    NOT NULL,
    UNIQUE (user_id, match_id),
    FOREIGN KEY (user_id)  REFERENCES users(id),
    FOREIGN KEY (match_id) REFERENCES matches(match_id)
);

CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date);
CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_id);
CREATE INDEX IF NOT EXISTS idx_users_score ON users(total_score DESC, username ASC);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fixture(id: &str, status: MatchStatus, result: Option<Outcome>) -> MatchUpsert {
        MatchUpsert {
            match_id: id.into(),
            home_team: "Real Madrid".into(),
            away_team: "Bayern".into(),
            match_date: Utc::now() + Duration::days(1),
            status,
            score: Score::default(),
            result,
        }
    }

    fn admit_all(_: &Match) -> Result<()> {
        Ok(())
    }

    fn three_or_one(choice: Outcome, result: Outcome) -> i64 {
        match (choice == result, result) {
            (true, Outcome::Draw) => 1,
            (true, _) => 3,
            (false, _) => 0,
        }
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user("a", "alice", Role::User).unwrap();
        db.upsert_user("b", "bob", Role::User).unwrap();
        db.upsert_matches(&[fixture("M1", MatchStatus::Scheduled, None)])
            .unwrap();
        db
    }

    #[test]
    fn upsert_matches_counts_created_and_updated() {
        let db = Database::open_in_memory().unwrap();
        let (c, u) = db
            .upsert_matches(&[
                fixture("M1", MatchStatus::Scheduled, None),
                fixture("M2", MatchStatus::Scheduled, None),
            ])
            .unwrap();
        assert_eq!((c, u), (2, 0));

        let mut live = fixture("M1", MatchStatus::Live, None);
        live.score = Score { home: 1, away: 0 };
        let (c, u) = db.upsert_matches(&[live]).unwrap();
        assert_eq!((c, u), (0, 1));

        let m = db.get_match("M1").unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Live);
        assert_eq!(m.score, Score { home: 1, away: 0 });
        assert_eq!(db.list_matches().unwrap().len(), 2);
    }

    #[test]
    fn list_matches_is_ordered_by_kickoff() {
        let db = Database::open_in_memory().unwrap();
        let mut late = fixture("LATE", MatchStatus::Scheduled, None);
        late.match_date = Utc::now() + Duration::days(5);
        let mut early = fixture("EARLY", MatchStatus::Scheduled, None);
        early.match_date = Utc::now() + Duration::days(2);
        db.upsert_matches(&[late, early]).unwrap();

        let ids: Vec<String> = db
            .list_matches()
            .unwrap()
            .into_iter()
            .map(|m| m.match_id)
            .collect();
        assert_eq!(ids, vec!["EARLY", "LATE"]);
    }

    #[test]
    fn finished_without_winner_keeps_existing_result() {
        let db = seeded();
        db.set_match_result("M1", Outcome::AwayWin).unwrap();

        db.upsert_matches(&[fixture("M1", MatchStatus::Finished, None)])
            .unwrap();
        let m = db.get_match("M1").unwrap().unwrap();
        assert_eq!(m.result, Some(Outcome::AwayWin));
    }

    #[test]
    fn unfinished_status_clears_result() {
        let db = seeded();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();

        db.upsert_matches(&[fixture("M1", MatchStatus::Scheduled, None)])
            .unwrap();
        let m = db.get_match("M1").unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Scheduled);
        assert_eq!(m.result, None);
    }

    #[test]
    fn resync_with_different_winner_keeps_scored_result() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();
        db.score_match("M1", three_or_one).unwrap();

        let mut corrected = fixture("M1", MatchStatus::Finished, Some(Outcome::AwayWin));
        corrected.score = Score { home: 0, away: 2 };
        let (c, u) = db.upsert_matches(&[corrected]).unwrap();
        assert_eq!((c, u), (0, 1));

        let m = db.get_match("M1").unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Finished);
        assert_eq!(m.result, Some(Outcome::HomeWin));
        // Non-result fields still follow the source.
        assert_eq!(m.score, Score { home: 0, away: 2 });

        let p = &db.list_predictions_for_match("M1").unwrap()[0];
        assert_eq!(p.points, three_or_one(p.prediction, Outcome::HomeWin));
        assert!(db.audit_totals().unwrap().is_empty());
    }

    #[test]
    fn resync_to_unfinished_keeps_scored_match_closed() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();
        db.score_match("M1", three_or_one).unwrap();

        db.upsert_matches(&[fixture("M1", MatchStatus::Scheduled, None)])
            .unwrap();
        let m = db.get_match("M1").unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Finished);
        assert_eq!(m.result, Some(Outcome::HomeWin));

        // A new user still cannot get in on a match that was already scored.
        let err = db
            .upsert_prediction("b", "M1", Outcome::HomeWin, |m| {
                crate::engine::admission::check_admission(m, Utc::now(), false)
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn unknown_stored_role_is_an_error() {
        let db = seeded();
        db.conn()
            .unwrap()
            .execute("UPDATE users SET role='root' WHERE id='a'", [])
            .unwrap();
        assert!(db.get_user("a").is_err());
        assert!(db.get_user("b").unwrap().is_some());
    }

    #[test]
    fn schema_rejects_result_on_unfinished_match() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .upsert_matches(&[fixture("M1", MatchStatus::Live, Some(Outcome::HomeWin))])
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(db.get_match("M1").unwrap().is_none());
    }

    #[test]
    fn failed_batch_leaves_registry_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let err = db.upsert_matches(&[
            fixture("OK", MatchStatus::Scheduled, None),
            fixture("BAD", MatchStatus::Scheduled, Some(Outcome::Draw)),
        ]);
        assert!(err.is_err());
        assert!(db.list_matches().unwrap().is_empty());
    }

    #[test]
    fn resubmission_overwrites_single_row() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        let p = db
            .upsert_prediction("a", "M1", Outcome::Draw, admit_all)
            .unwrap();
        assert_eq!(p.prediction, Outcome::Draw);
        assert_eq!(p.points, 0);
        assert!(!p.is_locked);

        let all = db.list_predictions_for_match("M1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].prediction, Outcome::Draw);
    }

    #[test]
    fn admission_check_runs_before_write() {
        let db = seeded();
        let err = db
            .upsert_prediction("a", "M1", Outcome::Draw, |_| {
                Err(Error::InvalidState("closed".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(db.list_predictions_for_match("M1").unwrap().is_empty());
    }

    #[test]
    fn unknown_match_and_user_are_not_found() {
        let db = seeded();
        let err = db
            .upsert_prediction("a", "NOPE", Outcome::Draw, admit_all)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = db
            .upsert_prediction("ghost", "M1", Outcome::Draw, admit_all)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn scoring_requires_result() {
        let db = seeded();
        let err = db.score_match("M1", three_or_one).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let err = db.score_match("NOPE", three_or_one).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn scoring_locks_and_increments_once() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        db.upsert_prediction("b", "M1", Outcome::Draw, admit_all)
            .unwrap();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();

        let first = db.score_match("M1", three_or_one).unwrap();
        assert_eq!(first.scored, 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.points_awarded, 3);

        let second = db.score_match("M1", three_or_one).unwrap();
        assert_eq!(second.scored, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.points_awarded, 0);

        assert_eq!(db.get_user("a").unwrap().unwrap().total_score, 3);
        assert_eq!(db.get_user("b").unwrap().unwrap().total_score, 0);
        assert!(db
            .list_predictions_for_match("M1")
            .unwrap()
            .iter()
            .all(|p| p.is_locked));
        assert!(db.audit_totals().unwrap().is_empty());
    }

    #[test]
    fn locked_prediction_cannot_be_reopened() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();
        db.score_match("M1", three_or_one).unwrap();

        let err = db
            .upsert_prediction("a", "M1", Outcome::Draw, admit_all)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        let p = &db.list_predictions_for_match("M1").unwrap()[0];
        assert_eq!(p.prediction, Outcome::HomeWin);
        assert_eq!(p.points, 3);
    }

    #[test]
    fn changing_a_scored_result_is_rejected() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();
        db.score_match("M1", three_or_one).unwrap();

        let err = db.set_match_result("M1", Outcome::Draw).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        // Same result again is fine.
        db.set_match_result("M1", Outcome::HomeWin).unwrap();
    }

    #[test]
    fn audit_detects_and_rebuild_repairs_drift() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::HomeWin, admit_all)
            .unwrap();
        db.set_match_result("M1", Outcome::HomeWin).unwrap();
        db.score_match("M1", three_or_one).unwrap();
        db.force_total_score("a", 10).unwrap();
        db.force_total_score("b", -2).unwrap();

        let drift = db.audit_totals().unwrap();
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].username, "alice");
        assert_eq!(drift[0].stored_total, 10);
        assert_eq!(drift[0].recomputed_total, 3);

        assert_eq!(db.rebuild_totals().unwrap(), 2);
        assert!(db.audit_totals().unwrap().is_empty());
        assert_eq!(db.get_user("a").unwrap().unwrap().total_score, 3);
        assert_eq!(db.get_user("b").unwrap().unwrap().total_score, 0);
    }

    #[test]
    fn upsert_user_preserves_total() {
        let db = seeded();
        db.force_total_score("a", 7).unwrap();
        let u = db.upsert_user("a", "alice2", Role::Admin).unwrap();
        assert_eq!(u.username, "alice2");
        assert_eq!(u.role, Role::Admin);
        assert_eq!(u.total_score, 7);
    }

    #[test]
    fn standings_break_ties_by_username() {
        let db = seeded();
        db.upsert_user("c", "aaron", Role::User).unwrap();
        db.force_total_score("b", 3).unwrap();
        let names: Vec<String> = db
            .standings()
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, vec!["bob", "aaron", "alice"]);
    }

    #[test]
    fn predictions_for_user_join_match() {
        let db = seeded();
        db.upsert_prediction("a", "M1", Outcome::AwayWin, admit_all)
            .unwrap();
        let rows = db.list_predictions_for_user("a").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].prediction.prediction, Outcome::AwayWin);
        assert_eq!(rows[0].match_.match_id, "M1");
        assert_eq!(rows[0].match_.home_team, "Real Madrid");
        assert!(db.list_predictions_for_user("b").unwrap().is_empty());
    }

    #[test]
    fn concurrent_scoring_never_double_awards() {
        let db = seeded();
        for i in 0..20 {
            let id = format!("u{}", i);
            db.upsert_user(&id, &id, Role::User).unwrap();
            db.upsert_prediction(&id, "M1", Outcome::AwayWin, admit_all)
                .unwrap();
        }
        db.set_match_result("M1", Outcome::AwayWin).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.score_match("M1", three_or_one).unwrap())
            })
            .collect();
        let total_scored: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap().scored)
            .sum();

        assert_eq!(total_scored, 20);
        for i in 0..20 {
            let u = db.get_user(&format!("u{}", i)).unwrap().unwrap();
            assert_eq!(u.total_score, 3);
        }
        assert!(db.audit_totals().unwrap().is_empty());
    }

    #[test]
    fn concurrent_resubmission_keeps_one_row() {
        let db = seeded();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    let choice = if i % 2 == 0 { Outcome::Draw } else { Outcome::HomeWin };
                    db.upsert_prediction("a", "M1", choice, admit_all).unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(db.list_predictions_for_match("M1").unwrap().len(), 1);
    }
}
