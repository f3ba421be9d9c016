use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::provider::FixtureSource;
use crate::db::models::ExternalMatch;

/// Fixture source backed by the football-data.org v4 API.
/// Docs: <https://docs.football-data.org/general/v4/match.html>
pub struct FootballData {
    http: Client,
    api_key: Option<String>,
    /// Base URL for overriding in tests
    base_url: String,
    competition: String,
    stage: Option<String>,
}

impl FootballData {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        competition: &str,
        stage: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(FootballData {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            competition: competition.to_string(),
            stage,
        })
    }

    fn matches_url(&self) -> String {
        let mut url = format!(
            "{}/competitions/{}/matches",
            self.base_url, self.competition
        );
        if let Some(stage) = &self.stage {
            url.push_str("?stage=");
            url.push_str(stage);
        }
        url
    }
}

#[async_trait]
impl FixtureSource for FootballData {
    fn name(&self) -> &str {
        "football-data.org"
    }

    async fn fetch_fixtures(&self) -> Result<Vec<ExternalMatch>> {
        let url = self.matches_url();
        debug!("Fetching fixtures from {}", url);

        let mut req = self.http.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("X-Auth-Token", key);
        }
        let resp = req.send().await.context("football-data request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("football-data error {}: {}", status, body);
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .context("Failed to parse football-data response")?;

        parse_matches_response(&raw)
    }
}

/// Extract fixtures from a `/competitions/{code}/matches` body.
///
/// Structural problems (no `matches` array, an entry without id, kickoff or
/// status) fail the whole response. Missing team names, scores and winner
/// are passed through as `None`.
pub fn parse_matches_response(raw: &serde_json::Value) -> Result<Vec<ExternalMatch>> {
    let entries = raw["matches"]
        .as_array()
        .context("football-data response has no 'matches' array")?;

    entries
        .iter()
        .enumerate()
        .map(|(idx, ev)| -> Result<ExternalMatch> {
            let id = ev["id"]
                .as_i64()
                .map(|v| v.to_string())
                .or_else(|| ev["id"].as_str().map(str::to_string))
                .with_context(|| format!("match #{} has no id", idx))?;
            let utc_date = ev["utcDate"]
                .as_str()
                .with_context(|| format!("match {} has no utcDate", id))?
                .to_string();
            let status = ev["status"]
                .as_str()
                .with_context(|| format!("match {} has no status", id))?
                .to_string();

            Ok(ExternalMatch {
                home_team: ev["homeTeam"]["name"].as_str().map(str::to_string),
                away_team: ev["awayTeam"]["name"].as_str().map(str::to_string),
                utc_date,
                status,
                home_score: ev["score"]["fullTime"]["home"].as_i64(),
                away_score: ev["score"]["fullTime"]["away"].as_i64(),
                winner: ev["score"]["winner"].as_str().map(str::to_string),
                id,
            })
        })
        .collect()
}
