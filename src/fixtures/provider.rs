use anyhow::Result;
use async_trait::async_trait;

use crate::db::models::ExternalMatch;

/// Trait that every fixture source must implement.
#[async_trait]
pub trait FixtureSource: Send + Sync {
    /// Return the full current fixture list for the tournament.
    async fn fetch_fixtures(&self) -> Result<Vec<ExternalMatch>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
