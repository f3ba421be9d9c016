use clap::Parser;
use std::net::SocketAddr;

/// Tournament prediction game backend
#[derive(Parser, Debug, Clone)]
#[command(name = "matchday-predictor", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "predictor.db")]
    pub database_path: String,

    /// football-data.org API base URL
    #[arg(
        long,
        env = "FIXTURES_API_URL",
        default_value = "https://api.football-data.org/v4"
    )]
    pub fixtures_api_url: String,

    /// football-data.org API token
    #[arg(long, env = "FOOTBALL_API_KEY")]
    pub football_api_key: Option<String>,

    /// Competition code whose fixtures make up the tournament (e.g. CL, WC)
    #[arg(long, env = "COMPETITION", default_value = "CL")]
    pub competition: String,

    /// Restrict fixtures to one stage (e.g. SEMI_FINALS)
    #[arg(long, env = "STAGE")]
    pub stage: Option<String>,

    /// Close admission at the scheduled kickoff even if the match is still SCHEDULED
    #[arg(
        long,
        env = "LOCK_AT_KICKOFF",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub lock_at_kickoff: bool,

    /// Pull fixtures once at startup
    #[arg(long, env = "SYNC_ON_START", default_value = "false")]
    pub sync_on_start: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.competition.trim().is_empty() {
            anyhow::bail!("COMPETITION must not be empty");
        }
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("LISTEN_ADDR '{}' is not a socket address", self.listen_addr);
        }
        if self.football_api_key.is_none() {
            tracing::warn!("FOOTBALL_API_KEY not set; fixture fetches will likely be rejected");
        }
        Ok(())
    }
}
