use crate::analysis::{Analyzer, DisabledAnalyzer, HttpAnalyzer};
use crate::api::AppState;
use crate::auth::AuthKeys;
use crate::db;
use anyhow::Context;
use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Server settings. Each flag falls back to the environment (and `.env`).
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// The address to bind to
    #[arg(short, long, env = "BIND_ADDR", default_value = "127.0.0.1:37240")]
    pub addr: SocketAddr,

    /// SQLite database path, or `:memory:`
    #[arg(long, env = "DATABASE_URL", default_value = "mindmirror.db")]
    pub database_url: String,

    /// Secret used to sign access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Token lifetime in seconds
    #[arg(long, env = "JWT_EXPIRATION_SECS", default_value_t = 86_400)]
    pub jwt_expiration_secs: u64,

    /// Base URL of the analysis service; analysis is disabled without it
    #[arg(long, env = "ML_SERVICE_URL")]
    pub ml_service_url: Option<String>,

    /// Upper bound on a single analysis call
    #[arg(long, env = "ANALYSIS_TIMEOUT_SECS", default_value_t = 10)]
    pub analysis_timeout_secs: u64,

    /// Return new entries immediately and analyse them in the background
    #[arg(long, env = "DEFER_ANALYSIS")]
    pub defer_analysis: bool,
}

impl ServerConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    fn analyzer(&self) -> anyhow::Result<Arc<dyn Analyzer>> {
        match &self.ml_service_url {
            Some(url) => {
                info!(url, "analysis service configured");
                let analyzer = HttpAnalyzer::new(url, self.analysis_timeout())
                    .context("failed to build analysis client")?;
                Ok(Arc::new(analyzer))
            }
            None => {
                warn!("ML_SERVICE_URL not set, entries will be stored without analysis");
                Ok(Arc::new(DisabledAnalyzer))
            }
        }
    }

    pub fn build_state(&self) -> anyhow::Result<AppState> {
        if self.jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let pool = db::establish_pool(&self.database_url)
            .with_context(|| format!("failed to open database at {}", self.database_url))?;
        let auth = AuthKeys::new(
            &self.jwt_secret,
            Duration::from_secs(self.jwt_expiration_secs),
        );

        Ok(AppState::new(pool, self.analyzer()?, auth)
            .with_analysis_timeout(self.analysis_timeout())
            .with_deferred_analysis(self.defer_analysis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ServerConfig,
    }

    #[test]
    fn test_flags_build_state() {
        let cli = TestCli::parse_from([
            "test",
            "--database-url",
            ":memory:",
            "--jwt-secret",
            "s3cret",
            "--analysis-timeout-secs",
            "3",
            "--defer-analysis",
        ]);
        assert_eq!(cli.config.jwt_expiration_secs, 86_400);

        let state = cli.config.build_state().unwrap();
        assert_eq!(state.analysis_timeout, Duration::from_secs(3));
        assert!(state.defer_analysis);
        assert_eq!(state.auth.expiration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_blank_secret_is_rejected() {
        let cli = TestCli::parse_from(["test", "--database-url", ":memory:", "--jwt-secret", " "]);
        assert!(cli.config.build_state().is_err());
    }
}
