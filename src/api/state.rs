use crate::analysis::Analyzer;
use crate::auth::AuthKeys;
use std::sync::Arc;
use std::time::Duration;

pub use crate::db::Pool;

pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10);

// Shared state
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub analyzer: Arc<dyn Analyzer>,
    pub auth: Arc<AuthKeys>,
    /// Upper bound on one inline analysis call.
    pub analysis_timeout: Duration,
    /// Store entries first and analyse them in a background task.
    pub defer_analysis: bool,
}

impl AppState {
    pub fn new(pool: Pool, analyzer: Arc<dyn Analyzer>, auth: AuthKeys) -> Self {
        Self {
            pool: Arc::new(pool),
            analyzer,
            auth: Arc::new(auth),
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
            defer_analysis: false,
        }
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn with_deferred_analysis(mut self, defer: bool) -> Self {
        self.defer_analysis = defer;
        self
    }
}
