//! Client side of the external scoring service.
//!
//! Every failure here is a value: callers decide whether to log it and move
//! on. Nothing in this module panics on a bad response.

use crate::journal_entries::Annotations;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("analysis service is not configured")]
    Disabled,

    #[error("analysis timed out")]
    Timeout,

    #[error("analysis service unreachable: {0}")]
    Unreachable(String),

    #[error("analysis service returned {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed analysis response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnalysisError::Timeout
        } else if let Some(status) = err.status() {
            AnalysisError::Status(status)
        } else if err.is_decode() {
            AnalysisError::Malformed(err.to_string())
        } else {
            AnalysisError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResult {
    pub num_clusters: i32,
    #[serde(default)]
    pub cluster_themes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub entry_clusters: Vec<i32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterRequest<'a> {
    user_id: i32,
    journal_texts: &'a [String],
    n_clusters: usize,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Annotations, AnalysisError>;

    /// Groups `texts`; on success `entry_clusters[i]` belongs to `texts[i]`.
    async fn cluster(
        &self,
        user_id: i32,
        texts: &[String],
        n_clusters: usize,
    ) -> Result<ClusterResult, AnalysisError>;
}

#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalyzer {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, AnalysisError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Annotations, AnalysisError> {
        let body = self.post_json("analyze_journal", &AnalyzeRequest { text }).await?;

        let annotations: Annotations = serde_json::from_str(&body)
            .map_err(|err| AnalysisError::Malformed(err.to_string()))?;
        annotations.validate().map_err(AnalysisError::Malformed)?;

        Ok(annotations)
    }

    async fn cluster(
        &self,
        user_id: i32,
        texts: &[String],
        n_clusters: usize,
    ) -> Result<ClusterResult, AnalysisError> {
        let request = ClusterRequest {
            user_id,
            journal_texts: texts,
            n_clusters,
        };
        let body = self.post_json("cluster_journal_entries", &request).await?;

        let result: ClusterResult = serde_json::from_str(&body)
            .map_err(|err| AnalysisError::Malformed(err.to_string()))?;
        if result.entry_clusters.len() != texts.len() {
            return Err(AnalysisError::Malformed(format!(
                "{} cluster ids for {} entries",
                result.entry_clusters.len(),
                texts.len()
            )));
        }

        Ok(result)
    }
}

/// Stand-in when no scoring service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<Annotations, AnalysisError> {
        Err(AnalysisError::Disabled)
    }

    async fn cluster(
        &self,
        _user_id: i32,
        _texts: &[String],
        _n_clusters: usize,
    ) -> Result<ClusterResult, AnalysisError> {
        Err(AnalysisError::Disabled)
    }
}

/// Runs `analyze` under `timeout`, logging and swallowing any failure.
pub async fn analyze_or_log(
    analyzer: &dyn Analyzer,
    text: &str,
    timeout: Duration,
) -> Option<Annotations> {
    let outcome = match tokio::time::timeout(timeout, analyzer.analyze(text)).await {
        Ok(result) => result,
        Err(_) => Err(AnalysisError::Timeout),
    };

    let outcome = outcome.and_then(|annotations| {
        annotations
            .validate()
            .map(|_| annotations)
            .map_err(AnalysisError::Malformed)
    });

    match outcome {
        Ok(annotations) => Some(annotations),
        Err(AnalysisError::Disabled) => None,
        Err(err) => {
            warn!(error = %err, "analysis failed, storing entry without annotations");
            None
        }
    }
}

/// Like [`analyze_or_log`] for clustering: any failure yields an empty result.
pub async fn cluster_or_log(
    analyzer: &dyn Analyzer,
    user_id: i32,
    texts: &[String],
    n_clusters: usize,
    timeout: Duration,
) -> Option<ClusterResult> {
    let outcome = match tokio::time::timeout(timeout, analyzer.cluster(user_id, texts, n_clusters))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(AnalysisError::Timeout),
    };

    match outcome {
        Ok(result) if result.entry_clusters.len() == texts.len() => Some(result),
        Ok(result) => {
            warn!(
                user_id,
                returned = result.entry_clusters.len(),
                expected = texts.len(),
                "clustering returned a mismatched assignment"
            );
            None
        }
        Err(err) => {
            warn!(user_id, error = %err, "clustering failed");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Returns the same annotations for every text and a round-robin
    /// clustering.
    pub struct FixedAnalyzer {
        pub annotations: Annotations,
    }

    impl FixedAnalyzer {
        pub fn new(annotations: Annotations) -> Self {
            Self { annotations }
        }
    }

    #[async_trait]
    impl Analyzer for FixedAnalyzer {
        async fn analyze(&self, _text: &str) -> Result<Annotations, AnalysisError> {
            Ok(self.annotations.clone())
        }

        async fn cluster(
            &self,
            _user_id: i32,
            texts: &[String],
            n_clusters: usize,
        ) -> Result<ClusterResult, AnalysisError> {
            let n = n_clusters.max(1);
            let entry_clusters = (0..texts.len()).map(|i| (i % n) as i32).collect();
            let cluster_themes = (0..n)
                .map(|i| (i.to_string(), vec![format!("theme {i}")]))
                .collect();
            Ok(ClusterResult {
                num_clusters: n as i32,
                cluster_themes,
                entry_clusters,
            })
        }
    }

    /// Never answers.
    pub struct HangingAnalyzer;

    #[async_trait]
    impl Analyzer for HangingAnalyzer {
        async fn analyze(&self, _text: &str) -> Result<Annotations, AnalysisError> {
            std::future::pending().await
        }

        async fn cluster(
            &self,
            _user_id: i32,
            _texts: &[String],
            _n_clusters: usize,
        ) -> Result<ClusterResult, AnalysisError> {
            std::future::pending().await
        }
    }
}
