use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::metrics::PageMetrics;

pub mod http;

/// Server-issued split assignment. The core guarantees idempotence per
/// context: asking again returns an equivalent assignment. Unknown
/// response fields are tolerated and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub id: String,
    pub context: String,
}

/// Probability plus the contexts the core reports as correlated with
/// the queried one. The server-defined order is preserved verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldQueryResult {
    pub probability: f64,
    pub correlated_contexts: Vec<String>,
}

impl FieldQueryResult {
    /// Contract check: a probability outside [0, 1] (or NaN) means the
    /// response is out of protocol and must be treated as a failure.
    pub fn is_valid(&self) -> bool {
        self.probability.is_finite() && (0.0..=1.0).contains(&self.probability)
    }
}

/// Identity of the local core instance. Display surfaces only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
}

/// Seam between the pipeline and the core service. The HTTP
/// implementation is the only one shipped; tests script this trait to
/// observe request counts and ordering without a network.
#[async_trait]
pub trait FieldApi: Send + Sync {
    /// `GET /health`. Ok means connected; any error (network, timeout,
    /// status, non-JSON body) means disconnected.
    async fn probe_health(&self) -> Result<()>;

    /// `POST /split`. Engagement metrics ride along when available.
    async fn create_split(
        &self,
        context: &Context,
        metrics: Option<&PageMetrics>,
    ) -> Result<Split>;

    /// `POST /query`.
    async fn query_field(&self, context: &Context) -> Result<FieldQueryResult>;

    /// `GET /source`. Not part of the pipeline; read by display
    /// surfaces to label which core instance they are talking to.
    async fn fetch_source(&self) -> Result<SourceInfo>;
}
