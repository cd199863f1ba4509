//! HTTP client for the external convex-optimizer service (spec.md §4.D,
//! §6): one `Optimize` call taking expected returns, a covariance matrix,
//! and allocation constraints, returning target weights.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::optimizer::OptimizerResult;
use crate::domain::ports::{OptimizerAdapter, OptimizerRequest};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;

/// Wire form of `OptimizerRequest`: the covariance matrix is sent as a
/// flat list of `(isin_a, isin_b, value)` triples since a `HashMap` keyed
/// on a tuple has no direct JSON representation.
#[derive(Debug, Serialize)]
struct OptimizeWireRequest {
    expected_returns: Vec<(String, f64)>,
    covariance: Vec<(String, String, f64)>,
    allocation_targets: crate::domain::allocation::AllocationTargets,
    regime: crate::domain::regime::MarketRegime,
    blend_ratio: f64,
}

impl From<OptimizerRequest> for OptimizeWireRequest {
    fn from(request: OptimizerRequest) -> Self {
        Self {
            expected_returns: request
                .expected_returns
                .into_iter()
                .map(|(isin, r)| (isin.as_str().to_string(), r))
                .collect(),
            covariance: request
                .covariance
                .into_iter()
                .map(|((a, b), v)| (a.as_str().to_string(), b.as_str().to_string(), v))
                .collect(),
            allocation_targets: request.allocation_targets,
            regime: request.regime,
            blend_ratio: request.blend_ratio,
        }
    }
}

pub struct HttpOptimizerClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpOptimizerClient {
    pub fn new(client: ClientWithMiddleware, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl OptimizerAdapter for HttpOptimizerClient {
    async fn optimize(&self, request: OptimizerRequest) -> EngineResult<OptimizerResult> {
        let wire: OptimizeWireRequest = request.into();

        let response = self
            .client
            .post(format!("{}/optimize", self.base_url))
            .json(&wire)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("optimizer call failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::unavailable(format!(
                "optimizer returned status {}",
                response.status()
            )));
        }

        response
            .json::<OptimizerResult>()
            .await
            .map_err(|e| EngineError::unavailable(format!("optimizer response decode failed: {e}")))
    }
}
