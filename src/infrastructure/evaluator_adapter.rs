//! Remote variant of `EvaluatorAdapter` (spec.md §4.F, §6): the in-process
//! reference implementation lives at `application::evaluator::Evaluator`;
//! this ships the same `EvaluationRequest`/`EvaluationResult` pair over
//! HTTP so a sequence scorer can be swapped out without touching callers.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::evaluation::EvaluationResult;
use crate::domain::ports::{EvaluationRequest, EvaluatorAdapter};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;

pub struct HttpEvaluatorClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpEvaluatorClient {
    pub fn new(client: ClientWithMiddleware, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl EvaluatorAdapter for HttpEvaluatorClient {
    async fn evaluate(&self, request: EvaluationRequest) -> EngineResult<EvaluationResult> {
        let response = self
            .client
            .post(format!("{}/evaluate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("evaluator call failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::unavailable(format!(
                "evaluator returned status {}",
                response.status()
            )));
        }

        response
            .json::<EvaluationResult>()
            .await
            .map_err(|e| EngineError::unavailable(format!("evaluator response decode failed: {e}")))
    }
}
