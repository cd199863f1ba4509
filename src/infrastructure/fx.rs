//! FX-rate adapter backing `domain::ports::FxRateProvider` (spec.md §4.G,
//! §4.H): posted mid-rates for the currency-exchange leg of the emergency
//! workflow and EUR-denominated bucket valuation. Same
//! `ClientWithMiddleware` GET-JSON shape as `market_data.rs`, against the
//! market-data provider's FX endpoint rather than its security quotes.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ports::FxRateProvider;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FxRateResponse {
    rate: Decimal,
}

pub struct RestFxRateProvider {
    client: ClientWithMiddleware,
    base_url: String,
}

impl RestFxRateProvider {
    pub fn new(client: ClientWithMiddleware, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl FxRateProvider for RestFxRateProvider {
    async fn rate_to_eur(&self, currency: &str) -> EngineResult<Decimal> {
        if currency.eq_ignore_ascii_case("EUR") {
            return Ok(Decimal::ONE);
        }

        let response = self
            .client
            .get(format!("{}/fx/{}EUR", self.base_url, currency.to_uppercase()))
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("fx rate_to_eur failed for {currency}: {e}")))?;

        let parsed: FxRateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("fx response decode failed for {currency}: {e}")))?;

        Ok(parsed.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eur_is_always_unity() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let provider = RestFxRateProvider::new(client, "http://localhost".to_string());
        let rate = provider.rate_to_eur("EUR").await.unwrap();
        assert_eq!(rate, Decimal::ONE);
    }
}
