//! Read-only market-data adapter (spec.md §6): quotes, fundamentals,
//! historical return series, security master. HTTP round trips go through
//! the shared retry middleware (`http_client_factory::HttpClientFactory`),
//! mirroring `binance.rs`'s `BinanceMarketDataService` shape but against a
//! generic REST provider rather than a crypto exchange.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ids::Isin;
use crate::domain::ports::{MarketDataAdapter, SecuritySnapshot};
use crate::domain::security::Security;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

/// Converts a brokerage-local ticker into the market-data provider's
/// symbol convention: strip the `.US` suffix, map `.JP` exchange code to
/// `.T`, pass everything else through unchanged.
pub fn to_provider_symbol(brokerage_ticker: &str) -> String {
    if let Some(base) = brokerage_ticker.strip_suffix(".US") {
        return base.to_string();
    }
    if let Some(base) = brokerage_ticker.strip_suffix(".JP") {
        return format!("{base}.T");
    }
    brokerage_ticker.to_string()
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    symbol: String,
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct FundamentalsResponse {
    pe_ratio: Option<f64>,
    dividend_yield: Option<f64>,
    week_52_high: Option<Decimal>,
    week_52_low: Option<Decimal>,
}

pub struct RestMarketDataClient {
    client: ClientWithMiddleware,
    base_url: String,
    /// ISIN -> provider-format symbol, as resolved from the security
    /// master on construction or refresh.
    symbol_map: HashMap<Isin, String>,
}

impl RestMarketDataClient {
    pub fn new(client: ClientWithMiddleware, base_url: String) -> Self {
        Self {
            client,
            base_url,
            symbol_map: HashMap::new(),
        }
    }

    pub fn with_symbol_map(mut self, symbol_map: HashMap<Isin, String>) -> Self {
        self.symbol_map = symbol_map;
        self
    }

    fn symbol_for(&self, isin: &Isin) -> EngineResult<&str> {
        self.symbol_map
            .get(isin)
            .map(String::as_str)
            .ok_or_else(|| EngineError::precondition(format!("no market-data symbol for {isin}")))
    }
}

#[async_trait]
impl MarketDataAdapter for RestMarketDataClient {
    async fn get_quotes(&self, isins: &[Isin]) -> EngineResult<HashMap<Isin, Decimal>> {
        let symbols: Vec<&str> = isins
            .iter()
            .map(|isin| self.symbol_for(isin))
            .collect::<EngineResult<_>>()?;

        let response = self
            .client
            .get(format!("{}/quotes", self.base_url))
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data get_quotes failed: {e}")))?;

        let quotes: Vec<QuoteResponse> = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data response decode failed: {e}")))?;

        let by_symbol: HashMap<String, Decimal> =
            quotes.into_iter().map(|q| (q.symbol, q.price)).collect();

        let mut out = HashMap::with_capacity(isins.len());
        for isin in isins {
            let symbol = self.symbol_for(isin)?;
            if let Some(price) = by_symbol.get(symbol) {
                out.insert(isin.clone(), *price);
            }
        }
        Ok(out)
    }

    async fn get_fundamentals(&self, isin: &Isin) -> EngineResult<SecuritySnapshot> {
        let symbol = self.symbol_for(isin)?;
        let response = self
            .client
            .get(format!("{}/fundamentals/{}", self.base_url, symbol))
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data get_fundamentals failed: {e}")))?;

        let parsed: FundamentalsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data response decode failed: {e}")))?;

        Ok(SecuritySnapshot {
            pe_ratio: parsed.pe_ratio,
            dividend_yield: parsed.dividend_yield,
            week_52_high: parsed.week_52_high,
            week_52_low: parsed.week_52_low,
        })
    }

    async fn get_historical_returns(&self, isin: &Isin, lookback_days: u32) -> EngineResult<Vec<f64>> {
        let symbol = self.symbol_for(isin)?;
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, symbol))
            .query(&[("lookback_days", lookback_days.to_string())])
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data get_historical_returns failed: {e}")))?;

        response
            .json::<Vec<f64>>()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data response decode failed: {e}")))
    }

    async fn get_security_master(&self) -> EngineResult<Vec<Security>> {
        let response = self
            .client
            .get(format!("{}/securities", self.base_url))
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data get_security_master failed: {e}")))?;

        response
            .json::<Vec<Security>>()
            .await
            .map_err(|e| EngineError::unavailable(format!("market-data response decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_us_suffix() {
        assert_eq!(to_provider_symbol("AAPL.US"), "AAPL");
    }

    #[test]
    fn maps_jp_suffix_to_t() {
        assert_eq!(to_provider_symbol("7203.JP"), "7203.T");
    }

    #[test]
    fn passes_through_unrecognized_suffix() {
        assert_eq!(to_provider_symbol("VOD.LN"), "VOD.LN");
    }
}
