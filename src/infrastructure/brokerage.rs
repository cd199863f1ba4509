//! Canonical brokerage adapter: sorted-key HMAC-SHA256 request signing
//! (spec.md §6) plus the `BrokerageAdapter` port implementation.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::ids::{Isin, OrderId};
use crate::domain::ports::{BrokerageAdapter, OrderAck, PendingOrder};
use crate::domain::position::Position;
use crate::domain::trade::{CashFlowEntry, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};

type HmacSha256 = Hmac<Sha256>;

/// Recursive param value for the brokerage's bracket-notation query
/// strings, e.g. `params[ticker]=AAPL&params[sup]=false`.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
    Number(i64),
    Map(BTreeMap<String, ParamValue>),
}

fn flatten(prefix: &str, value: &ParamValue, out: &mut Vec<(String, String)>) {
    match value {
        // `BTreeMap` iteration is already key-sorted, matching the
        // "sorted lexicographically at every level" requirement.
        ParamValue::Map(nested) => {
            for (key, nested_value) in nested {
                flatten(&format!("{prefix}[{key}]"), nested_value, out);
            }
        }
        ParamValue::Str(s) => out.push((prefix.to_string(), s.clone())),
        ParamValue::Bool(b) => out.push((prefix.to_string(), b.to_string())),
        ParamValue::Number(n) => out.push((prefix.to_string(), n.to_string())),
    }
}

/// Builds the canonical, URL-encoded query string the signature is taken
/// over.
pub fn canonical_query_string(top: &BTreeMap<String, ParamValue>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in top {
        flatten(key, value, &mut pairs);
    }
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", urlencode(&k), urlencode(&v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Nonce = current time in milliseconds × 10 (spec.md §6).
pub fn nonce() -> i64 {
    Utc::now().timestamp_millis() * 10
}

pub fn sign(secret: &str, query_string: &str) -> EngineResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::internal(format!("invalid HMAC key: {e}")))?;
    mac.update(query_string.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Normalizes a brokerage-local ticker: uppercase, `.US` suffix appended
/// when no exchange suffix is present.
pub fn normalize_ticker(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    if upper.contains('.') {
        upper
    } else {
        format!("{upper}.US")
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy)]
pub enum Expiry {
    Day,
    Ext,
    Gtc,
}

/// action_id = side ∈ {buy:1, sell:3} + (margin ? 1 : 0)
pub fn action_id(side: Side, margin: bool) -> i64 {
    let base = match side {
        Side::Buy => 1,
        Side::Sell => 3,
    };
    base + i64::from(margin)
}

pub fn order_type_id(order_type: OrderType) -> i64 {
    match order_type {
        OrderType::Market => 1,
        OrderType::Limit => 2,
        OrderType::Stop => 3,
        OrderType::StopLimit => 4,
    }
}

pub fn expiry_id(expiry: Expiry) -> i64 {
    match expiry {
        Expiry::Day => 1,
        Expiry::Ext => 2,
        Expiry::Gtc => 3,
    }
}

pub struct CanonicalBrokerageClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    api_secret: String,
    /// ISIN -> brokerage ticker, populated from the security master.
    symbol_map: HashMap<Isin, String>,
}

impl CanonicalBrokerageClient {
    pub fn new(client: ClientWithMiddleware, base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
            api_secret,
            symbol_map: HashMap::new(),
        }
    }

    pub fn with_symbol_map(mut self, symbol_map: HashMap<Isin, String>) -> Self {
        self.symbol_map = symbol_map;
        self
    }

    pub fn resolve_symbol(&self, isin: &Isin) -> Option<&str> {
        self.symbol_map.get(isin).map(String::as_str)
    }

    fn signed_query(&self, mut params: BTreeMap<String, ParamValue>) -> EngineResult<String> {
        params.insert("api_key".to_string(), ParamValue::Str(self.api_key.clone()));
        params.insert("nonce".to_string(), ParamValue::Number(nonce()));
        let query_string = canonical_query_string(&params);
        let signature = sign(&self.api_secret, &query_string)?;
        Ok(format!("{query_string}&signature={signature}"))
    }
}

#[async_trait]
impl BrokerageAdapter for CanonicalBrokerageClient {
    async fn place_order(&self, order: &PendingOrder) -> EngineResult<OrderAck> {
        let ticker = self
            .resolve_symbol(&order.isin)
            .map(normalize_ticker)
            .ok_or_else(|| EngineError::precondition(format!("no brokerage symbol for {}", order.isin)))?;

        let mut params = BTreeMap::new();
        let mut inner = BTreeMap::new();
        inner.insert("ticker".to_string(), ParamValue::Str(ticker));
        inner.insert(
            "action_id".to_string(),
            ParamValue::Number(action_id(order.side, false)),
        );
        inner.insert(
            "order_type_id".to_string(),
            ParamValue::Number(order_type_id(OrderType::Market)),
        );
        inner.insert("expiry_id".to_string(), ParamValue::Number(expiry_id(Expiry::Day)));
        inner.insert("quantity".to_string(), ParamValue::Str(order.quantity.to_string()));
        inner.insert(
            "client_order_id".to_string(),
            ParamValue::Str(order.client_order_id.clone()),
        );
        params.insert("params".to_string(), ParamValue::Map(inner));

        let query_string = self.signed_query(params)?;
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .body(query_string)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage place_order failed: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage response decode failed: {e}")))?;
        let order_id = body
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::unavailable("brokerage response missing order_id"))?;

        Ok(OrderAck {
            order_id: OrderId::from(order_id),
            accepted_at: Utc::now(),
        })
    }

    async fn get_positions(&self) -> EngineResult<Vec<Position>> {
        let params = BTreeMap::new();
        let query_string = self.signed_query(params)?;
        let response = self
            .client
            .get(format!("{}/positions?{}", self.base_url, query_string))
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage get_positions failed: {e}")))?;
        response
            .json::<Vec<Position>>()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage response decode failed: {e}")))
    }

    async fn get_cash_balances(&self) -> EngineResult<HashMap<String, Decimal>> {
        let params = BTreeMap::new();
        let query_string = self.signed_query(params)?;
        let response = self
            .client
            .get(format!("{}/balances?{}", self.base_url, query_string))
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage get_cash_balances failed: {e}")))?;
        response
            .json::<HashMap<String, Decimal>>()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage response decode failed: {e}")))
    }

    async fn get_dividends(&self, since: DateTime<Utc>) -> EngineResult<Vec<CashFlowEntry>> {
        let mut params = BTreeMap::new();
        params.insert("since".to_string(), ParamValue::Str(since.to_rfc3339()));
        let query_string = self.signed_query(params)?;
        let response = self
            .client
            .get(format!("{}/dividends?{}", self.base_url, query_string))
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage get_dividends failed: {e}")))?;
        response
            .json::<Vec<CashFlowEntry>>()
            .await
            .map_err(|e| EngineError::unavailable(format!("brokerage response decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_query_string_is_bracketed_and_sorted() {
        let mut inner = BTreeMap::new();
        inner.insert("ticker".to_string(), ParamValue::Str("AAPL".to_string()));
        inner.insert("sup".to_string(), ParamValue::Bool(false));
        let mut top = BTreeMap::new();
        top.insert("params".to_string(), ParamValue::Map(inner));

        let qs = canonical_query_string(&top);
        assert_eq!(qs, "params%5Bsup%5D=false&params%5Bticker%5D=AAPL");
    }

    #[test]
    fn signature_is_deterministic_for_the_same_input() {
        let qs = "params%5Bticker%5D=AAPL";
        let sig_a = sign("secret", qs).unwrap();
        let sig_b = sign("secret", qs).unwrap();
        assert_eq!(sig_a, sig_b);
        assert_eq!(sig_a.len(), 64);
    }

    #[test]
    fn ticker_without_suffix_gets_us_appended() {
        assert_eq!(normalize_ticker("aapl"), "AAPL.US");
        assert_eq!(normalize_ticker("7203.T"), "7203.T");
    }

    #[test]
    fn action_id_combines_side_and_margin() {
        assert_eq!(action_id(Side::Buy, false), 1);
        assert_eq!(action_id(Side::Buy, true), 2);
        assert_eq!(action_id(Side::Sell, false), 3);
        assert_eq!(action_id(Side::Sell, true), 4);
    }
}
