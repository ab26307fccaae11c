//! KuCoin Futures REST client.
//!
//! Private endpoints are signed with HMAC-SHA256 over
//! `timestamp + METHOD + endpoint + body` using API key version 2, where the
//! passphrase header itself is an HMAC of the passphrase.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::models::{Contract, Kline, Order, OrderRequest, Position, Ticker};

use super::types::*;
use super::FuturesExchange;

pub const SANDBOX_URL: &str = "https://api-sandbox-futures.kucoin.com";
pub const PRODUCTION_URL: &str = "https://api-futures.kucoin.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_VERSION: &str = "2";

type HmacSha256 = Hmac<Sha256>;

/// Authenticated client for the KuCoin Futures API.
pub struct KucoinClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,

    /// HMAC of the passphrase, computed once
    signed_passphrase: String,
}

impl KucoinClient {
    /// Create a client for the sandbox or production environment.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = if config.sandbox {
            SANDBOX_URL
        } else {
            PRODUCTION_URL
        };
        Self::with_base_url(config, base_url.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(config: &ApiConfig, base_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let signed_passphrase = if config.api_passphrase.is_empty() {
            String::new()
        } else {
            hmac_base64(&config.api_secret, &config.api_passphrase)?
        };

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            signed_passphrase,
        })
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Signature for one request. `endpoint` includes the query string.
    pub fn sign(&self, timestamp: i64, method: &str, endpoint: &str, body: &str) -> Result<String> {
        let payload = format!("{}{}{}{}", timestamp, method.to_uppercase(), endpoint, body);
        hmac_base64(&self.api_secret, &payload)
    }

    fn build_headers(&self, method: &Method, endpoint: &str, body: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp, method.as_str(), endpoint, body)?;

        let mut headers = HeaderMap::new();
        headers.insert("KC-API-KEY", header(&self.api_key)?);
        headers.insert("KC-API-SIGN", header(&signature)?);
        headers.insert("KC-API-TIMESTAMP", header(&timestamp.to_string())?);
        headers.insert("KC-API-PASSPHRASE", header(&self.signed_passphrase)?);
        headers.insert("KC-API-KEY-VERSION", HeaderValue::from_static(API_KEY_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send one signed request and decode the response envelope.
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse<Value>> {
        let body_text = match body {
            Some(b) => serde_json::to_string(b).context("Failed to encode request body")?,
            None => String::new(),
        };
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(method = %method, endpoint = %endpoint, "Sending request");

        let mut req = self
            .http
            .request(method.clone(), &url)
            .headers(self.build_headers(&method, endpoint, &body_text)?);
        if !body_text.is_empty() {
            req = req.body(body_text);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, endpoint))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} {} request failed: {} - {}", method, endpoint, status, text);
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint))
    }

    async fn get_data(&self, endpoint: &str, what: &str) -> Result<Value> {
        let resp = self.request(Method::GET, endpoint, None).await?;
        Ok(resp.into_data(what)?.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl FuturesExchange for KucoinClient {
    async fn get_contracts(&self) -> Result<Vec<Contract>> {
        let data = self
            .get_data("/api/v1/contracts/active", "Contracts request")
            .await?;
        Ok(parse_contracts(&data))
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>> {
        let endpoint = format!("/api/v1/ticker?symbol={}", symbol);
        let data = self.get_data(&endpoint, "Ticker request").await?;
        if data.is_null() {
            return Ok(None);
        }
        let ticker: TickerData =
            serde_json::from_value(data).context("Failed to parse ticker")?;
        Ok(Some(ticker.into_ticker(symbol)))
    }

    async fn get_klines(
        &self,
        symbol: &str,
        granularity: u32,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Kline>> {
        let mut endpoint = format!(
            "/api/v1/kline/query?symbol={}&granularity={}",
            symbol, granularity
        );
        if let Some(from) = start {
            endpoint.push_str(&format!("&from={}", from));
        }
        if let Some(to) = end {
            endpoint.push_str(&format!("&to={}", to));
        }

        let data = self.get_data(&endpoint, "Kline request").await?;
        Ok(parse_klines(&data))
    }

    async fn get_account_overview(&self, currency: &str) -> Result<AccountOverview> {
        let endpoint = format!("/api/v1/account-overview?currency={}", currency);
        let data = self.get_data(&endpoint, "Account overview request").await?;
        let account: AccountData = if data.is_null() {
            AccountData::default()
        } else {
            serde_json::from_value(data).context("Failed to parse account overview")?
        };
        Ok(account.into_overview(currency))
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let data = self.get_data("/api/v1/positions", "Positions request").await?;
        Ok(parse_positions(&data))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let client_oid = Uuid::new_v4().to_string();
        let body = OrderBody::from_request(request, client_oid.clone())?;
        let body = serde_json::to_value(&body).context("Failed to encode order")?;

        let resp = self.request(Method::POST, "/api/v1/orders", Some(&body)).await?;
        let data = resp.into_data("Order placement")?.unwrap_or(Value::Null);
        let ack: OrderData = serde_json::from_value(data).unwrap_or_default();

        Ok(Order {
            order_id: ack.order_id.unwrap_or_default(),
            client_oid,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            size: request.size,
            price: request.price,
            leverage: request.leverage,
            status: "pending".to_string(),
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<bool> {
        let body = json!({ "symbol": symbol });
        let resp = self
            .request(Method::POST, "/api/v1/position/close", Some(&body))
            .await?;
        if !resp.is_success() {
            warn!(symbol = %symbol, code = %resp.code, msg = ?resp.msg, "Close position rejected");
        }
        Ok(resp.is_success())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let endpoint = format!("/api/v1/orders/{}", order_id);
        let resp = self.request(Method::DELETE, &endpoint, None).await?;
        Ok(resp.is_success())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        let body = json!({ "symbol": symbol, "level": leverage });
        let resp = self
            .request(Method::POST, "/api/v1/position/risk-limit-level/change", Some(&body))
            .await?;
        Ok(resp.is_success())
    }
}

fn hmac_base64(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).context("Invalid header value")
}
