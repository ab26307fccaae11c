//! Wire types for the KuCoin Futures REST API.
//!
//! Response payloads are parsed leniently: numeric fields may arrive as JSON
//! numbers or strings, and missing or malformed fields fall back to defaults
//! instead of failing the whole response.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Contract, Kline, OrderRequest, Position, PositionSide, StopDirection, Ticker};

/// API code for a successful request.
pub const SUCCESS_CODE: &str = "200000";

/// Envelope around every API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: String,
    pub data: Option<T>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Unwrap the payload of a successful response.
    pub fn into_data(self, what: &str) -> anyhow::Result<Option<T>> {
        if !self.is_success() {
            anyhow::bail!(
                "{} failed: code {} - {}",
                what,
                self.code,
                self.msg.unwrap_or_default()
            );
        }
        Ok(self.data)
    }
}

/// Account balances in one settlement currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountOverview {
    /// Total equity including unrealized P&L
    pub account_equity: f64,
    pub available_balance: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    #[serde(default)]
    pub account_equity: Value,
    #[serde(default)]
    pub available_balance: Value,
    #[serde(default)]
    pub currency: Option<String>,
}

impl AccountData {
    pub fn into_overview(self, currency: &str) -> AccountOverview {
        AccountOverview {
            account_equity: number(&self.account_equity).unwrap_or(0.0),
            available_balance: number(&self.available_balance).unwrap_or(0.0),
            currency: self.currency.unwrap_or_else(|| currency.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerData {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub price: Value,
    #[serde(default, rename = "turnover24h")]
    pub turnover_24h: Value,
    #[serde(default)]
    pub turnover: Value,
    #[serde(default, rename = "turnoverOf24h")]
    pub turnover_of_24h: Value,
    #[serde(default)]
    pub ts: Value,
}

impl TickerData {
    /// 24h quote-currency turnover.
    ///
    /// The first present field among `turnover24h`, `turnover`, and
    /// `turnoverOf24h` wins, even when its value is zero.
    pub fn volume(&self) -> f64 {
        [&self.turnover_24h, &self.turnover, &self.turnover_of_24h]
            .into_iter()
            .find(|v| !v.is_null())
            .and_then(number)
            .unwrap_or(0.0)
    }

    pub fn into_ticker(self, symbol: &str) -> Ticker {
        let volume_24h = self.volume();
        Ticker {
            symbol: self.symbol.unwrap_or_else(|| symbol.to_string()),
            price: number(&self.price).unwrap_or(0.0),
            volume_24h,
            timestamp: number(&self.ts).map(|t| t as i64).unwrap_or(0),
        }
    }
}

/// Parse the contracts list, skipping entries without a symbol.
pub fn parse_contracts(data: &Value) -> Vec<Contract> {
    data.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let symbol = item.get("symbol")?.as_str()?.to_string();
                    let status = item
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some(Contract { symbol, status })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse kline rows `[time, open, close, high, low, volume]`, skipping malformed rows.
pub fn parse_klines(data: &Value) -> Vec<Kline> {
    data.as_array()
        .map(|rows| rows.iter().filter_map(parse_kline_row).collect())
        .unwrap_or_default()
}

fn parse_kline_row(row: &Value) -> Option<Kline> {
    let cells = row.as_array()?;
    if cells.len() < 6 {
        return None;
    }
    Some(Kline {
        time: number(&cells[0])? as i64,
        open: number(&cells[1])?,
        close: number(&cells[2])?,
        high: number(&cells[3])?,
        low: number(&cells[4])?,
        volume: number(&cells[5])?,
    })
}

/// Parse open positions. Closed or symbol-less entries are skipped.
pub fn parse_positions(data: &Value) -> Vec<Position> {
    data.as_array()
        .map(|items| items.iter().filter_map(parse_position).collect())
        .unwrap_or_default()
}

fn parse_position(item: &Value) -> Option<Position> {
    if !item.get("isOpen").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let symbol = item.get("symbol")?.as_str()?.to_string();
    let field = |key: &str| item.get(key).and_then(number);

    let qty = field("currentQty").unwrap_or(0.0);
    Some(Position {
        symbol,
        side: PositionSide::from_qty(qty),
        size: qty.abs() as u64,
        entry_price: field("avgEntryPrice").unwrap_or(0.0),
        leverage: field("realLeverage")
            .map(|l| (l.round() as u32).max(1))
            .unwrap_or(1),
        unrealized_pnl: field("unrealisedPnl").unwrap_or(0.0),
        margin: field("posMargin").unwrap_or(0.0),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Body for `POST /api/v1/orders`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBody {
    pub client_oid: String,
    pub symbol: String,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub size: u64,
    pub leverage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price_type: Option<&'static str>,
}

impl OrderBody {
    pub fn from_request(request: &OrderRequest, client_oid: String) -> anyhow::Result<Self> {
        let price = match (request.order_type, request.price) {
            (crate::models::OrderType::Limit, Some(p)) => Some(price_string(p)?),
            _ => None,
        };

        let (stop, stop_price, stop_price_type) = match request.stop {
            Some((direction, stop_price)) => (
                Some(match direction {
                    StopDirection::Up => "up",
                    StopDirection::Down => "down",
                }),
                Some(price_string(stop_price)?),
                Some("TP"),
            ),
            None => (None, None, None),
        };

        Ok(Self {
            client_oid,
            symbol: request.symbol.clone(),
            side: request.side.as_str(),
            order_type: request.order_type.as_str(),
            size: request.size,
            leverage: request.leverage,
            price,
            stop,
            stop_price,
            stop_price_type,
        })
    }
}

/// Exact decimal text for a price.
pub fn price_string(price: f64) -> anyhow::Result<String> {
    let decimal = Decimal::try_from(price)
        .map_err(|e| anyhow::anyhow!("Invalid price {}: {}", price, e))?;
    Ok(decimal.normalize().to_string())
}

/// Read a JSON number or numeric string.
pub fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Decimal::from_str(s.trim())
            .ok()
            .and_then(|d| d.to_f64())
            .or_else(|| s.trim().parse::<f64>().ok()),
        _ => None,
    }
    .filter(|v| v.is_finite())
}
