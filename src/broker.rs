//! Broker API contracts and the REST client that implements them

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::types::{
    BracketExitStatus, BracketOrderRequest, Leg, LegChange, OrderStatus, Quote, Segment,
};

/// Bracket order management
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Submit entry + stop-loss + target legs; returns the order id
    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> BrokerResult<String>;

    async fn modify_leg(&self, order_id: &str, leg: Leg, change: &LegChange) -> BrokerResult<()>;

    async fn cancel_leg(&self, order_id: &str, leg: Leg) -> BrokerResult<()>;

    async fn order_status(&self, order_id: &str) -> BrokerResult<OrderStatus>;

    async fn bracket_exit_status(&self, order_id: &str) -> BrokerResult<BracketExitStatus>;
}

/// Market snapshot quotes
#[async_trait]
pub trait QuoteApi: Send + Sync {
    async fn quotes(
        &self,
        instrument_ids: &[String],
        segment: Segment,
    ) -> BrokerResult<HashMap<String, Quote>>;
}

/// Account funds
#[async_trait]
pub trait FundApi: Send + Sync {
    /// Cash available for new positions, never negative
    async fn available_balance(&self) -> BrokerResult<Decimal>;
}

/// JSON/HTTP broker client
pub struct BrokerClient {
    client: Client,
    base_url: String,
    client_id: String,
    access_token: String,
}

impl BrokerClient {
    pub fn new(config: &BrokerConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .header("access-token", &self.access_token)
            .header("client-id", &self.client_id)
            .header("Accept", "application/json")
    }

    /// Send and decode a JSON body, mapping non-2xx to typed errors
    async fn send_json(&self, builder: RequestBuilder) -> BrokerResult<Value> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| BrokerError::DataShape(format!("invalid JSON: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && status.as_u16() != 429 {
            return Err(BrokerError::Rejected(format!("{} - {}", status, body)));
        }
        Err(BrokerError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl OrderApi for BrokerClient {
    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> BrokerResult<String> {
        let payload = SuperOrderRequest {
            transaction_type: order.side.as_transaction(),
            exchange_segment: order.segment.as_str(),
            product_type: &order.product_type,
            order_type: "LIMIT",
            security_id: &order.instrument_id,
            quantity: order.quantity,
            price: order.entry_price,
            target_price: order.target_price,
            stop_loss_price: order.stop_price,
            trailing_jump: order.trailing_step,
            correlation_id: &order.tag,
        };

        let body = self
            .send_json(self.request(Method::POST, "/super/orders").json(&payload))
            .await?;

        if let Some(status) = body.get("status").and_then(Value::as_str) {
            if !status.eq_ignore_ascii_case("success") {
                return Err(BrokerError::Rejected(body.to_string()));
            }
        }

        let order_id = body
            .pointer("/data/orderId")
            .or_else(|| body.get("orderId"))
            .and_then(value_as_string)
            .ok_or_else(|| BrokerError::DataShape(format!("no orderId in {}", body)))?;

        info!(
            "Bracket order placed: {} {} x{} @ {} (SL {}, TGT {}) -> {}",
            order.side, order.instrument_id, order.quantity, order.entry_price,
            order.stop_price, order.target_price, order_id
        );
        Ok(order_id)
    }

    async fn modify_leg(&self, order_id: &str, leg: Leg, change: &LegChange) -> BrokerResult<()> {
        let mut payload = serde_json::json!({
            "orderId": order_id,
            "legName": leg.as_str(),
        });

        match leg {
            Leg::Entry => {
                payload["orderType"] = Value::from("MARKET");
                if let Some(quantity) = change.quantity {
                    payload["quantity"] = Value::from(quantity);
                }
                if let Some(price) = change.price {
                    payload["price"] = decimal_value(price);
                }
            }
            Leg::StopLoss => {
                if let Some(stop) = change.stop_price {
                    payload["stopLossPrice"] = decimal_value(stop);
                }
                if let Some(step) = change.trailing_step {
                    payload["trailingJump"] = decimal_value(step);
                }
            }
            Leg::Target => {
                if let Some(target) = change.target_price {
                    payload["targetPrice"] = decimal_value(target);
                }
            }
        }

        let path = format!("/super/orders/{}", order_id);
        let body = self
            .send_json(self.request(Method::PUT, &path).json(&payload))
            .await?;
        reject_on_failure_status(&body)?;

        debug!("Modified {} of order {}: {:?}", leg.as_str(), order_id, change);
        Ok(())
    }

    async fn cancel_leg(&self, order_id: &str, leg: Leg) -> BrokerResult<()> {
        let path = format!("/super/orders/{}/{}", order_id, leg.as_str());
        let body = self.send_json(self.request(Method::DELETE, &path)).await?;
        reject_on_failure_status(&body)?;

        info!("Cancelled {} of order {}", leg.as_str(), order_id);
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> BrokerResult<OrderStatus> {
        let path = format!("/orders/{}", order_id);
        let body = self.send_json(self.request(Method::GET, &path)).await?;

        // Some endpoints wrap single orders in a one-element array
        let order = match &body {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.get("data").cloned().unwrap_or_else(|| other.clone()),
        };

        let status = order
            .get("orderStatus")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::DataShape(format!("no orderStatus in {}", body)))?;

        Ok(parse_order_status(status))
    }

    async fn bracket_exit_status(&self, order_id: &str) -> BrokerResult<BracketExitStatus> {
        let path = format!("/super/orders/{}", order_id);
        let body = self.send_json(self.request(Method::GET, &path)).await?;
        let snapshot: SuperOrderSnapshot = serde_json::from_value(
            body.get("data").cloned().unwrap_or(body),
        )
        .map_err(|e| BrokerError::DataShape(format!("bracket status: {}", e)))?;

        Ok(classify_bracket(&snapshot))
    }
}

#[async_trait]
impl QuoteApi for BrokerClient {
    async fn quotes(
        &self,
        instrument_ids: &[String],
        segment: Segment,
    ) -> BrokerResult<HashMap<String, Quote>> {
        let ids: Vec<Value> = instrument_ids
            .iter()
            .map(|id| id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(id.as_str())))
            .collect();
        let mut securities = serde_json::Map::new();
        securities.insert(segment.as_str().to_string(), Value::Array(ids));

        let body = self
            .send_json(
                self.request(Method::POST, "/marketfeed/quote")
                    .json(&Value::Object(securities)),
            )
            .await?;

        parse_quote_response(&body, segment)
    }
}

#[async_trait]
impl FundApi for BrokerClient {
    async fn available_balance(&self) -> BrokerResult<Decimal> {
        let body = self.send_json(self.request(Method::GET, "/fundlimit")).await?;
        let data = body.get("data").unwrap_or(&body);

        // The broker has shipped both spellings of this field
        let balance = data
            .get("availabelBalance")
            .or_else(|| data.get("availableBalance"))
            .and_then(value_as_decimal)
            .ok_or_else(|| BrokerError::DataShape(format!("no available balance in {}", body)))?;

        if balance < Decimal::ZERO {
            warn!("Broker reported negative balance {}, treating as zero", balance);
            return Ok(Decimal::ZERO);
        }
        Ok(balance)
    }
}

/// Extract quotes from `data.data.<segment>.<id>`.
///
/// Anything short of that structure is a data-shape failure, and so is a
/// quote missing any of its price fields.
pub fn parse_quote_response(body: &Value, segment: Segment) -> BrokerResult<HashMap<String, Quote>> {
    let pointer = format!("/data/data/{}", segment.as_str());
    let entries = body
        .pointer(&pointer)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            BrokerError::DataShape(format!("quote response lacks data.data.{}", segment.as_str()))
        })?;

    let mut quotes = HashMap::with_capacity(entries.len());
    for (id, raw) in entries {
        let last_price = raw
            .get("last_price")
            .and_then(value_as_decimal)
            .ok_or_else(|| BrokerError::DataShape(format!("quote {} lacks last_price", id)))?;
        let ohlc = raw.get("ohlc");
        let day_low = ohlc
            .and_then(|o| o.get("low"))
            .and_then(value_as_decimal)
            .ok_or_else(|| BrokerError::DataShape(format!("quote {} lacks ohlc.low", id)))?;
        let day_high = ohlc
            .and_then(|o| o.get("high"))
            .and_then(value_as_decimal)
            .ok_or_else(|| BrokerError::DataShape(format!("quote {} lacks ohlc.high", id)))?;
        let net_change = raw
            .get("net_change")
            .and_then(value_as_decimal)
            .ok_or_else(|| BrokerError::DataShape(format!("quote {} lacks net_change", id)))?;

        quotes.insert(
            id.clone(),
            Quote {
                last_price,
                day_low,
                day_high,
                net_change,
            },
        );
    }
    Ok(quotes)
}

pub fn parse_order_status(status: &str) -> OrderStatus {
    match status.to_ascii_uppercase().as_str() {
        "TRADED" | "FILLED" | "CLOSED" => OrderStatus::Traded,
        "REJECTED" => OrderStatus::Rejected,
        "CANCELLED" | "CANCELED" | "EXPIRED" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

/// Bracket order as reported by the broker
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperOrderSnapshot {
    pub order_status: String,
    #[serde(default)]
    pub leg_details: Vec<LegSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegSnapshot {
    pub leg_name: String,
    pub order_status: String,
}

/// Map a bracket snapshot onto its terminal condition.
///
/// Parent-leg failure wins over child legs; a filled stop or target leg
/// ends the trade; an entry leg closed with both exits cancelled was
/// squared off by hand.
pub fn classify_bracket(snapshot: &SuperOrderSnapshot) -> BracketExitStatus {
    match snapshot.order_status.to_ascii_uppercase().as_str() {
        "REJECTED" => return BracketExitStatus::ParentRejected,
        "CANCELLED" | "CANCELED" => return BracketExitStatus::ParentCancelled,
        _ => {}
    }

    let leg_status = |name: &str| {
        snapshot
            .leg_details
            .iter()
            .find(|l| l.leg_name.eq_ignore_ascii_case(name))
            .map(|l| parse_order_status(&l.order_status))
    };

    let stop = leg_status(Leg::StopLoss.as_str());
    let target = leg_status(Leg::Target.as_str());

    if stop == Some(OrderStatus::Traded) {
        return BracketExitStatus::StopHit;
    }
    if target == Some(OrderStatus::Traded) {
        return BracketExitStatus::TargetHit;
    }
    if snapshot.order_status.eq_ignore_ascii_case("CLOSED")
        && stop == Some(OrderStatus::Cancelled)
        && target == Some(OrderStatus::Cancelled)
    {
        return BracketExitStatus::ManualExit;
    }
    BracketExitStatus::None
}

fn reject_on_failure_status(body: &Value) -> BrokerResult<()> {
    match body.get("status").and_then(Value::as_str) {
        Some(status) if !status.eq_ignore_ascii_case("success") => {
            Err(BrokerError::Rejected(body.to_string()))
        }
        _ => Ok(()),
    }
}

fn value_as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal_value(value: Decimal) -> Value {
    value
        .to_string()
        .parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(value.to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuperOrderRequest<'a> {
    transaction_type: &'a str,
    exchange_segment: &'a str,
    product_type: &'a str,
    order_type: &'a str,
    security_id: &'a str,
    quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    target_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    stop_loss_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    trailing_jump: Decimal,
    correlation_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quote_response() {
        let body = json!({
            "status": "success",
            "data": { "data": { "NSE_EQ": {
                "1333": {
                    "last_price": 1652.35,
                    "net_change": 12.1,
                    "ohlc": { "open": 1640.0, "high": 1660.0, "low": 1638.5, "close": 1640.25 }
                }
            }}}
        });

        let quotes = parse_quote_response(&body, Segment::NseEq).unwrap();
        let quote = &quotes["1333"];
        assert_eq!(quote.last_price, Decimal::from_str_exact("1652.35").unwrap());
        assert_eq!(quote.day_low, Decimal::from_str_exact("1638.5").unwrap());
        assert_eq!(quote.day_high, Decimal::from(1660));
    }

    #[test]
    fn test_quote_response_without_segment_is_data_shape_error() {
        let body = json!({ "status": "success", "data": { "data": { "BSE_EQ": {} } } });
        let err = parse_quote_response(&body, Segment::NseEq).unwrap_err();
        assert!(matches!(err, BrokerError::DataShape(_)));

        let flat = json!({ "NSE_EQ": { "1333": { "last_price": 10 } } });
        assert!(matches!(
            parse_quote_response(&flat, Segment::NseEq),
            Err(BrokerError::DataShape(_))
        ));
    }

    #[test]
    fn test_quote_without_last_price_is_data_shape_error() {
        let body = json!({ "data": { "data": { "NSE_EQ": { "1333": { "net_change": 1.0 } } } } });
        assert!(matches!(
            parse_quote_response(&body, Segment::NseEq),
            Err(BrokerError::DataShape(_))
        ));
    }

    #[test]
    fn test_quote_missing_day_fields_is_data_shape_error() {
        let complete = json!({ "last_price": 100.5, "net_change": 1.0, "ohlc": { "high": 101.0, "low": 99.0 } });
        for field in ["/net_change", "/ohlc/high", "/ohlc/low"] {
            let mut quote = complete.clone();
            let (parent, key) = field.rsplit_once('/').unwrap();
            quote
                .pointer_mut(parent)
                .and_then(Value::as_object_mut)
                .unwrap()
                .remove(key);
            let body = json!({ "data": { "data": { "NSE_EQ": { "1333": quote } } } });
            assert!(
                matches!(parse_quote_response(&body, Segment::NseEq), Err(BrokerError::DataShape(_))),
                "missing {} was accepted",
                field
            );
        }

        let body = json!({ "data": { "data": { "NSE_EQ": { "1333": { "last_price": 100.5 } } } } });
        assert!(matches!(
            parse_quote_response(&body, Segment::NseEq),
            Err(BrokerError::DataShape(_))
        ));
    }

    fn snapshot(parent: &str, stop: &str, target: &str) -> SuperOrderSnapshot {
        serde_json::from_value(json!({
            "orderStatus": parent,
            "legDetails": [
                { "legName": "STOP_LOSS_LEG", "orderStatus": stop },
                { "legName": "TARGET_LEG", "orderStatus": target },
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_classify_bracket() {
        assert_eq!(classify_bracket(&snapshot("TRADED", "PENDING", "PENDING")), BracketExitStatus::None);
        assert_eq!(classify_bracket(&snapshot("TRADED", "TRADED", "CANCELLED")), BracketExitStatus::StopHit);
        assert_eq!(classify_bracket(&snapshot("TRADED", "CANCELLED", "TRADED")), BracketExitStatus::TargetHit);
        assert_eq!(classify_bracket(&snapshot("REJECTED", "PENDING", "PENDING")), BracketExitStatus::ParentRejected);
        assert_eq!(classify_bracket(&snapshot("CANCELLED", "TRADED", "PENDING")), BracketExitStatus::ParentCancelled);
        assert_eq!(classify_bracket(&snapshot("CLOSED", "CANCELLED", "CANCELLED")), BracketExitStatus::ManualExit);
    }

    #[test]
    fn test_parse_order_status() {
        assert_eq!(parse_order_status("TRADED"), OrderStatus::Traded);
        assert_eq!(parse_order_status("pending"), OrderStatus::Pending);
        assert_eq!(parse_order_status("TRANSIT"), OrderStatus::Pending);
        assert_eq!(parse_order_status("REJECTED"), OrderStatus::Rejected);
        assert_eq!(parse_order_status("CANCELLED"), OrderStatus::Cancelled);
    }
}
