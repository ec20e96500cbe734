//! Polymarket CLOB client.
//!
//! Reads the order book of an outcome token (no auth required) and
//! places, polls and cancels limit orders through the configured REST
//! paths. Order calls carry the API key and secret as headers.
//!
//! CLOB API: https://clob.polymarket.com

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::{AppConfig, ExecutionConfig, FeedConfig};
use crate::data::polling::{BookSource, BookTop};
use crate::platforms::{OrderVenue, VenueError, VenueOrder, VenueOrderStatus};
use crate::types::OrderIntent;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// One price level; the CLOB sends prices and sizes as strings.
#[derive(Debug, Deserialize, Clone)]
pub struct BookLevel {
    pub price: String,
    #[serde(default)]
    pub size: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrderBook {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default, alias = "order_id", alias = "orderID")]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    filled_size: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    avg_price: Option<Decimal>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "errorMsg")]
    error: Option<String>,
}

/// Accept a decimal sent either as a JSON string or a JSON number.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => parse_decimal(&s).map(Some).map_err(D::Error::custom),
        Some(serde_json::Value::Number(n)) => {
            parse_decimal(&n.to_string()).map(Some).map_err(D::Error::custom)
        }
        Some(other) => Err(D::Error::custom(format!("expected a decimal, got {other}"))),
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Best bid (highest) and best ask (lowest) of a book.
///
/// Levels are not assumed to be sorted.
pub fn top_of_book(book: &OrderBook) -> Result<BookTop> {
    let parse_all = |levels: &[BookLevel], what: &str| -> Result<Vec<Decimal>> {
        levels
            .iter()
            .map(|l| {
                Decimal::from_str(&l.price)
                    .with_context(|| format!("Invalid {what} price: {:?}", l.price))
            })
            .collect()
    };
    let bids = parse_all(&book.bids, "bid")?;
    let asks = parse_all(&book.asks, "ask")?;

    let best_bid = bids.into_iter().max().context("Order book has no bids")?;
    let best_ask = asks.into_iter().min().context("Order book has no asks")?;
    Ok(BookTop { best_bid, best_ask })
}

/// Turn an order endpoint response into a venue snapshot.
///
/// `fallback_id` is used when the venue does not echo an id.
pub fn parse_order_response(body: &str, fallback_id: &str) -> Result<VenueOrder, VenueError> {
    let resp: OrderResponse =
        serde_json::from_str(body).map_err(|e| VenueError::Decode(e.to_string()))?;

    if resp.success == Some(false) || resp.error.as_deref().is_some_and(|e| !e.is_empty()) {
        return Err(VenueError::Rejected(
            resp.error.unwrap_or_else(|| "success=false".to_string()),
        ));
    }

    let status = resp
        .status
        .as_deref()
        .map(VenueOrderStatus::parse)
        .unwrap_or(VenueOrderStatus::Open);

    Ok(VenueOrder {
        order_id: resp.id.unwrap_or_else(|| fallback_id.to_string()),
        status,
        filled_size: resp.filled_size.unwrap_or(Decimal::ZERO),
        avg_price: resp.avg_price,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct Credentials {
    api_key: SecretString,
    api_secret: SecretString,
}

pub struct ClobClient {
    http: Client,
    rest_url: String,
    book_path: String,
    order_path: String,
    order_status_path: String,
    cancel_path: String,
    credentials: Option<Credentials>,
}

impl ClobClient {
    fn build(rest_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build CLOB HTTP client")?;
        Ok(Self {
            http,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            book_path: "/book".to_string(),
            order_path: "/orders".to_string(),
            order_status_path: "/orders/{order_id}".to_string(),
            cancel_path: "/orders/{order_id}".to_string(),
            credentials: None,
        })
    }

    /// Unauthenticated client for the book endpoint.
    pub fn for_feed(config: &FeedConfig) -> Result<Self> {
        let mut client = Self::build(&config.rest_url, Duration::from_secs(10))?;
        client.book_path = config.book_path.clone();
        Ok(client)
    }

    /// Authenticated client for the order endpoints.
    ///
    /// Fails when either credential env var is unset.
    pub fn for_execution(config: &ExecutionConfig) -> Result<Self> {
        let mut client = Self::build(
            &config.rest_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        client.order_path = config.order_path.clone();
        client.order_status_path = config.order_status_path.clone();
        client.cancel_path = config.cancel_path.clone();
        client.credentials = Some(Credentials {
            api_key: AppConfig::resolve_secret(&config.api_key_env)?,
            api_secret: AppConfig::resolve_secret(&config.api_secret_env)?,
        });
        Ok(client)
    }

    pub fn book_url(&self, token_id: &str) -> String {
        format!(
            "{}{}?token_id={}",
            self.rest_url,
            self.book_path,
            urlencoding::encode(token_id)
        )
    }

    fn order_url(&self, template: &str, order_id: &str) -> String {
        let path = template.replace("{order_id}", &urlencoding::encode(order_id));
        format!("{}{}", self.rest_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(c) => request
                .header("X-API-KEY", c.api_key.expose_secret().as_str())
                .header("X-API-SECRET", c.api_secret.expose_secret().as_str()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, VenueError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(VenueError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Fetch the full order book of one outcome token.
    pub async fn fetch_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = self.book_url(token_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("CLOB book request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("CLOB book error {status}: {body}");
        }

        resp.json().await.context("Failed to parse CLOB book response")
    }
}

#[async_trait]
impl BookSource for ClobClient {
    async fn top_of_book(&self, token_id: &str) -> Result<BookTop> {
        let book = self.fetch_book(token_id).await?;
        let top = top_of_book(&book).with_context(|| format!("Unusable book for token {token_id}"))?;
        debug!(token = token_id, bid = %top.best_bid, ask = %top.best_ask, "Book polled");
        Ok(top)
    }
}

#[async_trait]
impl OrderVenue for ClobClient {
    async fn place_order(&self, intent: &OrderIntent) -> Result<VenueOrder, VenueError> {
        let payload = serde_json::json!({
            "market": intent.market_id,
            "side": intent.side.as_str(),
            "price": intent.price.to_string(),
            "size": intent.size.to_string(),
            "type": "limit",
            "time_in_force": "GTC",
            "client_order_id": intent.client_order_id,
        });
        let url = format!("{}{}", self.rest_url, self.order_path);
        debug!(url = %url, order = %intent, "Placing order");
        let body = self.send(self.http.post(&url).json(&payload)).await?;
        parse_order_response(&body, &intent.client_order_id)
    }

    async fn order_status(&self, order_id: &str) -> Result<VenueOrder, VenueError> {
        let url = self.order_url(&self.order_status_path, order_id);
        let body = self.send(self.http.get(&url)).await?;
        parse_order_response(&body, order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        let url = self.order_url(&self.cancel_path, order_id);
        self.send(self.http.delete(&url)).await?;
        debug!(order_id, "Order cancelled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
