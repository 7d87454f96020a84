use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use crate::models::{Direction, OrderType, Side};
use crate::money;

use super::session::SessionPool;
use super::{
    is_valid_client_order_id, AdapterError, AdapterReady, CancelAck, ExchangeAdapter, ExchangeOrderStatus,
    ExchangePosition, Fill, OrderRequest, OrderState,
};

type HmacSha256 = Hmac<Sha256>;

const FAPI_BASE: &str = "https://fapi.binance.com";
const FAPI_TESTNET_BASE: &str = "https://testnet.binancefuture.com";
const RECV_WINDOW_MS: u64 = 5_000;

/// Binance error codes meaning the order id is unknown.
const NO_SUCH_ORDER: i64 = -2013;
const UNKNOWN_ORDER_CANCEL: i64 = -2011;
const DUPLICATE_CLIENT_ORDER_ID: i64 = -4116;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOrder {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPositionRisk {
    symbol: String,
    position_amt: String,
    entry_price: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct Ignored {}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// USDⓈ-M futures REST adapter for one Binance account.
pub struct BinanceFutures {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    sandbox: bool,
    sessions: SessionPool,
}

impl BinanceFutures {
    pub fn new(http: Client, api_key: String, api_secret: String, sandbox: bool, max_sessions: usize) -> Self {
        let base_url = if sandbox { FAPI_TESTNET_BASE } else { FAPI_BASE };
        Self {
            http,
            api_key,
            api_secret,
            base_url: base_url.into(),
            sandbox,
            sessions: SessionPool::new(max_sessions),
        }
    }

    /// Send a signed request and decode the JSON body.
    ///
    /// The session permit is held until the body has been read.
    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, AdapterError> {
        let _session = self.sessions.acquire().await?;

        let query = signed_query(&self.api_secret, params, chrono::Utc::now().timestamp_millis())?;
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let err = classify_error(status, &headers, &body);
            tracing::debug!(path, status = %status, error = %err, "Binance request failed");
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| AdapterError::Rejected(format!("unexpected response from {path}: {e}")))
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceFutures {
    fn name(&self) -> &str {
        "binance"
    }

    async fn initialize(&self) -> Result<AdapterReady, AdapterError> {
        // Signed call so bad credentials surface here, not on the first order.
        let _: serde_json::Value = self.send_signed(Method::GET, "/fapi/v2/balance", &[]).await?;

        tracing::info!(sandbox = self.sandbox, "Binance futures adapter ready");
        Ok(AdapterReady {
            exchange: self.name().into(),
            sandbox: self.sandbox,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, AdapterError> {
        if !is_valid_client_order_id(&request.client_order_id) {
            return Err(AdapterError::Rejected(format!(
                "client order id {:?} is not accepted by Binance",
                request.client_order_id
            )));
        }

        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", side_param(request.side).to_string()),
            ("type", order_type_param(request.order_type).to_string()),
            ("quantity", request.quantity.normalize().to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        if request.order_type == OrderType::Limit {
            let price = request
                .price
                .ok_or_else(|| AdapterError::Rejected("limit order without price".into()))?;
            params.push(("price", price.normalize().to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }

        let order: ApiOrder = self.send_signed(Method::POST, "/fapi/v1/order", &params).await?;

        tracing::info!(
            symbol = %request.symbol,
            order_id = order.order_id,
            status = %order.status,
            "Order submitted to Binance"
        );

        Ok(order_state(order))
    }

    async fn fetch_order(&self, exchange_order_id: &str, symbol: &str) -> Result<OrderState, AdapterError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", exchange_order_id.to_string()),
        ];
        let order: ApiOrder = self.send_signed(Method::GET, "/fapi/v1/order", &params).await?;
        Ok(order_state(order))
    }

    async fn fetch_order_by_client_id(&self, client_order_id: &str, symbol: &str) -> Result<OrderState, AdapterError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        let order: ApiOrder = self.send_signed(Method::GET, "/fapi/v1/order", &params).await?;
        Ok(order_state(order))
    }

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<CancelAck, AdapterError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", exchange_order_id.to_string()),
        ];
        let _: Ignored = self.send_signed(Method::DELETE, "/fapi/v1/order", &params).await?;
        tracing::info!(order_id = exchange_order_id, symbol, "Order cancelled on Binance");

        Ok(CancelAck {
            exchange_order_id: exchange_order_id.to_string(),
        })
    }

    async fn fetch_positions(&self, symbols: Option<&[String]>) -> Result<Vec<ExchangePosition>, AdapterError> {
        let rows: Vec<ApiPositionRisk> = self.send_signed(Method::GET, "/fapi/v2/positionRisk", &[]).await?;

        let positions = rows
            .into_iter()
            .filter(|r| symbols.map_or(true, |wanted| wanted.iter().any(|s| s == &r.symbol)))
            .filter_map(|r| {
                let amount = money::parse_decimal(&r.position_amt)?;
                if amount.is_zero() {
                    return None;
                }
                let direction = if amount > Decimal::ZERO {
                    Direction::Long
                } else {
                    Direction::Short
                };
                Some(ExchangePosition {
                    symbol: r.symbol,
                    direction,
                    size: amount.abs(),
                    entry_price: money::parse_decimal(&r.entry_price).filter(|p| !p.is_zero()),
                })
            })
            .collect();

        Ok(positions)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// HMAC-SHA256 of the query string, hex encoded.
pub fn sign(secret: &str, payload: &str) -> Result<String, AdapterError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AdapterError::Unsupported(format!("api secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Form-encode `params` plus the timing fields and append the signature of
/// exactly the encoded bytes.
fn signed_query(secret: &str, params: &[(&str, String)], timestamp: i64) -> Result<String, AdapterError> {
    let mut pairs = params.to_vec();
    pairs.push(("recvWindow", RECV_WINDOW_MS.to_string()));
    pairs.push(("timestamp", timestamp.to_string()));

    let query = serde_urlencoded::to_string(&pairs)
        .map_err(|e| AdapterError::Rejected(format!("query encoding: {e}")))?;
    let signature = sign(secret, &query)?;
    Ok(format!("{query}&signature={signature}"))
}

fn side_param(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn order_type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
    }
}

fn order_state(order: ApiOrder) -> OrderState {
    let status = match order.status.as_str() {
        "FILLED" => ExchangeOrderStatus::Filled,
        "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => ExchangeOrderStatus::Cancelled,
        "REJECTED" => ExchangeOrderStatus::Rejected,
        _ => ExchangeOrderStatus::Open,
    };

    let filled_quantity = order
        .executed_qty
        .as_deref()
        .and_then(money::parse_decimal)
        .unwrap_or(Decimal::ZERO);
    // Binance reports "0" / "0.00000" before anything fills.
    let average_price = order
        .avg_price
        .as_deref()
        .and_then(money::parse_decimal)
        .filter(|p| !p.is_zero());

    OrderState {
        exchange_order_id: order.order_id.to_string(),
        status,
        filled_quantity,
        average_price,
    }
}

fn transport_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AdapterError::Network(e.to_string())
    } else {
        AdapterError::Rejected(e.to_string())
    }
}

/// Map a non-2xx response onto the adapter error taxonomy.
fn classify_error(status: StatusCode, headers: &HeaderMap, body: &str) -> AdapterError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        return AdapterError::RateLimited { retry_after };
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return AdapterError::Network(format!("HTTP {status}"));
    }

    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) if err.code == NO_SUCH_ORDER || err.code == UNKNOWN_ORDER_CANCEL => {
            AdapterError::NotFound(err.msg)
        }
        Ok(err) if err.code == DUPLICATE_CLIENT_ORDER_ID => {
            AdapterError::Rejected(format!("duplicate client order id: {}", err.msg))
        }
        Ok(err) => AdapterError::Rejected(format!("{}: {}", err.code, err.msg)),
        Err(_) => AdapterError::Rejected(format!("HTTP {status}: {body}")),
    }
}
