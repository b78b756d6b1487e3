//! JSON-over-HTTP wager service client.
//!
//! Endpoints:
//! - `POST {base}/bets` places one wager
//! - `GET {base}/balance?currency=..&secondary=..` reads a pool balance
//!
//! Auth: `Authorization: Bearer {key}` when a key is configured.
//! Error bodies look like `{"code": "insufficient_funds", "message": "..."}`;
//! the `code` and HTTP status decide the [`TransportErrorKind`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::WagerService;
use crate::types::{BetRequest, Direction, TransportError, TransportErrorKind, WagerResult};

const SERVICE_NAME: &str = "remote";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PlaceBetBody<'a> {
    id: u64,
    currency: &'a str,
    amount: Decimal,
    chance: f64,
    direction: Direction,
    secondary: bool,
}

#[derive(Debug, Deserialize)]
struct PlaceBetResponse {
    won: bool,
    profit: Decimal,
    balance: Decimal,
    #[serde(default)]
    roll: f64,
    #[serde(default)]
    multiplier: f64,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Decimal,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RemoteService {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl RemoteService {
    /// Create a client for the service at `base_url`.
    ///
    /// `timeout` bounds every request; a request that exceeds it fails with
    /// [`TransportErrorKind::Timeout`].
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("DICEBOT/0.1")
            .build()
            .context("Failed to build HTTP client for wager service")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, TransportError> {
        let resp = self
            .authorized(builder)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = map_status(status, &body);
            warn!(status = %status, kind = %err.kind, "Wager service returned an error");
            return Err(err);
        }

        resp.json::<T>().await.map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("Failed to parse service response: {e}"),
            )
        })
    }
}

#[async_trait]
impl WagerService for RemoteService {
    async fn place_wager(
        &self,
        request: &BetRequest,
        currency: &str,
    ) -> Result<WagerResult, TransportError> {
        let spec = &request.spec;
        let body = PlaceBetBody {
            id: request.id,
            currency,
            amount: spec.amount(),
            chance: spec.win_chance(),
            direction: spec.direction(),
            secondary: spec.use_secondary_pool(),
        };
        let url = format!("{}/bets", self.base_url);
        let resp: PlaceBetResponse = self.send(self.http.post(&url).json(&body)).await?;

        debug!(
            id = request.id,
            won = resp.won,
            profit = %resp.profit,
            balance = %resp.balance,
            "Remote wager settled"
        );

        Ok(WagerResult {
            won: resp.won,
            profit: resp.profit,
            balance_after: resp.balance,
            roll: resp.roll,
            multiplier: resp.multiplier,
        })
    }

    async fn balance(&self, currency: &str, secondary: bool) -> Result<Decimal, TransportError> {
        let url = format!("{}/balance", self.base_url);
        let secondary = if secondary { "true" } else { "false" };
        let resp: BalanceResponse = self
            .send(
                self.http
                    .get(&url)
                    .query(&[("currency", currency), ("secondary", secondary)]),
            )
            .await?;
        Ok(resp.balance)
    }

    fn name(&self) -> &'static str {
        SERVICE_NAME
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Classify a non-success response by its error code, then its status.
pub fn map_status(status: StatusCode, body: &str) -> TransportError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {status}: {}", body.trim()));

    let kind = match (parsed.code.as_deref(), status) {
        (Some("insufficient_funds"), _) | (_, StatusCode::PAYMENT_REQUIRED) => {
            TransportErrorKind::InsufficientFunds
        }
        (Some("session_closed"), _) | (_, StatusCode::CONFLICT) | (_, StatusCode::GONE) => {
            TransportErrorKind::Closed
        }
        (Some("rate_limited"), _) | (_, StatusCode::TOO_MANY_REQUESTS) => {
            TransportErrorKind::RateLimited
        }
        (_, StatusCode::REQUEST_TIMEOUT) | (_, StatusCode::GATEWAY_TIMEOUT) => {
            TransportErrorKind::Timeout
        }
        (_, s) if s.is_client_error() => TransportErrorKind::Rejected,
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, message)
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportErrorKind::Network
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WagerSpec;
    use axum::extract::Query;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    // -- Error mapping tests --

    #[test]
    fn test_map_status_by_code() {
        let err = map_status(
            StatusCode::BAD_REQUEST,
            r#"{"code": "insufficient_funds", "message": "balance too low"}"#,
        );
        assert_eq!(err.kind, TransportErrorKind::InsufficientFunds);
        assert_eq!(err.message, "balance too low");

        let err = map_status(StatusCode::BAD_REQUEST, r#"{"code": "session_closed"}"#);
        assert_eq!(err.kind, TransportErrorKind::Closed);
    }

    #[test]
    fn test_map_status_by_status() {
        assert_eq!(
            map_status(StatusCode::PAYMENT_REQUIRED, "").kind,
            TransportErrorKind::InsufficientFunds
        );
        assert_eq!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "slow down").kind,
            TransportErrorKind::RateLimited
        );
        assert_eq!(map_status(StatusCode::GONE, "").kind, TransportErrorKind::Closed);
        assert_eq!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, "bad chance").kind,
            TransportErrorKind::Rejected
        );
        assert_eq!(
            map_status(StatusCode::INTERNAL_SERVER_ERROR, "oops").kind,
            TransportErrorKind::Other
        );
    }

    #[test]
    fn test_message_text_does_not_decide_kind() {
        let err = map_status(
            StatusCode::BAD_REQUEST,
            r#"{"code": "bad_amount", "message": "insufficient funds for this amount"}"#,
        );
        assert_eq!(err.kind, TransportErrorKind::Rejected);
    }

    // -- Client tests --

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_place_wager_and_balance() {
        let app = Router::new()
            .route(
                "/bets",
                post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(
                        headers.get("authorization").and_then(|v| v.to_str().ok()),
                        Some("Bearer k3y")
                    );
                    assert_eq!(body["direction"], "under");
                    assert_eq!(body["id"], 4);
                    Json(serde_json::json!({
                        "won": true, "profit": 0.98, "balance": 100.98,
                        "roll": 12.5, "multiplier": 1.98
                    }))
                }),
            )
            .route(
                "/balance",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let balance = if q.get("secondary").map(String::as_str) == Some("true") {
                        5.0
                    } else {
                        100.0
                    };
                    Json(serde_json::json!({ "balance": balance }))
                }),
            );
        let base = serve(app).await;

        let svc = RemoteService::new(
            &format!("{base}/"),
            Some(SecretString::new("k3y".into())),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(svc.base_url(), base);

        let spec = WagerSpec::new(dec!(1), 50.0, Direction::Under, false).unwrap();
        let result = svc.place_wager(&BetRequest::new(4, spec), "btc").await.unwrap();
        assert!(result.won);
        assert_eq!(result.profit, dec!(0.98));
        assert_eq!(result.balance_after, dec!(100.98));

        assert_eq!(svc.balance("btc", false).await.unwrap(), dec!(100));
        assert_eq!(svc.balance("btc", true).await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_place_wager_error_status() {
        let app = Router::new().route(
            "/bets",
            post(|| async {
                (
                    StatusCode::PAYMENT_REQUIRED,
                    Json(serde_json::json!({ "code": "insufficient_funds", "message": "need more" })),
                )
            }),
        );
        let base = serve(app).await;
        let svc = RemoteService::new(&base, None, Duration::from_secs(5)).unwrap();

        let spec = WagerSpec::new(dec!(1), 50.0, Direction::Over, false).unwrap();
        let err = svc.place_wager(&BetRequest::new(0, spec), "btc").await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::InsufficientFunds);
        assert_eq!(err.message, "need more");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let svc = RemoteService::new(&format!("http://{addr}"), None, Duration::from_secs(2)).unwrap();
        let err = svc.balance("btc", false).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Network);
    }
}
