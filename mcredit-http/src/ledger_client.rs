//! A [`Ledger`] implementation that talks to a remote credit ledger over HTTP.
//!
//! [`HttpLedger`] posts JSON to three endpoints relative to its base URL:
//!
//! - `./requests/start` - verify a token and open an accounting record
//! - `./requests/redeem` - burn credits against an open record
//! - `./access-token` - exchange a plan subscription for an agent token
//!
//! Non-200 answers are mapped to [`LedgerError`] verdicts by status code:
//! `401` is an invalid token, `402` an insufficient balance, `403` a missing
//! subscription, `404` an unknown request, and `429`/`5xx` or transport
//! failures an unavailable ledger.

use std::time::Duration;

use http::StatusCode;
use mcredit::{
    AccessToken, BoxFuture, Ledger, LedgerError, RedeemReceipt, SettlementRequest, StartRequest,
    StartedRequest,
};
use reqwest::Client;
use serde::Serialize;
use url::Url;

/// Errors that can occur while talking to the remote ledger.
#[derive(Debug, thiserror::Error)]
pub enum HttpLedgerError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl From<HttpLedgerError> for LedgerError {
    fn from(err: HttpLedgerError) -> Self {
        match err {
            HttpLedgerError::HttpStatus { status, body, .. } => match status {
                StatusCode::UNAUTHORIZED => Self::InvalidToken(body),
                StatusCode::PAYMENT_REQUIRED => Self::InsufficientBalance,
                StatusCode::FORBIDDEN => Self::NotSubscribed,
                StatusCode::NOT_FOUND => Self::UnknownRequest(body),
                s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                    Self::Unavailable(format!("{s}: {body}"))
                }
                s => Self::Malformed(format!("unexpected status {s}: {body}")),
            },
            e @ (HttpLedgerError::Http { .. } | HttpLedgerError::ResponseBodyRead { .. }) => {
                Self::Unavailable(e.to_string())
            }
            e @ (HttpLedgerError::UrlParse { .. }
            | HttpLedgerError::JsonDeserialization { .. }) => Self::Malformed(e.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenRequest<'a> {
    plan_id: &'a str,
    agent_id: &'a str,
}

/// A client for a remote credit ledger.
#[derive(Clone, Debug)]
pub struct HttpLedger {
    /// Base URL of the ledger (e.g. `https://ledger.example/api/`)
    base_url: Url,
    /// Full URL to `POST /requests/start`
    start_url: Url,
    /// Full URL to `POST /requests/redeem`
    redeem_url: Url,
    /// Full URL to `POST /access-token`
    access_token_url: Url,
    client: Client,
    /// Sent as a bearer token with every request
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl HttpLedger {
    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./requests/start` URL.
    #[must_use]
    pub const fn start_url(&self) -> &Url {
        &self.start_url
    }

    /// Returns the computed `./requests/redeem` URL.
    #[must_use]
    pub const fn redeem_url(&self) -> &Url {
        &self.redeem_url
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Constructs a client from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`HttpLedgerError::UrlParse`] if an endpoint URL cannot be
    /// derived from `base_url`.
    pub fn try_new(base_url: Url) -> Result<Self, HttpLedgerError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| HttpLedgerError::UrlParse { context, source })
        };
        let start_url = join("./requests/start", "Failed to construct ./requests/start URL")?;
        let redeem_url = join("./requests/redeem", "Failed to construct ./requests/redeem URL")?;
        let access_token_url = join("./access-token", "Failed to construct ./access-token URL")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            start_url,
            redeem_url,
            access_token_url,
            api_key: None,
            timeout: None,
        })
    }

    /// Authenticates every request with `Authorization: Bearer <api_key>`.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends `POST /requests/start`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpLedgerError`] if the request fails or the ledger does
    /// not answer `200 OK` with a valid body.
    pub async fn start(&self, request: &StartRequest) -> Result<StartedRequest, HttpLedgerError> {
        self.post_json(&self.start_url, "POST /requests/start", request)
            .await
    }

    /// Sends `POST /requests/redeem`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpLedgerError`] if the request fails or the ledger does
    /// not answer `200 OK` with a valid body.
    pub async fn redeem(
        &self,
        request: &SettlementRequest,
    ) -> Result<RedeemReceipt, HttpLedgerError> {
        self.post_json(&self.redeem_url, "POST /requests/redeem", request)
            .await
    }

    /// Sends `POST /access-token`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpLedgerError`] if the request fails or the ledger does
    /// not answer `200 OK` with a valid body.
    pub async fn access_token(
        &self,
        plan_id: &str,
        agent_id: &str,
    ) -> Result<AccessToken, HttpLedgerError> {
        let body = AccessTokenRequest { plan_id, agent_id };
        self.post_json(&self.access_token_url, "POST /access-token", &body)
            .await
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, HttpLedgerError>
    where
        T: Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| HttpLedgerError::Http { context, source: e })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| HttpLedgerError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| HttpLedgerError::ResponseBodyRead { context, source: e })?;
            Err(HttpLedgerError::HttpStatus {
                context,
                status,
                body,
            })
        };

        if let Err(err) = &result {
            tracing::error!(error = %err, "request to ledger failed");
        }
        result
    }
}

impl TryFrom<&str> for HttpLedger {
    type Error = HttpLedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // A single trailing slash keeps `join` relative to the full base path.
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| HttpLedgerError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

impl Ledger for HttpLedger {
    fn get_access_token<'a>(
        &'a self,
        plan_id: &'a str,
        agent_id: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken, LedgerError>> {
        Box::pin(async move { Ok(self.access_token(plan_id, agent_id).await?) })
    }

    fn start_processing_request<'a>(
        &'a self,
        request: &'a StartRequest,
    ) -> BoxFuture<'a, Result<StartedRequest, LedgerError>> {
        Box::pin(async move { Ok(self.start(request).await?) })
    }

    fn redeem_credits<'a>(
        &'a self,
        request: &'a SettlementRequest,
    ) -> BoxFuture<'a, Result<RedeemReceipt, LedgerError>> {
        Box::pin(async move { Ok(self.redeem(request).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcredit::Balance;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn start_request() -> StartRequest {
        StartRequest {
            agent_id: "agent-1".into(),
            token: "tok".into(),
            endpoint: "mcp://weather-mcp/tools/weather.today".into(),
            http_verb: "POST".into(),
        }
    }

    fn ledger(server: &MockServer) -> HttpLedger {
        HttpLedger::try_from(format!("{}/api", server.uri()).as_str())
            .unwrap()
            .with_api_key("secret")
    }

    #[test]
    fn endpoints_are_relative_to_base_path() {
        let ledger = HttpLedger::try_from("https://ledger.example/api/v1").unwrap();
        assert_eq!(
            ledger.start_url().as_str(),
            "https://ledger.example/api/v1/requests/start"
        );
        assert_eq!(
            ledger.redeem_url().as_str(),
            "https://ledger.example/api/v1/requests/redeem"
        );
    }

    #[tokio::test]
    async fn start_sends_camel_case_body_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/requests/start"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({
                "agentId": "agent-1",
                "token": "tok",
                "endpoint": "mcp://weather-mcp/tools/weather.today",
                "httpVerb": "POST",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agentRequestId": "req-9",
                "balance": {"isSubscriber": true, "balance": 7},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let started = ledger(&server).start(&start_request()).await.unwrap();
        assert_eq!(started.agent_request_id, "req-9");
        assert_eq!(
            started.balance,
            Balance {
                is_subscriber: true,
                balance: 7,
                plan_id: None
            }
        );
    }

    #[tokio::test]
    async fn redeem_returns_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/requests/redeem"))
            .and(body_json(json!({"agentRequestId": "req-9", "token": "tok", "credits": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "creditsRedeemed": 2,
                "txHash": "0xabc",
            })))
            .mount(&server)
            .await;

        let receipt = ledger(&server)
            .redeem_credits(&SettlementRequest {
                agent_request_id: "req-9".into(),
                token: "tok".into(),
                credits: 2,
            })
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.credits_redeemed, 2);
        assert_eq!(receipt.tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn access_token_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/access-token"))
            .and(body_json(json!({"planId": "plan-1", "agentId": "agent-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"accessToken": "tok-new"})),
            )
            .mount(&server)
            .await;

        let token = ledger(&server)
            .get_access_token("plan-1", "agent-1")
            .await
            .unwrap();
        assert_eq!(token.access_token, "tok-new");
    }

    #[tokio::test]
    async fn status_codes_map_to_ledger_verdicts() {
        let cases = [
            (401, LedgerError::InvalidToken("bad token".into())),
            (402, LedgerError::InsufficientBalance),
            (403, LedgerError::NotSubscribed),
        ];
        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/requests/start"))
                .respond_with(ResponseTemplate::new(status).set_body_string("bad token"))
                .mount(&server)
                .await;

            let err = ledger(&server)
                .start_processing_request(&start_request())
                .await
                .unwrap_err();
            assert_eq!(err, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/requests/start"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = ledger(&server)
            .start_processing_request(&start_request())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/requests/start"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = ledger(&server)
            .start_processing_request(&start_request())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_ledger_is_unavailable() {
        let ledger = HttpLedger::try_from("http://127.0.0.1:9/")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let err = ledger
            .start_processing_request(&start_request())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }
}
