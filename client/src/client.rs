use crate::{
    retry::{retry, RetryPolicy},
    Error, Result,
};
use bonkarena_types::{
    AuthToken, Cents, PushCreditsTotal, PushMode, PushReceipt, PushTokenTotal, UserTotals,
};
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Totals API client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60)) // Keep connections alive
            .tcp_keepalive(Duration::from_secs(30)) // TCP keepalive
            .build()?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Fetch the server's authoritative totals for the token holder
    pub async fn fetch_user_totals(&self, auth: &AuthToken) -> Result<UserTotals> {
        let url = self.base_url.join("totals")?;
        debug!(%url, "fetching totals");
        let response = self
            .send_with_retry(true, || self.http_client.get(url.clone()).bearer_auth(auth.as_str()))
            .await?;
        decode(response).await
    }

    /// Push a token total. `Replace` overwrites the stored total, `Add` adds to it.
    pub async fn push_token_total(
        &self,
        auth: &AuthToken,
        total: Cents,
        mode: PushMode,
    ) -> Result<PushReceipt> {
        let url = self.base_url.join("totals/token")?;
        debug!(%url, %total, ?mode, "pushing token total");
        self.post_json_with_retry(url, auth, &PushTokenTotal { total, mode }, mode.is_idempotent())
            .await
    }

    /// Overwrite the stored credits total
    pub async fn push_credits_total(&self, auth: &AuthToken, total: Cents) -> Result<PushReceipt> {
        let url = self.base_url.join("totals/credits")?;
        debug!(%url, %total, "pushing credits total");
        self.post_json_with_retry(url, auth, &PushCreditsTotal { total }, true)
            .await
    }

    async fn post_json_with_retry<B: Serialize>(
        &self,
        url: Url,
        auth: &AuthToken,
        body: &B,
        idempotent: bool,
    ) -> Result<PushReceipt> {
        let response = self
            .send_with_retry(idempotent, || {
                self.http_client
                    .post(url.clone())
                    .bearer_auth(auth.as_str())
                    .json(body)
            })
            .await?;
        let receipt: PushReceipt = decode(response).await?;
        if !receipt.success {
            return Err(Error::Rejected);
        }
        Ok(receipt)
    }

    async fn send_with_retry(
        &self,
        idempotent: bool,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let make_request = &make_request;
        retry(&self.retry_policy, idempotent, Error::is_retryable, move || async move {
            let response = make_request().send().await?;
            let status = response.status();
            if is_retryable_status(status) {
                return Err(Error::Failed(status));
            }
            Ok(response)
        })
        .await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    match response.status() {
        reqwest::StatusCode::OK => Ok(response.json().await?),
        reqwest::StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
        status => Err(Error::Failed(status)),
    }
}

pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
