pub mod client;
pub mod retry;

pub use client::Client;
pub use reqwest::StatusCode;
pub use retry::{retry, RetryPolicy};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("unauthorized")]
    Unauthorized,
    #[error("server rejected the push")]
    Rejected,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
}

impl Error {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Reqwest(err) => client::is_retryable_error(err),
            Error::Failed(status) => client::is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use bonkarena_simulator::{Api, Simulator};
    use bonkarena_types::{AuthToken, Cents, PushMode, UserTotals};
    use std::{net::SocketAddr, sync::Arc};
    use tokio::time::{sleep, Duration};

    struct TestContext {
        simulator: Arc<Simulator>,
        base_url: String,
        server_handle: tokio::task::JoinHandle<()>,
    }

    impl TestContext {
        async fn new() -> Self {
            let simulator = Arc::new(Simulator::new());
            let api = Api::new(simulator.clone());

            // Start server on random port
            let addr = SocketAddr::from(([127, 0, 0, 1], 0));
            let router = api.router();
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let actual_addr = listener.local_addr().unwrap();
            let base_url = format!("http://{actual_addr}");

            let server_handle = tokio::spawn(async move {
                axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                .unwrap();
            });

            // Give server time to start
            sleep(Duration::from_millis(100)).await;

            Self {
                simulator,
                base_url,
                server_handle,
            }
        }

        fn create_client(&self) -> Client {
            Client::new(&self.base_url)
                .unwrap()
                .with_retry_policy(RetryPolicy::immediate(3))
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            self.server_handle.abort();
        }
    }

    fn auth() -> AuthToken {
        AuthToken::new("player-1")
    }

    #[tokio::test]
    async fn test_client_fetch_defaults_to_zero() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        let totals = client.fetch_user_totals(&auth()).await.unwrap();
        assert_eq!(totals, UserTotals::default());
    }

    #[tokio::test]
    async fn test_client_replace_then_add() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        let receipt = client
            .push_token_total(&auth(), Cents::new(5_000), PushMode::Replace)
            .await
            .unwrap();
        assert_eq!(receipt.total, Cents::new(5_000));

        // Replace is absolute, pushing it twice does not compound
        client
            .push_token_total(&auth(), Cents::new(5_000), PushMode::Replace)
            .await
            .unwrap();

        let receipt = client
            .push_token_total(&auth(), Cents::new(2_000), PushMode::Add)
            .await
            .unwrap();
        assert_eq!(receipt.total, Cents::new(7_000));

        let totals = client.fetch_user_totals(&auth()).await.unwrap();
        assert_eq!(totals.global_token_total, Cents::new(7_000));
        assert_eq!(totals.credits_total, Cents::ZERO);
    }

    #[tokio::test]
    async fn test_client_credits_push() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        client
            .push_credits_total(&auth(), Cents::new(1_250))
            .await
            .unwrap();
        let totals = client.fetch_user_totals(&auth()).await.unwrap();
        assert_eq!(totals.credits_total, Cents::new(1_250));
        assert_eq!(ctx.simulator.totals(&auth()), totals);
    }

    #[tokio::test]
    async fn test_client_unauthorized() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        let result = client.fetch_user_totals(&AuthToken::new("")).await;
        assert!(matches!(result, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn test_client_retries_transient_failures() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        ctx.simulator.fail_next(2);
        let receipt = client
            .push_token_total(&auth(), Cents::new(900), PushMode::Replace)
            .await
            .unwrap();
        assert_eq!(receipt.total, Cents::new(900));

        ctx.simulator.fail_next(3);
        let result = client.fetch_user_totals(&auth()).await;
        assert!(matches!(result, Err(Error::Failed(status)) if status.as_u16() == 503));
    }

    #[tokio::test]
    async fn test_client_does_not_retry_additive_push() {
        let ctx = TestContext::new().await;
        let client = ctx.create_client();

        ctx.simulator.fail_next(1);
        let result = client
            .push_token_total(&auth(), Cents::new(100), PushMode::Add)
            .await;
        assert!(matches!(result, Err(Error::Failed(_))));
        assert_eq!(ctx.simulator.totals(&auth()).global_token_total, Cents::ZERO);
    }

    #[test]
    fn test_client_rejects_bad_scheme() {
        assert!(matches!(
            Client::new("ftp://localhost"),
            Err(Error::InvalidScheme(_))
        ));
    }
}
