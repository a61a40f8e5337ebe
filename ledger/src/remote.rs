//! Seam between the ledgers and the totals server.

use bonkarena_client::Client;
use bonkarena_types::{AuthToken, Cents, PushMode, PushReceipt, UserTotals};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("rejected: {0}")]
    Rejected(String),
    /// The sequence was cancelled before the request went out.
    #[error("cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

impl From<bonkarena_client::Error> for RemoteError {
    fn from(err: bonkarena_client::Error) -> Self {
        match err {
            bonkarena_client::Error::Unauthorized => RemoteError::Unauthorized,
            err if err.is_retryable() => RemoteError::Network(err.to_string()),
            err => RemoteError::Rejected(err.to_string()),
        }
    }
}

/// The totals server as seen by the ledgers.
pub trait Remote: Send + Sync + 'static {
    fn fetch_user_totals(
        &self,
        auth: &AuthToken,
    ) -> impl Future<Output = Result<UserTotals, RemoteError>> + Send;

    fn push_token_total(
        &self,
        auth: &AuthToken,
        total: Cents,
        mode: PushMode,
    ) -> impl Future<Output = Result<PushReceipt, RemoteError>> + Send;

    fn push_credits_total(
        &self,
        auth: &AuthToken,
        total: Cents,
    ) -> impl Future<Output = Result<PushReceipt, RemoteError>> + Send;
}

impl Remote for Client {
    async fn fetch_user_totals(&self, auth: &AuthToken) -> Result<UserTotals, RemoteError> {
        Ok(Client::fetch_user_totals(self, auth).await?)
    }

    async fn push_token_total(
        &self,
        auth: &AuthToken,
        total: Cents,
        mode: PushMode,
    ) -> Result<PushReceipt, RemoteError> {
        Ok(Client::push_token_total(self, auth, total, mode).await?)
    }

    async fn push_credits_total(
        &self,
        auth: &AuthToken,
        total: Cents,
    ) -> Result<PushReceipt, RemoteError> {
        Ok(Client::push_credits_total(self, auth, total).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_mapping() {
        let unavailable = bonkarena_client::Error::Failed(status(503));
        assert!(RemoteError::from(unavailable).is_retryable());

        let bad_request = bonkarena_client::Error::Failed(status(400));
        assert!(matches!(
            RemoteError::from(bad_request),
            RemoteError::Rejected(_)
        ));

        assert_eq!(
            RemoteError::from(bonkarena_client::Error::Unauthorized),
            RemoteError::Unauthorized
        );
        assert!(!RemoteError::Unauthorized.is_retryable());
    }

    #[test]
    fn test_cancelled_is_not_retried() {
        assert!(!RemoteError::Cancelled.is_retryable());
    }

    fn status(code: u16) -> bonkarena_client::StatusCode {
        bonkarena_client::StatusCode::from_u16(code).unwrap()
    }
}
