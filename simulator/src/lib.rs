use axum::{
    extract::State as AxumState,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bonkarena_types::{
    AuthToken, PushCreditsTotal, PushMode, PushReceipt, PushTokenTotal, UserTotals,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

#[derive(Default)]
pub struct State {
    totals: HashMap<String, UserTotals>,
    token_pushes: HashMap<String, Vec<PushTokenTotal>>,
}

/// In-memory stand-in for the totals server.
#[derive(Default)]
pub struct Simulator {
    state: RwLock<State>,
    failures: AtomicUsize,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `n` requests with `503 Service Unavailable`.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn totals(&self, auth: &AuthToken) -> UserTotals {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to acquire read lock in totals: {}", e);
                return UserTotals::default();
            }
        };
        state
            .totals
            .get(auth.as_str())
            .copied()
            .unwrap_or_default()
    }

    /// Token pushes received for `auth`, oldest first.
    pub fn token_pushes(&self, auth: &AuthToken) -> Vec<PushTokenTotal> {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to acquire read lock in token_pushes: {}", e);
                return Vec::new();
            }
        };
        state
            .token_pushes
            .get(auth.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Seed the stored totals directly.
    pub fn set_totals(&self, auth: &AuthToken, totals: UserTotals) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to acquire write lock in set_totals: {}", e);
                return;
            }
        };
        state.totals.insert(auth.as_str().to_string(), totals);
    }

    /// Apply a token push. Returns `None` if an additive push would overflow.
    pub fn push_token(&self, auth: &AuthToken, push: PushTokenTotal) -> Option<UserTotals> {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to acquire write lock in push_token: {}", e);
                return None;
            }
        };
        let key = auth.as_str().to_string();
        let current = state.totals.get(&key).copied().unwrap_or_default();
        let global_token_total = match push.mode {
            PushMode::Replace => push.total,
            PushMode::Add => current.global_token_total.checked_add(push.total)?,
        };
        let updated = UserTotals {
            global_token_total,
            ..current
        };
        state.totals.insert(key.clone(), updated);
        state.token_pushes.entry(key).or_default().push(push);
        Some(updated)
    }

    /// Apply a credits push. Credits are always absolute, so this cannot fail.
    pub fn push_credits(&self, auth: &AuthToken, push: PushCreditsTotal) -> UserTotals {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .totals
            .entry(auth.as_str().to_string())
            .or_default();
        entry.credits_total = push.total;
        *entry
    }
}

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let router = Router::new()
            .route("/totals", get(fetch_totals))
            .route("/totals/token", post(push_token_total))
            .route("/totals/credits", post(push_credits_total))
            .layer(cors);

        // Local sims are effectively unlimited (~1B req/s with a large burst)
        let governor_conf = GovernorConfigBuilder::default()
            .per_nanosecond(1)
            .burst_size(2_000_000)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer {
                config: Arc::new(config),
            }),
            None => {
                tracing::warn!("Invalid rate limit configuration, serving without limits");
                router
            }
        };

        router.with_state(self.simulator.clone())
    }
}

fn bearer(headers: &HeaderMap) -> Option<AuthToken> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = AuthToken::new(value.strip_prefix("Bearer ")?.trim());
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Shared request preamble: injected failures first, then auth.
fn admit(simulator: &Simulator, headers: &HeaderMap) -> Result<AuthToken, Response> {
    if simulator.take_failure() {
        tracing::debug!("Injecting failure");
        return Err(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }
    bearer(headers).ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())
}

fn receipt(total: bonkarena_types::Cents) -> Json<PushReceipt> {
    Json(PushReceipt {
        success: true,
        total,
        receipt: Uuid::new_v4(),
    })
}

async fn fetch_totals(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
) -> Response {
    let auth = match admit(&simulator, &headers) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    Json(simulator.totals(&auth)).into_response()
}

async fn push_token_total(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Json(push): Json<PushTokenTotal>,
) -> Response {
    let auth = match admit(&simulator, &headers) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    match simulator.push_token(&auth, push) {
        Some(totals) => {
            tracing::info!(total = %totals.global_token_total, mode = ?push.mode, "Token total updated");
            receipt(totals.global_token_total).into_response()
        }
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn push_credits_total(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Json(push): Json<PushCreditsTotal>,
) -> Response {
    let auth = match admit(&simulator, &headers) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    let totals = simulator.push_credits(&auth, push);
    tracing::info!(total = %totals.credits_total, "Credits total updated");
    receipt(totals.credits_total).into_response()
}
