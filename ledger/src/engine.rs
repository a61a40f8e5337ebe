use crate::{
    balance::Ledger,
    cancel::CancelSignal,
    config::Config,
    coordinator::{Withdrawal, WithdrawalCoordinator},
    events::EventBus,
    persistent::{SyncOutcome, SyncRequest},
    profile::Profile,
    reconcile::ReconciliationService,
    remote::{Remote, RemoteError},
    storage::{Storage, StorageError},
    Error, LedgerError, Ledgers,
};
use bonkarena_types::{AuthToken, Cents, PlayerSnapshot, PushReceipt, UserTotals};
use std::sync::Arc;
use tracing::info;

/// Everything one player needs, wired together.
pub struct Engine<R: Remote> {
    config: Config,
    profile: Arc<Profile>,
    events: EventBus,
    ledgers: Ledgers,
    reconcile: ReconciliationService<R>,
    coordinator: Arc<WithdrawalCoordinator<R>>,
}

impl<R: Remote> Engine<R> {
    pub fn new(config: Config, storage: Arc<dyn Storage>, remote: Arc<R>) -> Self {
        let events = EventBus::new(config.event_capacity);
        let profile = Arc::new(Profile::load(storage, &config.address));
        let ledgers = Ledgers::new(profile.clone(), events.clone());
        let reconcile =
            ReconciliationService::new(ledgers.clone(), remote, config.retry_policy());
        let coordinator = Arc::new(WithdrawalCoordinator::new(
            ledgers.clone(),
            reconcile.clone(),
            events.clone(),
        ));
        info!(
            address = %config.address,
            global = %ledgers.global.get(),
            credits = %ledgers.credits.get(),
            "engine ready"
        );
        Self {
            config,
            profile,
            events,
            ledgers,
            reconcile,
            coordinator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    /// Zero the session balances.
    pub fn start_session(&self) -> Result<(), LedgerError> {
        self.ledgers.arena.reset()?;
        self.ledgers.arena_credits.reset()?;
        info!(address = %self.config.address, "session started");
        Ok(())
    }

    /// Adopt the server's totals. The cached balances stand if it is unreachable.
    pub async fn refresh(&self, auth: &AuthToken) -> Result<UserTotals, RemoteError> {
        self.reconcile.refresh(auth).await
    }

    /// Credit BONK earned in play.
    pub fn earn(&self, amount: f64) -> Result<Cents, LedgerError> {
        self.ledgers.arena.add(amount)
    }

    /// Credit session credits earned in play.
    pub fn earn_credits(&self, amount: f64) -> Result<Cents, LedgerError> {
        self.ledgers.arena_credits.add(amount)
    }

    pub async fn withdraw(&self, success_ratio: f64, auth: &AuthToken) -> Result<Withdrawal, Error> {
        self.coordinator.execute_withdrawal(success_ratio, auth).await
    }

    pub fn cancel_withdrawal(&self) -> bool {
        self.coordinator.cancel()
    }

    /// Push the cached token total as the server's absolute total.
    pub async fn publish(&self, auth: &AuthToken) -> SyncOutcome {
        let request = SyncRequest::publish(self.ledgers.global.get());
        self.reconcile
            .sync_global(auth, request, &CancelSignal::new())
            .await
    }

    pub async fn push_credits(&self, auth: &AuthToken) -> Result<PushReceipt, RemoteError> {
        self.reconcile.push_credits(auth).await
    }

    /// Raise the high score if `score` beats it. Returns whether it changed.
    pub fn record_score(&self, score: u64) -> Result<bool, StorageError> {
        self.profile.update(|snapshot| snapshot.record_score(score))
    }

    pub fn update_setting(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), StorageError> {
        let key = key.into();
        self.profile.update(|snapshot| {
            snapshot.settings.insert(key, value);
        })
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.profile.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks::MockRemote, storage::MemoryStorage};
    use bonkarena_types::LedgerKind;

    fn config() -> Config {
        Config {
            address: "wallet-1".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_session_play_and_withdraw() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MockRemote::new());
        remote.set_token_total(Cents::new(1_000));
        let engine = Engine::new(config(), storage.clone(), remote.clone());
        let auth = AuthToken::new("t");

        engine.refresh(&auth).await.unwrap();
        engine.start_session().unwrap();
        engine.earn(12.5).unwrap();
        engine.earn(-2.5).unwrap();
        engine.earn_credits(4.0).unwrap();

        let result = engine.withdraw(1.0, &auth).await.unwrap();
        assert!(matches!(result, Withdrawal::Completed { .. }));
        assert_eq!(engine.ledgers().global.get(), Cents::new(2_000));
        assert_eq!(engine.ledgers().credits.get(), Cents::new(440));
        assert_eq!(engine.events().displayed(LedgerKind::Credits), Some(Cents::new(440)));

        // Persisted balances survive a restart
        let reloaded = Engine::new(config(), storage, remote);
        assert_eq!(reloaded.ledgers().global.get(), Cents::new(2_000));
        assert_eq!(reloaded.ledgers().credits.get(), Cents::new(440));
        assert_eq!(reloaded.ledgers().arena.get(), Cents::ZERO);
    }

    #[tokio::test]
    async fn test_start_session_clears_only_session_balances() {
        let engine = Engine::new(
            config(),
            Arc::new(MemoryStorage::new()),
            Arc::new(MockRemote::new()),
        );
        engine.ledgers().global.replace(Cents::new(50)).unwrap();
        engine.earn(3.0).unwrap();
        engine.earn_credits(1.0).unwrap();

        engine.start_session().unwrap();
        engine.start_session().unwrap();
        assert_eq!(engine.ledgers().arena.get(), Cents::ZERO);
        assert_eq!(engine.ledgers().arena_credits.get(), Cents::ZERO);
        assert_eq!(engine.ledgers().global.get(), Cents::new(50));
    }

    #[tokio::test]
    async fn test_profile_fields() {
        let engine = Engine::new(
            config(),
            Arc::new(MemoryStorage::new()),
            Arc::new(MockRemote::new()),
        );
        assert!(engine.record_score(30).unwrap());
        assert!(!engine.record_score(10).unwrap());
        engine
            .update_setting("volume", serde_json::json!(0.5))
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.address, "wallet-1");
        assert_eq!(snapshot.high_score, 30);
        assert_eq!(snapshot.settings["volume"], serde_json::json!(0.5));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_cache() {
        let remote = Arc::new(MockRemote::new());
        let engine = Engine::new(config(), Arc::new(MemoryStorage::new()), remote.clone());
        engine.ledgers().global.replace(Cents::new(77)).unwrap();
        remote.deny();

        assert_eq!(engine.refresh(&AuthToken::new("t")).await, Err(RemoteError::Unauthorized));
        assert_eq!(engine.ledgers().global.get(), Cents::new(77));
    }

    #[tokio::test]
    async fn test_publish_overwrites_server_total() {
        let remote = Arc::new(MockRemote::new());
        remote.set_token_total(Cents::new(9_999));
        let engine = Engine::new(config(), Arc::new(MemoryStorage::new()), remote.clone());
        engine.ledgers().global.replace(Cents::new(120)).unwrap();

        let outcome = engine.publish(&AuthToken::new("t")).await;
        assert!(outcome.is_synced());
        assert_eq!(remote.token_total(), Cents::new(120));
        assert_eq!(remote.fetches(), 0);
    }
}
