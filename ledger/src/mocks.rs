//! Scriptable stand-ins for the totals server and durable storage.

use crate::{
    remote::{Remote, RemoteError},
    storage::{MemoryStorage, Storage, StorageError},
};
use bonkarena_types::{AuthToken, Cents, PushMode, PushReceipt, UserTotals};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    totals: UserTotals,
    fail_fetches: usize,
    fail_pushes: usize,
    denied: bool,
    fetches: usize,
    push_attempts: usize,
    token_pushes: Vec<(Cents, PushMode)>,
    credits_pushes: Vec<Cents>,
}

/// In-memory totals server.
///
/// Failures are injected as retryable network errors. Token pushes can be
/// held at a gate to simulate a slow server.
pub struct MockRemote {
    state: Mutex<MockState>,
    held: AtomicBool,
    gate: Semaphore,
    arrived: Notify,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            arrived: Notify::new(),
        }
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_token_total(&self, total: Cents) {
        self.state().totals.global_token_total = total;
    }

    pub fn set_credits_total(&self, total: Cents) {
        self.state().totals.credits_total = total;
    }

    pub fn token_total(&self) -> Cents {
        self.state().totals.global_token_total
    }

    /// Fail the next `n` fetches.
    pub fn fail_fetches(&self, n: usize) {
        self.state().fail_fetches = n;
    }

    /// Fail the next `n` push attempts.
    pub fn fail_pushes(&self, n: usize) {
        self.state().fail_pushes = n;
    }

    /// Answer every request with `Unauthorized`.
    pub fn deny(&self) {
        self.state().denied = true;
    }

    pub fn fetches(&self) -> usize {
        self.state().fetches
    }

    pub fn push_attempts(&self) -> usize {
        self.state().push_attempts
    }

    /// Accepted token pushes, oldest first.
    pub fn token_pushes(&self) -> Vec<(Cents, PushMode)> {
        self.state().token_pushes.clone()
    }

    /// Accepted credits pushes, oldest first.
    pub fn credits_pushes(&self) -> Vec<Cents> {
        self.state().credits_pushes.clone()
    }

    /// Block token pushes until [`MockRemote::release`].
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let held and future token pushes through.
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.close();
    }

    /// Wait until a token push is parked at the gate.
    pub async fn wait_until_held(&self) {
        self.arrived.notified().await;
    }

    fn admit(&self, is_push: bool) -> Result<(), RemoteError> {
        let mut state = self.state();
        if is_push {
            state.push_attempts += 1;
        } else {
            state.fetches += 1;
        }
        if state.denied {
            return Err(RemoteError::Unauthorized);
        }
        let failures = if is_push {
            &mut state.fail_pushes
        } else {
            &mut state.fail_fetches
        };
        if *failures > 0 {
            *failures -= 1;
            return Err(RemoteError::Network("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Remote for MockRemote {
    async fn fetch_user_totals(&self, _auth: &AuthToken) -> Result<UserTotals, RemoteError> {
        self.admit(false)?;
        Ok(self.state().totals)
    }

    async fn push_token_total(
        &self,
        _auth: &AuthToken,
        total: Cents,
        mode: PushMode,
    ) -> Result<PushReceipt, RemoteError> {
        self.admit(true)?;
        if self.held.load(Ordering::SeqCst) {
            self.arrived.notify_one();
            // Closed on release
            let _ = self.gate.acquire().await;
        }

        let mut state = self.state();
        let stored = match mode {
            PushMode::Replace => total,
            PushMode::Add => state
                .totals
                .global_token_total
                .checked_add(total)
                .ok_or_else(|| RemoteError::Rejected("overflow".to_string()))?,
        };
        state.totals.global_token_total = stored;
        state.token_pushes.push((total, mode));
        Ok(PushReceipt {
            success: true,
            total: stored,
            receipt: Uuid::new_v4(),
        })
    }

    async fn push_credits_total(
        &self,
        _auth: &AuthToken,
        total: Cents,
    ) -> Result<PushReceipt, RemoteError> {
        self.admit(true)?;
        let mut state = self.state();
        state.totals.credits_total = total;
        state.credits_pushes.push(total);
        Ok(PushReceipt {
            success: true,
            total,
            receipt: Uuid::new_v4(),
        })
    }
}

/// [`MemoryStorage`] that can be told to start failing writes.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    writes_left: Mutex<Option<usize>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` more writes, then fail every write after that.
    pub fn fail_writes_after(&self, n: usize) {
        *self
            .writes_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(n);
    }
}

impl Storage for FlakyStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        {
            let mut writes_left = self
                .writes_left
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match writes_left.as_mut() {
                Some(0) => return Err(StorageError::Unavailable),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}
