use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::Minute;
use crate::observability::{
    LOCK_CONTENTION_TOTAL, LOCK_RECLAIMED_TOTAL, LOCK_TIMEOUTS_TOTAL, LOCKS_HELD,
};

/// Identity of one bookable slot: restaurant, service date, start minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub restaurant_id: Ulid,
    pub date: NaiveDate,
    pub minute: Minute,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rest/{}/{}/{}", self.restaurant_id, self.date, self.minute)
    }
}

/// Backoff and claim-lifetime knobs. Injected at construction; nothing here
/// is global.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long a claim stays valid without being released.
    pub ttl: Duration,
    /// First retry delay when a slot is contended.
    pub initial_backoff: Duration,
    /// Exponential growth factor for successive retries.
    pub backoff_multiplier: f64,
    /// Cap for the backoff ladder.
    pub max_backoff: Duration,
    /// Total time a caller will wait for a contended slot.
    pub max_wait: Duration,
    /// How many times a retryable operation is re-run under the lock.
    pub op_retries: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(250),
            max_wait: Duration::from_secs(2),
            op_retries: 2,
        }
    }
}

impl LockConfig {
    /// Delay before retry `attempt` (0-indexed), capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

struct Claim {
    token: u64,
    expires_at: Instant,
}

/// Advisory claims over booking slots.
///
/// The per-restaurant state lock already serializes commits; this layer
/// exists to bound how long concurrent writers for the SAME slot spin
/// against each other, and to carry a TTL so a holder that dies without
/// releasing never wedges its slot. Release requires the token handed out
/// at acquisition, so an expired holder cannot free a successor's claim.
pub struct SlotLockCoordinator {
    claims: DashMap<SlotKey, Claim>,
    next_token: AtomicU64,
    config: LockConfig,
}

impl SlotLockCoordinator {
    pub fn new(config: LockConfig) -> Self {
        Self {
            claims: DashMap::new(),
            next_token: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Claim the slot if it is free (or its current claim has expired).
    /// Returns the release token on success.
    pub fn try_acquire(&self, key: SlotKey) -> Option<u64> {
        let now = Instant::now();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let claim = Claim {
            token,
            expires_at: now + self.config.ttl,
        };
        match self.claims.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    // Previous holder died without releasing; take over in place.
                    counter!(LOCK_RECLAIMED_TOTAL).increment(1);
                    debug!(key = %key, "reclaimed expired slot claim");
                    occupied.insert(claim);
                    Some(token)
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(claim);
                gauge!(LOCKS_HELD).increment(1.0);
                Some(token)
            }
        }
    }

    /// Release a claim. Only the holder of `token` can release; a stale
    /// holder releasing after reclamation is a no-op.
    pub fn release(&self, key: SlotKey, token: u64) -> bool {
        let removed = self.claims.remove_if(&key, |_, claim| claim.token == token);
        if removed.is_some() {
            gauge!(LOCKS_HELD).decrement(1.0);
            true
        } else {
            false
        }
    }

    /// Claim the slot, waiting with exponential backoff while contended.
    /// Gives up with `LockBusy` once the wait budget is exhausted.
    pub async fn acquire(&self, key: SlotKey) -> Result<u64, EngineError> {
        if let Some(token) = self.try_acquire(key) {
            return Ok(token);
        }
        let deadline = Instant::now() + self.config.max_wait;
        let mut attempt: u32 = 0;
        loop {
            counter!(LOCK_CONTENTION_TOTAL).increment(1);
            let delay = self.config.backoff_delay(attempt);
            if Instant::now() + delay > deadline {
                counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(key = %key, "slot lock wait budget exhausted");
                return Err(EngineError::LockBusy {
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
            if let Some(token) = self.try_acquire(key) {
                return Ok(token);
            }
        }
    }

    /// Run `op` while holding the slot claim. Retryable failures are re-run
    /// up to `op_retries` times with the same backoff ladder; the claim is
    /// always released afterwards, success or not.
    pub async fn with_slot_lock<T, F, Fut>(&self, key: SlotKey, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let token = self.acquire(key).await?;
        let mut attempt: u32 = 0;
        let result = loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.config.op_retries => {
                    attempt += 1;
                    tokio::time::sleep(self.config.backoff_delay(attempt)).await;
                }
                other => break other,
            }
        };
        self.release(key, token);
        result
    }

    /// Drop every claim that expired before `now`. Returns how many were
    /// removed. Called periodically by the reaper.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let before = self.claims.len();
        self.claims.retain(|_, claim| claim.expires_at > now);
        let swept = before - self.claims.len();
        if swept > 0 {
            gauge!(LOCKS_HELD).decrement(swept as f64);
        }
        swept
    }

    pub fn held_count(&self) -> usize {
        self.claims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn key() -> SlotKey {
        SlotKey {
            restaurant_id: Ulid::new(),
            date: NaiveDate::parse_from_str("2025-06-06", "%Y-%m-%d").unwrap(),
            minute: 1080,
        }
    }

    fn coordinator() -> SlotLockCoordinator {
        SlotLockCoordinator::new(LockConfig::default())
    }

    #[test]
    fn key_renders_canonical_form() {
        let k = key();
        let rendered = k.to_string();
        assert!(rendered.starts_with("rest/"));
        assert!(rendered.ends_with("/2025-06-06/1080"));
    }

    #[test]
    fn acquire_then_release() {
        let locks = coordinator();
        let k = key();

        let token = locks.try_acquire(k).unwrap();
        assert!(locks.try_acquire(k).is_none());
        assert_eq!(locks.held_count(), 1);

        assert!(locks.release(k, token));
        assert_eq!(locks.held_count(), 0);
        assert!(locks.try_acquire(k).is_some());
    }

    #[test]
    fn release_requires_matching_token() {
        let locks = coordinator();
        let k = key();

        let token = locks.try_acquire(k).unwrap();
        assert!(!locks.release(k, token + 1));
        assert_eq!(locks.held_count(), 1);
        assert!(locks.release(k, token));
    }

    #[test]
    fn expired_claim_is_reclaimed() {
        let locks = SlotLockCoordinator::new(LockConfig {
            ttl: Duration::from_millis(10),
            ..LockConfig::default()
        });
        let k = key();

        let stale_token = locks.try_acquire(k).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // New holder takes over the expired claim
        let fresh_token = locks.try_acquire(k).unwrap();
        assert_ne!(stale_token, fresh_token);

        // The dead holder's release must not free the new claim
        assert!(!locks.release(k, stale_token));
        assert_eq!(locks.held_count(), 1);
        assert!(locks.release(k, fresh_token));
    }

    #[test]
    fn backoff_ladder_doubles_then_caps() {
        let config = LockConfig::default();
        let ladder: Vec<u64> = (0..7)
            .map(|n| config.backoff_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(ladder, vec![10, 20, 40, 80, 160, 250, 250]);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let locks = SlotLockCoordinator::new(LockConfig {
            ttl: Duration::from_millis(40),
            ..LockConfig::default()
        });
        let stale_a = key();
        let stale_b = key();
        locks.try_acquire(stale_a).unwrap();
        locks.try_acquire(stale_b).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        let fresh = key();
        locks.try_acquire(fresh).unwrap();

        assert_eq!(locks.sweep_expired(Instant::now()), 2);
        assert_eq!(locks.held_count(), 1);
        assert!(locks.try_acquire(fresh).is_none());
    }

    #[tokio::test]
    async fn acquire_times_out_when_held() {
        let locks = SlotLockCoordinator::new(LockConfig {
            max_wait: Duration::from_millis(50),
            ..LockConfig::default()
        });
        let k = key();
        let _held = locks.try_acquire(k).unwrap();

        let err = locks.acquire(k).await.unwrap_err();
        assert!(matches!(err, EngineError::LockBusy { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn acquire_succeeds_once_released() {
        let locks = Arc::new(coordinator());
        let k = key();
        let token = locks.try_acquire(k).unwrap();

        let holder = Arc::clone(&locks);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            holder.release(k, token);
        });

        let fresh = locks.acquire(k).await.unwrap();
        assert!(locks.release(k, fresh));
    }

    #[tokio::test]
    async fn concurrent_claimants_single_winner() {
        let locks = Arc::new(coordinator());
        let k = key();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            handles.push(tokio::spawn(async move { locks.try_acquire(k) }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn with_slot_lock_runs_op_and_releases() {
        let locks = coordinator();
        let k = key();

        let out = locks.with_slot_lock(k, || async { Ok::<_, EngineError>(7) }).await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn with_slot_lock_retries_retryable_failures() {
        let locks = coordinator();
        let k = key();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let out = locks
            .with_slot_lock(k, move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::LockBusy { key: "x".into() })
                    } else {
                        Ok(41)
                    }
                }
            })
            .await;

        assert_eq!(out.unwrap(), 41);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_slot_lock_exhausts_retry_budget() {
        let locks = coordinator();
        let k = key();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let out: Result<(), _> = locks
            .with_slot_lock(k, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::LockBusy { key: "x".into() })
                }
            })
            .await;

        assert!(matches!(out.unwrap_err(), EngineError::LockBusy { .. }));
        // Initial run plus op_retries re-runs
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn with_slot_lock_fails_fast_on_non_retryable() {
        let locks = coordinator();
        let k = key();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let out: Result<(), _> = locks
            .with_slot_lock(k, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Invalid("party size out of range"))
                }
            })
            .await;

        assert!(matches!(out.unwrap_err(), EngineError::Invalid(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(locks.held_count(), 0);
    }
}
