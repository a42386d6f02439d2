//! Read-through cache for a single session's billing record.
//!
//! One `BillingStatusCache` exists per client session (or per user on the
//! server). Refreshes are single-flight: callers that arrive while a fetch
//! is running await the same shared future instead of starting their own.
//!
//! Freshness rules:
//! - an entry is fresh while `now - fetched_at <= ttl`;
//! - `invalidate()` drops `fetched_at`, so the entry is stale until the next
//!   successful fetch that *started after* the invalidation;
//! - a fetch that was already running when `invalidate()` landed still
//!   stores its record, but leaves it stale, and its waiters refetch once.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::models::BillingRecord;

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("billing collaborator unreachable: {0}")]
    Unreachable(String),

    #[error("billing collaborator responded with HTTP {0}")]
    Status(u16),

    #[error("billing fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("billing storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Unreachable(err.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for FetchError {
    fn from(err: sea_orm::DbErr) -> Self {
        FetchError::Storage(err.to_string())
    }
}

/// Where a cache gets its billing record from: the database on the server,
/// `GET /api/billing/status` on the client.
#[async_trait]
pub trait BillingSource: Send + Sync {
    async fn fetch(&self) -> Result<BillingRecord, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub record: BillingRecord,
    pub freshness: Freshness,
}

impl CachedRecord {
    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }
}

struct CacheEntry {
    record: BillingRecord,
    // None after invalidate()
    fetched_at: Option<Instant>,
}

#[derive(Clone)]
struct Refreshed {
    record: BillingRecord,
    superseded: bool,
}

type InFlight = Shared<BoxFuture<'static, Refreshed>>;

#[derive(Default)]
struct State {
    entry: Option<CacheEntry>,
    generation: u64,
    resets: u64,
    in_flight: Option<InFlight>,
}

struct Inner {
    source: Arc<dyn BillingSource>,
    ttl: Duration,
    fetch_timeout: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn freshness(&self, entry: &CacheEntry, now: Instant) -> Freshness {
        match entry.fetched_at {
            None => Freshness::Invalidated,
            Some(at) if now.saturating_duration_since(at) <= self.ttl => Freshness::Fresh,
            Some(_) => Freshness::Stale,
        }
    }

    fn complete_refresh(
        &self,
        generation: u64,
        resets: u64,
        outcome: Result<BillingRecord, FetchError>,
    ) -> Refreshed {
        let mut state = self.lock();
        state.in_flight = None;

        if state.resets != resets {
            // 会话已重置，结果丢弃
            let record = outcome.unwrap_or_default();
            return Refreshed {
                record,
                superseded: true,
            };
        }

        let superseded = state.generation != generation;
        match outcome {
            Ok(record) => {
                let fetched_at = if superseded { None } else { Some(Instant::now()) };
                state.entry = Some(CacheEntry {
                    record: record.clone(),
                    fetched_at,
                });
                Refreshed { record, superseded }
            }
            Err(err) => {
                let record = match &state.entry {
                    Some(entry) => {
                        log::warn!(
                            "Billing status refresh failed, keeping last known plan {}: {err}",
                            entry.record.plan
                        );
                        entry.record.clone()
                    }
                    None => {
                        log::warn!(
                            "Billing status refresh failed with no prior record, assuming free plan: {err}"
                        );
                        BillingRecord::default()
                    }
                };
                Refreshed { record, superseded }
            }
        }
    }
}

#[derive(Clone)]
pub struct BillingStatusCache {
    inner: Arc<Inner>,
}

impl BillingStatusCache {
    pub fn new(source: Arc<dyn BillingSource>) -> Self {
        Self::with_settings(source, DEFAULT_TTL, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_settings(source: Arc<dyn BillingSource>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                fetch_timeout,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Returns the cached record if fresh, otherwise joins or starts a refresh.
    ///
    /// Never fails: fetch errors degrade to the last known record, or to the
    /// free/no-subscription default when nothing was ever fetched.
    pub async fn get(&self) -> BillingRecord {
        let mut retried = false;
        loop {
            let pending = {
                let mut state = self.inner.lock();
                if let Some(entry) = &state.entry
                    && self.inner.freshness(entry, Instant::now()) == Freshness::Fresh
                {
                    return entry.record.clone();
                }
                if let Some(in_flight) = state.in_flight.clone() {
                    in_flight
                } else {
                    self.start_refresh(&mut state)
                }
            };

            let refreshed = pending.await;
            if !refreshed.superseded || retried {
                return refreshed.record;
            }
            log::debug!("Billing refresh was superseded by an invalidation, fetching again");
            retried = true;
        }
    }

    fn start_refresh(&self, state: &mut State) -> InFlight {
        let inner = Arc::clone(&self.inner);
        let generation = state.generation;
        let resets = state.resets;
        let refresh = async move {
            let outcome = match tokio::time::timeout(inner.fetch_timeout, inner.source.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(inner.fetch_timeout)),
            };
            inner.complete_refresh(generation, resets, outcome)
        }
        .boxed()
        .shared();
        state.in_flight = Some(refresh.clone());
        refresh
    }

    /// Forces the next `get()` to refetch. Call after every checkout confirm.
    pub fn invalidate(&self) {
        let mut state = self.inner.lock();
        state.generation += 1;
        if let Some(entry) = state.entry.as_mut() {
            entry.fetched_at = None;
        }
    }

    /// Forgets the record entirely (session end).
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.resets += 1;
        state.generation += 1;
        state.entry = None;
    }

    /// Non-blocking peek; `None` means nothing has been fetched this session.
    pub fn cached(&self) -> Option<CachedRecord> {
        let state = self.inner.lock();
        let now = Instant::now();
        state.entry.as_ref().map(|entry| CachedRecord {
            record: entry.record.clone(),
            freshness: self.inner.freshness(entry, now),
        })
    }
}
