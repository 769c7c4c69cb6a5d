//! Signing key cache with lazy fetch, coalescing, expiry, and background refresh
//!
//! - **Lazy**: a lookup miss fetches the issuer's full key set and installs it.
//! - **Coalesced**: concurrent misses and scheduled refreshes share one remote
//!   call; every waiter receives the keys installed by that call.
//! - **Expiring**: an entry older than the expiry window is never returned and
//!   is evicted on the next lookup or sweep.
//! - **Refreshed**: a background task re-fetches the key set on a fixed period
//!   shorter than the expiry window and merges it in. Keys the issuer stopped
//!   publishing stay until they expire, which covers overlapping rotations.
//!
//! Readers never observe a partially installed key: entries are replaced whole
//! under the write lock. A fetch whose waiters are all cancelled is dropped and
//! the next lookup starts a new one.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::source::{KeySource, SigningKey};
use crate::config::KeyStoreConfig;
use crate::error::KeyFetchError;
use crate::metrics;

type FetchOutcome = Result<Arc<Vec<SigningKey>>, KeyFetchError>;
type InFlightFetch = Shared<BoxFuture<'static, FetchOutcome>>;
type KeyMap = HashMap<String, CachedKey>;

/// Outstanding fetch and the number of lookups awaiting it
struct InFlight {
    fetch: InFlightFetch,
    waiters: usize,
}

/// Releases a waiter's claim on the in-flight slot when dropped
///
/// A completed fetch clears the slot. A cancelled waiter only decrements the
/// count, and the last one out clears the slot, dropping the fetch with it.
struct FetchWaiter<'a> {
    slot: &'a std::sync::Mutex<Option<InFlight>>,
    fetch: InFlightFetch,
    completed: bool,
}

impl Drop for FetchWaiter<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = slot.as_mut() else {
            return;
        };
        if !current.fetch.ptr_eq(&self.fetch) {
            return;
        }
        current.waiters = current.waiters.saturating_sub(1);
        if self.completed || current.waiters == 0 {
            if !self.completed {
                debug!("All waiters cancelled, abandoning key fetch");
            }
            *slot = None;
        }
    }
}

/// Cache entry with the time its key set was fetched
#[derive(Debug, Clone)]
struct CachedKey {
    key: SigningKey,
    fetched_at: Instant,
}

impl CachedKey {
    fn is_fresh(&self, expiry: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < expiry
    }
}

/// Key store owning the key cache and its refresh task
///
/// # Example
///
/// ```rust,no_run
/// # use oidc_identity::keys::{KeyStore, RemoteKeySource};
/// # use oidc_identity::KeyStoreConfig;
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # tokio_test::block_on(async {
/// let source = RemoteKeySource::new("https://issuer.example.com", Duration::from_secs(10))?;
/// let store = KeyStore::new(Arc::new(source), KeyStoreConfig::default());
///
/// match store.get_key("kg2LYs2T0CTjIfj4rt6JIynen38").await {
///     Some(key) => println!("resolved {}", key.key_id()),
///     None => println!("unknown key"),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct KeyStore {
    /// Where keys come from
    source: Arc<dyn KeySource>,
    /// Refresh/expiry schedule
    config: KeyStoreConfig,
    /// key ID -> cached key
    cache: Arc<RwLock<KeyMap>>,
    /// The single outstanding remote fetch, if any
    in_flight: std::sync::Mutex<Option<InFlight>>,
    /// Completion time of the last successful fetch
    last_fetch: Arc<RwLock<Option<Instant>>>,
    /// Background refresh task
    refresh_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("config", &self.config)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Create a key store and start its background refresh task
    ///
    /// The task holds only a weak reference and stops when the store is
    /// dropped or [`shutdown`](Self::shutdown) is called. Outside a Tokio
    /// runtime no task is started and the store relies on lazy fetching.
    pub fn new(source: Arc<dyn KeySource>, config: KeyStoreConfig) -> Arc<Self> {
        let store = Self::without_refresh(source, config);
        Self::spawn_refresh(&store);
        store
    }

    /// Create a key store without a background refresh task
    ///
    /// Keys are fetched lazily on misses; call [`refresh`](Self::refresh) to
    /// drive refreshes manually.
    pub fn without_refresh(source: Arc<dyn KeySource>, config: KeyStoreConfig) -> Arc<Self> {
        Arc::new(Self {
            source,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            in_flight: std::sync::Mutex::new(None),
            last_fetch: Arc::new(RwLock::new(None)),
            refresh_task: std::sync::Mutex::new(None),
        })
    }

    /// Look up a key, fetching on a miss
    ///
    /// Returns `None` if the key is not published or the fetch failed. Use
    /// [`lookup`](Self::lookup) to tell those apart.
    pub async fn get_key(&self, key_id: &str) -> Option<SigningKey> {
        match self.lookup(key_id).await {
            Ok(key) => key,
            Err(e) => {
                warn!(key_id = key_id, error = %e, "Signing key lookup failed");
                None
            }
        }
    }

    /// Look up a key, fetching on a miss, preserving fetch errors
    ///
    /// # Errors
    ///
    /// Returns the [`KeyFetchError`] of the remote fetch triggered by a miss.
    /// The store itself is unaffected and the next lookup fetches again.
    pub async fn lookup(&self, key_id: &str) -> Result<Option<SigningKey>, KeyFetchError> {
        let expiry = self.config.key_expiry();
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(key_id)
                && entry.is_fresh(expiry, Instant::now())
            {
                debug!(key_id = key_id, "Using cached signing key");
                return Ok(Some(entry.key.clone()));
            }
        }

        // Absent or expired; drop anything stale before going remote
        self.evict_expired().await;

        if self.recently_fetched().await {
            debug!(
                key_id = key_id,
                "Unknown key ID but keys were fetched moments ago, not fetching again"
            );
            return Ok(None);
        }

        debug!(key_id = key_id, "Signing key not cached, fetching key set");
        let keys = self.fetch_coalesced().await?;
        let found = keys.iter().find(|key| key.key_id() == key_id).cloned();
        if found.is_none() {
            warn!(key_id = key_id, "Key ID not present in published key set");
        }
        Ok(found)
    }

    /// Re-fetch the published key set and merge it into the cache
    ///
    /// Keys in the new set get a fresh timestamp; keys no longer published
    /// are kept until they expire. Returns the number of keys published.
    ///
    /// # Errors
    ///
    /// Returns the [`KeyFetchError`] of the remote fetch. Cached keys are left
    /// as they were.
    pub async fn refresh(&self) -> Result<usize, KeyFetchError> {
        let keys = self.fetch_coalesced().await?;
        let evicted = self.evict_expired().await;
        debug!(published = keys.len(), evicted, "Signing keys refreshed");
        Ok(keys.len())
    }

    /// Remove every entry older than the expiry window; returns how many were removed
    pub async fn evict_expired(&self) -> usize {
        let expiry = self.config.key_expiry();
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|key_id, entry| {
            let keep = entry.is_fresh(expiry, now);
            if !keep {
                info!(key_id = %key_id, "Evicting expired signing key");
            }
            keep
        });
        before - cache.len()
    }

    /// Number of cached keys (including any not yet swept)
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Schedule configuration
    pub fn config(&self) -> &KeyStoreConfig {
        &self.config
    }

    /// Whether the background refresh task is running
    pub fn is_refreshing(&self) -> bool {
        self.refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the background refresh task; lookups keep working lazily
    pub fn shutdown(&self) {
        if let Some(task) = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("Key refresh task stopped");
        }
    }

    async fn recently_fetched(&self) -> bool {
        let window = self.config.min_fetch_interval();
        if window.is_zero() {
            return false;
        }
        self.last_fetch
            .read()
            .await
            .is_some_and(|at| at.elapsed() < window)
    }

    /// Join the outstanding fetch, or start one
    async fn fetch_coalesced(&self) -> FetchOutcome {
        let fetch = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_mut() {
                Some(current) => {
                    debug!(waiters = current.waiters, "Joining in-flight key fetch");
                    current.waiters += 1;
                    current.fetch.clone()
                }
                None => {
                    let fetch = self.start_fetch();
                    *slot = Some(InFlight {
                        fetch: fetch.clone(),
                        waiters: 1,
                    });
                    fetch
                }
            }
        };

        let mut waiter = FetchWaiter {
            slot: &self.in_flight,
            fetch: fetch.clone(),
            completed: false,
        };
        let outcome = fetch.await;
        waiter.completed = true;
        outcome
    }

    /// Build the shared fetch future; it installs its result exactly once
    fn start_fetch(&self) -> InFlightFetch {
        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let last_fetch = Arc::clone(&self.last_fetch);

        async move {
            let result = source.fetch_keys().await;
            metrics::record_key_fetch(result.is_ok());
            let keys = result?;

            let now = Instant::now();
            {
                let mut cache = cache.write().await;
                for key in &keys {
                    cache.insert(
                        key.key_id().to_string(),
                        CachedKey {
                            key: key.clone(),
                            fetched_at: now,
                        },
                    );
                }
            }
            *last_fetch.write().await = Some(now);

            Ok(Arc::new(keys))
        }
        .boxed()
        .shared()
    }

    fn spawn_refresh(store: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime available, background key refresh disabled");
            return;
        };

        let period = store.config.refresh_interval();
        let weak: Weak<Self> = Arc::downgrade(store);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                match store.refresh().await {
                    Ok(published) => debug!(published, "Scheduled key refresh complete"),
                    Err(e) => warn!(error = %e, "Scheduled key refresh failed, keeping cached keys"),
                }
            }
        });

        *store
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        info!(period_secs = period.as_secs(), "Background key refresh started");
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
