use super::cache::{cache_key, GeocodeCache, InsertOutcome};
use super::provider::{ChainOutcome, ProviderChain};
use crate::config::GeocodeConfig;
use crate::error::LocationSenseError;
use crate::events::{lock_or_recover, EventBus, Subscription};
use crate::types::{AddressData, GeoPosition};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

/// Where a delivered address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Api,
    /// Coordinate-only fallback provider
    Fallback,
}

/// Engine notifications. Every issued lookup emits `Started`, then
/// `Result` or `Error`, then always `Finished`.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeEvent {
    Started {
        position: GeoPosition,
    },
    Result {
        position: GeoPosition,
        data: AddressData,
        source: ResultSource,
    },
    Error {
        position: GeoPosition,
        error: String,
    },
    Finished {
        position: GeoPosition,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub samples: u64,
    pub cache_hits: u64,
    pub dropped_distance: u64,
    pub scheduled: u64,
    pub lookups: u64,
    pub api_results: u64,
    pub fallback_results: u64,
    pub errors: u64,
    /// Completions overtaken by a newer lookup
    pub stale_discarded: u64,
}

enum Decision {
    CacheHit(AddressData),
    Drop,
    /// Delayed lookup already armed
    Deferred,
    Issue(u64),
}

struct PendingLookup {
    generation: u64,
    handle: JoinHandle<()>,
}

struct EngineState {
    cache: GeocodeCache,
    last_success: Option<GeoPosition>,
    last_applied_seq: u64,
    last_issued_at: Option<Instant>,
    next_seq: u64,
    next_generation: u64,
    pending: Option<PendingLookup>,
    /// Lookups between sequence assignment and completion
    in_flight: usize,
    stats: EngineStats,
}

impl EngineState {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
        }
    }

    /// Take the next sequence number and count the lookup as in flight.
    fn begin_lookup(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.last_issued_at = Some(Instant::now());
        self.in_flight += 1;
        self.stats.lookups += 1;
        seq
    }
}

/// Decrements the in-flight count when a lookup ends, including when its
/// future is dropped mid-await.
struct InFlight<'a> {
    state: &'a Mutex<EngineState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = lock_or_recover(self.state);
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

struct EngineInner {
    config: GeocodeConfig,
    providers: ProviderChain,
    state: Mutex<EngineState>,
    events: EventBus<GeocodeEvent>,
}

/// Debounced, cached reverse geocoder.
///
/// # Per-sample decision
/// 1. Fresh cache entry for the rounded coordinates: serve it
/// 2. Closer than the speed bucket's `min_distance` to the last successful
///    position: drop the sample
/// 3. Sooner than the bucket's `min_delay` after the last issued lookup:
///    (re)arm the single delayed lookup with these coordinates
/// 4. Otherwise cancel any pending lookup and look up now
///
/// `force` skips 1-3.
///
/// # Ordering
/// Lookups may overlap. Each one takes a sequence number; a completion older
/// than the last applied one cannot move the last-known position, emit a
/// `Result`, or overwrite a newer cache entry.
///
/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct GeocodeEngine {
    inner: Arc<EngineInner>,
}

impl GeocodeEngine {
    pub fn new(config: GeocodeConfig, providers: ProviderChain) -> Self {
        log::debug!(
            "[geocode] engine with {} providers: {}",
            providers.len(),
            providers.names().join(", ")
        );
        let cache = GeocodeCache::new(config.cache_max_size, config.cache_ttl());
        GeocodeEngine {
            inner: Arc::new(EngineInner {
                config,
                providers,
                state: Mutex::new(EngineState {
                    cache,
                    last_success: None,
                    last_applied_seq: 0,
                    last_issued_at: None,
                    next_seq: 1,
                    next_generation: 0,
                    pending: None,
                    in_flight: 0,
                    stats: EngineStats::default(),
                }),
                events: EventBus::new("geocode"),
            }),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GeocodeEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    /// Feed one position sample.
    ///
    /// Returns the address when served from cache or looked up immediately;
    /// `None` when the sample was dropped, deferred, or every provider failed.
    /// Deferred lookups report through events only.
    pub async fn reverse_geocode(
        &self,
        position: GeoPosition,
        speed_ms: f64,
        force: bool,
    ) -> Option<AddressData> {
        let decision = self.decide(position, speed_ms, force);

        match decision {
            Decision::CacheHit(data) => {
                self.inner.events.emit(&GeocodeEvent::Result {
                    position,
                    data: data.clone(),
                    source: ResultSource::Cache,
                });
                Some(data)
            }
            Decision::Drop | Decision::Deferred => None,
            Decision::Issue(seq) => self.inner.run_lookup(position, seq).await,
        }
    }

    fn decide(&self, position: GeoPosition, speed_ms: f64, force: bool) -> Decision {
        let mut state = lock_or_recover(&self.inner.state);
        state.stats.samples += 1;

        if force {
            state.cancel_pending();
            return Decision::Issue(state.begin_lookup());
        }

        let key = cache_key(&position, self.inner.config.cache_precision);
        if let Some(data) = state.cache.get(&key) {
            log::debug!("[geocode] cache hit {}", key);
            state.stats.cache_hits += 1;
            return Decision::CacheHit(data);
        }

        log::debug!("[geocode] cache miss {}", key);

        let bucket = self.inner.config.thresholds.bucket_for(speed_ms);
        let threshold = *self.inner.config.thresholds.threshold(bucket);

        if let Some(last) = state.last_success {
            let moved = position.distance_m(&last);
            if moved < threshold.min_distance_m {
                log::debug!(
                    "[geocode] drop {}: moved {:.1} m < {} m ({})",
                    position,
                    moved,
                    threshold.min_distance_m,
                    bucket
                );
                state.stats.dropped_distance += 1;
                return Decision::Drop;
            }
        }

        if let Some(issued_at) = state.last_issued_at {
            if issued_at.elapsed() < threshold.min_delay() {
                log::debug!(
                    "[geocode] defer {} by {} ms ({})",
                    position,
                    threshold.min_delay_ms,
                    bucket
                );
                state.stats.scheduled += 1;
                self.arm_pending(&mut state, position, threshold.min_delay());
                return Decision::Deferred;
            }
        }

        state.cancel_pending();
        Decision::Issue(state.begin_lookup())
    }

    /// Replace the pending lookup with one for `position`. Runs under the
    /// same lock as the gate checks.
    fn arm_pending(&self, state: &mut EngineState, position: GeoPosition, delay: Duration) {
        state.cancel_pending();

        let generation = state.next_generation;
        state.next_generation += 1;

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some(seq) = inner.claim_pending(generation) {
                inner.run_lookup(position, seq).await;
            }
        });

        state.pending = Some(PendingLookup { generation, handle });
    }

    /// A delayed lookup is armed and has not fired yet
    pub fn has_pending(&self) -> bool {
        lock_or_recover(&self.inner.state).pending.is_some()
    }

    /// Nothing armed and no lookup running
    pub fn is_idle(&self) -> bool {
        let state = lock_or_recover(&self.inner.state);
        state.pending.is_none() && state.in_flight == 0
    }

    /// Wait until the engine is idle or `max_wait` has passed; returns
    /// whether it went idle.
    pub async fn wait_idle(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Drop the delayed lookup, if any
    pub fn cancel_pending(&self) {
        lock_or_recover(&self.inner.state).cancel_pending();
    }

    pub fn stats(&self) -> EngineStats {
        lock_or_recover(&self.inner.state).stats
    }

    pub fn cache_len(&self) -> usize {
        lock_or_recover(&self.inner.state).cache.len()
    }

    pub fn clear_cache(&self) {
        lock_or_recover(&self.inner.state).cache.clear();
    }

    /// Position of the most recent applied successful lookup
    pub fn last_position(&self) -> Option<GeoPosition> {
        lock_or_recover(&self.inner.state).last_success
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.inner.providers.names()
    }
}

impl EngineInner {
    /// Release the pending slot if it still belongs to `generation` and
    /// start the lookup in the same critical section.
    fn claim_pending(&self, generation: u64) -> Option<u64> {
        let mut state = lock_or_recover(&self.state);
        let owned = state
            .pending
            .as_ref()
            .map_or(false, |pending| pending.generation == generation);
        if !owned {
            return None;
        }
        // Not aborted: this is the running task
        state.pending = None;
        Some(state.begin_lookup())
    }

    /// Run a lookup started with `EngineState::begin_lookup`.
    async fn run_lookup(&self, position: GeoPosition, seq: u64) -> Option<AddressData> {
        let _in_flight = InFlight { state: &self.state };

        self.events.emit(&GeocodeEvent::Started { position });

        let outcome = self.providers.resolve(position).await;
        let (result, event) = self.apply_outcome(position, seq, outcome);

        if let Some(event) = event {
            self.events.emit(&event);
        }
        self.events.emit(&GeocodeEvent::Finished { position });
        result
    }

    fn apply_outcome(
        &self,
        position: GeoPosition,
        seq: u64,
        outcome: ChainOutcome,
    ) -> (Option<AddressData>, Option<GeocodeEvent>) {
        let mut state = lock_or_recover(&self.state);

        match outcome {
            ChainOutcome::Resolved { data, .. } if data.fallback => {
                // Coordinates only: not cached, so the next sample retries
                state.stats.fallback_results += 1;
                let event = GeocodeEvent::Result {
                    position,
                    data: data.clone(),
                    source: ResultSource::Fallback,
                };
                (Some(data), Some(event))
            }
            ChainOutcome::Resolved { data, provider } => {
                let key = cache_key(&position, self.config.cache_precision);
                let cache_stale = match state.cache.insert(key, data.clone(), seq) {
                    InsertOutcome::Stored { evicted } => {
                        if evicted > 0 {
                            log::debug!("[geocode] cache full, evicted {} entries", evicted);
                        }
                        false
                    }
                    InsertOutcome::Stale => true,
                };
                let superseded = seq < state.last_applied_seq;

                if superseded || cache_stale {
                    log::debug!(
                        "[geocode] discarding stale result #{} from {} for {}",
                        seq,
                        provider,
                        position
                    );
                    state.stats.stale_discarded += 1;
                    return (Some(data), None);
                }

                state.last_applied_seq = seq;
                state.last_success = Some(position);
                state.stats.api_results += 1;
                log::debug!("[geocode] {} -> {} ({})", position, data.address, provider);

                let event = GeocodeEvent::Result {
                    position,
                    data: data.clone(),
                    source: ResultSource::Api,
                };
                (Some(data), Some(event))
            }
            exhausted @ ChainOutcome::Exhausted { .. } => {
                state.stats.errors += 1;
                let error = LocationSenseError::Exhausted(exhausted.failure_summary());
                log::warn!("[geocode] {} for {}", error, position);
                let event = GeocodeEvent::Error {
                    position,
                    error: error.to_string(),
                };
                (None, Some(event))
            }
        }
    }
}
