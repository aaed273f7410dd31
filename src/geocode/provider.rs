use crate::error::ProviderError;
use crate::types::{AddressData, GeoPosition};
use async_trait::async_trait;
use std::sync::Arc;

/// A reverse-geocoding backend.
///
/// Implementations may fail freely; the chain isolates each attempt.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    async fn lookup(&self, position: GeoPosition) -> Result<AddressData, ProviderError>;
}

/// Result of running the whole chain
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Resolved {
        data: AddressData,
        provider: String,
    },
    Exhausted {
        failures: Vec<(String, ProviderError)>,
    },
}

impl ChainOutcome {
    /// Human-readable summary of every failed attempt
    pub fn failure_summary(&self) -> String {
        match self {
            ChainOutcome::Resolved { .. } => String::new(),
            ChainOutcome::Exhausted { failures } if failures.is_empty() => {
                "no providers configured".to_string()
            }
            ChainOutcome::Exhausted { failures } => failures
                .iter()
                .map(|(name, err)| format!("{}: {}", name, err))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Ordered provider list tried until one yields a usable address.
///
/// A provider error or an empty result moves on to the next provider;
/// nothing short of exhausting the list fails the lookup.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn GeocodeProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        ProviderChain {
            providers: Vec::new(),
        }
    }

    pub fn with(mut self, provider: Arc<dyn GeocodeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn push(&mut self, provider: Arc<dyn GeocodeProvider>) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn resolve(&self, position: GeoPosition) -> ChainOutcome {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let error = match provider.lookup(position).await {
                Ok(data) if data.is_usable() => {
                    log::debug!("[geocode] {} resolved {}", provider.name(), position);
                    return ChainOutcome::Resolved {
                        data,
                        provider: provider.name().to_string(),
                    };
                }
                Ok(_) => ProviderError::Empty,
                Err(e) => e,
            };

            log::warn!(
                "[geocode] provider {} failed for {}: {}",
                provider.name(),
                position,
                error
            );
            failures.push((provider.name().to_string(), error));
        }

        ChainOutcome::Exhausted { failures }
    }
}

/// Terminal provider: the coordinates themselves, so a chain ending with
/// it never comes back empty.
pub struct CoordinateFallback;

#[async_trait]
impl GeocodeProvider for CoordinateFallback {
    fn name(&self) -> &str {
        "coordinates"
    }

    async fn lookup(&self, position: GeoPosition) -> Result<AddressData, ProviderError> {
        Ok(AddressData {
            address: position.to_string(),
            city: String::new(),
            fallback: true,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Duration;

    /// Provider replaying queued outcomes, then repeating `fallback`.
    pub struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<AddressData, ProviderError>>>,
        fallback: Result<AddressData, ProviderError>,
        delay: Duration,
        calls: AtomicUsize,
        positions: Mutex<Vec<GeoPosition>>,
    }

    impl ScriptedProvider {
        pub fn new(name: &str, fallback: Result<AddressData, ProviderError>) -> Self {
            ScriptedProvider {
                name: name.to_string(),
                script: Mutex::new(VecDeque::new()),
                fallback,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                positions: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(name: &str, address: &str) -> Self {
            Self::new(name, Ok(AddressData::new(address, "Klagenfurt")))
        }

        pub fn failing(name: &str) -> Self {
            Self::new(name, Err(ProviderError::Network("connection refused".into())))
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn then(self, outcome: Result<AddressData, ProviderError>) -> Self {
            self.script.lock().unwrap().push_back(outcome);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn positions(&self) -> Vec<GeoPosition> {
            self.positions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GeocodeProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn lookup(&self, position: GeoPosition) -> Result<AddressData, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.positions.lock().unwrap().push(position);
            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;

    fn pos() -> GeoPosition {
        GeoPosition::new(46.62, 14.29).unwrap()
    }

    #[tokio::test]
    async fn test_first_usable_provider_wins() {
        let primary = Arc::new(ScriptedProvider::ok("poi", "Alter Platz 1"));
        let secondary = Arc::new(ScriptedProvider::ok("nominatim", "Hauptstraße 5"));
        let chain = ProviderChain::new()
            .with(primary.clone())
            .with(secondary.clone());

        let outcome = chain.resolve(pos()).await;

        assert_eq!(
            outcome,
            ChainOutcome::Resolved {
                data: AddressData::new("Alter Platz 1", "Klagenfurt"),
                provider: "poi".to_string(),
            }
        );
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_error_falls_through() {
        let primary = Arc::new(ScriptedProvider::failing("poi"));
        let secondary = Arc::new(ScriptedProvider::ok("nominatim", "Hauptstraße 5"));
        let chain = ProviderChain::new()
            .with(primary.clone())
            .with(secondary.clone());

        match chain.resolve(pos()).await {
            ChainOutcome::Resolved { data, provider } => {
                assert_eq!(data.address, "Hauptstraße 5");
                assert_eq!(provider, "nominatim");
            }
            other => panic!("expected resolution, got {:?}", other),
        }
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_falls_through() {
        let empty = Arc::new(ScriptedProvider::new("poi", Ok(AddressData::default())));
        let chain = ProviderChain::new()
            .with(empty)
            .with(Arc::new(CoordinateFallback));

        match chain.resolve(pos()).await {
            ChainOutcome::Resolved { data, provider } => {
                assert_eq!(provider, "coordinates");
                assert_eq!(data.address, "46.62000, 14.29000");
                assert!(data.fallback);
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_failure() {
        let chain = ProviderChain::new()
            .with(Arc::new(ScriptedProvider::failing("poi")))
            .with(Arc::new(ScriptedProvider::new("nominatim", Err(ProviderError::Timeout))));

        let outcome = chain.resolve(pos()).await;

        match &outcome {
            ChainOutcome::Exhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[1], ("nominatim".to_string(), ProviderError::Timeout));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        let summary = outcome.failure_summary();
        assert!(summary.contains("poi: Network error"));
        assert!(summary.contains("nominatim: Request timed out"));
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = ProviderChain::new();
        let outcome = chain.resolve(pos()).await;
        assert_eq!(outcome.failure_summary(), "no providers configured");
        assert!(chain.is_empty());
    }
}
