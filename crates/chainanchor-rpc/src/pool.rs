//! Multi-endpoint failover pool with round-robin selection, rate-limit
//! cooldowns and permanent disabling of broken endpoints.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use chainanchor_observability::PipelineMetrics;

use crate::classify::{classify, FailureClass};
use crate::error::TransportError;
use crate::transport::RpcTransport;

/// Configuration for the endpoint pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long a rate-limited endpoint is skipped.
    pub cooldown: Duration,
    /// Minimum gap between "entering cooldown" logs for one endpoint.
    pub rate_limit_log_interval: Duration,
    /// Minimum gap between "all endpoints cooling" logs for the pool.
    pub all_cooling_log_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            rate_limit_log_interval: Duration::from_secs(10),
            all_cooling_log_interval: Duration::from_secs(2),
        }
    }
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHealth {
    pub url: String,
    pub disabled: bool,
    pub cooling: bool,
}

#[derive(Debug, Default)]
struct EndpointState {
    cooldown_until: Option<Instant>,
    disabled: bool,
    last_rate_limit_log: Option<Instant>,
}

impl EndpointState {
    fn is_cooling(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    endpoints: Vec<EndpointState>,
    last_index: Option<usize>,
    last_all_cooling_log: Option<Instant>,
}

struct Selection {
    index: usize,
    wait: Option<Duration>,
}

/// Round-robin endpoint pool.
///
/// Mutable endpoint state sits behind a `std::sync::Mutex` that is never held
/// across an `.await`, so the pool can be shared between tasks via `Arc`.
pub struct EndpointPool {
    transports: Vec<Arc<dyn RpcTransport>>,
    state: Mutex<PoolState>,
    config: PoolConfig,
    metrics: Option<PipelineMetrics>,
}

impl EndpointPool {
    /// Build a pool from a list of transports. Fails on an empty list.
    pub fn new(
        transports: Vec<Arc<dyn RpcTransport>>,
        config: PoolConfig,
    ) -> Result<Self, TransportError> {
        if transports.is_empty() {
            return Err(TransportError::EmptyPool);
        }
        let state = PoolState {
            endpoints: transports.iter().map(|_| EndpointState::default()).collect(),
            ..Default::default()
        };
        Ok(Self {
            transports,
            state: Mutex::new(state),
            config,
            metrics: None,
        })
    }

    /// Record rate-limit events into `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of endpoints in the pool.
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// Always `false`: a pool cannot be built empty.
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Returns a summary of each endpoint's state.
    pub fn health_summary(&self) -> Vec<EndpointHealth> {
        let now = Instant::now();
        let state = self.state.lock().unwrap();
        self.transports
            .iter()
            .zip(state.endpoints.iter())
            .map(|(t, s)| EndpointHealth {
                url: t.url().to_string(),
                disabled: s.disabled,
                cooling: s.is_cooling(now),
            })
            .collect()
    }

    /// Call `method` on a healthy endpoint and deserialize the result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        self.with_endpoint(|transport| {
            let params = params.clone();
            async move { transport.call::<T>(method, params).await }
        })
        .await
    }

    /// Run `op` against one endpoint, failing over on rate limits and broken
    /// endpoints. Errors classified as [`FailureClass::Other`] are returned
    /// immediately.
    pub async fn with_endpoint<R, F, Fut>(&self, mut op: F) -> Result<R, TransportError>
    where
        F: FnMut(Arc<dyn RpcTransport>) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let mut last_error = None;

        for _ in 0..self.transports.len() {
            let Some(selection) = self.select() else { break };
            if let Some(wait) = selection.wait {
                tokio::time::sleep(wait).await;
            }

            let transport = Arc::clone(&self.transports[selection.index]);
            match op(transport).await {
                Ok(value) => return Ok(value),
                Err(err) => match classify(&err) {
                    FailureClass::RateLimited => {
                        self.enter_cooldown(selection.index, &err);
                        last_error = Some(err);
                    }
                    FailureClass::FatalEndpoint => {
                        self.disable(selection.index, &err);
                        last_error = Some(err);
                    }
                    FailureClass::Other => return Err(err),
                },
            }
        }

        // One last try on whatever is still selectable, cooling or not.
        if let Some(selection) = self.select() {
            if let Some(wait) = selection.wait {
                tokio::time::sleep(wait).await;
            }
            let transport = Arc::clone(&self.transports[selection.index]);
            return match op(transport).await {
                Ok(value) => Ok(value),
                Err(err) => {
                    match classify(&err) {
                        FailureClass::RateLimited => self.enter_cooldown(selection.index, &err),
                        FailureClass::FatalEndpoint => self.disable(selection.index, &err),
                        FailureClass::Other => {}
                    }
                    Err(err)
                }
            };
        }

        Err(last_error.unwrap_or(TransportError::AllProvidersDown))
    }

    // ─── Selection ───────────────────────────────────────────────────────────

    fn select(&self) -> Option<Selection> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let n = state.endpoints.len();
        let start = state.last_index.map_or(0, |i| (i + 1) % n);

        let healthy = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&idx| {
                let s = &state.endpoints[idx];
                !s.disabled && !s.is_cooling(now)
            });
        if let Some(index) = healthy {
            state.last_index = Some(index);
            return Some(Selection { index, wait: None });
        }

        // Degraded mode: everything left is cooling; take the one closest
        // to recovery, earliest in round-robin order on ties.
        let index = (0..n)
            .map(|offset| (start + offset) % n)
            .filter(|&idx| !state.endpoints[idx].disabled)
            .min_by_key(|&idx| state.endpoints[idx].remaining(now))?;

        let wait = state.endpoints[index].remaining(now).min(self.config.cooldown);
        state.last_index = Some(index);

        let should_log = state
            .last_all_cooling_log
            .map_or(true, |at| now.duration_since(at) >= self.config.all_cooling_log_interval);
        if should_log {
            state.last_all_cooling_log = Some(now);
            tracing::warn!(
                url = %self.transports[index].url(),
                wait_ms = wait.as_millis() as u64,
                "All RPC endpoints cooling down; sleeping before retry"
            );
        }

        Some(Selection {
            index,
            wait: (!wait.is_zero()).then_some(wait),
        })
    }

    // ─── State transitions ───────────────────────────────────────────────────

    fn enter_cooldown(&self, index: usize, err: &TransportError) {
        let now = Instant::now();
        let url = self.transports[index].url();
        {
            let mut state = self.state.lock().unwrap();
            let endpoint = &mut state.endpoints[index];
            if endpoint.disabled || endpoint.is_cooling(now) {
                return;
            }
            endpoint.cooldown_until = Some(now + self.config.cooldown);

            let should_log = endpoint
                .last_rate_limit_log
                .map_or(true, |at| now.duration_since(at) >= self.config.rate_limit_log_interval);
            if should_log {
                endpoint.last_rate_limit_log = Some(now);
                tracing::warn!(
                    url = %url,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    error = %err,
                    "RPC endpoint rate limited; entering cooldown"
                );
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_limit(url);
        }
    }

    fn disable(&self, index: usize, err: &TransportError) {
        let mut state = self.state.lock().unwrap();
        let endpoint = &mut state.endpoints[index];
        if endpoint.disabled {
            return;
        }
        endpoint.disabled = true;
        tracing::error!(
            url = %self.transports[index].url(),
            error = %err,
            "Disabling RPC endpoint due to persistent bad responses"
        );
    }
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &self.health_summary())
            .finish()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
