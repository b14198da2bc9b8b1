//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! and relay sessions simultaneously.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: HTTP workers and session actors all need the same config, call flag and registry
//! - **Memory safety**: Automatically cleans up data when the last reference is dropped
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: Every request updates the metrics while the metrics endpoint reads them
//!
//! ### What is NOT behind a lock:
//! - **config**: Read-only after startup, so a plain `Arc<AppConfig>` is enough
//! - **call**: A single atomic boolean (`CallFlag`)
//! - **Per-session relay state**: Owned by each session actor, never shared

use crate::config::AppConfig;
use crate::enrichment::{OpenMeteoClient, WeatherProvider};
use crate::relay::{CallFlag, SessionRegistry};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use uuid::Uuid;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Cloning copies the `Arc`s, not the data behind them
/// - **Option<Arc<dyn WeatherProvider>>**: A trait object, so tests can swap the provider;
///   `None` when enrichment is disabled
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration (immutable after startup)
    pub config: Arc<AppConfig>,

    /// Process-wide call-active flag, toggled by /start-call and /stop-call
    pub call: CallFlag,

    /// Live relay sessions
    pub sessions: SessionRegistry,

    /// Weather lookups for transcript enrichment
    pub weather: Option<Arc<dyn WeatherProvider>>,

    /// Request metrics (constantly being updated by the middleware)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no Arc<RwLock> needed)
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total errors (for reliability monitoring)
/// - **endpoint_metrics**: Per-endpoint statistics (for performance optimization)
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    ///
    /// ## What this does:
    /// 1. Freezes the config behind an Arc
    /// 2. Creates an inactive call flag and an empty session registry
    /// 3. Builds the Open-Meteo provider unless enrichment is disabled
    /// 4. Records the current time as the server start time
    pub fn new(config: AppConfig) -> Self {
        let weather: Option<Arc<dyn WeatherProvider>> = if config.enrichment.enabled {
            Some(Arc::new(OpenMeteoClient::new(&config.enrichment)))
        } else {
            None
        };

        Self::with_provider(config, weather)
    }

    /// Same as `new`, with an explicit weather provider.
    pub fn with_provider(config: AppConfig, weather: Option<Arc<dyn WeatherProvider>>) -> Self {
        Self {
            config: Arc::new(config),
            call: CallFlag::new(),
            sessions: SessionRegistry::new(),
            weather,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    ///
    /// ## Rust Concepts:
    /// - **unwrap_or_else(PoisonError::into_inner)**: A panic in another request while it held
    ///   the lock "poisons" it; counters are still usable, so we take the data anyway
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /health", "POST /start-call")
    /// - **duration_ms**: How long the request took to process (in milliseconds)
    /// - **is_error**: Whether this request resulted in an error
    ///
    /// ## HashMap operations:
    /// The first time we see an endpoint, we create a new EndpointMetric with default values.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a snapshot of current metrics (used for the metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of live relay sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.count()
    }

    /// Claim a relay session slot, unless the configured maximum is reached.
    pub fn reserve_session(&self, id: Uuid) -> bool {
        self.sessions
            .try_reserve(id, self.config.performance.max_concurrent_sessions)
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds (0.0 before the first request).
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
