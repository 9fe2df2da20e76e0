//! Client Configuration Settings
//!
//! Configuration types for the feed client, loaded from environment variables.
//! Malformed numeric values fall back to their defaults; malformed URLs,
//! symbols and feed names are errors.

use std::time::Duration;

use crate::domain::connection::ReconnectConfig;
use crate::domain::feed::{
    DEFAULT_QUOTE_ASSET, EndpointError, FeedEndpoints, FeedKind, Subscription, SubscriptionError,
    SubscriptionOptions,
};

/// Default streaming base URL.
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000/ws";

/// Default symbol the binary subscribes to.
pub const DEFAULT_SYMBOL: &str = "BTC";

/// Fallback HTTP client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// Timeout for a whole fallback request.
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stream and fallback endpoints for the configured feed.
    pub endpoints: FeedEndpoints,
    /// Subscription to stream.
    pub subscription: Subscription,
    /// Reconnect and fallback timing.
    pub reconnect: ReconnectConfig,
    /// Fallback HTTP client settings.
    pub http: HttpSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL, symbol or feed name is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL, symbol or feed name is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let kind = match non_empty(&lookup, "FEED_KIND") {
            Some(name) => FeedKind::parse(&name)?,
            None => FeedKind::default(),
        };

        let stream_base = non_empty(&lookup, "FEED_WS_BASE_URL")
            .unwrap_or_else(|| DEFAULT_WS_BASE_URL.to_string());
        let quote_asset = non_empty(&lookup, "FEED_QUOTE_ASSET")
            .unwrap_or_else(|| DEFAULT_QUOTE_ASSET.to_string());

        let mut endpoints = FeedEndpoints::new(&stream_base, kind, quote_asset).map_err(|source| {
            ConfigError::InvalidEndpoint {
                key: "FEED_WS_BASE_URL",
                source,
            }
        })?;
        if let Some(http_base) = non_empty(&lookup, "FEED_HTTP_BASE_URL") {
            endpoints = endpoints.with_http_base(&http_base).map_err(|source| {
                ConfigError::InvalidEndpoint {
                    key: "FEED_HTTP_BASE_URL",
                    source,
                }
            })?;
        }

        let symbol = non_empty(&lookup, "FEED_SYMBOL").unwrap_or_else(|| DEFAULT_SYMBOL.to_string());
        let days = parse_env_u32(&lookup, "FEED_DAYS", SubscriptionOptions::default().days);
        let subscription = Subscription::new(&symbol, SubscriptionOptions::days(days))?;

        let defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig::new(
            parse_env_duration_millis(&lookup, "FEED_RECONNECT_DELAY_MS", defaults.reconnect_delay),
            parse_env_duration_millis(&lookup, "FEED_DATA_TIMEOUT_MS", defaults.data_timeout),
            parse_env_u32(&lookup, "FEED_MAX_ATTEMPTS", defaults.max_attempts),
        );

        let http = HttpSettings {
            request_timeout: parse_env_duration_secs(
                &lookup,
                "FEED_HTTP_TIMEOUT_SECS",
                HttpSettings::default().request_timeout,
            ),
        };

        Ok(Self {
            endpoints,
            subscription,
            reconnect,
            http,
            metrics_port: parse_env_u16(&lookup, "FEED_METRICS_PORT", 0),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A base URL is malformed or has the wrong scheme.
    #[error("invalid {key}: {source}")]
    InvalidEndpoint {
        /// Variable holding the URL.
        key: &'static str,
        /// Validation failure.
        source: EndpointError,
    },
    /// Symbol, day count or feed name is invalid.
    #[error(transparent)]
    InvalidSubscription(#[from] SubscriptionError),
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
