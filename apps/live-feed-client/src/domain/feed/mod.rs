//! Feed and Subscription Types
//!
//! A feed is a named streaming source on the backend (`live-price`, `data`,
//! `raw-data`, ...). A subscription selects what the feed streams: one symbol
//! plus the options the backend understands.

mod endpoint;

pub use endpoint::{EndpointError, FeedEndpoints};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path segment of the live price feed.
pub const LIVE_PRICE_PATH: &str = "live-price";

/// Path segment of the default batch feed.
pub const DEFAULT_BATCH_PATH: &str = "data";

/// Path segment of the raw (indicator-free) batch feed.
pub const RAW_DATA_PATH: &str = "raw-data";

/// Default quote asset appended to every symbol.
pub const DEFAULT_QUOTE_ASSET: &str = "USDT";

/// Default number of days requested from batch feeds.
pub const DEFAULT_DAYS: u32 = 90;

// =============================================================================
// Feed Kind
// =============================================================================

/// The kind of feed a manager is bound to.
///
/// Both kinds run through the same connection state machine; they differ in
/// the endpoint shape and in which payloads are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Single price ticks (`{"price": 97000.5, ...}`).
    LivePrice,
    /// Ordered record batches, named by their path segment.
    Batch(String),
}

impl Default for FeedKind {
    fn default() -> Self {
        Self::data()
    }
}

impl FeedKind {
    /// The default batch feed (`data`).
    #[must_use]
    pub fn data() -> Self {
        Self::Batch(DEFAULT_BATCH_PATH.to_string())
    }

    /// The raw batch feed (`raw-data`).
    #[must_use]
    pub fn raw_data() -> Self {
        Self::Batch(RAW_DATA_PATH.to_string())
    }

    /// Parse a feed kind from its path segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or contains characters that are
    /// not valid in a single URL path segment.
    pub fn parse(name: &str) -> Result<Self, SubscriptionError> {
        let name = name.trim().to_lowercase();
        if name == LIVE_PRICE_PATH {
            return Ok(Self::LivePrice);
        }
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SubscriptionError::InvalidFeedName(name));
        }
        Ok(Self::Batch(name))
    }

    /// Path segment used in both the streaming and the fallback endpoints.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::LivePrice => LIVE_PRICE_PATH,
            Self::Batch(name) => name,
        }
    }

    /// Whether this feed is a batch feed.
    #[must_use]
    pub const fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Whether the backend exposes a REST equivalent for this feed.
    ///
    /// Live price ticks have no request/response counterpart.
    #[must_use]
    pub const fn supports_fallback(&self) -> bool {
        self.is_batch()
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Options sent along with a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Number of days of history requested.
    pub days: u32,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self { days: DEFAULT_DAYS }
    }
}

impl SubscriptionOptions {
    /// Options requesting `days` days of history.
    #[must_use]
    pub const fn days(days: u32) -> Self {
        Self { days }
    }
}

/// What the current connection is for: a symbol and its options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    symbol: String,
    options: SubscriptionOptions,
}

impl Subscription {
    /// Create a subscription, normalizing the symbol to upper case.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty or not ASCII alphanumeric, or
    /// if zero days are requested.
    pub fn new(symbol: &str, options: SubscriptionOptions) -> Result<Self, SubscriptionError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SubscriptionError::InvalidSymbol(symbol));
        }
        if options.days == 0 {
            return Err(SubscriptionError::InvalidDays);
        }
        Ok(Self { symbol, options })
    }

    /// The base symbol (e.g. `BTC`).
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The subscription options.
    #[must_use]
    pub const fn options(&self) -> SubscriptionOptions {
        self.options
    }

    /// The exchange ticker: symbol followed by the quote asset (`BTCUSDT`).
    #[must_use]
    pub fn ticker(&self, quote_asset: &str) -> String {
        format!("{}{quote_asset}", self.symbol)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}d)", self.symbol, self.options.days)
    }
}

/// Invalid subscription or feed parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Symbol is empty or contains non-alphanumeric characters.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),
    /// Day count must be at least one.
    #[error("days must be greater than zero")]
    InvalidDays,
    /// Feed name is not a valid path segment.
    #[error("invalid feed name: {0:?}")]
    InvalidFeedName(String),
}
