//! Fallback Fetcher Port (Driven Port)
//!
//! Interface for the non-streaming request used when the stream fails or
//! stays silent.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::domain::connection::FeedError;

/// Port for one-shot fallback requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FallbackFetcher: Send + Sync {
    /// Fetch and parse the JSON body at `url`.
    ///
    /// Implementations map a non-success status to [`FeedError::Http`], a
    /// request that never produced a response to [`FeedError::Network`] and an
    /// unparseable body to [`FeedError::Parse`].
    async fn fetch(&self, url: &Url) -> Result<Value, FeedError>;
}
