//! Endpoint Derivation
//!
//! Builds the streaming and fallback URLs for a subscription.
//!
//! # URL Shapes
//!
//! - Stream: `{wsBase}/{feed}?ticker={SYMBOL}{QUOTE}&days={N}` (`days` only for
//!   batch feeds)
//! - Fallback: `{httpBase}/api/{feed}/{SYMBOL}{QUOTE}?days={N}`
//! - Symbols: `{httpBase}/api/symbols`
//!
//! Unless configured explicitly, `httpBase` is the stream base with its scheme
//! mapped (`ws` → `http`, `wss` → `https`) and its path cut before the `ws`
//! segment, so `wss://host/ws` serves REST from `https://host`.

use url::Url;

use super::{FeedKind, Subscription};

/// Errors raised while validating endpoint base URLs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// URL failed to parse.
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },
    /// Scheme cannot be used for this endpoint.
    #[error("unsupported scheme {scheme:?} for {endpoint} endpoint")]
    UnsupportedScheme {
        /// The offending scheme.
        scheme: String,
        /// Which endpoint was being configured.
        endpoint: &'static str,
    },
    /// URL has no hierarchical path (e.g. `data:` URLs).
    #[error("URL {0:?} cannot be used as a base")]
    CannotBeABase(String),
}

/// Validated endpoint bases for one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoints {
    stream_base: Url,
    http_base: Url,
    kind: FeedKind,
    quote_asset: String,
}

impl FeedEndpoints {
    /// Create endpoints from a WebSocket base URL, deriving the HTTP base.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is not `ws`/`wss`.
    pub fn new(
        stream_base: &str,
        kind: FeedKind,
        quote_asset: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        let stream_base = parse_base(stream_base)?;
        if !matches!(stream_base.scheme(), "ws" | "wss") {
            return Err(EndpointError::UnsupportedScheme {
                scheme: stream_base.scheme().to_string(),
                endpoint: "stream",
            });
        }
        let http_base = derive_http_base(&stream_base)?;

        Ok(Self {
            stream_base,
            http_base,
            kind,
            quote_asset: quote_asset.into().to_uppercase(),
        })
    }

    /// Replace the derived HTTP base with an explicit one.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or is not `http`/`https`.
    pub fn with_http_base(mut self, http_base: &str) -> Result<Self, EndpointError> {
        let http_base = parse_base(http_base)?;
        if !matches!(http_base.scheme(), "http" | "https") {
            return Err(EndpointError::UnsupportedScheme {
                scheme: http_base.scheme().to_string(),
                endpoint: "fallback",
            });
        }
        self.http_base = http_base;
        Ok(self)
    }

    /// The feed these endpoints serve.
    #[must_use]
    pub const fn kind(&self) -> &FeedKind {
        &self.kind
    }

    /// Quote asset appended to symbols.
    #[must_use]
    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Base URL used for REST requests.
    #[must_use]
    pub const fn http_base(&self) -> &Url {
        &self.http_base
    }

    /// Streaming URL for a subscription.
    #[must_use]
    pub fn stream_url(&self, subscription: &Subscription) -> Url {
        let mut url = self.stream_base.clone();
        let path = join_path(self.stream_base.path(), &[self.kind.path()]);
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ticker", &subscription.ticker(&self.quote_asset));
            if self.kind.is_batch() {
                query.append_pair("days", &subscription.options().days.to_string());
            }
        }
        url
    }

    /// Fallback REST URL for a subscription.
    #[must_use]
    pub fn fallback_url(&self, subscription: &Subscription) -> Url {
        let ticker = subscription.ticker(&self.quote_asset);
        let mut url = self.http_url(&["api", self.kind.path(), &ticker]);
        url.query_pairs_mut()
            .append_pair("days", &subscription.options().days.to_string());
        url
    }

    /// URL of the symbol catalog.
    #[must_use]
    pub fn symbols_url(&self) -> Url {
        self.http_url(&["api", "symbols"])
    }

    fn http_url(&self, segments: &[&str]) -> Url {
        let mut url = self.http_base.clone();
        url.set_path(&join_path(self.http_base.path(), segments));
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

fn parse_base(input: &str) -> Result<Url, EndpointError> {
    let url = Url::parse(input.trim()).map_err(|source| EndpointError::InvalidUrl {
        url: input.to_string(),
        source,
    })?;
    if url.cannot_be_a_base() {
        return Err(EndpointError::CannotBeABase(input.to_string()));
    }
    Ok(url)
}

/// Map a stream base onto the REST base of the same server.
fn derive_http_base(stream_base: &Url) -> Result<Url, EndpointError> {
    let scheme = match stream_base.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => {
            return Err(EndpointError::UnsupportedScheme {
                scheme: other.to_string(),
                endpoint: "stream",
            });
        }
    };

    let prefix: Vec<&str> = stream_base
        .path_segments()
        .map(|segments| {
            segments
                .take_while(|segment| *segment != "ws")
                .filter(|segment| !segment.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut url = stream_base.clone();
    url.set_scheme(scheme)
        .map_err(|()| EndpointError::UnsupportedScheme {
            scheme: stream_base.scheme().to_string(),
            endpoint: "fallback",
        })?;
    url.set_path(&join_path("/", &prefix));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn join_path(base: &str, segments: &[&str]) -> String {
    let mut path = base.trim_end_matches('/').to_string();
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}
