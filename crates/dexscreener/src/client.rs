//! DexScreener REST client with rate limiting.
//!
//! One endpoint matters to the keeper: `/latest/dex/tokens/{address}`,
//! which returns every venue pair for a token. The first pair is taken as
//! authoritative, and a pair only counts when both its USD price and its
//! fully-diluted valuation are positive.

use crate::error::{DexScreenerError, Result};
use anyhow::Context;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use keeper_core::{AssetId, OracleConfig, PriceOracle, Quote};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Constants
// =============================================================================

/// DexScreener public API base URL.
pub const DEXSCREENER_URL: &str = "https://api.dexscreener.com";

/// User agent sent with every request.
const USER_AGENT: &str = "keeper/0.1";

/// Backoff after a 429, scaled by the attempt number.
const RATE_LIMIT_BACKOFF_SECS: u64 = 3;

/// Flat delay before retrying a failed transport.
const TRANSPORT_RETRY_SECS: u64 = 2;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the DexScreener client.
#[derive(Debug, Clone)]
pub struct DexScreenerConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Extra attempts after the first request fails.
    pub max_retries: u32,
}

impl Default for DexScreenerConfig {
    fn default() -> Self {
        Self {
            base_url: DEXSCREENER_URL.to_string(),
            requests_per_minute: nonzero!(40u32),
            timeout_secs: 10,
            max_retries: 2,
        }
    }
}

impl DexScreenerConfig {
    /// Builds a config from the app-level oracle settings.
    #[must_use]
    pub fn from_settings(settings: &OracleConfig) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            requests_per_minute: NonZeroU32::new(settings.requests_per_minute)
                .unwrap_or(nonzero!(40u32)),
            timeout_secs: settings.timeout_secs,
            max_retries: settings.max_retries,
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_minute: NonZeroU32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

// =============================================================================
// API Response Types
// =============================================================================

/// Raw token response from DexScreener.
#[derive(Debug, Clone, Deserialize)]
struct RawTokenResponse {
    pairs: Option<Vec<RawPair>>,
}

/// One venue pair. DexScreener sends the price as a string and the FDV as
/// a number.
#[derive(Debug, Clone, Deserialize)]
struct RawPair {
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    fdv: Option<f64>,
}

impl RawPair {
    /// Converts to a quote when both figures are present and positive.
    fn quote(&self) -> Option<Quote> {
        let price = self
            .price_usd
            .as_deref()
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0);
        let mcap = self.fdv.unwrap_or(0.0);
        (price > 0.0 && mcap > 0.0).then_some(Quote {
            price_usd: price,
            market_cap_usd: mcap,
        })
    }
}

fn first_usable_quote(body: &RawTokenResponse) -> Option<Quote> {
    body.pairs.as_ref()?.first()?.quote()
}

// =============================================================================
// DexScreenerClient
// =============================================================================

enum FetchOutcome {
    Body(RawTokenResponse),
    RateLimited,
}

/// DexScreener REST client.
///
/// All requests pass through the rate limiter. 429s back off and retry,
/// transport failures retry after a flat delay, and any other HTTP error
/// gives up immediately.
pub struct DexScreenerClient {
    /// Configuration.
    config: DexScreenerConfig,

    /// HTTP client.
    http: Client,

    /// Rate limiter.
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl std::fmt::Debug for DexScreenerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexScreenerClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_minute", &self.config.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl DexScreenerClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: DexScreenerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DexScreenerError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            config,
            http,
            rate_limiter,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Fetches the current quote for a token.
    ///
    /// Returns `None` when DexScreener has no pair for the token, or the
    /// first pair carries a zero price or FDV.
    ///
    /// # Errors
    /// Returns error on HTTP failures and exhausted retries.
    pub async fn token_quote(&self, asset: &AssetId) -> Result<Option<Quote>> {
        let url = format!(
            "{}/latest/dex/tokens/{}",
            self.config.base_url, asset.address
        );

        let mut attempt: u32 = 0;
        loop {
            self.rate_limiter.until_ready().await;
            debug!("GET {url}");

            match self.fetch(&url).await {
                Ok(FetchOutcome::Body(body)) => return Ok(first_usable_quote(&body)),
                Ok(FetchOutcome::RateLimited) => {
                    if attempt >= self.config.max_retries {
                        return Err(DexScreenerError::RateLimited {
                            attempts: attempt + 1,
                        });
                    }
                    let delay =
                        Duration::from_secs(RATE_LIMIT_BACKOFF_SECS * u64::from(attempt + 1));
                    warn!(
                        token = %asset.address,
                        delay_secs = delay.as_secs(),
                        "dexscreener rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err @ (DexScreenerError::Network(_) | DexScreenerError::Timeout(_))) => {
                    if attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    debug!(token = %asset.address, %err, "transport failure, retrying");
                    tokio::time::sleep(Duration::from_secs(TRANSPORT_RETRY_SECS)).await;
                }
                Err(err) => return Err(err),
            }
            attempt += 1;
        }
    }

    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Ok(FetchOutcome::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DexScreenerError::api(status.as_u16(), text));
        }

        let body = response.json::<RawTokenResponse>().await?;
        Ok(FetchOutcome::Body(body))
    }
}

#[async_trait]
impl PriceOracle for DexScreenerClient {
    async fn quote(&self, asset: &AssetId) -> anyhow::Result<Option<Quote>> {
        self.token_quote(asset)
            .await
            .with_context(|| format!("dexscreener quote for {}", asset.address))
    }
}
