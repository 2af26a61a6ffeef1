//! Index retrieval
//!
//! [`IndexSource`] is the seam the pipeline fetches through. The production
//! implementation is [`HttpFetcher`]; tests use scripted sources.

pub mod errors;
pub mod http;
pub mod identity;

pub use errors::FetchError;
pub use http::{FetcherSettings, HttpFetcher};
pub use identity::{
    default_identities, ClientIdentity, HeaderProfile, IdentitySelector, WeightedIdentitySelector,
};

use crate::extractor::RawContent;
use async_trait::async_trait;

/// One retrieval of the page holding the index
///
/// Implementations perform a single attempt; retries belong to the caller.
#[async_trait]
pub trait IndexSource: Send + Sync {
    async fn fetch(&self, endpoint: &str, selector: &str) -> Result<RawContent, FetchError>;
}
