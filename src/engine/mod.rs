//! Order execution engine
//!
//! Quotes, builds, signs, submits and verifies swaps through an ordered
//! pair of execution providers with circuit-broken fallback.

pub mod executor;
pub mod jupiter;
pub mod provider;
pub mod raydium;
pub mod retry_cache;
pub mod signer;
pub mod verification;

pub use executor::{OrderEngine, OrderRecord};
pub use jupiter::JupiterProvider;
pub use provider::{ExecutionProvider, QuoteRequest};
pub use raydium::RaydiumProvider;
pub use retry_cache::FailedOrderCache;
pub use signer::{KeypairSigner, SigningError, TransactionSigner};
pub use verification::Confirmation;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use std::sync::Arc;
use std::time::Duration;

/// Build the adapter for a configured provider
pub fn build_provider(
    id: &str,
    config: &ProviderConfig,
    quote_ttl: Duration,
) -> Result<Arc<dyn ExecutionProvider>, ProviderError> {
    let provider: Arc<dyn ExecutionProvider> = match config.kind {
        ProviderKind::Jupiter => Arc::new(JupiterProvider::new(id, config, quote_ttl)?),
        ProviderKind::Raydium => Arc::new(RaydiumProvider::new(id, config, quote_ttl)?),
    };
    Ok(provider)
}
