//! Credential acquisition flows.
//!
//! This module provides:
//! - [`refresh`] - Refresh-token exchange against the provider's token endpoint
//! - [`relay`] - QR/TV out-of-band login through the relay service
//!
//! Both exchanges are retried as a unit: one attempt plus up to
//! [`EXCHANGE_RETRIES`] immediate retries, each failure logged.

use std::future::Future;

use crate::model::Credentials;
use crate::token::TokenError;

pub mod refresh;
pub mod relay;

pub use refresh::{TokenRefresher, subject_of};
pub use relay::{PendingAuthorization, RelayAuthFlow, RelayGrant, decrypt_payload};

/// Immediate retries after a failed exchange.
pub const EXCHANGE_RETRIES: usize = 3;

/// Run `exchange` until it succeeds, fails fatally, or the retries run out.
pub(crate) async fn with_retries<F, Fut>(
    label: &str,
    mut exchange: F,
) -> Result<Credentials, TokenError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Credentials, TokenError>>,
{
    let mut result = exchange().await;
    for _ in 0..EXCHANGE_RETRIES {
        match &result {
            Ok(_) => break,
            Err(e) if e.is_fatal() => break,
            Err(e) => tracing::error!("[{}] failed to refresh token: {}", label, e),
        }
        result = exchange().await;
    }
    if let Err(e) = &result {
        tracing::error!("[{}] giving up: {}", label, e);
    }
    result
}
