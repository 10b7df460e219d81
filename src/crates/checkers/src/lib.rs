//! Health probe framework for anycastd
//!
//! A [`Checker`] is a single health probe: it knows its `kind` (a stable
//! label used in metrics and logs) and performs one bounded check, applying
//! its own retry policy internally. Probes are constructed from opaque JSON
//! specs through the [`CheckerRegistry`], which maps a kind name to a
//! constructor.
//!
//! Cancellation follows the usual async contract: callers drop the `check()`
//! future to cancel it, and every probe bounds itself with its configured
//! timeout.

pub mod assigned_address;
pub mod dns_lookup;
pub mod http_2xx;
pub mod icmp_ping;
pub mod ntpq;
pub mod registry;
pub mod tftp_rrq;
pub mod tls_certificate;

mod retry;

pub use registry::{CheckerRegistry, RegistryError};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Result type alias for checker operations.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Errors produced by probe construction and execution.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The spec blob failed to parse or validate.
    #[error("invalid checker spec: {0}")]
    InvalidSpec(String),

    /// The probe ran and found the target unhealthy.
    #[error("{0}")]
    Unhealthy(String),

    /// Every attempt of the probe's retry policy failed.
    #[error("check failed: {tries} tries with {interval:?} interval; last error: `{last}`")]
    RetriesExhausted {
        tries: u8,
        interval: Duration,
        last: String,
    },

    /// The probe did not complete within its configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single health probe.
///
/// Implementations are created once at startup and invoked sequentially from
/// a single service loop; they must not assume exclusive ownership of any
/// global resource beyond that. A probe is responsible for its own retry
/// policy and timeout; callers never retry a checker.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Stable label for this probe kind.
    fn kind(&self) -> &'static str;

    /// Runs the probe, returning `Ok(())` when the target is healthy.
    async fn check(&self) -> Result<()>;
}
