//! # PwaKit Common
//!
//! Shared plumbing for the PwaKit offline layer.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock timestamps for cache bookkeeping

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogInitError};

/// Milliseconds since the Unix epoch.
///
/// Returns 0 if the system clock is set before the epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}
