//! Position acquisition
//!
//! An SOS carries a position when one can be had quickly. Providers may be
//! slow or absent; [`acquire_location`] bounds the wait and turns every
//! failure into "no location".

use core::time::Duration;

use async_trait::async_trait;

use crate::types::Location;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("location unavailable")]
    Unavailable,
    #[error("location request timed out")]
    Timeout,
    #[error("location permission denied")]
    PermissionDenied,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Best-effort current position, honouring `timeout` where possible
    async fn current_position(&self, timeout: Duration) -> Result<Location, LocationError>;
}

/// Device without positioning
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_position(&self, _timeout: Duration) -> Result<Location, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// Provider that always reports the same position
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Location);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self, _timeout: Duration) -> Result<Location, LocationError> {
        Ok(self.0)
    }
}

/// Ask the provider for a position, giving up after `timeout`
pub async fn acquire_location(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> Option<Location> {
    match tokio::time::timeout(timeout, provider.current_position(timeout)).await {
        Ok(Ok(location)) => Some(location),
        Ok(Err(e)) => {
            tracing::debug!("No location attached: {}", e);
            None
        }
        Err(_) => {
            tracing::debug!("No location attached: {}", LocationError::Timeout);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledProvider;

    #[async_trait]
    impl LocationProvider for StalledProvider {
        async fn current_position(&self, _timeout: Duration) -> Result<Location, LocationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(LocationError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_fixed_and_absent_providers() {
        let here = Location {
            latitude: 52.5,
            longitude: 13.4,
            accuracy: 12.0,
        };
        let timeout = Duration::from_secs(5);
        assert_eq!(acquire_location(&FixedLocation(here), timeout).await, Some(here));
        assert_eq!(acquire_location(&NoLocation, timeout).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_provider_is_bounded() {
        let started = tokio::time::Instant::now();
        assert_eq!(
            acquire_location(&StalledProvider, Duration::from_secs(5)).await,
            None
        );
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
