//! Time-bounded port calls.

use std::future::Future;
use std::time::Duration;

use crate::error::FleetError;

/// Await `fut` for at most `limit`, mapping its error into [`FleetError`].
pub(crate) async fn bounded<T, E, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, FleetError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<FleetError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(FleetError::Timeout { operation }),
    }
}
