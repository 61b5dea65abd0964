use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{OperationError, Result};

/// Call `probe` every `every` until it returns `true` or `within` elapses.
///
/// The probe is always tried at least once.
pub(crate) async fn poll_until<F, Fut>(
    what: impl Into<String>,
    within: Duration,
    every: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + within;
    loop {
        if probe().await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(OperationError::WaitTimedOut {
                what: what.into(),
                waited: within,
            });
        }
        tokio::time::sleep(every).await;
    }
}
