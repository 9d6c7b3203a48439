//! Phase deadlines.
//!
//! Expiry drops the wrapped future, which cancels any in-flight request it
//! owns. Results of a cancelled phase can therefore never be observed; callers
//! still re-check the run version before applying a successful result because
//! the run may have moved on while the phase ran.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, EngineResult, Phase};

pub async fn with_deadline<T, F>(phase: Phase, after: Duration, work: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(after, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(phase = phase.as_str(), after_secs = after.as_secs(), "phase deadline expired");
            Err(EngineError::Timeout { phase, after })
        }
    }
}
