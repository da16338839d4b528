//! Shared utility functions.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::{Error, Result};

/// Await a fallible collaborator call, giving up after `duration`.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// Wait for a spawned task to finish, giving up after `duration`.
pub async fn join_with_timeout<T>(duration: Duration, handle: JoinHandle<T>) -> Result<T> {
    match timeout(duration, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => Err(Error::Timeout(duration)),
    }
}
