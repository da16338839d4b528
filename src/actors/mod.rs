//! Actor system for background tasks.
//!
//! Each actor is an independent tokio task driven by the engine's shared
//! components. Actors handle:
//! - Periodic rebalancing and maintenance (RebalanceActor)
//! - Feeding bus events into the coordinator (EventPumpActor)

pub mod pump;
pub mod rebalance;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::util::join_with_timeout;
use crate::Result;

pub use pump::EventPumpActor;
pub use rebalance::RebalanceActor;

/// Handle to a running actor, used for graceful shutdown.
pub struct ActorHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ActorHandle {
    /// Create a new actor handle with a cancellation token.
    pub fn new(cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self {
            cancel,
            join: Some(join),
        }
    }

    /// Signal the actor to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signal shutdown and wait up to `timeout` for the actor to exit.
    pub async fn stop(mut self, timeout: Duration) -> Result<()> {
        self.shutdown();
        match self.join.take() {
            Some(join) => join_with_timeout(timeout, join).await,
            None => Ok(()),
        }
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
