//! Recording supervisor
//!
//! Orchestrates the capture process from session state machine transitions:
//! - start / stop / status commands from the operator
//! - device notifications forwarded from a [`DeviceEventSource`]
//! - the keep/discard decision once the capture has flushed

mod finalize;
mod handle;
mod supervisor;

pub use handle::{SupervisorHandle, RESYNC_INTERVAL};
pub use supervisor::{Supervisor, SupervisorSettings};

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::device::DeviceEventSource;

/// Forward a device source into the supervisor, resubscribing after
/// `backoff` whenever the source fails or its stream ends. Stops once the
/// supervisor is gone.
pub fn attach_device_source(
    handle: SupervisorHandle,
    source: Arc<dyn DeviceEventSource>,
    backoff: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match source.subscribe().await {
                Ok(mut events) => {
                    info!("Subscribed to device source: {}", source.name());
                    while let Some(event) = events.next().await {
                        if handle.device_event(event).is_err() {
                            return;
                        }
                    }
                    warn!("Device source {} ended, resubscribing", source.name());
                }
                Err(e) => warn!("Failed to subscribe to {}: {:#}", source.name(), e),
            }

            tokio::time::sleep(backoff).await;
        }
    })
}
