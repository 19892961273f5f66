use anyhow::Result;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

use super::event::DeviceEvent;

/// Lazy, unbounded sequence of device notifications
pub type DeviceEventStream = BoxStream<'static, DeviceEvent>;

/// Device notification source trait
///
/// Implementations:
/// - Channel: events published in-process (HTTP injection, tests)
/// - AvFoundation: polls the ffmpeg device listing and diffs snapshots
///
/// A stream that ends is treated as a lost connection; the supervisor calls
/// `subscribe` again after a backoff.
#[async_trait::async_trait]
pub trait DeviceEventSource: Send + Sync {
    /// Start receiving notifications
    async fn subscribe(&self) -> Result<DeviceEventStream>;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// In-process device event publisher
///
/// Backed by a broadcast channel: a subscriber that falls behind loses the
/// oldest notifications rather than blocking the publisher.
#[derive(Clone)]
pub struct ChannelDeviceSource {
    tx: broadcast::Sender<DeviceEvent>,
}

impl ChannelDeviceSource {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every live subscriber. Never blocks.
    pub fn publish(&self, event: DeviceEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for ChannelDeviceSource {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl DeviceEventSource for ChannelDeviceSource {
    async fn subscribe(&self) -> Result<DeviceEventStream> {
        let rx = self.tx.subscribe();

        let events = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Device event subscriber lagged, dropped {} oldest events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(events))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceEventKind;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() -> Result<()> {
        let source = ChannelDeviceSource::default();
        let mut events = source.subscribe().await?;

        source.publish(DeviceEvent::new("Jabra", DeviceEventKind::Connected));
        source.publish(DeviceEvent::new("Jabra", DeviceEventKind::Disconnected));

        assert_eq!(events.next().await.map(|e| e.kind), Some(DeviceEventKind::Connected));
        assert_eq!(events.next().await.map(|e| e.kind), Some(DeviceEventKind::Disconnected));
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let source = ChannelDeviceSource::default();
        assert_eq!(source.publish(DeviceEvent::new("Jabra", DeviceEventKind::Connected)), 0);
    }
}
