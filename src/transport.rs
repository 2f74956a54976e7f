/*!
 # Transport boundary

 The platform Bluetooth stack is consumed through two traits: a [`Backend`]
 that discovers devices and hands out transports, and a per-connection
 [`Transport`] that connects, writes and delivers notifications.
*/

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Result;

/// One advertisement seen during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Transport-level unique identifier
    pub address: String,
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Signal strength in dBm
    pub rssi: i16,
}

impl Advertisement {
    pub fn new(address: impl Into<String>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            rssi,
        }
    }
}

/// Notification payloads from a subscribed characteristic
pub type NotificationReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// A connection to a single device
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to the device, giving up after `timeout`
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()>;

    /// Drops the connection
    async fn disconnect(&self) -> Result<()>;

    /// Reports whether the link is still up
    async fn is_connected(&self) -> bool;

    /// Writes one frame to a characteristic
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Enables notifications; payloads arrive on the returned channel
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver>;

    /// Disables notifications
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;
}

/// Discovery and transport factory for a Bluetooth stack
#[async_trait]
pub trait Backend: Send + Sync {
    /// Scans for `duration`, sending every advertisement observed to `sink`.
    ///
    /// The same address may be reported many times.
    async fn discover(
        &self,
        duration: Duration,
        sink: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()>;

    /// Creates an unconnected transport
    fn transport(&self) -> Box<dyn Transport>;
}
