/*!
 # btleplug backend

 [`Backend`] and [`Transport`] over the platform Bluetooth stack.
*/

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::protocol::{NOTIFY_CHAR_UUID, WRITE_CHAR_UUID};
use crate::transport::{Advertisement, Backend, NotificationReceiver, Transport};
use crate::{Error, Result};

/// How often the adapter's peripheral list is polled while scanning
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stand-in deadline for durations too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapter = manager.adapters().await?.into_iter().next().ok_or_else(|| {
        error!("No Bluetooth adapters found");
        Error::NoBluetoothAdapters
    })?;

    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

/// Address used to identify a peripheral.
///
/// Some platforms hide the hardware address; the platform id is used there.
fn peripheral_address(peripheral: &Peripheral, address: BDAddr) -> String {
    if address.into_inner() == [0; 6] {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

/// Backend over the first Bluetooth adapter
#[derive(Debug, Clone)]
pub struct BtleBackend {
    adapter: Adapter,
}

impl BtleBackend {
    #[instrument]
    pub async fn new() -> Result<Self> {
        info!("Initializing Bluetooth backend");
        let manager = Manager::new().await?;
        let adapter = get_central(&manager).await?;
        Ok(Self { adapter })
    }

    async fn poll_peripherals(&self, sink: &mpsc::UnboundedSender<Advertisement>) -> Result<bool> {
        let peripherals = self.adapter.peripherals().await?;
        trace!("Found {} BLE peripherals so far", peripherals.len());

        for p in peripherals {
            if let Ok(Some(props)) = p.properties().await {
                let advertisement = Advertisement {
                    address: peripheral_address(&p, props.address),
                    name: props.local_name,
                    rssi: props.rssi.unwrap_or(i16::MIN),
                };
                if sink.send(advertisement).is_err() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Backend for BtleBackend {
    async fn discover(
        &self,
        duration: Duration,
        sink: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = deadline_after(duration);
        let result = loop {
            match self.poll_peripherals(&sink).await {
                Ok(true) => {}
                // Nobody is listening anymore
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                break Ok(());
            }
            // Wait a moment before polling again
            time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        result
    }

    fn transport(&self) -> Box<dyn Transport> {
        Box::new(BtleTransport {
            adapter: self.adapter.clone(),
            link: parking_lot::Mutex::new(None),
        })
    }
}

/// A peripheral this transport connected, and its characteristics once found
struct Link {
    peripheral: Peripheral,
    write: Option<Characteristic>,
    notify: Option<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

/// Transport over one btleplug peripheral
pub struct BtleTransport {
    adapter: Adapter,
    link: parking_lot::Mutex<Option<Link>>,
}

impl BtleTransport {
    fn peripheral(&self) -> Option<Peripheral> {
        self.link.lock().as_ref().map(|link| link.peripheral.clone())
    }

    fn characteristic(&self, uuid: Uuid) -> Result<(Peripheral, Characteristic)> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or_else(|| Error::DeviceNotFound("not connected".to_string()))?;
        let characteristic = [link.write.as_ref(), link.notify.as_ref()]
            .into_iter()
            .flatten()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound(uuid.to_string()))?;
        Ok((link.peripheral.clone(), characteristic))
    }

    /// Connects `peripheral` and looks up the write and notify characteristics
    async fn attach(&self, peripheral: &Peripheral) -> Result<()> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        debug!("Discovering services...");
        peripheral.discover_services().await?;
        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| characteristics.iter().find(|c| c.uuid == uuid).cloned();

        let write = find(WRITE_CHAR_UUID)
            .ok_or_else(|| Error::CharacteristicNotFound(WRITE_CHAR_UUID.to_string()))?;
        let notify = find(NOTIFY_CHAR_UUID)
            .ok_or_else(|| Error::CharacteristicNotFound(NOTIFY_CHAR_UUID.to_string()))?;
        debug!("Found write characteristic: {}", write.uuid);
        debug!("Found notify characteristic: {}", notify.uuid);

        if let Some(link) = self.link.lock().as_mut() {
            link.write = Some(write);
            link.notify = Some(notify);
        }
        Ok(())
    }

    /// Finds a known peripheral, scanning until `deadline` if necessary
    async fn find_peripheral(&self, address: &str, deadline: Instant) -> Result<Peripheral> {
        let known = self.adapter.peripherals().await?;
        if let Some(p) = known.into_iter().find(|p| matches_address(p, address)) {
            return Ok(p);
        }

        info!("Scanning for device {}...", address);
        self.adapter.start_scan(ScanFilter::default()).await?;
        let found = loop {
            let peripherals = self.adapter.peripherals().await?;
            if let Some(p) = peripherals.into_iter().find(|p| matches_address(p, address)) {
                break Some(p);
            }
            let now = Instant::now();
            if now >= deadline {
                break None;
            }
            time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        };
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        found.ok_or_else(|| Error::DeviceNotFound(address.to_string()))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()> {
        let peripheral = self.find_peripheral(address, deadline_after(timeout)).await?;

        // Recorded before connecting so that disconnect() reaches the
        // peripheral even when this future is dropped halfway
        *self.link.lock() = Some(Link {
            peripheral: peripheral.clone(),
            write: None,
            notify: None,
            forwarder: None,
        });

        if let Err(e) = self.attach(&peripheral).await {
            if let Err(rollback) = self.disconnect().await {
                debug!("Error dropping half-open peripheral: {}", rollback);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let link = self.link.lock().take();
        let Some(link) = link else {
            return Ok(());
        };
        if let Some(forwarder) = link.forwarder {
            forwarder.abort();
        }
        if link.peripheral.is_connected().await? {
            link.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral() {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(characteristic)?;

        // Determine write type based on characteristic properties
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        peripheral.write(&characteristic, data, write_type).await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver> {
        let (peripheral, characteristic) = self.characteristic(characteristic)?;
        peripheral.subscribe(&characteristic).await?;
        let mut notifications = peripheral.notifications().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let uuid = characteristic.uuid;
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == uuid && tx.send(notification.value).is_err() {
                    break;
                }
            }
        });

        if let Some(link) = self.link.lock().as_mut() {
            if let Some(previous) = link.forwarder.replace(forwarder) {
                previous.abort();
            }
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        let (peripheral, characteristic) = self.characteristic(characteristic)?;
        if let Some(forwarder) = self.link.lock().as_mut().and_then(|l| l.forwarder.take()) {
            forwarder.abort();
        }
        peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }
}
