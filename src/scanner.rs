/*!
 # Discovery

 Collects advertisements for a bounded duration and reduces them to one
 [`ScannedDevice`] per address. Later advertisements for an address refresh its
 name, signal strength and family. Results are ordered by signal strength,
 strongest first, with ties kept in first-seen order.
*/

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::{classify, DeviceFamily};
use crate::config::ControllerConfig;
use crate::transport::{Advertisement, Backend};
use crate::{Error, Result};

/// Slack granted to a backend past the requested scan duration
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub family: DeviceFamily,
}

impl ScannedDevice {
    pub fn from_advertisement(advertisement: &Advertisement) -> Self {
        Self {
            address: advertisement.address.clone(),
            name: advertisement.name.clone(),
            rssi: advertisement.rssi,
            family: classify(advertisement.name.as_deref()),
        }
    }

    /// Applies a newer advertisement for the same address.
    ///
    /// A missing name never erases one that was already seen.
    pub fn refresh(&mut self, advertisement: &Advertisement) {
        if advertisement.name.is_some() {
            self.name = advertisement.name.clone();
        }
        self.rssi = advertisement.rssi;
        self.family = classify(self.name.as_deref());
    }

    pub fn is_led_controller(&self) -> bool {
        self.family.is_known()
    }

    /// Advertised name, or a placeholder
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    /// Six-character bar graph of signal strength
    pub fn signal_bars(&self) -> &'static str {
        match self.rssi {
            rssi if rssi >= -50 => "██████",
            rssi if rssi >= -60 => "█████ ",
            rssi if rssi >= -70 => "████  ",
            rssi if rssi >= -80 => "███   ",
            rssi if rssi >= -90 => "██    ",
            _ => "█     ",
        }
    }
}

/// Handle for a registered discovery observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryObserverId(u64);

type DiscoveryObserver = Arc<dyn Fn(&ScannedDevice) + Send + Sync>;

/// Scans through a [`Backend`]
pub struct Scanner {
    backend: Arc<dyn Backend>,
    next_id: AtomicU64,
    observers: RwLock<Vec<(DiscoveryObserverId, DiscoveryObserver)>>,
}

impl Scanner {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            next_id: AtomicU64::new(0),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Calls `observer` for every advertisement processed during later scans
    pub fn add_discovered_observer<F>(&self, observer: F) -> DiscoveryObserverId
    where
        F: Fn(&ScannedDevice) + Send + Sync + 'static,
    {
        let id = DiscoveryObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    pub fn remove_discovered_observer(&self, id: DiscoveryObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(candidate, _)| *candidate != id);
        observers.len() != before
    }

    fn notify_discovered(&self, device: &ScannedDevice) {
        let snapshot: Vec<_> = self.observers.read().clone();
        for (id, observer) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(device))).is_err() {
                error!(?id, address = %device.address, "Discovery observer panicked");
            }
        }
    }

    /// Listens for `duration` and returns the devices seen.
    ///
    /// With `led_only` only devices of a known family are returned. A backend
    /// that runs well past `duration` is abandoned and the scan returns no
    /// devices.
    #[instrument(skip(self))]
    pub async fn scan(&self, duration: Duration, led_only: bool) -> Result<Vec<ScannedDevice>> {
        info!("Scanning for BLE devices for {:?}...", duration);

        let (sink, mut advertisements) = mpsc::unbounded_channel();
        let mut devices: Vec<ScannedDevice> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        let discover = self.backend.discover(duration, sink);
        let collect = async {
            while let Some(advertisement) = advertisements.recv().await {
                // Case-insensitive, like the session registry
                let key = advertisement.address.to_uppercase();
                let index = match seen.get(&key) {
                    Some(&index) => {
                        devices[index].refresh(&advertisement);
                        index
                    }
                    None => {
                        debug!(
                            "Found device: {} {}",
                            advertisement.address,
                            advertisement.name.as_deref().unwrap_or("Unknown")
                        );
                        seen.insert(key, devices.len());
                        devices.push(ScannedDevice::from_advertisement(&advertisement));
                        devices.len() - 1
                    }
                };
                self.notify_discovered(&devices[index]);
            }
        };

        let limit = duration.saturating_add(SCAN_GRACE);
        let outcome = time::timeout(limit, async {
            let (discovered, ()) = tokio::join!(discover, collect);
            discovered
        })
        .await;

        match outcome {
            Err(_) => {
                warn!("Scan did not finish within {:?}, discarding results", limit);
                return Ok(Vec::new());
            }
            Ok(Err(e)) => {
                let reason = match e {
                    Error::DiscoveryFailure { reason, .. } => reason,
                    other => other.to_string(),
                };
                return Err(Error::DiscoveryFailure { attempts: 1, reason });
            }
            Ok(Ok(())) => {}
        }

        if led_only {
            devices.retain(ScannedDevice::is_led_controller);
        }
        // Stable, so equal signal strengths keep discovery order
        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));

        info!("Scan complete: {} device(s)", devices.len());
        Ok(devices)
    }

    /// Scans up to `attempts` times, pausing `delay` after each failure.
    ///
    /// Fails with the last attempt's reason once every attempt failed.
    #[instrument(skip(self))]
    pub async fn scan_with_retry(
        &self,
        duration: Duration,
        led_only: bool,
        attempts: u32,
        delay: Duration,
    ) -> Result<Vec<ScannedDevice>> {
        let attempts = attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match self.scan(duration, led_only).await {
                Ok(devices) => return Ok(devices),
                Err(e) => {
                    warn!("Scan attempt {}/{} failed: {}", attempt, attempts, e);
                    last_reason = match e {
                        Error::DiscoveryFailure { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    if attempt < attempts {
                        time::sleep(delay).await;
                    }
                }
            }
        }

        error!("All {} scan attempts failed", attempts);
        Err(Error::DiscoveryFailure {
            attempts,
            reason: last_reason,
        })
    }

    /// [`Scanner::scan_with_retry`] with durations and policy from `config`
    pub async fn scan_configured(
        &self,
        config: &ControllerConfig,
        led_only: bool,
    ) -> Result<Vec<ScannedDevice>> {
        self.scan_with_retry(
            config.scan_duration,
            led_only,
            config.scan_attempts,
            config.scan_retry_delay,
        )
        .await
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}
