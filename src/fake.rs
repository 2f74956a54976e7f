/*!
 # Fake backend

 An in-memory [`Backend`] for tests and `--dry-run`. Every transport it hands
 out shares one scripted state, so a test can script failures, inject
 notifications and inspect the frames that were written.
*/

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::hex;
use crate::transport::{Advertisement, Backend, NotificationReceiver, Transport};
use crate::{CommandError, Error, Result};

/// Something a fake transport did, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Connect { transport: usize, address: String },
    Subscribe { transport: usize, characteristic: Uuid },
    Unsubscribe { transport: usize, characteristic: Uuid },
    Write { transport: usize, frame: Vec<u8> },
    Disconnect { transport: usize },
}

/// Scripted behavior shared by a backend and its transports
#[derive(Debug, Default)]
struct FakeState {
    advertisements: Vec<Advertisement>,
    discovery_failures: u32,
    discovery_overrun: Option<Duration>,
    connect_delay: Option<Duration>,
    fail_connect: bool,
    fail_after_link: bool,
    subscribe_delay: Option<Duration>,
    fail_subscribe: bool,
    fail_write: bool,
    fail_disconnect: bool,
    drop_link_on_write_failure: bool,
    write_delay: Option<Duration>,
    events: Vec<FakeEvent>,
    notify: Option<mpsc::UnboundedSender<Vec<u8>>>,
    in_flight: usize,
    max_in_flight: usize,
    discover_calls: u32,
    links: HashSet<usize>,
}

/// Backend that never touches a radio
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    transports: Arc<AtomicUsize>,
    log_writes: bool,
}

impl FakeBackend {
    /// A backend whose scans report `advertisements` in order
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        let backend = Self::default();
        backend.state.lock().advertisements = advertisements;
        backend
    }

    /// A small fixed population of devices, logging every frame written
    pub fn demo() -> Self {
        let mut backend = Self::new(vec![
            Advertisement::new("AA:BB:CC:DD:EE:01", Some("Triones-5A21"), -48),
            Advertisement::new("AA:BB:CC:DD:EE:02", Some("QHM-0C3F"), -71),
            Advertisement::new("AA:BB:CC:DD:EE:03", Some("Headphones"), -60),
        ]);
        backend.log_writes = true;
        backend
    }

    /// Fails the next `times` discovery calls
    pub fn fail_discovery(self, times: u32) -> Self {
        self.state.lock().discovery_failures = times;
        self
    }

    /// Keeps discovery running `extra` past the requested duration
    pub fn overrun_discovery(self, extra: Duration) -> Self {
        self.state.lock().discovery_overrun = Some(extra);
        self
    }

    pub fn delay_connect(self, delay: Duration) -> Self {
        self.state.lock().connect_delay = Some(delay);
        self
    }

    pub fn fail_connect(self) -> Self {
        self.state.lock().fail_connect = true;
        self
    }

    /// Brings the link up, then fails the connect as a failed service
    /// discovery would, leaving the link for the caller to drop
    pub fn fail_after_link(self) -> Self {
        self.state.lock().fail_after_link = true;
        self
    }

    pub fn delay_subscribe(self, delay: Duration) -> Self {
        self.state.lock().subscribe_delay = Some(delay);
        self
    }

    pub fn fail_subscribe(self) -> Self {
        self.state.lock().fail_subscribe = true;
        self
    }

    pub fn fail_disconnect(self) -> Self {
        self.state.lock().fail_disconnect = true;
        self
    }

    pub fn delay_writes(self, delay: Duration) -> Self {
        self.state.lock().write_delay = Some(delay);
        self
    }

    /// Makes writes fail; with `drop_link` the link is reported down afterwards
    pub fn set_fail_write(&self, fail: bool, drop_link: bool) {
        let mut state = self.state.lock();
        state.fail_write = fail;
        state.drop_link_on_write_failure = drop_link;
    }

    /// Pushes a notification to the currently subscribed transport
    pub fn notify(&self, data: &[u8]) -> bool {
        match &self.state.lock().notify {
            Some(sender) => sender.send(data.to_vec()).is_ok(),
            None => false,
        }
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.state.lock().events.clone()
    }

    /// Frames written by any transport, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                FakeEvent::Write { frame, .. } => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of writes observed in progress at once
    pub fn max_concurrent_writes(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn discover_calls(&self) -> u32 {
        self.state.lock().discover_calls
    }

    /// Whether transport `id` currently holds a link
    pub fn is_link_up(&self, id: usize) -> bool {
        self.state.lock().links.contains(&id)
    }

    pub fn transports_created(&self) -> usize {
        self.transports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn discover(
        &self,
        duration: Duration,
        sink: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        let (advertisements, overrun) = {
            let mut state = self.state.lock();
            state.discover_calls += 1;
            if state.discovery_failures > 0 {
                state.discovery_failures -= 1;
                return Err(Error::DiscoveryFailure {
                    attempts: 1,
                    reason: "simulated adapter failure".to_string(),
                });
            }
            (state.advertisements.clone(), state.discovery_overrun)
        };

        for advertisement in advertisements {
            debug!(address = %advertisement.address, "Fake advertisement");
            if sink.send(advertisement).is_err() {
                return Ok(());
            }
        }

        sleep(duration.saturating_add(overrun.unwrap_or_default())).await;
        Ok(())
    }

    fn transport(&self) -> Box<dyn Transport> {
        let id = self.transports.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeTransport {
            id,
            state: Arc::clone(&self.state),
            log_writes: self.log_writes,
        })
    }
}

/// Transport handed out by [`FakeBackend`]
#[derive(Debug)]
pub struct FakeTransport {
    id: usize,
    state: Arc<Mutex<FakeState>>,
    log_writes: bool,
}

impl FakeTransport {
    fn record(&self, event: FakeEvent) {
        self.state.lock().events.push(event);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, address: &str, _timeout: Duration) -> Result<()> {
        self.record(FakeEvent::Connect {
            transport: self.id,
            address: address.to_string(),
        });

        let (delay, fail, fail_after_link) = {
            let state = self.state.lock();
            (state.connect_delay, state.fail_connect, state.fail_after_link)
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        if fail {
            return Err(Error::ConnectionFailure {
                address: address.to_string(),
                reason: "simulated connect failure".to_string(),
            });
        }

        self.state.lock().links.insert(self.id);
        if fail_after_link {
            return Err(Error::CharacteristicNotFound(
                "simulated service discovery failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(FakeEvent::Disconnect { transport: self.id });

        let mut state = self.state.lock();
        state.links.remove(&self.id);
        state.notify = None;
        if state.fail_disconnect {
            return Err(Error::ConnectionFailure {
                address: format!("fake transport {}", self.id),
                reason: "simulated disconnect failure".to_string(),
            });
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().links.contains(&self.id)
    }

    async fn write(&self, _characteristic: Uuid, data: &[u8]) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.write_delay
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.fail_write {
            if state.drop_link_on_write_failure {
                state.links.remove(&self.id);
            }
            return Err(CommandError::WriteFailed("simulated write failure".to_string()).into());
        }

        if self.log_writes {
            info!(frame = %hex(data), "dry-run write");
        }
        state.events.push(FakeEvent::Write {
            transport: self.id,
            frame: data.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationReceiver> {
        self.record(FakeEvent::Subscribe {
            transport: self.id,
            characteristic,
        });

        let delay = self.state.lock().subscribe_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_subscribe {
            return Err(Error::CharacteristicNotFound(characteristic.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.notify = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        self.record(FakeEvent::Unsubscribe {
            transport: self.id,
            characteristic,
        });
        Ok(())
    }
}
