/*!
 # Connection sessions

 A [`Session`] owns the connection lifecycle of one device:

 ```text
 Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
                     |
                     +-> Disconnected (connect/subscribe failure or timeout)
 ```

 Writes are legal only while `Connected` and go through a single-permit
 command queue, so at most one frame is in flight per device. Notification
 payloads are pumped from the transport to the session's observers by a
 background task that lives as long as the connection.
*/

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ControllerConfig;
use crate::observer::ObserverRegistry;
use crate::protocol::{hex, NOTIFY_CHAR_UUID, WRITE_CHAR_UUID};
use crate::transport::{NotificationReceiver, Transport};
use crate::{CommandError, Error, Result};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Command queue to manage Bluetooth commands with rate limiting
struct CommandQueue {
    /// Semaphore to limit command concurrency
    semaphore: Semaphore,
    /// Minimum delay between commands
    min_delay: Duration,
    /// Last command timestamp
    last_command: Mutex<Option<Instant>>,
}

impl CommandQueue {
    fn new(min_delay: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(1), // Only allow one command at a time
            min_delay,
            last_command: Mutex::new(None),
        }
    }

    async fn execute<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        // Acquire permit to ensure only one command executes at a time
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CommandError::WriteFailed("command queue closed".to_string()))?;

        // Check if we need to wait before executing
        let mut last_cmd = self.last_command.lock().await;
        if let Some(elapsed) = last_cmd.map(|at| at.elapsed()) {
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                trace!("Rate limiting: waiting {:?} before next command", wait_time);
                time::sleep(wait_time).await;
            }
        }

        let result = future.await;
        *last_cmd = Some(Instant::now());

        result
    }

    /// Waits until no command is in flight
    async fn drain(&self) {
        let _ = self.semaphore.acquire().await;
    }
}

/// The open-connection lifetime of one device address
pub struct Session {
    address: String,
    transport: Box<dyn Transport>,
    observers: Arc<ObserverRegistry>,
    state: watch::Sender<SessionState>,
    /// Serializes open and close
    lifecycle: Mutex<()>,
    queue: CommandQueue,
    write_timeout: Duration,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Creates a disconnected session for `address`
    pub fn new(
        address: &str,
        transport: Box<dyn Transport>,
        observers: Arc<ObserverRegistry>,
        config: &ControllerConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            address: address.to_string(),
            transport,
            observers,
            state,
            lifecycle: Mutex::new(()),
            queue: CommandQueue::new(config.command_delay),
            write_timeout: config.write_timeout,
            pump: parking_lot::Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receives every state transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Observers that receive this session's notifications
    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(address = %self.address, %previous, %state, "Session state changed");
        }
    }

    /// Connects and subscribes to notifications.
    ///
    /// Both steps must finish within `timeout`. On any failure the transport is
    /// rolled back and the session ends `Disconnected`. Opening a connected
    /// session is a no-op.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn open(&self, timeout: Duration) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == SessionState::Connected {
            debug!("Session already connected");
            return Ok(());
        }

        self.set_state(SessionState::Connecting);
        info!("Connecting to device...");

        match time::timeout(timeout, self.establish(timeout)).await {
            Ok(Ok(notifications)) => {
                self.start_pump(notifications);
                self.set_state(SessionState::Connected);
                info!("Connected to {}", self.address);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Failed to connect: {}", e);
                self.roll_back().await;
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
            Err(_) => {
                warn!("Connection attempt timed out after {:?}", timeout);
                self.roll_back().await;
                self.set_state(SessionState::Disconnected);
                Err(Error::Timeout {
                    operation: "connect",
                    after: timeout,
                })
            }
        }
    }

    async fn establish(&self, timeout: Duration) -> Result<NotificationReceiver> {
        self.transport
            .connect(&self.address, timeout)
            .await
            .map_err(|e| self.connection_failure(e))?;

        debug!("Subscribing to notifications");
        self.transport
            .subscribe(NOTIFY_CHAR_UUID)
            .await
            .map_err(|e| self.connection_failure(e))
    }

    /// Drops whatever part of a failed open the transport still holds
    async fn roll_back(&self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Error during rollback disconnect: {}", e);
        }
    }

    fn connection_failure(&self, e: Error) -> Error {
        match e {
            Error::Timeout { .. } | Error::ConnectionFailure { .. } => e,
            other => Error::ConnectionFailure {
                address: self.address.clone(),
                reason: other.to_string(),
            },
        }
    }

    fn start_pump(&self, mut notifications: NotificationReceiver) {
        let observers = Arc::clone(&self.observers);
        let address = self.address.clone();
        let handle = tokio::spawn(async move {
            while let Some(data) = notifications.recv().await {
                trace!(%address, data = %hex(&data), "Notification received");
                observers.dispatch(&data);
            }
            debug!(%address, "Notification stream ended");
        });

        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    /// Unsubscribes and disconnects.
    ///
    /// Waits for an in-flight write to finish first. Transport errors are
    /// logged and swallowed; the session always ends `Disconnected`.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() != SessionState::Connected {
            self.stop_pump();
            self.set_state(SessionState::Disconnected);
            return;
        }

        self.set_state(SessionState::Disconnecting);
        self.queue.drain().await;

        if let Err(e) = self.transport.unsubscribe(NOTIFY_CHAR_UUID).await {
            warn!("Error during unsubscribe: {}", e);
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("Error during disconnect: {}", e);
        }

        self.stop_pump();
        self.set_state(SessionState::Disconnected);
        info!("Disconnected from {}", self.address);
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            SessionState::Connected => Ok(()),
            state => Err(CommandError::NotConnected { state }.into()),
        }
    }

    /// Writes one frame.
    ///
    /// Fails immediately without touching the transport unless `Connected`.
    /// Concurrent writes queue behind each other. After a failed write the
    /// session stays `Connected` if the link is still up and drops to
    /// `Disconnected` otherwise.
    ///
    /// A write that times out is abandoned, not recalled: the radio may still
    /// have delivered the frame, so a `Timeout` does not mean the device
    /// ignored it.
    #[instrument(skip(self, frame), fields(address = %self.address, frame_len = frame.len()))]
    pub async fn write(&self, frame: &[u8]) -> Result<()> {
        self.ensure_connected()?;

        self.queue
            .execute(async {
                // The session may have closed while this write was queued
                self.ensure_connected()?;
                trace!(frame = %hex(frame), "Sending BLE command");

                let write = self.transport.write(WRITE_CHAR_UUID, frame);
                let e = match time::timeout(self.write_timeout, write).await {
                    Ok(Ok(())) => {
                        trace!("Command sent successfully");
                        return Ok(());
                    }
                    Ok(Err(Error::Command(e))) => Error::Command(e),
                    Ok(Err(e)) => CommandError::WriteFailed(e.to_string()).into(),
                    Err(_) => Error::Timeout {
                        operation: "write",
                        after: self.write_timeout,
                    },
                };

                error!("Command failed: {}", e);
                if !self.transport.is_connected().await {
                    warn!("Link to {} lost", self.address);
                    self.stop_pump();
                    self.set_state(SessionState::Disconnected);
                }
                Err(e)
            })
            .await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("observers", &self.observers)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
