/*!
 # Controller facade

 [`LedController`] addresses one device: it owns the device's session, turns
 high-level requests into frames and writes them. Argument validation and
 frame encoding happen before the connection is checked, so a value the
 protocol cannot express is reported as a protocol violation even while
 disconnected.
*/

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, instrument, warn};

use crate::classify::{classify, DeviceFamily};
use crate::color::Color;
use crate::config::ControllerConfig;
use crate::modes::Mode;
use crate::observer::{NotificationObserver, ObserverId, ObserverRegistry};
use crate::protocol::{Command, MusicInput};
use crate::registry::SessionRegistry;
use crate::scanner::{ScannedDevice, Scanner};
use crate::schedule::Timer;
use crate::session::{Session, SessionState};
use crate::transport::Backend;
use crate::{CommandError, Error, Result};

/// High-level handle for one LED controller
pub struct LedController {
    address: String,
    name: Option<String>,
    family: DeviceFamily,
    backend: Arc<dyn Backend>,
    registry: Arc<SessionRegistry>,
    observers: Arc<ObserverRegistry>,
    config: ControllerConfig,
    session: Option<Arc<Session>>,
}

impl LedController {
    /// Creates a disconnected controller for `address`
    pub fn new(backend: Arc<dyn Backend>, address: &str, config: ControllerConfig) -> Self {
        Self {
            address: address.to_string(),
            name: None,
            family: DeviceFamily::Unknown,
            backend,
            registry: Arc::new(SessionRegistry::new()),
            observers: Arc::new(ObserverRegistry::new()),
            config,
            session: None,
        }
    }

    /// Creates a disconnected controller for a scanned device
    pub fn for_device(
        backend: Arc<dyn Backend>,
        device: &ScannedDevice,
        config: ControllerConfig,
    ) -> Self {
        let mut controller = Self::new(backend, &device.address, config);
        controller.name = device.name.clone();
        controller.family = device.family;
        controller
    }

    /// Shares `registry` with other controllers, so that only one session per
    /// address stays open across all of them
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Scans and connects to the strongest supported controller in range
    #[instrument(skip(backend))]
    pub async fn connect_to_first(backend: Arc<dyn Backend>, config: ControllerConfig) -> Result<Self> {
        info!("Initializing BLE LED controller");
        let scanner = Scanner::new(Arc::clone(&backend));
        let devices = scanner.scan_configured(&config, true).await?;

        let Some(device) = devices.first() else {
            warn!("No compatible LED device found");
            return Err(Error::NoCompatibleDevice);
        };
        info!(
            "Found compatible device: {} (type: {})",
            device.display_name(),
            device.family
        );

        let mut controller = Self::for_device(backend, device, config);
        controller.connect().await?;
        Ok(controller)
    }

    /// Scans for `address` and connects to it if it is a supported controller
    #[instrument(skip(backend))]
    pub async fn connect_to_address(
        backend: Arc<dyn Backend>,
        address: &str,
        config: ControllerConfig,
    ) -> Result<Self> {
        let scanner = Scanner::new(Arc::clone(&backend));
        let devices = scanner.scan_configured(&config, false).await?;

        let device = devices
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address))
            .ok_or_else(|| Error::DeviceNotFound(address.to_string()))?;

        let mut controller = Self::for_device(backend, device, config);
        controller.require_known_family()?;
        controller.connect().await?;
        Ok(controller)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Records the advertised name and reclassifies the device
    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(str::to_string);
        self.family = classify(name);
    }

    /// Fails unless the advertised name belongs to a known family
    pub fn require_known_family(&self) -> Result<()> {
        if self.family.is_known() {
            return Ok(());
        }
        Err(Error::UnsupportedDevice {
            address: self.address.clone(),
            name: self.name.clone(),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Disconnected, |session| session.state())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Opens a session, replacing any session already open for this address
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        let session = Arc::new(Session::new(
            &self.address,
            self.backend.transport(),
            Arc::clone(&self.observers),
            &self.config,
        ));
        self.registry.insert(Arc::clone(&session)).await;

        if let Err(e) = session.open(self.config.connect_timeout).await {
            self.registry.remove(&session).await;
            self.session = None;
            return Err(e);
        }

        info!(
            "Successfully connected to {} ({})",
            self.name.as_deref().unwrap_or(&self.address),
            self.family
        );
        self.session = Some(session);
        Ok(())
    }

    /// Closes the session. Never fails; transport errors are only logged.
    #[instrument(skip(self), fields(address = %self.address))]
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            self.registry.remove(&session).await;
        }
    }

    /// Registers an observer for notifications from this device
    pub fn add_observer(&self, observer: Arc<dyn NotificationObserver>) -> ObserverId {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    /// Encodes and writes one command
    #[instrument(skip(self, command), fields(address = %self.address, command = command.name()))]
    pub async fn send(&self, command: &Command) -> Result<()> {
        let frame = command.encode()?;
        let session = self.session.as_ref().ok_or(CommandError::NotConnected {
            state: SessionState::Disconnected,
        })?;
        session.write(&frame).await
    }

    #[instrument(skip(self))]
    pub async fn power_on(&self) -> Result<()> {
        self.send(&Command::PowerOn).await?;
        info!("LED strip powered on");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn power_off(&self) -> Result<()> {
        self.send(&Command::PowerOff).await?;
        info!("LED strip powered off");
        Ok(())
    }

    /// Sets a static color; channels are scaled by the color's brightness
    #[instrument(skip(self))]
    pub async fn set_color(&self, color: &Color) -> Result<()> {
        self.send(&Command::SetColor(*color)).await?;
        info!("Color set to {} at {}%", color.to_hex(), color.brightness());
        Ok(())
    }

    /// Sets an RGB color; out-of-range values are clamped
    pub async fn set_rgb(&self, red: i32, green: i32, blue: i32, brightness: i32) -> Result<()> {
        self.set_color(&Color::from_rgb(red, green, blue, brightness)).await
    }

    /// Sets an RGB plus warm white color; out-of-range values are clamped
    pub async fn set_rgbw(
        &self,
        red: i32,
        green: i32,
        blue: i32,
        warm_white: i32,
        brightness: i32,
    ) -> Result<()> {
        self.set_color(&Color::from_rgbw(red, green, blue, warm_white, brightness))
            .await
    }

    /// Switches to the white channel at `brightness` percent
    #[instrument(skip(self))]
    pub async fn set_white(&self, brightness: i32) -> Result<()> {
        self.send(&Command::White { brightness }).await?;
        info!("White set to {}%", brightness.clamp(0, 100));
        Ok(())
    }

    /// Starts a built-in mode
    #[instrument(skip(self, mode), fields(mode = mode.name))]
    pub async fn set_mode(&self, mode: &Mode, speed: i32) -> Result<()> {
        let clamped = speed.clamp(0, 255) as u8;
        if !mode.accepts_speed(clamped) {
            warn!(
                "Speed {} outside the usual range {}-{} for {}",
                clamped, mode.speed_range.0, mode.speed_range.1, mode.name
            );
        }

        self.send(&Command::SetMode {
            mode_id: mode.id,
            speed,
        })
        .await?;
        info!("Mode set to {} at speed {}", mode.name, clamped);
        Ok(())
    }

    /// Starts the mode with catalog id `mode_id`
    pub async fn set_mode_by_id(&self, mode_id: u8, speed: i32) -> Result<()> {
        let mode = Mode::from_id(mode_id)?;
        self.set_mode(mode, speed).await
    }

    /// Starts a mode given as a name, `MODE_n` or hex id
    pub async fn set_mode_named(&self, mode: &str, speed: i32) -> Result<()> {
        let mode = Mode::parse(mode)?;
        self.set_mode(mode, speed).await
    }

    /// Changes the speed of the running mode
    #[instrument(skip(self))]
    pub async fn set_speed(&self, speed: i32) -> Result<()> {
        self.send(&Command::SetSpeed(speed)).await?;
        info!("Effect speed set to {}", speed.clamp(0, 255));
        Ok(())
    }

    /// Makes the lights follow sound from `input`
    #[instrument(skip(self))]
    pub async fn set_music_mode(&self, red: i32, green: i32, input: MusicInput) -> Result<()> {
        self.send(&Command::MusicMode { red, green, input }).await?;
        info!("Music mode enabled ({:?})", input);
        Ok(())
    }

    /// Asks the device to report its status as a notification
    pub async fn query_status(&self) -> Result<()> {
        self.send(&Command::QueryStatus).await
    }

    /// Asks the device to report its clock as a notification
    pub async fn query_time(&self) -> Result<()> {
        self.send(&Command::QueryTime).await
    }

    pub async fn read_color_data(&self) -> Result<()> {
        self.send(&Command::ReadColorData).await
    }

    pub async fn read_device_info(&self) -> Result<()> {
        self.send(&Command::ReadDeviceInfo).await
    }

    /// Sets the device clock
    #[instrument(skip(self))]
    pub async fn set_date_time(&self, timestamp: NaiveDateTime) -> Result<()> {
        self.send(&Command::SetDateTime(timestamp)).await?;
        info!("Device clock set to {}", timestamp.format("%Y-%m-%d %H:%M:%S"));
        Ok(())
    }

    /// Sets the device clock to local time
    pub async fn sync_time(&self) -> Result<()> {
        debug!("Synchronizing device time");
        self.set_date_time(Local::now().naive_local()).await
    }

    /// Programs one timer slot
    #[instrument(skip(self))]
    pub async fn set_timer(&self, timer: &Timer) -> Result<()> {
        self.send(&Command::SetTimer(*timer)).await?;
        info!(
            "Timer {} set to {:?} at {}:{:02}",
            timer.slot, timer.action, timer.hour, timer.minute
        );
        Ok(())
    }
}

impl std::fmt::Debug for LedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedController")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("family", &self.family)
            .field("state", &self.state())
            .finish()
    }
}
