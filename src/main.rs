use std::sync::Arc;

use ble_led_controller::fake::FakeBackend;
use ble_led_controller::modes::{modes_by_category, SPEED_FAST, SPEED_SLOW};
use ble_led_controller::observer::ChannelObserver;
use ble_led_controller::protocol::hex;
use ble_led_controller::schedule::parse_days;
use ble_led_controller::*;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, instrument, trace, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device address; the strongest supported device is used when omitted
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Connect to --address even if its name matches no known family
    #[arg(long, global = true)]
    force: bool,

    /// Seconds to wait for connect and subscribe
    #[arg(long, global = true, default_value_t = 10)]
    connect_timeout: u64,

    /// Seconds to listen for advertisements
    #[arg(long, global = true, default_value_t = 10)]
    scan_duration: u64,

    /// Use an in-memory device and log the frames instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum Input {
    /// Built-in microphone
    Mic,
    /// Line-in jack
    LineIn,
}

impl From<Input> for MusicInput {
    fn from(input: Input) -> Self {
        match input {
            Input::Mic => MusicInput::Microphone,
            Input::LineIn => MusicInput::LineIn,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby devices
    Scan {
        /// Include devices that are not LED controllers
        #[arg(long)]
        all: bool,
    },
    /// List the built-in modes
    Modes,
    /// Demonstration of LED features
    Demo {
        /// Duration of each demo step in seconds
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
    },
    /// Turn LED strip on
    On,
    /// Turn LED strip off
    Off,
    /// Set a static color
    Color {
        /// Named color (red, warm_white, ...); overrides the channel values
        #[arg(short, long)]
        name: Option<String>,
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: i32,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: i32,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: i32,
        /// Warm white value (0-255)
        #[arg(short, long, default_value_t = 0)]
        warm_white: i32,
        /// Brightness level (0-100)
        #[arg(short = 'l', long, default_value_t = 100)]
        brightness: i32,
    },
    /// Switch to the white channel
    White {
        /// Brightness level (0-100)
        #[arg(short, long, default_value_t = 100)]
        level: i32,
    },
    /// Start a built-in mode
    Mode {
        /// Mode name, MODE_n or hex id (see `modes`)
        mode: String,
        /// Mode speed (0-255)
        #[arg(short, long, default_value_t = 100)]
        speed: i32,
    },
    /// Change the speed of the running mode
    Speed {
        /// Mode speed (0-255)
        speed: i32,
    },
    /// Follow sound
    Music {
        #[arg(short, long, value_enum, default_value_t = Input::Mic)]
        input: Input,
        /// Red sensitivity (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: i32,
        /// Green sensitivity (0-255)
        #[arg(short, long, default_value_t = 0)]
        green: i32,
    },
    /// Program a timer slot
    Timer {
        /// Slot (0-5)
        #[arg(short, long, default_value_t = 0)]
        slot: u8,
        /// Hour (0-23)
        #[arg(long, default_value_t = 8)]
        hour: u8,
        /// Minute (0-59)
        #[arg(short, long, default_value_t = 30)]
        minute: u8,
        /// Days (mon,tue,wed,thu,fri,sat,sun,all,weekdays,weekend)
        #[arg(short, long, default_value = "all")]
        days: String,
        /// Turn the lights off instead of on
        #[arg(long)]
        off: bool,
        /// Store the timer disabled
        #[arg(long)]
        disable: bool,
    },
    /// Set the device clock to local time
    SyncTime,
    /// Query the device status and print the reply
    Status,
}

/// Connection settings from the global flags
fn controller_config(cli: &Cli) -> ControllerConfig {
    let config = ControllerConfig::default()
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
        .with_scan_duration(Duration::from_secs(cli.scan_duration));
    if !cli.dry_run {
        return config;
    }

    // The in-memory devices answer at once
    let capped = config.scan_duration.min(Duration::from_secs(1));
    config.with_scan_duration(capped)
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ble_led_controller=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let config = controller_config(&cli);

    let backend: Arc<dyn Backend> = if cli.dry_run {
        info!("Dry run: frames are logged, nothing is sent");
        Arc::new(FakeBackend::demo())
    } else {
        Arc::new(btle::BtleBackend::new().await?)
    };

    let command = cli.command.unwrap_or(Commands::Demo { duration: 5 });
    match command {
        Commands::Scan { all } => return run_scan(backend, &config, !all).await,
        Commands::Modes => {
            print_modes();
            return Ok(());
        }
        _ => {}
    }

    let mut controller = match connect(backend, cli.address.as_deref(), cli.force, config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Failed to initialize device: {}", e);
            return Err(e.into());
        }
    };

    let result = run_command(&controller, command).await;
    controller.disconnect().await;
    result
}

async fn connect(
    backend: Arc<dyn Backend>,
    address: Option<&str>,
    force: bool,
    config: ControllerConfig,
) -> ble_led_controller::Result<LedController> {
    match address {
        None => LedController::connect_to_first(backend, config).await,
        Some(address) if force => {
            let mut controller = LedController::new(backend, address, config);
            controller.connect().await?;
            Ok(controller)
        }
        Some(address) => LedController::connect_to_address(backend, address, config).await,
    }
}

async fn run_command(controller: &LedController, command: Commands) -> Result<()> {
    match command {
        Commands::Demo { duration } => run_demo(controller, duration).await?,
        Commands::On => controller.power_on().await?,
        Commands::Off => controller.power_off().await?,
        Commands::Color {
            name,
            red,
            green,
            blue,
            warm_white,
            brightness,
        } => {
            let color = match name {
                Some(name) => Color::named(&name)
                    .ok_or_else(|| eyre!("Unknown color name: {name}"))?
                    .with_brightness(brightness),
                None => Color::new(red, green, blue, warm_white, brightness),
            };
            controller.power_on().await?;
            controller.set_color(&color).await?;
        }
        Commands::White { level } => {
            controller.power_on().await?;
            controller.set_white(level).await?;
        }
        Commands::Mode { mode, speed } => {
            controller.power_on().await?;
            controller.set_mode_named(&mode, speed).await?;
        }
        Commands::Speed { speed } => controller.set_speed(speed).await?,
        Commands::Music { input, red, green } => {
            controller.power_on().await?;
            controller.set_music_mode(red, green, input.into()).await?;
        }
        Commands::Timer {
            slot,
            hour,
            minute,
            days,
            off,
            disable,
        } => {
            let days_value = parse_days(&days).ok_or_else(|| eyre!("Invalid days: {days}"))?;
            debug!("Days value: {:#04x}", days_value);

            let action = if off {
                TimerAction::TurnOff
            } else {
                TimerAction::TurnOn
            };
            let mut timer = Timer::new(slot, hour, minute)
                .with_days(days_value)
                .with_action(action);
            if disable {
                timer = timer.disabled();
            }
            controller.set_timer(&timer).await?;
        }
        Commands::SyncTime => controller.sync_time().await?,
        Commands::Status => query_status(controller).await?,
        Commands::Scan { .. } | Commands::Modes => {}
    }
    Ok(())
}

/// Scan and print a table of devices
#[instrument(skip(backend, config))]
async fn run_scan(backend: Arc<dyn Backend>, config: &ControllerConfig, led_only: bool) -> Result<()> {
    let scanner = Scanner::new(backend);
    let devices = scanner.scan_configured(config, led_only).await?;

    if devices.is_empty() {
        warn!("No devices found");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<10} {:>5}", "ADDRESS", "NAME", "FAMILY", "RSSI");
    for device in &devices {
        println!(
            "{:<20} {:<24} {:<10} {:>5} {}",
            device.address,
            device.display_name(),
            device.family,
            device.rssi,
            device.signal_bars()
        );
    }
    Ok(())
}

fn print_modes() {
    for (category, modes) in modes_by_category() {
        println!("{category}:");
        for mode in modes {
            println!("  {:#04x}  {:<24} {}", mode.id, mode.name, mode.description);
        }
    }
}

/// Send a status query and wait briefly for the reply
async fn query_status(controller: &LedController) -> Result<()> {
    let (observer, mut replies) = ChannelObserver::channel();
    let id = controller.add_observer(Arc::new(observer));

    controller.query_status().await?;
    match time::timeout(Duration::from_secs(2), replies.recv()).await {
        Ok(Some(reply)) => println!("{}", hex(&reply)),
        _ => warn!("No status reply received"),
    }

    controller.remove_observer(id);
    Ok(())
}

/// Sleep for specified number of seconds
#[instrument]
async fn sleep(seconds: u64) {
    trace!("Sleeping for {}s", seconds);
    time::sleep(Duration::from_secs(seconds)).await;
    trace!("Sleep completed");
}

/// Run a demonstration of various LED strip features
#[instrument(skip(controller))]
async fn run_demo(controller: &LedController, duration: u64) -> Result<()> {
    info!("Running LED strip demo with {}s intervals", duration);

    // Power off the leds
    info!("Turning LEDs off");
    controller.power_off().await?;
    sleep(duration).await;

    // Power on the leds
    info!("Turning LEDs on");
    controller.power_on().await?;
    sleep(duration).await;

    for name in ["red", "green", "blue"] {
        info!("Setting color to {}", name);
        if let Some(color) = Color::named(name) {
            controller.set_color(&color).await?;
        }
        sleep(duration).await;
    }

    // Same color, half the output
    info!("Setting red at 50% brightness");
    controller.set_rgb(255, 0, 0, 50).await?;
    sleep(duration).await;

    info!("Setting white channel to 100%");
    controller.set_white(100).await?;
    sleep(duration).await;

    info!("Setting slow cross-fade");
    controller.set_mode_by_id(0x27, SPEED_SLOW.into()).await?;
    sleep(duration).await;

    info!("Setting fast color jump");
    controller.set_mode_named("color jump", SPEED_FAST.into()).await?;
    sleep(duration).await;

    // End demo by turning off the lights
    info!("Turning LEDs off to end demo");
    controller.power_off().await?;

    info!("Demo completed!");
    Ok(())
}
