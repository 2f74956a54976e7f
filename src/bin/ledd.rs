use std::env;
use std::sync::Arc;

use ble_led_controller::protocol::hex;
use ble_led_controller::*;
use color_eyre::eyre::{bail, eyre, Result};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn parse_number(value: Option<&str>, what: &str) -> Result<i32> {
    let value = value.ok_or_else(|| eyre!("no {what} given"))?;
    value
        .trim()
        .parse()
        .map_err(|_| eyre!("invalid {what}: {}", value.trim()))
}

/// Run one `command[:args]` line against the controller
async fn execute(controller: &LedController, line: &str) -> Result<()> {
    let (command, args) = match line.split_once(':') {
        Some((command, args)) => (command, Some(args)),
        None => (line, None),
    };
    debug!(command, ?args, "Received command");

    match command {
        "power_on" => controller.power_on().await?,
        "power_off" => controller.power_off().await?,
        "set_color" => {
            let args = args.ok_or_else(|| eyre!("no color given"))?;
            let values = args
                .split(',')
                .map(|s| parse_number(Some(s), "color"))
                .collect::<Result<Vec<i32>>>()?;
            let color = match values.as_slice() {
                [r, g, b] => Color::from_rgb(*r, *g, *b, 100),
                [r, g, b, w] => Color::from_rgbw(*r, *g, *b, *w, 100),
                [r, g, b, w, brightness] => Color::from_rgbw(*r, *g, *b, *w, *brightness),
                _ => bail!("Invalid color format. Use R,G,B[,W[,BRIGHTNESS]] (e.g., 255,0,0 for red)"),
            };
            controller.set_color(&color).await?;
        }
        "set_brightness" => {
            let brightness = parse_number(args, "brightness")?;
            if !(0..=100).contains(&brightness) {
                bail!("Brightness must be between 0 and 100");
            }
            controller.set_white(brightness).await?;
        }
        "set_mode" => {
            let args = args.ok_or_else(|| eyre!("no mode given"))?;
            let (mode, speed) = match args.split_once(',') {
                Some((mode, speed)) => (mode, parse_number(Some(speed), "speed")?),
                None => (args, i32::from(modes::SPEED_NORMAL)),
            };
            controller.set_mode_named(mode, speed).await?;
        }
        "set_speed" => controller.set_speed(parse_number(args, "speed")?).await?,
        "query_status" => controller.query_status().await?,
        "" => bail!("No command given"),
        other => bail!("Unknown command: {other}"),
    }
    Ok(())
}

/// Answers command lines from `input` until it ends, fails to read or Ctrl-C
async fn serve<R: AsyncBufRead + Unpin>(controller: &LedController, input: R) {
    // Mainloop: wait for user input, line by line
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read from stdin: {}", e);
                    None
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        match execute(controller, line.trim()).await {
            // Respond with OK message
            Ok(()) => println!("OK"),
            Err(e) => println!("ERR {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the reply protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ble_led_controller=warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
    color_eyre::install()?;

    // Get a target id/mac address from command line arguments.
    // If not provided, exit.
    let usage = "Usage: ledd <id/mac address>";
    let args: Vec<_> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{usage}");
        std::process::exit(1);
    }
    if args[1] == "-h" || args[1] == "--help" {
        eprintln!("{usage}");
        std::process::exit(0);
    }

    let backend = Arc::new(btle::BtleBackend::new().await?);
    // The daemon paces itself; no extra gap between frames
    let config = ControllerConfig::default().with_command_delay(std::time::Duration::ZERO);
    let mut controller = LedController::connect_to_address(backend, &args[1], config).await?;

    controller.add_observer(Arc::new(|data: &[u8]| println!("NOTIFY {}", hex(data))));

    // Inform about successful initialization
    println!("OK");

    serve(&controller, BufReader::new(io::stdin())).await;

    controller.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ble_led_controller::fake::{FakeBackend, FakeEvent};
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn unreadable_input_stops_serving_without_escaping() -> ble_led_controller::Result<()> {
        let fake = FakeBackend::default();
        let config = ControllerConfig::default().with_command_delay(Duration::ZERO);
        let mut controller =
            LedController::new(Arc::new(fake.clone()), "AA:BB:CC:DD:EE:01", config);
        controller.connect().await?;

        // Invalid UTF-8 makes the line reader fail on the second line
        let input: &[u8] = b"power_on\n\xff\xfe\npower_off\n";
        serve(&controller, input).await;
        controller.disconnect().await;

        assert_eq!(vec![vec![0xcc, 0x23, 0x33]], fake.writes());
        assert_eq!(
            Some(&FakeEvent::Disconnect { transport: 0 }),
            fake.events().last()
        );
        Ok(())
    }
}
