/*!
 # Command frames

 Every command is a short fixed-length frame written to the write
 characteristic. There is no checksum; the firmware validates frames by
 position and by the family terminator bytes (`F0 AA` for color, `44` for
 mode, `76` for music), so the encoders below never let a caller choose them.

 Numeric inputs are clamped into range, never rejected. The exceptions are
 mode ids and timer slots, which address fixed tables and fail with a
 [`ProtocolViolation`].
*/

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::trace;
use uuid::Uuid;

use crate::color::{scale, Color};
use crate::modes::Mode;
use crate::schedule::{Timer, TimerAction, TIMER_SLOTS};
use crate::ProtocolViolation;

/// Serial-emulation service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffd5_0000_1000_8000_00805f9b34fb);
/// Characteristic frames are written to
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffd9_0000_1000_8000_00805f9b34fb);
/// Characteristic the device notifies replies on
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffd4_0000_1000_8000_00805f9b34fb);
/// Client characteristic configuration descriptor
pub const DESCRIPTOR_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

pub const DEVICE_INFO_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const SERIAL_NUMBER_UUID: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);
pub const MANUFACTURER_NAME_UUID: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

/// Header byte of each timer slot, repeated twice at the start of the frame
pub const TIMER_HEADERS: [u8; TIMER_SLOTS as usize] = [0x23, 0x25, 0x27, 0x43, 0x45, 0x47];

const COLOR_TAIL: [u8; 2] = [0xf0, 0xaa];
const MODE_TAIL: u8 = 0x44;
const MUSIC_TAIL: u8 = 0x76;
const FLAG_ON: u8 = 0xf0;
const FLAG_OFF: u8 = 0x0f;
const CENTURY: u8 = 0x14;

/// Audio source for music sync mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicInput {
    Microphone,
    LineIn,
}

fn byte(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn flag(value: bool) -> u8 {
    if value {
        FLAG_ON
    } else {
        FLAG_OFF
    }
}

/// `56 R G B W F0 AA`, each channel scaled by the color's brightness
pub fn encode_set_color(color: &Color) -> [u8; 7] {
    let [r, g, b, w] = color.scaled_channels();
    [0x56, r, g, b, w, COLOR_TAIL[0], COLOR_TAIL[1]]
}

/// `CC 23 33`
pub fn encode_power_on() -> [u8; 3] {
    [0xcc, 0x23, 0x33]
}

/// `CC 24 33`
pub fn encode_power_off() -> [u8; 3] {
    [0xcc, 0x24, 0x33]
}

/// `BB <mode> <speed> 44`, speed clamped to 0-255
pub fn encode_mode(mode_id: u8, speed: i32) -> Result<[u8; 4], ProtocolViolation> {
    let mode = Mode::from_id(mode_id)?;
    Ok([0xbb, mode.id, byte(speed), MODE_TAIL])
}

/// `64 F0 R G 00 F0 76` for the microphone, `64 0F R G 00 0F 76` for line-in
pub fn encode_music_mode(red: i32, green: i32, input: MusicInput) -> [u8; 7] {
    let source = match input {
        MusicInput::Microphone => FLAG_ON,
        MusicInput::LineIn => FLAG_OFF,
    };
    [0x64, source, byte(red), byte(green), 0x00, source, MUSIC_TAIL]
}

/// `EF 01 77`
pub fn encode_query_status() -> [u8; 3] {
    [0xef, 0x01, 0x77]
}

/// `24 2A 2B 42`
pub fn encode_query_time() -> [u8; 4] {
    [0x24, 0x2a, 0x2b, 0x42]
}

/// `10 14 SS MM HH DD Mo YY WD 00 00`
///
/// The century byte is fixed; only `year % 100` is sent. `weekday` is
/// 0 for Sunday through 6 for Saturday.
pub fn encode_set_date_time(
    year: i32,
    month: i32,
    day: i32,
    hour: i32,
    minute: i32,
    second: i32,
    weekday: i32,
) -> [u8; 11] {
    [
        0x10,
        CENTURY,
        second.clamp(0, 59) as u8,
        minute.clamp(0, 59) as u8,
        hour.clamp(0, 23) as u8,
        day.clamp(1, 31) as u8,
        month.clamp(1, 12) as u8,
        year.rem_euclid(100) as u8,
        weekday.clamp(0, 6) as u8,
        0x00,
        0x00,
    ]
}

/// [`encode_set_date_time`] from a calendar timestamp
pub fn encode_date_time(timestamp: &NaiveDateTime) -> [u8; 11] {
    encode_set_date_time(
        timestamp.year(),
        timestamp.month() as i32,
        timestamp.day() as i32,
        timestamp.hour() as i32,
        timestamp.minute() as i32,
        timestamp.second() as i32,
        timestamp.weekday().num_days_from_sunday() as i32,
    )
}

/// `H H V HH MM SS WD T` for the timer's slot
///
/// Fails before building anything if the slot is outside 0-5.
pub fn encode_timer(timer: &Timer) -> Result<[u8; 8], ProtocolViolation> {
    let header = *TIMER_HEADERS
        .get(usize::from(timer.slot))
        .ok_or(ProtocolViolation::TimerSlotOutOfRange(timer.slot))?;

    Ok([
        header,
        header,
        flag(timer.enabled),
        timer.hour.min(23),
        timer.minute.min(59),
        timer.second.min(59),
        timer.days & 0x7f,
        flag(timer.action == TimerAction::TurnOn),
    ])
}

/// `FF <speed> 00 00`, applies to the active mode
pub fn encode_set_speed(speed: i32) -> [u8; 4] {
    [0xff, byte(speed), 0x00, 0x00]
}

/// `56 00 00 00 W F0 AA`, W = brightness percentage scaled to 0-255
pub fn encode_white(brightness: i32) -> [u8; 7] {
    let level = scale(0xff, brightness.clamp(0, 100) as u8);
    [0x56, 0x00, 0x00, 0x00, level, COLOR_TAIL[0], COLOR_TAIL[1]]
}

/// `1D F0 00 F1`, reply arrives as a notification
pub fn encode_read_color_data() -> [u8; 4] {
    [0x1d, 0xf0, 0x00, 0xf1]
}

/// `E5 F0 5E`, reply arrives as a notification
pub fn encode_read_device_info() -> [u8; 3] {
    [0xe5, 0xf0, 0x5e]
}

/// A semantic intent that maps to exactly one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PowerOn,
    PowerOff,
    SetColor(Color),
    White { brightness: i32 },
    SetMode { mode_id: u8, speed: i32 },
    SetSpeed(i32),
    MusicMode { red: i32, green: i32, input: MusicInput },
    QueryStatus,
    QueryTime,
    SetDateTime(NaiveDateTime),
    SetTimer(Timer),
    ReadColorData,
    ReadDeviceInfo,
}

impl Command {
    /// Builds the frame for this command
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolViolation> {
        let frame = match self {
            Command::PowerOn => encode_power_on().to_vec(),
            Command::PowerOff => encode_power_off().to_vec(),
            Command::SetColor(color) => encode_set_color(color).to_vec(),
            Command::White { brightness } => encode_white(*brightness).to_vec(),
            Command::SetMode { mode_id, speed } => encode_mode(*mode_id, *speed)?.to_vec(),
            Command::SetSpeed(speed) => encode_set_speed(*speed).to_vec(),
            Command::MusicMode { red, green, input } => {
                encode_music_mode(*red, *green, *input).to_vec()
            }
            Command::QueryStatus => encode_query_status().to_vec(),
            Command::QueryTime => encode_query_time().to_vec(),
            Command::SetDateTime(timestamp) => encode_date_time(timestamp).to_vec(),
            Command::SetTimer(timer) => encode_timer(timer)?.to_vec(),
            Command::ReadColorData => encode_read_color_data().to_vec(),
            Command::ReadDeviceInfo => encode_read_device_info().to_vec(),
        };
        trace!(command = self.name(), frame = %hex(&frame), "encoded frame");
        Ok(frame)
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::PowerOn => "power_on",
            Command::PowerOff => "power_off",
            Command::SetColor(_) => "set_color",
            Command::White { .. } => "white",
            Command::SetMode { .. } => "set_mode",
            Command::SetSpeed(_) => "set_speed",
            Command::MusicMode { .. } => "music_mode",
            Command::QueryStatus => "query_status",
            Command::QueryTime => "query_time",
            Command::SetDateTime(_) => "set_date_time",
            Command::SetTimer(_) => "set_timer",
            Command::ReadColorData => "read_color_data",
            Command::ReadDeviceInfo => "read_device_info",
        }
    }
}

/// Lowercase space-separated hex, e.g. `56 7f 00`
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
