/*!
 # Scheduling functionality for LED controllers

 The controller stores up to six timers, each of which turns the lights on
 or off at a time of day on a set of weekdays.
*/

use tracing::{debug, trace};

/// Number of timer slots on the device
pub const TIMER_SLOTS: u8 = 6;

/// Represents days of the week for scheduling
#[derive(Debug, Clone, Copy)]
pub struct Days {
    /// Sunday (0x01)
    pub sunday: u8,
    /// Monday (0x02)
    pub monday: u8,
    /// Tuesday (0x04)
    pub tuesday: u8,
    /// Wednesday (0x08)
    pub wednesday: u8,
    /// Thursday (0x10)
    pub thursday: u8,
    /// Friday (0x20)
    pub friday: u8,
    /// Saturday (0x40)
    pub saturday: u8,
    /// All days (0x7F)
    pub all: u8,
    /// Week days (Monday-Friday, 0x3E)
    pub week_days: u8,
    /// Weekend days (Saturday-Sunday, 0x41)
    pub weekend_days: u8,
    /// No days (0x00)
    pub none: u8,
}

/// Predefined day constants for scheduling
pub const WEEK_DAYS: Days = Days {
    sunday: 0x01,
    monday: 0x02,
    tuesday: 0x04,
    wednesday: 0x08,
    thursday: 0x10,
    friday: 0x20,
    saturday: 0x40,
    all: 0x01 + 0x02 + 0x04 + 0x08 + 0x10 + 0x20 + 0x40,
    week_days: 0x02 + 0x04 + 0x08 + 0x10 + 0x20,
    weekend_days: 0x40 + 0x01,
    none: 0x00,
};

/// Parse a days string (`mon`, `weekdays`, `sat,sun`, ...) to a bitmask.
///
/// Returns `None` if any component is not a day name.
pub fn parse_days(days: &str) -> Option<u8> {
    let result = match days.trim().to_lowercase().as_str() {
        "sun" | "sunday" => WEEK_DAYS.sunday,
        "mon" | "monday" => WEEK_DAYS.monday,
        "tue" | "tuesday" => WEEK_DAYS.tuesday,
        "wed" | "wednesday" => WEEK_DAYS.wednesday,
        "thu" | "thursday" => WEEK_DAYS.thursday,
        "fri" | "friday" => WEEK_DAYS.friday,
        "sat" | "saturday" => WEEK_DAYS.saturday,
        "all" | "daily" => WEEK_DAYS.all,
        "weekdays" => WEEK_DAYS.week_days,
        "weekend" => WEEK_DAYS.weekend_days,
        "none" => WEEK_DAYS.none,
        composite if composite.contains(',') => {
            debug!("Parsing composite days string");
            let mut combined = 0;
            for day in composite.split(',') {
                combined |= parse_days(day)?;
            }
            combined
        }
        _ => return None,
    };

    trace!("Days '{}' parsed to bitmask: {:#04x}", days, result);
    Some(result)
}

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    TurnOn,
    TurnOff,
}

/// A scheduled on/off action stored in one of the device's timer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    /// Slot index (0-5)
    pub slot: u8,
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Weekday bitmask, bit 0 = Sunday (use the WEEK_DAYS constants)
    pub days: u8,
    /// Whether the slot is active
    pub enabled: bool,
    /// Power state applied when the timer fires
    pub action: TimerAction,
}

impl Timer {
    /// An enabled timer that turns the lights on every day
    pub fn new(slot: u8, hour: u8, minute: u8) -> Self {
        Self {
            slot,
            hour,
            minute,
            second: 0,
            days: WEEK_DAYS.all,
            enabled: true,
            action: TimerAction::TurnOn,
        }
    }

    pub fn with_second(mut self, second: u8) -> Self {
        self.second = second;
        self
    }

    pub fn with_days(mut self, days: u8) -> Self {
        self.days = days;
        self
    }

    pub fn with_action(mut self, action: TimerAction) -> Self {
        self.action = action;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
