//! Mode arbitration: which brightness and colour map are authoritative.
//!
//! The arbiter is a Moore machine. On every tick its output (night flag,
//! brightness, colour map) is recomputed from scratch from the current
//! time, a configuration snapshot and the remote-control state. The only
//! transition it reports back is the expiry of a temporary force.

use crate::Color;
use crate::colormap::{ColorMap, ColorMapId};
use crate::config::Configuration;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Time of day ─────────────────────────────────────────────────────

/// A wall-clock time encoded as `hour * 100 + minute` (0..=2359).
///
/// The encoding is not contiguous (1259 is followed by 1300) but it orders
/// correctly, which is all range checks need. Serialized as `"HH:MM"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn new(hour: u8, minute: u8) -> Result<Self, ConfigError> {
        if hour > 23 || minute > 59 {
            return Err(ConfigError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self(hour as u16 * 100 + minute as u16))
    }

    /// Validate an `HHMM` integer.
    pub fn from_hhmm(hhmm: u16) -> Result<Self, ConfigError> {
        if hhmm / 100 > 23 || hhmm % 100 > 59 {
            return Err(ConfigError::InvalidTime(hhmm.to_string()));
        }
        Ok(Self(hhmm))
    }

    pub fn hhmm(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 100) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 100) as u8
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ConfigError;

    /// Parses `HH:MM` (a single-digit hour is accepted).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(hour) || hour.len() > 2 || !all_digits(minute) || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Whether `time` falls in `[start, end)`, wrapping past midnight when
/// `end < start`. An empty window (`start == end`) never matches.
pub fn time_in_range(time: TimeOfDay, start: TimeOfDay, end: TimeOfDay) -> bool {
    if end >= start {
        time >= start && time < end
    } else {
        time >= start || time < end
    }
}

// ── Schedule & forcing ──────────────────────────────────────────────

/// When night mode starts and ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ScheduleWindow {
    #[schema(value_type = String, example = "22:00")]
    pub start: TimeOfDay,
    #[schema(value_type = String, example = "06:30")]
    pub end: TimeOfDay,
}

impl ScheduleWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// Whether the schedule says it is night at `now`.
    pub fn is_night(&self, now: TimeOfDay) -> bool {
        time_in_range(now, self.start, self.end)
    }
}

/// Manual override of the scheduled day/night decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ForceState {
    /// Forcing is in effect.
    pub active: bool,
    /// Forced to night (otherwise forced to day).
    pub night: bool,
    /// Keep forcing even after the schedule agrees with the forced mode.
    pub permanent: bool,
}

impl ForceState {
    const ACTIVE: u8 = 1 << 0;
    const DAY: u8 = 1 << 1;
    const PERMANENT: u8 = 1 << 2;

    /// Decode the persisted flag byte. Unknown bits are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            active: byte & Self::ACTIVE != 0,
            night: byte & Self::DAY == 0,
            permanent: byte & Self::PERMANENT != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.active {
            byte |= Self::ACTIVE;
        }
        if !self.night {
            byte |= Self::DAY;
        }
        if self.permanent {
            byte |= Self::PERMANENT;
        }
        byte
    }
}

/// Which side decides what the display shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ControlSource {
    /// Schedule and force flags.
    #[default]
    Standalone,
    /// On/off, brightness and colour pushed over the remote channel.
    #[serde(alias = "mqtt")]
    Remote,
}

impl ControlSource {
    /// Decode the persisted byte; anything unknown falls back to standalone.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => ControlSource::Remote,
            _ => ControlSource::Standalone,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ControlSource::Standalone => 0,
            ControlSource::Remote => 1,
        }
    }
}

impl FromStr for ControlSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "standalone" => Ok(ControlSource::Standalone),
            "remote" | "mqtt" => Ok(ControlSource::Remote),
            other => Err(ConfigError::InvalidControlSource(other.to_string())),
        }
    }
}

// ── Remote state ────────────────────────────────────────────────────

/// Transient state pushed over the remote channel. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct RemoteState {
    pub on: bool,
    pub brightness: u8,
    #[schema(value_type = String, example = "#ffffff")]
    pub color: Color,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            on: true,
            brightness: u8::MAX,
            color: Color::WHITE,
        }
    }
}

// ── Arbiter ─────────────────────────────────────────────────────────

/// The authoritative display policy for one tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub night: bool,
    pub brightness: u8,
    pub color_map: ColorMap,
    /// The predefined map in use, `None` for the remote flat map.
    pub color_map_id: Option<ColorMapId>,
    /// A temporary force just met the schedule and must be switched off.
    pub force_expired: bool,
}

/// Resolves the display policy from schedule, forcing and control source.
#[derive(Clone, Debug, Default)]
pub struct ModeArbiter {
    night: bool,
}

impl ModeArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The night flag resolved on the last tick.
    pub fn is_night(&self) -> bool {
        self.night
    }

    /// Recompute the authoritative policy for `now`.
    ///
    /// When the result has `force_expired` set the caller must clear
    /// `config.force.active`; the arbiter never mutates the configuration.
    pub fn resolve(&mut self, now: TimeOfDay, config: &Configuration, remote: &RemoteState) -> Resolution {
        let resolution = match config.control_source {
            ControlSource::Remote => Resolution {
                night: false,
                brightness: if remote.on { remote.brightness } else { 0 },
                color_map: ColorMap::flat(remote.color),
                color_map_id: None,
                force_expired: false,
            },
            ControlSource::Standalone => {
                let scheduled = config.schedule.is_night(now);
                let force = config.force;
                let (night, force_expired) = if force.active {
                    (force.night, !force.permanent && force.night == scheduled)
                } else {
                    (scheduled, false)
                };
                let period = if night { &config.night } else { &config.day };
                Resolution {
                    night,
                    brightness: period.brightness,
                    color_map: period.color_map.build(&config.custom_colors),
                    color_map_id: Some(period.color_map),
                    force_expired,
                }
            }
        };

        if resolution.night != self.night {
            tracing::info!(
                "Switching to {} mode at {}",
                if resolution.night { "night" } else { "day" },
                now
            );
        }
        if resolution.force_expired {
            tracing::info!("Temporary force expired at {}, schedule has caught up", now);
        }
        self.night = resolution.night;
        resolution
    }
}

// ── Tests ───────────────────────────────────────────────────────────
