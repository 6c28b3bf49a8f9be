//! The persisted clock configuration.
//!
//! [`ConfigStore`] owns the only mutable [`Configuration`]. Every accepted
//! [`ConfigCommand`] is validated, applied to a copy, written to storage as
//! a whole record and only then made current, so a rejected or failed
//! command leaves both memory and storage untouched.
//!
//! ## Record layout
//! A fixed [`RECORD_LEN`]-byte little-endian record:
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `RGBC`                            |
//! | 4      | 1    | layout version                          |
//! | 8      | 2    | night start (HHMM)                      |
//! | 10     | 2    | night end (HHMM)                        |
//! | 12     | 1    | force flags                             |
//! | 13     | 1    | control source                          |
//! | 16     | 2    | day colour-map id, day brightness       |
//! | 20     | 2    | night colour-map id, night brightness   |
//! | 24     | 16   | custom table 1 (4 × `0x00RRGGBB`)       |
//! | 40     | 16   | custom table 2                          |
//!
//! A region without the magic (never written: all `0x00` or all `0xFF`)
//! decodes to [`Configuration::default`]. Individually invalid fields fall
//! back to their defaults.

use crate::Color;
use crate::arbiter::{ControlSource, ForceState, ScheduleWindow, TimeOfDay};
use crate::colormap::ColorMapId;
use crate::error::ConfigError;
use crate::segment::DIGITS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// ── Configuration ───────────────────────────────────────────────────

/// Colour scheme and brightness for one period (day or night).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PeriodSettings {
    pub color_map: ColorMapId,
    pub brightness: u8,
}

/// Day or night.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Night,
}

/// Everything that survives a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Configuration {
    pub schedule: ScheduleWindow,
    pub force: ForceState,
    pub control_source: ControlSource,
    pub day: PeriodSettings,
    pub night: PeriodSettings,
    /// Tables of the two user-defined maps (`custom_1`, `custom_2`).
    #[schema(value_type = Vec<Vec<String>>)]
    pub custom_colors: [[Color; DIGITS]; 2],
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            schedule: ScheduleWindow::default(),
            force: ForceState::default(),
            control_source: ControlSource::Standalone,
            day: PeriodSettings {
                color_map: ColorMapId::AllWhite,
                brightness: 255,
            },
            night: PeriodSettings {
                color_map: ColorMapId::AllWhite,
                brightness: 64,
            },
            custom_colors: [[Color::WHITE; DIGITS]; 2],
        }
    }
}

impl Configuration {
    pub fn period(&self, period: Period) -> &PeriodSettings {
        match period {
            Period::Day => &self.day,
            Period::Night => &self.night,
        }
    }

    fn period_mut(&mut self, period: Period) -> &mut PeriodSettings {
        match period {
            Period::Day => &mut self.day,
            Period::Night => &mut self.night,
        }
    }

    /// Apply one command. Input is validated before anything is changed.
    pub fn apply(&mut self, command: &ConfigCommand) -> Result<(), ConfigError> {
        match *command {
            ConfigCommand::SetColorMap { period, id } => {
                let id = ColorMapId::try_from(id)?;
                self.period_mut(period).color_map = id;
            }
            ConfigCommand::SetBrightness { period, value } => {
                self.period_mut(period).brightness = value;
            }
            ConfigCommand::SetCustomColors { slot, colors } => {
                let index = match slot {
                    1 | 2 => slot as usize - 1,
                    other => return Err(ConfigError::InvalidCustomSlot(other)),
                };
                self.custom_colors[index] = colors;
            }
            ConfigCommand::SetSchedule(window) => self.schedule = window,
            ConfigCommand::SetForce(force) => self.force = force,
            ConfigCommand::SetControlSource(source) => self.control_source = source,
        }
        Ok(())
    }
}

/// A mutation requested by the configuration UI, one per field group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Select a predefined colour map (id 0-6) for a period.
    SetColorMap { period: Period, id: u8 },
    SetBrightness { period: Period, value: u8 },
    /// Replace the table of custom map 1 or 2.
    SetCustomColors { slot: u8, colors: [Color; DIGITS] },
    SetSchedule(ScheduleWindow),
    SetForce(ForceState),
    SetControlSource(ControlSource),
}

// ── Record codec ────────────────────────────────────────────────────

/// Size of the persisted record in bytes.
pub const RECORD_LEN: usize = 64;

const MAGIC: [u8; 4] = *b"RGBC";
const VERSION: u8 = 1;

const OFF_VERSION: usize = 4;
const OFF_NIGHT_START: usize = 8;
const OFF_NIGHT_END: usize = 10;
const OFF_FORCE: usize = 12;
const OFF_CTRL_SRC: usize = 13;
const OFF_DAY: usize = 16;
const OFF_NIGHT: usize = 20;
const OFF_CUSTOM: [usize; 2] = [24, 40];

/// Encode the whole configuration as a record.
pub fn encode(config: &Configuration) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[..MAGIC.len()].copy_from_slice(&MAGIC);
    record[OFF_VERSION] = VERSION;
    write_u16(&mut record, OFF_NIGHT_START, config.schedule.start.hhmm());
    write_u16(&mut record, OFF_NIGHT_END, config.schedule.end.hhmm());
    record[OFF_FORCE] = config.force.to_byte();
    record[OFF_CTRL_SRC] = config.control_source.to_byte();
    record[OFF_DAY] = config.day.color_map.id();
    record[OFF_DAY + 1] = config.day.brightness;
    record[OFF_NIGHT] = config.night.color_map.id();
    record[OFF_NIGHT + 1] = config.night.brightness;
    for (table, &offset) in config.custom_colors.iter().zip(OFF_CUSTOM.iter()) {
        for (i, color) in table.iter().enumerate() {
            write_u32(&mut record, offset + 4 * i, color.to_rgb24());
        }
    }
    record
}

/// Decode a record, falling back to defaults for a blank region or bad fields.
pub fn decode(bytes: &[u8]) -> Configuration {
    let defaults = Configuration::default();

    if bytes.len() < RECORD_LEN || bytes[..MAGIC.len()] != MAGIC {
        tracing::info!("No stored configuration found, using defaults");
        return defaults;
    }
    if bytes[OFF_VERSION] != VERSION {
        tracing::warn!(
            "Stored configuration has unknown layout version {}, using defaults",
            bytes[OFF_VERSION]
        );
        return defaults;
    }

    let time = |offset: usize, fallback: TimeOfDay| {
        let raw = read_u16(bytes, offset);
        TimeOfDay::from_hhmm(raw).unwrap_or_else(|e| {
            tracing::warn!("Stored schedule field at {}: {}, using {}", offset, e, fallback);
            fallback
        })
    };
    let period = |offset: usize, fallback: PeriodSettings| PeriodSettings {
        color_map: ColorMapId::try_from(bytes[offset]).unwrap_or_else(|e| {
            tracing::warn!("Stored colour map at {}: {}, using {:?}", offset, e, fallback.color_map);
            fallback.color_map
        }),
        brightness: bytes[offset + 1],
    };

    let mut custom_colors = defaults.custom_colors;
    for (table, &offset) in custom_colors.iter_mut().zip(OFF_CUSTOM.iter()) {
        for (i, color) in table.iter_mut().enumerate() {
            *color = Color::from_rgb24(read_u32(bytes, offset + 4 * i));
        }
    }

    Configuration {
        schedule: ScheduleWindow::new(
            time(OFF_NIGHT_START, defaults.schedule.start),
            time(OFF_NIGHT_END, defaults.schedule.end),
        ),
        force: ForceState::from_byte(bytes[OFF_FORCE]),
        control_source: ControlSource::from_byte(bytes[OFF_CTRL_SRC]),
        day: period(OFF_DAY, defaults.day),
        night: period(OFF_NIGHT, defaults.night),
        custom_colors,
    }
}

fn write_u16(record: &mut [u8], offset: usize, value: u16) {
    record[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(record: &mut [u8], offset: usize, value: u32) {
    record[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// ── Storage ─────────────────────────────────────────────────────────

/// Durable storage for one record.
pub trait Storage {
    /// Read the stored bytes. A region that was never written may return
    /// anything (empty, zeros, `0xFF`); [`decode`] copes with all of it.
    fn read(&mut self) -> io::Result<Vec<u8>>;

    /// Replace the stored record.
    fn write(&mut self, record: &[u8]) -> io::Result<()>;
}

/// Record kept in a file, replaced atomically through a sibling temp file.
#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read(&mut self) -> io::Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, record: &[u8]) -> io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, record)?;
        fs::rename(&tmp, &self.path)
    }
}

/// In-memory storage, mainly for tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    pub bytes: Vec<u8>,
    /// Number of successful writes.
    pub writes: usize,
}

impl MemoryStorage {
    /// A region of [`RECORD_LEN`] bytes all set to `fill`.
    pub fn filled(fill: u8) -> Self {
        Self {
            bytes: vec![fill; RECORD_LEN],
            writes: 0,
        }
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn write(&mut self, record: &[u8]) -> io::Result<()> {
        self.bytes = record.to_vec();
        self.writes += 1;
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Owner of the canonical configuration and its storage.
pub struct ConfigStore<S: Storage> {
    storage: S,
    config: Configuration,
}

impl<S: Storage> ConfigStore<S> {
    /// Load the configuration once at startup. Never fails: unreadable or
    /// blank storage yields the defaults.
    pub fn load(mut storage: S) -> Self {
        let config = match storage.read() {
            Ok(bytes) => decode(&bytes),
            Err(e) => {
                tracing::warn!("Failed to read stored configuration: {}, using defaults", e);
                Configuration::default()
            }
        };
        tracing::debug!("Loaded configuration: {:?}", config);
        Self { storage, config }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Validate, persist and adopt one command.
    pub fn apply(&mut self, command: &ConfigCommand) -> Result<&Configuration, ConfigError> {
        let mut next = self.config.clone();
        next.apply(command)?;
        self.storage.write(&encode(&next))?;
        self.config = next;
        tracing::info!("Configuration updated: {:?}", command);
        Ok(&self.config)
    }

    /// Write the current configuration as a whole.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        self.storage.write(&encode(&self.config))?;
        Ok(())
    }

    /// Switch off forcing after a temporary force met the schedule.
    ///
    /// The in-memory flag is cleared even if persisting fails.
    pub fn clear_force(&mut self) {
        self.config.force.active = false;
        if let Err(e) = self.save() {
            tracing::warn!("Failed to persist expired force: {}", e);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
