//! Core of the RGB seven-segment clock.
//!
//! This crate turns a time-of-day value into a colour for every light
//! element of a 4-digit clock (7 segments per digit, a short run of RGB
//! elements per segment) and decides which brightness / colour scheme is
//! authoritative at any moment:
//! - [`segment`]: number → digit symbols → lit segments
//! - [`colormap`]: colour-selection strategies
//! - [`render`]: frame composition and the hardware boundary
//! - [`arbiter`]: day/night schedule, forcing and remote control
//! - [`config`]: the persisted configuration record
//! - [`remote`]: the remote-control message contract
//! - [`engine`]: the single control loop that ties it together
//! - [`server`]: HTTP API for the configuration UI
//!
//! Shared helpers (the [`Color`] type and the shutdown flag) live here.

pub mod arbiter;
pub mod colormap;
pub mod config;
pub mod engine;
pub mod error;
pub mod remote;
pub mod render;
pub mod segment;
pub mod server;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Color ──────────────────────────────────────────────────────────

/// A 24-bit RGB colour, 8 bits per channel.
///
/// Serialized as a `"#rrggbb"` string so the HTTP API and the colour
/// pickers of a web UI can exchange it directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build a colour from a packed `0xRRGGBB` value. Bits above 24 are ignored.
    pub const fn from_rgb24(value: u32) -> Self {
        Self {
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }

    /// Pack into `0x00RRGGBB`.
    pub const fn to_rgb24(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Scale every channel by `brightness` (0-255).
    ///
    /// `channel * brightness / 255`, rounded to nearest. 0 gives black and
    /// 255 leaves the colour untouched.
    pub fn scale(self, brightness: u8) -> Self {
        if brightness == u8::MAX {
            return self;
        }
        let scale = |channel: u8| ((channel as u32 * brightness as u32 + 127) / 255) as u8;
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.to_rgb24())
    }
}

/// Error returned when a string is not a `#rrggbb` colour.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid colour {0:?} (expected #rrggbb)")]
pub struct ParseColorError(pub String);

impl FromStr for Color {
    type Err = ParseColorError;

    /// Accepts `#rrggbb` or `rrggbb`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseColorError(s.to_string()));
        }
        u32::from_str_radix(hex, 16)
            .map(Color::from_rgb24)
            .map_err(|_| ParseColorError(s.to_string()))
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

impl TryFrom<String> for Color {
    type Error = ParseColorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ── Shutdown ───────────────────────────────────────────────────────

/// Set up a Ctrl+C handler that sets `running` to false.
///
/// # Rust concept: Arc and AtomicBool
/// The control thread, the reconnect backoff and the HTTP server all watch
/// the same flag. `Arc` shares it, `AtomicBool` makes it safe to read from
/// any thread without a mutex.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the main loop should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn color_new() {
        let c = Color::new(10, 20, 30);
        assert_eq!(c.r, 10);
        assert_eq!(c.g, 20);
        assert_eq!(c.b, 30);
    }

    #[rstest]
    #[case(0xFF0000, Color::new(255, 0, 0))]
    #[case(0x00FFCC, Color::new(0, 255, 204))]
    #[case(0x000000, Color::BLACK)]
    #[case(0xFFFFFF, Color::WHITE)]
    #[case(0xFF123456, Color::new(0x12, 0x34, 0x56))]
    fn test_from_rgb24(#[case] packed: u32, #[case] expected: Color) {
        assert_eq!(Color::from_rgb24(packed), expected);
    }

    #[test]
    fn rgb24_packs_channels() {
        assert_eq!(Color::new(0x12, 0x34, 0x56).to_rgb24(), 0x123456);
    }

    #[test]
    fn scale_0_is_black() {
        assert_eq!(Color::WHITE.scale(0), Color::BLACK);
        assert_eq!(Color::new(1, 128, 254).scale(0), Color::BLACK);
    }

    #[test]
    fn scale_255_is_identity() {
        let c = Color::new(100, 200, 50);
        assert_eq!(c.scale(255), c);
    }

    #[rstest]
    #[case(Color::new(255, 255, 255), 128, Color::new(128, 128, 128))]
    #[case(Color::new(200, 100, 50), 64, Color::new(50, 25, 13))]
    #[case(Color::new(255, 0, 0), 1, Color::new(1, 0, 0))]
    fn test_scale_rounds_to_nearest(#[case] c: Color, #[case] b: u8, #[case] expected: Color) {
        assert_eq!(c.scale(b), expected);
    }

    #[test]
    fn scale_is_monotonic_per_channel() {
        for channel in [0u8, 1, 17, 127, 128, 200, 254, 255] {
            let c = Color::new(channel, channel, channel);
            let mut previous = Color::BLACK;
            for b in 0..=255u8 {
                let scaled = c.scale(b);
                assert!(scaled.r >= previous.r, "channel {channel} brightness {b}");
                assert!(scaled.r <= channel);
                previous = scaled;
            }
        }
    }

    #[rstest]
    #[case("#ff8000", Color::new(255, 128, 0))]
    #[case("FF8000", Color::new(255, 128, 0))]
    #[case(" #00ffcc ", Color::new(0, 255, 204))]
    fn test_parse_color(#[case] input: &str, #[case] expected: Color) {
        assert_eq!(input.parse::<Color>(), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("#fff")]
    #[case("#gg0000")]
    #[case("#ff00000")]
    #[case("+f0000")]
    fn test_parse_color_rejects(#[case] input: &str) {
        assert!(input.parse::<Color>().is_err());
    }

    #[test]
    fn color_displays_as_hex() {
        assert_eq!(Color::new(0, 128, 255).to_string(), "#0080ff");
    }

    #[test]
    fn color_serializes_as_hex_string() {
        let json = serde_json::to_string(&Color::new(255, 0, 128)).unwrap();
        assert_eq!(json, "\"#ff0080\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::new(255, 0, 128));
    }
}
