//! Colour-selection strategies.
//!
//! A [`ColorMap`] decides the colour of a lit segment from its digit
//! position, the symbol shown there, or its segment id. Each variant owns a
//! table of exactly the size it indexes, so a kind/table mismatch cannot be
//! built.

use crate::Color;
use crate::error::ConfigError;
use crate::segment::{DIGITS, DigitValue, SEGMENTS, Segment};
use rand::Rng;
use serde::{Deserialize, Serialize};

// ── Palettes ────────────────────────────────────────────────────────

/// Palette keyed by [`DigitValue::index`]; also the segment and random palettes.
pub const DEFAULT_PALETTE: [Color; 12] = [
    Color::from_rgb24(0x00FF00),
    Color::from_rgb24(0xFF0000),
    Color::from_rgb24(0x0000FF),
    Color::from_rgb24(0x00FFCC),
    Color::from_rgb24(0xFF00FF),
    Color::from_rgb24(0xFFFF00),
    Color::from_rgb24(0x00FF80),
    Color::from_rgb24(0xFF0080),
    Color::from_rgb24(0xFF8000),
    Color::from_rgb24(0x0080FF),
    Color::from_rgb24(0x8000FF),
    Color::from_rgb24(0x000000),
];

const DIGIT_POSITION_PALETTE: [Color; DIGITS] = [
    Color::from_rgb24(0xFF0000),
    Color::from_rgb24(0x00FF00),
    Color::from_rgb24(0x0000FF),
    Color::from_rgb24(0xFFFFFF),
];

// ── ColorMap ────────────────────────────────────────────────────────

/// A colour-selection strategy together with its table.
///
/// # Rust concept: enums with data
/// Each variant carries an array of the exact length its lookup needs, so
/// `colors[slot]` with `slot < DIGITS` can never go out of range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColorMap {
    /// One colour per digit position.
    DigitPosition([Color; DIGITS]),
    /// One colour per shown symbol; all segments of a digit share it.
    DigitValue([Color; 12]),
    /// One colour per segment id; every digit is coloured the same way.
    SegmentPosition([Color; SEGMENTS]),
    /// A fresh random pick from the table for every lit segment.
    SegmentRandom([Color; 12]),
}

impl ColorMap {
    /// A map that paints everything in one colour.
    pub fn flat(color: Color) -> Self {
        ColorMap::DigitPosition([color; DIGITS])
    }

    /// Colour of `segment` in digit position `slot`, which shows `value`.
    ///
    /// The random variant draws from `rng` on every call, so two renders of
    /// the same frame generally differ.
    pub fn color_for<R: Rng>(
        &self,
        slot: usize,
        value: DigitValue,
        segment: Segment,
        rng: &mut R,
    ) -> Color {
        match self {
            ColorMap::DigitPosition(table) => table[slot],
            ColorMap::DigitValue(table) => table[value.index()],
            ColorMap::SegmentPosition(table) => table[segment.id()],
            ColorMap::SegmentRandom(table) => table[rng.random_range(0..table.len())],
        }
    }
}

// ── Predefined maps ─────────────────────────────────────────────────

/// Selectable colour schemes, persisted as their id (0-6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ColorMapId {
    #[default]
    AllWhite = 0,
    PerDigit = 1,
    PerValue = 2,
    PerSegment = 3,
    SegmentRandom = 4,
    Custom1 = 5,
    Custom2 = 6,
}

impl ColorMapId {
    pub const ALL: [ColorMapId; 7] = [
        ColorMapId::AllWhite,
        ColorMapId::PerDigit,
        ColorMapId::PerValue,
        ColorMapId::PerSegment,
        ColorMapId::SegmentRandom,
        ColorMapId::Custom1,
        ColorMapId::Custom2,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            ColorMapId::AllWhite => "All White",
            ColorMapId::PerDigit => "Per Digit",
            ColorMapId::PerValue => "Per Number",
            ColorMapId::PerSegment => "Per Segment",
            ColorMapId::SegmentRandom => "Segment-Level Random",
            ColorMapId::Custom1 => "Custom 1",
            ColorMapId::Custom2 => "Custom 2",
        }
    }

    /// Build the map, taking the two custom tables from the configuration.
    pub fn build(self, custom: &[[Color; DIGITS]; 2]) -> ColorMap {
        match self {
            ColorMapId::AllWhite => ColorMap::flat(Color::WHITE),
            ColorMapId::PerDigit => ColorMap::DigitPosition(DIGIT_POSITION_PALETTE),
            ColorMapId::PerValue => ColorMap::DigitValue(DEFAULT_PALETTE),
            ColorMapId::PerSegment => {
                let mut table = [Color::BLACK; SEGMENTS];
                table.copy_from_slice(&DEFAULT_PALETTE[..SEGMENTS]);
                ColorMap::SegmentPosition(table)
            }
            ColorMapId::SegmentRandom => ColorMap::SegmentRandom(DEFAULT_PALETTE),
            ColorMapId::Custom1 => ColorMap::DigitPosition(custom[0]),
            ColorMapId::Custom2 => ColorMap::DigitPosition(custom[1]),
        }
    }
}

impl TryFrom<u8> for ColorMapId {
    type Error = ConfigError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(ConfigError::InvalidColorMapId(id))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    const CUSTOM: [[Color; DIGITS]; 2] = [
        [Color::from_rgb24(0x111111); DIGITS],
        [
            Color::from_rgb24(0x000001),
            Color::from_rgb24(0x000002),
            Color::from_rgb24(0x000003),
            Color::from_rgb24(0x000004),
        ],
    ];

    #[rstest]
    #[case(0, ColorMapId::AllWhite)]
    #[case(3, ColorMapId::PerSegment)]
    #[case(6, ColorMapId::Custom2)]
    fn test_id_round_trip(#[case] id: u8, #[case] expected: ColorMapId) {
        assert_eq!(ColorMapId::try_from(id).unwrap(), expected);
        assert_eq!(expected.id(), id);
    }

    #[rstest]
    #[case(7)]
    #[case(11)]
    #[case(255)]
    fn test_id_out_of_range_is_rejected(#[case] id: u8) {
        assert!(matches!(
            ColorMapId::try_from(id),
            Err(ConfigError::InvalidColorMapId(bad)) if bad == id
        ));
    }

    #[test]
    fn digit_position_uses_the_slot() {
        let map = ColorMapId::PerDigit.build(&CUSTOM);
        let mut rng = rng();
        for slot in 0..DIGITS {
            let c = map.color_for(slot, DigitValue::Eight, Segment::Top, &mut rng);
            assert_eq!(c, DIGIT_POSITION_PALETTE[slot]);
        }
    }

    #[test]
    fn digit_value_uses_the_symbol() {
        let map = ColorMapId::PerValue.build(&CUSTOM);
        let mut rng = rng();
        let one = map.color_for(0, DigitValue::One, Segment::UpperRight, &mut rng);
        let one_elsewhere = map.color_for(3, DigitValue::One, Segment::LowerRight, &mut rng);
        assert_eq!(one, Color::from_rgb24(0xFF0000));
        assert_eq!(one, one_elsewhere);
        assert_eq!(
            map.color_for(1, DigitValue::Minus, Segment::Middle, &mut rng),
            Color::from_rgb24(0x8000FF)
        );
    }

    #[test]
    fn segment_position_uses_the_segment() {
        let map = ColorMapId::PerSegment.build(&CUSTOM);
        let mut rng = rng();
        for slot in 0..DIGITS {
            for s in Segment::ALL {
                let c = map.color_for(slot, DigitValue::Eight, s, &mut rng);
                assert_eq!(c, DEFAULT_PALETTE[s.id()]);
            }
        }
    }

    #[test]
    fn segment_random_draws_from_the_whole_table() {
        let map = ColorMapId::SegmentRandom.build(&CUSTOM);
        let mut rng = rng();
        let seen: HashSet<Color> = (0..2000)
            .map(|_| map.color_for(0, DigitValue::Eight, Segment::Top, &mut rng))
            .collect();
        assert_eq!(seen.len(), DEFAULT_PALETTE.len());
    }

    #[test]
    fn segment_random_is_reproducible_with_a_fixed_seed() {
        let map = ColorMapId::SegmentRandom.build(&CUSTOM);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..28)
                .map(|_| map.color_for(0, DigitValue::Eight, Segment::Top, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[test]
    fn custom_maps_use_configured_tables() {
        let mut rng = rng();
        let one = ColorMapId::Custom1.build(&CUSTOM);
        let two = ColorMapId::Custom2.build(&CUSTOM);
        assert_eq!(one.color_for(2, DigitValue::Zero, Segment::Top, &mut rng), Color::from_rgb24(0x111111));
        assert_eq!(two.color_for(3, DigitValue::Zero, Segment::Top, &mut rng), Color::from_rgb24(0x000004));
    }

    #[test]
    fn flat_map_is_uniform() {
        let map = ColorMap::flat(Color::new(1, 2, 3));
        let mut rng = rng();
        for slot in 0..DIGITS {
            assert_eq!(map.color_for(slot, DigitValue::Five, Segment::Bottom, &mut rng), Color::new(1, 2, 3));
        }
    }
}
