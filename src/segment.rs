//! Number → digit symbols → segment masks.
//!
//! Everything here is pure. A [`DisplayState`] is rebuilt from scratch on
//! every render tick and never persisted.

use serde::Serialize;

/// Number of digit positions on the clock.
pub const DIGITS: usize = 4;

/// Number of segments per digit.
pub const SEGMENTS: usize = 7;

// ── Digit values ────────────────────────────────────────────────────

/// One of the 12 symbols a digit position can show.
///
/// The discriminant doubles as the index into value-keyed colour tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DigitValue {
    Zero = 0,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Minus,
    Blank,
}

impl DigitValue {
    /// All 12 symbols in table order.
    pub const ALL: [DigitValue; 12] = [
        DigitValue::Zero,
        DigitValue::One,
        DigitValue::Two,
        DigitValue::Three,
        DigitValue::Four,
        DigitValue::Five,
        DigitValue::Six,
        DigitValue::Seven,
        DigitValue::Eight,
        DigitValue::Nine,
        DigitValue::Minus,
        DigitValue::Blank,
    ];

    /// The symbol for a decimal digit. Only the last decimal place of `n` is used.
    pub fn from_decimal(n: u32) -> Self {
        Self::ALL[(n % 10) as usize]
    }

    /// Index into value-keyed colour tables (0-9 digits, 10 minus, 11 blank).
    pub fn index(self) -> usize {
        self as usize
    }

    /// The decimal digit this symbol shows, if any.
    pub fn decimal(self) -> Option<u8> {
        match self {
            DigitValue::Minus | DigitValue::Blank => None,
            d => Some(d as u8),
        }
    }
}

// ── Segments ────────────────────────────────────────────────────────

/// Logical identity of one stroke of a digit.
///
/// The discriminant is the segment id (0-6) and the bit position in a
/// [`SegmentMask`]. Ids follow the font table row by row: top, the two upper
/// verticals, the middle bar, the two lower verticals, bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Segment {
    Top = 0,
    UpperLeft = 1,
    UpperRight = 2,
    Middle = 3,
    LowerLeft = 4,
    LowerRight = 5,
    Bottom = 6,
}

impl Segment {
    /// All segments in id order.
    pub const ALL: [Segment; SEGMENTS] = [
        Segment::Top,
        Segment::UpperLeft,
        Segment::UpperRight,
        Segment::Middle,
        Segment::LowerLeft,
        Segment::LowerRight,
        Segment::Bottom,
    ];

    pub fn id(self) -> usize {
        self as usize
    }
}

/// Which of the 7 segments of one digit are lit (bit n = segment id n).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SegmentMask(u8);

impl SegmentMask {
    pub const EMPTY: SegmentMask = SegmentMask(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x7F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn is_lit(self, segment: Segment) -> bool {
        self.0 & (1 << segment.id()) != 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Reverse font lookup: which symbol lights exactly these segments.
    pub fn decode(self) -> Option<DigitValue> {
        DigitValue::ALL
            .into_iter()
            .find(|&d| to_segments(d) == self)
    }
}

/// Seven-segment font, indexed by [`DigitValue::index`].
const FONT: [u8; 12] = [
    0b1110111, // 0
    0b0100100, // 1
    0b1011101, // 2
    0b1101101, // 3
    0b0101110, // 4
    0b1101011, // 5
    0b1111011, // 6
    0b0100101, // 7
    0b1111111, // 8
    0b1101111, // 9
    0b0001000, // -
    0b0000000, // blank
];

/// Segments lit for a symbol.
pub fn to_segments(d: DigitValue) -> SegmentMask {
    SegmentMask::from_bits(FONT[d.index()])
}

// ── Formatting ──────────────────────────────────────────────────────

/// Format `value` into the digit positions, most significant first.
///
/// The lowest `width` decimal places of `|value|` fill positions
/// `0..width` with leading zeros; remaining positions are blank. A negative
/// value puts a minus on the most significant requested position, which
/// hides whatever digit was there (`-1234` shows `-234`).
///
/// # Panics
/// If `width` is 0 or larger than [`DIGITS`].
pub fn format_number(value: i32, width: usize) -> [DigitValue; DIGITS] {
    assert!(
        (1..=DIGITS).contains(&width),
        "format width must be 1..={DIGITS}, got {width}"
    );

    let magnitude = value.unsigned_abs();
    // Least significant first: ones, tens, hundreds, thousands.
    let mut places = [DigitValue::Zero; DIGITS];
    let mut rest = magnitude;
    for place in places.iter_mut() {
        *place = DigitValue::from_decimal(rest);
        rest /= 10;
    }
    if value < 0 {
        places[width - 1] = DigitValue::Minus;
    }

    let mut digits = [DigitValue::Blank; DIGITS];
    for n in 0..width {
        digits[width - 1 - n] = places[n];
    }
    digits
}

// ── Display state ───────────────────────────────────────────────────

/// The four symbols currently shown, plus their segment masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayState {
    pub digits: [DigitValue; DIGITS],
    pub masks: [SegmentMask; DIGITS],
}

impl DisplayState {
    pub fn from_digits(digits: [DigitValue; DIGITS]) -> Self {
        Self {
            digits,
            masks: digits.map(to_segments),
        }
    }

    /// Full-width rendering of a number.
    pub fn from_number(value: i32) -> Self {
        Self::from_digits(format_number(value, DIGITS))
    }

    pub fn blank() -> Self {
        Self::from_digits([DigitValue::Blank; DIGITS])
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use DigitValue::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn blank_lights_nothing() {
        assert_eq!(to_segments(Blank), SegmentMask::EMPTY);
        assert_eq!(to_segments(Blank).bits(), 0);
    }

    #[test]
    fn minus_lights_only_the_middle_bar() {
        let mask = to_segments(Minus);
        assert_eq!(mask.count(), 1);
        assert!(mask.is_lit(Segment::Middle));
    }

    #[test]
    fn eight_lights_everything() {
        let mask = to_segments(Eight);
        assert!(Segment::ALL.iter().all(|&s| mask.is_lit(s)));
    }

    #[rstest]
    #[case(One, &[Segment::UpperRight, Segment::LowerRight])]
    #[case(Seven, &[Segment::Top, Segment::UpperRight, Segment::LowerRight])]
    #[case(Four, &[Segment::UpperLeft, Segment::UpperRight, Segment::Middle, Segment::LowerRight])]
    fn test_font_shapes(#[case] d: DigitValue, #[case] lit: &[Segment]) {
        let mask = to_segments(d);
        for s in Segment::ALL {
            assert_eq!(mask.is_lit(s), lit.contains(&s), "{d:?} segment {s:?}");
        }
    }

    #[test]
    fn font_is_unambiguous() {
        for d in DigitValue::ALL {
            assert_eq!(to_segments(d).decode(), Some(d));
        }
    }

    #[rstest]
    #[case(0, [Zero, Zero, Zero, Zero])]
    #[case(7, [Zero, Zero, Zero, Seven])]
    #[case(1234, [One, Two, Three, Four])]
    #[case(2359, [Two, Three, Five, Nine])]
    #[case(12345, [Two, Three, Four, Five])]
    #[case(-5, [Minus, Zero, Zero, Five])]
    #[case(-100, [Minus, One, Zero, Zero])]
    #[case(-999, [Minus, Nine, Nine, Nine])]
    #[case(-1234, [Minus, Two, Three, Four])]
    fn test_format_width_4(#[case] value: i32, #[case] expected: [DigitValue; 4]) {
        assert_eq!(format_number(value, 4), expected);
    }

    #[rstest]
    #[case(42, 2, [Four, Two, Blank, Blank])]
    #[case(-7, 2, [Minus, Seven, Blank, Blank])]
    #[case(987, 1, [Seven, Blank, Blank, Blank])]
    fn test_format_narrow(#[case] value: i32, #[case] width: usize, #[case] expected: [DigitValue; 4]) {
        assert_eq!(format_number(value, width), expected);
    }

    #[test]
    fn format_handles_i32_min() {
        // |i32::MIN| = 2147483648, last four places 3648
        assert_eq!(format_number(i32::MIN, 4), [Minus, Six, Four, Eight]);
    }

    #[test]
    #[should_panic]
    fn format_rejects_zero_width() {
        format_number(1, 0);
    }

    #[test]
    fn segments_read_back_to_the_formatted_number() {
        for v in -999..=9999 {
            let state = DisplayState::from_number(v);
            let shown: Vec<DigitValue> = state
                .masks
                .iter()
                .map(|m| m.decode().expect("every mask is a font glyph"))
                .collect();

            let magnitude = v.unsigned_abs() % 10_000;
            let expected_digits = [
                magnitude / 1000,
                (magnitude / 100) % 10,
                (magnitude / 10) % 10,
                magnitude % 10,
            ];
            for (slot, d) in shown.iter().enumerate() {
                if v < 0 && slot == 0 {
                    assert_eq!(*d, Minus, "value {v}");
                } else {
                    assert_eq!(d.decimal(), Some(expected_digits[slot] as u8), "value {v} slot {slot}");
                }
            }
        }
    }

    #[test]
    fn digit_value_indexes_follow_table_order() {
        assert_eq!(Zero.index(), 0);
        assert_eq!(Nine.index(), 9);
        assert_eq!(Minus.index(), 10);
        assert_eq!(Blank.index(), 11);
    }
}
