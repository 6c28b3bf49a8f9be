//! Frame composition and the hardware boundary.
//!
//! The renderer turns a [`DisplayState`], a [`ColorMap`] and a brightness
//! into one colour per light element and pushes them through a
//! [`FrameSink`]. Nothing becomes visible until [`FrameSink::commit`].
//!
//! ## Element layout
//! Each digit owns `SEGMENTS * LEDS_PER_SEGMENT` consecutive elements.
//! Inside a digit the segments are wired in a fixed physical order that
//! differs from the logical segment ids, see [`physical_group`].

use crate::Color;
use crate::colormap::ColorMap;
use crate::segment::{DIGITS, DisplayState, SEGMENTS, Segment};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

/// Elements driven as one segment.
pub const LEDS_PER_SEGMENT: usize = 3;

/// Elements on the whole clock.
pub const ELEMENT_COUNT: usize = DIGITS * SEGMENTS * LEDS_PER_SEGMENT;

/// Physical element group of each logical segment id within a digit.
const WIRING: [usize; SEGMENTS] = [1, 0, 2, 6, 5, 3, 4];

/// Physical group index (0-6) that a logical segment is wired to.
pub fn physical_group(segment: Segment) -> usize {
    WIRING[segment.id()]
}

/// The contiguous element indices that make up `segment` of digit `slot`.
pub fn element_range(slot: usize, segment: Segment) -> Range<usize> {
    let start = slot * SEGMENTS * LEDS_PER_SEGMENT + physical_group(segment) * LEDS_PER_SEGMENT;
    start..start + LEDS_PER_SEGMENT
}

// ── Hardware boundary ───────────────────────────────────────────────

/// Where rendered colours go.
///
/// # Rust concept: traits as seams
/// The engine only needs "set element N" and "show it now". A strip
/// driver, a simulator or a test buffer can all sit behind this trait.
pub trait FrameSink {
    /// Stage the colour of element `index` (`0..ELEMENT_COUNT`).
    fn set_element_color(&mut self, index: usize, color: Color);

    /// Make all staged colours visible at once.
    fn commit(&mut self);
}

/// A staging buffer whose committed frame is shared with readers.
///
/// The HTTP server reads the committed frame through
/// [`FrameBuffer::snapshot_handle`]; only [`FrameSink::commit`] writes it.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: Vec<Color>,
    committed: Arc<Mutex<Vec<Color>>>,
    commits: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            pending: vec![Color::BLACK; ELEMENT_COUNT],
            committed: Arc::new(Mutex::new(vec![Color::BLACK; ELEMENT_COUNT])),
            commits: 0,
        }
    }

    /// Shared handle to the last committed frame.
    pub fn snapshot_handle(&self) -> Arc<Mutex<Vec<Color>>> {
        self.committed.clone()
    }

    /// Copy of the last committed frame.
    pub fn committed(&self) -> Vec<Color> {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of commits so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for FrameBuffer {
    fn set_element_color(&mut self, index: usize, color: Color) {
        self.pending[index] = color;
    }

    fn commit(&mut self) {
        let mut committed = self.committed.lock().unwrap_or_else(PoisonError::into_inner);
        committed.copy_from_slice(&self.pending);
        self.commits += 1;
        tracing::trace!("Frame {} committed", self.commits);
    }
}

// ── Composition ─────────────────────────────────────────────────────

/// Colour-map colour of each segment in logical order (digit-major,
/// segment id minor), black where unlit. Brightness is not applied.
pub fn compose_segments<R: Rng>(state: &DisplayState, map: &ColorMap, rng: &mut R) -> Vec<Color> {
    let mut segments = Vec::with_capacity(DIGITS * SEGMENTS);
    for (slot, (&value, &mask)) in state.digits.iter().zip(state.masks.iter()).enumerate() {
        for segment in Segment::ALL {
            segments.push(if mask.is_lit(segment) {
                map.color_for(slot, value, segment, rng)
            } else {
                Color::BLACK
            });
        }
    }
    segments
}

/// Scale logical segment colours by `brightness` and spread each over its
/// physical elements.
pub fn expand_segments(segments: &[Color], brightness: u8) -> Vec<Color> {
    let mut frame = vec![Color::BLACK; ELEMENT_COUNT];
    for slot in 0..DIGITS {
        for segment in Segment::ALL {
            let color = segments[slot * SEGMENTS + segment.id()].scale(brightness);
            frame[element_range(slot, segment)].fill(color);
        }
    }
    frame
}

/// Compute every element colour for one frame.
///
/// Lit segments take their colour from `map`, scaled by `brightness`;
/// unlit segments are black.
pub fn compose_frame<R: Rng>(
    state: &DisplayState,
    map: &ColorMap,
    brightness: u8,
    rng: &mut R,
) -> Vec<Color> {
    expand_segments(&compose_segments(state, map, rng), brightness)
}

/// Colour of each segment in logical order (digit-major, segment id minor),
/// read back from a composed or committed frame.
pub fn segment_colors(frame: &[Color]) -> Vec<Color> {
    (0..DIGITS)
        .flat_map(|slot| Segment::ALL.into_iter().map(move |s| (slot, s)))
        .map(|(slot, segment)| frame[element_range(slot, segment).start])
        .collect()
}

// ── Renderer ────────────────────────────────────────────────────────

/// Owns the frame sink and the random source of the segment-random map.
///
/// The unscaled segment colours of the last frame are kept in a shared
/// buffer for readers that apply brightness themselves.
pub struct Renderer<S: FrameSink> {
    sink: S,
    rng: StdRng,
    segments: Arc<Mutex<Vec<Color>>>,
}

impl<S: FrameSink> Renderer<S> {
    /// A renderer with an OS-seeded random source.
    pub fn new(sink: S) -> Self {
        Self::with_rng(sink, StdRng::from_os_rng())
    }

    /// A renderer with a caller-chosen random source (fixed seeds in tests).
    pub fn with_rng(sink: S, rng: StdRng) -> Self {
        Self {
            sink,
            rng,
            segments: Arc::new(Mutex::new(vec![Color::BLACK; DIGITS * SEGMENTS])),
        }
    }

    /// Render one frame and commit it.
    pub fn render(&mut self, state: &DisplayState, map: &ColorMap, brightness: u8) {
        let segments = compose_segments(state, map, &mut self.rng);
        for (index, color) in expand_segments(&segments, brightness).into_iter().enumerate() {
            self.sink.set_element_color(index, color);
        }
        self.sink.commit();
        *self.segments.lock().unwrap_or_else(PoisonError::into_inner) = segments;
    }

    /// Shared handle to the unscaled segment colours of the last frame.
    pub fn segments_handle(&self) -> Arc<Mutex<Vec<Color>>> {
        self.segments.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

// ── Tests ───────────────────────────────────────────────────────────
